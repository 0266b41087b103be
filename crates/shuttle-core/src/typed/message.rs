//! Message / Rpc traits - binding a Rust type to its wire tag.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::vocabulary::{Request, Response};

/// Which channel a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
}

/// A payload shape with a tag.
///
/// `TYPE` is the simple type name, no module path, so that a process which
/// arranges its types differently still agrees on the tag. Tags are unique
/// across the whole vocabulary; `TypeRegistry` refuses duplicates.
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: content is JSON
/// - `Send + Sync + 'static`: messages cross task boundaries
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
    const KIND: MessageKind;
}

/// A request together with the one response shape that answers it.
pub trait Rpc: Message {
    type Reply: Message;

    fn into_request(self) -> Request;

    /// Pick the expected reply out of a decoded response, or hand it back.
    fn reply_from(response: Response) -> Result<Self::Reply, Response>;
}
