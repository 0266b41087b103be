//! Typed - the message vocabulary and everything that turns it into envelopes.
//!
//! # Two layers
//! - **Typed**: `Message`, `Rpc`, `Handler<T>` - the compiler pairs each
//!   request with its reply and its handler
//! - **Erased**: `Payload`, `RequestHandler`, `TypeRegistry` - what the loops
//!   see after a tag has been looked up

pub mod codec;
pub mod handler;
pub mod message;
pub mod registry;
pub mod vocabulary;

pub use self::codec::{CodecError, Encoded, PayloadCodec};
pub use self::handler::{Handler, HandlerError, RequestHandler};
pub use self::message::{Message, MessageKind, Rpc};
pub use self::registry::{RegistryError, TypeEntry, TypeRegistry};
pub use self::vocabulary::*;
