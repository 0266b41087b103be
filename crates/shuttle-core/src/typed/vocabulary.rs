//! The closed request/response vocabulary.
//!
//! `vocabulary!` is the single table of request => response pairs. From it
//! come the `Request`, `Response` and `Payload` enums, every `Message` and
//! `Rpc` impl, registry population and the handler dispatch table. A new
//! pair is one more table line, and `HandlerTable` stops compiling until the
//! handler implements `Handler` for the new request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::handler::{Handler, HandlerError, RequestHandler};
use super::message::{Message, MessageKind, Rpc};
use super::registry::{RegistryError, TypeRegistry};
use crate::domain::{Car, Company};

macro_rules! vocabulary {
    ( $( $req:ident => $resp:ident ),+ $(,)? ; fault: $fault:ident ) => {
        /// Every request the dispatch side understands.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $( $req($req), )+
        }

        /// Every response the dispatch side may publish.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Response {
            $( $resp($resp), )+
            $fault($fault),
        }

        /// Anything that can sit in an envelope.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Payload {
            Request(Request),
            Response(Response),
        }

        impl Request {
            pub fn type_name(&self) -> &'static str {
                match self {
                    $( Request::$req(_) => <$req as Message>::TYPE, )+
                }
            }

            pub fn to_content(&self) -> serde_json::Result<String> {
                match self {
                    $( Request::$req(m) => serde_json::to_string(m), )+
                }
            }

            /// The caller's `data_id`, echoed by the reply.
            pub fn data_id(&self) -> Uuid {
                match self {
                    $( Request::$req(m) => m.data_id, )+
                }
            }
        }

        impl Response {
            pub fn type_name(&self) -> &'static str {
                match self {
                    $( Response::$resp(_) => <$resp as Message>::TYPE, )+
                    Response::$fault(_) => <$fault as Message>::TYPE,
                }
            }

            pub fn to_content(&self) -> serde_json::Result<String> {
                match self {
                    $( Response::$resp(m) => serde_json::to_string(m), )+
                    Response::$fault(m) => serde_json::to_string(m),
                }
            }
        }

        $(
            impl Message for $req {
                const TYPE: &'static str = stringify!($req);
                const KIND: MessageKind = MessageKind::Request;
            }

            impl Message for $resp {
                const TYPE: &'static str = stringify!($resp);
                const KIND: MessageKind = MessageKind::Response;
            }

            impl From<$req> for Request {
                fn from(m: $req) -> Self {
                    Request::$req(m)
                }
            }

            impl From<$req> for Payload {
                fn from(m: $req) -> Self {
                    Payload::Request(Request::$req(m))
                }
            }

            impl From<$resp> for Response {
                fn from(m: $resp) -> Self {
                    Response::$resp(m)
                }
            }

            impl From<$resp> for Payload {
                fn from(m: $resp) -> Self {
                    Payload::Response(Response::$resp(m))
                }
            }

            impl Rpc for $req {
                type Reply = $resp;

                fn into_request(self) -> Request {
                    Request::$req(self)
                }

                fn reply_from(response: Response) -> Result<$resp, Response> {
                    match response {
                        Response::$resp(m) => Ok(m),
                        other => Err(other),
                    }
                }
            }
        )+

        impl Message for $fault {
            const TYPE: &'static str = stringify!($fault);
            const KIND: MessageKind = MessageKind::Response;
        }

        impl From<$fault> for Response {
            fn from(m: $fault) -> Self {
                Response::$fault(m)
            }
        }

        impl From<$fault> for Payload {
            fn from(m: $fault) -> Self {
                Payload::Response(Response::$fault(m))
            }
        }

        /// Register every tag of the vocabulary.
        pub fn register_vocabulary(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
            $(
                registry.register::<$req>()?;
                registry.register::<$resp>()?;
            )+
            registry.register::<$fault>()?;
            Ok(())
        }

        /// Static request-variant -> handler mapping.
        pub struct HandlerTable<H> {
            handler: H,
        }

        impl<H> HandlerTable<H> {
            pub fn new(handler: H) -> Self {
                Self { handler }
            }

            pub fn inner(&self) -> &H {
                &self.handler
            }
        }

        #[async_trait]
        impl<H> RequestHandler for HandlerTable<H>
        where
            H: Send + Sync $( + Handler<$req> )+,
        {
            async fn handle_request(&self, request: Request) -> Result<Response, HandlerError> {
                match request {
                    $(
                        Request::$req(m) => Handler::<$req>::handle(&self.handler, m)
                            .await
                            .map(Response::$resp),
                    )+
                }
            }
        }
    };
}

vocabulary! {
    CreateCarRequest => CreateCarResponse,
    GetCarRequest => GetCarResponse,
    GetCarsRequest => GetCarsResponse,
    UpdateCarRequest => UpdateCarResponse,
    DeleteCarRequest => DeleteCarResponse,
    CreateCompanyRequest => CreateCompanyResponse,
    GetCompanyRequest => GetCompanyResponse,
    GetCompaniesRequest => GetCompaniesResponse,
    UpdateCompanyRequest => UpdateCompanyResponse,
    DeleteCompanyRequest => DeleteCompanyResponse;
    fault: FaultResponse
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Request(r) => r.type_name(),
            Payload::Response(r) => r.type_name(),
        }
    }

    pub fn to_content(&self) -> serde_json::Result<String> {
        match self {
            Payload::Request(r) => r.to_content(),
            Payload::Response(r) => r.to_content(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Request(_) => MessageKind::Request,
            Payload::Response(_) => MessageKind::Response,
        }
    }
}

impl From<Request> for Payload {
    fn from(r: Request) -> Self {
        Payload::Request(r)
    }
}

impl From<Response> for Payload {
    fn from(r: Response) -> Self {
        Payload::Response(r)
    }
}

// ========================================
// Cars
// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCarRequest {
    pub data_id: Uuid,
    pub car: Car,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCarResponse {
    pub data_id: Uuid,
    pub car: Car,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCarRequest {
    pub data_id: Uuid,
    pub car_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCarResponse {
    pub data_id: Uuid,
    pub car: Option<Car>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCarsRequest {
    pub data_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCarsResponse {
    pub data_id: Uuid,
    pub cars: Vec<Car>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCarRequest {
    pub data_id: Uuid,
    pub car: Car,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCarResponse {
    pub data_id: Uuid,
    pub car: Car,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCarRequest {
    pub data_id: Uuid,
    pub car_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCarResponse {
    pub data_id: Uuid,
    pub car_id: Uuid,
}

// ========================================
// Companies
// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompanyRequest {
    pub data_id: Uuid,
    pub company: Company,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompanyResponse {
    pub data_id: Uuid,
    pub company: Company,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCompanyRequest {
    pub data_id: Uuid,
    pub company_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCompanyResponse {
    pub data_id: Uuid,
    pub company: Option<Company>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCompaniesRequest {
    pub data_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCompaniesResponse {
    pub data_id: Uuid,
    pub companies: Vec<Company>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCompanyRequest {
    pub data_id: Uuid,
    pub company: Company,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCompanyResponse {
    pub data_id: Uuid,
    pub company: Company,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCompanyRequest {
    pub data_id: Uuid,
    pub company_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCompanyResponse {
    pub data_id: Uuid,
    pub company_id: Uuid,
}

/// Sent instead of the regular reply when the handler failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultResponse {
    pub data_id: Uuid,
    /// Tag of the request that failed.
    pub request_type: String,
    pub message: String,
}
