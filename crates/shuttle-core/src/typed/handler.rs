//! Handler traits - what runs a request.
//!
//! - **Handler<T>**: generic, one impl per request type
//! - **RequestHandler**: object safe, takes any `Request`
//!
//! `HandlerTable<H>` (generated with the vocabulary) bridges the two: it is a
//! `RequestHandler` for every `H` that handles each request type.

use async_trait::async_trait;

use super::message::Rpc;
use super::vocabulary::{Request, Response};
use crate::ports::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("handler failed: {0}")]
    Internal(String),
}

/// Handles one request type and produces its paired reply.
///
/// ```ignore
/// #[async_trait]
/// impl Handler<GetCarRequest> for MyHandlers {
///     async fn handle(&self, request: GetCarRequest) -> Result<GetCarResponse, HandlerError> {
///         let car = self.cars.get_car(request.car_id).await?;
///         Ok(GetCarResponse { data_id: request.data_id, car })
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Rpc>: Send + Sync {
    async fn handle(&self, request: T) -> Result<T::Reply, HandlerError>;
}

/// Object-safe view used by the dispatch loop.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, request: Request) -> Result<Response, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::vocabulary::*;
    use uuid::Uuid;

    /// Answers every request with an empty result.
    struct Empty;

    #[async_trait]
    impl Handler<GetCarsRequest> for Empty {
        async fn handle(&self, r: GetCarsRequest) -> Result<GetCarsResponse, HandlerError> {
            Ok(GetCarsResponse { data_id: r.data_id, cars: vec![] })
        }
    }

    #[async_trait]
    impl Handler<GetCarRequest> for Empty {
        async fn handle(&self, r: GetCarRequest) -> Result<GetCarResponse, HandlerError> {
            Ok(GetCarResponse { data_id: r.data_id, car: None })
        }
    }

    #[async_trait]
    impl Handler<CreateCarRequest> for Empty {
        async fn handle(&self, r: CreateCarRequest) -> Result<CreateCarResponse, HandlerError> {
            Ok(CreateCarResponse { data_id: r.data_id, car: r.car })
        }
    }

    #[async_trait]
    impl Handler<UpdateCarRequest> for Empty {
        async fn handle(&self, r: UpdateCarRequest) -> Result<UpdateCarResponse, HandlerError> {
            Ok(UpdateCarResponse { data_id: r.data_id, car: r.car })
        }
    }

    #[async_trait]
    impl Handler<DeleteCarRequest> for Empty {
        async fn handle(&self, r: DeleteCarRequest) -> Result<DeleteCarResponse, HandlerError> {
            Err(HandlerError::Rejected(format!("car {} is locked", r.car_id)))
        }
    }

    #[async_trait]
    impl Handler<CreateCompanyRequest> for Empty {
        async fn handle(&self, r: CreateCompanyRequest) -> Result<CreateCompanyResponse, HandlerError> {
            Ok(CreateCompanyResponse { data_id: r.data_id, company: r.company })
        }
    }

    #[async_trait]
    impl Handler<GetCompanyRequest> for Empty {
        async fn handle(&self, r: GetCompanyRequest) -> Result<GetCompanyResponse, HandlerError> {
            Ok(GetCompanyResponse { data_id: r.data_id, company: None })
        }
    }

    #[async_trait]
    impl Handler<GetCompaniesRequest> for Empty {
        async fn handle(&self, r: GetCompaniesRequest) -> Result<GetCompaniesResponse, HandlerError> {
            Ok(GetCompaniesResponse { data_id: r.data_id, companies: vec![] })
        }
    }

    #[async_trait]
    impl Handler<UpdateCompanyRequest> for Empty {
        async fn handle(&self, r: UpdateCompanyRequest) -> Result<UpdateCompanyResponse, HandlerError> {
            Ok(UpdateCompanyResponse { data_id: r.data_id, company: r.company })
        }
    }

    #[async_trait]
    impl Handler<DeleteCompanyRequest> for Empty {
        async fn handle(&self, r: DeleteCompanyRequest) -> Result<DeleteCompanyResponse, HandlerError> {
            Ok(DeleteCompanyResponse { data_id: r.data_id, company_id: r.company_id })
        }
    }

    #[tokio::test]
    async fn table_routes_each_variant_to_its_handler() {
        let table = HandlerTable::new(Empty);
        let data_id = Uuid::new_v4();

        let response = table
            .handle_request(GetCarsRequest { data_id }.into())
            .await
            .unwrap();
        assert_eq!(
            response,
            Response::GetCarsResponse(GetCarsResponse { data_id, cars: vec![] })
        );

        let response = table
            .handle_request(GetCarRequest { data_id, car_id: Uuid::nil() }.into())
            .await
            .unwrap();
        assert_eq!(response.type_name(), "GetCarResponse");
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let table: Box<dyn RequestHandler> = Box::new(HandlerTable::new(Empty));

        let err = table
            .handle_request(DeleteCarRequest { data_id: Uuid::nil(), car_id: Uuid::nil() }.into())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(_)));
    }
}
