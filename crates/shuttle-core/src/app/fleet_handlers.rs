//! FleetHandlers - server-side handlers for the fleet vocabulary.
//!
//! Each handler is a thin translation onto `CarStore` / `CompanyStore`; the
//! reply echoes the request's `data_id`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::impls::InMemoryFleetStore;
use crate::ports::{CarStore, CompanyStore};
use crate::typed::{
    CreateCarRequest, CreateCarResponse, CreateCompanyRequest, CreateCompanyResponse,
    DeleteCarRequest, DeleteCarResponse, DeleteCompanyRequest, DeleteCompanyResponse,
    GetCarRequest, GetCarResponse, GetCarsRequest, GetCarsResponse, GetCompaniesRequest,
    GetCompaniesResponse, GetCompanyRequest, GetCompanyResponse, Handler, HandlerError,
    HandlerTable, UpdateCarRequest, UpdateCarResponse, UpdateCompanyRequest,
    UpdateCompanyResponse,
};

#[derive(Clone)]
pub struct FleetHandlers {
    cars: Arc<dyn CarStore>,
    companies: Arc<dyn CompanyStore>,
}

impl FleetHandlers {
    pub fn new(cars: Arc<dyn CarStore>, companies: Arc<dyn CompanyStore>) -> Self {
        Self { cars, companies }
    }

    /// Both stores backed by the same in-memory fleet.
    pub fn in_memory(store: InMemoryFleetStore) -> Self {
        Self::new(Arc::new(store.clone()), Arc::new(store))
    }

    /// Wrap in the table the dispatch loop routes through.
    pub fn into_table(self) -> HandlerTable<Self> {
        HandlerTable::new(self)
    }
}

#[async_trait]
impl Handler<CreateCarRequest> for FleetHandlers {
    async fn handle(&self, request: CreateCarRequest) -> Result<CreateCarResponse, HandlerError> {
        let car = self.cars.create_car(request.car).await?;
        Ok(CreateCarResponse {
            data_id: request.data_id,
            car,
        })
    }
}

#[async_trait]
impl Handler<GetCarRequest> for FleetHandlers {
    async fn handle(&self, request: GetCarRequest) -> Result<GetCarResponse, HandlerError> {
        let car = self.cars.get_car(request.car_id).await?;
        Ok(GetCarResponse {
            data_id: request.data_id,
            car,
        })
    }
}

#[async_trait]
impl Handler<GetCarsRequest> for FleetHandlers {
    async fn handle(&self, request: GetCarsRequest) -> Result<GetCarsResponse, HandlerError> {
        Ok(GetCarsResponse {
            data_id: request.data_id,
            cars: self.cars.get_cars().await?,
        })
    }
}

#[async_trait]
impl Handler<UpdateCarRequest> for FleetHandlers {
    async fn handle(&self, request: UpdateCarRequest) -> Result<UpdateCarResponse, HandlerError> {
        let car = self.cars.update_car(request.car).await?;
        Ok(UpdateCarResponse {
            data_id: request.data_id,
            car,
        })
    }
}

#[async_trait]
impl Handler<DeleteCarRequest> for FleetHandlers {
    async fn handle(&self, request: DeleteCarRequest) -> Result<DeleteCarResponse, HandlerError> {
        self.cars.delete_car(request.car_id).await?;
        Ok(DeleteCarResponse {
            data_id: request.data_id,
            car_id: request.car_id,
        })
    }
}

#[async_trait]
impl Handler<CreateCompanyRequest> for FleetHandlers {
    async fn handle(
        &self,
        request: CreateCompanyRequest,
    ) -> Result<CreateCompanyResponse, HandlerError> {
        if request.company.name.trim().is_empty() {
            return Err(HandlerError::Rejected("company name is empty".into()));
        }
        let company = self.companies.create_company(request.company).await?;
        Ok(CreateCompanyResponse {
            data_id: request.data_id,
            company,
        })
    }
}

#[async_trait]
impl Handler<GetCompanyRequest> for FleetHandlers {
    async fn handle(&self, request: GetCompanyRequest) -> Result<GetCompanyResponse, HandlerError> {
        let company = self.companies.get_company(request.company_id).await?;
        Ok(GetCompanyResponse {
            data_id: request.data_id,
            company,
        })
    }
}

#[async_trait]
impl Handler<GetCompaniesRequest> for FleetHandlers {
    async fn handle(
        &self,
        request: GetCompaniesRequest,
    ) -> Result<GetCompaniesResponse, HandlerError> {
        Ok(GetCompaniesResponse {
            data_id: request.data_id,
            companies: self.companies.get_companies().await?,
        })
    }
}

#[async_trait]
impl Handler<UpdateCompanyRequest> for FleetHandlers {
    async fn handle(
        &self,
        request: UpdateCompanyRequest,
    ) -> Result<UpdateCompanyResponse, HandlerError> {
        let company = self.companies.update_company(request.company).await?;
        Ok(UpdateCompanyResponse {
            data_id: request.data_id,
            company,
        })
    }
}

#[async_trait]
impl Handler<DeleteCompanyRequest> for FleetHandlers {
    async fn handle(
        &self,
        request: DeleteCompanyRequest,
    ) -> Result<DeleteCompanyResponse, HandlerError> {
        self.companies.delete_company(request.company_id).await?;
        Ok(DeleteCompanyResponse {
            data_id: request.data_id,
            company_id: request.company_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Car, Company};
    use crate::ports::StoreError;
    use crate::typed::{RequestHandler, Response};
    use uuid::Uuid;

    #[tokio::test]
    async fn created_car_is_visible_through_get() {
        let handlers = FleetHandlers::in_memory(InMemoryFleetStore::new());
        let company = Company::new("Acme Haulage", "Dock 4");
        let car = Car::new(company.id, "YS2R4X20005399401", "ABC123");

        let created = handlers
            .handle(CreateCarRequest { data_id: Uuid::new_v4(), car: car.clone() })
            .await
            .unwrap();
        assert_eq!(created.car, car);

        let data_id = Uuid::new_v4();
        let fetched = handlers
            .handle(GetCarRequest { data_id, car_id: car.id })
            .await
            .unwrap();
        assert_eq!(fetched.data_id, data_id);
        assert_eq!(fetched.car, Some(car));
    }

    #[tokio::test]
    async fn missing_car_on_delete_is_a_store_error() {
        let handlers = FleetHandlers::in_memory(InMemoryFleetStore::new());
        let car_id = Uuid::new_v4();

        let err = handlers
            .handle(DeleteCarRequest { data_id: Uuid::nil(), car_id })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Store(StoreError::NotFound { entity: "car", id }) if id == car_id
        ));
    }

    #[tokio::test]
    async fn nameless_company_is_rejected() {
        let handlers = FleetHandlers::in_memory(InMemoryFleetStore::new());
        let err = handlers
            .handle(CreateCompanyRequest {
                data_id: Uuid::nil(),
                company: Company::new("  ", "nowhere"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(_)));
    }

    #[tokio::test]
    async fn table_serves_the_seeded_fleet() {
        let table = FleetHandlers::in_memory(InMemoryFleetStore::seeded()).into_table();
        let response = table
            .handle_request(GetCompaniesRequest { data_id: Uuid::nil() }.into())
            .await
            .unwrap();
        let Response::GetCompaniesResponse(reply) = response else {
            panic!("unexpected response {response:?}");
        };
        assert_eq!(reply.companies.len(), 3);
    }
}
