//! FleetClient - front-end flows over the gateway.
//!
//! Every method is one or more gateway calls; read-modify-write flows fetch
//! the current car first so fields the caller did not touch are preserved.
//!
//! 読んでから書くまでの間に他の更新が入ると後勝ちになる。ロックはしない。

use uuid::Uuid;

use super::gateway::{CallError, Gateway};
use crate::domain::{Car, Company};
use crate::typed::{
    CreateCarRequest, CreateCompanyRequest, DeleteCarRequest, DeleteCompanyRequest,
    GetCarRequest, GetCarsRequest, GetCompaniesRequest, GetCompanyRequest, UpdateCarRequest,
    UpdateCompanyRequest,
};

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
}

/// Result of `FleetClient::set_online`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnlineUpdate {
    Applied(Car),
    /// The car is being edited; the stored car is returned unchanged.
    HeldWhileEditing(Car),
}

#[derive(Clone)]
pub struct FleetClient {
    gateway: Gateway,
}

impl FleetClient {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub async fn cars(&self) -> Result<Vec<Car>, FleetError> {
        let reply = self.gateway.call(GetCarsRequest { data_id: Uuid::new_v4() }).await?;
        Ok(reply.cars)
    }

    pub async fn cars_for_company(&self, company_id: Uuid) -> Result<Vec<Car>, FleetError> {
        let mut cars = self.cars().await?;
        cars.retain(|car| car.company_id == company_id);
        Ok(cars)
    }

    pub async fn car(&self, car_id: Uuid) -> Result<Car, FleetError> {
        let reply = self
            .gateway
            .call(GetCarRequest { data_id: Uuid::new_v4(), car_id })
            .await?;
        reply.car.ok_or(FleetError::NotFound { entity: "car", id: car_id })
    }

    pub async fn create_car(&self, car: Car) -> Result<Car, FleetError> {
        let reply = self
            .gateway
            .call(CreateCarRequest { data_id: Uuid::new_v4(), car })
            .await?;
        Ok(reply.car)
    }

    pub async fn update_car(&self, car: Car) -> Result<Car, FleetError> {
        let reply = self
            .gateway
            .call(UpdateCarRequest { data_id: Uuid::new_v4(), car })
            .await?;
        Ok(reply.car)
    }

    pub async fn delete_car(&self, car_id: Uuid) -> Result<(), FleetError> {
        self.gateway
            .call(DeleteCarRequest { data_id: Uuid::new_v4(), car_id })
            .await?;
        Ok(())
    }

    /// Change only the online flag. Cars locked for editing are left alone.
    pub async fn set_online(&self, car_id: Uuid, online: bool) -> Result<OnlineUpdate, FleetError> {
        let mut car = self.car(car_id).await?;
        if car.disabled {
            return Ok(OnlineUpdate::HeldWhileEditing(car));
        }
        car.online = online;
        Ok(OnlineUpdate::Applied(self.update_car(car).await?))
    }

    /// Lock the car against online/offline updates while it is edited.
    pub async fn begin_edit(&self, car_id: Uuid) -> Result<Car, FleetError> {
        let mut car = self.car(car_id).await?;
        car.disabled = true;
        self.update_car(car).await
    }

    /// Store the edited online flag and release the lock.
    pub async fn finish_edit(&self, car_id: Uuid, online: bool) -> Result<Car, FleetError> {
        let mut car = self.car(car_id).await?;
        car.online = online;
        car.disabled = false;
        self.update_car(car).await
    }

    /// All companies with their cars, releasing any edit lock left behind.
    pub async fn overview(&self) -> Result<Vec<Company>, FleetError> {
        let mut companies = self.companies().await?;
        let mut cars = Vec::new();
        for mut car in self.cars().await? {
            if car.disabled {
                car.disabled = false;
                car = self.update_car(car).await?;
            }
            cars.push(car);
        }
        for company in &mut companies {
            company.cars = cars
                .iter()
                .filter(|car| car.company_id == company.id)
                .cloned()
                .collect();
        }
        Ok(companies)
    }

    pub async fn reg_nr_available(&self, reg_nr: &str) -> Result<bool, FleetError> {
        Ok(self.cars().await?.iter().all(|car| car.reg_nr != reg_nr))
    }

    pub async fn vin_available(&self, vin: &str) -> Result<bool, FleetError> {
        Ok(self.cars().await?.iter().all(|car| car.vin != vin))
    }

    pub async fn companies(&self) -> Result<Vec<Company>, FleetError> {
        let reply = self
            .gateway
            .call(GetCompaniesRequest { data_id: Uuid::new_v4() })
            .await?;
        Ok(reply.companies)
    }

    pub async fn company(&self, company_id: Uuid) -> Result<Company, FleetError> {
        let reply = self
            .gateway
            .call(GetCompanyRequest { data_id: Uuid::new_v4(), company_id })
            .await?;
        reply
            .company
            .ok_or(FleetError::NotFound { entity: "company", id: company_id })
    }

    pub async fn create_company(&self, company: Company) -> Result<Company, FleetError> {
        let reply = self
            .gateway
            .call(CreateCompanyRequest { data_id: Uuid::new_v4(), company })
            .await?;
        Ok(reply.company)
    }

    pub async fn update_company(&self, company: Company) -> Result<Company, FleetError> {
        let reply = self
            .gateway
            .call(UpdateCompanyRequest { data_id: Uuid::new_v4(), company })
            .await?;
        Ok(reply.company)
    }

    pub async fn delete_company(&self, company_id: Uuid) -> Result<(), FleetError> {
        self.gateway
            .call(DeleteCompanyRequest { data_id: Uuid::new_v4(), company_id })
            .await?;
        Ok(())
    }
}
