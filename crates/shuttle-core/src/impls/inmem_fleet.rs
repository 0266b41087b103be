//! InMemoryFleetStore - cars and companies kept in process memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{Car, Company};
use crate::ports::{CarStore, CompanyStore, StoreError};

#[derive(Debug, Default)]
struct Fleet {
    cars: BTreeMap<Uuid, Car>,
    companies: BTreeMap<Uuid, Company>,
}

/// Implements both stores over one shared map. Cloning shares the data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFleetStore {
    inner: Arc<RwLock<Fleet>>,
}

impl InMemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Three companies with a handful of cars each, all offline.
    pub fn seeded() -> Self {
        let store = Self::new();
        let data = [
            (
                "Kalles Grustransporter AB",
                "Cementvägen 8, 111 11 Södertälje",
                &[("YS2R4X20005399401", "ABC123"), ("VLUR4X20009093588", "DEF456"), ("VLUR4X20009048066", "GHI789")][..],
            ),
            (
                "Johans Bulk AB",
                "Balkvägen 12, 222 22 Stockholm",
                &[("YS2R4X20005388011", "JKL012"), ("YS2R4X20005387949", "MNO345")][..],
            ),
            (
                "Haralds Värdetransporter AB",
                "Budgetvägen 1, 333 33 Uppsala",
                &[("YS2R4X20005387765", "PQR678"), ("YS2R4X20005387055", "STU901")][..],
            ),
        ];

        {
            let mut fleet = store.inner.write();
            for (name, address, cars) in data {
                let company = Company::new(name, address);
                for (vin, reg_nr) in cars {
                    let car = Car::new(company.id, *vin, *reg_nr);
                    fleet.cars.insert(car.id, car);
                }
                fleet.companies.insert(company.id, company);
            }
        }
        store
    }
}

#[async_trait]
impl CarStore for InMemoryFleetStore {
    async fn create_car(&self, car: Car) -> Result<Car, StoreError> {
        let mut fleet = self.inner.write();
        if fleet.cars.contains_key(&car.id) {
            return Err(StoreError::AlreadyExists { entity: "car", id: car.id });
        }
        fleet.cars.insert(car.id, car.clone());
        Ok(car)
    }

    async fn get_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        Ok(self.inner.read().cars.get(&id).cloned())
    }

    async fn get_cars(&self) -> Result<Vec<Car>, StoreError> {
        Ok(self.inner.read().cars.values().cloned().collect())
    }

    async fn update_car(&self, car: Car) -> Result<Car, StoreError> {
        let mut fleet = self.inner.write();
        match fleet.cars.get_mut(&car.id) {
            Some(slot) => {
                *slot = car.clone();
                Ok(car)
            }
            None => Err(StoreError::NotFound { entity: "car", id: car.id }),
        }
    }

    async fn delete_car(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner
            .write()
            .cars
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "car", id })
    }
}

#[async_trait]
impl CompanyStore for InMemoryFleetStore {
    async fn create_company(&self, company: Company) -> Result<Company, StoreError> {
        let mut fleet = self.inner.write();
        if fleet.companies.contains_key(&company.id) {
            return Err(StoreError::AlreadyExists { entity: "company", id: company.id });
        }
        // cars live in their own table
        let stored = Company { cars: Vec::new(), ..company };
        fleet.companies.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_company(&self, id: Uuid) -> Result<Option<Company>, StoreError> {
        let fleet = self.inner.read();
        Ok(fleet.companies.get(&id).map(|company| {
            let mut company = company.clone();
            company.cars = fleet
                .cars
                .values()
                .filter(|car| car.company_id == id)
                .cloned()
                .collect();
            company
        }))
    }

    async fn get_companies(&self) -> Result<Vec<Company>, StoreError> {
        Ok(self.inner.read().companies.values().cloned().collect())
    }

    async fn update_company(&self, company: Company) -> Result<Company, StoreError> {
        let mut fleet = self.inner.write();
        match fleet.companies.get_mut(&company.id) {
            Some(slot) => {
                slot.name = company.name.clone();
                slot.address = company.address.clone();
                Ok(slot.clone())
            }
            None => Err(StoreError::NotFound { entity: "company", id: company.id }),
        }
    }

    async fn delete_company(&self, id: Uuid) -> Result<(), StoreError> {
        let mut fleet = self.inner.write();
        fleet
            .companies
            .remove(&id)
            .ok_or(StoreError::NotFound { entity: "company", id })?;
        fleet.cars.retain(|_, car| car.company_id != id);
        Ok(())
    }
}
