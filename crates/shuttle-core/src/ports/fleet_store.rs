//! CarStore / CompanyStore ports - persistence of fleet entities.
//!
//! The handlers await these; how entities are stored is not the queue's
//! concern.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Car, Company};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CarStore: Send + Sync {
    async fn create_car(&self, car: Car) -> Result<Car, StoreError>;
    async fn get_car(&self, id: Uuid) -> Result<Option<Car>, StoreError>;
    async fn get_cars(&self) -> Result<Vec<Car>, StoreError>;
    async fn update_car(&self, car: Car) -> Result<Car, StoreError>;
    async fn delete_car(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn create_company(&self, company: Company) -> Result<Company, StoreError>;
    /// The company with its current cars attached.
    async fn get_company(&self, id: Uuid) -> Result<Option<Company>, StoreError>;
    async fn get_companies(&self) -> Result<Vec<Company>, StoreError>;
    async fn update_company(&self, company: Company) -> Result<Company, StoreError>;
    async fn delete_company(&self, id: Uuid) -> Result<(), StoreError>;
}
