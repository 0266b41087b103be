//! Fleet entities carried inside request/response payloads.
//!
//! The dispatch core never looks inside these; they only need to round-trip
//! through the codec unchanged.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A vehicle owned by a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: Uuid,
    pub company_id: Uuid,
    pub vin: String,
    pub reg_nr: String,
    pub online: bool,
    /// Set while a user is editing the car; online/offline updates are held back.
    #[serde(default)]
    pub disabled: bool,
}

impl Car {
    pub fn new(company_id: Uuid, vin: impl Into<String>, reg_nr: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            vin: vin.into(),
            reg_nr: reg_nr.into(),
            online: false,
            disabled: false,
        }
    }
}

/// The organization owning a set of cars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub cars: Vec<Car>,
}

impl Company {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            address: address.into(),
            cars: Vec::new(),
        }
    }
}
