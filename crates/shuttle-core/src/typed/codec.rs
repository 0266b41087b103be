//! PayloadCodec - `Payload` <-> (content, type_name).
//!
//! Encoding is plain serde_json of the inner message; the tag travels next to
//! the content in the envelope, never inside it.

use std::sync::Arc;

use super::registry::TypeRegistry;
use super::vocabulary::Payload;
use crate::domain::{Classify, ErrorKind};

/// Encoded form of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub type_name: String,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("type '{0}' is not part of the registered vocabulary")]
    UnsupportedType(String),

    #[error("unknown type tag '{0}'")]
    UnknownTypeTag(String),

    #[error("content is not a valid {type_name}: {source}")]
    MalformedPayload {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {type_name}: {source}")]
    Serialize {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Classify for CodecError {
    fn kind(&self) -> ErrorKind {
        match self {
            CodecError::UnsupportedType(_) | CodecError::Serialize { .. } => ErrorKind::Misuse,
            CodecError::UnknownTypeTag(_) | CodecError::MalformedPayload { .. } => {
                ErrorKind::Permanent
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayloadCodec {
    registry: Arc<TypeRegistry>,
}

impl PayloadCodec {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn encode(&self, payload: &Payload) -> Result<Encoded, CodecError> {
        let type_name = payload.type_name();
        if !self.registry.contains(type_name) {
            return Err(CodecError::UnsupportedType(type_name.to_string()));
        }
        let content = payload.to_content().map_err(|source| CodecError::Serialize {
            type_name: type_name.to_string(),
            source,
        })?;
        Ok(Encoded {
            type_name: type_name.to_string(),
            content,
        })
    }

    pub fn decode(&self, content: &str, type_name: &str) -> Result<Payload, CodecError> {
        let entry = self
            .registry
            .resolve(type_name)
            .ok_or_else(|| CodecError::UnknownTypeTag(type_name.to_string()))?;
        entry
            .decode(content)
            .map_err(|source| CodecError::MalformedPayload {
                type_name: type_name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Car, Company};
    use crate::typed::registry::TypeRegistry;
    use crate::typed::vocabulary::*;
    use rstest::rstest;
    use uuid::Uuid;

    fn codec() -> PayloadCodec {
        PayloadCodec::new(Arc::new(TypeRegistry::standard().unwrap()))
    }

    /// A filled-in instance of every tag in the vocabulary.
    fn sample(tag: &str) -> Option<Payload> {
        let company = Company::new("Acme Haulage", "Dock 4");
        let car = Car::new(company.id, "YS2R4X20005399401", "ABC123");
        let data_id = Uuid::new_v4();
        let payload: Payload = match tag {
            "CreateCarRequest" => CreateCarRequest { data_id, car }.into(),
            "CreateCarResponse" => CreateCarResponse { data_id, car }.into(),
            "GetCarRequest" => GetCarRequest { data_id, car_id: car.id }.into(),
            "GetCarResponse" => GetCarResponse { data_id, car: Some(car) }.into(),
            "GetCarsRequest" => GetCarsRequest { data_id }.into(),
            "GetCarsResponse" => GetCarsResponse { data_id, cars: vec![car] }.into(),
            "UpdateCarRequest" => UpdateCarRequest { data_id, car }.into(),
            "UpdateCarResponse" => UpdateCarResponse { data_id, car }.into(),
            "DeleteCarRequest" => DeleteCarRequest { data_id, car_id: car.id }.into(),
            "DeleteCarResponse" => DeleteCarResponse { data_id, car_id: car.id }.into(),
            "CreateCompanyRequest" => CreateCompanyRequest { data_id, company }.into(),
            "CreateCompanyResponse" => CreateCompanyResponse { data_id, company }.into(),
            "GetCompanyRequest" => GetCompanyRequest { data_id, company_id: company.id }.into(),
            "GetCompanyResponse" => GetCompanyResponse { data_id, company: Some(company) }.into(),
            "GetCompaniesRequest" => GetCompaniesRequest { data_id }.into(),
            "GetCompaniesResponse" => GetCompaniesResponse { data_id, companies: vec![company] }.into(),
            "UpdateCompanyRequest" => UpdateCompanyRequest { data_id, company }.into(),
            "UpdateCompanyResponse" => UpdateCompanyResponse { data_id, company }.into(),
            "DeleteCompanyRequest" => DeleteCompanyRequest { data_id, company_id: company.id }.into(),
            "DeleteCompanyResponse" => DeleteCompanyResponse { data_id, company_id: company.id }.into(),
            "FaultResponse" => FaultResponse {
                data_id,
                request_type: "GetCarRequest".into(),
                message: "store unavailable".into(),
            }
            .into(),
            _ => return None,
        };
        Some(payload)
    }

    #[rstest]
    #[case::create_car_request("CreateCarRequest")]
    #[case::create_car_response("CreateCarResponse")]
    #[case::get_car_request("GetCarRequest")]
    #[case::get_car_response("GetCarResponse")]
    #[case::get_cars_request("GetCarsRequest")]
    #[case::get_cars_response("GetCarsResponse")]
    #[case::update_car_request("UpdateCarRequest")]
    #[case::update_car_response("UpdateCarResponse")]
    #[case::delete_car_request("DeleteCarRequest")]
    #[case::delete_car_response("DeleteCarResponse")]
    #[case::create_company_request("CreateCompanyRequest")]
    #[case::create_company_response("CreateCompanyResponse")]
    #[case::get_company_request("GetCompanyRequest")]
    #[case::get_company_response("GetCompanyResponse")]
    #[case::get_companies_request("GetCompaniesRequest")]
    #[case::get_companies_response("GetCompaniesResponse")]
    #[case::update_company_request("UpdateCompanyRequest")]
    #[case::update_company_response("UpdateCompanyResponse")]
    #[case::delete_company_request("DeleteCompanyRequest")]
    #[case::delete_company_response("DeleteCompanyResponse")]
    #[case::fault_response("FaultResponse")]
    fn decode_inverts_encode(#[case] tag: &str) {
        let codec = codec();
        let payload = sample(tag).unwrap();
        assert_eq!(payload.type_name(), tag);

        let encoded = codec.encode(&payload).unwrap();
        assert_eq!(encoded.type_name, tag);
        assert_eq!(codec.decode(&encoded.content, &encoded.type_name).unwrap(), payload);
    }

    #[test]
    fn every_registered_tag_has_a_sample() {
        let registry = TypeRegistry::standard().unwrap();
        let missing: Vec<_> = registry
            .registered_types()
            .into_iter()
            .filter(|tag| sample(tag).is_none())
            .collect();
        assert!(missing.is_empty(), "no sample for {missing:?}");
    }

    #[test]
    fn absent_optional_entity_survives_encoding() {
        let codec = codec();
        let payload: Payload = GetCarResponse { data_id: Uuid::nil(), car: None }.into();
        let encoded = codec.encode(&payload).unwrap();
        assert_eq!(codec.decode(&encoded.content, &encoded.type_name).unwrap(), payload);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = codec().decode("{}", "NotARealTag").unwrap_err();
        assert!(matches!(err, CodecError::UnknownTypeTag(tag) if tag == "NotARealTag"));
    }

    #[test]
    fn malformed_content_is_rejected() {
        let err = codec()
            .decode(r#"{"dataId":"nope"}"#, "GetCarsRequest")
            .unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload { .. }));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn encoding_outside_the_registry_is_unsupported() {
        let mut registry = TypeRegistry::new();
        registry.register::<GetCarsRequest>().unwrap();
        let codec = PayloadCodec::new(Arc::new(registry));

        let payload: Payload = GetCarsResponse { data_id: Uuid::nil(), cars: vec![] }.into();
        assert!(matches!(
            codec.encode(&payload),
            Err(CodecError::UnsupportedType(_))
        ));
    }
}
