//! Partner request construction.
//!
//! Reshapes raw patient/order data into the partner's strict field
//! constraints. Optional demographic fields fall back to safe defaults and
//! log; the hard constraints (state, ZIP, quantity, days' supply) fail with
//! a [`ConstructionError`] that is never retried.

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::coverage::CoverageMapping;
use crate::model::{Address, OrderItem, OrderRecord, PatientRecord};

/// Substituted when a phone number cannot be reduced to 10 digits.
pub const PHONE_PLACEHOLDER: &str = "0000000000";

/// Substituted age when the date of birth is missing or malformed.
pub const DEFAULT_PATIENT_AGE_YEARS: u32 = 18;

const MAX_NAME_LEN: usize = 35;
const MAX_STREET_LEN: usize = 255;
const MAX_CITY_LEN: usize = 100;
const MAX_ORDER_ID_LEN: usize = 100;
const MAX_CUSTOMER_ID_LEN: usize = 100;
const MAX_MEMO_LEN: usize = 1024;
const MAX_CLINICAL_NOTES_LEN: usize = 2048;

/// Hard-constraint violation while building a partner request.
///
/// These are terminal: retrying cannot fix bad source data, so the
/// submission gateway records them as `failed` without entering backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("invalid state {0:?}: expected a 2-letter code")]
    InvalidState(String),

    #[error("invalid ZIP code {0:?}: expected 5-9 digits")]
    InvalidZip(String),

    #[error("dispense quantity {0} outside 1..=1000")]
    InvalidQuantity(i64),

    #[error("days supply {0} outside 1..=365")]
    InvalidDaysSupply(i64),

    #[error("patient has no mailing address")]
    MissingAddress,
}

/// Partner gender enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Unspecified,
}

impl Gender {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("m") | Some("male") => Gender::Male,
            Some("f") | Some("female") => Gender::Female,
            _ => Gender::Unspecified,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Unspecified => "U",
        }
    }
}

/// `POST /patients` address body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPayload {
    pub street: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

/// `POST /patients` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    /// `YYYY-MM-DD`.
    pub date_of_birth: String,
    /// `M`, `F` or `U`.
    pub gender: String,
    pub address: AddressPayload,
}

/// `POST /orders` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub patient_id: String,
    pub pharmacy_id: String,
    pub medication_id: String,
    pub dispense_quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_supply: Option<u32>,
    /// Idempotency token; re-submissions for the same order repeat it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_notes: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub webhook_urls: Vec<String>,
}

/// Build the partner patient body from a profile, borrowing the order's
/// shipping address when the profile has none.
pub fn build_patient_payload(
    patient: &PatientRecord,
    fallback_address: Option<&Address>,
) -> Result<PatientPayload, ConstructionError> {
    let address = patient
        .address
        .as_ref()
        .or(fallback_address)
        .ok_or(ConstructionError::MissingAddress)?;

    Ok(PatientPayload {
        first_name: clamp(&patient.first_name, MAX_NAME_LEN),
        last_name: clamp(&patient.last_name, MAX_NAME_LEN),
        email: patient.email.clone(),
        phone_number: normalize_phone(patient.phone.as_deref()),
        date_of_birth: normalize_date_of_birth(patient.date_of_birth.as_deref(), Utc::now()),
        gender: Gender::parse(patient.gender.as_deref()).code().to_string(),
        address: build_address_payload(address)?,
    })
}

/// Build the partner order body for one prescription line.
pub fn build_order_payload(
    order: &OrderRecord,
    item: &OrderItem,
    mapping: &CoverageMapping,
    partner_patient_id: &str,
    idempotency_key: &str,
) -> Result<OrderPayload, ConstructionError> {
    let dispense_quantity = validate_quantity(item.quantity)?;
    let days_supply = item.days_supply.map(validate_days_supply).transpose()?;

    let memo = item
        .directions
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| clamp(d, MAX_MEMO_LEN));
    let clinical_notes = (item.refills > 0)
        .then(|| clamp(&format!("{} refill(s) authorized", item.refills), MAX_CLINICAL_NOTES_LEN));

    Ok(OrderPayload {
        patient_id: partner_patient_id.to_string(),
        pharmacy_id: mapping.pharmacy_id.clone(),
        medication_id: mapping.medication_id.clone(),
        dispense_quantity,
        days_supply,
        order_id: Some(clamp(idempotency_key, MAX_ORDER_ID_LEN)),
        customer_id: Some(clamp(&order.patient_id.to_string(), MAX_CUSTOMER_ID_LEN)),
        memo,
        clinical_notes,
        webhook_urls: Vec::new(),
    })
}

/// Idempotency token for a submission attempt.
///
/// Embeds the order number; when several coverages were eligible, a
/// coverage-derived suffix keeps per-coverage submissions distinguishable
/// on the partner side.
pub fn idempotency_key(
    order_number: &str,
    mapping: &CoverageMapping,
    multiple_coverages: bool,
) -> String {
    if !multiple_coverages {
        return clamp(order_number, MAX_ORDER_ID_LEN);
    }

    let suffix: String = mapping
        .medication_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    clamp(&format!("{order_number}-{suffix}"), MAX_ORDER_ID_LEN)
}

fn build_address_payload(address: &Address) -> Result<AddressPayload, ConstructionError> {
    Ok(AddressPayload {
        street: clamp(&address.street, MAX_STREET_LEN),
        street_2: address
            .street_2
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| clamp(s, MAX_STREET_LEN)),
        city: clamp(&address.city, MAX_CITY_LEN),
        state: normalize_state(&address.state)?,
        zip: normalize_zip(&address.zip)?,
        country: if address.country.trim().is_empty() {
            "US".to_string()
        } else {
            address.country.trim().to_string()
        },
    })
}

/// Reduce a phone number to exactly 10 digits, or substitute the placeholder.
pub fn normalize_phone(raw: Option<&str>) -> String {
    let digits: String = raw
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    if digits.len() == 10 {
        digits
    } else {
        warn!(digits = digits.len(), "phone did not reduce to 10 digits, substituting placeholder");
        PHONE_PLACEHOLDER.to_string()
    }
}

/// Parse a date of birth to a past `YYYY-MM-DD`, or substitute a default of
/// [`DEFAULT_PATIENT_AGE_YEARS`] before `now`.
pub fn normalize_date_of_birth(raw: Option<&str>, now: DateTime<Utc>) -> String {
    let today = now.date_naive();
    let parsed = raw.map(str::trim).filter(|s| !s.is_empty()).and_then(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
    });

    match parsed {
        Some(date) if date < today => date.format("%Y-%m-%d").to_string(),
        other => {
            warn!(parsed = other.is_some(), "date of birth missing or not in the past, substituting default");
            today
                .checked_sub_months(Months::new(DEFAULT_PATIENT_AGE_YEARS * 12))
                .unwrap_or(today)
                .format("%Y-%m-%d")
                .to_string()
        }
    }
}

/// States must be exactly 2 letters; this is a hard requirement.
pub fn normalize_state(raw: &str) -> Result<String, ConstructionError> {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(ConstructionError::InvalidState(raw.to_string()))
    }
}

/// ZIPs must reduce to 5-9 digits; this is a hard requirement.
pub fn normalize_zip(raw: &str) -> Result<String, ConstructionError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if (5..=9).contains(&digits.len()) {
        Ok(digits)
    } else {
        Err(ConstructionError::InvalidZip(raw.to_string()))
    }
}

fn validate_quantity(quantity: i64) -> Result<u32, ConstructionError> {
    if (1..=1000).contains(&quantity) {
        Ok(quantity as u32)
    } else {
        Err(ConstructionError::InvalidQuantity(quantity))
    }
}

fn validate_days_supply(days: i64) -> Result<u32, ConstructionError> {
    if (1..=365).contains(&days) {
        Ok(days as u32)
    } else {
        Err(ConstructionError::InvalidDaysSupply(days))
    }
}

fn clamp(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use telarx_core::{CoverageId, OrderId, PatientId, ProductId, TenantId};

    fn test_address() -> Address {
        Address {
            street: "500 W 2nd St".to_string(),
            street_2: Some("Suite 1900".to_string()),
            city: "Austin".to_string(),
            state: "tx".to_string(),
            zip: "78701-4286".to_string(),
            country: "US".to_string(),
        }
    }

    fn test_patient() -> PatientRecord {
        PatientRecord {
            id: PatientId::new(),
            tenant_id: TenantId::new(),
            email: "pat@example.com".to_string(),
            first_name: "Pat".to_string(),
            last_name: "Doe".to_string(),
            phone: Some("(512) 555-0142".to_string()),
            date_of_birth: Some("1990-04-02".to_string()),
            gender: Some("female".to_string()),
            state: Some("TX".to_string()),
            address: Some(test_address()),
        }
    }

    fn test_mapping() -> CoverageMapping {
        CoverageMapping {
            id: CoverageId::new(),
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            medication_id: "med-semaglutide-1mg".to_string(),
            pharmacy_id: "ph-07".to_string(),
            state: "TX".to_string(),
            active: true,
        }
    }

    fn test_item(quantity: i64, days_supply: Option<i64>) -> OrderItem {
        OrderItem {
            product_id: ProductId::new(),
            quantity,
            days_supply,
            refills: 2,
            directions: Some("Inject 0.25mg weekly".to_string()),
        }
    }

    fn test_order() -> OrderRecord {
        OrderRecord {
            id: OrderId::new(),
            tenant_id: TenantId::new(),
            number: "RX-10293".to_string(),
            patient_id: PatientId::new(),
            items: vec![test_item(4, Some(28))],
            shipping_address: Some(test_address()),
        }
    }

    #[test]
    fn well_formed_patient_builds_cleanly() {
        let payload = build_patient_payload(&test_patient(), None).unwrap();
        assert_eq!(payload.phone_number, "5125550142");
        assert_eq!(payload.date_of_birth, "1990-04-02");
        assert_eq!(payload.gender, "F");
        assert_eq!(payload.address.state, "TX");
        assert_eq!(payload.address.zip, "787014286");
    }

    #[test]
    fn bad_phone_falls_back_to_placeholder() {
        assert_eq!(normalize_phone(Some("555-0142")), PHONE_PLACEHOLDER);
        assert_eq!(normalize_phone(Some("+1 512 555 0142")), PHONE_PLACEHOLDER);
        assert_eq!(normalize_phone(None), PHONE_PLACEHOLDER);
    }

    #[test]
    fn future_or_malformed_dob_falls_back_to_default_age() {
        let now = DateTime::parse_from_rfc3339("2026-08-07T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(normalize_date_of_birth(Some("2999-01-01"), now), "2008-08-07");
        assert_eq!(normalize_date_of_birth(Some("last tuesday"), now), "2008-08-07");
        assert_eq!(normalize_date_of_birth(None, now), "2008-08-07");
        assert_eq!(normalize_date_of_birth(Some("1990-04-02"), now), "1990-04-02");
    }

    #[test]
    fn unrecognized_gender_maps_to_unspecified() {
        assert_eq!(Gender::parse(Some("M")).code(), "M");
        assert_eq!(Gender::parse(Some("female")).code(), "F");
        assert_eq!(Gender::parse(Some("nonbinary")).code(), "U");
        assert_eq!(Gender::parse(None).code(), "U");
    }

    #[test]
    fn state_and_zip_are_hard_requirements() {
        assert!(matches!(
            normalize_state("Texas"),
            Err(ConstructionError::InvalidState(_))
        ));
        assert!(matches!(
            normalize_zip("787"),
            Err(ConstructionError::InvalidZip(_))
        ));

        let mut patient = test_patient();
        patient.address.as_mut().unwrap().zip = "n/a".to_string();
        assert!(build_patient_payload(&patient, None).is_err());
    }

    #[test]
    fn missing_address_uses_order_fallback() {
        let mut patient = test_patient();
        patient.address = None;

        assert!(matches!(
            build_patient_payload(&patient, None),
            Err(ConstructionError::MissingAddress)
        ));

        let fallback = test_address();
        let payload = build_patient_payload(&patient, Some(&fallback)).unwrap();
        assert_eq!(payload.address.city, "Austin");
    }

    #[test]
    fn quantity_and_days_supply_bounds_are_enforced() {
        let order = test_order();
        let mapping = test_mapping();

        let err = build_order_payload(&order, &test_item(0, None), &mapping, "pp-1", "RX-1")
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidQuantity(0)));

        let err = build_order_payload(&order, &test_item(1001, None), &mapping, "pp-1", "RX-1")
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidQuantity(1001)));

        let err = build_order_payload(&order, &test_item(30, Some(400)), &mapping, "pp-1", "RX-1")
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidDaysSupply(400)));
    }

    #[test]
    fn order_payload_carries_routing_and_idempotency() {
        let order = test_order();
        let mapping = test_mapping();
        let payload =
            build_order_payload(&order, &order.items[0], &mapping, "pp-1", "RX-10293").unwrap();

        assert_eq!(payload.pharmacy_id, "ph-07");
        assert_eq!(payload.medication_id, "med-semaglutide-1mg");
        assert_eq!(payload.dispense_quantity, 4);
        assert_eq!(payload.days_supply, Some(28));
        assert_eq!(payload.order_id.as_deref(), Some("RX-10293"));
        assert_eq!(payload.memo.as_deref(), Some("Inject 0.25mg weekly"));
        assert_eq!(payload.clinical_notes.as_deref(), Some("2 refill(s) authorized"));
    }

    #[test]
    fn idempotency_key_gets_a_suffix_only_with_multiple_coverages() {
        let mapping = test_mapping();
        assert_eq!(idempotency_key("RX-10293", &mapping, false), "RX-10293");
        assert_eq!(
            idempotency_key("RX-10293", &mapping, true),
            "RX-10293-medsemag"
        );
    }

    #[test]
    fn long_names_are_truncated_to_partner_limits() {
        let mut patient = test_patient();
        patient.first_name = "A".repeat(80);
        let payload = build_patient_payload(&patient, None).unwrap();
        assert_eq!(payload.first_name.len(), 35);
    }

    #[test]
    fn optional_payload_fields_are_omitted_when_empty() {
        let order = test_order();
        let mapping = test_mapping();
        let mut item = test_item(4, None);
        item.directions = None;
        item.refills = 0;

        let payload = build_order_payload(&order, &item, &mapping, "pp-1", "RX-1").unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert!(json.get("days_supply").is_none());
        assert!(json.get("memo").is_none());
        assert!(json.get("clinical_notes").is_none());
        assert!(json.get("webhook_urls").is_none());
    }
}
