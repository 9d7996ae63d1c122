//! Lot rules: field validation, ownership transfer and the change history
//! kept for monitored fields.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use super::sales::LoteStatus;
use crate::error::{AppError, AppResult};

/// Fields whose every change is written to `lote_history`.
const MONITORED_FIELDS: [(&str, &str); 3] = [
    ("owner_id", "owner_change"),
    ("status", "status_change"),
    ("price", "price_change"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoteChange {
    pub field_name: &'static str,
    pub action: &'static str,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl LoteChange {
    pub fn details(&self) -> String {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "none".to_string());
        format!(
            "{} changed from {} to {}",
            self.field_name,
            show(&self.old_value),
            show(&self.new_value)
        )
    }
}

fn field_text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn same_value(field: &str, old: &Option<String>, new: &Option<String>) -> bool {
    if field == "price" {
        let parse = |value: &Option<String>| value.as_deref().and_then(|v| Decimal::from_str(v).ok());
        return parse(old) == parse(new);
    }
    old == new
}

/// Monitored fields that differ between two versions of a lot row.
pub fn monitored_changes(before: &Value, after: &Value) -> Vec<LoteChange> {
    MONITORED_FIELDS
        .iter()
        .filter_map(|(field, action)| {
            let old_value = field_text(before, field);
            let new_value = field_text(after, field);
            if same_value(field, &old_value, &new_value) {
                return None;
            }
            Some(LoteChange {
                field_name: field,
                action,
                old_value,
                new_value,
            })
        })
        .collect()
}

pub fn parse_lote_status(raw: &str) -> AppResult<LoteStatus> {
    LoteStatus::parse(raw).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unknown lot status '{raw}'. Use disponible, vendido, reservado or desarrollo."
        ))
    })
}

pub fn validate_dimensions(area: Option<Decimal>, price: Option<Decimal>) -> AppResult<()> {
    if area.is_some_and(|area| area <= Decimal::ZERO) {
        return Err(AppError::BadRequest("Area must be greater than zero.".to_string()));
    }
    if price.is_some_and(|price| price <= Decimal::ZERO) {
        return Err(AppError::BadRequest("Price must be greater than zero.".to_string()));
    }
    Ok(())
}

/// An available lot has no owner; a sold one has one.
pub fn validate_ownership(status: LoteStatus, owner_id: Option<i64>) -> AppResult<()> {
    match (status, owner_id) {
        (LoteStatus::Disponible, Some(_)) => Err(AppError::BadRequest(
            "An available lot cannot have an owner.".to_string(),
        )),
        (LoteStatus::Vendido, None) => Err(AppError::BadRequest(
            "A sold lot needs an owner.".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Moving an owner needs an owned source lot and a free target lot.
pub fn ensure_transferable(
    source_id: i64,
    source_owner: Option<i64>,
    target_id: i64,
    target_owner: Option<i64>,
    target_status: Option<LoteStatus>,
) -> AppResult<i64> {
    if source_id == target_id {
        return Err(AppError::BadRequest(
            "Source and target lot must differ.".to_string(),
        ));
    }
    let owner = source_owner.ok_or_else(|| {
        AppError::BadRequest("The source lot has no owner to transfer.".to_string())
    })?;
    if target_owner.is_some() {
        return Err(AppError::BadRequest(
            "The target lot already has an owner.".to_string(),
        ));
    }
    if target_status.is_some_and(|status| status != LoteStatus::Disponible) {
        return Err(AppError::BadRequest(
            "The target lot is not available.".to_string(),
        ));
    }
    Ok(owner)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn only_monitored_fields_are_tracked() {
        let before = json!({"owner_id": null, "status": "disponible", "price": "25000.00", "area": "200.00"});
        let after = json!({"owner_id": 4, "status": "vendido", "price": "25000", "area": "210.00"});
        let changes = monitored_changes(&before, &after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, "owner_change");
        assert_eq!(changes[0].old_value, None);
        assert_eq!(changes[0].new_value.as_deref(), Some("4"));
        assert_eq!(changes[1].details(), "status changed from disponible to vendido");
    }

    #[test]
    fn price_changes_compare_amounts() {
        let before = json!({"price": "100.00"});
        let after = json!({"price": "120.50"});
        let changes = monitored_changes(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field_name, "price");
    }

    #[test]
    fn dimensions_must_be_positive() {
        assert!(validate_dimensions(Some(dec!(120)), Some(dec!(1))).is_ok());
        assert!(validate_dimensions(Some(Decimal::ZERO), None).is_err());
        assert!(validate_dimensions(None, Some(dec!(-5))).is_err());
    }

    #[test]
    fn ownership_matches_status() {
        assert!(validate_ownership(LoteStatus::Disponible, None).is_ok());
        assert!(validate_ownership(LoteStatus::Disponible, Some(1)).is_err());
        assert!(validate_ownership(LoteStatus::Vendido, None).is_err());
        assert!(validate_ownership(LoteStatus::Reservado, Some(1)).is_ok());
    }

    #[test]
    fn transfer_rules() {
        assert_eq!(ensure_transferable(1, Some(9), 2, None, Some(LoteStatus::Disponible)).unwrap(), 9);
        assert!(ensure_transferable(1, None, 2, None, None).is_err());
        assert!(ensure_transferable(1, Some(9), 2, Some(3), None).is_err());
        assert!(ensure_transferable(1, Some(9), 1, None, None).is_err());
        assert!(ensure_transferable(1, Some(9), 2, None, Some(LoteStatus::Desarrollo)).is_err());
    }
}
