//! Flat field-map representation of a [`TicketState`].
//!
//! This is the hash layout written to Redis; the names are shared with
//! existing consumers of the cache and must not change.

use std::collections::HashMap;

use crate::ticket::{Attachment, EventTime, TicketState};

use super::StoreError;

/// Prefix of every record key.
pub const KEY_PREFIX: &str = "CustomerInternalID:";

/// Hash field names.
pub mod field {
    pub const SOURCE: &str = "source";
    pub const CUSTOMER_ID: &str = "customer_internal_id";
    pub const BILLING_CHANNEL: &str = "tt_for_billing";
    pub const OPERATOR_CHANNEL: &str = "id_channel_operator";
    pub const DESCRIPTION: &str = "description";
    pub const START_EPOCH: &str = "tt_start_time";
    pub const START_DISPLAY: &str = "tt_start_time_string";
    pub const CLASSIFICATION: &str = "tt_classification";
    pub const OPERATOR_TICKET_ID: &str = "tt_number";
    pub const STATUS: &str = "status";
    pub const FILE_NAME: &str = "file_name";
    pub const FILE: &str = "tt_file";
    pub const CREATED_AT: &str = "timestamp_start";
    pub const MODIFIED_AT: &str = "timestamp";
}

/// Store key for a customer.
pub fn customer_key(customer_id: &str) -> String {
    format!("{KEY_PREFIX}{customer_id}")
}

/// Flatten a record into `(field, value)` pairs.
pub fn state_to_fields(state: &TicketState) -> Vec<(&'static str, String)> {
    let (file_name, file) = state
        .attachment
        .as_ref()
        .map(|a| (a.name.clone(), a.payload.clone()))
        .unwrap_or_default();

    vec![
        (field::SOURCE, state.source.clone()),
        (field::CUSTOMER_ID, state.customer_id.clone()),
        (field::BILLING_CHANNEL, state.billing_channel.clone()),
        (field::OPERATOR_CHANNEL, state.operator_channel.clone()),
        (field::DESCRIPTION, state.description.clone()),
        (field::START_EPOCH, state.start.epoch.to_string()),
        (field::START_DISPLAY, state.start.display.clone()),
        (field::CLASSIFICATION, state.classification.clone()),
        (field::OPERATOR_TICKET_ID, state.operator_ticket_id.clone()),
        (field::STATUS, state.status.as_str().to_string()),
        (field::FILE_NAME, file_name),
        (field::FILE, file),
        (field::CREATED_AT, state.created_at.to_string()),
        (field::MODIFIED_AT, state.modified_at.to_string()),
    ]
}

/// Rebuild a record from a field map.
///
/// Missing text fields default to empty, missing numbers to 0. The status
/// field is required; a record without a readable status is corrupt.
pub fn state_from_fields(
    customer_id: &str,
    fields: &HashMap<String, String>,
) -> Result<TicketState, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        customer_id: customer_id.to_string(),
        reason,
    };
    let text = |name: &str| fields.get(name).cloned().unwrap_or_default();
    let int = |name: &str| -> Result<i64, StoreError> {
        match fields.get(name).map(|v| v.trim()) {
            None | Some("") => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| corrupt(format!("field {name} is not an integer: {v}"))),
        }
    };

    let status = fields
        .get(field::STATUS)
        .ok_or_else(|| corrupt("missing status".to_string()))?
        .parse()
        .map_err(|e: crate::ticket::UnknownStatus| corrupt(e.to_string()))?;

    let stored_id = text(field::CUSTOMER_ID);
    Ok(TicketState {
        source: text(field::SOURCE),
        customer_id: if stored_id.is_empty() {
            customer_id.to_string()
        } else {
            stored_id
        },
        billing_channel: text(field::BILLING_CHANNEL),
        operator_channel: text(field::OPERATOR_CHANNEL),
        description: text(field::DESCRIPTION),
        start: EventTime::new(int(field::START_EPOCH)?, text(field::START_DISPLAY)),
        classification: text(field::CLASSIFICATION),
        attachment: Attachment::from_parts(text(field::FILE_NAME), text(field::FILE)),
        operator_ticket_id: text(field::OPERATOR_TICKET_ID),
        status,
        created_at: int(field::CREATED_AT)?,
        modified_at: int(field::MODIFIED_AT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TicketStatus;

    fn sample() -> TicketState {
        TicketState {
            source: "sberapi".to_string(),
            customer_id: "C100".to_string(),
            billing_channel: "RIAS_12".to_string(),
            operator_channel: "ABCD12-x".to_string(),
            description: "no link".to_string(),
            start: EventTime::new(1_700_000_000, "14.11.2023"),
            classification: "network".to_string(),
            attachment: Some(Attachment {
                name: "trace.txt".to_string(),
                payload: "dHJhY2U=".to_string(),
            }),
            operator_ticket_id: "ERTH-1".to_string(),
            status: TicketStatus::Working,
            created_at: 1_700_000_001,
            modified_at: 1_700_000_050,
        }
    }

    fn as_map(pairs: Vec<(&'static str, String)>) -> HashMap<String, String> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_customer_key() {
        assert_eq!(customer_key("C100"), "CustomerInternalID:C100");
    }

    #[test]
    fn test_field_map_restores_record() {
        let state = sample();
        let map = as_map(state_to_fields(&state));
        assert_eq!(map["status"], "working");
        assert_eq!(map["tt_start_time"], "1700000000");
        assert_eq!(map["timestamp"], "1700000050");
        assert_eq!(state_from_fields("C100", &map).unwrap(), state);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let map = HashMap::from([("status".to_string(), "creating".to_string())]);
        let state = state_from_fields("C9", &map).unwrap();
        assert_eq!(state.customer_id, "C9");
        assert_eq!(state.status, TicketStatus::Creating);
        assert_eq!(state.modified_at, 0);
        assert!(state.attachment.is_none());
    }

    #[test]
    fn test_missing_status_is_corrupt() {
        let map = HashMap::from([("source".to_string(), "x".to_string())]);
        assert!(matches!(
            state_from_fields("C9", &map),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_non_numeric_timestamp_is_corrupt() {
        let mut map = as_map(state_to_fields(&sample()));
        map.insert("timestamp".to_string(), "Tue, 14 Nov 2023 22:13:20".to_string());
        let err = state_from_fields("C100", &map).unwrap_err();
        assert!(err.to_string().contains("timestamp"));
    }
}
