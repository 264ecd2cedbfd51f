//! Test doubles and fixtures.
//!
//! Mock implementations of the outbound seams (broker producer and source
//! notifier) so the gateway, the reconciler and the server can be exercised
//! against `SqliteStateStore::in_memory` without a broker or a network.
//!
//! # Example
//!
//! ```rust,ignore
//! use ticketgate_core::testing::{fixtures, MockChannel, MockNotifier};
//!
//! let channel = MockChannel::new();
//! let notifier = MockNotifier::new();
//!
//! // ... run the gateway or the engine ...
//!
//! assert_eq!(channel.produced_count().await, 1);
//! ```

mod mock_channel;
mod mock_notifier;

pub use mock_channel::MockChannel;
pub use mock_notifier::{MockNotifier, RecordedNotification};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::ticket::{EventTime, MessageKind, Ticket, TicketRequest, TicketState, TicketStatus};

    /// Epoch used by fixture timestamps (2023-11-14T22:13:20Z).
    pub const FIXTURE_EPOCH: i64 = 1_700_000_000;

    /// Ticket record schema in the outbound shape: nullable strings with
    /// long timestamps. Registered under any id in tests.
    pub const TICKET_SCHEMA: &str = r#"{
        "type": "record",
        "name": "TroubleTicket",
        "fields": [
            {"name": "tt_request", "type": ["null", "string"], "default": null},
            {"name": "tt_for_billing", "type": ["null", "string"], "default": null},
            {"name": "tt_client", "type": ["null", "string"], "default": null},
            {"name": "tt_id_channel_operator", "type": ["null", "string"], "default": null},
            {"name": "tt_description", "type": ["null", "string"], "default": null},
            {"name": "tt_ts_start", "type": ["null", "long"], "default": null},
            {"name": "date_in_string", "type": ["null", "string"], "default": null},
            {"name": "tt_problem_type", "type": ["null", "string"], "default": null},
            {"name": "tt_file_name", "type": ["null", "string"], "default": null},
            {"name": "tt_file", "type": ["null", "string"], "default": null},
            {"name": "tt_erth", "type": ["null", "string"], "default": null},
            {"name": "tt_ts", "type": ["null", "long"], "default": null},
            {"name": "tt_status", "type": ["null", "string"], "default": null},
            {"name": "tt_comment", "type": ["null", "string"], "default": null},
            {"name": "tt_user", "type": ["null", "string"], "default": null}
        ]
    }"#;

    /// A complete, valid create request from the `sberapi` source.
    pub fn create_request(customer_id: &str, operator_channel: &str) -> TicketRequest {
        TicketRequest {
            source: "sberapi".to_string(),
            customer_internal_id: customer_id.to_string(),
            id_channel_operator: operator_channel.to_string(),
            description: "No internet since morning".to_string(),
            start_time_string: "14.11.2023 22:13:20".to_string(),
            start_time_ts: FIXTURE_EPOCH,
            problem_type: "network".to_string(),
            ..Default::default()
        }
    }

    /// A stored record owned by the `sberapi` source, last modified at [`FIXTURE_EPOCH`].
    pub fn ticket_state(
        customer_id: &str,
        operator_channel: &str,
        billing_channel: &str,
        status: TicketStatus,
    ) -> TicketState {
        TicketState {
            source: "sberapi".to_string(),
            customer_id: customer_id.to_string(),
            billing_channel: billing_channel.to_string(),
            operator_channel: operator_channel.to_string(),
            description: "No internet since morning".to_string(),
            start: EventTime::new(FIXTURE_EPOCH, "14.11.2023 22:13:20"),
            classification: "network".to_string(),
            attachment: None,
            operator_ticket_id: String::new(),
            status,
            created_at: FIXTURE_EPOCH,
            modified_at: FIXTURE_EPOCH,
        }
    }

    /// A backend reply of `kind` for `customer_id` carrying `status`.
    pub fn reply(kind: MessageKind, customer_id: &str, billing_channel: &str, status: &str) -> Ticket {
        Ticket {
            billing_channel: billing_channel.to_string(),
            status: status.to_string(),
            event: EventTime::from_epoch(FIXTURE_EPOCH + 60),
            ..Ticket::new(kind, customer_id)
        }
    }
}
