//! Entry point for ticket requests submitted by sources.
//!
//! The gateway validates a request for its operation, works out which
//! backend it belongs to, records the pending state and produces the event.
//! Validation always happens before any state is read or written.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::channel::{ChannelError, TicketProducer};
use crate::router::{self, RouteError};
use crate::store::{StateStore, StoreError};
use crate::ticket::{MessageKind, TicketRequest, TicketState, TicketStatus};

/// Operation requested by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Reopen,
    ChangeStatus,
    CheckStatus,
    AddNote,
    Close,
}

impl Operation {
    /// Kind of event produced for this operation.
    pub fn message_kind(&self) -> MessageKind {
        match self {
            Operation::Create => MessageKind::Create,
            Operation::Reopen => MessageKind::Reopen,
            Operation::ChangeStatus => MessageKind::Wait,
            Operation::CheckStatus => MessageKind::Status,
            Operation::AddNote => MessageKind::Note,
            Operation::Close => MessageKind::Close,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Reopen => "reopen",
            Operation::ChangeStatus => "change_status",
            Operation::CheckStatus => "check_status",
            Operation::AddNote => "add_note",
            Operation::Close => "close",
        }
    }

    /// Names of the request fields that must be non-empty.
    fn missing_fields(&self, request: &TicketRequest) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self {
            Operation::Create => {
                if request.customer_internal_id.is_empty() {
                    missing.push("customer_internal_id");
                }
                if request.id_channel_operator.is_empty() {
                    missing.push("id_channel_operator");
                }
                if request.description.is_empty() {
                    missing.push("description");
                }
                if request.start_time_string.is_empty() && request.start_time_ts == 0 {
                    missing.push("start_time");
                }
            }
            _ => {
                if request.id_channel_operator.is_empty() {
                    missing.push("id_channel_operator");
                }
                if request.tt_number.is_empty() {
                    missing.push("tt_number");
                }
            }
        }
        missing
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned to the submitting source.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{operation} request is missing required fields: {}", .fields.join(", "))]
    MissingFields {
        operation: Operation,
        fields: Vec<&'static str>,
    },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("no ticket state for customer {0}")]
    UnknownCustomer(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl GatewayError {
    /// Whether the request itself was at fault (as opposed to a transport failure).
    pub fn is_validation(&self) -> bool {
        matches!(self, GatewayError::MissingFields { .. } | GatewayError::Route(_))
    }
}

/// Result of an accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub customer_id: String,
    pub billing_channel: String,
    pub status: TicketStatus,
}

/// Validates requests, records state and produces events.
pub struct TicketGateway {
    store: Arc<dyn StateStore>,
    producer: Arc<dyn TicketProducer>,
}

impl TicketGateway {
    pub fn new(store: Arc<dyn StateStore>, producer: Arc<dyn TicketProducer>) -> Self {
        Self { store, producer }
    }

    /// Handle one request.
    ///
    /// State is written before the event is produced. If producing fails the
    /// state change is not rolled back; the error is returned to the caller.
    pub async fn submit(
        &self,
        operation: Operation,
        request: &TicketRequest,
    ) -> Result<Receipt, GatewayError> {
        let missing = operation.missing_fields(request);
        if !missing.is_empty() {
            warn!(
                operation = %operation,
                customer_id = %request.customer_internal_id,
                missing = ?missing,
                "Rejected ticket request"
            );
            return Err(GatewayError::MissingFields {
                operation,
                fields: missing,
            });
        }

        let now = Utc::now().timestamp();
        let state = match operation {
            Operation::Create => self.create_state(request, now)?,
            _ => self.follow_up_state(operation, request, now).await?,
        };

        if operation != Operation::CheckStatus {
            self.store.put(&state).await?;
        }

        let ticket = request.to_ticket(operation.message_kind(), &state.billing_channel);
        self.producer.produce(&ticket).await?;

        info!(
            operation = %operation,
            customer_id = %state.customer_id,
            billing_channel = %state.billing_channel,
            status = %state.status,
            "Ticket request submitted"
        );

        Ok(Receipt {
            customer_id: state.customer_id,
            billing_channel: state.billing_channel,
            status: state.status,
        })
    }

    /// Read the stored lifecycle status of a customer's ticket.
    pub async fn cached_status(
        &self,
        customer_id: &str,
    ) -> Result<Option<TicketStatus>, GatewayError> {
        Ok(self.store.get_status(customer_id).await?)
    }

    fn create_state(&self, request: &TicketRequest, now: i64) -> Result<TicketState, GatewayError> {
        let billing = router::resolve(&request.id_channel_operator)?;
        let ticket = request.to_ticket(MessageKind::Create, &billing.to_string());

        Ok(TicketState {
            source: request.source.clone(),
            customer_id: ticket.customer_id,
            billing_channel: ticket.billing_channel,
            operator_channel: ticket.operator_channel,
            description: ticket.description,
            start: ticket.start,
            classification: ticket.classification,
            attachment: ticket.attachment,
            operator_ticket_id: ticket.operator_ticket_id,
            status: TicketStatus::Creating,
            created_at: now,
            modified_at: now,
        })
    }

    async fn follow_up_state(
        &self,
        operation: Operation,
        request: &TicketRequest,
        now: i64,
    ) -> Result<TicketState, GatewayError> {
        let mut state = self
            .store
            .get(&request.customer_internal_id)
            .await?
            .ok_or_else(|| GatewayError::UnknownCustomer(request.customer_internal_id.clone()))?;

        match operation {
            Operation::Reopen => state.transition(TicketStatus::Working, now),
            Operation::ChangeStatus => state.transition(TicketStatus::Waiting, now),
            Operation::Close => state.transition(TicketStatus::Closed, now),
            Operation::AddNote => state.modified_at = now,
            Operation::CheckStatus | Operation::Create => {}
        }

        if state.operator_ticket_id.is_empty() {
            state.operator_ticket_id = request.tt_number.clone();
        }
        Ok(state)
    }
}
