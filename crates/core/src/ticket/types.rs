//! Core ticket data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Message Kind
// ============================================================================

/// Kind of a ticket event, carried on the wire as a lowercase keyword.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Create,
    Status,
    Note,
    Wait,
    Reopen,
    Close,
}

impl MessageKind {
    /// Returns the wire keyword for this kind.
    pub fn as_keyword(&self) -> &'static str {
        match self {
            MessageKind::Create => "create",
            MessageKind::Status => "status",
            MessageKind::Note => "note",
            MessageKind::Wait => "wait",
            MessageKind::Reopen => "reopen",
            MessageKind::Close => "close",
        }
    }

    /// Parses a wire keyword.
    ///
    /// Unknown or missing keywords decode to `Note`: backends attach free
    /// comments with ad-hoc request names and those must still reach the source.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "create" => MessageKind::Create,
            "status" => MessageKind::Status,
            "wait" => MessageKind::Wait,
            "reopen" => MessageKind::Reopen,
            "close" => MessageKind::Close,
            _ => MessageKind::Note,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_keyword())
    }
}

// ============================================================================
// Event Payload Types
// ============================================================================

/// A point in time carried both as epoch seconds and as a display string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventTime {
    /// Seconds since the Unix epoch (0 = unset).
    pub epoch: i64,
    /// Human readable rendering supplied by the producer.
    pub display: String,
}

impl EventTime {
    pub fn new(epoch: i64, display: impl Into<String>) -> Self {
        Self {
            epoch,
            display: display.into(),
        }
    }

    /// Builds a time whose display is the RFC 3339 rendering of `epoch`.
    pub fn from_epoch(epoch: i64) -> Self {
        let display = DateTime::<Utc>::from_timestamp(epoch, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        Self { epoch, display }
    }
}

/// File attached to a ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    /// Payload as the producer sent it (typically base64).
    pub payload: String,
}

impl Attachment {
    /// Builds an attachment from the two optional wire fields.
    /// Returns `None` when both are empty.
    pub fn from_parts(name: String, payload: String) -> Option<Self> {
        if name.is_empty() && payload.is_empty() {
            None
        } else {
            Some(Self { name, payload })
        }
    }
}

/// A transient ticket event, either an outbound request or a backend reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub kind: MessageKind,
    pub customer_id: String,
    /// Operator channel code the request came in on.
    pub operator_channel: String,
    /// Backend the event is addressed to (`KRUS` or `RIAS_<NN>`).
    pub billing_channel: String,
    pub description: String,
    pub classification: String,
    pub attachment: Option<Attachment>,
    /// Ticket number assigned by the backend.
    pub operator_ticket_id: String,
    /// Status string reported by the backend (`"error"` on rejection).
    pub status: String,
    pub comment: String,
    pub user: String,
    pub start: EventTime,
    pub event: EventTime,
}

impl Ticket {
    /// Create an empty event of the given kind for a customer.
    pub fn new(kind: MessageKind, customer_id: impl Into<String>) -> Self {
        Self {
            kind,
            customer_id: customer_id.into(),
            operator_channel: String::new(),
            billing_channel: String::new(),
            description: String::new(),
            classification: String::new(),
            attachment: None,
            operator_ticket_id: String::new(),
            status: String::new(),
            comment: String::new(),
            user: String::new(),
            start: EventTime::default(),
            event: EventTime::default(),
        }
    }

    /// Whether the backend reported a rejection.
    pub fn is_error_reply(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle status of a stored ticket.
///
/// ```text
/// Creating -> Working | Error
/// Error    -> Creating (reroute) -> Error (terminal, both backends refused)
/// Working <-> Waiting
/// Working | Waiting -> Closed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Request sent, no backend confirmation yet.
    Creating,
    /// Current backend rejected the request.
    Error,
    /// Backend accepted and assigned a ticket number.
    Working,
    /// Ticket on hold.
    Waiting,
    /// Terminal.
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Creating => "creating",
            TicketStatus::Error => "error",
            TicketStatus::Working => "working",
            TicketStatus::Waiting => "waiting",
            TicketStatus::Closed => "closed",
        }
    }

    /// States in which a record is still waiting on a backend answer and may go stale.
    pub fn awaits_backend(&self) -> bool {
        matches!(self, TicketStatus::Creating | TicketStatus::Error)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown ticket status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "creating" => Ok(TicketStatus::Creating),
            "error" => Ok(TicketStatus::Error),
            "working" => Ok(TicketStatus::Working),
            "waiting" => Ok(TicketStatus::Waiting),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Durable per-customer record of an in-flight or recently closed ticket.
///
/// Keyed by `customer_id`; at most one exists per customer and writes are
/// last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketState {
    /// Name of the external system that originated the request.
    pub source: String,
    pub customer_id: String,
    pub billing_channel: String,
    pub operator_channel: String,
    pub description: String,
    pub start: EventTime,
    pub classification: String,
    pub attachment: Option<Attachment>,
    pub operator_ticket_id: String,
    pub status: TicketStatus,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds, refreshed on every mutation.
    pub modified_at: i64,
}

impl TicketState {
    /// Sets a new status and refreshes `modified_at`.
    pub fn transition(&mut self, status: TicketStatus, now: i64) {
        self.status = status;
        self.modified_at = now;
    }

    /// Whether a `Creating`/`Error` record has gone without progress for `stale_after_secs`.
    pub fn is_stale(&self, now: i64, stale_after_secs: i64) -> bool {
        self.status.awaits_backend() && now - self.modified_at > stale_after_secs
    }

    /// Builds a fresh `create` event that resubmits this record to `billing_channel`.
    pub fn to_create_event(&self, billing_channel: &str) -> Ticket {
        Ticket {
            kind: MessageKind::Create,
            customer_id: self.customer_id.clone(),
            operator_channel: self.operator_channel.clone(),
            billing_channel: billing_channel.to_string(),
            description: self.description.clone(),
            classification: self.classification.clone(),
            attachment: self.attachment.clone(),
            start: self.start.clone(),
            ..Ticket::new(MessageKind::Create, self.customer_id.clone())
        }
    }
}
