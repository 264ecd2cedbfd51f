//! Ticket events, lifecycle state and the JSON shapes exchanged with sources.

mod dto;
mod types;

pub use dto::{TicketEventDto, TicketRequest};
pub use types::{
    Attachment, EventTime, MessageKind, Ticket, TicketState, TicketStatus, UnknownStatus,
};
