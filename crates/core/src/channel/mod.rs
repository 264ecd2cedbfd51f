//! Duplex message channel to the billing backends.
//!
//! Outbound events are encoded and produced to the request topic; replies
//! are consumed from the reply topic, decoded and pushed onto an in-process
//! queue drained by the reconciler pool.

mod kafka;

pub use kafka::KafkaChannel;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::CodecError;
use crate::ticket::Ticket;

/// Sending half of the inbound queue. Unbounded so the consume loop never
/// stalls on slow reconciliation.
pub type InboundSender = mpsc::UnboundedSender<Ticket>;

/// Receiving half of the inbound queue.
pub type InboundReceiver = mpsc::UnboundedReceiver<Ticket>;

/// Create the inbound queue.
pub fn inbound_queue() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

/// Errors that can occur on the message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] CodecError),

    #[error("broker client configuration failed: {0}")]
    Config(String),

    #[error("failed to deliver to {topic}: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// Anything that can hand an event to the backends.
///
/// Implementations must be safe to call concurrently: the gateway and the
/// reconciler's failover path both produce.
#[async_trait]
pub trait TicketProducer: Send + Sync {
    async fn produce(&self, ticket: &Ticket) -> Result<(), ChannelError>;
}
