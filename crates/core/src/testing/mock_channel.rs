//! Mock message channel for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::channel::{ChannelError, TicketProducer};
use crate::ticket::Ticket;

/// Mock implementation of the TicketProducer trait.
///
/// Records every produced ticket instead of sending it anywhere.
///
/// # Example
///
/// ```rust,ignore
/// use ticketgate_core::testing::MockChannel;
///
/// let channel = MockChannel::new();
/// gateway.submit(Operation::Create, &request).await?;
///
/// let produced = channel.produced().await;
/// assert_eq!(produced[0].billing_channel, "RIAS_12");
/// ```
#[derive(Debug)]
pub struct MockChannel {
    /// Tickets accepted by `produce`, in call order.
    produced: Arc<RwLock<Vec<Ticket>>>,
    /// When set, every `produce` fails with a delivery error.
    failing: Arc<RwLock<bool>>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// Create a new mock channel.
    pub fn new() -> Self {
        Self {
            produced: Arc::new(RwLock::new(Vec::new())),
            failing: Arc::new(RwLock::new(false)),
        }
    }

    /// Get all produced tickets.
    pub async fn produced(&self) -> Vec<Ticket> {
        self.produced.read().await.clone()
    }

    /// Get the number of produced tickets.
    pub async fn produced_count(&self) -> usize {
        self.produced.read().await.len()
    }

    /// Clear produced tickets.
    pub async fn clear(&self) {
        self.produced.write().await.clear();
    }

    /// Make subsequent `produce` calls fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }
}

#[async_trait]
impl TicketProducer for MockChannel {
    async fn produce(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        if *self.failing.read().await {
            return Err(ChannelError::Delivery {
                topic: "mock".to_string(),
                reason: "mock channel configured to fail".to_string(),
            });
        }
        self.produced.write().await.push(ticket.clone());
        Ok(())
    }
}
