//! Mock source notifier for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::reconciler::{Notifier, NotifyError};
use crate::ticket::TicketEventDto;

/// A recorded notification for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedNotification {
    /// Callback URL the event was posted to.
    pub url: String,
    /// The event that was posted.
    pub event: TicketEventDto,
}

/// Mock implementation of the Notifier trait.
///
/// Successful deliveries are recorded; while failing, calls return a
/// `Rejected` error and nothing is recorded.
#[derive(Debug)]
pub struct MockNotifier {
    notifications: Arc<RwLock<Vec<RecordedNotification>>>,
    failing: Arc<RwLock<bool>>,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNotifier {
    /// Create a new mock notifier.
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
            failing: Arc::new(RwLock::new(false)),
        }
    }

    /// Get all delivered notifications.
    pub async fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications.read().await.clone()
    }

    /// Get the number of delivered notifications.
    pub async fn notification_count(&self) -> usize {
        self.notifications.read().await.len()
    }

    /// Clear delivered notifications.
    pub async fn clear(&self) {
        self.notifications.write().await.clear();
    }

    /// Make subsequent deliveries fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, url: &str, event: &TicketEventDto) -> Result<(), NotifyError> {
        if *self.failing.read().await {
            return Err(NotifyError::Rejected {
                status: 503,
                message: "mock notifier configured to fail".to_string(),
            });
        }
        self.notifications.write().await.push(RecordedNotification {
            url: url.to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}
