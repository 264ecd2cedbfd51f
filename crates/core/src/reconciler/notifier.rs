//! Delivery of ticket events to the source that originated them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::ticket::TicketEventDto;

/// Errors that can occur when notifying a source.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Source answered with something other than 200.
    #[error("source rejected notification: {status} - {message}")]
    Rejected { status: u16, message: String },
}

/// Pushes ticket events to a source callback.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, event: &TicketEventDto) -> Result<(), NotifyError>;
}

/// Posts events as JSON. Only `200 OK` counts as delivered.
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, event: &TicketEventDto) -> Result<(), NotifyError> {
        debug!(
            url,
            customer_id = %event.customer_internal_id,
            kind = %event.message_type,
            "Posting ticket event to source"
        );

        let response = self.client.post(url).json(event).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
