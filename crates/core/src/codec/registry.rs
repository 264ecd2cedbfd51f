//! Schema registry client.
//!
//! Schemas are looked up once at startup with `GET <base_url><schema id>`,
//! the registry answering `{"schema": "<schema text>"}`.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::wire::{CodecError, TicketCodec};

/// Errors that can occur when fetching schemas.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Registry answered with a non-success status.
    #[error("registry returned {status} for schema {schema_id}: {message}")]
    ApiError {
        schema_id: u32,
        status: u16,
        message: String,
    },

    /// Failed to parse the registry response.
    #[error("Failed to parse registry response: {0}")]
    ParseError(String),

    /// Schema text was fetched but is not usable.
    #[error("schema {schema_id} rejected: {source}")]
    InvalidSchema {
        schema_id: u32,
        #[source]
        source: CodecError,
    },
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// Fetches schema text from the registry.
pub struct SchemaRegistry {
    client: Client,
    base_url: String,
}

impl SchemaRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch the raw schema text for `schema_id`.
    pub async fn fetch_schema(&self, schema_id: u32) -> Result<String, RegistryError> {
        let url = format!("{}{}", self.base_url, schema_id);
        debug!("Fetching schema {} from {}", schema_id, url);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RegistryError::ApiError {
                schema_id,
                status: status.as_u16(),
                message,
            });
        }

        let body: SchemaResponse = response.json().await.map_err(|e| {
            RegistryError::ParseError(format!("schema {}: {}", schema_id, e))
        })?;

        Ok(body.schema)
    }

    /// Fetch a schema and build a codec bound to it.
    pub async fn load_codec(&self, schema_id: u32) -> Result<TicketCodec, RegistryError> {
        let text = self.fetch_schema(schema_id).await?;
        let codec = TicketCodec::new(schema_id, &text)
            .map_err(|source| RegistryError::InvalidSchema { schema_id, source })?;
        info!(schema_id, "Loaded schema from registry");
        Ok(codec)
    }
}
