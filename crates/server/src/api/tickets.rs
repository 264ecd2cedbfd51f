//! Ticket API handlers.
//!
//! Every operation takes the same JSON request body; the operation itself is
//! implied by the route.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use ticketgate_core::{GatewayError, Operation, Receipt, TicketRequest};

use crate::metrics::TICKET_REQUESTS;
use crate::state::AppState;

/// Error response
#[derive(Debug, Serialize)]
pub struct TicketErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<TicketErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(TicketErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Map a gateway failure onto an HTTP status and a metric label.
fn classify(error: &GatewayError) -> (StatusCode, &'static str) {
    match error {
        e if e.is_validation() => (StatusCode::BAD_REQUEST, "invalid"),
        GatewayError::UnknownCustomer(_) => (StatusCode::NOT_FOUND, "unknown_customer"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
    }
}

async fn submit(
    state: &AppState,
    operation: Operation,
    request: TicketRequest,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    match state.gateway().submit(operation, &request).await {
        Ok(receipt) => {
            TICKET_REQUESTS
                .with_label_values(&[operation.as_str(), "accepted"])
                .inc();
            Ok((StatusCode::ACCEPTED, Json(receipt)))
        }
        Err(e) => {
            let (status, label) = classify(&e);
            TICKET_REQUESTS
                .with_label_values(&[operation.as_str(), label])
                .inc();
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!(
                    operation = %operation,
                    customer_id = %request.customer_internal_id,
                    error = %e,
                    "Ticket request failed"
                );
            }
            Err(api_error(status, e))
        }
    }
}

/// Open a new ticket
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TicketRequest>,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    submit(&state, Operation::Create, request).await
}

pub async fn reopen_ticket(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TicketRequest>,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    submit(&state, Operation::Reopen, request).await
}

/// Put a ticket on hold
pub async fn change_ticket_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TicketRequest>,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    submit(&state, Operation::ChangeStatus, request).await
}

/// Ask the backend for the current status
pub async fn check_ticket_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TicketRequest>,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    submit(&state, Operation::CheckStatus, request).await
}

pub async fn add_note_to_ticket(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TicketRequest>,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    submit(&state, Operation::AddNote, request).await
}

pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TicketRequest>,
) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    submit(&state, Operation::Close, request).await
}

/// Echo the request back with the locally cached lifecycle status.
///
/// Answers from the state store only; nothing is sent to the backend.
pub async fn cached_ticket_status(
    State(state): State<Arc<AppState>>,
    Json(mut request): Json<TicketRequest>,
) -> Result<Json<TicketRequest>, ApiError> {
    if request.customer_internal_id.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "customer_internal_id is required",
        ));
    }

    match state
        .gateway()
        .cached_status(&request.customer_internal_id)
        .await
    {
        Ok(Some(status)) => {
            request.status = status.to_string();
            Ok(Json(request))
        }
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!(
                "no ticket state for customer {}",
                request.customer_internal_id
            ),
        )),
        Err(e) => {
            error!(
                customer_id = %request.customer_internal_id,
                error = %e,
                "Failed to read cached status"
            );
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}
