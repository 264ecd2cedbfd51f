use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, middleware::metrics_middleware, tickets};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Ticket operations
        .route("/createticket", post(tickets::create_ticket))
        .route("/reopenticket", post(tickets::reopen_ticket))
        .route("/changeticketstatus", post(tickets::change_ticket_status))
        .route("/checkticketstatus", post(tickets::check_ticket_status))
        .route("/addnotetoticket", post(tickets::add_note_to_ticket))
        .route("/closeticket", post(tickets::close_ticket))
        // Cached state
        .route("/cache/checkticketstatus", post(tickets::cached_ticket_status))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
