pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::get,
    Router,
};
use crate::http::server::AppState;
use self::handlers::*;
use self::auth::admin_auth_middleware;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(list_sessions))
        .route("/admin/sessions/{sid}", get(get_session).delete(delete_session))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
