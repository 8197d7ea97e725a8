//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → envelope.rs (decode <body/> → InboundRequest)
//!     → SessionManager::process (may hold the response)
//!     → envelope.rs (encode Reply or error)
//!     → Send to client
//! ```

pub mod envelope;
pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
