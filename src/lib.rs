//! # LMS Gateway
//!
//! Learning-management backend built on Axum. The CRUD surface is thin and
//! generic; the care goes into the request gateway in front of it:
//!
//! - **Client address**: `X-Forwarded-For` walked right to left, skipping
//!   trusted proxy ranges
//! - **Access gate**: debug endpoints switched off by default, bearer tokens
//!   verified and the caller's identity attached to the request
//! - **Telemetry**: per-route latency for every request, rejections included
//! - **Lifecycle**: signal-driven drain with a bounded grace period
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Rate Limit → Request ID → Trace → CORS → Body Limit        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Gateway: redacted log → access gate → handler → telemetry  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (auth, entities, files, health, debug)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Repository / ObjectStore traits (in-memory backends)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lms_gateway::lifecycle::spawn_signal_listener;
//! use lms_gateway::{AppState, Config, LifecycleController, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::in_memory(config.clone())?;
//!     let app = build_router(state.clone())?;
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     let (signals, rx) = tokio::sync::mpsc::channel(4);
//!     spawn_signal_listener(signals);
//!
//!     let controller = LifecycleController::new(state.cancellation_token(), config.shutdown_grace);
//!     controller.run(listener, app, rx).await?;
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! ```bash
//! JWT_SECRET=change-me DEBUG_ENDPOINTS=false cargo run
//! RATE_LIMIT_RPS=100 RATE_LIMIT_BURST=50 TRUSTED_PROXIES=10.0.0.0/8 cargo run
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod telemetry;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use lifecycle::{LifecycleController, LifecycleState, TerminationSignal};
pub use routes::build_router;
pub use state::AppState;
