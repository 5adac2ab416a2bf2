//! Gateway: HTTP surface for the Telegram webhook and diagnostics.
//!
//! `GET /` is a liveness probe and `POST /` receives webhook updates. Diagnostics live under
//! `/health`, `/config-check` and `/test-llm`. A background task evicts idle sessions.

mod server;

pub use server::{build_router, run_gateway, GatewayState};
