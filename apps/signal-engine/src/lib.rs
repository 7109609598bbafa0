// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Signal Engine - Core Library
//!
//! Automates trading actions against a remote brokerage gateway in response
//! to trade signals delivered over HTTP. The gateway speaks an
//! asynchronous, event-driven wire protocol: one long-lived session emits
//! solicited and unsolicited events that must be correlated back to
//! specific in-flight requests even though the transport multiplexes every
//! consumer onto one event stream.
//!
//! # Architecture
//!
//! - `gateway`: the Broker Gateway Client port (imperative commands plus a
//!   broadcast event stream) and an in-process paper implementation.
//! - `session`: session state (connection state, order-id counter) and the
//!   connection supervisor with backoff reconnection.
//! - `correlator`: request/response correlation over the shared stream,
//!   serialized per request kind and bounded by a timeout.
//! - `account`: freshness-stamped account-summary cache.
//! - `workflow`: the open-position and liquidate-all order workflows as
//!   explicit state machines.
//! - `signal`: single-flight signal-debouncing gate and price state.
//! - `server`: the axum webhook receiver driving everything above.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Account-state cache.
pub mod account;

/// Configuration loading and validation.
pub mod config;

/// Request/response correlation over the shared event stream.
pub mod correlator;

/// Broker Gateway Client port and implementations.
pub mod gateway;

/// Domain types.
pub mod models;

/// HTTP signal receiver.
pub mod server;

/// Session state and connection supervision.
pub mod session;

/// Signal gate and price state.
pub mod signal;

/// Tracing initialization.
pub mod telemetry;

/// Order workflow engine.
pub mod workflow;

pub use account::AccountCache;
pub use config::{Config, ConfigError, load_config};
pub use correlator::{CorrelatorError, RequestCorrelator, RequestKind};
pub use gateway::{GatewayClient, GatewayError, GatewayEvent, SimGateway};
pub use server::{AppState, create_router};
pub use session::{ConnectionState, ConnectionSupervisor, ReconnectPolicy, Session};
pub use signal::{Admission, PriceState, SignalGate};
pub use workflow::{EngineSettings, WorkflowEngine, WorkflowError, calculate_quantity};
