//! Broker session state.
//!
//! One [`Session`] owns one gateway connection: its connection state and the
//! monotonic next-order-id counter the gateway seeds on connect. The counter
//! is only ever read and incremented by the order workflow engine, one
//! allocation per placed order.

mod supervisor;

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

pub use supervisor::{ConnectionSupervisor, ReconnectPolicy};

use crate::models::OrderId;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Reconnect attempt in flight.
    Connecting,
    /// Session established.
    Connected,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

/// Session-level error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The gateway has not yet announced a valid order id.
    #[error("no valid order id: gateway has not announced one yet")]
    NoOrderId,
}

/// Shared session state: connection state plus the order-id counter.
#[derive(Debug)]
pub struct Session {
    state: AtomicU8,
    // Negative until the gateway announces the first valid id.
    next_order_id: AtomicI64,
}

impl Session {
    /// Create a session in the disconnected state with no order id.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            next_order_id: AtomicI64::new(-1),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Record a connection state transition.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Whether the session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Seed the counter from the gateway's `NextValidOrderId` announcement.
    pub fn seed_order_id(&self, id: OrderId) {
        self.next_order_id.store(id.value(), Ordering::SeqCst);
    }

    /// Allocate the next order id, incrementing the counter.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoOrderId`] before the gateway has announced
    /// a first valid id.
    pub fn allocate_order_id(&self) -> Result<OrderId, SessionError> {
        if self.next_order_id.load(Ordering::SeqCst) < 0 {
            return Err(SessionError::NoOrderId);
        }
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(OrderId::new(id))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
