//! Multi-tenant session supervision for Courier.
//!
//! Owns the in-memory registry of live transport sessions (at most one
//! per tenant), de-duplicates concurrent session creation, serializes
//! event handling per tenant, drives the reconnect state machine, and
//! wires transport events into the durable stores.

mod handle;
mod keys;
mod reconnect;
mod registry;
mod supervisor;

pub use handle::SessionHandle;
pub use keys::TenantKeyProvider;
pub use reconnect::ReconnectPolicy;
pub use registry::{SessionRegistry, SessionState, TenantSlot};
pub use supervisor::{SessionOverview, SessionSupervisor, SupervisorError};
