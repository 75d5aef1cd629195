//! HTTP gateway over the Courier session supervisor.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
