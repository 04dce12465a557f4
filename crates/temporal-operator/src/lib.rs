//! Temporal operator - controllers, admission webhook and startup wiring
//!
//! The binary in `main.rs` parses [`config::Cli`], installs the CRDs and
//! then runs the controllers from [`controller_runner`] alongside the
//! [`webhook`] server.

pub mod config;
pub mod controller_runner;
pub mod startup;
pub mod webhook;

pub use config::{Cli, Commands, OperatorConfig};
