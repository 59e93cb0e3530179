//! Redis-protocol front end for [`flakeguard::IdentityGenerator`].
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration
//! - [`telemetry`] - log subscriber setup
//! - [`resp`] - RESP2 codec
//! - [`handler`] - command dispatch
//! - [`listener`] - accept loop and per-connection tasks
//! - [`consul`] / [`store`] - watermark storage backends

use flakeguard::{LockIdentityGenerator, SystemClock};

pub mod config;
pub mod consul;
pub mod handler;
pub mod listener;
pub mod resp;
pub mod store;
pub mod telemetry;

/// The generator shared by every connection.
pub type Generator = LockIdentityGenerator<store::Store, SystemClock>;
