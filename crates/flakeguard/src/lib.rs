//! Cluster-coordinated, time-ordered 64-bit IDs.
//!
//! Every ID packs a second-resolution timestamp, a machine ID, a node ID and
//! a per-second sequence (see [`FlakeId`]). Uniqueness across the fleet comes
//! from distinct `(machine_id, node_id)` pairs; uniqueness within a process
//! comes from the [`SequenceGenerator`] state machine; uniqueness across
//! restarts comes from the [`ClockGuard`], which keeps a per-machine
//! watermark in a [`CoordinationStore`] and refuses to start on a clock that
//! went backwards.
//!
//! [`IdentityGenerator`] wires the three together and is what request
//! handlers call.
//!
//! ## Feature flags
//!
//! - `tracing`: emit spans and events through the `tracing` crate
//! - `serde`: derive `Serialize`/`Deserialize` for [`FlakeId`] and
//!   [`NodeConfig`]
//! - `cache-padded`: pad sequence state to a cache line to avoid false
//!   sharing

mod config;
mod error;
mod generator;
mod guard;
mod id;
mod identity;
mod store;
mod time;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::guard::*;
pub use crate::id::*;
pub use crate::identity::*;
pub use crate::store::*;
pub use crate::time::*;
