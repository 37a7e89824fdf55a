//! Vault bootstrap, crash recovery and the polling loop that drives the
//! control plane.

pub mod control_plane;
pub mod poller;
pub mod recovery;
pub mod state_paths;

pub use crate::shared::errors::RuntimeError;
pub use control_plane::{ControlPlane, TickReport};
pub use poller::run_poller;
pub use recovery::{recover_vault, RecoveryReport};
pub use state_paths::{bootstrap_vault, VaultPaths};
