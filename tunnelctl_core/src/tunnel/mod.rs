//! Tunnel control for tunnelctl.
//!
//! This module resolves configuration references, brings tunnels up and
//! down through a platform backend, and maps failures to stable error
//! codes.

mod controller;
mod error;
mod reference;
pub mod types;

pub use controller::TunnelController;
pub use error::{ErrorCode, TunnelError, TunnelResult};
pub use reference::{ConfigReference, ResolvedConfig, resolve_for_down, resolve_for_up};
pub use types::{DownOutcome, ReservedFlags, TunnelHandle, TunnelInfo, TunnelState};
