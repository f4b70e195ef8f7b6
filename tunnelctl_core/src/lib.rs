//! Core library for tunnelctl.
//!
//! This crate provides the isolate-scoped tunnel-control contract used by
//! the `tunnelctl` command-line driver and the C ABI in `tunnelctl_ffi`:
//! execution contexts, the tunnel controller, the WireGuard configuration
//! model, platform services, settings and logging.

pub mod config;
pub mod isolate;
pub mod logging;
pub mod platform;
pub mod tunnel;

// Re-export commonly used items for convenience
pub use config::Config;
pub use isolate::{ExecutionContext, IsolateError, IsolateId, IsolateManager};
pub use platform::{PlatformError, PlatformService, create_platform};
pub use tunnel::{
    ConfigReference, DownOutcome, ErrorCode, ReservedFlags, TunnelController, TunnelError,
    TunnelHandle, TunnelResult, TunnelState,
};
