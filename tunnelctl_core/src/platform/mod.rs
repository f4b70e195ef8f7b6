//! Platform services for tunnelctl
//!
//! This module defines the platform service trait and the implementations
//! that create, configure and remove WireGuard adapters.

pub mod commands;
pub mod kernel;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Backend, TunnelConfig, VpnConfiguration};

pub use commands::{HostCommands, RecordingCommands, SystemCommands};
pub use kernel::KernelPlatform;
pub use memory::MemoryPlatform;

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Error type for platform operations
#[derive(Error, Debug)]
pub enum PlatformError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System command error
    #[error("System command error: {0}")]
    SystemCommand(String),

    /// A program could not be started at all
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Permission error
    #[error("Permission error: {0}")]
    Permission(String),

    /// An adapter with this name already exists
    #[error("Adapter already exists: {0}")]
    AdapterExists(String),

    /// No adapter with this name
    #[error("Adapter not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Everything needed to bring an adapter up.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Name of the interface to create
    pub interface_name: String,

    /// Parsed tunnel configuration
    pub configuration: VpnConfiguration,
}

/// Details about a running adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Interface name
    pub name: String,

    /// Addresses assigned to the interface
    pub addresses: Vec<String>,

    /// MTU the interface was brought up with
    pub mtu: Option<u32>,

    /// Number of configured peers
    pub peers: usize,
}

impl AdapterInfo {
    pub(crate) fn from_request(request: &StartRequest, mtu: Option<u32>) -> Self {
        AdapterInfo {
            name: request.interface_name.clone(),
            addresses: request
                .configuration
                .addresses
                .iter()
                .map(ToString::to_string)
                .collect(),
            mtu,
            peers: request.configuration.peers.len(),
        }
    }
}

/// Platform service trait
///
/// Adapter state belongs to the platform, not to whoever started it, so a
/// tunnel brought up through one context is visible from any other.
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create and configure an adapter
    async fn start(&self, request: &StartRequest) -> PlatformResult<AdapterInfo>;

    /// Remove an adapter. The configuration, when known, drives hooks and
    /// DNS cleanup.
    async fn stop(
        &self,
        interface: &str,
        configuration: Option<&VpnConfiguration>,
    ) -> PlatformResult<()>;

    /// Whether an adapter with this name exists
    async fn is_up(&self, interface: &str) -> PlatformResult<bool>;

    /// Configuration a running adapter reports, as `wg showconf` prints it
    async fn running_configuration(&self, interface: &str) -> PlatformResult<VpnConfiguration>;

    /// Names of the adapters currently present
    async fn adapters(&self) -> PlatformResult<Vec<String>>;
}

/// Create the platform service selected by the settings.
///
/// The memory backend is process-wide so that every context observes the
/// same adapters, the way the kernel backend does.
pub fn create_platform(settings: &TunnelConfig) -> Arc<dyn PlatformService> {
    match settings.backend {
        Backend::Kernel => Arc::new(KernelPlatform::new(settings.run_hooks)),
        Backend::Memory => MemoryPlatform::shared(),
    }
}
