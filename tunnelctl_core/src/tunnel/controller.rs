//! Tunnel controller.
//!
//! Brings tunnels up and down for one execution context and keeps track of
//! the handles it issued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TunnelConfig as TunnelSettings;
use crate::config::VpnConfiguration;
use crate::platform::{PlatformError, PlatformService, StartRequest};
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::reference::{ConfigReference, ResolvedConfig, resolve_for_down, resolve_for_up};
use crate::tunnel::types::{
    DownOutcome, HandleAllocator, ReservedFlags, TunnelHandle, TunnelInfo, TunnelState,
};

/// Controller for the tunnels of one execution context.
pub struct TunnelController {
    /// Backend that owns the adapters
    platform: Arc<dyn PlatformService>,

    /// Resolution and defaults
    settings: TunnelSettings,

    /// Tunnels brought up through this controller
    tunnels: Mutex<HashMap<TunnelHandle, TunnelInfo>>,

    allocator: Mutex<HandleAllocator>,
}

impl TunnelController {
    /// Create a new controller on top of a platform backend.
    pub fn new(platform: Arc<dyn PlatformService>, settings: TunnelSettings) -> Self {
        TunnelController {
            platform,
            settings,
            tunnels: Mutex::new(HashMap::new()),
            allocator: Mutex::new(HandleAllocator::new()),
        }
    }

    pub fn settings(&self) -> &TunnelSettings {
        &self.settings
    }

    pub fn platform(&self) -> &Arc<dyn PlatformService> {
        &self.platform
    }

    /// Bring up the tunnel described by `reference`.
    ///
    /// Fails with [`TunnelError::AlreadyUp`] if its interface already
    /// exists, whoever created it.
    pub async fn up(
        &self,
        reference: &ConfigReference,
        flags: ReservedFlags,
    ) -> TunnelResult<TunnelHandle> {
        flags.check()?;
        let resolved = resolve_for_up(reference, &self.settings).await?;
        let interface = resolved.interface;

        if self.platform.is_up(&interface).await? {
            return Err(TunnelError::AlreadyUp(interface));
        }

        let mut configuration = resolved
            .configuration
            .ok_or_else(|| TunnelError::Internal("resolved without configuration".to_string()))?;
        if configuration.mtu.is_none() {
            configuration.mtu = self.settings.default_mtu;
        }
        let peers = configuration.peers.len();

        let handle = self.allocator().allocate()?;
        debug!(handle = %handle, interface = %interface, backend = self.platform.name(), "Starting tunnel");

        let request = StartRequest {
            interface_name: interface.clone(),
            configuration,
        };
        match self.platform.start(&request).await {
            Ok(_) => {}
            Err(PlatformError::AdapterExists(name)) => return Err(TunnelError::AlreadyUp(name)),
            Err(e) => return Err(e.into()),
        }

        self.tunnels().insert(
            handle,
            TunnelInfo {
                handle,
                interface: interface.clone(),
                source: resolved.source,
                peers,
                created_at: Instant::now(),
            },
        );

        info!(handle = %handle, interface = %interface, "Tunnel up");
        Ok(handle)
    }

    /// Take down the tunnel described by `reference`.
    ///
    /// Taking down a tunnel that is not up succeeds with
    /// [`DownOutcome::AlreadyDown`]. With `SaveConfig = true` the running
    /// state is written back to the configuration file first.
    pub async fn down(
        &self,
        reference: &ConfigReference,
        flags: ReservedFlags,
    ) -> TunnelResult<DownOutcome> {
        flags.check()?;
        let resolved = resolve_for_down(reference, &self.settings).await?;
        let interface = resolved.interface;

        if !self.platform.is_up(&interface).await? {
            debug!(interface = %interface, "Tunnel already down");
            self.forget(&interface);
            return Ok(DownOutcome::AlreadyDown);
        }

        if let Some(configuration) = resolved.configuration.as_ref().filter(|c| c.save_config) {
            match &resolved.source {
                Some(path) => self.write_back(&interface, configuration, path).await?,
                None => warn!(interface = %interface, "SaveConfig set on an inline configuration, nothing to save to"),
            }
        }

        match self
            .platform
            .stop(&interface, resolved.configuration.as_ref())
            .await
        {
            Ok(()) => {}
            Err(PlatformError::NotFound(_)) => {
                self.forget(&interface);
                return Ok(DownOutcome::AlreadyDown);
            }
            Err(e) => return Err(e.into()),
        }

        self.forget(&interface);
        info!(interface = %interface, "Tunnel down");
        Ok(DownOutcome::Stopped)
    }

    /// Write the running state of the tunnel for `reference` back to its
    /// configuration file, keeping the file's `wg-quick` keys. Returns the
    /// file written.
    pub async fn save(&self, reference: &ConfigReference) -> TunnelResult<PathBuf> {
        let resolved = resolve_for_up(reference, &self.settings).await?;
        let path = resolved.source.ok_or_else(|| {
            TunnelError::InvalidArgument("inline configuration has no file to save to".to_string())
        })?;
        let configuration = resolved
            .configuration
            .ok_or_else(|| TunnelError::Internal("resolved without configuration".to_string()))?;

        if !self.platform.is_up(&resolved.interface).await? {
            return Err(PlatformError::NotFound(resolved.interface).into());
        }
        self.write_back(&resolved.interface, &configuration, &path)
            .await?;
        Ok(path)
    }

    async fn write_back(
        &self,
        interface: &str,
        configuration: &VpnConfiguration,
        path: &Path,
    ) -> TunnelResult<()> {
        let running = self.platform.running_configuration(interface).await?;
        let merged = configuration.with_runtime_state(&running);

        // Replace the file in one step so a crash never leaves it truncated
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, merged.write()).await?;
        tokio::fs::rename(&staging, path).await?;

        info!(interface, path = %path.display(), peers = merged.peers.len(), "Saved configuration");
        Ok(())
    }

    /// Resolve and parse the configuration for `reference` without bringing
    /// anything up.
    pub async fn resolve(&self, reference: &ConfigReference) -> TunnelResult<ResolvedConfig> {
        resolve_for_up(reference, &self.settings).await
    }

    /// Whether the tunnel for `reference` is up.
    pub async fn state(&self, reference: &ConfigReference) -> TunnelResult<TunnelState> {
        let interface = reference.interface_name(&self.settings)?;
        if self.platform.is_up(&interface).await? {
            Ok(TunnelState::Up)
        } else {
            Ok(TunnelState::Down)
        }
    }

    /// Bookkeeping for a handle issued by this controller.
    pub fn tunnel(&self, handle: TunnelHandle) -> Option<TunnelInfo> {
        self.tunnels().get(&handle).cloned()
    }

    /// Tunnels brought up through this controller and not yet taken down.
    pub fn tunnels_up(&self) -> Vec<TunnelInfo> {
        let mut list: Vec<TunnelInfo> = self.tunnels().values().cloned().collect();
        list.sort_by_key(|info| info.handle);
        list
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels().len()
    }

    fn forget(&self, interface: &str) {
        let mut tunnels = self.tunnels();
        let before = tunnels.len();
        tunnels.retain(|_, info| info.interface != interface);
        if tunnels.len() != before {
            debug!(interface, "Released handle");
        }
    }

    fn tunnels(&self) -> MutexGuard<'_, HashMap<TunnelHandle, TunnelInfo>> {
        self.tunnels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocator(&self) -> MutexGuard<'_, HandleAllocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TunnelController {
    fn drop(&mut self) {
        let remaining = self.tunnels().len();
        if remaining > 0 {
            warn!(remaining, "Controller released with tunnels still up; they stay up");
        }
    }
}
