//! In-process backend.
//!
//! Adapters live in a map instead of the kernel. Used by tests and by
//! `--backend memory` for dry runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info};

use super::{AdapterInfo, PlatformError, PlatformResult, PlatformService, StartRequest};
use crate::config::VpnConfiguration;

/// Operation a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
}

#[derive(Debug)]
struct Adapter {
    info: AdapterInfo,
    configuration: VpnConfiguration,
}

#[derive(Debug, Default)]
struct State {
    adapters: BTreeMap<String, Adapter>,
    failures: Vec<(Operation, PlatformError)>,
}

/// Memory backend
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance used when the settings select the memory backend.
    pub fn shared() -> Arc<MemoryPlatform> {
        static SHARED: OnceLock<Arc<MemoryPlatform>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(MemoryPlatform::new())))
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn inject_failure(&self, operation: Operation, error: PlatformError) {
        self.lock().failures.push((operation, error));
    }

    /// Snapshot of a running adapter
    pub fn adapter(&self, name: &str) -> Option<AdapterInfo> {
        self.lock().adapters.get(name).map(|a| a.info.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(state: &mut State, operation: Operation) -> Option<PlatformError> {
        let index = state.failures.iter().position(|(op, _)| *op == operation)?;
        Some(state.failures.remove(index).1)
    }
}

#[async_trait]
impl PlatformService for MemoryPlatform {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn start(&self, request: &StartRequest) -> PlatformResult<AdapterInfo> {
        let mut state = self.lock();
        if let Some(err) = Self::take_failure(&mut state, Operation::Start) {
            return Err(err);
        }
        let name = &request.interface_name;
        if state.adapters.contains_key(name) {
            return Err(PlatformError::AdapterExists(name.clone()));
        }
        let info = AdapterInfo::from_request(request, request.configuration.mtu);
        state.adapters.insert(
            name.clone(),
            Adapter {
                info: info.clone(),
                configuration: request.configuration.clone(),
            },
        );
        info!(interface = %name, "Adapter created");
        Ok(info)
    }

    async fn stop(
        &self,
        interface: &str,
        _configuration: Option<&VpnConfiguration>,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        if let Some(err) = Self::take_failure(&mut state, Operation::Stop) {
            return Err(err);
        }
        match state.adapters.remove(interface) {
            Some(_) => {
                info!(interface, "Adapter removed");
                Ok(())
            }
            None => Err(PlatformError::NotFound(interface.to_string())),
        }
    }

    async fn is_up(&self, interface: &str) -> PlatformResult<bool> {
        let up = self.lock().adapters.contains_key(interface);
        debug!(interface, up, "Checked adapter");
        Ok(up)
    }

    /// The configuration the adapter was started with, as the kernel would
    /// report it: keys `wg` does not know about are absent.
    async fn running_configuration(&self, interface: &str) -> PlatformResult<VpnConfiguration> {
        let state = self.lock();
        let adapter = state
            .adapters
            .get(interface)
            .ok_or_else(|| PlatformError::NotFound(interface.to_string()))?;
        VpnConfiguration::parse(&adapter.configuration.strip())
            .map_err(|e| PlatformError::Other(e.to_string()))
    }

    async fn adapters(&self) -> PlatformResult<Vec<String>> {
        Ok(self.lock().adapters.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "[Interface]\n\
        PrivateKey = OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE=\n\
        Address = 10.8.0.2/24\n\
        MTU = 1380\n";

    fn request(name: &str) -> StartRequest {
        StartRequest {
            interface_name: name.to_string(),
            configuration: VpnConfiguration::parse(CONFIG).unwrap(),
        }
    }

    #[tokio::test]
    async fn start_and_stop() {
        let platform = MemoryPlatform::new();
        let info = platform.start(&request("wg0")).await.unwrap();
        assert_eq!(info.addresses, vec!["10.8.0.2/24"]);
        assert_eq!(info.mtu, Some(1380));
        assert!(platform.is_up("wg0").await.unwrap());
        assert!(matches!(
            platform.start(&request("wg0")).await,
            Err(PlatformError::AdapterExists(_))
        ));

        platform.stop("wg0", None).await.unwrap();
        assert!(!platform.is_up("wg0").await.unwrap());
        assert!(matches!(
            platform.stop("wg0", None).await,
            Err(PlatformError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn running_configuration_drops_wg_quick_keys() {
        let platform = MemoryPlatform::new();
        assert!(matches!(
            platform.running_configuration("wg2").await,
            Err(PlatformError::NotFound(_))
        ));

        platform.start(&request("wg2")).await.unwrap();
        let running = platform.running_configuration("wg2").await.unwrap();
        assert_eq!(
            running.private_key,
            "OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE="
        );
        assert!(running.addresses.is_empty());
        assert_eq!(running.mtu, None);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let platform = MemoryPlatform::new();
        platform.inject_failure(
            Operation::Start,
            PlatformError::Permission("not root".into()),
        );
        assert!(matches!(
            platform.start(&request("wg1")).await,
            Err(PlatformError::Permission(_))
        ));
        assert!(platform.adapters().await.unwrap().is_empty());
        platform.start(&request("wg1")).await.unwrap();
        assert_eq!(platform.adapters().await.unwrap(), vec!["wg1"]);
    }
}
