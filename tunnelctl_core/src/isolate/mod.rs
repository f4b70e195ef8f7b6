//! Execution contexts.
//!
//! An [`ExecutionContext`] is an initialized isolate with the calling thread
//! attached: it owns a current-thread runtime and a [`TunnelController`].
//! Contexts come from an [`IsolateManager`], which hands out a bounded
//! number of them. A context is released exactly once, either by
//! [`ExecutionContext::teardown`] or when it is dropped.

use std::fmt;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use crate::config::{Config, TunnelConfig};
use crate::platform::{PlatformService, create_platform};
use crate::tunnel::{
    ConfigReference, DownOutcome, ErrorCode, ReservedFlags, TunnelController, TunnelError,
    TunnelHandle, TunnelResult, TunnelState,
};

/// Identity of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IsolateId(NonZeroU64);

impl IsolateId {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from creating an execution context.
#[derive(Debug, Error)]
pub enum IsolateError {
    /// All context slots are in use
    #[error("No isolate available: {limit} already in use")]
    ResourceExhausted { limit: usize },

    /// The context runtime could not be built
    #[error("Failed to start isolate runtime: {0}")]
    Runtime(#[from] io::Error),
}

impl From<&IsolateError> for ErrorCode {
    fn from(_: &IsolateError) -> Self {
        ErrorCode::ResourceExhausted
    }
}

impl From<IsolateError> for TunnelError {
    fn from(err: IsolateError) -> Self {
        TunnelError::ResourceExhausted(err.to_string())
    }
}

impl IsolateError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }
}

/// Returns its slot to the pool when dropped.
#[derive(Debug)]
struct SlotGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out execution contexts.
pub struct IsolateManager {
    platform: Arc<dyn PlatformService>,
    settings: TunnelConfig,
    max_isolates: usize,
    shutdown_timeout: Duration,
    live: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl IsolateManager {
    /// Create a manager whose contexts drive `platform`.
    pub fn new(config: &Config, platform: Arc<dyn PlatformService>) -> Self {
        IsolateManager {
            platform,
            settings: config.tunnel.clone(),
            max_isolates: config.isolate.max_isolates,
            shutdown_timeout: config.isolate.shutdown_timeout(),
            live: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a manager with the backend named in the settings.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, create_platform(&config.tunnel))
    }

    /// Allocate a context and attach the calling thread to it.
    ///
    /// On failure no context exists and no slot is held.
    pub fn create(&self) -> Result<ExecutionContext, IsolateError> {
        let limit = self.max_isolates;
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|_| {
                warn!(limit, "Isolate pool exhausted");
                IsolateError::ResourceExhausted { limit }
            })?;
        let slot = SlotGuard {
            live: Arc::clone(&self.live),
        };

        let runtime = Builder::new_current_thread().enable_all().build()?;

        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = NonZeroU64::new(raw)
            .map(IsolateId)
            .ok_or_else(|| IsolateError::ResourceExhausted { limit })?;

        info!(isolate = %id, backend = self.platform.name(), "Isolate created");
        Ok(ExecutionContext {
            id,
            runtime: Some(runtime),
            controller: TunnelController::new(Arc::clone(&self.platform), self.settings.clone()),
            last_error: ErrorCode::Ok,
            shutdown_timeout: self.shutdown_timeout,
            _slot: slot,
            _not_send: PhantomData,
        })
    }

    /// Run `f` with a fresh context, releasing it however `f` returns.
    pub fn scoped<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ExecutionContext) -> Result<T, E>,
        E: From<IsolateError>,
    {
        let mut ctx = self.create()?;
        let result = f(&mut ctx);
        ctx.teardown();
        result
    }

    /// Number of contexts currently held.
    pub fn live_isolates(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_isolates(&self) -> usize {
        self.max_isolates
    }

    pub fn platform(&self) -> &Arc<dyn PlatformService> {
        &self.platform
    }
}

/// An initialized isolate with the creating thread attached.
///
/// Not `Send`: every operation runs on the thread that created it, one at a
/// time. Must not be created or dropped from inside another async runtime.
pub struct ExecutionContext {
    id: IsolateId,
    runtime: Option<Runtime>,
    controller: TunnelController,
    last_error: ErrorCode,
    shutdown_timeout: Duration,
    _slot: SlotGuard,
    _not_send: PhantomData<*const ()>,
}

impl ExecutionContext {
    pub fn id(&self) -> IsolateId {
        self.id
    }

    /// Bring up the tunnel named by `reference`.
    ///
    /// The outcome also becomes [`last_error_code`](Self::last_error_code).
    pub fn up(&mut self, reference: &str, flags: ReservedFlags) -> TunnelResult<TunnelHandle> {
        let result = ConfigReference::parse(reference)
            .and_then(|reference| self.block_on(self.controller.up(&reference, flags))?);
        self.record(result)
    }

    /// Take down the tunnel named by `reference`.
    pub fn down(&mut self, reference: &str, flags: ReservedFlags) -> TunnelResult<DownOutcome> {
        let result = ConfigReference::parse(reference)
            .and_then(|reference| self.block_on(self.controller.down(&reference, flags))?);
        self.record(result)
    }

    /// Whether the tunnel named by `reference` is up. Does not touch the
    /// last error code.
    pub fn state(&self, reference: &str) -> TunnelResult<TunnelState> {
        let reference = ConfigReference::parse(reference)?;
        self.block_on(self.controller.state(&reference))?
    }

    /// Configuration for `reference` reduced to what `wg setconf` accepts.
    pub fn strip(&self, reference: &str) -> TunnelResult<String> {
        let reference = ConfigReference::parse(reference)?;
        let resolved = self.block_on(self.controller.resolve(&reference))??;
        resolved
            .configuration
            .map(|configuration| configuration.strip())
            .ok_or_else(|| TunnelError::ConfigNotFound(reference.to_string()))
    }

    /// Write the running state of the tunnel back to its configuration file.
    pub fn save(&self, reference: &str) -> TunnelResult<PathBuf> {
        let reference = ConfigReference::parse(reference)?;
        self.block_on(self.controller.save(&reference))?
    }

    /// Code of the most recent `up` or `down` on this context, `Ok` if it
    /// succeeded or nothing ran yet.
    pub fn last_error_code(&self) -> ErrorCode {
        self.last_error
    }

    pub fn controller(&self) -> &TunnelController {
        &self.controller
    }

    /// Detach the thread and release the context.
    pub fn teardown(mut self) {
        self.release();
    }

    fn block_on<F: Future>(&self, future: F) -> TunnelResult<F::Output> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| TunnelError::Internal(format!("isolate {} released", self.id)))?;
        Ok(runtime.block_on(future))
    }

    fn record<T>(&mut self, result: TunnelResult<T>) -> TunnelResult<T> {
        self.last_error = match &result {
            Ok(_) => ErrorCode::Ok,
            Err(e) => {
                debug!(isolate = %self.id, code = e.code().as_i32(), error = %e, "Operation failed");
                e.code()
            }
        };
        result
    }

    fn release(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let up = self.controller.tunnel_count();
            runtime.shutdown_timeout(self.shutdown_timeout);
            info!(isolate = %self.id, tunnels_up = up, "Isolate released");
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("last_error", &self.last_error)
            .field("tunnels", &self.controller.tunnel_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;

    fn manager(max: usize) -> IsolateManager {
        let mut config = Config::default();
        config.isolate.max_isolates = max;
        IsolateManager::new(&config, Arc::new(MemoryPlatform::new()))
    }

    #[test]
    fn contexts_hold_slots_until_released() {
        let mgr = manager(2);
        let a = mgr.create().unwrap();
        let b = mgr.create().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(mgr.live_isolates(), 2);

        let err = mgr.create().unwrap_err();
        assert!(matches!(err, IsolateError::ResourceExhausted { limit: 2 }));
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);

        a.teardown();
        assert_eq!(mgr.live_isolates(), 1);
        drop(b);
        assert_eq!(mgr.live_isolates(), 0);
    }

    #[test]
    fn scoped_releases_on_error() {
        let mgr = manager(1);
        let result: Result<(), TunnelError> = mgr.scoped(|ctx| {
            ctx.up("/definitely/not/here.conf", ReservedFlags::NONE)?;
            Ok(())
        });
        assert_eq!(result.unwrap_err().code(), ErrorCode::ConfigNotFound);
        assert_eq!(mgr.live_isolates(), 0);
    }

    #[test]
    fn last_error_tracks_the_latest_operation() {
        let mgr = manager(1);
        let mut ctx = mgr.create().unwrap();
        assert_eq!(ctx.last_error_code(), ErrorCode::Ok);

        assert!(ctx.up("", ReservedFlags::NONE).is_err());
        assert_eq!(ctx.last_error_code(), ErrorCode::InvalidArgument);

        ctx.down("wg9", ReservedFlags::NONE).unwrap();
        assert_eq!(ctx.last_error_code(), ErrorCode::Ok);
    }

    #[test]
    fn strip_keeps_only_wg_keys() {
        let mgr = manager(1);
        let ctx = mgr.create().unwrap();
        let text = "[Interface]\n\
            PrivateKey = OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE=\n\
            Address = 10.0.0.2/32\n\
            PostUp = echo hi\n";
        let stripped = ctx.strip(text).unwrap();
        assert!(stripped.starts_with("[Interface]\nPrivateKey = "));
        assert!(!stripped.contains("Address"));
        assert!(!stripped.contains("PostUp"));
        assert_eq!(ctx.last_error_code(), ErrorCode::Ok);
    }

    #[test]
    fn save_does_not_touch_last_error() {
        let mgr = manager(1);
        let ctx = mgr.create().unwrap();
        let err = ctx
            .save("[Interface]\nPrivateKey = OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE=\n")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(ctx.last_error_code(), ErrorCode::Ok);
    }
}
