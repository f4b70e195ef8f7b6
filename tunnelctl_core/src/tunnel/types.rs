//! Type definitions for the tunnel module.

use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::tunnel::error::{TunnelError, TunnelResult};

/// Identity of an established tunnel within one execution context.
///
/// Handles are never zero; at the C boundary `0` means failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelHandle(NonZeroU64);

impl TunnelHandle {
    /// Raw integer value of the handle.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Rebuild a handle from its raw value; `None` for zero.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(TunnelHandle)
    }
}

impl fmt::Display for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TunnelHandle> for u64 {
    fn from(handle: TunnelHandle) -> Self {
        handle.get()
    }
}

/// Hands out handles for one context. Values are never reused.
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        HandleAllocator { next: 1 }
    }

    pub(crate) fn allocate(&mut self) -> TunnelResult<TunnelHandle> {
        let handle = TunnelHandle::from_raw(self.next)
            .ok_or_else(|| TunnelError::Internal("handle space exhausted".to_string()))?;
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| TunnelError::Internal("handle space exhausted".to_string()))?;
        Ok(handle)
    }
}

/// State of the tunnel for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// No tunnel exists for the configuration
    Down,
    /// The tunnel is established
    Up,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Down => write!(f, "down"),
            TunnelState::Up => write!(f, "up"),
        }
    }
}

/// The two reserved flag words accepted by `up` and `down`.
///
/// Both must currently be zero; any other value is rejected so the words
/// can be given a meaning later without silently changing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReservedFlags {
    pub first: i32,
    pub second: i32,
}

impl ReservedFlags {
    pub const NONE: ReservedFlags = ReservedFlags {
        first: 0,
        second: 0,
    };

    pub fn new(first: i32, second: i32) -> Self {
        ReservedFlags { first, second }
    }

    pub(crate) fn check(self) -> TunnelResult<()> {
        if self == Self::NONE {
            Ok(())
        } else {
            Err(TunnelError::InvalidArgument(format!(
                "reserved flags must be zero (got {}, {})",
                self.first, self.second
            )))
        }
    }
}

/// Result of a successful `down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownOutcome {
    /// The tunnel was up and has been taken down
    Stopped,
    /// Nothing to do, the tunnel was already down
    AlreadyDown,
}

/// Bookkeeping for a tunnel brought up through a context.
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    /// Handle returned by `up`
    pub handle: TunnelHandle,
    /// Interface the tunnel lives on
    pub interface: String,
    /// Configuration file, when the reference named one
    pub source: Option<PathBuf>,
    /// Number of peers configured
    pub peers: usize,
    /// When the tunnel was brought up
    pub created_at: Instant,
}

impl TunnelInfo {
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }
}
