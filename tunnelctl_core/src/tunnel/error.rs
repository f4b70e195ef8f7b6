//! Error types for the tunnel module.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::config::WgConfigError;
use crate::platform::PlatformError;

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Error types that can occur in tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The referenced configuration does not exist
    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    /// The configuration could not be parsed or validated
    #[error("Invalid configuration in {name}: {source}")]
    InvalidConfig {
        name: String,
        #[source]
        source: WgConfigError,
    },

    /// Bad reference, interface name or reserved flags
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A tunnel for this configuration is already up
    #[error("Tunnel already up: {0}")]
    AlreadyUp(String),

    /// Platform layer error
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No execution context could be acquired
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Anything that should not happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Integer status codes exposed at the C boundary and by the CLI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok = 0,
    ConfigNotFound = 1,
    InvalidConfig = 2,
    InvalidArgument = 3,
    AlreadyUp = 4,
    Platform = 5,
    Permission = 6,
    Io = 7,
    ResourceExhausted = 8,
    Internal = 9,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Short machine-friendly name.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::ConfigNotFound => "config_not_found",
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::AlreadyUp => "already_up",
            ErrorCode::Platform => "platform",
            ErrorCode::Permission => "permission",
            ErrorCode::Io => "io",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

impl From<&TunnelError> for ErrorCode {
    fn from(err: &TunnelError) -> Self {
        match err {
            TunnelError::ConfigNotFound(_) => ErrorCode::ConfigNotFound,
            TunnelError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            TunnelError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            TunnelError::AlreadyUp(_) => ErrorCode::AlreadyUp,
            TunnelError::Platform(PlatformError::Permission(_)) => ErrorCode::Permission,
            TunnelError::Platform(_) => ErrorCode::Platform,
            TunnelError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                ErrorCode::Permission
            }
            TunnelError::Io(_) => ErrorCode::Io,
            TunnelError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            TunnelError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl TunnelError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_failure_has_a_non_zero_code() {
        let errors = vec![
            TunnelError::ConfigNotFound("missing.conf".into()),
            TunnelError::InvalidConfig {
                name: "wg0".into(),
                source: WgConfigError::MissingKey {
                    section: "Interface",
                    key: "PrivateKey",
                },
            },
            TunnelError::InvalidArgument("x".into()),
            TunnelError::AlreadyUp("wg0".into()),
            TunnelError::Platform(PlatformError::SystemCommand("boom".into())),
            TunnelError::Platform(PlatformError::Permission("root".into())),
            TunnelError::Io(io::Error::other("disk")),
            TunnelError::ResourceExhausted("pool".into()),
            TunnelError::Internal("bug".into()),
        ];
        for err in &errors {
            assert!(!err.code().is_ok(), "{err} mapped to Ok");
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Ok.as_i32(), 0);
        assert_eq!(
            TunnelError::ConfigNotFound("a".into()).code().as_i32(),
            1
        );
        assert_eq!(TunnelError::AlreadyUp("wg0".into()).code(), ErrorCode::AlreadyUp);
        assert_eq!(
            TunnelError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).code(),
            ErrorCode::Permission
        );
        assert_eq!(ErrorCode::ConfigNotFound.name(), "config_not_found");
    }
}
