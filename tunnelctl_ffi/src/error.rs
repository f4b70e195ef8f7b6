use std::{
    cell::RefCell,
    ffi::{CString, c_char},
};

use tunnelctl_core::{ErrorCode, IsolateError, TunnelError};

thread_local! {
    static LAST_MESSAGE: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Message of the most recent failure on the calling thread, or null.
///
/// The pointer stays valid until the next failing call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn tunnelctl_last_error_message() -> *const c_char {
    LAST_MESSAGE.with(|slot| slot.borrow().as_ref().map_or(std::ptr::null(), |m| m.as_ptr()))
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Null pointer: {0}")]
    NullPointer(&'static str),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Isolate(#[from] IsolateError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::NullPointer(_) => ErrorCode::Internal,
            Error::Tunnel(e) => e.code(),
            Error::Isolate(e) => e.code(),
        }
    }
}

pub fn set_last_error(err: &Error) {
    let message = CString::new(err.to_string())
        .unwrap_or_else(|_| CString::from(c"error message contains a NUL byte"));
    LAST_MESSAGE.with(|slot| {
        *slot.borrow_mut() = Some(message);
    });
}
