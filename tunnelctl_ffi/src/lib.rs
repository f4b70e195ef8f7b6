//! C ABI for tunnelctl.
//!
//! A caller creates an isolate thread, brings tunnels up and down through
//! it, and tears it down exactly once:
//!
//! ```c
//! tunnelctl_isolate_thread *thread = NULL;
//! if (tunnelctl_create_isolate(&thread) != TUNNELCTL_ERROR_CODE_OK) return 1;
//! long long handle = tunnelctl_up(thread, "/etc/wireguard/wg0.conf", 0, 0);
//! if (handle == 0) printf("Code: %d\n", tunnelctl_last_error_code(thread));
//! tunnelctl_tear_down_isolate(thread);
//! ```
//!
//! Isolate threads are bound to the OS thread that created them. The C
//! header in `include/tunnelctl.h` is generated by `build.rs`.

use std::{
    ffi::{CStr, c_char, c_int, c_longlong},
    sync::OnceLock,
};

use tracing::{debug, warn};
use tunnelctl_core::{
    Config, DownOutcome, ErrorCode, ExecutionContext, IsolateManager, ReservedFlags,
};

use crate::error::{Error, Result, set_last_error};

mod error;

pub use error::tunnelctl_last_error_message;

static MANAGER: OnceLock<IsolateManager> = OnceLock::new();

/// Install the manager used by [`tunnelctl_create_isolate`].
///
/// Only the first call, made before any isolate exists, has an effect;
/// returns whether this call installed `manager`. Without it the manager is
/// built from the default settings file and `TUNNELCTL_*` environment.
pub fn install_manager(manager: IsolateManager) -> bool {
    MANAGER.set(manager).is_ok()
}

fn manager() -> &'static IsolateManager {
    MANAGER.get_or_init(|| {
        let config = Config::load_or_default(None).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid settings, using defaults");
            Config::default()
        });
        IsolateManager::from_config(&config)
    })
}

/// An execution context as seen from C.
pub struct IsolateThread {
    ctx: ExecutionContext,
    /// Failure raised at the boundary before the context saw the call
    boundary_error: Option<ErrorCode>,
}

impl IsolateThread {
    fn new(ctx: ExecutionContext) -> Self {
        IsolateThread {
            ctx,
            boundary_error: None,
        }
    }

    fn last_error_code(&self) -> ErrorCode {
        self.boundary_error
            .unwrap_or_else(|| self.ctx.last_error_code())
    }

    fn fail(&mut self, err: &Error) -> ErrorCode {
        set_last_error(err);
        let code = ErrorCode::from(err);
        if !matches!(err, Error::Tunnel(_)) {
            self.boundary_error = Some(code);
        }
        code
    }

    fn up(&mut self, config: &str, flags: ReservedFlags) -> Result<c_longlong> {
        let handle = self.ctx.up(config, flags)?;
        c_longlong::try_from(handle.get())
            .map_err(|_| Error::InvalidArgument("handle does not fit in long long"))
    }

    fn down(&mut self, config: &str, flags: ReservedFlags) -> Result<DownOutcome> {
        Ok(self.ctx.down(config, flags)?)
    }
}

/// Borrow a C string as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a valid, null-terminated C string.
unsafe fn config_arg<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::NullPointer("config"));
    }
    let raw = unsafe { CStr::from_ptr(ptr) };
    raw.to_str()
        .map_err(|_| Error::InvalidArgument("config is not valid UTF-8"))
}

/// Creates an isolate and attaches the calling thread to it.
///
/// Returns `Ok` and writes the new isolate thread to `out_thread` on success.
///
/// # Safety
///
/// `out_thread` must be a valid pointer to writable storage for one pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnelctl_create_isolate(
    out_thread: *mut *mut IsolateThread,
) -> ErrorCode {
    if out_thread.is_null() {
        let err = Error::NullPointer("out_thread");
        set_last_error(&err);
        return ErrorCode::from(&err);
    }
    let ctx = match manager().create() {
        Ok(ctx) => ctx,
        Err(e) => {
            let err = Error::from(e);
            set_last_error(&err);
            return ErrorCode::from(&err);
        }
    };
    debug!(isolate = %ctx.id(), "Isolate handed to C caller");
    let thread = Box::new(IsolateThread::new(ctx));
    unsafe { out_thread.write(Box::into_raw(thread)) };
    ErrorCode::Ok
}

/// Detaches the thread and releases the isolate.
///
/// # Safety
///
/// `thread` must come from [`tunnelctl_create_isolate`] and must not be used
/// after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnelctl_tear_down_isolate(thread: *mut IsolateThread) -> ErrorCode {
    if thread.is_null() {
        let err = Error::NullPointer("thread");
        set_last_error(&err);
        return ErrorCode::from(&err);
    }
    let thread = unsafe { *Box::from_raw(thread) };
    thread.ctx.teardown();
    ErrorCode::Ok
}

/// Brings up the tunnel named by `config`.
///
/// Returns a non-zero handle, or 0 on failure; the failure code is then
/// available from [`tunnelctl_last_error_code`]. Both reserved arguments
/// must be 0.
///
/// # Safety
///
/// `thread` must be a live isolate thread and `config` a valid,
/// null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnelctl_up(
    thread: *mut IsolateThread,
    config: *const c_char,
    reserved1: c_int,
    reserved2: c_int,
) -> c_longlong {
    let Some(thread) = (unsafe { thread.as_mut() }) else {
        set_last_error(&Error::NullPointer("thread"));
        return 0;
    };
    thread.boundary_error = None;
    let result = unsafe { config_arg(config) }
        .and_then(|config| thread.up(config, ReservedFlags::new(reserved1, reserved2)));
    match result {
        Ok(handle) => handle,
        Err(e) => {
            thread.fail(&e);
            0
        }
    }
}

/// Takes down the tunnel named by `config`.
///
/// Returns `Ok` when the tunnel was stopped or was not up, otherwise the
/// error code, which is also recorded as the last error.
///
/// # Safety
///
/// Same as [`tunnelctl_up`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnelctl_down(
    thread: *mut IsolateThread,
    config: *const c_char,
    reserved1: c_int,
    reserved2: c_int,
) -> ErrorCode {
    let Some(thread) = (unsafe { thread.as_mut() }) else {
        let err = Error::NullPointer("thread");
        set_last_error(&err);
        return ErrorCode::from(&err);
    };
    thread.boundary_error = None;
    let result = unsafe { config_arg(config) }
        .and_then(|config| thread.down(config, ReservedFlags::new(reserved1, reserved2)));
    match result {
        Ok(outcome) => {
            debug!(?outcome, "Down from C caller");
            ErrorCode::Ok
        }
        Err(e) => thread.fail(&e),
    }
}

/// Code of the most recent `up` or `down` on `thread`; `Ok` if it succeeded.
///
/// # Safety
///
/// `thread` must be null or a live isolate thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnelctl_last_error_code(thread: *const IsolateThread) -> ErrorCode {
    match unsafe { thread.as_ref() } {
        Some(thread) => thread.last_error_code(),
        None => ErrorCode::Internal,
    }
}
