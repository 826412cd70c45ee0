use crate::Child::ChildContext;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;

// Error codes
const REPLAY_IPC_SUCCESS: i32 = 0;
const REPLAY_IPC_ERROR_NULL_POINTER: i32 = -1;
const REPLAY_IPC_ERROR_NO_CONTEXT: i32 = -2;

/// Returned by `replay_ipc_fork_id` when no context is installed.
pub const REPLAY_IPC_NO_FORK_ID: u32 = u32::MAX;

lazy_static! {
    // C callers have no handle to pass, so the process's context is reached
    // through here.
    static ref INSTALLED_CONTEXT: RwLock<Option<Arc<ChildContext>>> = RwLock::new(None);
}

/// Make `ctx` the context used by the C entry points.
pub fn install_context(ctx: Arc<ChildContext>) {
    *INSTALLED_CONTEXT.write() = Some(ctx);
}

pub fn uninstall_context() {
    *INSTALLED_CONTEXT.write() = None;
}

pub fn installed_context() -> Option<Arc<ChildContext>> {
    INSTALLED_CONTEXT.read().clone()
}

fn with_text<F>(text: *const c_char, f: F) -> i32
where
    F: FnOnce(&ChildContext, &str),
{
    if text.is_null() {
        return REPLAY_IPC_ERROR_NULL_POINTER;
    }
    let ctx = match installed_context() {
        Some(ctx) => ctx,
        None => return REPLAY_IPC_ERROR_NO_CONTEXT,
    };
    let text = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    f(&ctx, &text);
    REPLAY_IPC_SUCCESS
}

// -----------------------------------------------------------------------------
// Crash reporting API
// -----------------------------------------------------------------------------

/// Report a crash detected outside this library.
///
/// # Arguments
/// * `message` - NUL-terminated description of the crash.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn replay_ipc_report_crash(message: *const c_char) -> i32 {
    with_text(message, |ctx, text| ctx.send_fatal_error(text))
}

/// Replace the innermost crash note.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn replay_ipc_set_crash_note(note: *const c_char) -> i32 {
    with_text(note, |ctx, text| ctx.set_crash_note(text))
}

/// Fork id of the installed context, or `u32::MAX` when there is none.
#[no_mangle]
pub extern "C" fn replay_ipc_fork_id() -> u32 {
    installed_context()
        .map(|ctx| ctx.fork_id())
        .unwrap_or(REPLAY_IPC_NO_FORK_ID)
}
