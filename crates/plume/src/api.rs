//! C-style embedding surface.
//!
//! These exports mirror the host contract: `init_config` installs a JSON
//! configuration, the three mode functions return 0 on success and 1 on any
//! unhandled error, and the event-bus trio bridges host callbacks. Null
//! callbacks subscribe as id 0; unsubscribing id 0 is a no-op; null or
//! non-UTF-8 payloads are ignored.

use std::ffi::{CStr, CString, c_char};

use crate::{
    config,
    event_bus::{self, EventKind},
    run,
};

/// Host callback invoked with the event payload as a C string.
pub type EventCallback = Option<unsafe extern "C" fn(*const c_char)>;

/// Installs the configuration from a JSON object string.
///
/// # Safety
/// `config_json` must be null or point at a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn init_config(config_json: *const c_char) {
    let Some(text) = read_c_str(config_json) else {
        return;
    };
    let _ = config::init(&text);
}

/// Compiles the configured input, writing a `.code` file beside it.
#[unsafe(no_mangle)]
pub extern "C" fn compile() -> i32 {
    run::exit_code(&run::compile())
}

/// Compiles and executes the configured input.
#[unsafe(no_mangle)]
pub extern "C" fn interpret() -> i32 {
    run::exit_code(&run::interpret())
}

/// Reads and executes the configured `.code` file.
#[unsafe(no_mangle)]
pub extern "C" fn interpret_bytecode() -> i32 {
    run::exit_code(&run::interpret_bytecode())
}

/// Subscribes a host callback to an event kind. Null callbacks and unknown
/// kinds return id 0.
#[unsafe(no_mangle)]
pub extern "C" fn eventbus_subscribe(kind: u8, callback: EventCallback) -> u32 {
    let Some(callback) = callback else {
        return 0;
    };
    let Some(kind) = EventKind::from_repr(kind) else {
        return 0;
    };
    event_bus::subscribe(
        kind,
        Box::new(move |data| {
            let Ok(payload) = CString::new(data) else {
                return;
            };
            // SAFETY: the host promised a callback that accepts a valid
            // NUL-terminated string; `payload` lives across the call.
            unsafe { callback(payload.as_ptr()) }
        }),
    )
}

/// Removes a subscription by id. Id 0 is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn eventbus_unsubscribe(id: u32) {
    event_bus::unsubscribe(id);
}

/// Publishes an event with a string payload. Null payloads and unknown
/// kinds are ignored.
///
/// # Safety
/// `data` must be null or point at a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn eventbus_publish(kind: u8, data: *const c_char) {
    let Some(kind) = EventKind::from_repr(kind) else {
        return;
    };
    let Some(payload) = read_c_str(data) else {
        return;
    };
    event_bus::publish(kind, &payload);
}

fn read_c_str(pointer: *const c_char) -> Option<String> {
    if pointer.is_null() {
        return None;
    }
    // SAFETY: non-null pointers on this surface are NUL-terminated strings
    // per the function contracts above.
    let text = unsafe { CStr::from_ptr(pointer) };
    text.to_str().ok().map(str::to_owned)
}
