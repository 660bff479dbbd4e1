//! C ABI boundary for ParamStore
//!
//! Other runtimes only ever need one thing from this library without opening
//! a store: the default value of a built-in key. This crate exposes exactly
//! that, over [`KeyRegistry::builtin`], with no store instance and no I/O.
//!
//! ```c
//! const char *get_default_param(const char *key);
//! ```
//!
//! Returned pointers are NUL-terminated, owned by the library, and valid for
//! the life of the process. Callers must not free them.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use paramstore_core::KeyRegistry;

/// Built-in defaults as C strings, built on first use.
static DEFAULTS: Lazy<HashMap<String, CString>> =
    Lazy::new(|| defaults_table(&KeyRegistry::builtin()));

fn defaults_table(registry: &KeyRegistry) -> HashMap<String, CString> {
    registry
        .iter()
        // A default with an interior NUL cannot cross the boundary.
        .filter_map(|k| CString::new(k.default_value.as_str()).ok().map(|c| (k.name.clone(), c)))
        .collect()
}

/// Safe lookup behind the exported function.
pub fn default_param(key: &str) -> Option<&'static CStr> {
    DEFAULTS.get(key).map(|c| c.as_c_str())
}

/// Default value for `key`, or null for a null pointer, non-UTF-8 input,
/// or an unregistered key.
///
/// # Safety
/// `key` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn get_default_param(key: *const c_char) -> *const c_char {
    if key.is_null() {
        return ptr::null();
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let key = unsafe { CStr::from_ptr(key) };
    match key.to_str().ok().and_then(default_param) {
        Some(value) => value.as_ptr(),
        None => ptr::null(),
    }
}
