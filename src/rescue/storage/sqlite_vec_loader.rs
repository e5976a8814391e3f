//! sqlite-vec extension registration.
//!
//! Kept apart so the crate's only unsafe block stays small.

use std::ffi::c_char;
use std::sync::Once;

use rusqlite::ffi::{sqlite3, sqlite3_api_routines, sqlite3_auto_extension};
use sqlite_vec::sqlite3_vec_init;

type SqliteExtensionFn =
    unsafe extern "C" fn(*mut sqlite3, *mut *mut c_char, *const sqlite3_api_routines) -> i32;

static REGISTER: Once = Once::new();

/// Register sqlite-vec as an auto extension for every connection opened afterwards.
///
/// Idempotent; the embedded store calls it before opening its connection.
#[allow(unsafe_code)]
pub fn init_sqlite_vec_extension() {
    REGISTER.call_once(|| {
        // SAFETY: sqlite3_auto_extension takes an extension entry point with the
        // standard signature; sqlite3_vec_init from the sqlite-vec crate is one.
        unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute::<*const (), SqliteExtensionFn>(
                sqlite3_vec_init as *const (),
            )));
        }
    });
}
