// src/registry/deferred.rs

//! Deferred statics and the dispatched program's argument vector

use std::ffi::OsString;
use std::fmt;
use std::ops::Deref;
use std::sync::{Mutex, OnceLock};

/// A static whose value is assigned by its program's var-init stage
///
/// Merged programs declare their runtime-initialized statics as
/// `Deferred<T>` and assign them before `init` and `main` run. Reads go
/// through `Deref`, so existing uses of the static keep compiling.
///
/// `set` and `get` are associated functions (`Deferred::set(&X, v)`) so
/// they never shadow methods of `T`.
pub struct Deferred<T> {
    cell: OnceLock<T>,
}

impl<T> Deferred<T> {
    /// Create an unassigned static
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Assign the value; the first assignment wins
    pub fn set(this: &Self, value: T) {
        let _ = this.cell.set(value);
    }

    /// Get the value if the var-init stage has run
    pub fn get(this: &Self) -> Option<&T> {
        this.cell.get()
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for Deferred<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.cell.get() {
            Some(value) => value,
            None => panic!(
                "deferred static of type {} read before its program's var-init stage",
                std::any::type_name::<T>()
            ),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("Deferred").field(value).finish(),
            None => f.write_str("Deferred(<unset>)"),
        }
    }
}

static ARGS: Mutex<Option<Vec<OsString>>> = Mutex::new(None);

/// Record the argument vector of the program about to be dispatched
pub(crate) fn set_args(argv: Vec<OsString>) {
    let mut args = ARGS.lock().unwrap_or_else(|e| e.into_inner());
    *args = Some(argv);
}

/// Arguments of the dispatched program, starting with its invocation name
///
/// Equivalent to `std::env::args_os()` except when the multicall binary was
/// invoked under its own name, in which case the leading binary name is
/// dropped.
pub fn args_os() -> std::vec::IntoIter<OsString> {
    let args = ARGS.lock().unwrap_or_else(|e| e.into_inner());
    match args.as_ref() {
        Some(argv) => argv.clone().into_iter(),
        None => std::env::args_os().collect::<Vec<_>>().into_iter(),
    }
}

/// Like [`args_os`], panicking on arguments that are not valid Unicode
pub fn args() -> std::vec::IntoIter<String> {
    args_os()
        .map(|arg| {
            arg.into_string()
                .unwrap_or_else(|arg| panic!("argument is not valid Unicode: {:?}", arg))
        })
        .collect::<Vec<_>>()
        .into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    static TABLE: Deferred<HashMap<&'static str, u32>> = Deferred::new();
    static UNSET: Deferred<Vec<u8>> = Deferred::new();

    #[test]
    fn test_deferred_set_then_deref() {
        assert!(Deferred::get(&TABLE).is_none());
        Deferred::set(&TABLE, HashMap::from([("one", 1)]));
        // Methods of the wrapped map stay reachable through Deref
        assert_eq!(TABLE.get("one"), Some(&1));
        assert_eq!(TABLE.len(), 1);

        // Second assignment is ignored
        Deferred::set(&TABLE, HashMap::new());
        assert_eq!(TABLE.len(), 1);
    }

    #[test]
    #[should_panic(expected = "read before its program's var-init stage")]
    fn test_deferred_read_before_set_panics() {
        let _ = UNSET.len();
    }

    #[test]
    fn test_deferred_debug() {
        let value: Deferred<u8> = Deferred::new();
        assert_eq!(format!("{:?}", value), "Deferred(<unset>)");
        Deferred::set(&value, 7);
        assert_eq!(format!("{:?}", value), "Deferred(7)");
    }
}
