//! Scoped overrides of process-wide environment variables.
//!
//! Some backends locate their installation through an environment variable, which is
//! genuinely process-wide shared mutable state. [`EnvironmentOverride`] models the
//! mutation as a scoped resource: the prior value is captured on acquisition and
//! restored exactly once when the guard drops, on every exit path. An advisory
//! per-process registry rejects a second live override for the same variable, since
//! two overlapping experiments would otherwise restore each other's values.

use std::collections::BTreeSet;
use std::env;
use std::ffi::{OsStr, OsString};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

static ACTIVE_OVERRIDES: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

/// A second live override was requested for a variable that is already overridden.
#[derive(Debug, Error)]
#[error("environment variable `{key}` is already overridden by an in-flight experiment")]
pub struct ScopeInUseError {
    /// The contested variable.
    pub key: String,
}

/// Scoped override of one environment variable.
///
/// Distinguishes an absent prior value from an empty one: a variable that was unset
/// before acquisition is unset again on release.
///
/// # Examples
///
/// ```
/// use build_bench::environment::EnvironmentOverride;
///
/// assert!(std::env::var_os("DOC_EXAMPLE_HOME").is_none());
/// {
///     let _scope = EnvironmentOverride::acquire("DOC_EXAMPLE_HOME", "/opt/tool").unwrap();
///     assert_eq!(std::env::var("DOC_EXAMPLE_HOME").unwrap(), "/opt/tool");
/// }
/// assert!(std::env::var_os("DOC_EXAMPLE_HOME").is_none());
/// ```
#[derive(Debug)]
pub struct EnvironmentOverride {
    key: String,
    previous: Option<OsString>,
}

impl EnvironmentOverride {
    /// Captures the prior value of `key`, then overrides it with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeInUseError`] when another override for `key` is still live in
    /// this process.
    pub fn acquire(
        key: impl Into<String>,
        value: impl AsRef<OsStr>,
    ) -> Result<Self, ScopeInUseError> {
        let key = key.into();
        let mut active = ACTIVE_OVERRIDES
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return Err(ScopeInUseError { key });
        }
        drop(active);

        let previous = env::var_os(&key);
        env::set_var(&key, value);
        log::debug!("overrode environment variable `{key}`");
        Ok(Self { key, previous })
    }

    /// The overridden variable.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value captured before the override, `None` if the variable was unset.
    #[must_use]
    pub fn previous(&self) -> Option<&OsStr> {
        self.previous.as_deref()
    }
}

impl Drop for EnvironmentOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => env::set_var(&self.key, previous),
            None => env::remove_var(&self.key),
        }
        ACTIVE_OVERRIDES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        log::debug!("restored environment variable `{}`", self.key);
    }
}
