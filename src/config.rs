//! Transport configuration.
//!
//! Configuration is a small key/value store. Each registered option has a
//! default held in a [`TransportDefaults`] registry, and a [`ConfigOpts`]
//! instance may override any option, either with a value or as explicitly
//! unset. Lookups consult the override first and fall back to the default.
//!
//! Defaults are shared: every `ConfigOpts` created with [`ConfigOpts::new`]
//! reads the process-wide registry returned by [`global_defaults`], so a
//! default changed with [`set_transport_defaults`] is seen by every
//! resolution performed afterwards. Tests that need isolation build their
//! own registry and pass it to [`ConfigOpts::with_defaults`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::{log_debug, MessagingError, Result};

/// URL identifying the transport, e.g. `"memory://tests"`.
pub const TRANSPORT_URL: &str = "transport_url";

/// Legacy bare backend name, used when no URL is configured.
pub const RPC_BACKEND: &str = "rpc_backend";

/// Default exchange handed to drivers.
pub const CONTROL_EXCHANGE: &str = "control_exchange";

/// Every option the transport layer reads.
pub const TRANSPORT_OPTS: [&str; 3] = [TRANSPORT_URL, RPC_BACKEND, CONTROL_EXCHANGE];

fn check_option(name: &str) -> Result<()> {
    if TRANSPORT_OPTS.iter().any(|opt| *opt == name) {
        Ok(())
    } else {
        Err(MessagingError::no_such_option(name))
    }
}

// Poisoning only means another thread panicked mid-update of a plain map;
// the data is still usable.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of option defaults.
///
/// Starts with every option defaulting to unset.
#[derive(Debug, Default)]
pub struct TransportDefaults {
    // ---
    values: RwLock<HashMap<String, Option<String>>>,
}

impl TransportDefaults {
    /// Create a new, independent registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current default of `name`.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        check_option(name)?;
        Ok(read(&self.values).get(name).cloned().flatten())
    }

    /// Replace the default of `name`.
    ///
    /// Resolutions already completed are unaffected. Later resolutions whose
    /// configuration does not override `name` see the new value.
    pub fn set_default(&self, name: &str, value: Option<&str>) -> Result<()> {
        // ---
        check_option(name)?;
        log_debug!("set default {name} = {value:?}");

        write(&self.values).insert(name.to_string(), value.map(str::to_string));
        Ok(())
    }

    /// Apply a default for the lifetime of the returned guard.
    ///
    /// The prior default is restored when the guard is dropped.
    ///
    /// ```
    /// use mom_transport::{TransportDefaults, CONTROL_EXCHANGE};
    ///
    /// let defaults = TransportDefaults::new();
    /// {
    ///     let _guard = defaults.scoped_default(CONTROL_EXCHANGE, Some("foo")).unwrap();
    ///     assert_eq!(defaults.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("foo"));
    /// }
    /// assert_eq!(defaults.get(CONTROL_EXCHANGE).unwrap(), None);
    /// ```
    pub fn scoped_default(&self, name: &str, value: Option<&str>) -> Result<DefaultsGuard<'_>> {
        // ---
        let prior = self.get(name)?;
        self.set_default(name, value)?;

        Ok(DefaultsGuard {
            defaults: self,
            name: name.to_string(),
            prior,
        })
    }
}

/// Restores an option default when dropped.
///
/// Returned by [`TransportDefaults::scoped_default`].
#[must_use = "the prior default is restored as soon as the guard is dropped"]
pub struct DefaultsGuard<'a> {
    defaults: &'a TransportDefaults,
    name: String,
    prior: Option<String>,
}

impl Drop for DefaultsGuard<'_> {
    fn drop(&mut self) {
        // The name was validated when the guard was created.
        let _ = self.defaults.set_default(&self.name, self.prior.as_deref());
    }
}

/// Process-wide defaults used by [`ConfigOpts::new`].
static GLOBAL_DEFAULTS: OnceLock<Arc<TransportDefaults>> = OnceLock::new();

/// The process-wide defaults registry.
pub fn global_defaults() -> Arc<TransportDefaults> {
    GLOBAL_DEFAULTS.get_or_init(TransportDefaults::new).clone()
}

/// Change the process-wide default exchange.
///
/// Equivalent to `global_defaults().set_default(CONTROL_EXCHANGE, ..)`.
pub fn set_transport_defaults(control_exchange: Option<&str>) {
    // ---
    let _ = global_defaults().set_default(CONTROL_EXCHANGE, control_exchange);
}

/// Serializable form of the transport options.
///
/// Fields that are present become explicit overrides; absent fields keep
/// falling back to the registered defaults.
///
/// ```
/// use mom_transport::TransportOptions;
///
/// let opts: TransportOptions =
///     serde_json::from_str(r#"{ "transport_url": "memory://bus" }"#).unwrap();
/// assert_eq!(opts.transport_url.as_deref(), Some("memory://bus"));
/// assert!(opts.rpc_backend.is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportOptions {
    #[serde(default)]
    pub transport_url: Option<String>,
    #[serde(default)]
    pub rpc_backend: Option<String>,
    #[serde(default)]
    pub control_exchange: Option<String>,
}

/// Configuration store read by the transport resolver.
///
/// Shared with transports as an `Arc<ConfigOpts>`; the transport never
/// mutates it.
#[derive(Debug)]
pub struct ConfigOpts {
    // ---
    overrides: RwLock<HashMap<String, Option<String>>>,
    defaults: Arc<TransportDefaults>,
}

impl ConfigOpts {
    /// Create an empty configuration backed by the process-wide defaults.
    pub fn new() -> Self {
        Self::with_defaults(global_defaults())
    }

    /// Create an empty configuration backed by `defaults`.
    pub fn with_defaults(defaults: Arc<TransportDefaults>) -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    /// Create a configuration from deserialized options.
    pub fn from_options(options: TransportOptions) -> Self {
        // ---
        let conf = Self::new();
        let pairs = [
            (TRANSPORT_URL, options.transport_url),
            (RPC_BACKEND, options.rpc_backend),
            (CONTROL_EXCHANGE, options.control_exchange),
        ];
        for (name, value) in pairs {
            if let Some(value) = value {
                write(&conf.overrides).insert(name.to_string(), Some(value));
            }
        }
        conf
    }

    /// Parse a JSON document into a configuration.
    pub fn from_json(doc: &str) -> Result<Self> {
        let options: TransportOptions = serde_json::from_str(doc)?;
        Ok(Self::from_options(options))
    }

    /// Override `name` with `value`. `None` overrides the option as unset,
    /// hiding any default.
    pub fn set_override(&self, name: &str, value: Option<&str>) -> Result<()> {
        // ---
        check_option(name)?;
        write(&self.overrides).insert(name.to_string(), value.map(str::to_string));
        Ok(())
    }

    /// Drop the override of `name` so the default applies again.
    pub fn clear_override(&self, name: &str) -> Result<()> {
        check_option(name)?;
        write(&self.overrides).remove(name);
        Ok(())
    }

    /// Effective value of `name`: the override if one exists, else the default.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        // ---
        check_option(name)?;
        if let Some(value) = read(&self.overrides).get(name) {
            return Ok(value.clone());
        }
        self.defaults.get(name)
    }

    /// The defaults registry backing this configuration.
    pub fn defaults(&self) -> &Arc<TransportDefaults> {
        &self.defaults
    }

    pub fn with_transport_url(self, url: impl Into<String>) -> Self {
        write(&self.overrides).insert(TRANSPORT_URL.to_string(), Some(url.into()));
        self
    }

    pub fn with_rpc_backend(self, backend: impl Into<String>) -> Self {
        write(&self.overrides).insert(RPC_BACKEND.to_string(), Some(backend.into()));
        self
    }

    pub fn with_control_exchange(self, exchange: impl Into<String>) -> Self {
        write(&self.overrides).insert(CONTROL_EXCHANGE.to_string(), Some(exchange.into()));
        self
    }
}

impl Default for ConfigOpts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_override_beats_default() {
        // ---
        let defaults = TransportDefaults::new();
        defaults.set_default(CONTROL_EXCHANGE, Some("openstack")).unwrap();

        let conf = ConfigOpts::with_defaults(defaults.clone());
        assert_eq!(conf.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("openstack"));

        conf.set_override(CONTROL_EXCHANGE, Some("nova")).unwrap();
        assert_eq!(conf.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("nova"));

        // Explicitly unset hides the default
        conf.set_override(CONTROL_EXCHANGE, None).unwrap();
        assert_eq!(conf.get(CONTROL_EXCHANGE).unwrap(), None);

        conf.clear_override(CONTROL_EXCHANGE).unwrap();
        assert_eq!(conf.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("openstack"));
    }

    #[test]
    fn test_unknown_option_rejected() {
        // ---
        let defaults = TransportDefaults::new();
        let conf = ConfigOpts::with_defaults(defaults.clone());

        let err = conf.get("rabbit_host").unwrap_err();
        assert!(matches!(err, MessagingError::NoSuchOption { ref name, .. } if name == "rabbit_host"));
        assert!(defaults.set_default("rabbit_host", Some("x")).is_err());
        assert!(conf.set_override("rabbit_host", None).is_err());
    }

    #[test]
    fn test_scoped_default_restores_prior() {
        // ---
        let defaults = TransportDefaults::new();
        defaults.set_default(CONTROL_EXCHANGE, Some("openstack")).unwrap();

        {
            let _guard = defaults.scoped_default(CONTROL_EXCHANGE, Some("foo")).unwrap();
            assert_eq!(defaults.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("foo"));
        }

        assert_eq!(defaults.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("openstack"));
    }

    #[test]
    fn test_builder_setters() {
        // ---
        let conf = ConfigOpts::with_defaults(TransportDefaults::new())
            .with_transport_url("memory://a")
            .with_rpc_backend("memory")
            .with_control_exchange("nova");

        assert_eq!(conf.get(TRANSPORT_URL).unwrap().as_deref(), Some("memory://a"));
        assert_eq!(conf.get(RPC_BACKEND).unwrap().as_deref(), Some("memory"));
        assert_eq!(conf.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("nova"));
    }

    #[test]
    fn test_from_json() {
        // ---
        let conf = ConfigOpts::from_json(
            r#"{ "rpc_backend": "memory", "control_exchange": "heat" }"#,
        )
        .unwrap();

        assert_eq!(conf.get(RPC_BACKEND).unwrap().as_deref(), Some("memory"));
        assert_eq!(conf.get(CONTROL_EXCHANGE).unwrap().as_deref(), Some("heat"));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        // ---
        let err = ConfigOpts::from_json(r#"{ "rpc_backend": 42 }"#).unwrap_err();
        assert!(matches!(err, MessagingError::InvalidConfig { .. }));

        let err = ConfigOpts::from_json(r#"{ "bogus": "x" }"#).unwrap_err();
        assert!(err.msg().contains("invalid configuration"));
    }
}
