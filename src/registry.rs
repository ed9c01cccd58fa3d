//! Driver plugin registry.
//!
//! Drivers are found by name. A [`DriverRegistry`] maps a `(namespace, name)`
//! pair plus construction arguments to a driver instance. The transport
//! resolver only ever uses this capability; it never names a concrete driver
//! type.
//!
//! [`DriverManager`] is the stock implementation: a factory map populated at
//! startup. The process-wide instance returned by [`global_registry`] has the
//! built-in drivers registered and is what [`get_transport`](crate::get_transport)
//! uses. Applications add their own backends with [`DriverManager::register`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::anyhow;

use crate::{drivers, log_debug, ConfigOpts, DriverPtr};

/// Namespace every transport driver is registered under.
pub const DRIVER_NAMESPACE: &str = "mom_transport.drivers";

/// Keyword arguments handed to a driver factory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverArgs {
    // ---
    /// Exchange to use when a target does not name one.
    pub default_exchange: Option<String>,

    /// The transport URL. `None` when resolution did not start from a URL
    /// (legacy backend name or built-in default); the argument is then
    /// omitted entirely rather than passed empty.
    pub url: Option<String>,
}

/// Constructor registered for a driver name.
pub type DriverFactory =
    Arc<dyn Fn(&Arc<ConfigOpts>, DriverArgs) -> anyhow::Result<DriverPtr> + Send + Sync>;

/// Name-keyed driver lookup.
pub trait DriverRegistry: Send + Sync {
    /// Find the driver `name` in `namespace` and construct it with `conf`
    /// and `args`.
    ///
    /// Any failure (unknown name or a failing constructor) is returned as
    /// an error; the resolver translates it.
    fn lookup(
        &self,
        namespace: &str,
        name: &str,
        conf: &Arc<ConfigOpts>,
        args: DriverArgs,
    ) -> anyhow::Result<DriverPtr>;
}

/// Factory-map [`DriverRegistry`].
#[derive(Default)]
pub struct DriverManager {
    factories: RwLock<HashMap<String, HashMap<String, DriverFactory>>>,
}

impl DriverManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in drivers registered.
    pub fn with_builtin_drivers() -> Self {
        // ---
        let manager = Self::new();
        drivers::register_builtin_drivers(&manager);
        manager
    }

    /// Register `factory` as driver `name` in `namespace`, replacing any
    /// factory already registered under that name.
    pub fn register<F>(&self, namespace: &str, name: &str, factory: F)
    where
        F: Fn(&Arc<ConfigOpts>, DriverArgs) -> anyhow::Result<DriverPtr> + Send + Sync + 'static,
    {
        // ---
        log_debug!("register driver {namespace}/{name}");

        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        factories
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), Arc::new(factory));
    }

    /// Names registered in `namespace`, sorted.
    pub fn names(&self, namespace: &str) -> Vec<String> {
        // ---
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = factories
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn factory(&self, namespace: &str, name: &str) -> Option<DriverFactory> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        factories.get(namespace)?.get(name).cloned()
    }
}

impl DriverRegistry for DriverManager {
    fn lookup(
        &self,
        namespace: &str,
        name: &str,
        conf: &Arc<ConfigOpts>,
        args: DriverArgs,
    ) -> anyhow::Result<DriverPtr> {
        // ---
        // Clone the factory out so the map lock is not held while it runs.
        let factory = self
            .factory(namespace, name)
            .ok_or_else(|| anyhow!("no driver named \"{name}\" in namespace {namespace}"))?;

        factory(conf, args)
    }
}

impl fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverManager")
            .field("drivers", &self.names(DRIVER_NAMESPACE))
            .finish()
    }
}

/// Process-global registry used by [`get_transport`](crate::get_transport).
static GLOBAL_REGISTRY: OnceLock<Arc<DriverManager>> = OnceLock::new();

/// The process-wide driver registry, with the built-in drivers registered.
pub fn global_registry() -> Arc<DriverManager> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(DriverManager::with_builtin_drivers()))
        .clone()
}
