//! Transport resolution.
//!
//! Turns configuration into a [`Transport`]:
//!
//! 1. pick the identity source by precedence (explicit URL, `transport_url`,
//!    legacy `rpc_backend`, built-in default),
//! 2. read the default exchange from `control_exchange`,
//! 3. ask the [`DriverRegistry`] for the driver named by the scheme,
//! 4. wrap driver, configuration and identity into a `Transport`.
//!
//! Resolution either returns a complete transport or an error; nothing is
//! kept from a failed attempt.

use std::sync::Arc;

use crate::{
    // ---
    global_registry,
    log_debug,
    log_error,
    ConfigOpts,
    DriverArgs,
    DriverRegistry,
    MessagingError,
    Result,
    Transport,
    TransportIdentity,
    CONTROL_EXCHANGE,
    DRIVER_NAMESPACE,
    RPC_BACKEND,
    TRANSPORT_URL,
};

/// Driver used when no URL and no backend name are configured.
pub const DEFAULT_BACKEND: &str = "memory";

/// Resolves transports against a specific driver registry.
///
/// Holding the registry explicitly lets tests substitute their own; the
/// [`get_transport`] shortcut uses the process-wide one.
#[derive(Clone)]
pub struct TransportResolver {
    registry: Arc<dyn DriverRegistry>,
}

impl TransportResolver {
    pub fn new(registry: Arc<dyn DriverRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve a transport from `conf`, preferring `url` when it is non-empty.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::InvalidTransportUrl`] if the chosen URL has no scheme
    /// - [`MessagingError::DriverLoadFailure`] if the registry cannot produce
    ///   the driver
    /// - [`MessagingError::NoSuchOption`] only if the transport options are
    ///   missing from the configuration store, which indicates a bug
    pub fn resolve(&self, conf: &Arc<ConfigOpts>, url: Option<&str>) -> Result<Transport> {
        // ---
        let identity = resolve_identity(conf, url)?;
        let default_exchange = conf.get(CONTROL_EXCHANGE)?;

        let args = DriverArgs {
            default_exchange,
            url: identity.raw_url().map(str::to_string),
        };

        log_debug!(
            "loading driver {} (default_exchange={:?}, url={:?})",
            identity.scheme(),
            args.default_exchange,
            args.url
        );

        let driver = self
            .registry
            .lookup(DRIVER_NAMESPACE, identity.scheme(), conf, args)
            .map_err(|err| {
                log_error!("failed to load driver {}: {err:#}", identity.scheme());
                MessagingError::load_failure(identity.scheme(), err.into())
            })?;

        Ok(Transport::new(conf.clone(), driver, identity))
    }
}

/// Resolve a transport using the process-wide driver registry.
///
/// # Example
///
/// ```
/// use mom_transport::{get_transport, ConfigOpts, MessagingError};
/// use std::sync::Arc;
///
/// let conf = Arc::new(ConfigOpts::new().with_rpc_backend("memory"));
/// let transport = get_transport(&conf, None).unwrap();
/// assert_eq!(transport.identity().scheme(), "memory");
///
/// let err = get_transport(&conf, Some("invalid")).unwrap_err();
/// assert!(matches!(err, MessagingError::InvalidTransportUrl { .. }));
/// ```
pub fn get_transport(conf: &Arc<ConfigOpts>, url: Option<&str>) -> Result<Transport> {
    TransportResolver::new(global_registry()).resolve(conf, url)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn resolve_identity(conf: &ConfigOpts, url: Option<&str>) -> Result<TransportIdentity> {
    // ---
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        log_debug!("transport from explicit url {url}");
        return TransportIdentity::parse(url);
    }

    if let Some(url) = non_empty(conf.get(TRANSPORT_URL)?) {
        log_debug!("transport from {TRANSPORT_URL} {url}");
        return TransportIdentity::parse(&url);
    }

    if let Some(backend) = non_empty(conf.get(RPC_BACKEND)?) {
        log_debug!("transport from {RPC_BACKEND} {backend}");
        return TransportIdentity::from_backend(&backend);
    }

    log_debug!("no transport configured, using {DEFAULT_BACKEND}");
    TransportIdentity::from_backend(DEFAULT_BACKEND)
}
