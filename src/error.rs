use thiserror::Error;

/// Boxed error preserved as the `source()` of a translated failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while resolving a transport or dispatching through it.
///
/// Every variant carries a human-readable `msg`, which is also what
/// `Display` prints. Use [`MessagingError::msg`] to read it without
/// matching on the variant.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// A URL-like string was supplied but no scheme could be parsed from it.
    #[error("{msg}")]
    InvalidTransportUrl { url: String, msg: String },

    /// The driver registry could not look up or construct the named driver.
    #[error("{msg}")]
    DriverLoadFailure {
        driver: String,
        msg: String,
        #[source]
        source: BoxError,
    },

    /// A configuration option name that is not registered.
    #[error("{msg}")]
    NoSuchOption { name: String, msg: String },

    /// A configuration document could not be parsed.
    #[error("{msg}")]
    InvalidConfig { msg: String },

    /// A driver gave up waiting for a reply.
    #[error("{msg}")]
    Timeout { msg: String },

    /// Any other failure reported by a driver.
    #[error("{msg}")]
    Driver { msg: String },
}

impl MessagingError {
    // ---
    /// The human-readable message carried by every variant.
    pub fn msg(&self) -> &str {
        match self {
            Self::InvalidTransportUrl { msg, .. }
            | Self::DriverLoadFailure { msg, .. }
            | Self::NoSuchOption { msg, .. }
            | Self::InvalidConfig { msg }
            | Self::Timeout { msg }
            | Self::Driver { msg } => msg,
        }
    }

    pub(crate) fn invalid_url(url: &str) -> Self {
        Self::InvalidTransportUrl {
            url: url.to_string(),
            msg: format!("Invalid transport URL: {url}: No scheme specified"),
        }
    }

    pub(crate) fn load_failure(driver: &str, source: BoxError) -> Self {
        // ---
        Self::DriverLoadFailure {
            driver: driver.to_string(),
            msg: format!("Failed to load transport driver \"{driver}\": {source}"),
            source,
        }
    }

    pub(crate) fn no_such_option(name: &str) -> Self {
        Self::NoSuchOption {
            name: name.to_string(),
            msg: format!("no such option: {name}"),
        }
    }

    /// Shorthand for a [`MessagingError::Driver`] failure.
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver { msg: msg.into() }
    }

    /// Shorthand for a [`MessagingError::Timeout`] failure.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout { msg: msg.into() }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfig {
            msg: format!("invalid configuration: {err}"),
        }
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, MessagingError>;
