//! Transport identity parsing.

use std::fmt;

use crate::{MessagingError, Result};

/// A parsed endpoint reference: which driver to load and, when resolution
/// started from a URL, the URL itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportIdentity {
    scheme: String,
    raw_url: Option<String>,
}

impl TransportIdentity {
    /// Parse a URL-like string of the form `scheme:rest`.
    ///
    /// The original string is kept as [`raw_url`](Self::raw_url).
    ///
    /// ```
    /// use mom_transport::TransportIdentity;
    ///
    /// let id = TransportIdentity::parse("memory://bus").unwrap();
    /// assert_eq!(id.scheme(), "memory");
    /// assert_eq!(id.body(), "//bus");
    /// assert_eq!(id.raw_url(), Some("memory://bus"));
    ///
    /// assert!(TransportIdentity::parse("invalid").is_err());
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let scheme = parse_scheme(url)?;
        Ok(Self {
            scheme: scheme.to_string(),
            raw_url: Some(url.to_string()),
        })
    }

    /// Identity for a bare backend name with no URL behind it.
    ///
    /// The name is read as though it were the URL `"<name>:"`, so it must
    /// be usable as a scheme.
    pub fn from_backend(name: &str) -> Result<Self> {
        // ---
        let synthesized = format!("{name}:");
        let scheme = parse_scheme(&synthesized)?;
        Ok(Self {
            scheme: scheme.to_string(),
            raw_url: None,
        })
    }

    /// Name of the driver to load.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The URL resolution started from, if any.
    pub fn raw_url(&self) -> Option<&str> {
        self.raw_url.as_deref()
    }

    /// Everything after the first `:` of the URL; empty when there is no URL.
    pub fn body(&self) -> &str {
        self.raw_url
            .as_deref()
            .and_then(|url| url.split_once(':'))
            .map_or("", |(_, rest)| rest)
    }
}

impl fmt::Display for TransportIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw_url {
            Some(url) => f.write_str(url),
            None => write!(f, "{}:", self.scheme),
        }
    }
}

fn parse_scheme(url: &str) -> Result<&str> {
    match url.split_once(':') {
        Some((scheme, _)) if !scheme.trim().is_empty() => Ok(scheme.trim()),
        _ => Err(MessagingError::invalid_url(url)),
    }
}
