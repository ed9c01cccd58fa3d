// src/domain/target.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressing information for a message or a listener.
///
/// A `Target` identifies where a message should be delivered or which
/// messages a listener wants to receive. The transport core never inspects
/// it; interpretation belongs to the driver.
///
/// # Example
///
/// ```
/// use mom_transport::Target;
///
/// let target = Target::new("compute")
///     .with_server("host-1")
///     .with_exchange("nova");
///
/// assert_eq!(target.topic.as_deref(), Some("compute"));
/// assert_eq!(target.server.as_deref(), Some("host-1"));
/// assert!(!target.fanout);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    // ---
    /// Exchange the topic lives in. `None` means the driver's default exchange.
    pub exchange: Option<String>,

    /// Topic the message is sent to or the listener consumes.
    pub topic: Option<String>,

    /// Namespace of the methods exposed on the topic.
    pub namespace: Option<String>,

    /// Interface version of the methods exposed on the topic.
    pub version: Option<String>,

    /// A specific server consuming the topic.
    pub server: Option<String>,

    /// Deliver to every server listening on the topic.
    pub fanout: bool,
}

impl Target {
    /// Create a target addressing `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_fanout(mut self, fanout: bool) -> Self {
        self.fanout = fanout;
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let part = |v: &Option<String>| v.clone().unwrap_or_default();
        write!(
            f,
            "<Target exchange={} topic={} server={} fanout={}>",
            part(&self.exchange),
            part(&self.topic),
            part(&self.server),
            self.fanout
        )
    }
}
