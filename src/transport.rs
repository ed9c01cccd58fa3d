//! Caller-facing transport.

use std::fmt;
use std::sync::Arc;

use crate::{
    // ---
    ConfigOpts,
    Context,
    DriverPtr,
    Listener,
    Message,
    Result,
    SendOptions,
    Target,
    TransportIdentity,
};

/// A resolved, ready-to-use messaging endpoint.
///
/// Owns exactly one driver for its whole lifetime and exposes a uniform
/// dispatch surface over it. Every method forwards to the driver; no
/// retries, timeouts or target validation happen here, and driver errors
/// are returned unchanged.
///
/// Obtain one from [`get_transport`](crate::get_transport) or a
/// [`TransportResolver`](crate::TransportResolver).
///
/// # Example
///
/// ```
/// use mom_transport::{get_transport, ConfigOpts, SendOptions, Target};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> mom_transport::Result<()> {
/// let conf = Arc::new(ConfigOpts::new());
/// let transport = get_transport(&conf, Some("memory://doc-transport"))?;
///
/// let target = Target::new("compute");
/// let mut listener = transport.listen(&target).await?;
///
/// transport
///     .send(&target, Default::default(), json!({"method": "ping"}), SendOptions::new())
///     .await?;
///
/// let incoming = listener.poll().await.expect("listener closed");
/// assert_eq!(incoming.message["method"], "ping");
/// # Ok(())
/// # }
/// ```
pub struct Transport {
    // ---
    conf: Arc<ConfigOpts>,
    driver: DriverPtr,
    identity: TransportIdentity,
}

impl Transport {
    /// Wrap an already constructed driver.
    pub fn new(conf: Arc<ConfigOpts>, driver: DriverPtr, identity: TransportIdentity) -> Self {
        Self {
            conf,
            driver,
            identity,
        }
    }

    /// Configuration this transport was resolved from.
    pub fn conf(&self) -> &Arc<ConfigOpts> {
        &self.conf
    }

    /// Identity this transport was resolved from.
    pub fn identity(&self) -> &TransportIdentity {
        &self.identity
    }

    /// Send an RPC message.
    ///
    /// Unset options reach the driver as `None`; the driver decides what
    /// "unset" means. Returns the reply if the driver waited for one.
    pub async fn send(
        &self,
        target: &Target,
        ctxt: Context,
        message: Message,
        opts: SendOptions,
    ) -> Result<Option<Message>> {
        self.driver
            .send(target, ctxt, message, opts.wait_for_reply, opts.timeout)
            .await
    }

    /// Send a versioned, fire-and-forget notification.
    pub async fn send_notification(
        &self,
        target: &Target,
        ctxt: Context,
        message: Message,
        version: f64,
    ) -> Result<()> {
        self.driver
            .send_notification(target, ctxt, message, version)
            .await
    }

    /// Start consuming messages addressed to `target`.
    pub async fn listen(&self, target: &Target) -> Result<Listener> {
        self.driver.listen(target).await
    }

    /// Release driver resources.
    pub async fn cleanup(&self) -> Result<()> {
        self.driver.cleanup().await
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("identity", &self.identity.to_string())
            .finish_non_exhaustive()
    }
}
