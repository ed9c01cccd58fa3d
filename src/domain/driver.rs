// src/domain/driver.rs

//! Driver capability.
//!
//! A driver is the backend-specific half of a transport: it knows how to put
//! a message on the wire (or in a process-local queue) and how to consume
//! messages addressed to a [`Target`]. The transport core only ever talks to
//! drivers through the [`Driver`] trait defined here.
//!
//! Concrete implementations live under `src/drivers/`.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::Target;
use crate::{log_debug, Result};

/// Request context travelling alongside a message.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Message body.
pub type Message = serde_json::Value;

/// Channel a listener uses to answer an RPC call.
pub type ReplySender = oneshot::Sender<Result<Message>>;

/// Optional parameters for [`Transport::send`](crate::Transport::send).
///
/// `None` means "not specified": the value is forwarded to the driver as
/// is and the driver applies its own default. `Some(Duration::ZERO)` is a
/// real timeout, distinct from `None`.
///
/// ```
/// use mom_transport::SendOptions;
/// use std::time::Duration;
///
/// let opts = SendOptions::new()
///     .wait_for_reply(true)
///     .timeout(Duration::from_secs(5));
///
/// assert_eq!(opts.wait_for_reply, Some(true));
/// assert!(SendOptions::default().timeout.is_none());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub wait_for_reply: Option<bool>,
    pub timeout: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait_for_reply(mut self, wait: bool) -> Self {
        self.wait_for_reply = Some(wait);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A message delivered to a [`Listener`].
#[derive(Debug)]
pub struct IncomingMessage {
    // ---
    /// Request context supplied by the sender.
    pub ctxt: Context,

    /// Message body.
    pub message: Message,

    /// Unique identifier assigned by the driver on delivery.
    pub msg_id: String,

    /// Notification version, `None` for RPC traffic.
    pub version: Option<f64>,

    reply_to: Option<ReplySender>,
}

impl IncomingMessage {
    /// Create an incoming message. Drivers pass `reply_to` when the sender
    /// waits for an answer.
    pub fn new(
        ctxt: Context,
        message: Message,
        msg_id: impl Into<String>,
        version: Option<f64>,
        reply_to: Option<ReplySender>,
    ) -> Self {
        Self {
            ctxt,
            message,
            msg_id: msg_id.into(),
            version,
            reply_to,
        }
    }

    /// Whether the sender is waiting for a reply.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Answer the sender.
    ///
    /// Messages sent without `wait_for_reply` have nobody to answer; the
    /// reply is discarded. A sender that already gave up is not an error.
    pub fn reply(self, result: Result<Message>) {
        // ---
        match self.reply_to {
            Some(tx) => {
                if tx.send(result).is_err() {
                    log_debug!("{}: reply dropped, sender stopped waiting", self.msg_id);
                }
            }
            None => {
                log_debug!("{}: no reply expected, discarding", self.msg_id);
            }
        }
    }
}

/// Handle returned from a successful [`Driver::listen`].
///
/// Dropping the handle stops the listener; drivers notice the closed
/// channel and stop delivering to it.
#[derive(Debug)]
pub struct Listener {
    // ---
    /// The target this listener consumes.
    pub target: Target,

    /// Receiver channel for messages delivered to this listener.
    pub inbox: mpsc::Receiver<IncomingMessage>,
}

impl Listener {
    pub fn new(target: Target, inbox: mpsc::Receiver<IncomingMessage>) -> Self {
        Self { target, inbox }
    }

    /// Wait for the next message. Returns `None` once the driver closed
    /// the listener.
    pub async fn poll(&mut self) -> Option<IncomingMessage> {
        self.inbox.recv().await
    }
}

/// Backend driver capability.
///
/// Every backend (broker-based, in-process or a test fake) implements all of
/// these methods. Drivers must tolerate concurrent `send` and `listen`
/// calls from independent tasks; the transport layer adds no locking.
///
/// Drivers are not constructed directly by callers. They are registered
/// with a [`DriverRegistry`](crate::DriverRegistry) under a scheme name and
/// built on demand by [`get_transport`](crate::get_transport).
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Treat the methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    // ---
    /// Send an RPC message.
    ///
    /// `wait_for_reply` and `timeout` arrive exactly as the caller supplied
    /// them; `None` means unset and the driver picks its own behavior.
    /// Returns the reply when one was awaited.
    async fn send(
        &self,
        target: &Target,
        ctxt: Context,
        message: Message,
        wait_for_reply: Option<bool>,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>>;

    /// Send a versioned, fire-and-forget notification.
    async fn send_notification(
        &self,
        target: &Target,
        ctxt: Context,
        message: Message,
        version: f64,
    ) -> Result<()>;

    /// Start consuming messages addressed to `target`.
    async fn listen(&self, target: &Target) -> Result<Listener>;

    /// Release any resources held by the driver.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Owned driver instance, one per [`Transport`](crate::Transport).
pub type DriverPtr = Box<dyn Driver>;
