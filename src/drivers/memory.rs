// src/drivers/memory.rs

//! In-memory driver.
//!
//! A pure in-process implementation of the [`Driver`] trait, registered as
//! the `memory` scheme. It is the default backend and the reference for
//! driver semantics; broker-backed drivers are expected to approximate it.
//!
//! ## Hubs
//!
//! Drivers route messages through a [`MemoryHub`]. The URL selects the hub:
//!
//! - `memory:` (or no URL at all) uses the process-wide hub,
//! - `memory://<name>` or `memory:<name>` uses the hub called `<name>`.
//!
//! All drivers on the same hub see each other's traffic, exactly as nodes
//! connected to the same broker would. Tests use named hubs for isolation.
//!
//! ## Routing
//!
//! Messages are routed within an exchange: the target's exchange, else the
//! driver's default exchange, else the unnamed exchange `""`.
//!
//! - `listen(target)` consumes `topic`, `topic.server` when the target names
//!   a server, and fanout traffic for `topic`.
//! - A fanout `send` reaches every listener on the topic.
//! - A `send` naming a server reaches one `topic.server` listener.
//! - Any other `send`, and every notification, reaches one `topic` listener;
//!   listeners take turns.
//!
//! Messages sent while nobody listens are dropped. Sending never waits on
//! a slow listener: a listener whose inbox is full is passed over, and the
//! message is dropped when no listener can take it. Delivery is
//! deterministic within a process and nothing is persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    ConfigOpts,
    Context,
    Driver,
    DriverArgs,
    DriverPtr,
    IncomingMessage,
    Listener,
    Message,
    MessagingError,
    Result,
    Target,
    TransportIdentity,
};

/// Scheme the memory driver is registered under.
pub const MEMORY_SCHEME: &str = "memory";

const INBOX_CAPACITY: usize = 16;

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone)]
struct Consumer {
    listener_id: Uuid,
    tx: mpsc::Sender<IncomingMessage>,
}

#[derive(Default)]
struct Exchange {
    // Keyed by "topic" and "topic.server".
    direct: HashMap<String, Vec<Consumer>>,
    // Keyed by topic.
    fanout: HashMap<String, Vec<Consumer>>,
    next: HashMap<String, usize>,
}

impl Exchange {
    /// Live consumers of `key`, rotated so the next in turn comes first.
    fn take_turn(&mut self, key: &str) -> Vec<Consumer> {
        // ---
        let Some(consumers) = self.direct.get_mut(key) else {
            return Vec::new();
        };
        consumers.retain(|c| !c.tx.is_closed());
        if consumers.is_empty() {
            self.direct.remove(key);
            self.next.remove(key);
            return Vec::new();
        }

        let turn = self.next.entry(key.to_string()).or_insert(0);
        let start = *turn % consumers.len();
        *turn = start + 1;

        let mut ordered = consumers[start..].to_vec();
        ordered.extend_from_slice(&consumers[..start]);
        ordered
    }

    fn fanout_consumers(&mut self, topic: &str) -> Vec<Consumer> {
        // ---
        match self.fanout.get_mut(topic) {
            Some(consumers) => {
                consumers.retain(|c| !c.tx.is_closed());
                consumers.clone()
            }
            None => Vec::new(),
        }
    }

    fn remove_listener(&mut self, listener_id: Uuid) {
        for consumers in self.direct.values_mut().chain(self.fanout.values_mut()) {
            consumers.retain(|c| c.listener_id != listener_id);
        }
        self.drop_empty_keys();
    }

    /// Forget consumers whose listener was dropped.
    fn prune_closed(&mut self) {
        for consumers in self.direct.values_mut().chain(self.fanout.values_mut()) {
            consumers.retain(|c| !c.tx.is_closed());
        }
        self.drop_empty_keys();
    }

    fn drop_empty_keys(&mut self) {
        // ---
        self.direct.retain(|_, consumers| !consumers.is_empty());
        self.fanout.retain(|_, consumers| !consumers.is_empty());

        let direct = &self.direct;
        self.next.retain(|key, _| direct.contains_key(key));
    }

    fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.fanout.is_empty()
    }
}

/// Shared message bus for memory drivers.
///
/// Simulates a broker inside the process. Obtain one with
/// [`MemoryHub::named`]; the memory driver does this from its URL.
pub struct MemoryHub {
    // ---
    name: String,
    exchanges: Mutex<HashMap<String, Exchange>>,
}

/// Hubs by name. The process-wide hub is the one named `""`.
static HUBS: OnceLock<Mutex<HashMap<String, Arc<MemoryHub>>>> = OnceLock::new();

impl MemoryHub {
    /// The hub called `name`, created on first use.
    pub fn named(name: &str) -> Arc<Self> {
        // ---
        let hubs = HUBS.get_or_init(|| Mutex::new(HashMap::new()));
        lock_ignore_poison(hubs)
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Self {
                    name: name.to_string(),
                    exchanges: Mutex::new(HashMap::new()),
                })
            })
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, exchange: &str, target: &Target, consumer: Consumer) -> Result<()> {
        // ---
        let topic = target
            .topic
            .as_deref()
            .ok_or_else(|| MessagingError::driver(format!("cannot listen on {target}: no topic")))?;

        let mut exchanges = lock_ignore_poison(&self.exchanges);
        let ex = exchanges.entry(exchange.to_string()).or_default();
        ex.prune_closed();

        ex.direct
            .entry(topic.to_string())
            .or_default()
            .push(consumer.clone());
        if let Some(server) = &target.server {
            ex.direct
                .entry(format!("{topic}.{server}"))
                .or_default()
                .push(consumer.clone());
        }
        ex.fanout.entry(topic.to_string()).or_default().push(consumer);

        log_debug!("hub {:?}: listening on {exchange}/{target}", self.name);
        Ok(())
    }

    fn remove_listeners(&self, listener_ids: &[Uuid]) {
        // ---
        let mut exchanges = lock_ignore_poison(&self.exchanges);
        for ex in exchanges.values_mut() {
            for id in listener_ids {
                ex.remove_listener(*id);
            }
        }
        exchanges.retain(|_, ex| !ex.is_empty());
    }

    /// Hand `msg` to one consumer of `key`. Returns the message if nobody
    /// took it. Never waits: a consumer with a full inbox is passed over.
    fn deliver_one(
        &self,
        exchange: &str,
        key: &str,
        msg: IncomingMessage,
    ) -> Option<IncomingMessage> {
        // ---
        let candidates = {
            let mut exchanges = lock_ignore_poison(&self.exchanges);
            match exchanges.get_mut(exchange) {
                Some(ex) => ex.take_turn(key),
                None => Vec::new(),
            }
        };

        let mut msg = msg;
        for consumer in candidates {
            match consumer.tx.try_send(msg) {
                Ok(()) => return None,
                Err(TrySendError::Full(returned)) => {
                    log_warn!(
                        "hub {:?}: inbox of listener {} on {exchange}/{key} is full",
                        self.name,
                        consumer.listener_id
                    );
                    msg = returned;
                }
                // Listener went away after we picked it; try the next one.
                Err(TrySendError::Closed(returned)) => msg = returned,
            }
        }
        Some(msg)
    }

    /// Copy the message to every fanout consumer of `topic`. Returns how
    /// many received it. Consumers with a full inbox miss the message.
    fn deliver_fanout(
        &self,
        exchange: &str,
        topic: &str,
        ctxt: Context,
        message: Message,
    ) -> usize {
        // ---
        let consumers = {
            let mut exchanges = lock_ignore_poison(&self.exchanges);
            match exchanges.get_mut(exchange) {
                Some(ex) => ex.fanout_consumers(topic),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for consumer in consumers {
            let msg = IncomingMessage::new(
                ctxt.clone(),
                message.clone(),
                Uuid::new_v4().to_string(),
                None,
                None,
            );
            match consumer.tx.try_send(msg) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log_warn!(
                        "hub {:?}: inbox of listener {} on {exchange}/{topic} is full, fanout message dropped",
                        self.name,
                        consumer.listener_id
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// In-memory driver.
///
/// Routes through a shared [`MemoryHub`]. `wait_for_reply` defaults to
/// `false` when unset; an unset `timeout` waits for the reply indefinitely.
pub struct MemoryDriver {
    // ---
    hub: Arc<MemoryHub>,
    default_exchange: Option<String>,
    // Listeners opened by this driver and not yet dropped.
    listeners: Mutex<Vec<Consumer>>,
}

impl MemoryDriver {
    /// Create a driver on `hub`.
    pub fn new(hub: Arc<MemoryHub>, default_exchange: Option<String>) -> Self {
        Self {
            hub,
            default_exchange,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Build a driver from registry arguments.
    pub fn from_args(args: &DriverArgs) -> Result<Self> {
        // ---
        let hub_name = match &args.url {
            Some(url) => {
                let identity = TransportIdentity::parse(url)?;
                identity.body().trim_matches('/').to_string()
            }
            None => String::new(),
        };

        log_info!("create memory driver on hub {hub_name:?}");
        Ok(Self::new(
            MemoryHub::named(&hub_name),
            args.default_exchange.clone(),
        ))
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }

    fn exchange_for<'a>(&'a self, target: &'a Target) -> &'a str {
        target
            .exchange
            .as_deref()
            .or(self.default_exchange.as_deref())
            .unwrap_or("")
    }

    fn topic_of(target: &Target) -> Result<&str> {
        target
            .topic
            .as_deref()
            .ok_or_else(|| MessagingError::driver(format!("cannot send to {target}: no topic")))
    }
}

async fn await_reply(
    reply_rx: oneshot::Receiver<Result<Message>>,
    timeout: Option<Duration>,
    target: &Target,
) -> Result<Message> {
    // ---
    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, reply_rx).await.map_err(|_| {
            MessagingError::timeout(format!("timed out after {limit:?} waiting for reply from {target}"))
        })?,
        None => reply_rx.await,
    };

    received.map_err(|_| MessagingError::driver(format!("{target}: listener dropped the message without replying")))?
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    // ---
    async fn send(
        &self,
        target: &Target,
        ctxt: Context,
        message: Message,
        wait_for_reply: Option<bool>,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        // ---
        let exchange = self.exchange_for(target);
        let topic = Self::topic_of(target)?;
        let wait = wait_for_reply.unwrap_or(false);

        if target.fanout {
            if wait {
                return Err(MessagingError::driver(format!(
                    "cannot wait for a reply to fanout message on {target}"
                )));
            }
            let _count = self.hub.deliver_fanout(exchange, topic, ctxt, message);
            log_debug!("fanout to {_count} listeners on {exchange}/{topic}");
            return Ok(None);
        }

        let key = match &target.server {
            Some(server) => format!("{topic}.{server}"),
            None => topic.to_string(),
        };

        let (reply_tx, reply_rx) = if wait {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let msg = IncomingMessage::new(ctxt, message, Uuid::new_v4().to_string(), None, reply_tx);

        if let Some(_undelivered) = self.hub.deliver_one(exchange, &key, msg) {
            log_warn!(
                "{}: no listener available on {exchange}/{key}, message dropped",
                _undelivered.msg_id
            );
            if wait {
                return Err(MessagingError::driver(format!("no listener available on {target}")));
            }
            return Ok(None);
        }

        match reply_rx {
            Some(rx) => await_reply(rx, timeout, target).await.map(Some),
            None => Ok(None),
        }
    }

    async fn send_notification(
        &self,
        target: &Target,
        ctxt: Context,
        message: Message,
        version: f64,
    ) -> Result<()> {
        // ---
        let exchange = self.exchange_for(target);
        let topic = Self::topic_of(target)?;

        let msg = IncomingMessage::new(ctxt, message, Uuid::new_v4().to_string(), Some(version), None);

        if let Some(_undelivered) = self.hub.deliver_one(exchange, topic, msg) {
            log_warn!(
                "{}: no listener available on {exchange}/{topic}, notification dropped",
                _undelivered.msg_id
            );
        }
        Ok(())
    }

    async fn listen(&self, target: &Target) -> Result<Listener> {
        // ---
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let consumer = Consumer {
            listener_id: Uuid::new_v4(),
            tx,
        };

        self.hub
            .register(self.exchange_for(target), target, consumer.clone())?;

        {
            let mut listeners = lock_ignore_poison(&self.listeners);
            listeners.retain(|c| !c.tx.is_closed());
            listeners.push(consumer);
        }

        Ok(Listener::new(target.clone(), rx))
    }

    /// Close every listener this driver created.
    async fn cleanup(&self) -> Result<()> {
        // ---
        let ids: Vec<Uuid> = lock_ignore_poison(&self.listeners)
            .drain(..)
            .map(|c| c.listener_id)
            .collect();
        log_debug!("hub {:?}: closing {} listeners", self.hub.name(), ids.len());

        self.hub.remove_listeners(&ids);
        Ok(())
    }
}

/// Factory registered for [`MEMORY_SCHEME`].
pub fn create_driver(_conf: &Arc<ConfigOpts>, args: DriverArgs) -> anyhow::Result<DriverPtr> {
    Ok(Box::new(MemoryDriver::from_args(&args)?))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn driver(hub: &str) -> MemoryDriver {
        MemoryDriver::new(MemoryHub::named(hub), None)
    }

    /// (direct keys, direct consumers, fanout consumers) across all exchanges.
    fn hub_usage(hub: &MemoryHub) -> (usize, usize, usize) {
        // ---
        let exchanges = lock_ignore_poison(&hub.exchanges);
        let mut usage = (0, 0, 0);
        for ex in exchanges.values() {
            usage.0 += ex.direct.len();
            usage.1 += ex.direct.values().map(Vec::len).sum::<usize>();
            usage.2 += ex.fanout.values().map(Vec::len).sum::<usize>();
        }
        usage
    }

    #[test]
    fn test_hub_selected_from_url() {
        // ---
        let args = DriverArgs {
            default_exchange: None,
            url: Some("memory://unit-hub-url/".into()),
        };
        assert_eq!(MemoryDriver::from_args(&args).unwrap().hub().name(), "unit-hub-url");

        let args = DriverArgs {
            default_exchange: None,
            url: Some("memory:unit-hub-short".into()),
        };
        assert_eq!(MemoryDriver::from_args(&args).unwrap().hub().name(), "unit-hub-short");

        let args = DriverArgs::default();
        assert_eq!(MemoryDriver::from_args(&args).unwrap().hub().name(), "");
    }

    #[test]
    fn test_named_hub_is_shared() {
        // ---
        let a = MemoryHub::named("unit-shared");
        let b = MemoryHub::named("unit-shared");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_round_robin_between_listeners() {
        // ---
        let d = driver("unit-round-robin");
        let target = Target::new("work");
        let mut first = d.listen(&target).await.unwrap();
        let mut second = d.listen(&target).await.unwrap();

        for i in 0..4 {
            d.send(&target, Context::new(), json!(i), None, None)
                .await
                .unwrap();
        }

        let mut got_first = Vec::new();
        while let Ok(msg) = first.inbox.try_recv() {
            got_first.push(msg.message);
        }
        let mut got_second = Vec::new();
        while let Ok(msg) = second.inbox.try_recv() {
            got_second.push(msg.message);
        }

        assert_eq!(got_first, vec![json!(0), json!(2)]);
        assert_eq!(got_second, vec![json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn test_dropped_listener_is_skipped() {
        // ---
        let d = driver("unit-dropped");
        let target = Target::new("work");
        let gone = d.listen(&target).await.unwrap();
        let mut alive = d.listen(&target).await.unwrap();
        drop(gone);

        d.send(&target, Context::new(), json!("hi"), None, None)
            .await
            .unwrap();

        assert_eq!(alive.inbox.try_recv().unwrap().message, json!("hi"));
    }

    #[tokio::test]
    async fn test_listen_requires_topic() {
        // ---
        let d = driver("unit-no-topic");
        let err = d.listen(&Target::default()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Driver { .. }));
    }

    #[tokio::test]
    async fn test_fanout_cannot_wait_for_reply() {
        // ---
        let d = driver("unit-fanout-wait");
        let target = Target::new("work").with_fanout(true);
        let err = d
            .send(&target, Context::new(), json!(1), Some(true), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Driver { .. }));
    }

    #[tokio::test]
    async fn test_default_exchange_used_when_target_has_none() {
        // ---
        let hub = MemoryHub::named("unit-exchange");
        let nova = MemoryDriver::new(hub.clone(), Some("nova".into()));
        let other = MemoryDriver::new(hub, Some("heat".into()));

        let target = Target::new("compute");
        let mut listener = nova.listen(&target).await.unwrap();

        // Different default exchange: not routed to the nova listener
        other
            .send(&target, Context::new(), json!("heat"), None, None)
            .await
            .unwrap();
        // Explicit exchange on the target overrides the default
        other
            .send(&target.clone().with_exchange("nova"), Context::new(), json!("nova"), None, None)
            .await
            .unwrap();

        assert_eq!(listener.inbox.try_recv().unwrap().message, json!("nova"));
        assert!(listener.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_listeners_are_released() {
        // ---
        let d = driver("unit-released");
        for i in 0..100 {
            let listener = d
                .listen(&Target::new("work").with_server(format!("s{i}")))
                .await
                .unwrap();
            drop(listener);
        }

        let _live = d.listen(&Target::new("work")).await.unwrap();

        assert_eq!(lock_ignore_poison(&d.listeners).len(), 1);
        // Only "work" is left, held by the live listener
        assert_eq!(hub_usage(d.hub()), (1, 1, 1));
        let exchanges = lock_ignore_poison(&d.hub().exchanges);
        assert!(exchanges[""].next.keys().all(|key| key == "work"));
    }

    #[tokio::test]
    async fn test_cleanup_releases_hub_state() {
        // ---
        let d = driver("unit-cleanup-state");
        let _a = d.listen(&Target::new("work").with_server("a")).await.unwrap();
        let _b = d.listen(&Target::new("other")).await.unwrap();

        d.cleanup().await.unwrap();

        assert_eq!(hub_usage(d.hub()), (0, 0, 0));
        assert!(lock_ignore_poison(&d.hub().exchanges).is_empty());
    }

    #[tokio::test]
    async fn test_full_inbox_is_passed_over() {
        // ---
        let d = driver("unit-full-inbox");
        let target = Target::new("work");
        let mut stuck = d.listen(&target).await.unwrap();
        let mut live = d.listen(&target).await.unwrap();

        let total = INBOX_CAPACITY * 3;
        let mut live_count = 0;
        for i in 0..total {
            tokio::time::timeout(
                Duration::from_millis(200),
                d.send(&target, Context::new(), json!(i), None, None),
            )
            .await
            .expect("send must not wait on a full inbox")
            .unwrap();
            while live.inbox.try_recv().is_ok() {
                live_count += 1;
            }
        }

        let mut stuck_count = 0;
        while stuck.inbox.try_recv().is_ok() {
            stuck_count += 1;
        }
        assert_eq!(stuck_count, INBOX_CAPACITY);
        assert_eq!(live_count, total - INBOX_CAPACITY);
    }

    #[tokio::test]
    async fn test_full_inbox_does_not_block_fanout() {
        // ---
        let d = driver("unit-full-fanout");
        let target = Target::new("bus").with_fanout(true);
        let _stuck = d.listen(&Target::new("bus")).await.unwrap();
        let mut live = d.listen(&Target::new("bus")).await.unwrap();

        for i in 0..INBOX_CAPACITY + 4 {
            tokio::time::timeout(
                Duration::from_millis(200),
                d.send(&target, Context::new(), json!(i), None, None),
            )
            .await
            .expect("fanout must not wait on a full inbox")
            .unwrap();
            assert_eq!(live.inbox.try_recv().unwrap().message, json!(i));
        }
    }

    #[tokio::test]
    async fn test_notification_dropped_when_every_inbox_is_full() {
        // ---
        let d = driver("unit-full-notify");
        let target = Target::new("events");
        let mut stuck = d.listen(&target).await.unwrap();

        for i in 0..INBOX_CAPACITY + 1 {
            tokio::time::timeout(
                Duration::from_millis(200),
                d.send_notification(&target, Context::new(), json!(i), 1.0),
            )
            .await
            .expect("notification must not wait on a full inbox")
            .unwrap();
        }

        let mut received = Vec::new();
        while let Ok(msg) = stuck.inbox.try_recv() {
            received.push(msg.message);
        }
        assert_eq!(received.len(), INBOX_CAPACITY);
        assert_eq!(received.last(), Some(&json!(INBOX_CAPACITY - 1)));
    }

    #[tokio::test]
    async fn test_wait_for_reply_fails_when_every_inbox_is_full() {
        // ---
        let d = driver("unit-full-call");
        let target = Target::new("work");
        let _stuck = d.listen(&target).await.unwrap();

        for i in 0..INBOX_CAPACITY {
            d.send(&target, Context::new(), json!(i), None, None)
                .await
                .unwrap();
        }

        let err = d
            .send(&target, Context::new(), json!("call"), Some(true), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Driver { .. }));
    }
}
