// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;

use mom_transport::{
    // ---
    ConfigOpts,
    Context,
    Driver,
    DriverArgs,
    DriverPtr,
    DriverRegistry,
    Listener,
    Message,
    Result,
    Target,
};

/// One `lookup` call seen by [`RecordingRegistry`].
#[derive(Clone)]
pub struct Lookup {
    pub namespace: String,
    pub name: String,
    pub conf: Arc<ConfigOpts>,
    pub args: DriverArgs,
}

/// Registry that records lookups and hands out [`FakeDriver`]s, or fails
/// every lookup when built with [`RecordingRegistry::failing`].
#[derive(Default)]
pub struct RecordingRegistry {
    pub lookups: Mutex<Vec<Lookup>>,
    pub sends: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn only_lookup(&self) -> Lookup {
        let lookups = self.lookups.lock().unwrap();
        assert_eq!(lookups.len(), 1, "expected exactly one lookup");
        lookups[0].clone()
    }
}

impl DriverRegistry for RecordingRegistry {
    fn lookup(
        &self,
        namespace: &str,
        name: &str,
        conf: &Arc<ConfigOpts>,
        args: DriverArgs,
    ) -> anyhow::Result<DriverPtr> {
        // ---
        self.lookups.lock().unwrap().push(Lookup {
            namespace: namespace.to_string(),
            name: name.to_string(),
            conf: conf.clone(),
            args,
        });

        if self.fail {
            return Err(anyhow!("simulated runtime error"));
        }

        Ok(Box::new(FakeDriver {
            name: name.to_string(),
            sends: self.sends.clone(),
        }))
    }
}

/// Driver that records which backend handled each send.
pub struct FakeDriver {
    name: String,
    sends: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Driver for FakeDriver {
    async fn send(
        &self,
        _target: &Target,
        _ctxt: Context,
        _message: Message,
        _wait_for_reply: Option<bool>,
        _timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.sends.lock().unwrap().push(self.name.clone());
        Ok(None)
    }

    async fn send_notification(
        &self,
        _target: &Target,
        _ctxt: Context,
        _message: Message,
        _version: f64,
    ) -> Result<()> {
        Ok(())
    }

    async fn listen(&self, target: &Target) -> Result<Listener> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(Listener::new(target.clone(), rx))
    }
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
