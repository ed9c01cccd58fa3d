//! Transport resolution for message-oriented RPC and notifications.
//!
//! A transport is an abstract messaging endpoint used for RPC calls, RPC
//! replies and one-way notifications. This crate resolves which backend
//! driver a transport should use from layered configuration, loads that
//! driver by name from a registry, and hands back a [`Transport`] exposing
//! the same three operations whatever the backend: `send`,
//! `send_notification` and `listen`.
//!
//! Callers never construct drivers themselves:
//!
//! ```
//! use mom_transport::{get_transport, ConfigOpts};
//! use std::sync::Arc;
//!
//! let conf = Arc::new(ConfigOpts::new().with_transport_url("memory://lib-docs"));
//! let transport = get_transport(&conf, None)?;
//! assert_eq!(transport.identity().scheme(), "memory");
//! # Ok::<(), mom_transport::MessagingError>(())
//! ```
//!
//! Backends are plugged in by registering a factory with the
//! [`DriverManager`] returned by [`global_registry`], or by resolving
//! through a [`TransportResolver`] that holds a registry of your own.

// Import all sub modules once...
mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod config;
mod domain;
mod drivers;
mod error;
mod registry;
mod resolver;
mod transport;
mod transport_url;

// Re-export main types
pub use config::{
    //
    global_defaults,
    set_transport_defaults,
    ConfigOpts,
    DefaultsGuard,
    TransportDefaults,
    TransportOptions,
    CONTROL_EXCHANGE,
    RPC_BACKEND,
    TRANSPORT_OPTS,
    TRANSPORT_URL,
};

pub use domain::{
    //
    Context,
    Driver,
    DriverPtr,
    IncomingMessage,
    Listener,
    Message,
    ReplySender,
    SendOptions,
    Target,
};

pub use drivers::{create_memory_driver, MemoryDriver, MemoryHub, MEMORY_SCHEME};
pub use error::{BoxError, MessagingError, Result};
pub use registry::{
    //
    global_registry,
    DriverArgs,
    DriverFactory,
    DriverManager,
    DriverRegistry,
    DRIVER_NAMESPACE,
};
pub use resolver::{get_transport, TransportResolver, DEFAULT_BACKEND};
pub use transport::Transport;
pub use transport_url::TransportIdentity;
