//! Domain layer public interface.
//!
//! This module defines the driver capability and the addressing and message
//! types that flow through it. It is independent of any concrete backend.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod driver;
mod target;

// --- Driver domain re-exports ---

pub use driver::{
    //
    Context,
    Driver,
    DriverPtr,
    IncomingMessage,
    Listener,
    Message,
    ReplySender,
    SendOptions,
};

pub use target::Target;
