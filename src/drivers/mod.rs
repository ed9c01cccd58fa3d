//! Driver implementations.
//!
//! Concrete implementations of the domain-level [`Driver`](crate::Driver)
//! trait. Drivers are never named by the resolver; each one is registered
//! with a [`DriverManager`] under its scheme.
//!
//! Domain code must not depend on driver-specific types.

mod memory;

pub use memory::{create_driver as create_memory_driver, MemoryDriver, MemoryHub, MEMORY_SCHEME};

use crate::{DriverManager, DRIVER_NAMESPACE};

/// Register every driver compiled into this crate.
pub(crate) fn register_builtin_drivers(manager: &DriverManager) {
    manager.register(DRIVER_NAMESPACE, MEMORY_SCHEME, create_memory_driver);
}
