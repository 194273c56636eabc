// Licensed under the Apache-2.0 license

//! Interrupt routing for one device.
//!
//! The same peripheral driver runs unmodified whether firmware wired its
//! interrupt through a GPIO pin or a platform interrupt line; the
//! [`InterruptRouter`] hides that decision behind one enable / disable /
//! register / unregister / query surface.

pub mod router;

pub use router::{InterruptBackend, InterruptRouter, SourceKind};
