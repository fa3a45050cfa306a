//! # Interrupt Line
//!
//! This module exposes an abstract [`InterruptLine`] trait, which is
//! implemented by whatever gates delivery of the USB controller interrupt
//! (typically an NVIC channel). The transfer engine uses it both for the
//! upstream enable/disable entry points and to mask its own interrupt
//! around updates of state shared with the interrupt handler.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// A maskable interrupt line.
pub trait InterruptLine: Debug + Send + Sync + 'static {
    /// Allow the interrupt to be delivered.
    fn enable(&self);

    /// Prevent the interrupt from being delivered.
    fn disable(&self);

    /// Whether the interrupt is currently deliverable.
    fn is_enabled(&self) -> bool;
}

/// A dummy interrupt line for controllers whose interrupt isn't wired
/// anywhere. It always reports itself as disabled.
#[derive(Default, Debug, Clone, Copy)]
pub struct DummyInterruptLine {}

impl InterruptLine for DummyInterruptLine {
    fn enable(&self) {}

    fn disable(&self) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// An interrupt line backed by a single atomic flag.
///
/// Useful for simulation and for hosted builds where "delivering" the
/// interrupt means calling the interrupt service entry by hand.
#[derive(Default, Debug)]
pub struct SoftInterruptLine {
    enabled: AtomicBool,
}

impl SoftInterruptLine {
    /// Create a new line in the masked state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterruptLine for SoftInterruptLine {
    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
