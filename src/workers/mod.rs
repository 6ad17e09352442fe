//! Background worker tasks
//!
//! This module contains the long-running recorder task and the collaborators
//! it hands work to: session wiring and persistence of finished recordings.

pub mod factory;
pub mod library;
pub mod recorder;

/// Trait for workers that need graceful shutdown.
pub trait WorkerClose {
    /// Close and clean up worker resources.
    fn close(&mut self);
}
