//! framestamp: live capture with a per-frame counter overlay, re-encoded into a
//! fixed-length recording.

pub mod assets;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;
