//! Helpers for tests: a simulated Noise server and ready‑made Signal
//! devices with populated key stores.

#[cfg(feature = "signal")]
pub mod devices;
#[cfg(feature = "noise")]
pub mod noise_server;
