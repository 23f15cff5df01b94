//! Auto-Start Session Monitor and its debounce and wake helpers.

pub mod gate;
pub mod monitor;
pub mod wake;

pub use monitor::AutoStartMonitor;
