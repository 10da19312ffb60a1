//! USB subsystem
//!
//! Watches for hotplug arrivals of devices matching the configured filters
//! and resolves them to mountable block-device nodes.
//!
//! Hotplug callbacks run in a dedicated blocking thread (the watcher) that
//! owns the libusb context; discovered device paths travel to the agent loop
//! over the async channel bridge.

pub mod resolver;
pub mod watcher;

pub use resolver::{CandidateQueue, resolve_block_devices};
pub use watcher::{UsbWatcherThread, spawn_usb_watcher};
