//! garmin-agent library
//!
//! Background agent that watches for Garmin devices over USB, mounts them,
//! syncs new activity files to local storage and hands them to the external
//! `gupload` uploader, deduplicating against a persistent store of already
//! uploaded activity identifiers.

pub mod agent;
pub mod channel;
pub mod command;
pub mod config;
pub mod device_id;
pub mod error;
pub mod logging;
pub mod mount;
pub mod store;
pub mod sync;
pub mod upload;
pub mod usb;

pub use agent::{Agent, State};
pub use channel::{AgentBridge, DeviceEvent, WatcherCommand, WatcherSide, create_bridge};
pub use config::{AgentConfig, DeviceOverrides, EffectiveConfig, GlobalSettings};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use store::DedupStore;
