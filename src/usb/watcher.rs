//! USB hotplug watcher
//!
//! Dedicated thread that owns the libusb context, runs the event loop and
//! forwards arrivals of matching devices to the agent loop. The hotplug
//! callback never blocks: events go out with `try_send` and are dropped (and
//! logged) if the agent is too far behind.

use std::path::PathBuf;
use std::time::Duration;

use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use tracing::{debug, info, warn};

use crate::channel::{DeviceEvent, WatcherCommand, WatcherSide};

/// USB hotplug watcher thread
pub struct UsbWatcherThread {
    context: Context,
    watcher: WatcherSide,
    _hotplug_registration: Registration<Context>,
}

impl UsbWatcherThread {
    /// Create the watcher: open a USB context and register the hotplug
    /// callback for devices matching `filters`.
    pub fn new(watcher: WatcherSide, filters: Vec<String>) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        let callback = HotplugCallback {
            event_sender: watcher.event_sender(),
            filters,
        };

        // enumerate(true): devices already plugged in at startup are
        // delivered as arrivals too
        let registration = HotplugBuilder::new()
            .enumerate(true)
            .register(&context, Box::new(callback))?;

        debug!("Hotplug callback registered");

        Ok(Self {
            context,
            watcher,
            _hotplug_registration: registration,
        })
    }

    /// Run the watcher event loop until a Shutdown command arrives.
    pub fn run(self) -> Result<(), rusb::Error> {
        info!("USB watcher thread started");

        loop {
            if let Some(WatcherCommand::Shutdown) = self.watcher.try_recv_command() {
                info!("USB watcher shutting down");
                break;
            }

            // Process USB events with a timeout so shutdown commands are
            // picked up regularly
            match self.context.handle_events(Some(Duration::from_millis(100))) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        info!("USB watcher thread stopped");
        Ok(())
    }
}

/// Hotplug callback handler
///
/// Runs on the libusb event delivery path; must never block and must never
/// panic out. A device it cannot read is logged and skipped.
struct HotplugCallback {
    event_sender: async_channel::Sender<DeviceEvent>,
    filters: Vec<String>,
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                warn!("Could not read descriptor of arrived device: {}", e);
                return;
            }
        };

        if !check_filter(desc.vendor_id(), desc.product_id(), &self.filters) {
            debug!(
                "Ignoring device {:04x}:{:04x} (no filter match)",
                desc.vendor_id(),
                desc.product_id()
            );
            return;
        }

        let Some(syspath) = device_syspath(&device) else {
            debug!(
                "No sysfs path for device {:04x}:{:04x}",
                desc.vendor_id(),
                desc.product_id()
            );
            return;
        };

        info!(
            "USB bind event for {:04x}:{:04x} at {}",
            desc.vendor_id(),
            desc.product_id(),
            syspath.display()
        );

        if let Err(e) = self.event_sender.try_send(DeviceEvent::DeviceBound { syspath }) {
            warn!("Dropping device event, agent channel unavailable: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
    }
}

/// sysfs path of a USB device, derived from its bus number and port chain
/// (e.g. bus 1, ports [1, 4] -> /sys/bus/usb/devices/1-1.4)
fn device_syspath<T: UsbContext>(device: &Device<T>) -> Option<PathBuf> {
    let ports = device.port_numbers().ok()?;
    if ports.is_empty() {
        // Root hub, never a storage device
        return None;
    }

    let chain = ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(".");

    Some(PathBuf::from(format!(
        "/sys/bus/usb/devices/{}-{}",
        device.bus_number(),
        chain
    )))
}

/// Check whether a VID/PID pair matches any of the configured filters.
///
/// Filter format: "0xVID:0xPID", either side may be "*". An empty filter
/// list allows everything.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    for filter in filters {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            continue;
        }

        let matches = |pattern: &str, value: u16| {
            pattern == "*"
                || u16::from_str_radix(pattern.trim_start_matches("0x"), 16)
                    .map(|v| v == value)
                    .unwrap_or(false)
        };

        if matches(parts[0], vid) && matches(parts[1], pid) {
            return true;
        }
    }

    false
}

/// Spawn the USB watcher thread.
///
/// Returns a join handle; the thread runs until a Shutdown command is
/// received over the bridge.
pub fn spawn_usb_watcher(
    watcher: WatcherSide,
    filters: Vec<String>,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-watcher".to_string())
        .spawn(move || {
            let thread = UsbWatcherThread::new(watcher, filters)?;
            thread.run()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_logic() {
        let filters = vec!["0x091e:0x0003".to_string(), "0x1234:*".to_string()];

        assert!(check_filter(0x091e, 0x0003, &filters));
        assert!(check_filter(0x1234, 0x0001, &filters));
        assert!(check_filter(0x1234, 0xffff, &filters));

        assert!(!check_filter(0x091e, 0x0004, &filters));
        assert!(!check_filter(0x5678, 0x0003, &filters));

        // Empty filters allow all
        assert!(check_filter(0x5678, 0x0003, &[]));
    }

    #[test]
    fn test_filter_wildcard_vid() {
        let filters = vec!["*:0x0003".to_string()];
        assert!(check_filter(0x0001, 0x0003, &filters));
        assert!(!check_filter(0x0001, 0x0004, &filters));
    }
}
