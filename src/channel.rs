//! Async channel bridge between the agent loop and the USB watcher thread

use std::path::PathBuf;

use async_channel::{Receiver, Sender, bounded};

/// Commands from the agent to the USB watcher thread
#[derive(Debug)]
pub enum WatcherCommand {
    /// Shutdown the watcher thread gracefully
    Shutdown,
}

/// Events from the USB watcher thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A USB device matching the configured filters was bound
    DeviceBound {
        /// sysfs path of the USB device (e.g. /sys/bus/usb/devices/1-1.4)
        syspath: PathBuf,
    },
}

/// Handle for the agent loop (async side)
#[derive(Clone)]
pub struct AgentBridge {
    cmd_tx: Sender<WatcherCommand>,
    event_rx: Receiver<DeviceEvent>,
}

impl AgentBridge {
    /// Send a command to the watcher thread
    pub async fn send_command(&self, cmd: WatcherCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Drain any pending device events without blocking
    pub fn drain_events(&self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Handle for the USB watcher thread (blocking side)
pub struct WatcherSide {
    cmd_rx: Receiver<WatcherCommand>,
    event_tx: Sender<DeviceEvent>,
}

impl WatcherSide {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<WatcherCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Send an event towards the agent loop.
    ///
    /// Never blocks: this runs on the hotplug delivery path. If the channel
    /// is full the event is dropped and reported to the caller.
    pub fn try_send_event(&self, event: DeviceEvent) -> crate::Result<()> {
        self.event_tx
            .try_send(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Sender half, for handing to the hotplug callback
    pub fn event_sender(&self) -> Sender<DeviceEvent> {
        self.event_tx.clone()
    }
}

/// Create the channel bridge between the agent loop and the watcher thread
///
/// Returns (AgentBridge for the tokio side, WatcherSide for the USB thread)
pub fn create_bridge() -> (AgentBridge, WatcherSide) {
    let (cmd_tx, cmd_rx) = bounded(16);
    let (event_tx, event_rx) = bounded(256);

    (
        AgentBridge { cmd_tx, event_rx },
        WatcherSide { cmd_rx, event_tx },
    )
}
