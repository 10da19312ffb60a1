//! Agent state machine
//!
//! The single loop that sequences a device session: mount, per-device config
//! overlay, activity sync, upload, unmount. One state transition is processed
//! per iteration and the loop runs forever; there is no terminal state.
//!
//! The loop owns all of its state explicitly (queues, the active session,
//! the dedup store) and is the only consumer of the watcher's event channel.
//! At most one session is active at any time, so all device work is
//! serialized by construction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channel::{AgentBridge, DeviceEvent};
use crate::config::{AgentConfig, EffectiveConfig};
use crate::device_id;
use crate::mount::MountManager;
use crate::store::DedupStore;
use crate::sync::sync_activities;
use crate::upload::upload_new_activities;
use crate::usb::resolver::{CandidateQueue, resolve_block_devices};

/// SCSI probing can lag the USB bind event; pending device paths are
/// re-resolved once per idle iteration up to this many times before being
/// dropped.
const MAX_RESOLVE_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Mount,
    GetDeviceOverrides,
    Sync,
    Upload,
    Umount,
}

/// The device currently being processed. At most one exists at a time.
struct ActiveSession {
    /// Block device node being mounted
    device: PathBuf,
    /// Mount point in use for this session (fixed at mount time)
    mount_point: PathBuf,
    /// Session configuration; defaults until the overlay step runs
    effective: EffectiveConfig,
}

pub struct Agent {
    config: AgentConfig,
    store: DedupStore,
    bridge: AgentBridge,
    mounts: MountManager,
    /// USB device paths seen via hotplug, awaiting block-device resolution
    pending: HashMap<PathBuf, u32>,
    /// Resolved block devices awaiting a session, oldest first
    candidates: CandidateQueue,
    session: Option<ActiveSession>,
    state: State,
}

impl Agent {
    pub fn new(config: AgentConfig, store: DedupStore, bridge: AgentBridge) -> Self {
        let timeout = Duration::from_secs(config.global.command_timeout_secs);
        Self {
            config,
            store,
            bridge,
            mounts: MountManager::new(timeout),
            pending: HashMap::new(),
            candidates: CandidateQueue::new(),
            session: None,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Run the state machine forever.
    pub async fn run(mut self) {
        info!("Agent loop started");
        loop {
            self.step().await;
        }
    }

    /// Process one state transition.
    pub async fn step(&mut self) {
        self.state = match self.state {
            State::Idle => self.idle().await,
            State::Mount => self.mount().await,
            State::GetDeviceOverrides => self.get_device_overrides(),
            State::Sync => self.sync().await,
            State::Upload => self.upload().await,
            State::Umount => self.umount().await,
        };
        debug!("State: {:?}", self.state);
    }

    /// Drain hotplug events, resolve pending device paths and either start a
    /// session or sleep for the poll interval.
    async fn idle(&mut self) -> State {
        for event in self.bridge.drain_events() {
            let DeviceEvent::DeviceBound { syspath } = event;
            // Duplicate bind events for a path still pending coalesce
            self.pending.entry(syspath).or_insert(0);
        }

        self.resolve_pending();

        if let Some(device) = self.candidates.pop() {
            info!("Starting session for {}", device.display());
            self.session = Some(ActiveSession {
                device,
                mount_point: self.config.global.mount_point.clone(),
                effective: self.config.effective(None),
            });
            return State::Mount;
        }

        let interval = Duration::from_secs(self.config.global.poll_interval_secs);
        debug!("sleep {:?}", interval);
        tokio::time::sleep(interval).await;
        State::Idle
    }

    /// Expand pending USB device paths to block-device candidates
    fn resolve_pending(&mut self) {
        let mut resolved = Vec::new();
        for (syspath, attempts) in &mut self.pending {
            let devices = resolve_block_devices(syspath);
            if devices.is_empty() {
                *attempts += 1;
                continue;
            }
            for device in devices {
                self.candidates.push_unique(device);
            }
            resolved.push(syspath.clone());
        }

        for syspath in resolved {
            self.pending.remove(&syspath);
        }
        self.pending.retain(|syspath, attempts| {
            if *attempts >= MAX_RESOLVE_ATTEMPTS {
                warn!(
                    "No block device appeared under {}, giving up",
                    syspath.display()
                );
                false
            } else {
                true
            }
        });
    }

    async fn mount(&mut self) -> State {
        let Some(session) = &self.session else {
            // No session means nothing resolved; back to idle
            return State::Idle;
        };

        if !session.device.exists() {
            warn!(
                "Device {} vanished before mount",
                session.device.display()
            );
            self.session = None;
            return State::Idle;
        }

        // Mount failure is logged and the pipeline proceeds optimistically;
        // the sync step will find no source directory and skip itself.
        if let Err(e) = self
            .mounts
            .mount(&session.device, &session.mount_point)
            .await
        {
            error!("{}", e);
        }

        State::GetDeviceOverrides
    }

    /// Read the device identity from the mounted filesystem and recompute the
    /// session configuration with that device's overrides applied.
    fn get_device_overrides(&mut self) -> State {
        let Some(session) = &mut self.session else {
            return State::Idle;
        };

        let identity = device_id::read_identity(&session.mount_point);
        if let Some(id) = &identity {
            info!("Applying configuration overrides for device {}", id);
        }
        session.effective = self.config.effective(identity.as_deref());

        State::Sync
    }

    async fn sync(&mut self) -> State {
        if let Some(session) = &self.session {
            sync_activities(&session.effective, &session.mount_point).await;
        }
        State::Upload
    }

    async fn upload(&mut self) -> State {
        if let Some(session) = &self.session {
            upload_new_activities(&session.effective, &self.store).await;
        }
        State::Umount
    }

    async fn umount(&mut self) -> State {
        if let Some(session) = self.session.take() {
            self.mounts.unmount(&session.mount_point).await;
        }
        State::Idle
    }
}
