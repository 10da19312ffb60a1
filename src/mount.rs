//! Mount lifecycle
//!
//! Mounts and unmounts block devices through the external `mount`/`umount`
//! executables. Mounting is idempotent: the current mount table is inspected
//! first, and a device or mount point that is already mounted short-circuits
//! to success without invoking anything.
//!
//! Unmounting is attempt-once: the exit status is logged and the session
//! proceeds regardless, so the next mount of the shared mount point may fail
//! and be retried on a later session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::Result;
use crate::command::{path_arg, run_with_timeout};

const MOUNT_TABLE: &str = "/proc/mounts";

/// Outcome of a successful [`MountManager::mount`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The external mount operation ran and succeeded
    Mounted,
    /// The device or mount point already appeared in the mount table
    AlreadyMounted,
}

pub struct MountManager {
    mount_table: PathBuf,
    timeout: Duration,
}

impl MountManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mount_table: PathBuf::from(MOUNT_TABLE),
            timeout,
        }
    }

    #[cfg(test)]
    fn with_mount_table(mount_table: PathBuf, timeout: Duration) -> Self {
        Self {
            mount_table,
            timeout,
        }
    }

    /// Mount `device` at `mount_point`, idempotently.
    ///
    /// Returns an error only when the mount operation itself ran and failed
    /// (nonzero exit or timeout); the caller treats that as non-fatal.
    pub async fn mount(&self, device: &Path, mount_point: &Path) -> Result<MountOutcome> {
        let table = std::fs::read_to_string(&self.mount_table)?;
        if is_mounted(&table, device, mount_point) {
            info!(
                "{} already mounted at {}, skipping mount",
                device.display(),
                mount_point.display()
            );
            return Ok(MountOutcome::AlreadyMounted);
        }

        let output = run_with_timeout(
            "mount",
            &[&path_arg(device), &path_arg(mount_point)],
            self.timeout,
        )
        .await?;

        if output.success {
            info!("Mounted {} onto {}", device.display(), mount_point.display());
            Ok(MountOutcome::Mounted)
        } else {
            error!(
                "Could not mount {} onto {} (exit {:?}): {}",
                device.display(),
                mount_point.display(),
                output.code,
                output.stderr.trim()
            );
            Err(crate::Error::Mount(format!(
                "mount of {} failed",
                device.display()
            )))
        }
    }

    /// Unmount `mount_point`, attempt-once.
    ///
    /// The exit status is only logged; the state machine proceeds regardless
    /// of the outcome.
    pub async fn unmount(&self, mount_point: &Path) {
        match run_with_timeout("umount", &[&path_arg(mount_point)], self.timeout).await {
            Ok(output) if output.success => {
                info!("Unmounted {}", mount_point.display());
            }
            Ok(output) => {
                error!(
                    "Could not unmount {} (exit {:?}): {}",
                    mount_point.display(),
                    output.code,
                    output.stderr.trim()
                );
            }
            Err(e) => {
                warn!("Unmount of {} did not complete: {}", mount_point.display(), e);
            }
        }
    }
}

/// Whether `device` or `mount_point` appears in a mount table.
///
/// The table is in `/proc/mounts` format: one mount per line, source and
/// target as the first two whitespace-delimited fields.
pub fn is_mounted(table: &str, device: &Path, mount_point: &Path) -> bool {
    let device = device.to_string_lossy();
    let mount_point = mount_point.to_string_lossy();
    table.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let source = fields.next();
        let target = fields.next();
        source == Some(device.as_ref()) || target == Some(mount_point.as_ref())
    })
}
