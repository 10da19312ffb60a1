//! Activity file sync
//!
//! Copies activity files from the mounted device into local storage through
//! the external `rsync` executable: recursive, additive and timestamp
//! preserving. Sync is best-effort; a missing source directory or a failed
//! copy is logged and the session carries on to the upload step with
//! whatever is already on disk.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use crate::command::{path_arg, run_with_timeout};
use crate::config::EffectiveConfig;

/// Copy new activity files from `mount_point/<activity_src_dir>` into the
/// local destination directory.
pub async fn sync_activities(config: &EffectiveConfig, mount_point: &Path) {
    let dest = &config.activity_dest_dir;
    if let Err(e) = std::fs::create_dir_all(dest) {
        error!("Could not create {}: {}", dest.display(), e);
        return;
    }

    let source = mount_point.join(&config.activity_src_dir);
    if !source.is_dir() {
        error!("{} does not exist. Can't sync from it", source.display());
        return;
    }

    // Trailing slashes: merge the *contents* of source into dest
    let source_arg = format!("{}/", path_arg(&source));
    let dest_arg = format!("{}/", path_arg(dest));

    let timeout = Duration::from_secs(config.command_timeout_secs);
    match run_with_timeout("rsync", &["-av", &source_arg, &dest_arg], timeout).await {
        Ok(output) => {
            for line in output.lines() {
                info!("rsync: {}", line);
            }
            if output.success {
                info!("sync ok");
            } else {
                error!("Could not sync (exit {:?})", output.code);
            }
        }
        Err(e) => {
            error!("Sync did not complete: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(dest: PathBuf) -> EffectiveConfig {
        EffectiveConfig {
            poll_interval_secs: 1,
            mount_point: PathBuf::from("/mnt"),
            activity_src_dir: "Garmin/Activities".to_string(),
            activity_dest_dir: dest,
            activity_type: "uncategorized".to_string(),
            import_file: PathBuf::from("/tmp/import_activities.csv"),
            user: None,
            password: None,
            command_timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_creates_destination_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Activities");
        let config = test_config(dest.clone());

        // Source is missing: sync is skipped, but the destination still
        // gets created.
        sync_activities(&config, dir.path()).await;
        assert!(dest.is_dir());
    }

    fn rsync_available() -> bool {
        std::process::Command::new("rsync")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[tokio::test]
    async fn test_copies_activity_files() {
        if !rsync_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mnt");
        let source = mount.join("Garmin/Activities");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("act1.fit"), b"data").unwrap();

        let dest = dir.path().join("Activities");
        let config = test_config(dest.clone());

        sync_activities(&config, &mount).await;
        assert_eq!(std::fs::read(dest.join("act1.fit")).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_sync_is_additive() {
        if !rsync_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mnt");
        let source = mount.join("Garmin/Activities");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("act2.fit"), b"new").unwrap();

        let dest = dir.path().join("Activities");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("act1.fit"), b"old").unwrap();

        let config = test_config(dest.clone());
        sync_activities(&config, &mount).await;

        // Files already present locally are not deleted
        assert!(dest.join("act1.fit").exists());
        assert!(dest.join("act2.fit").exists());
    }
}
