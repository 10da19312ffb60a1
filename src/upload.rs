//! Upload coordination
//!
//! Works out which synced activities have not been uploaded yet, stages an
//! import manifest for them and hands it to the external `gupload` tool. The
//! uploader's output is matched line by line for per-activity outcome
//! markers; every marked activity is recorded in the dedup store.
//!
//! Note the inherited contract around exit status: `gupload` may fail overall
//! while still having uploaded (or detected as duplicate) individual
//! activities, so output parsing and dedup inserts happen regardless of the
//! exit status. The status itself only affects logging.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::Result;
use crate::command::{path_arg, run_with_timeout};
use crate::config::EffectiveConfig;
use crate::store::DedupStore;

/// Markers in the uploader's output that carry a per-activity outcome
const OUTCOME_MARKERS: [&str; 2] = ["already uploaded", "Upload"];

/// Filenames currently present in the local activity directory
pub fn list_on_disk(dest_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dest_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Activities on disk that the store has no record of for this user
pub fn to_import(on_disk: &[String], imported: &[String]) -> Vec<String> {
    on_disk
        .iter()
        .filter(|name| !imported.contains(name))
        .cloned()
        .collect()
}

/// Render the import manifest for the uploader.
///
/// Format: header row `filename,name,type`, then one newline-terminated row
/// per activity with an empty display name.
pub fn build_manifest(to_import: &[String], dest_dir: &Path, activity_type: &str) -> String {
    let mut manifest = String::from("filename,name,type\n");
    for name in to_import {
        manifest.push_str(&format!(
            "{}/{},,{}\n",
            path_arg(dest_dir),
            name,
            activity_type
        ));
    }
    manifest
}

/// Extract the activity identifier from one line of uploader output.
///
/// A line counts as a per-activity outcome when it contains one of the fixed
/// marker substrings; the identifier is the line's trailing
/// whitespace-delimited token. This contract is dictated by gupload's output
/// format.
pub fn parse_outcome_line(line: &str) -> Option<&str> {
    if !OUTCOME_MARKERS.iter().any(|marker| line.contains(marker)) {
        return None;
    }
    line.split_whitespace().last()
}

/// Upload any activities not yet recorded for the configured user.
///
/// Best-effort: every failure mode is logged and absorbed.
pub async fn upload_new_activities(config: &EffectiveConfig, store: &DedupStore) {
    let (Some(user), Some(password)) = (&config.user, &config.password) else {
        error!("No uploader credentials configured, skipping upload");
        return;
    };

    let on_disk = match list_on_disk(&config.activity_dest_dir) {
        Ok(names) => names,
        Err(e) => {
            error!(
                "Could not list {}: {}",
                config.activity_dest_dir.display(),
                e
            );
            return;
        }
    };

    let imported = match store.get_imported(user) {
        Ok(imported) => imported,
        Err(e) => {
            error!("Could not query dedup store: {}", e);
            return;
        }
    };

    let list_to_import = to_import(&on_disk, &imported);
    if list_to_import.is_empty() {
        info!("No new activities to import");
        return;
    }

    info!("{} new activities to import", list_to_import.len());

    let manifest = build_manifest(&list_to_import, &config.activity_dest_dir, &config.activity_type);
    if let Err(e) = std::fs::write(&config.import_file, manifest) {
        error!(
            "Could not write manifest {}: {}",
            config.import_file.display(),
            e
        );
        return;
    }

    let timeout = Duration::from_secs(config.command_timeout_secs);
    let output = match run_with_timeout(
        "gupload",
        &[&path_arg(&config.import_file), "-u", user, "-p", password],
        timeout,
    )
    .await
    {
        Ok(output) => output,
        Err(e) => {
            error!("Upload did not complete: {}", e);
            return;
        }
    };

    // Parse output before looking at the exit status: a failed run may still
    // have uploaded individual activities.
    for line in output.lines() {
        info!("gupload: {}", line);
        if let Some(activity) = parse_outcome_line(line)
            && let Err(e) = store.insert(activity, user)
        {
            warn!("Could not record activity {}: {}", activity, e);
        }
    }

    if output.success {
        info!("Uploaded files to garmin connect");
    } else {
        error!(
            "Could not upload files to garmin connect (exit {:?})",
            output.code
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_to_import_set_difference() {
        let on_disk = names(&["A", "B", "C"]);
        let imported = names(&["A"]);
        assert_eq!(to_import(&on_disk, &imported), names(&["B", "C"]));
    }

    #[test]
    fn test_to_import_with_empty_store() {
        let on_disk = names(&["A", "B", "C"]);
        assert_eq!(to_import(&on_disk, &[]), on_disk);
    }

    #[test]
    fn test_to_import_fully_imported() {
        let on_disk = names(&["A", "B"]);
        let imported = names(&["A", "B", "C"]);
        assert!(to_import(&on_disk, &imported).is_empty());
    }

    #[test]
    fn test_manifest_format() {
        let manifest = build_manifest(
            &names(&["act1.fit"]),
            Path::new("Activities"),
            "cycling",
        );
        assert_eq!(manifest, "filename,name,type\nActivities/act1.fit,,cycling\n");
    }

    #[test]
    fn test_manifest_multiple_rows() {
        let manifest = build_manifest(
            &names(&["a.fit", "b.fit"]),
            Path::new("Activities"),
            "uncategorized",
        );
        assert_eq!(
            manifest,
            "filename,name,type\n\
             Activities/a.fit,,uncategorized\n\
             Activities/b.fit,,uncategorized\n"
        );
    }

    #[test]
    fn test_parse_outcome_markers() {
        assert_eq!(
            parse_outcome_line("Activity already uploaded act1.fit"),
            Some("act1.fit")
        );
        assert_eq!(
            parse_outcome_line("Upload successful: act2.fit"),
            Some("act2.fit")
        );
        assert_eq!(parse_outcome_line("Signing in to Garmin Connect"), None);
        assert_eq!(parse_outcome_line(""), None);
    }

    #[test]
    fn test_list_on_disk_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.fit"), b"x").unwrap();
        std::fs::write(dir.path().join("a.fit"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        assert_eq!(list_on_disk(dir.path()).unwrap(), names(&["a.fit", "b.fit"]));
    }

    #[tokio::test]
    async fn test_upload_without_credentials_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open_in_memory().unwrap();
        let config = EffectiveConfig {
            poll_interval_secs: 1,
            mount_point: PathBuf::from("/mnt"),
            activity_src_dir: "Garmin/Activities".to_string(),
            activity_dest_dir: dir.path().to_path_buf(),
            activity_type: "uncategorized".to_string(),
            import_file: dir.path().join("manifest.csv"),
            user: None,
            password: None,
            command_timeout_secs: 30,
        };

        std::fs::write(dir.path().join("act1.fit"), b"x").unwrap();
        upload_new_activities(&config, &store).await;

        // Nothing invoked, nothing recorded, no manifest staged
        assert!(!config.import_file.exists());
    }
}
