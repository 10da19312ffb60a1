//! Block device resolution
//!
//! Expands a USB device's sysfs path to its underlying block-device nodes.
//! For a mass-storage device, the kernel exposes the node under a `block`
//! directory a few levels below the USB device, e.g.
//! `1-1.4/1-1.4:1.0/host2/target2:0:0/2:0:0:0/block/sda`. The directory
//! entries under `block` are the node names; the mountable device node is
//! `/dev/<name>`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Levels below the USB device to search for a `block` directory
const MAX_SEARCH_DEPTH: usize = 6;

/// Resolve a USB sysfs device path to `/dev` block-device nodes.
///
/// Returns an empty list when the device exposes no block device (yet) —
/// SCSI probing can lag the USB bind event, so callers retry on later
/// iterations.
pub fn resolve_block_devices(syspath: &Path) -> Vec<PathBuf> {
    resolve_block_device_names(syspath)
        .into_iter()
        .map(|name| Path::new("/dev").join(name))
        .collect()
}

/// Block-device node names exposed below a sysfs device path
fn resolve_block_device_names(syspath: &Path) -> Vec<String> {
    let mut names = Vec::new();
    collect_block_names(syspath, MAX_SEARCH_DEPTH, &mut names);
    names.sort();
    names.dedup();
    names
}

fn collect_block_names(dir: &Path, depth: usize, names: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Could not read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        // sysfs is full of symlink cycles; descend into plain directories only
        if path.is_symlink() || !path.is_dir() {
            continue;
        }

        if entry.file_name() == "block" {
            if let Ok(nodes) = std::fs::read_dir(&path) {
                for node in nodes.flatten() {
                    names.push(node.file_name().to_string_lossy().into_owned());
                }
            }
        } else if depth > 0 {
            collect_block_names(&path, depth - 1, names);
        }
    }
}

/// FIFO queue of block-device candidates awaiting a session.
///
/// Insertion is idempotent: a node already queued is not queued again.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    queue: VecDeque<PathBuf>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a candidate unless it is already pending
    pub fn push_unique(&mut self, device: PathBuf) {
        if !self.queue.contains(&device) {
            debug!("Queued block device candidate {}", device.display());
            self.queue.push_back(device);
        }
    }

    /// Next candidate, oldest first
    pub fn pop(&mut self) -> Option<PathBuf> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_finds_block_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let block = dir
            .path()
            .join("1-1.4:1.0/host2/target2:0:0/2:0:0:0/block");
        std::fs::create_dir_all(block.join("sda")).unwrap();

        assert_eq!(resolve_block_device_names(dir.path()), vec!["sda"]);
    }

    #[test]
    fn test_resolve_without_block_device() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("1-1.4:1.0/ep_81")).unwrap();

        assert!(resolve_block_device_names(dir.path()).is_empty());
    }

    #[test]
    fn test_resolve_maps_to_dev() {
        let dir = tempfile::tempdir().unwrap();
        let block = dir.path().join("1-1:1.0/host0/target0:0:0/0:0:0:0/block");
        std::fs::create_dir_all(block.join("sdb")).unwrap();

        assert_eq!(
            resolve_block_devices(dir.path()),
            vec![PathBuf::from("/dev/sdb")]
        );
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = CandidateQueue::new();
        queue.push_unique(PathBuf::from("/dev/sda"));
        queue.push_unique(PathBuf::from("/dev/sdb"));

        assert_eq!(queue.pop(), Some(PathBuf::from("/dev/sda")));
        assert_eq!(queue.pop(), Some(PathBuf::from("/dev/sdb")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_insert_is_idempotent() {
        let mut queue = CandidateQueue::new();
        queue.push_unique(PathBuf::from("/dev/sda"));
        queue.push_unique(PathBuf::from("/dev/sda"));

        assert_eq!(queue.len(), 1);
    }
}
