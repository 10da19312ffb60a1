//! Device identity lookup
//!
//! Garmin mass-storage devices carry an XML descriptor at
//! `Garmin/GarminDevice.xml` whose `Id` element is the unit's identity. The
//! identity selects the per-device configuration overrides; a device without
//! the descriptor simply runs with the global defaults.

use std::path::Path;

use tracing::{debug, warn};

/// Relative descriptor path on the mounted filesystem
pub const DEVICE_DESCRIPTOR_PATH: &str = "Garmin/GarminDevice.xml";

/// Read the device identity from a mounted filesystem.
///
/// Returns `None` when the descriptor file or its `Id` element is absent;
/// neither is an error.
pub fn read_identity(mount_point: &Path) -> Option<String> {
    let descriptor = mount_point.join(DEVICE_DESCRIPTOR_PATH);
    if !descriptor.exists() {
        debug!("No device descriptor at {}", descriptor.display());
        return None;
    }

    let content = match std::fs::read_to_string(&descriptor) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read {}: {}", descriptor.display(), e);
            return None;
        }
    };

    match identity_from_xml(&content) {
        Some(id) => {
            debug!("Device identity: {}", id);
            Some(id)
        }
        None => {
            warn!("No Id element in {}", descriptor.display());
            None
        }
    }
}

/// Extract the text of the first `Id` element from a descriptor document
pub fn identity_from_xml(xml: &str) -> Option<String> {
    let doc = match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Malformed device descriptor: {}", e);
            return None;
        }
    };

    doc.descendants()
        .find(|node| node.has_tag_name("Id"))
        .and_then(|node| node.text())
        .map(|text| text.trim().to_string())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Device xmlns="http://www.garmin.com/xmlschemas/GarminDevice/v2">
  <Model>
    <PartNumber>006-B1036-00</PartNumber>
    <Description>EDGE500</Description>
  </Model>
  <Id>3907633405</Id>
</Device>"#;

    #[test]
    fn test_identity_from_descriptor() {
        assert_eq!(
            identity_from_xml(DESCRIPTOR).as_deref(),
            Some("3907633405")
        );
    }

    #[test]
    fn test_missing_id_element() {
        assert_eq!(identity_from_xml("<Device><Model/></Device>"), None);
    }

    #[test]
    fn test_malformed_document() {
        assert_eq!(identity_from_xml("<Device><Id>123"), None);
        assert_eq!(identity_from_xml(""), None);
    }

    #[test]
    fn test_empty_id_is_absent() {
        assert_eq!(identity_from_xml("<Device><Id>  </Id></Device>"), None);
    }

    #[test]
    fn test_missing_descriptor_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_identity(dir.path()), None);
    }

    #[test]
    fn test_read_identity_from_mount() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Garmin")).unwrap();
        std::fs::write(dir.path().join(DEVICE_DESCRIPTOR_PATH), DESCRIPTOR).unwrap();

        assert_eq!(
            read_identity(dir.path()).as_deref(),
            Some("3907633405")
        );
    }
}
