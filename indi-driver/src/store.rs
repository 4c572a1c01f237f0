//! Persisted values of saveable properties
//!
//! Values are stored as element text keyed by device, property and element
//! name. A saveable property loads its stored values when it is registered,
//! before any client can see it, and is saved each time it is published
//! with state Ok.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indi_model::{ElementData, Property, PropertyKind};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// `element -> text`
pub type StoredValues = BTreeMap<String, String>;

/// Backing storage for saveable properties
pub trait ConfigStore: Send + Sync {
    /// Stored values for one property, if any
    fn load(&self, device: &str, property: &str) -> Result<Option<StoredValues>, StoreError>;

    /// Replace the stored values of one property
    fn save(&self, device: &str, property: &str, values: StoredValues) -> Result<(), StoreError>;
}

/// Text form of every persistable element of `property`
///
/// BLOBs are skipped. Numbers keep full precision rather than the display
/// format.
pub fn stored_values(property: &Property) -> StoredValues {
    if property.kind() == PropertyKind::Blob {
        return StoredValues::new();
    }
    property
        .elements()
        .iter()
        .map(|e| {
            let text = match e.data() {
                ElementData::Number { value, .. } => value.to_string(),
                _ => e.text_value(),
            };
            (e.name().to_string(), text)
        })
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct StoredConfig {
    #[serde(default)]
    devices: BTreeMap<String, BTreeMap<String, StoredValues>>,
}

impl StoredConfig {
    fn get(&self, device: &str, property: &str) -> Option<StoredValues> {
        self.devices.get(device)?.get(property).cloned()
    }

    fn put(&mut self, device: &str, property: &str, values: StoredValues) {
        self.devices
            .entry(device.to_string())
            .or_default()
            .insert(property.to_string(), values);
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: RwLock<StoredConfig>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, device: &str, property: &str) -> Result<Option<StoredValues>, StoreError> {
        Ok(self.config.read().get(device, property))
    }

    fn save(&self, device: &str, property: &str, values: StoredValues) -> Result<(), StoreError> {
        self.config.write().put(device, property, values);
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Store backed by one pretty-printed JSON file
///
/// The whole file is read once on open and rewritten on every save via a
/// temporary file and rename.
#[derive(Debug)]
pub struct JsonFileConfigStore {
    path: PathBuf,
    config: Mutex<StoredConfig>,
}

impl JsonFileConfigStore {
    /// Open `path`, starting empty when the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let config = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StoredConfig::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored configuration at {}", path.display());
                StoredConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, config: &StoredConfig) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn load(&self, device: &str, property: &str) -> Result<Option<StoredValues>, StoreError> {
        Ok(self.config.lock().get(device, property))
    }

    fn save(&self, device: &str, property: &str, values: StoredValues) -> Result<(), StoreError> {
        let mut config = self.config.lock();
        if config.get(device, property).as_ref() == Some(&values) {
            return Ok(());
        }
        config.put(device, property, values);
        self.write(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_model::{Blob, Element, NumberFormat, NumberSpec, SwitchState, Value};

    fn settings() -> Property {
        Property::builder("Focuser", "SETTINGS", PropertyKind::Number)
            .element(Element::number(
                "SPEED",
                2.0 / 3.0,
                NumberSpec::new(NumberFormat::parse("%4.1f").unwrap(), 0.0, 10.0, 0.0),
            ))
            .saveable(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_numbers_keep_full_precision() {
        let values = stored_values(&settings());
        assert_eq!(values["SPEED"], (2.0f64 / 3.0).to_string());
    }

    #[test]
    fn test_blobs_are_not_persisted() {
        let mut property = Property::builder("Cam", "IMAGE", PropertyKind::Blob)
            .element(Element::blob("CCD1"))
            .build()
            .unwrap();
        property
            .apply([("CCD1", Value::Blob(Blob::new(".fits", vec![1u8, 2, 3])))])
            .unwrap();
        assert!(stored_values(&property).is_empty());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryConfigStore::new();
        assert!(store.load("Focuser", "SETTINGS").unwrap().is_none());

        let property = Property::builder("Focuser", "MODE", PropertyKind::Switch)
            .element(Element::switch("FAST", SwitchState::Off))
            .element(Element::switch("SLOW", SwitchState::On))
            .build()
            .unwrap();
        store
            .save("Focuser", "MODE", stored_values(&property))
            .unwrap();

        let loaded = store.load("Focuser", "MODE").unwrap().unwrap();
        assert_eq!(loaded["FAST"], "Off");
        assert_eq!(loaded["SLOW"], "On");
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("focuser.json");

        let store = JsonFileConfigStore::open(&path).unwrap();
        store
            .save("Focuser", "SETTINGS", stored_values(&settings()))
            .unwrap();
        assert!(path.exists());

        let reopened = JsonFileConfigStore::open(&path).unwrap();
        let loaded = reopened.load("Focuser", "SETTINGS").unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(reopened.load("Focuser", "OTHER").unwrap().is_none());
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonFileConfigStore::open(&path),
            Err(StoreError::Json(_))
        ));
    }
}
