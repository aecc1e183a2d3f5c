//! File-backed persistence for committed corrections.
//!
//! Writes are staged in memory, mirroring the host's "pending until save"
//! behavior, and reach disk only when [`JsonFileStore::save`] is called.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ConfigError, ProbeError};

use super::Persistence;

type Sections = BTreeMap<String, BTreeMap<String, String>>;

pub struct JsonFileStore {
    path: PathBuf,
    sections: Mutex<Sections>,
}

impl JsonFileStore {
    /// Open a store, starting empty when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let sections = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            log::info!("[JsonFileStore] {:?} not found, starting empty", path);
            Sections::new()
        };
        Ok(Self {
            path,
            sections: Mutex::new(sections),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Sections>, ProbeError> {
        self.sections
            .lock()
            .map_err(|_| ProbeError::hardware("persistence", "store lock poisoned"))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|sections| sections.get(section)?.get(key).cloned())
    }

    /// All staged key/value pairs of one section
    pub fn section(&self, section: &str) -> Vec<(String, String)> {
        self.lock()
            .ok()
            .and_then(|sections| {
                sections
                    .get(section)
                    .map(|values| values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            })
            .unwrap_or_default()
    }

    /// Flush every staged value to disk
    pub fn save(&self) -> Result<(), ProbeError> {
        let sections = self.lock()?;
        let json = serde_json::to_string_pretty(&*sections)
            .map_err(|err| ProbeError::hardware("persistence", err.to_string()))?;
        fs::write(&self.path, json).map_err(|err| {
            ProbeError::hardware("persistence", format!("{}: {}", self.path.display(), err))
        })?;
        log::info!("[JsonFileStore] Saved {:?}", self.path);
        Ok(())
    }
}

impl Persistence for JsonFileStore {
    fn write(&self, section: &str, key: &str, value: &str) -> Result<(), ProbeError> {
        self.lock()?
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "auto_z_store_{}_{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn writes_stay_pending_until_save() {
        let path = temp_path("pending");
        let _ = fs::remove_file(&path);

        let store = JsonFileStore::open(&path).unwrap();
        store
            .write("auto_z_offset", "probe_z_correction", "-0.500000")
            .unwrap();
        assert_eq!(
            store.get("auto_z_offset", "probe_z_correction").as_deref(),
            Some("-0.500000")
        );
        assert!(!path.exists());

        store.save().unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.section("auto_z_offset"),
            vec![(
                "probe_z_correction".to_string(),
                "-0.500000".to_string()
            )]
        );

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let path = temp_path("corrupt");
        fs::write(&path, "not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
        let _ = fs::remove_file(&path);
    }
}
