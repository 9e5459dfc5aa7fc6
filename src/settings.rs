use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::drive::GoogleTokens;
use crate::RolodexError;

pub const DEFAULT_BACKUP_INTERVAL_MINUTES: u64 = 60;

fn default_backup_interval() -> u64 {
    DEFAULT_BACKUP_INTERVAL_MINUTES
}

/// Process-wide settings record. Lives outside the chosen data directory
/// so it survives switching directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub data_directory: Option<PathBuf>,
    #[serde(default)]
    pub drive_folder_id: Option<String>,
    #[serde(default)]
    pub google_tokens: Option<GoogleTokens>,
    #[serde(rename = "backupInterval", default = "default_backup_interval")]
    pub backup_interval_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_directory: None,
            drive_folder_id: None,
            google_tokens: None,
            backup_interval_minutes: DEFAULT_BACKUP_INTERVAL_MINUTES,
        }
    }
}

/// Persisted settings store. Explicitly constructed once at startup and
/// handed to every component that needs it; every setter flushes to disk.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Open the store at the platform default location, loading any
    /// previously persisted settings.
    pub fn open() -> crate::Result<Self> {
        Self::with_path(Self::config_dir().join("settings.json"))
    }

    /// Open a store backed by an explicit file. Used by integration tests
    /// that need on-disk isolation.
    pub fn with_path(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Settings::default()
        };
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    fn config_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("rolodex")
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("Library/Application Support/rolodex")
        } else {
            // Linux and others
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".config/rolodex")
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Settings) -> R) -> crate::Result<R> {
        let guard = self
            .inner
            .read()
            .map_err(|e| RolodexError::Settings(e.to_string()))?;
        Ok(f(&guard))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> crate::Result<R> {
        let snapshot;
        let result;
        {
            let mut guard = self
                .inner
                .write()
                .map_err(|e| RolodexError::Settings(e.to_string()))?;
            result = f(&mut guard);
            snapshot = guard.clone();
        }
        self.flush(&snapshot)?;
        Ok(result)
    }

    // Atomic write: temp file in the same directory, then rename into
    // place, so an interrupted write never leaves a torn settings file.
    fn flush(&self, settings: &Settings) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(settings)?;
        let tmp = self.tmp_path()?;
        fs::write(&tmp, data.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> crate::Result<PathBuf> {
        use rand::{thread_rng, Rng};
        let parent = self
            .path
            .parent()
            .ok_or_else(|| RolodexError::Settings("invalid settings path".to_string()))?;
        let suffix: u64 = thread_rng().gen();
        Ok(parent.join(format!(".settings.{}.tmp", suffix)))
    }

    pub fn data_directory(&self) -> crate::Result<Option<PathBuf>> {
        self.read(|s| s.data_directory.clone())
    }

    pub fn set_data_directory(&self, dir: &Path) -> crate::Result<()> {
        self.write(|s| s.data_directory = Some(dir.to_path_buf()))
    }

    pub fn drive_folder_id(&self) -> crate::Result<Option<String>> {
        self.read(|s| s.drive_folder_id.clone())
    }

    pub fn set_drive_folder_id(&self, folder_id: &str) -> crate::Result<()> {
        self.write(|s| s.drive_folder_id = Some(folder_id.to_string()))
    }

    pub fn google_tokens(&self) -> crate::Result<Option<GoogleTokens>> {
        self.read(|s| s.google_tokens.clone())
    }

    pub fn set_google_tokens(&self, tokens: GoogleTokens) -> crate::Result<()> {
        self.write(|s| s.google_tokens = Some(tokens))
    }

    pub fn backup_interval_minutes(&self) -> crate::Result<u64> {
        self.read(|s| s.backup_interval_minutes)
    }

    pub fn set_backup_interval_minutes(&self, minutes: u64) -> crate::Result<()> {
        self.write(|s| s.backup_interval_minutes = minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_absent() {
        let tmp_dir = TempDir::new().unwrap();
        let store = SettingsStore::with_path(tmp_dir.path().join("settings.json")).unwrap();
        assert!(store.data_directory().unwrap().is_none());
        assert!(store.drive_folder_id().unwrap().is_none());
        assert!(store.google_tokens().unwrap().is_none());
        assert_eq!(
            store.backup_interval_minutes().unwrap(),
            DEFAULT_BACKUP_INTERVAL_MINUTES
        );
    }

    #[test]
    fn test_settings_survive_reopen() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("settings.json");

        let store = SettingsStore::with_path(&path).unwrap();
        store.set_data_directory(Path::new("/tmp/crm")).unwrap();
        store.set_drive_folder_id("folder-123").unwrap();
        store.set_backup_interval_minutes(15).unwrap();
        drop(store);

        let reopened = SettingsStore::with_path(&path).unwrap();
        assert_eq!(
            reopened.data_directory().unwrap(),
            Some(PathBuf::from("/tmp/crm"))
        );
        assert_eq!(
            reopened.drive_folder_id().unwrap().as_deref(),
            Some("folder-123")
        );
        assert_eq!(reopened.backup_interval_minutes().unwrap(), 15);
    }

    #[test]
    fn test_partial_settings_file_fills_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"driveFolderId":"abc"}"#).unwrap();

        let store = SettingsStore::with_path(&path).unwrap();
        assert_eq!(store.drive_folder_id().unwrap().as_deref(), Some("abc"));
        assert_eq!(
            store.backup_interval_minutes().unwrap(),
            DEFAULT_BACKUP_INTERVAL_MINUTES
        );
    }
}
