use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::customer::{validate_id, Customer, Interaction, NewInteraction};
use crate::settings::SettingsStore;
use crate::RolodexError;

const CUSTOMERS_DIR: &str = "customers";
const FILES_DIR: &str = "files";

/// Local record store: one JSON file per customer under
/// `<dataDir>/customers/`, opaque attachment blobs under
/// `<dataDir>/files/`. No indexing; listing enumerates the directory.
///
/// Same-id writes are serialized through an owned per-customer lock so
/// concurrent commands cannot interleave a read-modify-write.
pub struct LocalStore {
    settings: Arc<SettingsStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStore {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn data_directory(&self) -> crate::Result<Option<PathBuf>> {
        self.settings.data_directory()
    }

    /// Persist an explicitly chosen data directory and make sure the
    /// `customers/` and `files/` subtrees exist. Idempotent.
    pub fn set_data_directory(&self, dir: &Path) -> crate::Result<PathBuf> {
        fs::create_dir_all(dir.join(CUSTOMERS_DIR))?;
        fs::create_dir_all(dir.join(FILES_DIR))?;
        self.settings.set_data_directory(dir)?;
        info!("Data directory set to {}", dir.display());
        Ok(dir.to_path_buf())
    }

    /// Prompt for a directory with the native picker. Cancellation is a
    /// normal `None`, not an error.
    #[cfg(feature = "dialog")]
    pub async fn select_data_directory(&self) -> crate::Result<Option<PathBuf>> {
        let picked = rfd::AsyncFileDialog::new().pick_folder().await;
        match picked {
            Some(handle) => Ok(Some(self.set_data_directory(handle.path())?)),
            None => Ok(None),
        }
    }

    fn customers_dir(&self) -> crate::Result<PathBuf> {
        let dir = self.settings.data_directory()?.ok_or(RolodexError::NotConfigured)?;
        Ok(dir.join(CUSTOMERS_DIR))
    }

    fn files_dir(&self) -> crate::Result<PathBuf> {
        let dir = self.settings.data_directory()?.ok_or(RolodexError::NotConfigured)?;
        Ok(dir.join(FILES_DIR))
    }

    /// All customers in the active data directory, unordered. With no
    /// directory configured this is a normal empty result. Unreadable or
    /// unparsable entries are skipped and logged rather than aborting
    /// the whole listing.
    pub fn list_customers(&self) -> crate::Result<Vec<Customer>> {
        let dir = match self.settings.data_directory()? {
            Some(dir) => dir.join(CUSTOMERS_DIR),
            None => return Ok(Vec::new()),
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read {}: {}", dir.display(), e);
                return Ok(Vec::new());
            }
        };

        let mut customers = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_customer_file(&path) {
                Ok(customer) => customers.push(customer),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(customers)
    }

    fn read_customer_file(path: &Path) -> crate::Result<Customer> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write `<id>.json`, overwriting any existing record for that id.
    pub async fn save_customer(&self, customer: &Customer) -> crate::Result<()> {
        validate_id(&customer.id)?;
        let dir = self.customers_dir()?;

        let lock = self.lock_for(&customer.id).await;
        let _guard = lock.lock().await;

        fs::create_dir_all(&dir)?;
        Self::write_json(&dir.join(format!("{}.json", customer.id)), customer)
    }

    /// Append an interaction to an existing customer and rewrite the
    /// whole document. A missing customer file is an error, never an
    /// auto-created record.
    pub async fn save_interaction(&self, new: &NewInteraction) -> crate::Result<()> {
        validate_id(&new.customer_id)?;
        let path = self
            .customers_dir()?
            .join(format!("{}.json", new.customer_id));

        let lock = self.lock_for(&new.customer_id).await;
        let _guard = lock.lock().await;

        if !path.exists() {
            return Err(RolodexError::CustomerNotFound(new.customer_id.clone()));
        }
        let mut customer = Self::read_customer_file(&path)?;
        customer
            .interactions
            .push(Interaction::now(&new.kind, &new.content));
        Self::write_json(&path, &customer)
    }

    /// Store an opaque attachment blob under `files/`, prefixing the
    /// name with the creation timestamp to avoid collisions. Returns the
    /// generated filename.
    pub fn save_file(&self, name: &str, data: &[u8]) -> crate::Result<String> {
        let dir = self.files_dir()?;

        // Strip any path the caller smuggled in; only the final
        // component becomes part of the stored name.
        let base = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RolodexError::InvalidInput(format!("invalid file name: {}", name)))?;

        fs::create_dir_all(&dir)?;
        let file_name = format!("{}-{}", Utc::now().timestamp_millis(), base);
        fs::write(dir.join(&file_name), data)?;
        Ok(file_name)
    }

    // Atomic overwrite: temp file alongside, rename into place.
    fn write_json(path: &Path, value: &impl serde::Serialize) -> crate::Result<()> {
        use rand::{thread_rng, Rng};
        let parent = path
            .parent()
            .ok_or_else(|| RolodexError::InvalidInput("invalid record path".to_string()))?;
        let suffix: u64 = thread_rng().gen();
        let tmp = parent.join(format!(".rolodex.{}.tmp", suffix));

        let data = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, data.as_bytes())?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
