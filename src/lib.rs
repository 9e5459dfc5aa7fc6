pub mod backup;
pub mod commands;
pub mod customer;
pub mod drive;
pub mod error;
pub mod settings;
pub mod store;

pub use backup::{run_backup_pass, BackupReport, BackupScheduler};
pub use commands::{AppEvent, Command, CommandHandler, FileUpload, Outcome, Response};
pub use customer::{Customer, Interaction, NewInteraction};
pub use drive::{DriveClient, DriveConfig, GoogleTokens};
pub use error::RolodexError;
pub use settings::{Settings, SettingsStore};
pub use store::LocalStore;

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, RolodexError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_settings_share_one_handle() {
        let tmp_dir = TempDir::new().unwrap();
        let settings =
            Arc::new(SettingsStore::with_path(tmp_dir.path().join("settings.json")).unwrap());
        let store = LocalStore::new(settings.clone());

        let data_dir = tmp_dir.path().join("crm");
        store.set_data_directory(&data_dir).unwrap();

        // The chosen path is visible through the same settings handle,
        // and both subtrees were seeded.
        assert_eq!(settings.data_directory().unwrap(), Some(data_dir.clone()));
        assert!(data_dir.join("customers").is_dir());
        assert!(data_dir.join("files").is_dir());
    }

    #[tokio::test]
    async fn test_customer_persists_across_store_instances() {
        let tmp_dir = TempDir::new().unwrap();
        let settings_path = tmp_dir.path().join("settings.json");

        {
            let settings = Arc::new(SettingsStore::with_path(&settings_path).unwrap());
            let store = LocalStore::new(settings);
            store.set_data_directory(&tmp_dir.path().join("crm")).unwrap();
            store.save_customer(&Customer::new("persisted")).await.unwrap();
        }

        let settings = Arc::new(SettingsStore::with_path(&settings_path).unwrap());
        let store = LocalStore::new(settings);
        let listed = store.list_customers().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "persisted");
    }
}
