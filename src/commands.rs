use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backup::{run_backup_pass, BackupReport, BackupScheduler};
use crate::customer::{Customer, NewInteraction};
use crate::drive::{DriveClient, DriveConfig};
use crate::settings::SettingsStore;
use crate::store::LocalStore;
use crate::RolodexError;

/// The full command catalog. A closed enumeration: every command has a
/// statically checked argument shape, and dispatch covers every variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "kebab-case")]
pub enum Command {
    SelectDirectory,
    GetDataDirectory,
    GetCustomers,
    SaveCustomer(Customer),
    SaveInteraction(NewInteraction),
    SaveFile(FileUpload),
    GoogleDriveAuthorize,
    SetDriveFolder { folder_id: String },
    GetDriveCustomers,
    SaveDriveCustomer(Customer),
    GetBackupInterval,
    SetBackupInterval { minutes: u64 },
    TriggerBackup,
}

/// Attachment payload for `save-file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub name: String,
    pub data: Vec<u8>,
}

/// Tri-state result every command resolves to. Callers can tell "no
/// data directory / not authorized yet" apart from an actual failure,
/// and nothing ever crosses this boundary as a panic or `Err`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome<T> {
    Ok { value: T },
    Unconfigured,
    Failed { error: String },
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    pub fn ok_value(self) -> Option<T> {
        match self {
            Outcome::Ok { value } => Some(value),
            _ => None,
        }
    }
}

/// Per-command result shapes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Response {
    Path(Outcome<Option<PathBuf>>),
    Customers(Outcome<Vec<Customer>>),
    Done(Outcome<()>),
    FileName(Outcome<String>),
    Interval(Outcome<u64>),
    Backup(Outcome<BackupReport>),
}

/// Out-of-band notifications to the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AppEvent {
    AuthUrl { url: String },
}

fn outcome<T>(result: crate::Result<T>) -> Outcome<T> {
    match result {
        Ok(value) => Outcome::Ok { value },
        Err(RolodexError::NotConfigured) | Err(RolodexError::NotAuthorized) => {
            Outcome::Unconfigured
        }
        Err(e) => {
            warn!("Command failed: {}", e);
            Outcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Dispatches commands from the untrusted presentation layer into the
/// privileged components. Owns the component graph; constructed once at
/// startup from an explicit settings handle.
pub struct CommandHandler {
    store: Arc<LocalStore>,
    drive: Arc<DriveClient>,
    scheduler: BackupScheduler,
    events: mpsc::Sender<AppEvent>,
}

impl CommandHandler {
    pub fn new(
        settings: Arc<SettingsStore>,
        drive_config: DriveConfig,
        events: mpsc::Sender<AppEvent>,
    ) -> crate::Result<Self> {
        let store = Arc::new(LocalStore::new(settings.clone()));
        let drive = Arc::new(DriveClient::new(drive_config, settings.clone())?);
        let scheduler = BackupScheduler::start(settings, store.clone(), drive.clone())?;
        Ok(Self {
            store,
            drive,
            scheduler,
            events,
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn drive(&self) -> &DriveClient {
        &self.drive
    }

    pub async fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::SelectDirectory => {
                #[cfg(feature = "dialog")]
                {
                    Response::Path(outcome(self.store.select_data_directory().await))
                }
                #[cfg(not(feature = "dialog"))]
                {
                    Response::Path(Outcome::Failed {
                        error: "directory picker unavailable in this build".to_string(),
                    })
                }
            }
            Command::GetDataDirectory => Response::Path(outcome(self.store.data_directory())),
            Command::GetCustomers => {
                let result = match self.store.data_directory() {
                    Ok(None) => Err(RolodexError::NotConfigured),
                    Ok(Some(_)) => self.store.list_customers(),
                    Err(e) => Err(e),
                };
                Response::Customers(outcome(result))
            }
            Command::SaveCustomer(customer) => {
                Response::Done(outcome(self.store.save_customer(&customer).await))
            }
            Command::SaveInteraction(interaction) => {
                Response::Done(outcome(self.store.save_interaction(&interaction).await))
            }
            Command::SaveFile(upload) => {
                Response::FileName(outcome(self.store.save_file(&upload.name, &upload.data)))
            }
            Command::GoogleDriveAuthorize => {
                let result = async {
                    let url = self.drive.authorize_url().await?;
                    self.events
                        .send(AppEvent::AuthUrl { url })
                        .await
                        .map_err(|_| {
                            RolodexError::Unknown("event channel closed".to_string())
                        })
                }
                .await;
                Response::Done(outcome(result))
            }
            Command::SetDriveFolder { folder_id } => {
                Response::Done(outcome(self.drive.set_remote_folder(&folder_id)))
            }
            Command::GetDriveCustomers => {
                let result = if !self.drive.is_authorized() || !self.drive.is_configured() {
                    Err(RolodexError::NotAuthorized)
                } else {
                    self.drive.list_customers().await
                };
                Response::Customers(outcome(result))
            }
            Command::SaveDriveCustomer(customer) => {
                Response::Done(outcome(self.drive.save_customer(&customer).await))
            }
            Command::GetBackupInterval => {
                Response::Interval(outcome(self.scheduler.interval_minutes()))
            }
            Command::SetBackupInterval { minutes } => Response::Done(outcome(
                self.scheduler.set_interval_minutes(minutes).await,
            )),
            Command::TriggerBackup => {
                Response::Backup(outcome(run_backup_pass(&self.store, &self.drive).await))
            }
        }
    }
}
