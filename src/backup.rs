use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Interval};
use tracing::{error, info, warn};

use crate::drive::DriveClient;
use crate::settings::SettingsStore;
use crate::store::LocalStore;
use crate::RolodexError;

/// Outcome of one backup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    pub pushed: usize,
    pub failed: usize,
}

/// One synchronization pass: push every local customer to the drive
/// folder. Remote saves are update-by-name, so a full re-push never
/// accumulates duplicates. With sync unauthorized or no folder chosen
/// the pass is a logged no-op.
pub async fn run_backup_pass(
    store: &LocalStore,
    drive: &DriveClient,
) -> crate::Result<BackupReport> {
    if !drive.is_authorized() || !drive.is_configured() {
        info!("Backup pass skipped: drive sync not set up");
        return Ok(BackupReport::default());
    }

    let customers = store.list_customers()?;
    let mut report = BackupReport::default();
    for customer in customers {
        match drive.save_customer(&customer).await {
            Ok(()) => report.pushed += 1,
            Err(e) => {
                warn!("Failed to push customer {}: {}", customer.id, e);
                report.failed += 1;
            }
        }
    }
    info!(
        "Backup pass complete: {} pushed, {} failed",
        report.pushed, report.failed
    );
    Ok(report)
}

/// Upper bound on the backup interval. Anything longer is a caller
/// mistake, and bounding it keeps the seconds conversion inside u64.
pub const MAX_BACKUP_INTERVAL_MINUTES: u64 = 60 * 24 * 365;

enum SchedulerMsg {
    Reschedule(u64),
}

/// Recurring backup timer. Armed at startup from the persisted interval;
/// changing the interval rearms the live timer, not just the stored
/// value.
pub struct BackupScheduler {
    settings: Arc<SettingsStore>,
    tx: mpsc::Sender<SchedulerMsg>,
}

// Clamp rather than trust the stored value: a hand-edited settings file
// must not be able to kill the scheduler task.
fn make_ticker(minutes: u64) -> Interval {
    let minutes = minutes.clamp(1, MAX_BACKUP_INTERVAL_MINUTES);
    interval(Duration::from_secs(minutes * 60))
}

impl BackupScheduler {
    pub fn start(
        settings: Arc<SettingsStore>,
        store: Arc<LocalStore>,
        drive: Arc<DriveClient>,
    ) -> crate::Result<Self> {
        let minutes = settings.backup_interval_minutes()?;
        let (tx, mut rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut ticker = make_ticker(minutes);
            // The first tick of a fresh interval fires immediately;
            // consume it so the first pass waits a full period.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = run_backup_pass(&store, &drive).await {
                            error!("Backup pass failed: {}", e);
                        }
                    }
                    msg = rx.recv() => match msg {
                        Some(SchedulerMsg::Reschedule(mins)) => {
                            info!("Backup interval rescheduled to {} minutes", mins);
                            ticker = make_ticker(mins);
                            ticker.tick().await;
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(Self { settings, tx })
    }

    pub fn interval_minutes(&self) -> crate::Result<u64> {
        self.settings.backup_interval_minutes()
    }

    pub async fn set_interval_minutes(&self, minutes: u64) -> crate::Result<()> {
        if minutes == 0 {
            return Err(RolodexError::InvalidInput(
                "backup interval must be at least one minute".to_string(),
            ));
        }
        if minutes > MAX_BACKUP_INTERVAL_MINUTES {
            return Err(RolodexError::InvalidInput(format!(
                "backup interval must be at most {} minutes",
                MAX_BACKUP_INTERVAL_MINUTES
            )));
        }
        self.settings.set_backup_interval_minutes(minutes)?;
        self.tx
            .send(SchedulerMsg::Reschedule(minutes))
            .await
            .map_err(|_| RolodexError::Unknown("backup scheduler is not running".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::Customer;
    use crate::drive::{DriveConfig, REDIRECT_URI};
    use crate::settings::DEFAULT_BACKUP_INTERVAL_MINUTES;
    use tempfile::TempDir;

    fn fixture(tmp_dir: &TempDir) -> (Arc<SettingsStore>, Arc<LocalStore>, Arc<DriveClient>) {
        let settings =
            Arc::new(SettingsStore::with_path(tmp_dir.path().join("settings.json")).unwrap());
        let store = Arc::new(LocalStore::new(settings.clone()));
        let config = DriveConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
        };
        let drive = Arc::new(DriveClient::new(config, settings.clone()).unwrap());
        (settings, store, drive)
    }

    #[tokio::test]
    async fn test_pass_without_authorization_is_noop() {
        let tmp_dir = TempDir::new().unwrap();
        let (_settings, store, drive) = fixture(&tmp_dir);
        store.set_data_directory(&tmp_dir.path().join("crm")).unwrap();
        store.save_customer(&Customer::new("c1")).await.unwrap();

        let report = run_backup_pass(&store, &drive).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_interval_defaults_and_updates() {
        let tmp_dir = TempDir::new().unwrap();
        let (settings, store, drive) = fixture(&tmp_dir);

        let scheduler = BackupScheduler::start(settings.clone(), store, drive).unwrap();
        assert_eq!(
            scheduler.interval_minutes().unwrap(),
            DEFAULT_BACKUP_INTERVAL_MINUTES
        );

        scheduler.set_interval_minutes(5).await.unwrap();
        assert_eq!(scheduler.interval_minutes().unwrap(), 5);
        assert_eq!(settings.backup_interval_minutes().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_oversized_interval_rejected() {
        let tmp_dir = TempDir::new().unwrap();
        let (settings, store, drive) = fixture(&tmp_dir);

        let scheduler = BackupScheduler::start(settings.clone(), store, drive).unwrap();
        let err = scheduler.set_interval_minutes(u64::MAX).await.unwrap_err();
        assert!(matches!(err, RolodexError::InvalidInput(_)));
        // Rejected before anything was persisted.
        assert_eq!(
            settings.backup_interval_minutes().unwrap(),
            DEFAULT_BACKUP_INTERVAL_MINUTES
        );
    }

    #[tokio::test]
    async fn test_scheduler_survives_huge_persisted_interval() {
        let tmp_dir = TempDir::new().unwrap();
        let (settings, store, drive) = fixture(&tmp_dir);
        // A settings file edited by hand can hold any u64.
        settings.set_backup_interval_minutes(u64::MAX).unwrap();

        let scheduler = BackupScheduler::start(settings, store, drive).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A reschedule only succeeds while the timer task is alive.
        scheduler.set_interval_minutes(5).await.unwrap();
        assert_eq!(scheduler.interval_minutes().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let tmp_dir = TempDir::new().unwrap();
        let (settings, store, drive) = fixture(&tmp_dir);

        let scheduler = BackupScheduler::start(settings, store, drive).unwrap();
        let err = scheduler.set_interval_minutes(0).await.unwrap_err();
        assert!(matches!(err, RolodexError::InvalidInput(_)));
    }
}
