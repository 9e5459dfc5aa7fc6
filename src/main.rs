use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rolodex::{
    commands::{AppEvent, Command, CommandHandler, FileUpload, Outcome, Response},
    customer::{Customer, NewInteraction},
    drive::DriveConfig,
    error::RolodexError,
    settings::SettingsStore,
};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "rolodex")]
#[command(about = "Local-first customer records with Google Drive backup")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Choose the data directory (native picker, or --path)
    SelectDir {
        /// Use this path instead of opening a picker
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Show the current data directory
    Dir,
    /// List all customers
    List,
    /// Save a customer record from a JSON file
    Save {
        /// Path to a customer JSON document
        file: PathBuf,
    },
    /// Append an interaction to a customer
    Interact {
        /// Customer id
        customer_id: String,
        /// Interaction type tag (call, email, meeting, ...)
        #[arg(short, long)]
        kind: String,
        /// Free-text content
        #[arg(short, long)]
        content: String,
    },
    /// Store an attachment under files/
    Attach {
        /// File to copy into the data directory
        file: PathBuf,
    },
    /// Google Drive sync
    Drive {
        #[command(subcommand)]
        command: DriveCommands,
    },
    /// Backup scheduling
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Run in the background, backing up on the configured interval
    Daemon,
}

#[derive(Subcommand)]
enum DriveCommands {
    /// Authorize with Google Drive (opens an OAuth consent URL)
    Auth,
    /// Set the Drive folder that holds mirrored customers
    Folder { folder_id: String },
    /// List customers in the Drive folder
    List,
    /// Push one local customer to Drive
    Push { customer_id: String },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Show or change the backup interval in minutes
    Interval { minutes: Option<u64> },
    /// Run one backup pass now
    Run,
}

#[tokio::main]
async fn main() -> Result<(), RolodexError> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let settings = Arc::new(SettingsStore::open()?);
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let handler = CommandHandler::new(settings, DriveConfig::from_env_or_default(), events_tx)?;

    match cli.command {
        Commands::SelectDir { path } => {
            let response = match path {
                Some(path) => {
                    let chosen = handler.store().set_data_directory(&path)?;
                    Response::Path(Outcome::Ok {
                        value: Some(chosen),
                    })
                }
                None => handler.dispatch(Command::SelectDirectory).await,
            };
            match response {
                Response::Path(Outcome::Ok { value: Some(dir) }) => {
                    println!("📁 Data directory: {}", dir.display());
                }
                Response::Path(Outcome::Ok { value: None }) => {
                    println!("Selection cancelled");
                }
                other => print_failure(&other),
            }
        }
        Commands::Dir => match handler.dispatch(Command::GetDataDirectory).await {
            Response::Path(Outcome::Ok { value: Some(dir) }) => {
                println!("{}", dir.display());
            }
            Response::Path(Outcome::Ok { value: None }) => {
                println!("No data directory configured. Run `rolodex select-dir` first.");
            }
            other => print_failure(&other),
        },
        Commands::List => match handler.dispatch(Command::GetCustomers).await {
            Response::Customers(Outcome::Ok { value: customers }) => {
                print_customers(&customers);
            }
            other => print_failure(&other),
        },
        Commands::Save { file } => {
            let data = std::fs::read_to_string(&file)?;
            let customer: Customer = serde_json::from_str(&data)?;
            let id = customer.id.clone();
            match handler.dispatch(Command::SaveCustomer(customer)).await {
                Response::Done(Outcome::Ok { .. }) => println!("✅ Saved customer {}", id),
                other => print_failure(&other),
            }
        }
        Commands::Interact {
            customer_id,
            kind,
            content,
        } => {
            let response = handler
                .dispatch(Command::SaveInteraction(NewInteraction {
                    customer_id: customer_id.clone(),
                    kind,
                    content,
                }))
                .await;
            match response {
                Response::Done(Outcome::Ok { .. }) => {
                    println!("✅ Interaction recorded for {}", customer_id);
                }
                other => print_failure(&other),
            }
        }
        Commands::Attach { file } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("attachment")
                .to_string();
            let data = std::fs::read(&file)?;
            match handler
                .dispatch(Command::SaveFile(FileUpload { name, data }))
                .await
            {
                Response::FileName(Outcome::Ok { value }) => {
                    println!("✅ Stored as files/{}", value);
                }
                other => print_failure(&other),
            }
        }
        Commands::Drive { command } => match command {
            DriveCommands::Auth => {
                let response = handler.dispatch(Command::GoogleDriveAuthorize).await;
                if let Response::Done(Outcome::Ok { .. }) = response {
                    let Some(AppEvent::AuthUrl { url }) = events_rx.recv().await else {
                        return Err(RolodexError::Unknown("auth-url event missing".to_string()));
                    };
                    println!("🔑 Open this URL in a browser and approve access:\n\n{}\n", url);
                    println!("Paste the authorization code here:");
                    let code = read_line()?;
                    handler.drive().exchange_code(code.trim()).await?;
                    println!("✅ Google Drive authorized");
                } else {
                    print_failure(&response);
                }
            }
            DriveCommands::Folder { folder_id } => {
                match handler.dispatch(Command::SetDriveFolder { folder_id }).await {
                    Response::Done(Outcome::Ok { .. }) => println!("✅ Drive folder set"),
                    other => print_failure(&other),
                }
            }
            DriveCommands::List => match handler.dispatch(Command::GetDriveCustomers).await {
                Response::Customers(Outcome::Ok { value: customers }) => {
                    print_customers(&customers);
                }
                other => print_failure(&other),
            },
            DriveCommands::Push { customer_id } => {
                let customers = handler.store().list_customers()?;
                let Some(customer) = customers.into_iter().find(|c| c.id == customer_id) else {
                    return Err(RolodexError::CustomerNotFound(customer_id));
                };
                match handler.dispatch(Command::SaveDriveCustomer(customer)).await {
                    Response::Done(Outcome::Ok { .. }) => {
                        println!("✅ Pushed {} to Drive", customer_id);
                    }
                    other => print_failure(&other),
                }
            }
        },
        Commands::Backup { command } => match command {
            BackupCommands::Interval { minutes: None } => {
                match handler.dispatch(Command::GetBackupInterval).await {
                    Response::Interval(Outcome::Ok { value }) => {
                        println!("⏱️  Backup every {} minutes", value);
                    }
                    other => print_failure(&other),
                }
            }
            BackupCommands::Interval {
                minutes: Some(minutes),
            } => {
                match handler
                    .dispatch(Command::SetBackupInterval { minutes })
                    .await
                {
                    Response::Done(Outcome::Ok { .. }) => {
                        println!("✅ Backup interval set to {} minutes", minutes);
                    }
                    other => print_failure(&other),
                }
            }
            BackupCommands::Run => match handler.dispatch(Command::TriggerBackup).await {
                Response::Backup(Outcome::Ok { value: report }) => {
                    println!(
                        "☁️  Backup complete: {} pushed, {} failed",
                        report.pushed, report.failed
                    );
                }
                other => print_failure(&other),
            },
        },
        Commands::Daemon => {
            info!("🚀 Rolodex daemon running; backups on the configured interval");
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    let AppEvent::AuthUrl { url } = event;
                    println!("🔑 Authorization requested: {}", url);
                }
            });
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
        }
    }

    Ok(())
}

fn print_customers(customers: &[Customer]) {
    if customers.is_empty() {
        println!("No customers yet.");
        return;
    }
    println!("👥 {} customer(s):", customers.len());
    println!("{}", "─".repeat(50));
    for customer in customers {
        let name = customer
            .profile
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!(
            "📇 {} - {} ({} interactions)",
            customer.id,
            name,
            customer.interactions.len()
        );
    }
}

fn print_failure(response: &Response) {
    match response {
        Response::Path(Outcome::Unconfigured)
        | Response::Customers(Outcome::Unconfigured)
        | Response::Done(Outcome::Unconfigured)
        | Response::FileName(Outcome::Unconfigured)
        | Response::Interval(Outcome::Unconfigured)
        | Response::Backup(Outcome::Unconfigured) => {
            println!("⚠️  Not set up yet: choose a data directory (or authorize Drive) first");
        }
        Response::Path(Outcome::Failed { error })
        | Response::Customers(Outcome::Failed { error })
        | Response::Done(Outcome::Failed { error })
        | Response::FileName(Outcome::Failed { error })
        | Response::Interval(Outcome::Failed { error })
        | Response::Backup(Outcome::Failed { error }) => {
            println!("❌ {}", error);
        }
        _ => println!("❌ Unexpected response"),
    }
}

fn read_line() -> Result<String, RolodexError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
