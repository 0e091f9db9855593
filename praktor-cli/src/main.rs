//! Praktor daemon and operator CLI: `serve` runs the gateway; `vault`
//! manages secrets; `backup`/`restore` copy the SQLite store.

mod backup;
mod daemon;
mod log_format;
mod logging;
mod vault_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

const DEFAULT_CONFIG_PATH: &str = "praktor.yaml";
const DEFAULT_DB_PATH: &str = "praktor.db";

#[derive(Parser, Debug)]
#[command(name = "praktor")]
#[command(about = "Praktor: personal AI-agent gateway")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Path to the YAML agent registry (default: ./praktor.yaml)
    #[arg(long, global = true, value_name = "PATH", env = "PRAKTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite database (default: ./praktor.db)
    #[arg(long, global = true, value_name = "PATH", env = "PRAKTOR_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the gateway: router, scheduler, swarm coordinator, chat ingress.
    Serve,
    /// Secret vault management.
    Vault {
        #[command(subcommand)]
        cmd: vault_cmd::VaultCommand,
        /// Vault passphrase (default: $PRAKTOR_VAULT_PASSPHRASE)
        #[arg(long, env = "PRAKTOR_VAULT_PASSPHRASE")]
        passphrase: Option<String>,
    },
    /// Copies the SQLite database to a backup file.
    Backup {
        #[arg(short, long, value_name = "PATH")]
        file: PathBuf,
    },
    /// Restores the SQLite database from a backup file.
    Restore {
        #[arg(short, long, value_name = "PATH")]
        file: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    praktor_config::load_and_apply("praktor", None::<&std::path::Path>).ok();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let db_path = args.db.unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    match args.cmd.unwrap_or(Command::Serve) {
        Command::Serve => {
            let _log_guard = logging::init()?;
            if let Err(e) = daemon::run(daemon::ServeArgs { config_path, db_path }).await {
                eprintln!("praktor: {e}");
                std::process::exit(1);
            }
        }
        Command::Vault { cmd, passphrase } => {
            if let Err(e) = vault_cmd::run(cmd, &db_path, passphrase).await {
                eprintln!("praktor: {e}");
                std::process::exit(1);
            }
        }
        Command::Backup { file } => {
            if let Err(e) = backup::backup(&db_path, &file) {
                eprintln!("praktor: {e}");
                std::process::exit(1);
            }
        }
        Command::Restore { file, overwrite } => {
            if let Err(e) = backup::restore(&file, &db_path, overwrite) {
                eprintln!("praktor: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
