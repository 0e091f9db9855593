//! `praktor vault` subcommands: operator-facing secret
//! management, run against the same SQLite file the daemon uses.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use praktor_core::Vault;
use praktor_persistence::{SecretKind, Store};

#[derive(Subcommand, Debug)]
pub enum VaultCommand {
    /// Stores (or overwrites) a secret's plaintext value.
    Set {
        name: String,
        /// Literal plaintext value.
        #[arg(long, conflicts_with = "file")]
        value: Option<String>,
        /// Path to a file whose contents become the secret's value.
        #[arg(long, value_name = "PATH", conflicts_with = "value")]
        file: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        /// Make this secret visible to every agent, not just assigned ones.
        #[arg(long)]
        global: bool,
    },
    /// Lists every stored secret (metadata only, never plaintext).
    List,
    /// Prints a secret's decrypted plaintext to stdout.
    Get { name: String },
    /// Deletes a secret and any agent assignments.
    Delete { name: String },
    /// Assigns a secret to an agent (scoped visibility).
    Assign { name: String, agent_id: String },
    /// Removes a previously assigned secret from an agent.
    Unassign { name: String, agent_id: String },
    /// Flips a secret's global visibility flag.
    Global {
        name: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
}

pub async fn run(cmd: VaultCommand, db_path: &PathBuf, passphrase: Option<String>) -> Result<()> {
    let store = Store::new(db_path)?;
    let vault = Vault::new(store, passphrase.as_deref())?;

    match cmd {
        VaultCommand::Set {
            name,
            value,
            file,
            description,
            filename,
            global,
        } => {
            let (kind, plaintext, default_filename) = match (value, file) {
                (Some(v), None) => (SecretKind::String, v.into_bytes(), None),
                (None, Some(path)) => {
                    let bytes = std::fs::read(&path)?;
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                    (SecretKind::File, bytes, name)
                }
                _ => return Err(anyhow!("either --value or --file is required")),
            };
            let filename = filename.or(default_filename);
            vault
                .set_secret(
                    &name,
                    description.as_deref().unwrap_or(""),
                    kind,
                    filename.as_deref(),
                    &plaintext,
                    global,
                )
                .await?;
            println!("stored secret \"{name}\"");
        }
        VaultCommand::List => {
            for secret in vault.list_secrets().await? {
                println!(
                    "{}\t{}\tglobal={}\t{}",
                    secret.id, secret.description, secret.global,
                    secret.filename.as_deref().unwrap_or("-")
                );
            }
        }
        VaultCommand::Get { name } => {
            let plaintext = vault.get_secret_plaintext(&name).await?;
            print!("{}", String::from_utf8_lossy(&plaintext));
        }
        VaultCommand::Delete { name } => {
            vault.delete_secret(&name).await?;
            println!("deleted secret \"{name}\"");
        }
        VaultCommand::Assign { name, agent_id } => {
            vault.assign_secret(&name, &agent_id).await?;
            println!("assigned \"{name}\" to agent \"{agent_id}\"");
        }
        VaultCommand::Unassign { name, agent_id } => {
            vault.unassign_secret(&name, &agent_id).await?;
            println!("unassigned \"{name}\" from agent \"{agent_id}\"");
        }
        VaultCommand::Global { name, enable, disable } => {
            let global = match (enable, disable) {
                (true, false) => true,
                (false, true) => false,
                _ => return Err(anyhow!("exactly one of --enable or --disable is required")),
            };
            vault.set_global(&name, global).await?;
            println!("secret \"{name}\" global={global}");
        }
    }
    Ok(())
}
