//! `praktor backup`/`restore`: the database's own backup format
//! and tooling are an out-of-scope external collaborator, so this is a
//! plain file-level copy of the SQLite database — good enough while the
//! daemon isn't writing to it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub fn backup(db_path: &PathBuf, out_path: &PathBuf) -> Result<()> {
    std::fs::copy(db_path, out_path)
        .with_context(|| format!("copy {} to {}", db_path.display(), out_path.display()))?;
    println!("backed up {} to {}", db_path.display(), out_path.display());
    Ok(())
}

pub fn restore(backup_path: &PathBuf, db_path: &PathBuf, overwrite: bool) -> Result<()> {
    if db_path.exists() && !overwrite {
        bail!("{} already exists; pass --overwrite to replace it", db_path.display());
    }
    std::fs::copy(backup_path, db_path)
        .with_context(|| format!("copy {} to {}", backup_path.display(), db_path.display()))?;
    println!("restored {} from {}", db_path.display(), backup_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_copies_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("praktor.db");
        let out_path = dir.path().join("praktor.bak");
        std::fs::write(&db_path, b"sqlite-bytes").unwrap();

        backup(&db_path, &out_path).unwrap();

        assert_eq!(std::fs::read(&out_path).unwrap(), b"sqlite-bytes");
    }

    #[test]
    fn restore_refuses_to_overwrite_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let backup_path = dir.path().join("praktor.bak");
        let db_path = dir.path().join("praktor.db");
        std::fs::write(&backup_path, b"restored-bytes").unwrap();
        std::fs::write(&db_path, b"existing-bytes").unwrap();

        let err = restore(&backup_path, &db_path, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read(&db_path).unwrap(), b"existing-bytes");
    }

    #[test]
    fn restore_overwrites_when_flag_set() {
        let dir = tempfile::tempdir().unwrap();
        let backup_path = dir.path().join("praktor.bak");
        let db_path = dir.path().join("praktor.db");
        std::fs::write(&backup_path, b"restored-bytes").unwrap();
        std::fs::write(&db_path, b"existing-bytes").unwrap();

        restore(&backup_path, &db_path, true).unwrap();

        assert_eq!(std::fs::read(&db_path).unwrap(), b"restored-bytes");
    }
}
