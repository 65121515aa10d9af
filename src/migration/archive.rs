//! Archival of the legacy `accounts/` directory
//!
//! Each legacy record is hard-linked into `.backup_accounts_dir/` before its
//! legacy name is removed, so its content always exists under at least one
//! of the two names. Backups are never deleted here.

use std::fs;
use std::io;
use std::path::Path;
use log::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::PathResolver;

/// Move every named legacy record into the backup directory, then remove
/// staging leftovers and the legacy directory itself
pub fn archive_legacy_accounts(paths: &PathResolver, account_names: &[String]) -> Result<()> {
    paths.ensure_directory(&paths.backup_dir())?;

    for account_name in account_names {
        archive_account(paths, account_name)?;
    }

    remove_dir_all_ignore_missing(&paths.access_key_staging_dir())?;
    remove_hidden_subdirs(&paths.legacy_dir())?;

    let legacy_dir = paths.legacy_dir();
    match fs::remove_dir(&legacy_dir) {
        Ok(()) => info!("Removed legacy accounts directory {}", legacy_dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Legacy accounts directory {} does not exist, skipping", legacy_dir.display());
        }
        Err(e) => return Err(StoreError::io(&legacy_dir, e)),
    }
    Ok(())
}

fn archive_account(paths: &PathResolver, account_name: &str) -> Result<()> {
    let legacy_path = paths.legacy_path(account_name);
    let backup_path = paths.backup_path(account_name);
    let scratch = paths.backup_dir().join(format!(".{}.json.tmp", account_name));

    remove_file_ignore_missing(&scratch)?;
    match fs::hard_link(&legacy_path, &scratch) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(
                "Legacy record {} does not exist, already archived, skipping",
                legacy_path.display()
            );
            return Ok(());
        }
        Err(e) => return Err(StoreError::io(&scratch, e)),
    }
    // Replaces a stale backup from an earlier partial archive in one step
    fs::rename(&scratch, &backup_path).map_err(|e| StoreError::io(&backup_path, e))?;
    // rename(2) is a no-op when both names already share an inode
    remove_file_ignore_missing(&scratch)?;
    remove_file_ignore_missing(&legacy_path)?;

    info!("Archived {} to {}", legacy_path.display(), backup_path.display());
    Ok(())
}

fn remove_file_ignore_missing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn remove_dir_all_ignore_missing(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Staging directories earlier writers left inside the legacy directory
fn remove_hidden_subdirs(legacy_dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(legacy_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::io(legacy_dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(legacy_dir, e))?;
        let is_dir = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?.is_dir();
        if is_dir && entry.file_name().to_string_lossy().starts_with('.') {
            remove_dir_all_ignore_missing(&entry.path())?;
        }
    }
    Ok(())
}
