//! Account name index: `accounts_by_name/<name>` -> identity

use std::io;
use std::os::unix::fs::symlink;
use log::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::{IndexResult, PathResolver};

pub struct NameIndex {
    paths: PathResolver,
}

impl NameIndex {
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    /// Make `account_name` resolve to the identity of `account_id`.
    /// An entry pointing at any other identity is a conflict and is left alone.
    pub fn ensure(&self, account_id: &str, account_name: &str) -> Result<IndexResult> {
        PathResolver::validate_name(account_id)?;
        PathResolver::validate_name(account_name)?;

        let expected = self.paths.identity_path(account_id);
        let index_path = self.paths.name_index_path(account_name);
        if let Some(existing) = self.paths.existing_index(&index_path, &expected)? {
            return Ok(existing);
        }

        let reference = self.paths.relative_identity_reference(account_id);
        match symlink(&reference, &index_path) {
            Ok(()) => {
                info!("Linked account name {} to {}", account_name, expected.display());
                Ok(IndexResult::Created)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("Account name {} appeared while linking, re-checking", account_name);
                match self.paths.existing_index(&index_path, &expected)? {
                    Some(existing) => Ok(existing),
                    // Gone again; let the caller retry
                    None => Err(StoreError::io(&index_path, e)),
                }
            }
            Err(e) => Err(StoreError::io(&index_path, e)),
        }
    }
}
