//! Access key index: `access_keys/<access_key_id>` -> identity
//!
//! Entries are first staged as a relative symlink under
//! `access_keys/.staging/` and then published through the platform's
//! [`PublishOrReplace`] capability, so the final name only ever appears fully
//! formed.

use std::io;
use std::os::unix::fs::symlink;
use std::sync::Arc;
use log::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::publish::PublishOrReplace;
use crate::store::{IndexResult, PathResolver};

pub struct AccessKeyIndex {
    paths: PathResolver,
    publisher: Arc<dyn PublishOrReplace>,
}

impl AccessKeyIndex {
    pub fn new(paths: PathResolver, publisher: Arc<dyn PublishOrReplace>) -> Self {
        Self { paths, publisher }
    }

    /// Make `access_key_id` resolve to the identity of `account_id`
    pub fn ensure(&self, account_id: &str, access_key_id: &str) -> Result<IndexResult> {
        PathResolver::validate_name(account_id)?;
        PathResolver::validate_name(access_key_id)?;

        let expected = self.paths.identity_path(account_id);
        let index_path = self.paths.access_key_index_path(access_key_id);
        if let Some(existing) = self.paths.existing_index(&index_path, &expected)? {
            return Ok(existing);
        }

        self.paths.ensure_directory(&self.paths.access_key_staging_dir())?;
        let staged = self.paths.access_key_staging_path(account_id, access_key_id);
        let reference = self.paths.relative_identity_reference(account_id);
        match symlink(&reference, &staged) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "Access key {} was staged on a previous attempt, reusing {}",
                    access_key_id,
                    staged.display()
                );
            }
            Err(e) => return Err(StoreError::io(&staged, e)),
        }

        self.publisher.publish(&staged, &index_path)?;
        info!(
            "Linked access key {} to {} ({})",
            access_key_id,
            expected.display(),
            self.publisher.variant()
        );
        Ok(IndexResult::Created)
    }
}
