//! Identity publisher
//!
//! Publishes the canonical `identity.json` of an account by hard-linking an
//! already written source file onto it. The link is create-only, so an
//! identity is published exactly once and never rewritten afterwards.

use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use log::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::PathResolver;

/// Outcome of [`IdentityPublisher::publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    Published,
    /// The identity was already in place, typically from an earlier run
    AlreadyPublished,
}

/// An open record file together with the stat taken right after opening it
#[derive(Debug)]
pub struct OpenedRecord {
    path: PathBuf,
    file: File,
    stat: Metadata,
}

impl OpenedRecord {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        let stat = file.metadata().map_err(|e| StoreError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            stat,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stat(&self) -> &Metadata {
        &self.stat
    }

    /// Read the whole record through the open handle
    pub fn read_contents(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.stat.len() as usize);
        (&self.file)
            .read_to_end(&mut buffer)
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(buffer)
    }

    fn same_inode(&self, other: &Metadata) -> bool {
        self.stat.dev() == other.dev() && self.stat.ino() == other.ino()
    }
}

pub struct IdentityPublisher {
    paths: PathResolver,
}

impl IdentityPublisher {
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    /// Link `source` to the identity path of `account_id`, create-only
    pub fn publish(&self, account_id: &str, source: &OpenedRecord) -> Result<PublishResult> {
        PathResolver::validate_name(account_id)?;
        self.paths.ensure_directory(&self.paths.identity_dir(account_id))?;

        let identity_path = self.paths.identity_path(account_id);
        match fs::hard_link(source.path(), &identity_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "Identity {} was created on a previous run, skipping {}",
                    identity_path.display(),
                    source.path().display()
                );
                return Ok(PublishResult::AlreadyPublished);
            }
            Err(e) => return Err(StoreError::io(&identity_path, e)),
        }

        // The source may have been replaced between open and link
        let published = fs::symlink_metadata(&identity_path).map_err(|e| StoreError::io(&identity_path, e))?;
        if !source.same_inode(&published) {
            fs::remove_file(&identity_path).map_err(|e| StoreError::io(&identity_path, e))?;
            return Err(StoreError::Io {
                path: source.path().to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "source file changed while being published"),
            });
        }

        info!("Published identity {} for account id {}", identity_path.display(), account_id);
        Ok(PublishResult::Published)
    }
}
