//! Filesystem Identity Store
//!
//! Accounts live as one immutable `identity.json` per account id, with two
//! families of symlink indices resolving names and access keys to it:
//!
//! ```text
//! <root>/identities/<account_id>/identity.json
//! <root>/accounts_by_name/<account_name>  -> ../identities/<account_id>/identity.json
//! <root>/access_keys/<access_key_id>      -> ../identities/<account_id>/identity.json
//! <root>/accounts/<account_name>.json     (legacy layout, removed by the upgrade)
//! <root>/.backup_accounts_dir/<account_name>.json
//! ```
//!
//! The only concurrency control is the atomicity of the individual
//! filesystem primitives; callers must not run the upgrade next to live
//! writers.

pub mod access_key_index;
pub mod config;
pub mod identity_publisher;
pub mod identity_store;
pub mod name_index;
pub mod publish;

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};
use log::debug;

use crate::error::{Result, StoreError};
use crate::store::config::StoreConfig;

pub const IDENTITIES_DIR: &str = "identities";
pub const IDENTITY_FILE: &str = "identity.json";
pub const ACCOUNTS_BY_NAME_DIR: &str = "accounts_by_name";
pub const ACCESS_KEYS_DIR: &str = "access_keys";
pub const LEGACY_ACCOUNTS_DIR: &str = "accounts";
pub const BACKUP_ACCOUNTS_DIR: &str = ".backup_accounts_dir";
pub const STAGING_DIR: &str = ".staging";

const JSON_SUFFIX: &str = ".json";

/// Outcome of an index `ensure` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexResult {
    Created,
    AlreadyIndexed,
}

/// Canonical on-disk locations for identities, indices and legacy records
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    dir_mode: u32,
}

impl PathResolver {
    pub fn new(root: impl AsRef<Path>, dir_mode: u32) -> Self {
        Self {
            root: normalize(root.as_ref()),
            dir_mode,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.root, config.dir_mode)
    }

    /// Create `path` (and missing parents) with the configured mode; an
    /// existing directory is not an error
    pub fn ensure_directory(&self, path: &Path) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(self.dir_mode)
            .create(path)
            .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        debug!("Ensured directory {}", path.display());
        Ok(())
    }

    /// Reject identifiers that would escape their directory
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    pub fn identities_dir(&self) -> PathBuf {
        self.root.join(IDENTITIES_DIR)
    }

    pub fn identity_dir(&self, account_id: &str) -> PathBuf {
        self.identities_dir().join(account_id)
    }

    pub fn identity_path(&self, account_id: &str) -> PathBuf {
        self.identity_dir(account_id).join(IDENTITY_FILE)
    }

    /// Reference stored inside index entries, relative to the index directory
    pub fn relative_identity_reference(&self, account_id: &str) -> PathBuf {
        Path::new("..")
            .join(IDENTITIES_DIR)
            .join(account_id)
            .join(IDENTITY_FILE)
    }

    pub fn names_dir(&self) -> PathBuf {
        self.root.join(ACCOUNTS_BY_NAME_DIR)
    }

    pub fn name_index_path(&self, account_name: &str) -> PathBuf {
        self.names_dir().join(account_name)
    }

    pub fn access_keys_dir(&self) -> PathBuf {
        self.root.join(ACCESS_KEYS_DIR)
    }

    pub fn access_key_index_path(&self, access_key_id: &str) -> PathBuf {
        self.access_keys_dir().join(access_key_id)
    }

    pub fn access_key_staging_dir(&self) -> PathBuf {
        self.access_keys_dir().join(STAGING_DIR)
    }

    /// Per-account, per-key staging entry; the digest keeps names fixed-length
    /// and free of separators
    pub fn access_key_staging_path(&self, account_id: &str, access_key_id: &str) -> PathBuf {
        let digest = md5::compute(format!("{}\0{}", account_id, access_key_id));
        self.access_key_staging_dir().join(format!("{:x}", digest))
    }

    pub fn legacy_dir(&self) -> PathBuf {
        self.root.join(LEGACY_ACCOUNTS_DIR)
    }

    pub fn legacy_path(&self, account_name: &str) -> PathBuf {
        self.legacy_dir().join(format!("{}{}", account_name, JSON_SUFFIX))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_ACCOUNTS_DIR)
    }

    pub fn backup_path(&self, account_name: &str) -> PathBuf {
        self.backup_dir().join(format!("{}{}", account_name, JSON_SUFFIX))
    }

    /// Snapshot of the account names present in the legacy directory.
    /// A missing directory means there is nothing left to upgrade.
    pub fn list_legacy_accounts(&self) -> Result<Vec<String>> {
        let legacy_dir = self.legacy_dir();
        let entries = match fs::read_dir(&legacy_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&legacy_dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&legacy_dir, e))?;
            let file_type = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?;
            if file_type.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(JSON_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Identity path an index entry points to, or `None` if the entry is absent
    pub fn resolve_index_target(&self, index_path: &Path) -> Result<Option<PathBuf>> {
        let target = match fs::read_link(index_path) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(index_path, e)),
        };
        if target.is_absolute() {
            return Ok(Some(normalize(&target)));
        }
        let base = index_path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Some(normalize(&base.join(target))))
    }

    /// Check an existing index entry against the identity it should point to:
    /// `Some(AlreadyIndexed)` when it matches, `Conflict` when it points
    /// elsewhere and `None` when there is no entry yet
    pub(crate) fn existing_index(&self, index_path: &Path, expected: &Path) -> Result<Option<IndexResult>> {
        match self.resolve_index_target(index_path)? {
            None => Ok(None),
            Some(found) if found == expected => Ok(Some(IndexResult::AlreadyIndexed)),
            Some(found) => Err(StoreError::Conflict {
                index: index_path.to_path_buf(),
                expected: expected.to_path_buf(),
                found,
            }),
        }
    }
}

/// Lexically normalize a path (`.` dropped, `..` folded)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let folded = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if folded {
                    out.pop();
                } else if !matches!(out.components().next_back(), Some(Component::RootDir)) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> PathResolver {
        PathResolver::new(dir.path(), 0o700)
    }

    #[test]
    fn test_layout_paths() {
        let paths = PathResolver::new("/cfg", 0o700);

        assert_eq!(paths.identity_path("A1"), PathBuf::from("/cfg/identities/A1/identity.json"));
        assert_eq!(paths.name_index_path("alice"), PathBuf::from("/cfg/accounts_by_name/alice"));
        assert_eq!(paths.access_key_index_path("K1"), PathBuf::from("/cfg/access_keys/K1"));
        assert_eq!(paths.legacy_path("alice"), PathBuf::from("/cfg/accounts/alice.json"));
        assert_eq!(paths.backup_path("alice"), PathBuf::from("/cfg/.backup_accounts_dir/alice.json"));
        assert_eq!(
            paths.relative_identity_reference("A1"),
            PathBuf::from("../identities/A1/identity.json")
        );
    }

    #[test]
    fn test_staging_paths_are_per_account() {
        let paths = PathResolver::new("/cfg", 0o700);
        let a = paths.access_key_staging_path("A1", "K1");
        let b = paths.access_key_staging_path("B1", "K1");

        assert_ne!(a, b);
        assert_eq!(a, paths.access_key_staging_path("A1", "K1"));
        assert!(a.starts_with("/cfg/access_keys/.staging"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("a/b/../../..")), PathBuf::from(".."));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_validate_name() {
        assert!(PathResolver::validate_name("alice").is_ok());
        assert!(PathResolver::validate_name("").is_err());
        assert!(PathResolver::validate_name("..").is_err());
        assert!(PathResolver::validate_name("a/b").is_err());
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let paths = resolver(&dir);
        let target = paths.identity_dir("A1");

        paths.ensure_directory(&target).unwrap();
        paths.ensure_directory(&target).unwrap();
        assert!(target.is_dir());

        // A regular file in the way is fatal
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"x").unwrap();
        assert!(matches!(paths.ensure_directory(&blocked), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_list_legacy_accounts() {
        let dir = TempDir::new().unwrap();
        let paths = resolver(&dir);

        // Missing legacy dir
        assert!(paths.list_legacy_accounts().unwrap().is_empty());

        paths.ensure_directory(&paths.legacy_dir()).unwrap();
        fs::write(paths.legacy_path("bob"), b"{}").unwrap();
        fs::write(paths.legacy_path("alice"), b"{}").unwrap();
        fs::write(paths.legacy_dir().join("notes.txt"), b"").unwrap();
        fs::write(paths.legacy_dir().join(".hidden.json"), b"{}").unwrap();
        paths.ensure_directory(&paths.legacy_dir().join(STAGING_DIR)).unwrap();

        assert_eq!(paths.list_legacy_accounts().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_resolve_index_target() {
        let dir = TempDir::new().unwrap();
        let paths = resolver(&dir);
        paths.ensure_directory(&paths.names_dir()).unwrap();

        let index = paths.name_index_path("alice");
        assert_eq!(paths.resolve_index_target(&index).unwrap(), None);

        symlink(paths.relative_identity_reference("A1"), &index).unwrap();
        assert_eq!(paths.resolve_index_target(&index).unwrap(), Some(paths.identity_path("A1")));

        // Resolution does not require the identity to exist
        assert!(!paths.identity_path("A1").exists());
    }

    #[test]
    fn test_existing_index_conflict() {
        let dir = TempDir::new().unwrap();
        let paths = resolver(&dir);
        paths.ensure_directory(&paths.names_dir()).unwrap();
        let index = paths.name_index_path("alice");
        symlink(paths.relative_identity_reference("Z9"), &index).unwrap();

        let matched = paths.existing_index(&index, &paths.identity_path("Z9")).unwrap();
        assert_eq!(matched, Some(IndexResult::AlreadyIndexed));

        let err = paths.existing_index(&index, &paths.identity_path("A1")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
