//! Live identity store over the indexed layout
//!
//! Creates accounts and resolves them by id, name or access key. Records are
//! immutable once published; there is no update path here.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::identity::IdentityRecord;
use crate::store::access_key_index::AccessKeyIndex;
use crate::store::config::StoreConfig;
use crate::store::identity_publisher::{IdentityPublisher, OpenedRecord, PublishResult};
use crate::store::name_index::NameIndex;
use crate::store::PathResolver;

const CREATION_DATE: &str = "creation_date";

pub struct IdentityStore {
    paths: PathResolver,
    file_mode: u32,
    publisher: IdentityPublisher,
    names: NameIndex,
    access_keys: AccessKeyIndex,
}

impl IdentityStore {
    pub fn new(config: &StoreConfig) -> Self {
        let paths = PathResolver::from_config(config);
        Self {
            file_mode: config.file_mode,
            publisher: IdentityPublisher::new(paths.clone()),
            names: NameIndex::new(paths.clone()),
            access_keys: AccessKeyIndex::new(paths.clone(), config.create_publisher()),
            paths,
        }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn identity_publisher(&self) -> &IdentityPublisher {
        &self.publisher
    }

    pub fn name_index(&self) -> &NameIndex {
        &self.names
    }

    pub fn access_key_index(&self) -> &AccessKeyIndex {
        &self.access_keys
    }

    /// Create the top-level directories of the indexed layout
    pub fn bootstrap(&self) -> Result<()> {
        self.paths.ensure_directory(&self.paths.identities_dir())?;
        self.paths.ensure_directory(&self.paths.names_dir())?;
        self.paths.ensure_directory(&self.paths.access_keys_dir())?;
        Ok(())
    }

    /// Publish a new account and index its name and access keys
    pub fn create_account(&self, mut record: IdentityRecord) -> Result<IdentityRecord> {
        PathResolver::validate_name(&record.account_id)?;
        PathResolver::validate_name(&record.account_name)?;
        for access_key_id in record.access_key_ids() {
            PathResolver::validate_name(access_key_id)?;
        }

        let name_path = self.paths.name_index_path(&record.account_name);
        if self.paths.resolve_index_target(&name_path)?.is_some() {
            return Err(StoreError::AlreadyExists(name_path));
        }
        for access_key_id in record.access_key_ids() {
            let key_path = self.paths.access_key_index_path(access_key_id);
            if self.paths.resolve_index_target(&key_path)?.is_some() {
                return Err(StoreError::AlreadyExists(key_path));
            }
        }

        record
            .extra
            .entry(CREATION_DATE)
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)));
        let body = record.to_json_pretty()?;

        self.bootstrap()?;
        let identity_dir = self.paths.identity_dir(&record.account_id);
        self.paths.ensure_directory(&identity_dir)?;
        let staged = TempRecord::write(&identity_dir, &body, self.file_mode)?;
        let source = OpenedRecord::open(staged.path())?;
        if self.publisher.publish(&record.account_id, &source)? == PublishResult::AlreadyPublished {
            return Err(StoreError::AlreadyExists(self.paths.identity_path(&record.account_id)));
        }
        drop(source);
        drop(staged);

        self.names.ensure(&record.account_id, &record.account_name)?;
        for access_key_id in record.access_key_ids() {
            self.access_keys.ensure(&record.account_id, access_key_id)?;
        }

        info!("Created account {} ({})", record.account_name, record.account_id);
        Ok(record)
    }

    pub fn get_by_id(&self, account_id: &str, show_secrets: bool) -> Result<IdentityRecord> {
        PathResolver::validate_name(account_id)?;
        self.read_identity(&self.paths.identity_path(account_id), show_secrets)
    }

    pub fn get_by_name(&self, account_name: &str, show_secrets: bool) -> Result<IdentityRecord> {
        PathResolver::validate_name(account_name)?;
        let target = self.resolve(&self.paths.name_index_path(account_name))?;
        self.read_identity(&target, show_secrets)
    }

    pub fn get_by_access_key(&self, access_key_id: &str, show_secrets: bool) -> Result<IdentityRecord> {
        PathResolver::validate_name(access_key_id)?;
        let target = self.resolve(&self.paths.access_key_index_path(access_key_id))?;
        self.read_identity(&target, show_secrets)
    }

    pub fn account_exists(&self, account_name: &str) -> Result<bool> {
        PathResolver::validate_name(account_name)?;
        Ok(self
            .paths
            .resolve_index_target(&self.paths.name_index_path(account_name))?
            .is_some())
    }

    /// Names of all indexed accounts, sorted
    pub fn list_accounts(&self) -> Result<Vec<String>> {
        let names_dir = self.paths.names_dir();
        let entries = match fs::read_dir(&names_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&names_dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&names_dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn resolve(&self, index_path: &Path) -> Result<PathBuf> {
        self.paths
            .resolve_index_target(index_path)?
            .ok_or_else(|| StoreError::NotFound(index_path.to_path_buf()))
    }

    fn read_identity(&self, path: &Path, show_secrets: bool) -> Result<IdentityRecord> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        IdentityRecord::parse(path, &bytes, show_secrets)
    }
}

/// Record body written next to its final location, removed on drop
struct TempRecord {
    path: PathBuf,
}

impl TempRecord {
    fn write(dir: &Path, body: &[u8], mode: u32) -> Result<Self> {
        let path = dir.join(format!(".identity.json.{}.tmp", std::process::id()));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        let record = Self { path };
        file.write_all(body).map_err(|e| StoreError::io(&record.path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&record.path, e))?;
        Ok(record)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempRecord {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove temporary record {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AccessKey, AccessKeyStatus};
    use crate::store::config::PlatformVariant;
    use serde_json::Map;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn record(account_id: &str, account_name: &str, keys: &[&str]) -> IdentityRecord {
        IdentityRecord {
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            access_keys: keys
                .iter()
                .map(|k| AccessKey {
                    access_key_id: k.to_string(),
                    secret: Some(format!("secret-{}", k)),
                    status: AccessKeyStatus::Active,
                })
                .collect(),
            extra: Map::new(),
        }
    }

    fn store(dir: &TempDir) -> IdentityStore {
        IdentityStore::new(&StoreConfig::new(dir.path(), PlatformVariant::Generic))
    }

    #[test]
    fn test_create_and_lookup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let created = store.create_account(record("B1", "bob", &["K2", "K3"])).unwrap();
        assert!(created.extra.contains_key(CREATION_DATE));

        let by_id = store.get_by_id("B1", true).unwrap();
        assert_eq!(by_id, created);

        let by_name = store.get_by_name("bob", false).unwrap();
        assert_eq!(by_name.account_id, "B1");
        assert!(by_name.access_keys.iter().all(|k| k.secret.is_none()));

        let by_key = store.get_by_access_key("K3", true).unwrap();
        assert_eq!(by_key.account_id, "B1");
        assert_eq!(by_key.access_keys[1].secret.as_deref(), Some("secret-K3"));

        assert!(store.account_exists("bob").unwrap());
        assert!(!store.account_exists("carol").unwrap());
        assert_eq!(store.list_accounts().unwrap(), vec!["bob"]);
    }

    #[test]
    fn test_create_applies_file_mode_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_account(record("A1", "alice", &["K1"])).unwrap();

        let identity_path = store.paths().identity_path("A1");
        let mode = fs::metadata(&identity_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let entries: Vec<_> = fs::read_dir(store.paths().identity_dir("A1"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("identity.json")]);
    }

    #[test]
    fn test_create_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_account(record("A1", "alice", &["K1"])).unwrap();

        let err = store.create_account(record("A2", "alice", &["K9"])).unwrap_err();
        assert!(err.is_already_exists());

        let err = store.create_account(record("A3", "carol", &["K1"])).unwrap_err();
        assert!(err.is_already_exists());

        let err = store.create_account(record("A1", "dave", &["K8"])).unwrap_err();
        assert!(err.is_already_exists());
        assert!(!store.account_exists("dave").unwrap());
    }

    #[test]
    fn test_lookup_missing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.get_by_name("nobody", false).unwrap_err().is_not_found());
        assert!(store.get_by_access_key("K0", false).unwrap_err().is_not_found());
        assert!(store.get_by_id("X0", false).unwrap_err().is_not_found());
        assert!(store.list_accounts().unwrap().is_empty());
    }
}
