//! Mock implementation of AccountUpgrader for testing

use crate::error::StoreError;
use crate::migration::{AccountOutcome, AccountUpgrader, UpgradeError, UpgradeStage};
use crate::store::identity_publisher::PublishResult;
use crate::store::IndexResult;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use log::info;

/// Scripted behavior for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Every attempt fails with an I/O error
    Always,
    /// The first `n` attempts fail with an I/O error
    Times(u32),
    /// Every attempt reports an index conflict
    Conflict,
    /// Every attempt panics
    Panic,
}

/// In-memory upgrader that counts attempts and records archival
pub struct MockUpgrader {
    accounts: Vec<String>,
    scripts: Arc<Mutex<HashMap<String, MockFailure>>>,
    attempts: Arc<Mutex<HashMap<String, u32>>>,
    archived: Arc<Mutex<Option<Vec<String>>>>,
}

impl MockUpgrader {
    pub fn new(accounts: Vec<String>) -> Self {
        Self {
            accounts,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            archived: Arc::new(Mutex::new(None)),
        }
    }

    /// Make `account_name` fail according to `failure`
    pub fn script(&self, account_name: &str, failure: MockFailure) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.insert(account_name.to_string(), failure);
    }

    /// Number of upgrade attempts made for an account
    pub fn attempts(&self, account_name: &str) -> u32 {
        let attempts = self.attempts.lock().unwrap();
        attempts.get(account_name).copied().unwrap_or(0)
    }

    /// Accounts passed to `archive`, if it ran
    pub fn archived(&self) -> Option<Vec<String>> {
        let archived = self.archived.lock().unwrap();
        archived.clone()
    }
}

impl AccountUpgrader for MockUpgrader {
    fn prepare(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn list_accounts(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.accounts.clone())
    }

    fn upgrade_one(&self, account_name: &str) -> Result<AccountOutcome, UpgradeError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(account_name.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let script = self.scripts.lock().unwrap().get(account_name).copied();
        let path = PathBuf::from(format!("accounts/{}.json", account_name));
        match script {
            Some(MockFailure::Always) => {
                return Err(injected_io_error(path));
            }
            Some(MockFailure::Times(n)) if attempt <= n => {
                return Err(injected_io_error(path));
            }
            Some(MockFailure::Panic) => {
                panic!("injected panic upgrading {}", account_name);
            }
            Some(MockFailure::Conflict) => {
                return Err(UpgradeError::new(
                    UpgradeStage::IdentityPublished,
                    StoreError::Conflict {
                        index: PathBuf::from(format!("accounts_by_name/{}", account_name)),
                        expected: PathBuf::from("identities/mock/identity.json"),
                        found: PathBuf::from("identities/other/identity.json"),
                    },
                ));
            }
            _ => {}
        }

        info!("Mock upgraded account {} on attempt {}", account_name, attempt);
        Ok(AccountOutcome {
            account_id: format!("id-{}", account_name),
            identity: PublishResult::Published,
            name: IndexResult::Created,
            access_keys: Vec::new(),
        })
    }

    fn archive(&self, account_names: &[String]) -> Result<(), StoreError> {
        let mut archived = self.archived.lock().unwrap();
        *archived = Some(account_names.to_vec());
        Ok(())
    }
}

fn injected_io_error(path: PathBuf) -> UpgradeError {
    UpgradeError::new(
        UpgradeStage::Start,
        StoreError::Io {
            path,
            source: io::Error::new(io::ErrorKind::Other, "injected failure"),
        },
    )
}
