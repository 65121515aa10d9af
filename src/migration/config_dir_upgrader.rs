//! Filesystem upgrader from `accounts/<name>.json` to the indexed layout

use log::{debug, info, warn};

use crate::error::StoreError;
use crate::identity::IdentityRecord;
use crate::migration::archive::archive_legacy_accounts;
use crate::migration::{AccountOutcome, AccountUpgrader, UpgradeError, UpgradeStage};
use crate::store::config::StoreConfig;
use crate::store::identity_publisher::OpenedRecord;
use crate::store::identity_store::IdentityStore;

const MDC_ACCOUNT: &str = "account";

/// Everything one account upgrade needs, read once from the legacy record
struct AccountUpgradeParams {
    record: IdentityRecord,
    /// Kept open until the upgrade finishes
    source: OpenedRecord,
}

pub struct ConfigDirUpgrader {
    store: IdentityStore,
}

impl ConfigDirUpgrader {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            store: IdentityStore::new(config),
        }
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    fn prepare_params(&self, account_name: &str) -> Result<AccountUpgradeParams, StoreError> {
        let legacy_path = self.store.paths().legacy_path(account_name);
        let source = OpenedRecord::open(&legacy_path)?;
        let contents = source.read_contents()?;
        let record = IdentityRecord::from_slice(&legacy_path, &contents)?;
        if record.account_name != account_name {
            warn!(
                "Legacy record {} names account {}, indexing it under {}",
                legacy_path.display(),
                record.account_name,
                account_name
            );
        }
        Ok(AccountUpgradeParams { record, source })
    }
}

impl AccountUpgrader for ConfigDirUpgrader {
    fn prepare(&self) -> Result<(), StoreError> {
        self.store.bootstrap()?;
        let paths = self.store.paths();
        paths.ensure_directory(&paths.access_key_staging_dir())
    }

    fn list_accounts(&self) -> Result<Vec<String>, StoreError> {
        self.store.paths().list_legacy_accounts()
    }

    fn upgrade_one(&self, account_name: &str) -> Result<AccountOutcome, UpgradeError> {
        let _mdc = MdcAccount::insert(account_name);
        let mut stage = UpgradeStage::Start;

        let params = self
            .prepare_params(account_name)
            .map_err(|e| UpgradeError::new(stage, e))?;
        let account_id = params.record.account_id.as_str();
        stage = UpgradeStage::ParamsReady;
        debug!("Account {} -> {}: {}", account_name, account_id, stage);

        let identity = self
            .store
            .identity_publisher()
            .publish(account_id, &params.source)
            .map_err(|e| UpgradeError::new(stage, e))?;
        stage = UpgradeStage::IdentityPublished;
        debug!("Account {} -> {}: {}", account_name, account_id, stage);

        let name = self
            .store
            .name_index()
            .ensure(account_id, account_name)
            .map_err(|e| UpgradeError::new(stage, e))?;
        stage = UpgradeStage::NameIndexed;
        debug!("Account {} -> {}: {}", account_name, account_id, stage);

        let mut access_keys = Vec::with_capacity(params.record.access_keys.len());
        for access_key_id in params.record.access_key_ids() {
            let result = self
                .store
                .access_key_index()
                .ensure(account_id, access_key_id)
                .map_err(|e| UpgradeError::new(stage, e))?;
            access_keys.push(result);
        }
        stage = UpgradeStage::KeysIndexed;
        debug!("Account {} -> {}: {}", account_name, account_id, stage);

        let outcome = AccountOutcome {
            account_id: account_id.to_string(),
            identity,
            name,
            access_keys,
        };
        info!("Account {} upgraded ({})", account_name, UpgradeStage::Complete);
        Ok(outcome)
    }

    fn archive(&self, account_names: &[String]) -> Result<(), StoreError> {
        archive_legacy_accounts(self.store.paths(), account_names)
    }
}

/// Tags log records emitted on this thread with the account being upgraded
struct MdcAccount;

impl MdcAccount {
    fn insert(account_name: &str) -> Self {
        log_mdc::insert(MDC_ACCOUNT, account_name);
        Self
    }
}

impl Drop for MdcAccount {
    fn drop(&mut self) {
        log_mdc::remove(MDC_ACCOUNT);
    }
}
