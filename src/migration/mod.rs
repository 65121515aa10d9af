//! Config Directory Upgrade
//!
//! Moves accounts from the legacy one-file-per-account layout
//! (`accounts/<name>.json`) into the indexed layout, then archives the legacy
//! directory. Every per-account step is idempotent, so an interrupted run is
//! recovered by running the whole upgrade again.
//!
//! Per-account state machine:
//!
//! ```text
//! Start -> ParamsReady -> IdentityPublished -> NameIndexed -> KeysIndexed -> Complete
//! ```

pub mod archive;
pub mod config_dir_upgrader;
pub mod mock_upgrader;
pub mod orchestrator;


use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::error::StoreError;
use crate::identity::AccountId;
use crate::store::identity_publisher::PublishResult;
use crate::store::IndexResult;

pub use orchestrator::Migration;

/// How often and how patiently a failing account is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Same attempt budget without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Last stage an account upgrade reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpgradeStage {
    Start,
    ParamsReady,
    IdentityPublished,
    NameIndexed,
    KeysIndexed,
    Complete,
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpgradeStage::Start => "start",
            UpgradeStage::ParamsReady => "params_ready",
            UpgradeStage::IdentityPublished => "identity_published",
            UpgradeStage::NameIndexed => "name_indexed",
            UpgradeStage::KeysIndexed => "keys_indexed",
            UpgradeStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// A failed attempt, tagged with the stage it had reached
#[derive(Debug, Error)]
#[error("failed after {stage}: {source}")]
pub struct UpgradeError {
    pub stage: UpgradeStage,
    #[source]
    pub source: StoreError,
}

impl UpgradeError {
    pub fn new(stage: UpgradeStage, source: StoreError) -> Self {
        Self { stage, source }
    }
}

/// What a successful account upgrade did
#[derive(Debug, Clone, PartialEq)]
pub struct AccountOutcome {
    pub account_id: AccountId,
    pub identity: PublishResult,
    pub name: IndexResult,
    pub access_keys: Vec<IndexResult>,
}

impl AccountOutcome {
    /// True when nothing had to be created
    pub fn was_already_complete(&self) -> bool {
        self.identity == PublishResult::AlreadyPublished
            && self.name == IndexResult::AlreadyIndexed
            && self.access_keys.iter().all(|k| *k == IndexResult::AlreadyIndexed)
    }
}

/// An account that exhausted its retries (or hit a non-retryable error)
#[derive(Debug)]
pub struct AccountFailure {
    pub account_name: String,
    pub attempts: u32,
    pub error: UpgradeError,
}

impl fmt::Display for AccountFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} attempts): {}", self.account_name, self.attempts, self.error)
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub migrated: Vec<String>,
    pub already_complete: Vec<String>,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    /// At least one account could not be upgraded; nothing was archived
    #[error("config directory upgrade failed for {} account(s): {}", .failures.len(), join_failures(.failures))]
    RunFailure { failures: Vec<AccountFailure> },

    /// Bootstrap, listing or archival failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The bootstrap or archival task panicked; per-account panics are
    /// reported as that account's failure
    #[error("upgrade worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MigrationError {
    pub fn failures(&self) -> &[AccountFailure] {
        match self {
            MigrationError::RunFailure { failures } => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[AccountFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// One implementation per way of upgrading accounts; the orchestrator drives
/// any of them with the same retry and archival policy
pub trait AccountUpgrader: Send + Sync {
    /// Create whatever the run needs before touching accounts
    fn prepare(&self) -> Result<(), StoreError>;

    /// Accounts still waiting for an upgrade
    fn list_accounts(&self) -> Result<Vec<String>, StoreError>;

    /// Upgrade one account; must be idempotent
    fn upgrade_one(&self, account_name: &str) -> Result<AccountOutcome, UpgradeError>;

    /// Archive and remove the legacy records once every account succeeded
    fn archive(&self, account_names: &[String]) -> Result<(), StoreError>;
}
