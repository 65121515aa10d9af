//! Migration orchestrator
//!
//! Runs every account through an [`AccountUpgrader`] with a bounded retry
//! budget, collects failures without letting one account block another, and
//! archives the legacy records only when every account made it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use tokio::task;

use crate::error::StoreError;
use crate::migration::{
    AccountFailure, AccountOutcome, AccountUpgrader, MigrationError, MigrationReport, RetryPolicy,
    UpgradeError, UpgradeStage,
};

pub struct Migration {
    upgrader: Arc<dyn AccountUpgrader>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Migration {
    pub fn new(upgrader: Arc<dyn AccountUpgrader>, retry: RetryPolicy) -> Self {
        Self {
            upgrader,
            retry,
            concurrency: 1,
        }
    }

    /// Number of accounts upgraded at the same time
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upgrade every listed account, then archive the legacy records.
    /// Any account failure aborts the run before archival.
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        let upgrader = Arc::clone(&self.upgrader);
        let account_names = task::spawn_blocking(move || {
            upgrader.prepare()?;
            upgrader.list_accounts()
        })
        .await??;
        info!("Upgrading {} account(s)", account_names.len());

        let (outcomes, failures) = self.upgrade_all(&account_names).await;
        if !failures.is_empty() {
            for failure in &failures {
                error!("Account upgrade failed: {}", failure);
            }
            error!(
                "Config directory upgrade failed for {} of {} account(s), legacy records left in place",
                failures.len(),
                account_names.len()
            );
            return Err(MigrationError::RunFailure { failures });
        }

        let upgrader = Arc::clone(&self.upgrader);
        let names = account_names.clone();
        task::spawn_blocking(move || upgrader.archive(&names)).await??;

        let mut report = MigrationReport::default();
        for (account_name, outcome) in outcomes {
            if outcome.was_already_complete() {
                report.already_complete.push(account_name);
            } else {
                report.migrated.push(account_name);
            }
        }
        report.migrated.sort();
        report.already_complete.sort();
        info!(
            "Config directory upgrade complete: {} migrated, {} already complete",
            report.migrated.len(),
            report.already_complete.len()
        );
        Ok(report)
    }

    /// Upgrade the given accounts, returning successes and failures sorted by name
    pub async fn upgrade_all(
        &self,
        account_names: &[String],
    ) -> (Vec<(String, AccountOutcome)>, Vec<AccountFailure>) {
        let results: Vec<_> = stream::iter(account_names.iter().cloned())
            .map(|account_name| upgrade_with_retry(Arc::clone(&self.upgrader), account_name, self.retry))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(failure) => failures.push(failure),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        failures.sort_by(|a, b| a.account_name.cmp(&b.account_name));
        (outcomes, failures)
    }
}

async fn upgrade_with_retry(
    upgrader: Arc<dyn AccountUpgrader>,
    account_name: String,
    retry: RetryPolicy,
) -> Result<(String, AccountOutcome), AccountFailure> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let worker = Arc::clone(&upgrader);
        let name = account_name.clone();
        let error = match task::spawn_blocking(move || worker.upgrade_one(&name)).await {
            Ok(Ok(outcome)) => return Ok((account_name, outcome)),
            Ok(Err(error)) => error,
            // A panicked attempt is not retried
            Err(join_error) => {
                error!("Upgrade worker for account {} failed: {}", account_name, join_error);
                return Err(AccountFailure {
                    attempts: attempt,
                    error: worker_failure(&account_name, join_error),
                    account_name,
                });
            }
        };

        if !error.source.is_retryable() || attempt >= max_attempts {
            return Err(AccountFailure {
                account_name,
                attempts: attempt,
                error,
            });
        }
        warn!(
            "Upgrade of account {} failed, err {}, retries left {}",
            account_name,
            error,
            max_attempts - attempt
        );
        tokio::time::sleep(retry.delay).await;
    }
}

fn worker_failure(account_name: &str, join_error: task::JoinError) -> UpgradeError {
    UpgradeError::new(
        UpgradeStage::Start,
        StoreError::Io {
            path: PathBuf::from(account_name),
            source: io::Error::new(io::ErrorKind::Other, format!("upgrade worker failed: {}", join_error)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::mock_upgrader::{MockFailure, MockUpgrader};

    fn accounts(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_archives_when_all_succeed() {
        let upgrader = Arc::new(MockUpgrader::new(accounts(&["bob", "alice"])));
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(3));

        let report = migration.run().await.unwrap();
        assert_eq!(report.migrated, vec!["alice", "bob"]);
        assert_eq!(upgrader.archived(), Some(accounts(&["bob", "alice"])));
        assert_eq!(upgrader.attempts("alice"), 1);
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let upgrader = Arc::new(MockUpgrader::new(accounts(&["alice"])));
        upgrader.script("alice", MockFailure::Always);
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(3));

        let err = migration.run().await.unwrap_err();
        assert_eq!(upgrader.attempts("alice"), 3);
        assert_eq!(err.failures()[0].attempts, 3);
        assert_eq!(upgrader.archived(), None);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let upgrader = Arc::new(MockUpgrader::new(accounts(&["alice"])));
        upgrader.script("alice", MockFailure::Times(2));
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(3));

        migration.run().await.unwrap();
        assert_eq!(upgrader.attempts("alice"), 3);
        assert!(upgrader.archived().is_some());
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let upgrader = Arc::new(MockUpgrader::new(accounts(&["alice", "bob"])));
        upgrader.script("alice", MockFailure::Conflict);
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(3));

        let err = migration.run().await.unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].account_name, "alice");
        assert_eq!(failures[0].attempts, 1);
        assert!(matches!(failures[0].error.source, StoreError::Conflict { .. }));
        assert_eq!(upgrader.attempts("bob"), 1);
        assert_eq!(upgrader.archived(), None);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_with_concurrency() {
        let names = accounts(&["a", "b", "c", "d", "e", "f"]);
        let upgrader = Arc::new(MockUpgrader::new(names.clone()));
        upgrader.script("c", MockFailure::Always);
        upgrader.script("e", MockFailure::Always);
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(2)).with_concurrency(4);

        let (outcomes, failures) = migration.upgrade_all(&names).await;
        let failed: Vec<_> = failures.iter().map(|f| f.account_name.as_str()).collect();
        let succeeded: Vec<_> = outcomes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["c", "e"]);
        assert_eq!(succeeded, vec!["a", "b", "d", "f"]);
    }

    #[tokio::test]
    async fn test_panicked_worker_is_reported_with_other_failures() {
        let upgrader = Arc::new(MockUpgrader::new(accounts(&["a", "b", "c"])));
        upgrader.script("b", MockFailure::Panic);
        upgrader.script("c", MockFailure::Always);
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(3));

        let err = migration.run().await.unwrap_err();
        let failures = err.failures();
        let failed: Vec<_> = failures.iter().map(|f| f.account_name.as_str()).collect();
        assert_eq!(failed, vec!["b", "c"]);
        assert_eq!(failures[0].attempts, 1);
        assert!(matches!(failures[0].error.source, StoreError::Io { .. }));
        assert_eq!(failures[1].attempts, 3);
        assert_eq!(upgrader.attempts("a"), 1);
        assert_eq!(upgrader.archived(), None);
    }

    #[tokio::test]
    async fn test_zero_attempt_budget_still_tries_once() {
        let upgrader = Arc::new(MockUpgrader::new(accounts(&["alice"])));
        upgrader.script("alice", MockFailure::Always);
        let migration = Migration::new(upgrader.clone(), RetryPolicy::immediate(0));

        migration.run().await.unwrap_err();
        assert_eq!(upgrader.attempts("alice"), 1);
    }
}
