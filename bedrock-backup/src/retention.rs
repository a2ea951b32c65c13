//! Age, count and size limits over the backup store.
//!
//! Each enabled limit is its own pass over a fresh newest-first listing, so a
//! later pass sees the store as the earlier one left it.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

use crate::error::BackupError;
use crate::store::{BackupStore, StoredBackup};

/// Which limits apply. `None` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_count: Option<usize>,
    pub max_total_bytes: Option<u64>,
}

impl RetentionPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_age.is_none() && self.max_count.is_none() && self.max_total_bytes.is_none()
    }
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PruneReport {
    /// Archives removed, in deletion order.
    pub deleted: Vec<PathBuf>,
}

impl PruneReport {
    /// `true` if the store contents changed.
    pub fn changed(&self) -> bool {
        !self.deleted.is_empty()
    }
}

/// Apply `policy` to `store` as of `now`.
///
/// An absent store is not an error; there is simply nothing to prune.
pub fn prune(store: &BackupStore, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<PruneReport, BackupError> {
    let mut report = PruneReport::default();
    if !store.exists() || policy.is_unlimited() {
        return Ok(report);
    }

    if let Some(max_age) = policy.max_age {
        let expired: Vec<StoredBackup> = store
            .list()?
            .into_iter()
            .filter(|backup| {
                backup
                    .created_at
                    .checked_add_signed(max_age)
                    .is_some_and(|expires| expires < now)
            })
            .collect();
        delete_all(store, expired, "age", &mut report);
    }

    if let Some(max_count) = policy.max_count {
        let surplus: Vec<StoredBackup> = store.list()?.into_iter().skip(max_count).collect();
        delete_all(store, surplus, "count", &mut report);
    }

    if let Some(max_bytes) = policy.max_total_bytes {
        let mut total = 0u64;
        let oversize: Vec<StoredBackup> = store
            .list()?
            .into_iter()
            .skip_while(|backup| {
                total += backup.size;
                total <= max_bytes
            })
            .collect();
        delete_all(store, oversize, "size", &mut report);
    }

    if report.changed() {
        tracing::info!(deleted = report.deleted.len(), "pruned backup store");
    }
    Ok(report)
}

fn delete_all(store: &BackupStore, backups: Vec<StoredBackup>, limit: &str, report: &mut PruneReport) {
    for backup in backups {
        match store.delete(&backup) {
            Ok(()) => {
                tracing::debug!(path = %backup.path.display(), limit, "deleted backup");
                report.deleted.push(backup.path);
            }
            Err(err) => tracing::warn!(error = %err, limit, "could not delete backup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::archive_file_name;
    use chrono::TimeZone;
    use rstest::rstest;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Create archives `days_old` days before `now()`, each `size` bytes.
    fn store_with(days_old: &[(i64, usize)]) -> (TempDir, BackupStore) {
        let dir = TempDir::new().unwrap();
        for (days, size) in days_old {
            let name = archive_file_name(now() - Duration::days(*days));
            std::fs::write(dir.path().join(name), vec![0u8; *size]).unwrap();
        }
        let store = BackupStore::new(dir.path());
        (dir, store)
    }

    fn remaining_ages(store: &BackupStore) -> Vec<i64> {
        store
            .list()
            .unwrap()
            .iter()
            .map(|backup| (now() - backup.created_at).num_days())
            .collect()
    }

    #[test]
    fn age_limit_deletes_only_expired() {
        let (_dir, store) = store_with(&[(1, 1), (10, 1), (40, 1)]);
        let policy = RetentionPolicy {
            max_age: Some(Duration::days(28)),
            ..Default::default()
        };
        let report = prune(&store, &policy, now()).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(report.changed());
        assert_eq!(remaining_ages(&store), vec![1, 10]);
    }

    #[test]
    fn age_limit_past_the_calendar_never_expires() {
        let (_dir, store) = store_with(&[(1, 1), (4000, 1)]);
        let policy = RetentionPolicy {
            max_age: Some(Duration::days(100_000_000)),
            ..Default::default()
        };
        let report = prune(&store, &policy, now()).unwrap();
        assert!(!report.changed());
        assert_eq!(remaining_ages(&store), vec![1, 4000]);
    }

    #[test]
    fn count_limit_keeps_newest() {
        let (_dir, store) = store_with(&[(1, 1), (10, 1), (40, 1)]);
        let policy = RetentionPolicy {
            max_count: Some(2),
            ..Default::default()
        };
        prune(&store, &policy, now()).unwrap();
        assert_eq!(remaining_ages(&store), vec![1, 10]);
    }

    #[rstest]
    #[case::under_two_newest(150, vec![1])]
    #[case::fits_two(200, vec![1, 10])]
    #[case::everything(1_000, vec![1, 10, 40])]
    #[case::nothing_fits(50, vec![])]
    fn size_limit_cuts_at_crossing_file(#[case] max: u64, #[case] expected: Vec<i64>) {
        let (_dir, store) = store_with(&[(1, 100), (10, 100), (40, 100)]);
        let policy = RetentionPolicy {
            max_total_bytes: Some(max),
            ..Default::default()
        };
        prune(&store, &policy, now()).unwrap();
        assert_eq!(remaining_ages(&store), expected);
    }

    #[test]
    fn passes_compose() {
        let (_dir, store) = store_with(&[(1, 100), (2, 100), (3, 100), (40, 100)]);
        let policy = RetentionPolicy {
            max_age: Some(Duration::days(28)),
            max_count: Some(2),
            max_total_bytes: Some(150),
        };
        let report = prune(&store, &policy, now()).unwrap();
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(remaining_ages(&store), vec![1]);
    }

    #[test]
    fn unchanged_store_reports_no_change() {
        let (_dir, store) = store_with(&[(1, 1)]);
        let policy = RetentionPolicy {
            max_count: Some(5),
            ..Default::default()
        };
        assert!(!prune(&store, &policy, now()).unwrap().changed());
    }

    #[test]
    fn absent_store_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("gone"));
        let policy = RetentionPolicy {
            max_count: Some(1),
            ..Default::default()
        };
        assert!(prune(&store, &policy, now()).unwrap().deleted.is_empty());
    }
}
