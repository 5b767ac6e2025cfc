//! # Data-layer collaborator contract.
//!
//! The persistence layer is external. The core only needs two reads from it:
//! row counts (prerequisites of conditional pipeline steps) and last-completion
//! dates (idempotency markers of the daily batch). It never writes.
//!
//! Implementations must be safe to call concurrently from several workflows and
//! must report a write-conflict as [`DataError::Conflict`], which the core
//! treats as a soft failure of the current cycle.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::error::TaskError;

/// Errors reported by a [`DataLayer`].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// A concurrent writer won; retrying on the next cycle is expected to succeed.
    #[error("write conflict on {dataset}")]
    Conflict {
        /// Dataset whose write conflicted.
        dataset: String,
    },

    /// Any other query failure.
    #[error("query on {dataset} failed: {error}")]
    Query {
        /// Dataset that was queried.
        dataset: String,
        /// Driver error text.
        error: String,
    },
}

impl From<DataError> for TaskError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::Conflict { dataset } => TaskError::Conflict { dataset },
            other => TaskError::Fail {
                error: other.to_string(),
            },
        }
    }
}

/// Read-only queries the schedulers issue against the persistence layer.
#[async_trait]
pub trait DataLayer: Send + Sync + 'static {
    /// Number of rows currently held by `dataset`.
    async fn row_count(&self, dataset: &str) -> Result<u64, DataError>;

    /// Calendar date of the latest successful load of `dataset`, if any.
    async fn last_completed(&self, dataset: &str) -> Result<Option<NaiveDate>, DataError>;
}

/// Last successful completion date of each of the two datasets that feed the
/// daily batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleMarker {
    /// Completion date of the first prerequisite dataset.
    pub first: NaiveDate,
    /// Completion date of the second prerequisite dataset.
    pub second: NaiveDate,
}

impl ScheduleMarker {
    /// True when both datasets were completed on `day`.
    pub fn completed_on(&self, day: NaiveDate) -> bool {
        self.first == day && self.second == day
    }

    /// Reads both markers; absent unless **both** datasets report a date.
    pub async fn read<D>(data: &D, datasets: &[String; 2]) -> Result<Option<Self>, DataError>
    where
        D: DataLayer + ?Sized,
    {
        let first = data.last_completed(&datasets[0]).await?;
        let second = data.last_completed(&datasets[1]).await?;
        Ok(first.zip(second).map(|(first, second)| Self { first, second }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryData;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_completed_on_requires_both() {
        let marker = ScheduleMarker {
            first: day(5),
            second: day(5),
        };
        assert!(marker.completed_on(day(5)));
        assert!(!ScheduleMarker { second: day(4), ..marker }.completed_on(day(5)));
        assert!(!ScheduleMarker { first: day(4), ..marker }.completed_on(day(5)));
    }

    #[tokio::test]
    async fn test_read_needs_both_dates() {
        let datasets = ["knrs_vivos".to_string(), "knrs_fx4pd".to_string()];
        let data = MemoryData::default();
        data.set_completed("knrs_vivos", day(5));
        assert_eq!(ScheduleMarker::read(&data, &datasets).await.unwrap(), None);

        data.set_completed("knrs_fx4pd", day(4));
        assert_eq!(
            ScheduleMarker::read(&data, &datasets).await.unwrap(),
            Some(ScheduleMarker {
                first: day(5),
                second: day(4)
            })
        );
    }

    #[test]
    fn test_conflict_maps_to_soft_task_error() {
        let err: TaskError = DataError::Conflict {
            dataset: "linha_montagem".into(),
        }
        .into();
        assert_eq!(err.as_label(), "task_conflict");
        assert!(!err.is_fatal());
    }
}
