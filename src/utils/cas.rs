use std::future::Future;

use super::retry::{retry_on_transient, IsTransient, RetryConfig, RetryResult};

// ============================================================================
// Compare-and-Swap Retry Helper
// ============================================================================
//
// One attempt = read the record, derive its next revision, then write it
// conditionally on the version that was read. A lost race (the store reports
// the condition did not hold) or a storage error is retried with backoff;
// a missing record is not.
//
// Both stock decrements and stock restores go through here.
//
// ============================================================================

/// Records that carry an optimistic lock token.
pub trait Versioned {
    fn version(&self) -> i64;
}

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("Version {expected} is no longer current")]
    Conflict { expected: i64 },

    #[error("Record not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl IsTransient for CasError {
    fn is_transient(&self) -> bool {
        !matches!(self, CasError::NotFound)
    }
}

/// Read-mutate-conditional-write loop.
///
/// - `read` loads the current record (`None` when it does not exist)
/// - `mutate` builds the next revision from the current one
/// - `write` stores the revision if the record is still at the given version,
///   returning whether it was applied
pub async fn compare_and_swap<T, R, RFut, M, W, WFut>(
    config: RetryConfig,
    read: R,
    mutate: M,
    write: W,
) -> RetryResult<T, CasError>
where
    T: Versioned + Clone,
    R: Fn() -> RFut,
    RFut: Future<Output = anyhow::Result<Option<T>>>,
    M: Fn(&T) -> T,
    W: Fn(T, i64) -> WFut,
    WFut: Future<Output = anyhow::Result<bool>>,
{
    let (read, mutate, write) = (&read, &mutate, &write);

    retry_on_transient(config, move |attempt| async move {
        let current = read().await?.ok_or(CasError::NotFound)?;
        let expected = current.version();
        let next = mutate(&current);

        if write(next.clone(), expected).await? {
            Ok(next)
        } else {
            tracing::debug!(attempt = attempt, expected_version = expected, "Conditional write lost the race");
            Err(CasError::Conflict { expected })
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: i64,
        version: i64,
    }

    impl Versioned for Counter {
        fn version(&self) -> i64 {
            self.version
        }
    }

    /// Single versioned cell; `races` makes the next N writes lose to a
    /// phantom concurrent writer.
    struct Cell {
        counter: Mutex<Option<Counter>>,
        races: AtomicU32,
        read_failures: AtomicU32,
    }

    impl Cell {
        fn new(counter: Option<Counter>) -> Self {
            Self {
                counter: Mutex::new(counter),
                races: AtomicU32::new(0),
                read_failures: AtomicU32::new(0),
            }
        }

        async fn read(&self) -> anyhow::Result<Option<Counter>> {
            if self.read_failures.load(Ordering::SeqCst) > 0 {
                self.read_failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connection reset");
            }
            Ok(self.counter.lock().unwrap().clone())
        }

        async fn write(&self, next: Counter, expected: i64) -> anyhow::Result<bool> {
            let mut guard = self.counter.lock().unwrap();
            let Some(current) = guard.as_mut() else {
                return Ok(false);
            };
            if self.races.load(Ordering::SeqCst) > 0 {
                self.races.fetch_sub(1, Ordering::SeqCst);
                current.version += 1;
                return Ok(false);
            }
            if current.version != expected {
                return Ok(false);
            }
            *current = next;
            Ok(true)
        }

        fn get(&self) -> Option<Counter> {
            self.counter.lock().unwrap().clone()
        }
    }

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig::fixed(max_attempts, Duration::from_millis(1))
    }

    fn bump(c: &Counter) -> Counter {
        Counter {
            value: c.value + 1,
            version: c.version + 1,
        }
    }

    async fn run(cell: &Cell, max_attempts: u32) -> RetryResult<Counter, CasError> {
        compare_and_swap(
            quick(max_attempts),
            move || cell.read(),
            bump,
            move |next, expected| cell.write(next, expected),
        )
        .await
    }

    #[tokio::test]
    async fn test_applies_on_first_attempt() {
        let cell = Cell::new(Some(Counter { value: 1, version: 1 }));

        let result = run(&cell, 3).await;

        assert_eq!(result.attempts(), 1);
        assert_eq!(cell.get(), Some(Counter { value: 2, version: 2 }));
    }

    #[tokio::test]
    async fn test_retries_after_lost_race() {
        let cell = Cell::new(Some(Counter { value: 0, version: 1 }));
        cell.races.store(2, Ordering::SeqCst);

        let result = run(&cell, 3).await;

        assert!(matches!(result, RetryResult::Success { attempts: 3, .. }));
        assert_eq!(cell.get().unwrap().value, 1);
    }

    #[tokio::test]
    async fn test_gives_up_when_races_persist() {
        let cell = Cell::new(Some(Counter { value: 0, version: 1 }));
        cell.races.store(10, Ordering::SeqCst);

        let result = run(&cell, 3).await;

        assert!(matches!(
            result,
            RetryResult::Failed { error: CasError::Conflict { .. }, attempts: 3 }
        ));
        assert_eq!(cell.get().unwrap().value, 0);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_retried() {
        let cell = Cell::new(None);

        let result = run(&cell, 3).await;

        assert!(matches!(
            result,
            RetryResult::PermanentFailure { error: CasError::NotFound, attempts: 1 }
        ));
    }

    #[tokio::test]
    async fn test_storage_errors_are_retried() {
        let cell = Cell::new(Some(Counter { value: 0, version: 4 }));
        cell.read_failures.store(1, Ordering::SeqCst);

        let result = run(&cell, 3).await;

        assert_eq!(result.attempts(), 2);
        assert_eq!(result.into_result().unwrap().version, 5);
    }
}
