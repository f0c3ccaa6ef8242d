//! History store guard
//!
//! Serializes writers of the per-instrument "previous EMA" scalar. Price
//! history is append-only, so readers are allowed to skip the guard; the EMA
//! read-modify-write is not, since interleaved writers would lose updates.

use std::future::Future;
use tokio::sync::Mutex;
use tracing::trace;

/// Mutual exclusion over the shared indicator state.
///
/// Acquired before the guarded block runs and released when it finishes,
/// including on error and panic. Waiters are served in FIFO order. There is no
/// timeout: a waiter blocks until the holder finishes.
#[derive(Debug, Default)]
pub struct HistoryGuard {
    lock: Mutex<()>,
}

impl HistoryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while no other `execute` on this guard is running
    pub async fn execute<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _held = self.lock.lock().await;
        trace!("History guard acquired");
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HistoryStore, SqliteHistoryStore};
    use crate::types::Instrument;
    use persistence::Database;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Read the scalar, yield `pause` times, write it back incremented
    async fn increment(store: &SqliteHistoryStore, instrument: &Instrument, pause: u8) {
        let current = store.previous_ema(instrument).await.unwrap().unwrap_or(0.0);
        for _ in 0..pause {
            tokio::task::yield_now().await;
        }
        store
            .set_previous_ema(instrument, current + 1.0)
            .await
            .unwrap();
    }

    fn run_concurrent_increments(pauses: Vec<u8>) -> f64 {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async move {
            let db = Database::in_memory().await.unwrap();
            let store = Arc::new(SqliteHistoryStore::new(db.pool_clone()));
            let guard = Arc::new(HistoryGuard::new());
            let instrument = Instrument::new("PLTR");

            let mut handles = Vec::new();
            for pause in pauses {
                let store = store.clone();
                let guard = guard.clone();
                let instrument = instrument.clone();
                handles.push(tokio::spawn(async move {
                    guard
                        .execute(|| increment(&store, &instrument, pause))
                        .await;
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            store.previous_ema(&instrument).await.unwrap().unwrap_or(0.0)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_guard_loses_no_writes(pauses in proptest::collection::vec(0u8..8, 1..40)) {
            let expected = pauses.len() as f64;
            let total = run_concurrent_increments(pauses);
            prop_assert_eq!(total, expected);
        }
    }

    #[tokio::test]
    async fn test_guard_released_after_panic() {
        let guard = Arc::new(HistoryGuard::new());

        let panicking = guard.clone();
        let result = tokio::spawn(async move {
            panicking
                .execute(|| async {
                    let fail = true;
                    if fail {
                        panic!("writer failed mid-update");
                    }
                })
                .await
        })
        .await;
        assert!(result.is_err());

        let value = tokio::time::timeout(
            Duration::from_secs(1),
            guard.execute(|| async { 7 }),
        )
        .await
        .expect("guard should be free again");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_guard_returns_block_error() {
        let guard = HistoryGuard::new();
        let result: Result<(), String> = guard.execute(|| async { Err("boom".to_string()) }).await;
        assert_eq!(result, Err("boom".to_string()));

        let ok = guard.execute(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(ok, Ok(1));
    }
}
