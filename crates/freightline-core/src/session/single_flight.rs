//! At most one running instance of an async operation, with every concurrent
//! caller sharing its result.
//!
//! The operation runs as a spawned task, so it finishes (and the slot is
//! released) even when every caller waiting on it is dropped. The slot is
//! released before any caller observes the result.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

type SharedOutput<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    id: u64,
    output: SharedOutput<T, E>,
}

struct State<T, E> {
    slot: Mutex<Option<Flight<T, E>>>,
    next_id: AtomicU64,
    waiters: AtomicUsize,
}

impl<T, E> State<T, E> {
    fn lock(&self) -> MutexGuard<'_, Option<Flight<T, E>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SingleFlight<T, E> {
    state: Arc<State<T, E>>,
}

impl<T, E> Clone for SingleFlight<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            state: Arc::new(State {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(0),
                waiters: AtomicUsize::new(0),
            }),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Callers currently waiting on a result.
    pub fn waiters(&self) -> usize {
        self.state.waiters.load(Ordering::SeqCst)
    }

    /// Join the running operation, or start one from `start`.
    ///
    /// `start` is called with the slot locked and must only build the
    /// future, not poll it or touch this `SingleFlight`.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let output = self.join_or_start(start);
        let _waiting = Waiting::new(&self.state);
        output.await
    }

    fn join_or_start<F, Fut>(&self, start: F) -> SharedOutput<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut slot = self.state.lock();
        if let Some(flight) = slot.as_ref() {
            return flight.output.clone();
        }

        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let landing = Landing {
            state: Arc::clone(&self.state),
            id,
        };
        let operation = start();
        // The task cannot release the slot before we fill it: `Landing`
        // takes the same lock we are holding.
        let handle = tokio::spawn(async move {
            let _landing = landing;
            operation.await
        });
        let output = async move { handle.await.unwrap_or_else(|e| Err(E::from(e))) }
            .boxed()
            .shared();

        *slot = Some(Flight {
            id,
            output: output.clone(),
        });
        output
    }
}

/// Releases the slot when the task finishes, panics or is cancelled.
struct Landing<T, E> {
    state: Arc<State<T, E>>,
    id: u64,
}

impl<T, E> Drop for Landing<T, E> {
    fn drop(&mut self) {
        let mut slot = self.state.lock();
        if slot.as_ref().map(|flight| flight.id) == Some(self.id) {
            *slot = None;
        }
    }
}

struct Waiting<'a, T, E> {
    state: &'a State<T, E>,
}

impl<'a, T, E> Waiting<'a, T, E> {
    fn new(state: &'a State<T, E>) -> Self {
        state.waiters.fetch_add(1, Ordering::SeqCst);
        Self { state }
    }
}

impl<T, E> Drop for Waiting<'_, T, E> {
    fn drop(&mut self) {
        self.state.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Failed,
        Aborted,
    }

    impl From<JoinError> for TestError {
        fn from(_: JoinError) -> Self {
            TestError::Aborted
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight: SingleFlight<u32, TestError> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let call = || {
            let runs = Arc::clone(&runs);
            flight.run(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(7)
            })
        };

        let (a, b, c) = tokio::join!(call(), call(), call());
        assert_eq!((a, b, c), (Ok(7), Ok(7), Ok(7)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.in_flight());
        assert_eq!(flight.waiters(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flight: SingleFlight<u32, TestError> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let runs = Arc::clone(&runs);
            let result = flight
                .run(move || async move { Ok(runs.fetch_add(1, Ordering::SeqCst) as u32 + 1) })
                .await;
            assert_eq!(result, Ok(expected));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_is_shared_and_slot_released() {
        let flight: SingleFlight<u32, TestError> = SingleFlight::new();

        let call = || {
            flight.run(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(TestError::Failed)
            })
        };
        let (a, b) = tokio::join!(call(), call());
        assert_eq!(a, Err(TestError::Failed));
        assert_eq!(b, Err(TestError::Failed));
        assert!(!flight.in_flight());
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_slot() {
        let flight: SingleFlight<u32, TestError> = SingleFlight::new();

        let result = flight
            .run(|| async {
                if true {
                    panic!("operation blew up");
                }
                Ok(1)
            })
            .await;
        assert_eq!(result, Err(TestError::Aborted));
        assert!(!flight.in_flight());

        let result = flight.run(|| async { Ok(2) }).await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_operation_completes_when_caller_is_dropped() {
        let flight: SingleFlight<u32, TestError> = SingleFlight::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let caller = flight.run(move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        // Start the flight, then abandon the caller
        let _ = tokio::time::timeout(Duration::from_millis(1), caller).await;
        assert!(flight.in_flight());
        assert_eq!(flight.waiters(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!flight.in_flight());
    }
}
