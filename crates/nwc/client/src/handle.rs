//! Observable request handle.
//!
//! The observable API variant returns immediately with a handle whose state
//! moves from `Loading` to exactly one terminal `Success` / `Failure`
//! snapshot. Cancellation aborts the background task and freezes the state;
//! an internal upper bound keeps an un-cancelled task from leaking forever.

use crate::error::{Failure, NwcResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound on a background request that is never awaited or cancelled.
pub const OBSERVABLE_DEADLINE: Duration = Duration::from_secs(600);

/// Snapshot of an in-flight request. Unlike a plain `Result`, this includes
/// the pre-terminal `Loading` state.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestState<T> {
    Loading,
    Success(T),
    Failure(Failure),
}

impl<T> RequestState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, RequestState::Loading)
    }
}

/// Handle to a request running in the background.
pub struct RequestHandle<T> {
    state_rx: watch::Receiver<RequestState<T>>,
    task: Option<JoinHandle<()>>,
    event_id: Option<String>,
    active: Arc<AtomicBool>,
}

impl<T: Clone + Send + Sync + 'static> RequestHandle<T> {
    /// Run `work` in the background, bounded by [`OBSERVABLE_DEADLINE`].
    pub(crate) fn spawn<F>(event_id: Option<String>, work: F) -> Self
    where
        F: Future<Output = NwcResult<T>> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(RequestState::Loading);
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);

        let task = tokio::spawn(async move {
            let state = match timeout(OBSERVABLE_DEADLINE, work).await {
                Ok(Ok(value)) => RequestState::Success(value),
                Ok(Err(failure)) => RequestState::Failure(failure),
                Err(_) => RequestState::Failure(Failure::timeout(format!(
                    "request exceeded the {OBSERVABLE_DEADLINE:?} background bound"
                ))),
            };
            // a handle cancelled between completion and store keeps Loading
            if flag.swap(false, Ordering::SeqCst) {
                let _ = state_tx.send(state);
            }
        });

        Self {
            state_rx,
            task: Some(task),
            event_id,
            active,
        }
    }

    /// A handle that failed before dispatch (e.g. the request event could
    /// not be built).
    pub(crate) fn failed(failure: Failure) -> Self {
        let (_state_tx, state_rx) = watch::channel(RequestState::Failure(failure));
        Self {
            state_rx,
            task: None,
            event_id: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The request event id, for diagnostic correlation with relay traffic.
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    /// Current state snapshot.
    pub fn state(&self) -> RequestState<T> {
        self.state_rx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Abort the background task. The protocol event may already have been
    /// sent; the stored state stays whatever it was.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(task) = &self.task {
                task.abort();
            }
        }
    }

    /// First non-`Loading` state, or `None` when `deadline` elapses first.
    pub async fn await_result_within(&mut self, deadline: Duration) -> Option<RequestState<T>> {
        timeout(deadline, self.await_result()).await.ok()
    }

    /// First non-`Loading` state, unbounded. After a cancellation the state
    /// may remain `Loading` forever; this returns the frozen snapshot.
    pub async fn await_result(&mut self) -> RequestState<T> {
        loop {
            let current = self.state_rx.borrow_and_update().clone();
            if !current.is_loading() {
                return current;
            }
            if self.state_rx.changed().await.is_err() {
                // task aborted while loading: the state is frozen
                return self.state_rx.borrow().clone();
            }
        }
    }

    /// Resolve to a `Result`, mapping an elapsed deadline to `Timeout`.
    pub async fn to_result(mut self, deadline: Duration) -> NwcResult<T> {
        match self.await_result_within(deadline).await {
            Some(RequestState::Success(value)) => Ok(value),
            Some(RequestState::Failure(failure)) => Err(failure),
            Some(RequestState::Loading) => Err(Failure::unknown("request cancelled")),
            None => Err(Failure::timeout(format!(
                "no terminal state within {deadline:?}"
            ))),
        }
    }
}
