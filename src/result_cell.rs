//! # Result Cell
//!
//! Single-assignment container that bridges "fire into a queue" and "await a
//! result". The consumer thread is the only writer; any number of clones may
//! wait on it.
//!
//! ```text
//! Pending ──fulfill/fail──► Done(outcome) ──take──► Taken
//! ```
//!
//! A cell can be observed three ways:
//! - blocking with a deadline: [`ResultCell::wait_timeout`] (clones the value)
//!   or [`ResultCell::take_timeout`] (moves it out)
//! - a continuation: [`ResultCell::on_complete`] (gets its own copy)
//! - as a `Future`: `cell.await` moves the value out

use std::any::type_name;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::error;

use crate::error::MediatorError;

type Outcome<T> = Result<T, MediatorError>;
/// A continuation already bound to its own copy of the outcome.
type Bound = Box<dyn FnOnce() + Send>;
/// Binds a registered continuation to the outcome. Called under the state
/// lock; it only clones the outcome.
type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) -> Bound + Send>;

enum State<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        wakers: Vec<Waker>,
    },
    Done(Outcome<T>),
    Taken,
}

struct Inner<T> {
    /// Type name used in timeout errors
    label: &'static str,
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Future/promise fulfilled exactly once with a value or a [`MediatorError`].
pub struct ResultCell<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResultCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ResultCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending { .. } => "pending",
            State::Done(outcome) if outcome.is_ok() => "fulfilled",
            State::Done(_) => "failed",
            State::Taken => "taken",
        };
        f.debug_struct("ResultCell")
            .field("label", &self.inner.label)
            .field("state", &state)
            .finish()
    }
}

impl<T: Send + 'static> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ResultCell<T> {
    /// A pending cell labelled with the value's type name.
    #[must_use]
    pub fn new() -> Self {
        Self::labelled(type_name::<T>())
    }

    /// A pending cell whose timeout errors name `label`.
    #[must_use]
    pub fn labelled(label: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                state: Mutex::new(State::Pending {
                    continuations: Vec::new(),
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// A cell that is already failed.
    #[must_use]
    pub fn failed(label: &'static str, error: MediatorError) -> Self {
        let cell = Self::labelled(label);
        cell.fail(error);
        cell
    }

    /// Fulfil with a value. Returns `false` if the cell was already completed.
    pub fn fulfill(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Fail with an error. Returns `false` if the cell was already completed.
    pub fn fail(&self, error: MediatorError) -> bool {
        self.complete(Err(error))
    }

    /// Complete with an outcome. Only the first completion takes effect.
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        let (ready, wakers) = {
            let mut state = self.inner.state.lock();
            if !matches!(&*state, State::Pending { .. }) {
                return false;
            }
            let State::Pending {
                continuations,
                wakers,
            } = std::mem::replace(&mut *state, State::Done(outcome))
            else {
                return false;
            };
            let ready: Vec<Bound> = match &*state {
                State::Done(outcome) => continuations
                    .into_iter()
                    .map(|bind| bind(outcome))
                    .collect(),
                _ => Vec::new(),
            };
            (ready, wakers)
        };

        self.inner.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for continuation in ready {
            run_continuation(self.inner.label, continuation);
        }
        true
    }

    /// `true` once fulfilled or failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(&*self.inner.state.lock(), State::Pending { .. })
    }

    /// Register a continuation that receives its own copy of the outcome.
    ///
    /// Runs on the completing thread, or immediately on the calling thread if
    /// the cell is already complete. Never runs if the value was already taken.
    /// Takers never wait for continuations to finish.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
        T: Clone,
    {
        let ready = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending { continuations, .. } => {
                    continuations.push(Box::new(move |outcome: &Outcome<T>| {
                        let outcome = outcome.clone();
                        Box::new(move || continuation(outcome)) as Bound
                    }));
                    return;
                }
                State::Done(outcome) => {
                    let outcome = outcome.clone();
                    Box::new(move || continuation(outcome)) as Bound
                }
                State::Taken => return,
            }
        };
        run_continuation(self.inner.label, ready);
    }

    /// Wait up to `timeout` and return a copy of the outcome.
    ///
    /// # Errors
    ///
    /// The stored failure, or [`MediatorError::Timeout`] if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome<T>
    where
        T: Clone,
    {
        let mut state = self.wait_until_done(timeout)?;
        match &mut *state {
            State::Done(outcome) => outcome.clone(),
            _ => Err(self.taken_error()),
        }
    }

    /// Wait up to `timeout` and move the value out of the cell.
    ///
    /// Other clones observe the cell as taken afterwards.
    ///
    /// # Errors
    ///
    /// The stored failure, or [`MediatorError::Timeout`] if still pending.
    pub fn take_timeout(self, timeout: Duration) -> Outcome<T> {
        let mut state = self.wait_until_done(timeout)?;
        self.try_take(&mut state)
            .unwrap_or_else(|| Err(self.timeout_error(timeout)))
    }

    /// The outcome if complete, without waiting.
    #[must_use]
    pub fn try_get(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        match &*self.inner.state.lock() {
            State::Pending { .. } => None,
            State::Done(outcome) => Some(outcome.clone()),
            State::Taken => Some(Err(self.taken_error())),
        }
    }

    fn wait_until_done(&self, timeout: Duration) -> Result<MutexGuard<'_, State<T>>, MediatorError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while matches!(&*state, State::Pending { .. }) {
            if self.inner.ready.wait_until(&mut state, deadline).timed_out()
                && matches!(&*state, State::Pending { .. })
            {
                return Err(self.timeout_error(timeout));
            }
        }
        Ok(state)
    }

    /// `None` while still pending.
    fn try_take(&self, state: &mut State<T>) -> Option<Outcome<T>> {
        match std::mem::replace(state, State::Taken) {
            State::Done(outcome) => Some(outcome),
            State::Taken => Some(Err(self.taken_error())),
            pending @ State::Pending { .. } => {
                *state = pending;
                None
            }
        }
    }

    fn timeout_error(&self, waited: Duration) -> MediatorError {
        MediatorError::Timeout {
            request_type: self.inner.label,
            waited,
        }
    }

    fn taken_error(&self) -> MediatorError {
        MediatorError::Internal(format!(
            "result for '{}' was already taken",
            self.inner.label
        ))
    }
}

fn run_continuation(label: &'static str, continuation: Bound) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(continuation)) {
        error!(
            label = %label,
            panic_message = ?panic,
            "Result continuation panicked"
        );
    }
}

impl<T: Send + 'static> Future for ResultCell<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = self.try_take(&mut state) {
            return Poll::Ready(outcome);
        }
        if let State::Pending { wakers, .. } = &mut *state {
            if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
        }
        Poll::Pending
    }
}
