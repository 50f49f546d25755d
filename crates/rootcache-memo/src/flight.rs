//! Single-flight computation
//!
//! [`SingleFlight`] runs a factory at most once per epoch. Every caller that
//! arrives while a flight is in the air awaits the same shared future and
//! receives a clone of the same outcome. Nothing is retained afterwards: once
//! the flight lands the slot is empty and the next call starts a new epoch.
//!
//! # Cancellation
//! Each caller brings its own [`CancellationToken`]. Cancelling it only ends
//! that caller's wait. When the last waiter of a flight leaves before it
//! lands, the flight is abandoned: its own token is cancelled, the future is
//! dropped, and the slot is cleared for the next epoch.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Outcome of waiting on a flight
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlightError<E> {
    /// This caller's wait was cancelled
    #[error("wait cancelled")]
    Cancelled,

    /// The shared computation failed
    #[error("{0}")]
    Failed(E),
}

type SharedFuture<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    epoch: u64,
    future: SharedFuture<T, E>,
    token: CancellationToken,
    waiters: usize,
}

struct Slot<T, E> {
    next_epoch: u64,
    current: Option<Flight<T, E>>,
}

/// Deduplicates concurrent computations of one value
pub struct SingleFlight<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an idle flight
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                next_epoch: 0,
                current: None,
            })),
        }
    }

    /// Await the current flight, starting one with `factory` if none is running
    ///
    /// `factory` receives the flight's own cancellation token, which fires
    /// only when the flight is abandoned. It is called with the slot locked
    /// and must only build the future, never await or re-enter this flight.
    ///
    /// # Errors
    /// - `FlightError::Cancelled` if `cancel` fires before the flight lands
    /// - `FlightError::Failed` with the shared error if the computation fails
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<T, FlightError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(FlightError::Cancelled);
        }

        let (epoch, future) = self.join_or_start(factory);
        let _waiter = Waiter {
            slot: &self.slot,
            epoch,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FlightError::Cancelled),
            outcome = future => outcome.map_err(FlightError::Failed),
        }
    }

    /// Blocking form of [`run`](Self::run)
    ///
    /// Parks the calling thread; must not be used from an async context.
    ///
    /// # Errors
    /// Same as [`run`](Self::run)
    pub fn run_blocking<F, Fut>(
        &self,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<T, FlightError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        futures::executor::block_on(self.run(cancel, factory))
    }

    /// Whether a flight is currently in the air
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot.lock().current.is_some()
    }

    /// Number of callers awaiting the current flight
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.slot.lock().current.as_ref().map_or(0, |f| f.waiters)
    }

    /// Number of epochs started so far
    #[must_use]
    pub fn epochs_started(&self) -> u64 {
        self.slot.lock().next_epoch
    }

    fn join_or_start<F, Fut>(&self, factory: F) -> (u64, SharedFuture<T, E>)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if let Some(flight) = slot.current.as_mut() {
            flight.waiters += 1;
            return (flight.epoch, flight.future.clone());
        }

        let epoch = slot.next_epoch;
        slot.next_epoch += 1;

        let token = CancellationToken::new();
        let landing = Landing {
            slot: Arc::downgrade(&self.slot),
            epoch,
        };
        let work = factory(token.clone());
        let future = async move {
            let _landing = landing;
            work.await
        }
        .boxed()
        .shared();

        trace!(epoch, "flight started");
        slot.current = Some(Flight {
            epoch,
            future: future.clone(),
            token,
            waiters: 1,
        });
        (epoch, future)
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("SingleFlight")
            .field("epochs_started", &slot.next_epoch)
            .field("running", &slot.current.as_ref().map(|c| c.epoch))
            .finish()
    }
}

/// Clears the slot when the flight's future finishes, unwinds or is dropped
struct Landing<T, E> {
    slot: Weak<Mutex<Slot<T, E>>>,
    epoch: u64,
}

impl<T, E> Drop for Landing<T, E> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.upgrade() else {
            return;
        };
        let landed = {
            let mut slot = slot.lock();
            if slot.current.as_ref().is_some_and(|f| f.epoch == self.epoch) {
                slot.current.take()
            } else {
                None
            }
        };
        if landed.is_some() {
            trace!(epoch = self.epoch, "flight landed");
        }
    }
}

/// One caller's membership in a flight
struct Waiter<'a, T, E> {
    slot: &'a Mutex<Slot<T, E>>,
    epoch: u64,
}

impl<T, E> Drop for Waiter<'_, T, E> {
    fn drop(&mut self) {
        let abandoned = {
            let mut slot = self.slot.lock();
            match slot.current.as_mut() {
                Some(flight) if flight.epoch == self.epoch => {
                    flight.waiters -= 1;
                    if flight.waiters == 0 {
                        slot.current.take()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        // Dropped outside the lock: the future's own Landing locks the slot.
        if let Some(flight) = abandoned {
            trace!(epoch = flight.epoch, "flight abandoned by every waiter");
            flight.token.cancel();
        }
    }
}
