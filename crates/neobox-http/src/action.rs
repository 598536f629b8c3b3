//! Typed Actions
//!
//! `Action<T>` is the consumer half of a one-shot result: block on it with
//! `get`, chain `then`/`on_error` callbacks, or `.await` it. The producer half
//! is a `Completer<T>`. `Action<()>` covers work without a result.
//!
//! No error travels through `T`. A failed action finishes without a value
//! and runs its error callback; HTTP callers look at `Response::status`.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use crate::promise::Promise;
use crate::HttpError;

/// Completion callback. It may take the value out of the slot.
pub type ThenCallback<T> = Box<dyn FnOnce(&mut Option<T>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Completed,
    Failed,
}

struct Slot<T> {
    state: SlotState,
    value: Option<T>,
    then: Option<ThenCallback<T>>,
}

struct Shared<T> {
    promise: Promise,
    slot: Mutex<Slot<T>>,
    /// Held while a late `then` has the value out of the slot. Always taken
    /// before `slot`.
    delivery: Mutex<()>,
}

impl<T> Shared<T> {
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_value(&self) -> Option<T> {
        let _delivery = self.delivery();
        self.slot().value.take()
    }
}

/// Create a connected producer/consumer pair
pub fn pending<T>() -> (Completer<T>, Action<T>) {
    let shared = Arc::new(Shared {
        promise: Promise::new(),
        slot: Mutex::new(Slot {
            state: SlotState::Pending,
            value: None,
            then: None,
        }),
        delivery: Mutex::new(()),
    });

    (
        Completer { shared: shared.clone(), done: false },
        Action { shared },
    )
}

/// Consumer half of a one-shot result
pub struct Action<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Action<T> {
    /// Run `work` on the blocking thread pool
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (completer, action) = pending();
        smol::unblock(move || completer.complete(work())).detach();
        action
    }

    /// An action that has already finished with `value`
    pub fn ready(value: T) -> Self {
        let (completer, action) = pending();
        completer.complete(value);
        action
    }

    pub fn is_finished(&self) -> bool {
        self.shared.promise.is_finished()
    }

    /// Block until finished and move the value out. Only the first call
    /// gets it.
    pub fn get(&self) -> Option<T> {
        self.shared.promise.wait_until_finished();
        self.shared.take_value()
    }

    /// Register the completion callback.
    ///
    /// If the action already completed, the callback runs right here on the
    /// calling thread, and concurrent `get` calls wait for it. Such a
    /// callback must not call `get` on the same action. A failed action
    /// never runs it.
    pub fn then<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&mut Option<T>) + Send + 'static,
    {
        let delivery = self.shared.delivery();
        let mut slot = self.shared.slot();

        match slot.state {
            SlotState::Pending => slot.then = Some(Box::new(callback)),
            SlotState::Failed => {}
            SlotState::Completed => {
                let mut value = slot.value.take();
                drop(slot);

                callback(&mut value);

                let mut slot = self.shared.slot();
                if slot.value.is_none() {
                    slot.value = value;
                }
            }
        }
        drop(delivery);

        self
    }

    /// Register the failure callback. Runs immediately if the action already
    /// failed.
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&HttpError) + Send + 'static,
    {
        self.shared.promise.set_error_callback(Box::new(callback));
        self
    }

    /// The failure reported by the producer, if any
    pub fn error(&self) -> Option<HttpError> {
        self.shared.promise.error()
    }

    /// Future resolving to the value, or `None` if the action failed or the
    /// value was already taken
    pub fn awaiter(&self) -> ActionAwaiter<T> {
        ActionAwaiter {
            shared: self.shared.clone(),
            resumed: false,
        }
    }
}

impl<T: Send + 'static> IntoFuture for Action<T> {
    type Output = Option<T>;
    type IntoFuture = ActionAwaiter<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.awaiter()
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("promise", &self.shared.promise)
            .finish()
    }
}

/// Producer half of a one-shot result
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
    done: bool,
}

impl<T> Completer<T> {
    /// Store `value`, run the completion callback, then finish.
    pub fn complete(mut self, value: T) {
        self.done = true;
        let mut value = Some(value);

        // A callback registered while another one runs is picked up on the
        // next pass instead of being lost.
        loop {
            let callback = {
                let mut slot = self.shared.slot();
                match slot.then.take() {
                    Some(callback) => callback,
                    None => {
                        slot.value = value;
                        slot.state = SlotState::Completed;
                        break;
                    }
                }
            };
            callback(&mut value);
        }

        self.shared.promise.notify_finished();
    }

    /// Report `err` to the error callback, then finish without a value.
    pub fn fail(mut self, err: HttpError) {
        self.done = true;
        self.finish_failed(&err);
    }

    /// Report a recoverable failure without giving up the value; the action
    /// still completes through [`Completer::complete`].
    pub fn report_error(&self, err: &HttpError) {
        self.shared.promise.report_error(err);
    }

    fn finish_failed(&self, err: &HttpError) {
        {
            let mut slot = self.shared.slot();
            slot.state = SlotState::Failed;
            slot.then = None;
        }
        self.shared.promise.report_error(err);
        self.shared.promise.notify_finished();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!("Completer dropped before finishing");
            self.finish_failed(&HttpError::Abandoned);
        }
    }
}

/// Suspension point for an `Action`
///
/// Dropping it while pending abandons the continuation; the producer still
/// finishes but resumes nobody.
pub struct ActionAwaiter<T> {
    shared: Arc<Shared<T>>,
    resumed: bool,
}

impl<T> ActionAwaiter<T> {
    /// True iff the action already finished
    pub fn is_ready(&self) -> bool {
        self.shared.promise.is_finished()
    }
}

impl<T> Future for ActionAwaiter<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.resumed {
            return Poll::Ready(None);
        }

        if self.shared.promise.register_continuation(cx.waker()) {
            return Poll::Pending;
        }

        self.resumed = true;
        Poll::Ready(self.shared.take_value())
    }
}

impl<T> Drop for ActionAwaiter<T> {
    fn drop(&mut self) {
        if !self.resumed {
            self.shared.promise.abandon();
        }
    }
}
