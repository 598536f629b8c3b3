//! Promise
//!
//! One-shot completion flag shared between a producer and its consumer. The
//! consumer either blocks on the condition variable or leaves a `Waker`
//! behind to be resumed when the producer finishes.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::task::Waker;
use std::time::Duration;

use crate::HttpError;

/// Failure callback slot
pub type ErrorCallback = Box<dyn FnOnce(&HttpError) + Send>;

#[derive(Default)]
struct PromiseState {
    finished: bool,
    /// Single-consumer continuation
    continuation: Option<Waker>,
    on_error: Option<ErrorCallback>,
    error: Option<HttpError>,
}

/// Pending -> Finished, exactly once
pub struct Promise {
    state: Mutex<PromiseState>,
    finished_cv: Condvar,
}

impl Promise {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PromiseState::default()),
            finished_cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PromiseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking snapshot
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Block the calling thread until the producer finishes
    pub fn wait_until_finished(&self) {
        let guard = self.lock();
        let _guard = self.finished_cv
            .wait_while(guard, |state| !state.finished)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block for at most `timeout`. Returns whether the promise finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self.finished_cv
            .wait_timeout_while(guard, timeout, |state| !state.finished)
            .unwrap_or_else(PoisonError::into_inner);
        guard.finished
    }

    /// Mark finished, then resume the stored continuation and release any
    /// blocked waiters. Later calls are no-ops.
    pub fn notify_finished(&self) {
        let continuation = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state.continuation.take()
        };

        self.finished_cv.notify_all();

        if let Some(waker) = continuation {
            waker.wake();
        }
    }

    /// Store the continuation to resume on completion.
    ///
    /// Returns `false` if the promise already finished; the caller must then
    /// carry on instead of suspending.
    pub fn register_continuation(&self, waker: &Waker) -> bool {
        let mut state = self.lock();
        if state.finished {
            return false;
        }

        if !state.continuation.as_ref().is_some_and(|current| current.will_wake(waker)) {
            state.continuation = Some(waker.clone());
        }
        true
    }

    /// Forget the stored continuation. The producer still finishes, but
    /// nobody is resumed.
    pub fn abandon(&self) {
        self.lock().continuation = None;
    }

    /// Register the failure callback. Fires immediately when an error was
    /// already reported.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        let mut state = self.lock();
        match state.error.clone() {
            Some(err) => {
                drop(state);
                callback(&err);
            }
            None => state.on_error = Some(callback),
        }
    }

    /// Record a failure and run the failure callback. Producers call this
    /// before `notify_finished`.
    pub fn report_error(&self, err: &HttpError) {
        let callback = {
            let mut state = self.lock();
            state.error = Some(err.clone());
            state.on_error.take()
        };

        if let Some(callback) = callback {
            callback(err);
        }
    }

    /// The reported failure, if any
    pub fn error(&self) -> Option<HttpError> {
        self.lock().error.clone()
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Promise")
            .field("finished", &state.finished)
            .field("suspended", &state.continuation.is_some())
            .field("error", &state.error)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;
    use std::thread;

    /// Waker that counts how often it was woken
    pub(crate) struct CountingWaker(pub AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        (counter.clone(), Waker::from(counter))
    }

    #[test]
    fn test_wait_across_threads() {
        let promise = Arc::new(Promise::new());
        assert!(!promise.is_finished());

        let producer = {
            let promise = promise.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                promise.notify_finished();
            })
        };

        promise.wait_until_finished();
        assert!(promise.is_finished());
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_returns_when_already_finished() {
        let promise = Promise::new();
        promise.notify_finished();
        promise.wait_until_finished();
        assert!(promise.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let promise = Promise::new();
        assert!(!promise.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_continuation_resumed_once() {
        let promise = Promise::new();
        let (counter, waker) = counting_waker();

        assert!(promise.register_continuation(&waker));
        promise.notify_finished();
        promise.notify_finished();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_after_finish_refused() {
        let promise = Promise::new();
        let (counter, waker) = counting_waker();

        promise.notify_finished();
        assert!(!promise.register_continuation(&waker));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_abandoned_continuation_not_resumed() {
        let promise = Promise::new();
        let (counter, waker) = counting_waker();

        promise.register_continuation(&waker);
        promise.abandon();
        promise.notify_finished();

        assert!(promise.is_finished());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_callback_before_and_after() {
        let promise = Promise::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let early = hits.clone();
        promise.set_error_callback(Box::new(move |err| {
            assert_eq!(*err, HttpError::Timeout);
            early.fetch_add(1, Ordering::SeqCst);
        }));
        promise.report_error(&HttpError::Timeout);
        promise.notify_finished();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Late registration observes the stored error right away
        let late = hits.clone();
        promise.set_error_callback(Box::new(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(promise.error(), Some(HttpError::Timeout));
    }
}
