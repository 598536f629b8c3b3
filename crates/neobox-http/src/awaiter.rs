//! Request Awaiter
//!
//! Binds one in-flight request to one suspension point. The request side
//! implements [`AwaitTarget`]; the waiting side holds an [`HttpAwaiter`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::Response;

/// Something an [`HttpAwaiter`] can suspend on
pub trait AwaitTarget<R>: Send + Sync {
    /// Whether the result is already available
    fn is_finished(&self) -> bool;

    /// Register `continuation` to be woken on completion, or drop the
    /// registration with `None`.
    ///
    /// Returns `false` when the target finished in the meantime and nothing
    /// was registered.
    fn suspend(&self, continuation: Option<Waker>) -> bool;

    /// The result, owned by the target
    fn result(&self) -> Option<Arc<R>>;
}

/// Awaitable bound to an in-flight request
///
/// Resolves to the target's result. An awaiter without a target (the request
/// could not be started) resolves to `None` right away. Dropping an awaiter
/// that is still waiting unregisters it, so the request runs on without
/// resuming anyone.
pub struct HttpAwaiter<R = Response> {
    target: Option<Arc<dyn AwaitTarget<R>>>,
    finished: bool,
}

impl<R> HttpAwaiter<R> {
    pub fn new(target: Arc<dyn AwaitTarget<R>>) -> Self {
        Self { target: Some(target), finished: false }
    }

    /// Awaiter that resolves to `None` immediately
    pub fn detached() -> Self {
        Self { target: None, finished: false }
    }

    /// True iff awaiting would not suspend
    pub fn ready(&self) -> bool {
        self.target.as_ref().is_none_or(|target| target.is_finished())
    }

    /// Block the calling thread until the request finishes
    pub fn wait(self) -> Option<Arc<R>> {
        smol::block_on(self)
    }
}

impl<R> Future for HttpAwaiter<R> {
    type Output = Option<Arc<R>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(target) = self.target.clone() else {
            self.finished = true;
            return Poll::Ready(None);
        };

        if !target.is_finished() && target.suspend(Some(cx.waker().clone())) {
            return Poll::Pending;
        }

        self.finished = true;
        Poll::Ready(target.result())
    }
}

impl<R> Drop for HttpAwaiter<R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if let Some(target) = &self.target {
            target.suspend(None);
        }
    }
}

impl<R> fmt::Debug for HttpAwaiter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAwaiter")
            .field("bound", &self.target.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::tests::counting_waker;
    use crate::promise::Promise;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    struct FakeRequest {
        promise: Promise,
        result: Mutex<Option<Arc<String>>>,
    }

    impl FakeRequest {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                promise: Promise::new(),
                result: Mutex::new(None),
            })
        }

        fn finish(&self, text: &str) {
            *self.result.lock().unwrap() = Some(Arc::new(text.to_string()));
            self.promise.notify_finished();
        }
    }

    impl AwaitTarget<String> for FakeRequest {
        fn is_finished(&self) -> bool {
            self.promise.is_finished()
        }

        fn suspend(&self, continuation: Option<Waker>) -> bool {
            match continuation {
                Some(waker) => self.promise.register_continuation(&waker),
                None => {
                    self.promise.abandon();
                    false
                }
            }
        }

        fn result(&self) -> Option<Arc<String>> {
            self.result.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_ready_when_finished() {
        let request = FakeRequest::new();
        request.finish("body");

        let awaiter: HttpAwaiter<String> = HttpAwaiter::new(request);
        assert!(awaiter.ready());
        assert_eq!(awaiter.wait().as_deref().map(String::as_str), Some("body"));
    }

    #[test]
    fn test_detached_resolves_to_none() {
        let awaiter: HttpAwaiter<String> = HttpAwaiter::detached();
        assert!(awaiter.ready());
        assert!(awaiter.wait().is_none());
    }

    #[test]
    fn test_resumed_on_completion() {
        let request = FakeRequest::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut awaiter: HttpAwaiter<String> = HttpAwaiter::new(request.clone());
        assert!(Pin::new(&mut awaiter).poll(&mut cx).is_pending());

        request.finish("late");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        match Pin::new(&mut awaiter).poll(&mut cx) {
            Poll::Ready(Some(text)) => assert_eq!(*text, "late"),
            other => panic!("unexpected poll result: {:?}", other),
        }
    }

    #[test]
    fn test_drop_before_resume_abandons() {
        let request = FakeRequest::new();
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut awaiter: HttpAwaiter<String> = HttpAwaiter::new(request.clone());
        assert!(Pin::new(&mut awaiter).poll(&mut cx).is_pending());
        drop(awaiter);

        request.finish("nobody listens");
        assert!(request.is_finished());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
