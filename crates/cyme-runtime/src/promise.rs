//! Single-assignment result container shared by both backends.
//!
//! A [`Promise`] starts `Pending` and transitions exactly once, to either
//! `Success` or `Failure`. Reactions registered before the transition are
//! queued; reactions registered afterwards run immediately with the stored
//! result. Promises are single-threaded handles: clones share the same state
//! and must stay on the thread (or `LocalSet`) that created them.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::RuntimeError;

/// Lifecycle state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    /// Not yet resolved.
    Pending,
    /// Resolved with a value.
    Success,
    /// Resolved with an error.
    Failure,
}

type Reaction<V> = Box<dyn FnOnce(&V)>;

enum Slot<T, E> {
    Pending,
    Success(Rc<T>),
    Failure(Rc<E>),
}

impl<T, E> Clone for Slot<T, E> {
    fn clone(&self) -> Self {
        match self {
            Slot::Pending => Slot::Pending,
            Slot::Success(value) => Slot::Success(Rc::clone(value)),
            Slot::Failure(err) => Slot::Failure(Rc::clone(err)),
        }
    }
}

impl<T, E> Slot<T, E> {
    fn state(&self) -> PromiseState {
        match self {
            Slot::Pending => PromiseState::Pending,
            Slot::Success(_) => PromiseState::Success,
            Slot::Failure(_) => PromiseState::Failure,
        }
    }
}

/// Receiver of a linked upstream failure.
trait FailureSink<F> {
    fn force_failure(&self, err: &F);
}

impl<T, E, F> FailureSink<F> for Weak<RefCell<Inner<T, E>>>
where
    T: 'static,
    E: From<F> + 'static,
    F: Clone,
{
    fn force_failure(&self, err: &F) {
        if let Some(inner) = self.upgrade() {
            Promise { inner }.fail(E::from(err.clone()));
        }
    }
}

/// Type-erased view of an upstream promise.
trait Upstream {
    fn state(&self) -> PromiseState;
}

impl<T, E> Upstream for RefCell<Inner<T, E>> {
    fn state(&self) -> PromiseState {
        self.borrow().slot.state()
    }
}

struct Inner<T, E> {
    slot: Slot<T, E>,
    on_success: Vec<Reaction<T>>,
    on_failure: Vec<Reaction<E>>,
    downstream: Vec<Box<dyn FailureSink<E>>>,
    upstream: Option<Rc<dyn Upstream>>,
}

/// Handle to a single-assignment outcome.
pub struct Promise<T, E = RuntimeError> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("state", &inner.slot.state())
            .field("on_success", &inner.on_success.len())
            .field("on_failure", &inner.on_failure.len())
            .field("linked", &inner.upstream.is_some())
            .finish()
    }
}

impl<T: 'static, E: 'static> Default for Promise<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// Creates a pending promise.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slot: Slot::Pending,
                on_success: Vec::new(),
                on_failure: Vec::new(),
                downstream: Vec::new(),
                upstream: None,
            })),
        }
    }

    /// Creates a promise already resolved to `Success`.
    pub fn succeeded(value: T) -> Self {
        let promise = Self::new();
        promise.succeed(value);
        promise
    }

    /// Creates a promise already resolved to `Failure`.
    pub fn failed(err: E) -> Self {
        let promise = Self::new();
        promise.fail(err);
        promise
    }

    /// Creates a pending promise whose failure is forced by `upstream`.
    pub fn linked<U, F>(upstream: &Promise<U, F>) -> Self
    where
        U: 'static,
        F: Clone + 'static,
        E: From<F>,
    {
        let promise = Self::new();
        promise.link_failure(upstream);
        promise
    }

    /// Current state.
    pub fn state(&self) -> PromiseState {
        self.inner.borrow().slot.state()
    }

    /// Returns true while the promise has not been resolved.
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Returns true if a failure link to an upstream promise was recorded.
    pub fn has_upstream(&self) -> bool {
        self.inner.borrow().upstream.is_some()
    }

    /// State of the linked upstream promise, if any.
    pub fn upstream_state(&self) -> Option<PromiseState> {
        self.inner.borrow().upstream.as_ref().map(|up| up.state())
    }

    /// Resolves to `Success` and runs the success reactions in order.
    ///
    /// Returns false (and changes nothing) if the promise was already settled.
    pub fn succeed(&self, value: T) -> bool {
        let (value, reactions) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.slot, Slot::Pending) {
                debug!(state = ?inner.slot.state(), "ignoring success on settled promise");
                return false;
            }
            let value = Rc::new(value);
            inner.slot = Slot::Success(Rc::clone(&value));
            inner.on_failure.clear();
            inner.downstream.clear();
            (value, std::mem::take(&mut inner.on_success))
        };

        trace!(reactions = reactions.len(), "promise succeeded");
        for reaction in reactions {
            reaction(&value);
        }
        true
    }

    /// Resolves to `Failure`, runs the failure reactions in order, then
    /// forces every linked downstream promise to fail.
    ///
    /// Returns false (and changes nothing) if the promise was already settled.
    pub fn fail(&self, err: E) -> bool {
        let (err, reactions, downstream) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.slot, Slot::Pending) {
                debug!(state = ?inner.slot.state(), "ignoring failure on settled promise");
                return false;
            }
            let err = Rc::new(err);
            inner.slot = Slot::Failure(Rc::clone(&err));
            inner.on_success.clear();
            (
                err,
                std::mem::take(&mut inner.on_failure),
                std::mem::take(&mut inner.downstream),
            )
        };

        trace!(
            reactions = reactions.len(),
            linked = downstream.len(),
            "promise failed"
        );
        for reaction in reactions {
            reaction(&err);
        }
        for sink in downstream {
            sink.force_failure(&err);
        }
        true
    }

    /// Registers a success reaction.
    ///
    /// Runs immediately if the promise already succeeded; never runs if it
    /// already failed.
    pub fn on_success<R>(&self, reaction: R) -> &Self
    where
        R: FnOnce(&T) + 'static,
    {
        let slot = self.inner.borrow().slot.clone();
        match slot {
            Slot::Pending => self.inner.borrow_mut().on_success.push(Box::new(reaction)),
            Slot::Success(value) => reaction(&value),
            Slot::Failure(_) => {}
        }
        self
    }

    /// Registers a failure reaction.
    ///
    /// Runs immediately if the promise already failed; never runs if it
    /// already succeeded.
    pub fn on_failure<R>(&self, reaction: R) -> &Self
    where
        R: FnOnce(&E) + 'static,
    {
        let slot = self.inner.borrow().slot.clone();
        match slot {
            Slot::Pending => self.inner.borrow_mut().on_failure.push(Box::new(reaction)),
            Slot::Failure(err) => reaction(&err),
            Slot::Success(_) => {}
        }
        self
    }

    /// Records `upstream` as this promise's failure source.
    ///
    /// When `upstream` fails, this promise fails with the converted error,
    /// provided it is still pending. An upstream that has already failed
    /// forces the failure right away.
    pub fn link_failure<U, F>(&self, upstream: &Promise<U, F>) -> &Self
    where
        U: 'static,
        F: Clone + 'static,
        E: From<F>,
    {
        let source: Rc<dyn Upstream> = upstream.inner.clone();
        self.inner.borrow_mut().upstream = Some(source);

        let slot = upstream.inner.borrow().slot.clone();
        match slot {
            Slot::Pending => upstream
                .inner
                .borrow_mut()
                .downstream
                .push(Box::new(Rc::downgrade(&self.inner))),
            Slot::Failure(err) => {
                self.fail(E::from((*err).clone()));
            }
            Slot::Success(_) => {}
        }
        self
    }

    /// Maps a success into a new promise linked to this one's failure.
    pub fn then<U, M>(&self, map: M) -> Promise<U, E>
    where
        U: 'static,
        M: FnOnce(&T) -> U + 'static,
        E: Clone,
    {
        let next = Promise::<U, E>::linked(self);
        let target = next.clone();
        self.on_success(move |value| {
            target.succeed(map(value));
        });
        next
    }

    /// Like [`then`](Self::then), but the mapping itself may fail.
    pub fn try_then<U, M>(&self, map: M) -> Promise<U, E>
    where
        U: 'static,
        M: FnOnce(&T) -> Result<U, E> + 'static,
        E: Clone,
    {
        let next = Promise::<U, E>::linked(self);
        let target = next.clone();
        self.on_success(move |value| match map(value) {
            Ok(mapped) => {
                target.succeed(mapped);
            }
            Err(err) => {
                target.fail(err);
            }
        });
        next
    }

    /// Fails with `marker` once `deadline` elapses, unless already settled.
    ///
    /// The timer runs on the current tokio `LocalSet` and holds only a weak
    /// reference, so it never keeps the promise alive.
    pub fn with_deadline(&self, deadline: Duration, marker: E) -> &Self {
        let weak = Rc::downgrade(&self.inner);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(deadline).await;
            if let Some(inner) = weak.upgrade() {
                if (Promise { inner }).fail(marker) {
                    debug!(deadline_ms = deadline.as_millis(), "promise deadline expired");
                }
            }
        });
        self
    }

    /// Waits until the promise settles and returns the terminal state.
    ///
    /// Returns `Pending` only if every other handle was dropped without
    /// resolving it.
    pub async fn wait(&self) -> PromiseState {
        if self.is_pending() {
            let (tx, rx) = oneshot::channel::<()>();
            let on_success = Rc::new(Cell::new(Some(tx)));
            let on_failure = Rc::clone(&on_success);
            self.on_success(move |_| {
                if let Some(tx) = on_success.take() {
                    let _ = tx.send(());
                }
            });
            self.on_failure(move |_| {
                if let Some(tx) = on_failure.take() {
                    let _ = tx.send(());
                }
            });
            let _ = rx.await;
        }
        self.state()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Combines `promises` into one that succeeds with every value, in input
    /// order, or fails with the first failure.
    pub fn join(promises: Vec<Promise<T, E>>) -> Promise<Vec<T>, E> {
        let joined = Promise::new();
        if promises.is_empty() {
            joined.succeed(Vec::new());
            return joined;
        }

        let values: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; promises.len()]));
        let remaining = Rc::new(Cell::new(promises.len()));

        for (index, promise) in promises.iter().enumerate() {
            let failed = joined.clone();
            promise.on_failure(move |err| {
                failed.fail(err.clone());
            });

            let target = joined.clone();
            let values = Rc::clone(&values);
            let remaining = Rc::clone(&remaining);
            promise.on_success(move |value| {
                values.borrow_mut()[index] = Some(value.clone());
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let collected = values.borrow_mut().drain(..).flatten().collect();
                    target.succeed(collected);
                }
            });
        }
        joined
    }

    /// Clone of the stored outcome, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().slot {
            Slot::Pending => None,
            Slot::Success(value) => Some(Ok((**value).clone())),
            Slot::Failure(err) => Some(Err((**err).clone())),
        }
    }
}
