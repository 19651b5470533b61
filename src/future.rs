//! One-shot resolution: the shared core, its [`Resolver`] capability and the
//! read-only [`Future`] view with `then`/`catch`/`done` chaining.
//!
//! # Examples
//!
//! ```
//! use future_out::{scheduler, Future, FutureState, Resolution};
//!
//! let future = Future::<i32, String>::new(|resolver| {
//!     resolver.accept(20).unwrap();
//! });
//! let doubled = future.then(|value| Ok(Resolution::Value(value * 2)));
//! assert_eq!(doubled.state(), FutureState::Pending);
//!
//! scheduler::drain();
//! assert_eq!(doubled.value(), Some(40));
//! ```
use std::cell::RefCell;
use std::fmt;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Interrupted, UnhandledRejection};
use crate::scheduler;
use crate::Promise;

/// Observable state of a [`Future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Accepted,
    Rejected,
}

impl FutureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FutureState::Pending => "pending",
            FutureState::Accepted => "accepted",
            FutureState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FutureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State as reported by a [`Resolver`], which still tells cancellation
/// apart from other rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl ResolverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverState::Pending => "pending",
            ResolverState::Accepted => "accepted",
            ResolverState::Rejected => "rejected",
            ResolverState::Cancelled => "cancelled",
        }
    }
}

/// Anything exposing a two-way continuation registration, i.e. a value that
/// settles later. Returning or resolving with one merges its outcome into
/// the chain.
pub trait Thenable<T, E> {
    fn subscribe(self: Box<Self>, on_accept: Box<dyn FnOnce(T)>, on_reject: Box<dyn FnOnce(E)>);
}

/// What a resolver is resolved with: a plain value, or a future-like value
/// whose outcome is adopted once it settles.
pub enum Resolution<T, E> {
    Value(T),
    Deferred(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn deferred<F>(thenable: F) -> Self
    where
        F: Thenable<T, E> + 'static,
    {
        Resolution::Deferred(Box::new(thenable))
    }
}

impl<T, E> From<Future<T, E>> for Resolution<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn from(future: Future<T, E>) -> Self {
        Resolution::Deferred(Box::new(future))
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Return type of `then`/`catch` callbacks. `Err` rejects the next link with
/// the error as-is.
pub type Outcome<T, E> = Result<Resolution<T, E>, E>;

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>)>;

struct Inner<T, E> {
    state: FutureState,
    value: Option<T>,
    error: Option<E>,
    reactions: Vec<Reaction<T, E>>,
    // resolver side: set by the first transition, never cleared
    locked: bool,
    cancelled: bool,
    handled: bool,
    wakers: Vec<Waker>,
    listening: bool,
    // live `Resolver` handles
    resolvers: usize,
    abandoned: bool,
}

impl<T: Clone, E: Clone> Inner<T, E> {
    fn outcome(&self) -> Option<Result<T, E>> {
        match self.state {
            FutureState::Pending => None,
            FutureState::Accepted => self.value.clone().map(Ok),
            FutureState::Rejected => self.error.clone().map(Err),
        }
    }
}

struct Core<T, E> {
    inner: RefCell<Inner<T, E>>,
}

impl<T, E> Core<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn new() -> Rc<Self> {
        Rc::new(Core {
            inner: RefCell::new(Inner {
                state: FutureState::Pending,
                value: None,
                error: None,
                reactions: Vec::new(),
                locked: false,
                cancelled: false,
                handled: false,
                wakers: Vec::new(),
                listening: false,
                resolvers: 0,
                abandoned: false,
            }),
        })
    }

    fn settled(result: Result<T, E>) -> Rc<Self> {
        let rejected = result.is_err();
        let core = Core::new();
        {
            let mut inner = core.inner.borrow_mut();
            inner.locked = true;
            match result {
                Ok(value) => {
                    inner.state = FutureState::Accepted;
                    inner.value = Some(value);
                }
                Err(error) => {
                    inner.state = FutureState::Rejected;
                    inner.error = Some(error);
                }
            }
        }
        if rejected {
            core.watch_unhandled();
        }
        core
    }

    fn lock(&self) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.locked {
            return Err(Error::AlreadyResolved);
        }
        inner.locked = true;
        Ok(())
    }

    /// Schedules delivery of `result` as one unit.
    fn settle(self: &Rc<Self>, result: Result<T, E>) {
        let core = self.clone();
        scheduler::schedule(move || core.deliver(result));
    }

    fn deliver(self: &Rc<Self>, result: Result<T, E>) {
        let (reactions, unobserved) = {
            let mut inner = self.inner.borrow_mut();
            match &result {
                Ok(value) => {
                    inner.state = FutureState::Accepted;
                    inner.value = Some(value.clone());
                }
                Err(error) => {
                    inner.state = FutureState::Rejected;
                    inner.error = Some(error.clone());
                }
            }
            log::debug!("core {:p} {}", Rc::as_ptr(self), inner.state);
            (std::mem::take(&mut inner.reactions), result.is_err() && !inner.handled)
        };
        if unobserved {
            self.watch_unhandled();
        }
        for reaction in reactions {
            reaction(result.clone());
        }
    }

    /// Adopts the outcome of `thenable` once it settles.
    fn follow(self: &Rc<Self>, thenable: Box<dyn Thenable<T, E>>) {
        let accepted = self.clone();
        let rejected = self.clone();
        thenable.subscribe(
            Box::new(move |value| accepted.settle(Ok(value))),
            Box::new(move |error| rejected.settle(Err(error))),
        );
    }

    fn subscribe(&self, reaction: Reaction<T, E>) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            inner.handled = true;
            match inner.outcome() {
                Some(outcome) => outcome,
                None => {
                    inner.reactions.push(reaction);
                    return;
                }
            }
        };
        scheduler::schedule(move || reaction(outcome));
    }

    /// Reports the rejection at the end of the drain unless something has
    /// subscribed by then.
    fn watch_unhandled(self: &Rc<Self>) {
        let core = self.clone();
        scheduler::defer_rejection_check(move || {
            let rejection = {
                let inner = core.inner.borrow();
                if inner.handled {
                    None
                } else {
                    inner.error.as_ref().map(UnhandledRejection::new)
                }
            };
            if let Some(rejection) = rejection {
                scheduler::report_unhandled(rejection);
            }
        });
    }
}

/// Capability to settle one [`Future`].
///
/// The first successful call among `accept`, `resolve`, `reject`, `cancel`
/// and `timeout` wins; every later call fails with
/// [`Error::AlreadyResolved`].
pub struct Resolver<T, E> {
    core: Rc<Core<T, E>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        self.core.inner.borrow_mut().resolvers += 1;
        Resolver {
            core: self.core.clone(),
        }
    }
}

impl<T, E> Drop for Resolver<T, E> {
    fn drop(&mut self) {
        let (wakers, handled) = {
            let Ok(mut inner) = self.core.inner.try_borrow_mut() else {
                return;
            };
            inner.resolvers -= 1;
            if inner.resolvers > 0 || inner.locked {
                return;
            }
            inner.abandoned = true;
            (std::mem::take(&mut inner.wakers), inner.handled)
        };
        if handled {
            log::warn!(
                "future {:p} abandoned: last resolver dropped before settling",
                Rc::as_ptr(&self.core)
            );
        } else {
            log::debug!("future {:p} abandoned", Rc::as_ptr(&self.core));
        }
        for waker in wakers {
            waker.wake()
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn new() -> Self {
        let core = Core::new();
        core.inner.borrow_mut().resolvers = 1;
        Resolver { core }
    }

    /// The future observing this resolver.
    pub fn future(&self) -> Future<T, E> {
        Future {
            core: self.core.clone(),
        }
    }

    pub fn accept(&self, value: T) -> Result<(), Error> {
        self.core.lock()?;
        self.core.settle(Ok(value));
        Ok(())
    }

    /// Accepts a plain value, or follows a future-like one until it settles.
    pub fn resolve<R>(&self, value: R) -> Result<(), Error>
    where
        R: Into<Resolution<T, E>>,
    {
        self.core.lock()?;
        match value.into() {
            Resolution::Value(value) => self.core.settle(Ok(value)),
            Resolution::Deferred(thenable) => self.core.follow(thenable),
        }
        Ok(())
    }

    pub fn reject(&self, error: E) -> Result<(), Error> {
        self.core.lock()?;
        self.core.settle(Err(error));
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), Error>
    where
        E: From<Interrupted>,
    {
        self.interrupt(Interrupted::Cancel)
    }

    pub fn timeout(&self) -> Result<(), Error>
    where
        E: From<Interrupted>,
    {
        self.interrupt(Interrupted::Timeout)
    }

    fn interrupt(&self, reason: Interrupted) -> Result<(), Error>
    where
        E: From<Interrupted>,
    {
        self.core.lock()?;
        self.core.inner.borrow_mut().cancelled = reason == Interrupted::Cancel;
        self.core.settle(Err(E::from(reason)));
        Ok(())
    }

    /// `true` once any transition has been requested.
    pub fn is_resolved(&self) -> bool {
        self.core.inner.borrow().locked
    }

    pub fn state(&self) -> ResolverState {
        let inner = self.core.inner.borrow();
        match inner.state {
            FutureState::Pending => ResolverState::Pending,
            FutureState::Accepted => ResolverState::Accepted,
            FutureState::Rejected if inner.cancelled => ResolverState::Cancelled,
            FutureState::Rejected => ResolverState::Rejected,
        }
    }

    /// Settles from a callback outcome: errors reject, future-likes are
    /// followed, anything else accepts.
    pub(crate) fn adopt(&self, outcome: Outcome<T, E>) {
        let result = match outcome {
            Ok(resolution) => self.resolve(resolution),
            Err(error) => self.reject(error),
        };
        if let Err(err) = result {
            log::debug!("dropping callback outcome: {}", err);
        }
    }
}

impl<T, E> Default for Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn default() -> Self {
        Resolver::new()
    }
}

impl<T, E> Promise for Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = T;
    type Error = E;
    type Waiter = Future<T, E>;

    fn pair() -> (Self, Future<T, E>) {
        let resolver = Resolver::new();
        let future = resolver.future();
        (resolver, future)
    }

    fn accept(&self, value: T) -> Result<(), Error> {
        Resolver::accept(self, value)
    }

    fn reject(&self, error: E) -> Result<(), Error> {
        Resolver::reject(self, error)
    }
}

impl<T, E> fmt::Debug for Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.state())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Read-only view of a value that arrives later.
///
/// Clones observe the same core. Every callback runs from the
/// [`scheduler`](crate::scheduler), never inside the call that registered it
/// or the call that resolved the core.
pub struct Future<T, E> {
    core: Rc<Core<T, E>>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Future {
            core: self.core.clone(),
        }
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Creates a future and hands its resolver to `initializer` right away.
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let resolver = Resolver::new();
        let future = resolver.future();
        initializer(resolver);
        future
    }

    /// A future already accepted with `value`.
    pub fn accepted(value: T) -> Self {
        Future {
            core: Core::settled(Ok(value)),
        }
    }

    /// A future already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        Future {
            core: Core::settled(Err(error)),
        }
    }

    pub fn state(&self) -> FutureState {
        self.core.inner.borrow().state
    }

    pub fn value(&self) -> Option<T> {
        self.core.inner.borrow().value.clone()
    }

    pub fn error(&self) -> Option<E> {
        self.core.inner.borrow().error.clone()
    }

    /// `true` when every resolver was dropped while the future was still
    /// unsettled. Such a future stays pending forever.
    pub fn is_abandoned(&self) -> bool {
        let inner = self.core.inner.borrow();
        inner.abandoned && inner.state == FutureState::Pending
    }

    /// Awaitable that, unlike awaiting the future itself, completes with
    /// [`Error::ResolverDropped`] once the future is abandoned.
    pub fn wait(&self) -> Wait<T, E> {
        Wait {
            future: self.clone(),
        }
    }

    /// Chains `on_accept`; rejections pass through untouched.
    pub fn then<U, F>(&self, on_accept: F) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
    {
        self.chain(on_accept, Err)
    }

    pub fn then_or_else<U, F, G>(&self, on_accept: F, on_reject: G) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
        G: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        self.chain(on_accept, on_reject)
    }

    /// Chains `on_reject`; accepted values pass through untouched.
    pub fn catch<G>(&self, on_reject: G) -> Future<T, E>
    where
        G: FnOnce(E) -> Outcome<T, E> + 'static,
    {
        self.chain(|value| Ok(Resolution::Value(value)), on_reject)
    }

    fn chain<U, F, G>(&self, on_accept: F, on_reject: G) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
        G: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        let resolver = Resolver::new();
        let next = resolver.future();
        self.core.subscribe(Box::new(move |result| {
            let outcome = match result {
                Ok(value) => on_accept(value),
                Err(error) => on_reject(error),
            };
            resolver.adopt(outcome);
        }));
        next
    }

    /// Terminates the chain with `on_accept`. A rejection, or an error
    /// returned by `on_accept`, goes to the unhandled-rejection hook.
    pub fn done<F>(&self, on_accept: F)
    where
        F: FnOnce(T) -> Result<(), E> + 'static,
    {
        self.done_or_else(on_accept, Err)
    }

    pub fn done_catch<G>(&self, on_reject: G)
    where
        G: FnOnce(E) -> Result<(), E> + 'static,
    {
        self.done_or_else(|_| Ok(()), on_reject)
    }

    pub fn done_or_else<F, G>(&self, on_accept: F, on_reject: G)
    where
        F: FnOnce(T) -> Result<(), E> + 'static,
        G: FnOnce(E) -> Result<(), E> + 'static,
    {
        self.core.subscribe(Box::new(move |result| {
            let outcome = match result {
                Ok(value) => on_accept(value),
                Err(error) => on_reject(error),
            };
            if let Err(error) = outcome {
                scheduler::report_unhandled(UnhandledRejection::new(&error));
            }
        }));
    }

    /// Counts the future as observed without registering a callback.
    pub(crate) fn mark_handled(&self) {
        self.core.inner.borrow_mut().handled = true;
    }
}

impl<T, E> Thenable<T, E> for Future<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn subscribe(self: Box<Self>, on_accept: Box<dyn FnOnce(T)>, on_reject: Box<dyn FnOnce(E)>) {
        self.core.subscribe(Box::new(move |result| match result {
            Ok(value) => on_accept(value),
            Err(error) => on_reject(error),
        }));
    }
}

fn wake_all<T, E>(core: &Weak<Core<T, E>>) {
    if let Some(core) = core.upgrade() {
        let wakers = std::mem::take(&mut core.inner.borrow_mut().wakers);
        for waker in wakers {
            waker.wake()
        }
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// `Ready(None)` once abandoned.
    fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Option<Result<T, E>>> {
        if !scheduler::is_draining() {
            scheduler::drain();
        }
        let register = {
            let mut inner = self.core.inner.borrow_mut();
            inner.handled = true;
            if let Some(outcome) = inner.outcome() {
                return Poll::Ready(Some(outcome));
            }
            if inner.abandoned {
                return Poll::Ready(None);
            }
            if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                inner.wakers.push(cx.waker().clone());
            }
            !std::mem::replace(&mut inner.listening, true)
        };
        if register {
            let core = Rc::downgrade(&self.core);
            self.core.subscribe(Box::new(move |_| wake_all(&core)));
        }
        Poll::Pending
    }
}

/// Awaiting drains the current thread's scheduler before checking the
/// state, so a future resolved on this thread always completes. An
/// abandoned future never completes; see [`Future::wait`].
impl<T, E> StdFuture for Future<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.poll_outcome(cx) {
            Poll::Ready(Some(outcome)) => Poll::Ready(outcome),
            Poll::Ready(None) => {
                log::warn!("awaiting an abandoned future");
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Returned by [`Future::wait`].
pub struct Wait<T, E> {
    future: Future<T, E>,
}

impl<T, E> StdFuture for Wait<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future
            .poll_outcome(cx)
            .map(|outcome| outcome.ok_or(Error::ResolverDropped))
    }
}

impl<T, E> fmt::Debug for Future<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.core.inner.borrow();
        f.debug_struct("Future")
            .field("state", &inner.state)
            .field("value", &inner.value)
            .field("error", &inner.error)
            .finish()
    }
}
