//! Repeated resolution: a [`Cursor`] yields a sequence of values, one per
//! step, and settles [`Cursor::when_finished`] exactly once when the stream
//! finishes or fails.
//!
//! The producer side is a [`CursorResolver`]. It may `accept` a value while
//! the cursor is `pending`; the cursor then sits in `accepted` until the
//! consumer calls [`Cursor::advance`], which puts it back to `pending` and
//! runs the producer's [`CursorResolver::on_continue`] hook.
//!
//! ```
//! use future_out::{scheduler, Cursor};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let cursor = Cursor::<u32, String>::new(|resolver| {
//!     let mut rest = vec![2, 3].into_iter();
//!     resolver.on_continue(move |resolver| {
//!         let _ = match rest.next() {
//!             Some(value) => resolver.accept(value),
//!             None => resolver.finish(),
//!         };
//!     });
//!     resolver.accept(1).unwrap();
//! });
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! let finished = cursor.for_each(move |value| {
//!     sink.borrow_mut().push(value);
//!     Ok(())
//! });
//! scheduler::drain();
//! assert_eq!(*seen.borrow(), vec![1, 2, 3]);
//! assert_eq!(finished.value(), Some(()));
//! ```
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Interrupted, UnhandledRejection};
use crate::future::{Future, Resolution, Resolver};
use crate::scheduler;
use crate::Promise;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Pending,
    Accepted,
    Rejected,
    Finished,
}

impl CursorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorState::Pending => "pending",
            CursorState::Accepted => "accepted",
            CursorState::Rejected => "rejected",
            CursorState::Finished => "finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CursorState::Rejected | CursorState::Finished)
    }
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type EachCallback<T, E> = Box<dyn FnMut(T) -> Result<(), E>>;
type PullHook<T, E> = Box<dyn FnMut(&CursorResolver<T, E>)>;

struct Inner<T, E> {
    state: CursorState,
    value: Option<T>,
    error: Option<E>,
    // None once the cursor is terminal
    next: Option<Resolver<Option<T>, E>>,
    finished: Resolver<(), E>,
    // outcome for `finished`, held back while values are still being
    // delivered to `each` callbacks
    closing: Option<Result<(), E>>,
    in_flight: usize,
    // a future-like passed to `resolve` has not settled yet
    awaiting: bool,
    // an `each` callback failed; later deliveries are skipped
    failed: bool,
    each: Vec<EachCallback<T, E>>,
    on_continue: Option<PullHook<T, E>>,
}

type Shared<T, E> = Rc<RefCell<Inner<T, E>>>;

fn shared<T, E>() -> Shared<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    Rc::new(RefCell::new(Inner {
        state: CursorState::Pending,
        value: None,
        error: None,
        next: Some(step()),
        finished: Resolver::new(),
        closing: None,
        in_flight: 0,
        awaiting: false,
        failed: false,
        each: Vec::new(),
        on_continue: None,
    }))
}

fn step<T, E>() -> Resolver<Option<T>, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let resolver = Resolver::new();
    // termination is reported through `when_finished`
    resolver.future().mark_handled();
    resolver
}

fn ignore(result: Result<(), Error>, what: &str) {
    if let Err(err) = result {
        log::debug!("cursor {} ignored: {}", what, err);
    }
}

/// Consumer view of a value stream.
pub struct Cursor<T, E> {
    shared: Shared<T, E>,
}

impl<T, E> Clone for Cursor<T, E> {
    fn clone(&self) -> Self {
        Cursor {
            shared: self.shared.clone(),
        }
    }
}

/// Producer capability of a [`Cursor`].
pub struct CursorResolver<T, E> {
    shared: Shared<T, E>,
}

impl<T, E> Clone for CursorResolver<T, E> {
    fn clone(&self) -> Self {
        CursorResolver {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Cursor<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Creates a cursor and hands its producer capability to `initializer`.
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(CursorResolver<T, E>),
    {
        let (resolver, cursor) = CursorResolver::pair();
        initializer(resolver);
        cursor
    }

    pub fn state(&self) -> CursorState {
        self.shared.borrow().state
    }

    /// Most recently produced value; cleared once the cursor terminates.
    pub fn value(&self) -> Option<T> {
        self.shared.borrow().value.clone()
    }

    pub fn error(&self) -> Option<E> {
        self.shared.borrow().error.clone()
    }

    /// Future of the next step: accepted with `Some(value)` for a produced
    /// value, with `None` when the stream finishes. `None` once terminal.
    pub fn when_next(&self) -> Option<Future<Option<T>, E>> {
        self.shared.borrow().next.as_ref().map(Resolver::future)
    }

    /// Settles once: accepted when the stream finishes, rejected with the
    /// stream's error. Values produced before the end are delivered to the
    /// `each` callbacks first.
    pub fn when_finished(&self) -> Future<(), E> {
        self.shared.borrow().finished.future()
    }

    /// Lets the producer supply the next value. Valid only while
    /// `accepted`.
    pub fn advance(&self) -> Result<(), Error> {
        {
            let mut inner = self.shared.borrow_mut();
            if inner.state != CursorState::Accepted {
                return Err(Error::InvalidState {
                    expected: CursorState::Accepted.as_str(),
                    actual: inner.state.as_str(),
                });
            }
            inner.state = CursorState::Pending;
        }
        let shared = self.shared.clone();
        scheduler::schedule(move || pull(&shared));
        Ok(())
    }

    /// `advance()` followed by `when_next()`.
    pub fn next(&self) -> Result<Future<Option<T>, E>, Error> {
        self.advance()?;
        self.when_next().ok_or(Error::InvalidState {
            expected: CursorState::Pending.as_str(),
            actual: self.state().as_str(),
        })
    }

    /// Calls `callback` with every value not yet delivered. An `Err` from
    /// the callback rejects the cursor with that error. Callbacks registered
    /// once the cursor has terminated and delivered its last value are
    /// dropped.
    pub fn each<F>(&self, callback: F) -> Future<(), E>
    where
        F: FnMut(T) -> Result<(), E> + 'static,
    {
        let mut inner = self.shared.borrow_mut();
        if inner.state.is_terminal() && inner.in_flight == 0 {
            log::debug!("each callback added to a {} cursor", inner.state);
        } else {
            inner.each.push(Box::new(callback));
        }
        inner.finished.future()
    }

    /// Like [`each`](Cursor::each), advancing after every value so the
    /// whole stream is consumed.
    pub fn for_each<F>(&self, callback: F) -> Future<(), E>
    where
        F: FnMut(T) -> Result<(), E> + 'static,
    {
        let finished = self.each(callback);
        let cursor = Rc::downgrade(&self.shared);
        self.each(move |_| {
            advance_weak(&cursor);
            Ok(())
        });
        finished
    }
}

fn advance_weak<T, E>(cursor: &Weak<RefCell<Inner<T, E>>>)
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    if let Some(shared) = cursor.upgrade() {
        ignore(Cursor { shared }.advance(), "advance");
    }
}

impl<T, E> fmt::Debug for Cursor<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.borrow();
        f.debug_struct("Cursor")
            .field("state", &inner.state)
            .field("value", &inner.value)
            .field("error", &inner.error)
            .finish()
    }
}

/// Runs the producer hook after the consumer advanced.
fn pull<T, E>(shared: &Shared<T, E>)
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let hook = {
        let mut inner = shared.borrow_mut();
        if inner.state != CursorState::Pending {
            return;
        }
        inner.on_continue.take()
    };
    if let Some(mut hook) = hook {
        hook(&CursorResolver {
            shared: shared.clone(),
        });
        let mut inner = shared.borrow_mut();
        if inner.on_continue.is_none() && !inner.state.is_terminal() {
            inner.on_continue = Some(hook);
        }
    }
}

/// Delivers one produced value to the `each` callbacks. Stops at the first
/// failing callback; once one has failed, later values are not delivered.
fn deliver_each<T, E>(shared: &Shared<T, E>, value: T)
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let taken = {
        let mut inner = shared.borrow_mut();
        if inner.failed {
            None
        } else {
            Some(std::mem::take(&mut inner.each))
        }
    };
    let mut failure = None;
    if let Some(mut callbacks) = taken {
        for callback in callbacks.iter_mut() {
            if shared.borrow().failed {
                break;
            }
            if let Err(error) = callback(value.clone()) {
                failure = Some(error);
                break;
            }
        }
        let mut inner = shared.borrow_mut();
        callbacks.append(&mut inner.each);
        inner.each = callbacks;
    }
    shared.borrow_mut().in_flight -= 1;
    if let Some(error) = failure {
        fail(shared, error);
    }
    release(shared);
}

/// Turns a callback error into the cursor's rejection. A finish still held
/// back by this delivery becomes the rejection; if the stream was already
/// rejected the error goes to the unhandled-rejection hook.
fn fail<T, E>(shared: &Shared<T, E>, error: E)
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let pending = {
        let mut inner = shared.borrow_mut();
        inner.failed = true;
        if inner.state == CursorState::Finished && inner.closing.is_some() {
            inner.state = CursorState::Rejected;
            inner.error = Some(error.clone());
            inner.closing = Some(Err(error));
            None
        } else {
            Some(error)
        }
    };
    if let Some(error) = pending {
        if terminate(shared, Err(error.clone())).is_err() {
            scheduler::report_unhandled(UnhandledRejection::new(&error));
        }
    }
}

/// Moves the cursor into its terminal state. `when_finished` settles once no
/// delivery is left in flight.
fn terminate<T, E>(shared: &Shared<T, E>, result: Result<(), E>) -> Result<(), Error>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let outgoing = {
        let mut inner = shared.borrow_mut();
        if inner.state.is_terminal() {
            return Err(Error::AlreadyResolved);
        }
        inner.value = None;
        inner.on_continue = None;
        match &result {
            Ok(()) => inner.state = CursorState::Finished,
            Err(error) => {
                inner.state = CursorState::Rejected;
                inner.error = Some(error.clone());
            }
        }
        inner.closing = Some(result.clone());
        inner.next.take()
    };
    match &result {
        Ok(()) => log::debug!("cursor {:p} finished", Rc::as_ptr(shared)),
        Err(error) => log::debug!("cursor {:p} rejected: {:?}", Rc::as_ptr(shared), error),
    }
    if let Some(resolver) = outgoing {
        let settled = match result {
            Ok(()) => resolver.accept(None),
            Err(error) => resolver.reject(error),
        };
        ignore(settled, "step");
    }
    release(shared);
    Ok(())
}

/// Settles `when_finished` with the held-back outcome once nothing is in
/// flight.
fn release<T, E>(shared: &Shared<T, E>)
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let settle = {
        let mut inner = shared.borrow_mut();
        if inner.in_flight > 0 {
            return;
        }
        let finished = inner.finished.clone();
        inner.closing.take().map(|result| (finished, result))
    };
    if let Some((finished, result)) = settle {
        let settled = match result {
            Ok(()) => finished.accept(()),
            Err(error) => finished.reject(error),
        };
        ignore(settled, "finish");
    }
}

impl<T, E> Promise for CursorResolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = T;
    type Error = E;
    type Waiter = Cursor<T, E>;

    fn pair() -> (Self, Cursor<T, E>) {
        let shared = shared();
        (
            CursorResolver {
                shared: shared.clone(),
            },
            Cursor { shared },
        )
    }

    fn accept(&self, value: T) -> Result<(), Error> {
        CursorResolver::accept(self, value)
    }

    fn reject(&self, error: E) -> Result<(), Error> {
        CursorResolver::reject(self, error)
    }
}

impl<T, E> CursorResolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn state(&self) -> CursorState {
        self.shared.borrow().state
    }

    /// Registers the hook run each time the consumer advances the cursor.
    pub fn on_continue<F>(&self, hook: F)
    where
        F: FnMut(&CursorResolver<T, E>) + 'static,
    {
        self.shared.borrow_mut().on_continue = Some(Box::new(hook));
    }

    fn ready(&self) -> Result<(), Error> {
        let inner = self.shared.borrow();
        match inner.state {
            CursorState::Pending if inner.awaiting => Err(Error::InvalidState {
                expected: CursorState::Pending.as_str(),
                actual: "resolving",
            }),
            CursorState::Pending => Ok(()),
            CursorState::Accepted => Err(Error::InvalidState {
                expected: CursorState::Pending.as_str(),
                actual: CursorState::Accepted.as_str(),
            }),
            CursorState::Rejected | CursorState::Finished => Err(Error::AlreadyResolved),
        }
    }

    /// Produces `value`. Valid only while the cursor is `pending`, which it
    /// is on creation and after every `advance()`.
    pub fn accept(&self, value: T) -> Result<(), Error> {
        self.ready()?;
        self.produce(value);
        Ok(())
    }

    fn produce(&self, value: T) {
        let outgoing = {
            let mut inner = self.shared.borrow_mut();
            inner.state = CursorState::Accepted;
            inner.value = Some(value.clone());
            inner.in_flight += 1;
            inner.next.replace(step())
        };
        log::trace!("cursor {:p} accepted a value", Rc::as_ptr(&self.shared));

        let shared = self.shared.clone();
        let delivered = value.clone();
        scheduler::schedule(move || deliver_each(&shared, delivered));
        if let Some(resolver) = outgoing {
            ignore(resolver.accept(Some(value)), "step");
        }
    }

    /// Produces a plain value, or the outcome of a future-like value once
    /// it settles. The step stays reserved until then: `accept`, `resolve`
    /// and `finish` fail with `InvalidState` in the meantime.
    pub fn resolve<R>(&self, value: R) -> Result<(), Error>
    where
        R: Into<Resolution<T, E>>,
    {
        match value.into() {
            Resolution::Value(value) => self.accept(value),
            Resolution::Deferred(thenable) => {
                self.ready()?;
                self.shared.borrow_mut().awaiting = true;
                let accepted = self.clone();
                let rejected = self.clone();
                thenable.subscribe(
                    Box::new(move |value| accepted.settle_awaited(Ok(value))),
                    Box::new(move |error| rejected.settle_awaited(Err(error))),
                );
                Ok(())
            }
        }
    }

    fn settle_awaited(&self, result: Result<T, E>) {
        let live = {
            let mut inner = self.shared.borrow_mut();
            inner.awaiting = false;
            !inner.state.is_terminal()
        };
        match result {
            Ok(value) if live => self.produce(value),
            Ok(_) => log::debug!("cursor terminated before the resolved value arrived"),
            Err(error) => ignore(self.reject(error), "resolved error"),
        }
    }

    /// Ends the stream successfully.
    pub fn finish(&self) -> Result<(), Error> {
        if self.shared.borrow().awaiting {
            return Err(Error::InvalidState {
                expected: CursorState::Pending.as_str(),
                actual: "resolving",
            });
        }
        terminate(&self.shared, Ok(()))
    }

    /// Ends the stream with `error`.
    pub fn reject(&self, error: E) -> Result<(), Error> {
        terminate(&self.shared, Err(error))
    }

    pub fn cancel(&self) -> Result<(), Error>
    where
        E: From<Interrupted>,
    {
        self.reject(E::from(Interrupted::Cancel))
    }

    pub fn timeout(&self) -> Result<(), Error>
    where
        E: From<Interrupted>,
    {
        self.reject(E::from(Interrupted::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::FutureState;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn countdown(values: Vec<i32>) -> Cursor<i32, String> {
        Cursor::new(move |resolver| {
            let mut values = values.into_iter();
            let first = values.next();
            resolver.on_continue(move |resolver| {
                let result = match values.next() {
                    Some(value) => resolver.accept(value),
                    None => resolver.finish(),
                };
                result.unwrap();
            });
            match first {
                Some(value) => resolver.accept(value).unwrap(),
                None => resolver.finish().unwrap(),
            }
        })
    }

    #[test]
    fn accept_requires_pending() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let producer = producer.unwrap();
        assert_eq!(cursor.state(), CursorState::Pending);
        producer.accept(1).unwrap();
        assert_eq!(cursor.state(), CursorState::Accepted);
        assert_eq!(cursor.value(), Some(1));
        assert_eq!(
            producer.accept(2),
            Err(Error::InvalidState {
                expected: "pending",
                actual: "accepted"
            })
        );
        cursor.advance().unwrap();
        producer.accept(2).unwrap();
        assert_eq!(cursor.value(), Some(2));
    }

    #[test]
    fn advance_requires_accepted() {
        let cursor = Cursor::<i32, String>::new(|_| {});
        assert_eq!(
            cursor.advance(),
            Err(Error::InvalidState {
                expected: "accepted",
                actual: "pending"
            })
        );
        assert!(cursor.next().is_err());
    }

    #[test]
    fn for_each_consumes_every_value_in_order() {
        let cursor = countdown(vec![4, 3, 2, 1, 0]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let finished = cursor.for_each(move |value| {
            sink.borrow_mut().push(value);
            Ok(())
        });
        scheduler::drain();
        assert_eq!(*seen.borrow(), vec![4, 3, 2, 1, 0]);
        assert_eq!(finished.state(), FutureState::Accepted);
        assert_eq!(cursor.state(), CursorState::Finished);
        assert_eq!(cursor.value(), None);
        assert!(cursor.when_next().is_none());
    }

    #[test]
    fn failing_callback_short_circuits() {
        let cursor = countdown(vec![4, 3, 2, 1, 0]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let finished = cursor.for_each(move |value| {
            sink.borrow_mut().push(value);
            if value == 2 {
                return Err(format!("stop at {}", value));
            }
            Ok(())
        });
        scheduler::drain();
        assert_eq!(*seen.borrow(), vec![4, 3, 2]);
        assert_eq!(cursor.state(), CursorState::Rejected);
        assert_eq!(cursor.error(), Some("stop at 2".to_string()));
        assert_eq!(finished.error(), Some("stop at 2".to_string()));
        assert!(cursor.when_next().is_none());
    }

    #[test]
    fn each_runs_before_when_next_callbacks() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let order = Rc::new(RefCell::new(Vec::new()));
        let from_next = order.clone();
        cursor.when_next().unwrap().done(move |value| {
            from_next.borrow_mut().push(format!("next {:?}", value));
            Ok(())
        });
        let from_each = order.clone();
        cursor.each(move |value| {
            from_each.borrow_mut().push(format!("each {}", value));
            Ok(())
        });
        producer.unwrap().accept(8).unwrap();
        assert!(order.borrow().is_empty());
        scheduler::drain();
        assert_eq!(*order.borrow(), vec!["each 8", "next Some(8)"]);
    }

    #[test]
    fn next_resolves_with_the_following_value() {
        let cursor = countdown(vec![1, 2]);
        scheduler::drain();
        let second = cursor.next().unwrap();
        scheduler::drain();
        assert_eq!(second.value(), Some(Some(2)));
        let end = cursor.next().unwrap();
        scheduler::drain();
        assert_eq!(end.value(), Some(None));
        assert_eq!(cursor.when_finished().state(), FutureState::Accepted);
    }

    #[test]
    fn reject_is_terminal() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let producer = producer.unwrap();
        let pending_step = cursor.when_next().unwrap();
        producer.reject("broken".to_string()).unwrap();
        assert_eq!(producer.finish(), Err(Error::AlreadyResolved));
        assert_eq!(producer.accept(1), Err(Error::AlreadyResolved));
        cursor.when_finished().done_catch(|_| Ok(()));
        scheduler::drain();
        assert_eq!(pending_step.error(), Some("broken".to_string()));
        assert_eq!(cursor.when_finished().error(), Some("broken".to_string()));
        assert!(cursor.when_next().is_none());
    }

    #[test]
    fn resolve_with_future_accepts_its_value() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let source = Resolver::<i32, String>::new();
        producer.unwrap().resolve(source.future()).unwrap();
        source.accept(5).unwrap();
        assert_eq!(cursor.state(), CursorState::Pending);
        scheduler::drain();
        assert_eq!(cursor.state(), CursorState::Accepted);
        assert_eq!(cursor.value(), Some(5));
    }

    #[test]
    fn callback_error_after_finish_rejects_when_finished() {
        let cursor = Cursor::<i32, String>::new(|resolver| {
            resolver.accept(1).unwrap();
            resolver.finish().unwrap();
        });
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        let finished = cursor.each(move |value| {
            sink.borrow_mut().push(value);
            Err("thrown".to_string())
        });
        assert_eq!(finished.state(), FutureState::Pending);
        finished.done_catch(|_| Ok(()));
        scheduler::drain();
        assert_eq!(*calls.borrow(), vec![1]);
        assert_eq!(finished.error(), Some("thrown".to_string()));
        assert_eq!(cursor.state(), CursorState::Rejected);
        assert_eq!(cursor.error(), Some("thrown".to_string()));
    }

    #[test]
    fn value_accepted_before_reject_is_still_delivered() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let finished = cursor.each(move |value| {
            sink.borrow_mut().push(value);
            Ok(())
        });
        finished.done_catch(|_| Ok(()));
        let step = cursor.when_next().unwrap();
        let producer = producer.unwrap();
        producer.accept(6).unwrap();
        producer.reject("gone".to_string()).unwrap();
        scheduler::drain();
        assert_eq!(*seen.borrow(), vec![6]);
        assert_eq!(step.value(), Some(Some(6)));
        assert_eq!(finished.error(), Some("gone".to_string()));
    }

    #[test]
    fn callback_error_after_reject_goes_to_the_hook() {
        let unhandled = Rc::new(RefCell::new(Vec::new()));
        let sink = unhandled.clone();
        scheduler::set_unhandled_rejection_hook(move |rejection| {
            sink.borrow_mut().push(rejection.reason().to_string())
        });
        let cursor = Cursor::<i32, String>::new(|resolver| {
            resolver.accept(1).unwrap();
            resolver.reject("producer".to_string()).unwrap();
        });
        let finished = cursor.each(|_| Err("callback".to_string()));
        finished.done_catch(|_| Ok(()));
        scheduler::drain();
        assert_eq!(finished.error(), Some("producer".to_string()));
        assert_eq!(*unhandled.borrow(), vec!["\"callback\"".to_string()]);
        scheduler::take_unhandled_rejection_hook();
    }

    #[test]
    fn pending_resolve_reserves_the_step() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let producer = producer.unwrap();
        let first = Resolver::<i32, String>::new();
        let second = Resolver::<i32, String>::new();
        producer.resolve(first.future()).unwrap();
        let busy = Err(Error::InvalidState {
            expected: "pending",
            actual: "resolving",
        });
        assert_eq!(producer.resolve(second.future()), busy);
        assert_eq!(producer.accept(2), busy);
        assert_eq!(producer.finish(), busy);
        first.accept(1).unwrap();
        scheduler::drain();
        assert_eq!(cursor.state(), CursorState::Accepted);
        assert_eq!(cursor.value(), Some(1));
        cursor.advance().unwrap();
        producer.accept(3).unwrap();
        assert_eq!(cursor.value(), Some(3));
    }

    #[test]
    fn resolve_with_rejected_future_rejects_the_cursor() {
        let mut producer = None;
        let cursor = Cursor::<i32, String>::new(|resolver| producer = Some(resolver));
        let finished = cursor.when_finished();
        finished.done_catch(|_| Ok(()));
        producer
            .unwrap()
            .resolve(Future::<i32, String>::rejected("far".to_string()))
            .unwrap();
        scheduler::drain();
        assert_eq!(cursor.state(), CursorState::Rejected);
        assert_eq!(cursor.error(), Some("far".to_string()));
        assert_eq!(finished.error(), Some("far".to_string()));
    }

    #[test]
    fn timeout_rejects_with_named_reason() {
        #[derive(Debug, Clone, PartialEq)]
        struct Reason(&'static str);

        impl From<Interrupted> for Reason {
            fn from(reason: Interrupted) -> Self {
                Reason(reason.name())
            }
        }

        let mut producer = None;
        let cursor = Cursor::<i32, Reason>::new(|resolver| producer = Some(resolver));
        let step = cursor.when_next().unwrap();
        producer.unwrap().timeout().unwrap();
        assert_eq!(cursor.state(), CursorState::Rejected);
        assert_eq!(
            futures::executor::block_on(cursor.when_finished()),
            Err(Reason("Timeout"))
        );
        assert_eq!(step.error(), Some(Reason("Timeout")));
    }

    #[test]
    fn each_after_termination_never_fires() {
        let cursor = countdown(vec![1]);
        let finished = cursor.for_each(|_| Ok(()));
        scheduler::drain();
        assert_eq!(finished.state(), FutureState::Accepted);
        let fired = Rc::new(RefCell::new(false));
        let flag = fired.clone();
        let late = cursor.each(move |_| {
            *flag.borrow_mut() = true;
            Ok(())
        });
        scheduler::drain();
        assert!(!*fired.borrow());
        assert!(cursor.shared.borrow().each.is_empty());
        assert_eq!(late.state(), FutureState::Accepted);
    }
}
