//! Event-style notifications on top of [`Future`] callbacks.
//!
//! [`ResolutionEvents`] subscribes to a future like any other observer and
//! republishes its outcome as a single `accept` or `reject` dispatch. The
//! dispatch is queued one unit after the future's own delivery, so `then`
//! callbacks registered on the same future run before any listener.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::UnhandledRejection;
use crate::future::{Future, FutureState};
use crate::scheduler;

type Listener<V> = Box<dyn FnMut(&V)>;

struct Listeners<T, E> {
    accept: Vec<Listener<T>>,
    reject: Vec<Listener<E>>,
    dispatched: Option<FutureState>,
}

pub struct ResolutionEvents<T, E> {
    listeners: Rc<RefCell<Listeners<T, E>>>,
}

impl<T, E> ResolutionEvents<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn new(future: &Future<T, E>) -> Self {
        let listeners = Rc::new(RefCell::new(Listeners {
            accept: Vec::new(),
            reject: Vec::new(),
            dispatched: None,
        }));
        let accepted = listeners.clone();
        let rejected = listeners.clone();
        future.done_or_else(
            move |value| {
                scheduler::schedule(move || dispatch_accept(&accepted, value));
                Ok(())
            },
            move |error| {
                scheduler::schedule(move || dispatch_reject(&rejected, error));
                Ok(())
            },
        );
        ResolutionEvents { listeners }
    }

    /// Adds a listener for the `accept` notification. Listeners added after
    /// the dispatch are dropped without firing.
    pub fn on_accept<F>(&self, listener: F)
    where
        F: FnMut(&T) + 'static,
    {
        let mut listeners = self.listeners.borrow_mut();
        if listeners.dispatched.is_some() {
            log::debug!("accept listener added after dispatch dropped");
            return;
        }
        listeners.accept.push(Box::new(listener));
    }

    pub fn on_reject<F>(&self, listener: F)
    where
        F: FnMut(&E) + 'static,
    {
        let mut listeners = self.listeners.borrow_mut();
        if listeners.dispatched.is_some() {
            log::debug!("reject listener added after dispatch dropped");
            return;
        }
        listeners.reject.push(Box::new(listener));
    }

    /// The disposition that was dispatched, if any.
    pub fn dispatched(&self) -> Option<FutureState> {
        self.listeners.borrow().dispatched
    }
}

fn dispatch_accept<T, E>(listeners: &RefCell<Listeners<T, E>>, value: T) {
    let mut accept = {
        let mut listeners = listeners.borrow_mut();
        listeners.dispatched = Some(FutureState::Accepted);
        listeners.reject.clear();
        std::mem::take(&mut listeners.accept)
    };
    for listener in accept.iter_mut() {
        listener(&value);
    }
}

fn dispatch_reject<T, E: fmt::Debug>(listeners: &RefCell<Listeners<T, E>>, error: E) {
    let mut reject = {
        let mut listeners = listeners.borrow_mut();
        listeners.dispatched = Some(FutureState::Rejected);
        listeners.accept.clear();
        std::mem::take(&mut listeners.reject)
    };
    if reject.is_empty() {
        scheduler::report_unhandled(UnhandledRejection::new(&error));
        return;
    }
    for listener in reject.iter_mut() {
        listener(&error);
    }
}
