//! Futures with explicit resolvers, `then` chaining and value cursors.
//!
//! A [`Resolver`] is the only handle that can settle a core; a [`Future`] can
//! only observe it. All callbacks are delivered through the per-thread
//! [`scheduler`], so registering a callback or resolving a future never runs
//! user code inline.
//!
//! # Examples
//!
//! ```
//! use future_out::{make, scheduler, Resolution};
//!
//! let (resolver, future) = make::<String, String>();
//! let greeting = future.then(|name| Ok(Resolution::Value(format!("hi {}", name))));
//! resolver.accept("there".into()).unwrap();
//! scheduler::drain();
//! assert_eq!(greeting.value().as_deref(), Some("hi there"));
//! ```
pub mod cursor;
pub mod error;
pub mod events;
pub mod future;
pub mod scheduler;

pub use cursor::{Cursor, CursorResolver, CursorState};
pub use error::{Error, Interrupted, UnhandledRejection};
pub use events::ResolutionEvents;
pub use future::{
    Future, FutureState, Outcome, Resolution, Resolver, ResolverState, Thenable, Wait,
};

use std::fmt::Debug;

/// A settling capability paired with the handle that waits on it.
pub trait Promise {
    type Output;
    type Error;
    type Waiter;

    /// A fresh capability and its waiter.
    fn pair() -> (Self, Self::Waiter)
    where
        Self: Sized;

    fn accept(&self, value: Self::Output) -> Result<(), Error>;

    fn reject(&self, error: Self::Error) -> Result<(), Error>;
}

/// A fresh resolver and the future it settles.
pub fn make<T, E>() -> (Resolver<T, E>, Future<T, E>)
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    Resolver::pair()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle_with<P: Promise>(value: P::Output) -> P::Waiter {
        let (promise, waiter) = P::pair();
        promise.accept(value).unwrap();
        waiter
    }

    #[test]
    fn promise_pairs_settle_their_waiter() {
        let future = settle_with::<Resolver<i32, String>>(7);
        let cursor = settle_with::<CursorResolver<i32, String>>(8);
        scheduler::drain();
        assert_eq!(future.value(), Some(7));
        assert_eq!(cursor.state(), CursorState::Accepted);
        assert_eq!(cursor.value(), Some(8));
    }
}
