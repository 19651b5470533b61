//! End-of-task deferred execution.
//!
//! Every resolution callback in this crate runs from the per-thread task
//! queue kept here, never inline with the call that caused it. The host
//! decides where the checkpoint is by calling [`drain`], which runs queued
//! units in FIFO order (including units scheduled while draining) until the
//! queue is empty. Rejections that nobody observed by the end of a drain are
//! then handed to the unhandled-rejection hook.
//!
//! ```
//! use future_out::scheduler;
//! use std::{cell::Cell, rc::Rc};
//!
//! let ran = Rc::new(Cell::new(false));
//! let flag = ran.clone();
//! scheduler::schedule(move || flag.set(true));
//! assert!(!ran.get());
//! scheduler::drain();
//! assert!(ran.get());
//! ```
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::UnhandledRejection;

type Task = Box<dyn FnOnce()>;
type Hook = Rc<dyn Fn(&UnhandledRejection)>;

/// Default upper bound of units run by a single [`drain`].
pub const DEFAULT_MAX_TASKS_PER_DRAIN: usize = 100_000;

/// Scheduler options
#[derive(Debug, Clone)]
pub struct Options {
    pub max_tasks_per_drain: usize,
}

impl Options {
    pub fn new() -> Options {
        Options {
            max_tasks_per_drain: DEFAULT_MAX_TASKS_PER_DRAIN,
        }
    }

    pub fn max_tasks_per_drain(&mut self, max: usize) -> &mut Options {
        self.max_tasks_per_drain = max;
        self
    }
}

impl Default for Options {
    fn default() -> Options {
        Options::new()
    }
}

struct Queue {
    tasks: VecDeque<Task>,
    rejections: Vec<Task>,
    draining: bool,
    options: Options,
}

thread_local! {
    static QUEUE: RefCell<Queue> = RefCell::new(Queue {
        tasks: VecDeque::new(),
        rejections: Vec::new(),
        draining: false,
        options: Options::new(),
    });
    static HOOK: RefCell<Option<Hook>> = RefCell::new(None);
}

/// Resets the draining flag even if a task panics.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        QUEUE.with(|queue| queue.borrow_mut().draining = false);
    }
}

/// Installs `options` for the current thread's queue.
pub fn configure(options: Options) {
    QUEUE.with(|queue| queue.borrow_mut().options = options);
}

/// Appends a unit of work to the end of the current thread's queue.
pub fn schedule<F>(task: F)
where
    F: FnOnce() + 'static,
{
    QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.tasks.push_back(Box::new(task));
        log::trace!("scheduled task, {} queued", queue.tasks.len());
    });
}

/// Runs queued units until the queue is empty, then reports rejections that
/// are still unobserved. Returns the number of units run.
///
/// Calling `drain` from inside a running unit is a no-op returning 0; the
/// outer drain picks up whatever the unit scheduled.
pub fn drain() -> usize {
    let max = match QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        if queue.draining {
            None
        } else {
            queue.draining = true;
            Some(queue.options.max_tasks_per_drain)
        }
    }) {
        Some(max) => max,
        None => return 0,
    };
    let _guard = DrainGuard;

    let mut ran = 0;
    loop {
        while let Some(task) = QUEUE.with(|queue| queue.borrow_mut().tasks.pop_front()) {
            task();
            ran += 1;
            if ran >= max {
                log::warn!("drain stopped after {} tasks, {} still queued", ran, pending());
                return ran;
            }
        }

        let rejections = QUEUE.with(|queue| std::mem::take(&mut queue.borrow_mut().rejections));
        if rejections.is_empty() {
            break;
        }
        for check in rejections {
            check();
        }
    }
    log::trace!("drain finished after {} tasks", ran);
    ran
}

/// `true` when no unit is waiting to run.
pub fn is_idle() -> bool {
    QUEUE.with(|queue| queue.borrow().tasks.is_empty())
}

/// Number of units waiting to run.
pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().tasks.len())
}

/// `true` while [`drain`] is running on the current thread.
pub fn is_draining() -> bool {
    QUEUE.with(|queue| queue.borrow().draining)
}

/// Replaces the sink receiving unhandled rejections on the current thread.
/// Without a hook they are logged at error level.
pub fn set_unhandled_rejection_hook<F>(hook: F)
where
    F: Fn(&UnhandledRejection) + 'static,
{
    HOOK.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
}

/// Removes the installed hook, restoring the logging sink.
pub fn take_unhandled_rejection_hook() -> Option<Rc<dyn Fn(&UnhandledRejection)>> {
    HOOK.with(|slot| slot.borrow_mut().take())
}

/// Queues a check that runs once the task queue of the current drain is
/// exhausted.
pub(crate) fn defer_rejection_check<F>(check: F)
where
    F: FnOnce() + 'static,
{
    QUEUE.with(|queue| queue.borrow_mut().rejections.push(Box::new(check)));
}

pub(crate) fn report_unhandled(rejection: UnhandledRejection) {
    match HOOK.with(|slot| slot.borrow().clone()) {
        Some(hook) => hook(&rejection),
        None => log::error!("{}", rejection),
    }
}
