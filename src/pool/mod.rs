//! Worker pools that reaction bodies and decision passes run on.
//!
//! Two roles share one contract: the *reaction pool* executes reaction
//! bodies (potentially long, potentially blocking), the *decision pool*
//! executes scheduler passes (short, CPU-bound). Pools accept boxed tasks,
//! reject instead of silently dropping when a bounded queue is full, and
//! expose an idle scope that a blocking-aware pool uses to keep effective
//! capacity constant while a worker waits.

pub mod adaptive;
pub mod fixed;

use std::cell::RefCell;
use std::sync::Weak;

use thiserror::Error;

pub use adaptive::BlockingAwarePool;
pub use fixed::FixedPool;

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Contract shared by both pool roles.
pub trait ThreadPool: Send + Sync {
    /// Enqueue a task. Fail-fast: a full bounded queue or a shut-down pool
    /// refuses instead of blocking the submitter.
    fn submit(&self, task: Task) -> Result<(), PoolError>;

    /// Stop accepting tasks, drain the queue, and join the workers.
    fn shutdown_now(&self);

    fn name(&self) -> &str;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    #[error("pool `{pool}` queue is full ({cap} tasks)")]
    QueueFull { pool: String, cap: usize },

    #[error("pool `{pool}` is shut down")]
    ShutDown { pool: String },
}

/// Capacity reaction of a pool whose worker enters a blocking region.
///
/// `begin_idle` may add a temporary worker; `end_idle` retires one surplus
/// worker once the blocked one is runnable again.
pub(crate) trait IdleAware: Send + Sync {
    fn begin_idle(&self);
    fn end_idle(&self);
}

thread_local! {
    static CURRENT_POOL: RefCell<Option<Weak<dyn IdleAware>>> = const { RefCell::new(None) };
}

/// Install the calling worker thread's pool for idle-scope lookups.
pub(crate) fn register_current(pool: Weak<dyn IdleAware>) {
    CURRENT_POOL.with(|slot| *slot.borrow_mut() = Some(pool));
}

/// Run `f` inside an idle scope of the current worker's pool.
///
/// Blocking emissions enter this automatically; wrap hand-rolled synchronous
/// I/O (or a guard that performs it) the same way. Outside a pool worker, or
/// on a pool that does not grow, this is a plain call.
pub fn idle_scope<R>(f: impl FnOnce() -> R) -> R {
    let pool = CURRENT_POOL.with(|slot| slot.borrow().clone());
    let pool = pool.and_then(|weak| weak.upgrade());
    if let Some(pool) = &pool {
        pool.begin_idle();
    }
    let guard = IdleGuard { pool };
    let out = f();
    drop(guard);
    out
}

/// Ends the idle scope even if `f` unwinds.
struct IdleGuard {
    pool: Option<std::sync::Arc<dyn IdleAware>>,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            pool.end_idle();
        }
    }
}
