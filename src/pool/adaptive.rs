//! Worker pool that grows around blocking regions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender};

use super::fixed::run_task;
use super::{IdleAware, PoolError, Task, ThreadPool};

/// A pool whose effective capacity stays at `initial` while workers block.
///
/// When a worker enters an idle scope (a blocking emission does this
/// automatically), the pool spawns a temporary replacement if runnable
/// workers would otherwise drop below `initial`. When the scope ends, one
/// surplus worker retires after its current task. Growth is capped at
/// `initial + max_extra` threads.
///
/// Without this, a pool fully occupied by reactions all parked on
/// unsatisfied blocking molecules cannot run the reaction that would reply
/// to them.
#[derive(Clone)]
pub struct BlockingAwarePool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    weak_self: Weak<Inner>,
    tx: Mutex<Option<Sender<Task>>>,
    rx: Receiver<Task>,
    shut: AtomicBool,
    initial: usize,
    max_extra: usize,
    /// Workers currently running, blocked ones included.
    live: AtomicUsize,
    /// Workers currently inside an idle scope.
    blocked: AtomicUsize,
    /// Retirement tokens: surplus workers claim one and exit.
    retire: AtomicUsize,
    next_worker: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BlockingAwarePool {
    pub fn new(name: impl Into<String>, initial: usize) -> Self {
        Self::with_max_extra(name, initial, 256)
    }

    pub fn with_max_extra(name: impl Into<String>, initial: usize, max_extra: usize) -> Self {
        let initial = initial.max(1);
        let (tx, rx) = crossbeam::channel::unbounded();
        let name = name.into();
        let inner = Arc::new_cyclic(|weak_self| Inner {
            name,
            weak_self: weak_self.clone(),
            tx: Mutex::new(Some(tx)),
            rx,
            shut: AtomicBool::new(false),
            initial,
            max_extra,
            live: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
            retire: AtomicUsize::new(0),
            next_worker: AtomicUsize::new(0),
            handles: Mutex::new(Vec::with_capacity(initial)),
        });
        for _ in 0..initial {
            Inner::spawn_worker(&inner);
        }
        BlockingAwarePool { inner }
    }

    #[cfg(test)]
    fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }
}

impl Inner {
    fn spawn_worker(inner: &Arc<Inner>) {
        inner.live.fetch_add(1, Ordering::AcqRel);
        let index = inner.next_worker.fetch_add(1, Ordering::AcqRel);
        let me = Arc::clone(inner);
        let handle = std::thread::Builder::new()
            .name(format!("{}-{index}", inner.name))
            .spawn(move || {
                let weak: Weak<dyn IdleAware> = me.weak_self.clone();
                super::register_current(weak);
                loop {
                    if me.should_retire() {
                        break;
                    }
                    match me.rx.recv() {
                        Ok(task) => run_task(task),
                        Err(_) => break,
                    }
                }
                me.live.fetch_sub(1, Ordering::AcqRel);
            })
            .expect("spawn pool worker");
        inner
            .handles
            .lock()
            .expect("pool handles lock")
            .push(handle);
    }

    /// Claim a retirement token if this worker is surplus.
    fn should_retire(&self) -> bool {
        loop {
            let tokens = self.retire.load(Ordering::Acquire);
            if tokens == 0 {
                return false;
            }
            if self
                .retire
                .compare_exchange(tokens, tokens - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            // Tokens issued while the pool was already at its floor are
            // stale: swallow them and keep working.
            return self.live.load(Ordering::Acquire) > self.initial;
        }
    }
}

impl IdleAware for Inner {
    fn begin_idle(&self) {
        let blocked = self.blocked.fetch_add(1, Ordering::AcqRel) + 1;
        let live = self.live.load(Ordering::Acquire);
        if live.saturating_sub(blocked) >= self.initial
            || live >= self.initial + self.max_extra
            || self.shut.load(Ordering::Acquire)
        {
            return;
        }
        if let Some(inner) = self.weak_self.upgrade() {
            tracing::debug!(pool = %self.name, live, blocked, "growing around blocking region");
            Inner::spawn_worker(&inner);
        }
    }

    fn end_idle(&self) {
        self.blocked.fetch_sub(1, Ordering::AcqRel);
        self.retire.fetch_add(1, Ordering::AcqRel);
    }
}

impl ThreadPool for BlockingAwarePool {
    fn submit(&self, task: Task) -> Result<(), PoolError> {
        if self.inner.shut.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown {
                pool: self.inner.name.clone(),
            });
        }
        let tx = self.inner.tx.lock().expect("pool sender lock");
        match tx.as_ref() {
            Some(tx) if tx.send(task).is_ok() => Ok(()),
            _ => Err(PoolError::ShutDown {
                pool: self.inner.name.clone(),
            }),
        }
    }

    fn shutdown_now(&self) {
        self.inner.shut.store(true, Ordering::Release);
        self.inner.tx.lock().expect("pool sender lock").take();
        loop {
            let drained = std::mem::take(&mut *self.inner.handles.lock().expect("pool handles lock"));
            if drained.is_empty() {
                break;
            }
            for handle in drained {
                let _ = handle.join();
            }
        }
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pool::idle_scope;

    #[test]
    fn grows_when_all_workers_block() {
        let pool = BlockingAwarePool::new("t-grow", 2);
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam::channel::unbounded();

        // Two tasks park inside idle scopes, saturating the initial workers.
        for _ in 0..2 {
            let release_rx = release_rx.clone();
            pool.submit(Box::new(move || {
                idle_scope(|| {
                    let _ = release_rx.recv();
                });
            }))
            .unwrap();
        }
        // A third task must still run: the pool grew.
        let done = done_tx.clone();
        pool.submit(Box::new(move || done.send(()).unwrap())).unwrap();
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(pool.live_workers() > 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        pool.shutdown_now();
    }

    #[test]
    fn surplus_workers_retire_after_scope_ends() {
        let pool = BlockingAwarePool::new("t-retire", 1);
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        pool.submit(Box::new(move || {
            idle_scope(|| {
                let _ = release_rx.recv();
            });
        }))
        .unwrap();
        // Force the growth path, then let the blocked worker out.
        let (done_tx, done_rx) = crossbeam::channel::bounded(1);
        pool.submit(Box::new(move || done_tx.send(()).unwrap())).unwrap();
        done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(pool.live_workers(), 2);
        release_tx.send(()).unwrap();

        // The retirement token is claimed on the next task wave.
        std::thread::sleep(Duration::from_millis(50));
        for _ in 0..4 {
            pool.submit(Box::new(|| {})).unwrap();
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(pool.live_workers(), 1);
        pool.shutdown_now();
    }
}
