//! Fixed-size worker pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, TrySendError};

use super::{IdleAware, PoolError, Task, ThreadPool};

/// A pool with a constant worker count.
///
/// The queue is unbounded by default; [`FixedPool::with_queue_cap`] bounds
/// it, after which submission fails fast on overflow. A fixed pool does not
/// grow around blocking regions: size it for the blocking load, or use
/// [`BlockingAwarePool`](super::BlockingAwarePool) as the reaction pool.
#[derive(Clone)]
pub struct FixedPool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    tx: Mutex<Option<Sender<Task>>>,
    shut: AtomicBool,
    queue_cap: Option<usize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FixedPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self::build(name.into(), size, None)
    }

    pub fn with_queue_cap(name: impl Into<String>, size: usize, cap: usize) -> Self {
        Self::build(name.into(), size, Some(cap))
    }

    fn build(name: String, size: usize, queue_cap: Option<usize>) -> Self {
        let size = size.max(1);
        let (tx, rx) = match queue_cap {
            Some(cap) => crossbeam::channel::bounded(cap),
            None => crossbeam::channel::unbounded(),
        };
        let inner = Arc::new(Inner {
            name,
            tx: Mutex::new(Some(tx)),
            shut: AtomicBool::new(false),
            queue_cap,
            handles: Mutex::new(Vec::with_capacity(size)),
        });
        let mut handles = inner.handles.lock().expect("pool handles lock");
        for i in 0..size {
            handles.push(spawn_worker(&inner, &rx, i));
        }
        drop(handles);
        FixedPool { inner }
    }
}

fn spawn_worker(inner: &Arc<Inner>, rx: &Receiver<Task>, index: usize) -> JoinHandle<()> {
    let rx = rx.clone();
    let weak = Arc::downgrade(inner);
    let weak: Weak<dyn IdleAware> = weak;
    let thread_name = format!("{}-{index}", inner.name);
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            super::register_current(weak);
            while let Ok(task) = rx.recv() {
                run_task(task);
            }
        })
        .expect("spawn pool worker")
}

pub(crate) fn run_task(task: Task) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(panic = %panic_message(&panic), "pool task panicked");
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

impl ThreadPool for FixedPool {
    fn submit(&self, task: Task) -> Result<(), PoolError> {
        if self.inner.shut.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown {
                pool: self.inner.name.clone(),
            });
        }
        let tx = self.inner.tx.lock().expect("pool sender lock");
        let Some(tx) = tx.as_ref() else {
            return Err(PoolError::ShutDown {
                pool: self.inner.name.clone(),
            });
        };
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let cap = self.inner.queue_cap.unwrap_or(0);
                let err = PoolError::QueueFull {
                    pool: self.inner.name.clone(),
                    cap,
                };
                tracing::error!(pool = %self.inner.name, cap, "task rejected: queue full");
                Err(err)
            }
            Err(TrySendError::Disconnected(_)) => Err(PoolError::ShutDown {
                pool: self.inner.name.clone(),
            }),
        }
    }

    fn shutdown_now(&self) {
        self.inner.shut.store(true, Ordering::Release);
        // Dropping the sender lets workers drain the queue and exit.
        self.inner.tx.lock().expect("pool sender lock").take();
        let handles = std::mem::take(&mut *self.inner.handles.lock().expect("pool handles lock"));
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

// A fixed pool keeps its size through blocking regions.
impl IdleAware for Inner {
    fn begin_idle(&self) {}
    fn end_idle(&self) {}
}
