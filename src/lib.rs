//! `retort`: an embedded join-calculus runtime.
//!
//! Declare typed *molecules*, describe *reactions* that atomically consume a
//! multiset of them, and activate the set as a *junction*. Emissions go into
//! the junction's soup; the engine continuously matches reactions against
//! the soup and runs their bodies on a worker pool. *Blocking* molecules
//! suspend the emitter until the consuming reaction replies.
//!
//! ```no_run
//! use std::time::Duration;
//! use retort::{activate, blocking, molecule, Reaction};
//!
//! let counter = molecule::<i64>("counter");
//! let decr = molecule::<()>("decr");
//! let fetch = blocking::<(), i64>("fetch");
//!
//! let j = activate(vec![
//!     Reaction::new([counter.consume(), fetch.consume_with_reply()])
//!         .emits([counter.output()])
//!         .body({
//!             let counter = counter.clone();
//!             move |b| {
//!                 let n: i64 = b.take(0);
//!                 b.reply_handle(1).reply(n);
//!                 counter.emit(n).unwrap();
//!             }
//!         }),
//!     Reaction::new([counter.consume(), decr.wildcard()])
//!         .emits([counter.output()])
//!         .body({
//!             let counter = counter.clone();
//!             move |b| {
//!                 let n: i64 = b.take(0);
//!                 counter.emit(n - 1).unwrap();
//!             }
//!         }),
//! ])
//! .unwrap();
//!
//! counter.emit(3).unwrap();
//! decr.emit(()).unwrap();
//! let n = fetch.request_timeout((), Duration::from_secs(1)).unwrap();
//! println!("{n:?} pending in {}", j.log_soup());
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod pool;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working vocabulary at the crate root for convenience.
pub use crate::core::{
    activate, activate_with, blocking, molecule, AnalysisReport, ActivationError, Bindings,
    BindingsRef, BlockingMolecule, ConfigurationError, EmitError, InputPattern, Junction, Matcher,
    Molecular, Molecule, MoleculeId, OutputPattern, Reaction, ReplyHandle, RequestError,
    StatsSnapshot, Value,
};
pub use crate::pool::{BlockingAwarePool, FixedPool, PoolError, ThreadPool, idle_scope};
