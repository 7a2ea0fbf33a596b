//! Molecule identity and the typed emission handles.
//!
//! Identity, not name, drives matching: every call to [`molecule`] or
//! [`blocking`] mints a fresh id, and two molecules may share a display name
//! without ever matching each other's patterns. The id carries its binding
//! slot, so the hot emission path reaches its join definition without any
//! global lookup.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::core::error::{EmitError, RequestError};
use crate::core::junction::JunctionCore;
use crate::core::matcher::Matcher;
use crate::core::reaction::{InputPattern, OutputPattern};
use crate::core::reply::{ReplySlot, WaitOutcome};
use crate::core::scheduler;
use crate::core::soup::Stored;
use crate::core::value::{Molecular, Value};
use crate::pool;

pub(crate) struct MoleculeInfo {
    pub name: String,
    pub blocking: bool,
    /// Set exactly once, under the activation registry lock.
    pub bound: OnceLock<Arc<JunctionCore>>,
}

/// Unique, opaque molecule identity. Cheap to clone; equality and hashing
/// are by identity.
#[derive(Clone)]
pub struct MoleculeId(pub(crate) Arc<MoleculeInfo>);

impl MoleculeId {
    fn fresh(name: &str, blocking: bool) -> Self {
        MoleculeId(Arc::new(MoleculeInfo {
            name: name.to_string(),
            blocking,
            bound: OnceLock::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_blocking(&self) -> bool {
        self.0.blocking
    }

    pub(crate) fn bound_core(&self) -> Result<Arc<JunctionCore>, EmitError> {
        self.0.bound.get().cloned().ok_or_else(|| EmitError::NotBound {
            molecule: self.0.name.clone(),
        })
    }

    pub(crate) fn binding(&self) -> Option<&Arc<JunctionCore>> {
        self.0.bound.get()
    }
}

impl PartialEq for MoleculeId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for MoleculeId {}

impl Hash for MoleculeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for MoleculeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.blocking {
            write!(f, "{}/B", self.0.name)
        } else {
            f.write_str(&self.0.name)
        }
    }
}

impl fmt::Display for MoleculeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// Declare a non-blocking molecule carrying values of type `T`.
pub fn molecule<T: Molecular>(name: &str) -> Molecule<T> {
    Molecule {
        id: MoleculeId::fresh(name, false),
        _marker: PhantomData,
    }
}

/// Declare a blocking molecule carrying `T` and replying with `R`.
pub fn blocking<T: Molecular, R: Molecular>(name: &str) -> BlockingMolecule<T, R> {
    BlockingMolecule {
        id: MoleculeId::fresh(name, true),
        _marker: PhantomData,
    }
}

/// Typed injector for a non-blocking molecule. Clones share the identity.
pub struct Molecule<T> {
    id: MoleculeId,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Clone for Molecule<T> {
    fn clone(&self) -> Self {
        Molecule {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Molecular> Molecule<T> {
    pub fn id(&self) -> &MoleculeId {
        &self.id
    }

    /// Emit a value into the owning join definition's soup. Returns as soon
    /// as the value is inserted and a decision pass is scheduled.
    pub fn emit(&self, value: T) -> Result<(), EmitError> {
        let core = self.id.bound_core()?;
        scheduler::on_emit(
            &core,
            &self.id,
            Stored {
                value: Value::new(value),
                slot: None,
            },
        )
    }

    /// Input pattern binding the value (a simple variable).
    pub fn consume(&self) -> InputPattern {
        InputPattern::new(self.id.clone(), Matcher::simple_var())
    }

    /// Input pattern matching any value and binding nothing.
    pub fn wildcard(&self) -> InputPattern {
        InputPattern::new(self.id.clone(), Matcher::wildcard())
    }

    /// Input pattern matching only values structurally equal to `expected`.
    pub fn eq(&self, expected: T) -> InputPattern {
        InputPattern::new(self.id.clone(), Matcher::constant(expected))
    }

    /// Input pattern matching values the predicate accepts.
    pub fn matching(&self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> InputPattern {
        InputPattern::new(
            self.id.clone(),
            Matcher::arbitrary(move |value| value.downcast_ref::<T>().is_some_and(&pred)),
        )
    }

    /// Like [`Molecule::matching`], with an identity tag the analyzer can
    /// compare across reactions.
    pub fn matching_tagged(
        &self,
        pred: impl Fn(&T) -> bool + Send + Sync + 'static,
        tag: &str,
    ) -> InputPattern {
        InputPattern::new(
            self.id.clone(),
            Matcher::arbitrary_tagged(move |value| value.downcast_ref::<T>().is_some_and(&pred), tag),
        )
    }

    /// Declared output for static analysis.
    pub fn output(&self) -> OutputPattern {
        OutputPattern::new(self.id.clone())
    }

    /// Declared output with a known constant value.
    pub fn output_value(&self, value: T) -> OutputPattern {
        OutputPattern::with_value(self.id.clone(), value)
    }

    /// Diagnostic string of the owning join definition and its soup.
    pub fn log_soup(&self) -> Result<String, EmitError> {
        Ok(self.id.bound_core()?.log_soup())
    }

    pub fn set_log_level(&self, level: u8) -> Result<(), EmitError> {
        self.id.bound_core()?.set_log_level(level);
        Ok(())
    }
}

/// Typed injector for a blocking molecule: emission suspends the caller
/// until the consuming reaction replies, the deadline passes, or the
/// reaction faults.
pub struct BlockingMolecule<T, R> {
    id: MoleculeId,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R> Clone for BlockingMolecule<T, R> {
    fn clone(&self) -> Self {
        BlockingMolecule {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Molecular, R: Molecular> BlockingMolecule<T, R> {
    pub fn id(&self) -> &MoleculeId {
        &self.id
    }

    /// Emit and wait for the reply with no deadline.
    pub fn request(&self, value: T) -> Result<R, RequestError> {
        match self.request_inner(value, None)? {
            Some(reply) => Ok(reply),
            None => unreachable!("untimed request cannot time out"),
        }
    }

    /// Emit and wait for the reply until `timeout` elapses. `Ok(None)` means
    /// the deadline passed first; a reply racing the deadline is dropped.
    pub fn request_timeout(&self, value: T, timeout: Duration) -> Result<Option<R>, RequestError> {
        self.request_inner(value, Some(timeout))
    }

    fn request_inner(&self, value: T, deadline: Option<Duration>) -> Result<Option<R>, RequestError> {
        let core = self.id.bound_core().map_err(RequestError::Emit)?;
        let slot = ReplySlot::new();
        scheduler::on_emit(
            &core,
            &self.id,
            Stored {
                value: Value::new(value),
                slot: Some(Arc::clone(&slot)),
            },
        )
        .map_err(RequestError::Emit)?;

        // While parked, this thread counts as idle for its pool so reaction
        // capacity does not shrink underneath the reply we are waiting for.
        let outcome = pool::idle_scope(|| slot.wait(deadline));
        match outcome {
            WaitOutcome::Replied(reply) => match reply.downcast::<R>() {
                Ok(reply) => Ok(Some(reply)),
                Err(_) => Err(RequestError::ReplyType {
                    molecule: self.id.name().to_string(),
                }),
            },
            WaitOutcome::TimedOut => Ok(None),
            WaitOutcome::Failed(reason) => Err(RequestError::Failed {
                molecule: self.id.name().to_string(),
                reason,
            }),
        }
    }

    /// Input pattern binding both the value and the reply handle. Every
    /// blocking input must use this; activation rejects one that does not.
    pub fn consume_with_reply(&self) -> InputPattern {
        InputPattern::new(self.id.clone(), Matcher::reply_binder())
    }

    /// Declared output for static analysis (the body emits this molecule).
    pub fn output(&self) -> OutputPattern {
        OutputPattern::new(self.id.clone())
    }

    pub fn log_soup(&self) -> Result<String, EmitError> {
        Ok(self.id.bound_core()?.log_soup())
    }

    pub fn set_log_level(&self, level: u8) -> Result<(), EmitError> {
        self.id.bound_core()?.set_log_level(level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_name() {
        let a1 = molecule::<i64>("a");
        let a2 = molecule::<i64>("a");
        assert_ne!(a1.id(), a2.id());
        assert_eq!(a1.id(), &a1.id().clone());
    }

    #[test]
    fn unbound_emission_is_refused() {
        let m = molecule::<i64>("orphan");
        match m.emit(1) {
            Err(EmitError::NotBound { molecule }) => assert_eq!(molecule, "orphan"),
            other => panic!("expected NotBound, got {other:?}"),
        }
    }

    #[test]
    fn unbound_blocking_request_is_refused() {
        let f = blocking::<(), i64>("orphan_f");
        assert!(matches!(
            f.request(()),
            Err(RequestError::Emit(EmitError::NotBound { .. }))
        ));
    }

    #[test]
    fn debug_marks_blocking() {
        let m = molecule::<i64>("m");
        let f = blocking::<(), ()>("f");
        assert_eq!(format!("{:?}", m.id()), "m");
        assert_eq!(format!("{:?}", f.id()), "f/B");
    }
}
