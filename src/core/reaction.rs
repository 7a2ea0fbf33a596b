//! Reactions: normalized descriptors, the builder, and binding environments.
//!
//! The surface that produces reactions (macros, codegen) is not this
//! crate's concern; the engine consumes a normalized form (input patterns,
//! an optional guard, a body thunk, declared output patterns, a retry flag)
//! and freezes it at activation.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use sha2::{Digest, Sha256};

use crate::core::matcher::Matcher;
use crate::core::molecule::MoleculeId;
use crate::core::reply::{ReplyHandle, ReplySlot};
use crate::core::soup::Stored;
use crate::core::value::{Molecular, Value};

/// One input slot: a molecule and the matcher its candidate must satisfy.
pub struct InputPattern {
    pub(crate) molecule: MoleculeId,
    pub(crate) matcher: Matcher,
}

impl InputPattern {
    /// Raw normalized form; the typed constructors on
    /// [`Molecule`](crate::core::molecule::Molecule) are sugar over this.
    pub fn new(molecule: MoleculeId, matcher: Matcher) -> Self {
        InputPattern { molecule, matcher }
    }
}

/// One declared output: a molecule the body emits, with its value when the
/// emission is a known constant. The analyzer works off these; the engine
/// itself never checks a body against its declaration.
pub struct OutputPattern {
    pub(crate) molecule: MoleculeId,
    pub(crate) constant: Option<Value>,
}

impl OutputPattern {
    pub fn new(molecule: MoleculeId) -> Self {
        OutputPattern {
            molecule,
            constant: None,
        }
    }

    pub fn with_value(molecule: MoleculeId, value: impl Molecular) -> Self {
        OutputPattern {
            molecule,
            constant: Some(Value::new(value)),
        }
    }
}

/// Read-only view of a candidate tuple, handed to guards.
///
/// Guards must be total and side-effect-free; they run under the join
/// definition's decision mutex, once per candidate tuple.
pub struct BindingsRef<'a> {
    values: &'a [&'a Value],
}

impl<'a> BindingsRef<'a> {
    pub(crate) fn new(values: &'a [&'a Value]) -> Self {
        BindingsRef { values }
    }

    /// The candidate value at input position `index`.
    ///
    /// Panics on a type or index mismatch, which the engine treats as a
    /// guard fault for that pass.
    pub fn value<T: Molecular>(&self, index: usize) -> &T {
        self.values[index]
            .downcast_ref::<T>()
            .expect("guard read a binding at the wrong type")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Owned binding environment for a running reaction body, laid out in input
/// pattern order.
pub struct Bindings {
    slots: Vec<BoundSlot>,
}

struct BoundSlot {
    molecule: MoleculeId,
    value: Option<Value>,
    reply: Option<ReplyHandle>,
}

impl Bindings {
    /// Move the consumed value at input position `index` out.
    ///
    /// Panics on a type or index mismatch or a second take; the scheduler
    /// treats a panicking body as a reaction fault.
    pub fn take<T: Molecular>(&mut self, index: usize) -> T {
        let slot = &mut self.slots[index];
        let value = slot
            .value
            .take()
            .expect("binding already taken from this slot");
        match value.downcast::<T>() {
            Ok(v) => v,
            Err(value) => {
                slot.value = Some(value);
                panic!(
                    "binding for `{}` read at the wrong type",
                    slot.molecule.name()
                );
            }
        }
    }

    /// Borrow the consumed value at input position `index`.
    pub fn value<T: Molecular>(&self, index: usize) -> &T {
        self.slots[index]
            .value
            .as_ref()
            .expect("binding already taken from this slot")
            .downcast_ref::<T>()
            .expect("binding read at the wrong type")
    }

    /// The reply handle bound at input position `index`.
    pub fn reply_handle(&self, index: usize) -> ReplyHandle {
        self.slots[index]
            .reply
            .clone()
            .expect("input slot has no reply binder")
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Build the environment for one execution. Returns the bindings, the
    /// reply slots to police at body exit, and the expiry flag shared by
    /// every handle created here.
    pub(crate) fn from_consumed(
        inputs: &[InputPattern],
        consumed: Vec<Stored>,
    ) -> (Bindings, Vec<Arc<ReplySlot>>, Arc<AtomicBool>) {
        let expired = Arc::new(AtomicBool::new(false));
        let mut slots = Vec::with_capacity(consumed.len());
        let mut reply_slots = Vec::new();
        for (pattern, stored) in inputs.iter().zip(consumed) {
            let reply = match (&stored.slot, pattern.matcher.is_reply_binder()) {
                (Some(slot), true) => {
                    reply_slots.push(Arc::clone(slot));
                    Some(ReplyHandle::new(
                        Arc::clone(slot),
                        Arc::clone(&expired),
                        pattern.molecule.clone(),
                    ))
                }
                (Some(slot), false) => {
                    // Blocking value consumed without a binder cannot happen
                    // past activation checks, but the emitter must still be
                    // released if it does.
                    reply_slots.push(Arc::clone(slot));
                    None
                }
                (None, _) => None,
            };
            slots.push(BoundSlot {
                molecule: pattern.molecule.clone(),
                value: Some(stored.value),
                reply,
            });
        }
        (Bindings { slots }, reply_slots, expired)
    }
}

pub(crate) type BodyFn = Arc<dyn Fn(&mut Bindings) + Send + Sync>;
pub(crate) type GuardFn = Arc<dyn for<'a> Fn(&BindingsRef<'a>) -> bool + Send + Sync>;

/// A reaction under construction.
pub struct Reaction {
    pub(crate) inputs: Vec<InputPattern>,
    pub(crate) guard: Option<GuardFn>,
    pub(crate) outputs: Vec<OutputPattern>,
    pub(crate) body: Option<BodyFn>,
    pub(crate) retry: bool,
    pub(crate) singleton: bool,
}

impl Reaction {
    pub fn new(inputs: impl IntoIterator<Item = InputPattern>) -> Self {
        Reaction {
            inputs: inputs.into_iter().collect(),
            guard: None,
            outputs: Vec::new(),
            body: None,
            retry: false,
            singleton: false,
        }
    }

    /// A singleton initializer: no inputs, runs exactly once when
    /// activation succeeds, used to seed the soup.
    pub fn initializer(body: impl Fn() + Send + Sync + 'static) -> Self {
        Reaction {
            inputs: Vec::new(),
            guard: None,
            outputs: Vec::new(),
            body: Some(Arc::new(move |_| body())),
            retry: false,
            singleton: true,
        }
    }

    pub fn guard(mut self, guard: impl for<'a> Fn(&BindingsRef<'a>) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Declare the molecules the body emits, for static analysis.
    pub fn emits(mut self, outputs: impl IntoIterator<Item = OutputPattern>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Re-emit the consumed inputs if the body faults.
    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    pub fn body(mut self, body: impl Fn(&mut Bindings) + Send + Sync + 'static) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    pub(crate) fn freeze(self) -> ReactionDescriptor {
        let display = display_inputs(&self.inputs);
        let source_hash = source_hash(&self);
        ReactionDescriptor {
            inputs: self.inputs,
            guard: self.guard,
            outputs: self.outputs,
            body: self.body.unwrap_or_else(|| Arc::new(|_| {})),
            retry: self.retry,
            singleton: self.singleton,
            display,
            source_hash,
        }
    }
}

/// A frozen reaction, immutable for the lifetime of its join definition.
pub(crate) struct ReactionDescriptor {
    pub inputs: Vec<InputPattern>,
    pub guard: Option<GuardFn>,
    pub outputs: Vec<OutputPattern>,
    pub body: BodyFn,
    pub retry: bool,
    pub singleton: bool,
    /// Input signature in declared order, e.g. `a + b`.
    pub display: String,
    pub source_hash: [u8; 32],
}

impl ReactionDescriptor {
    pub fn display_outputs(&self) -> String {
        if self.outputs.is_empty() {
            "...".to_string()
        } else {
            self.outputs
                .iter()
                .map(|o| o.molecule.name().to_string())
                .collect::<Vec<_>>()
                .join(" + ")
        }
    }

    /// Short hex prefix of the source hash, for log correlation.
    pub fn source_hash_hex(&self) -> String {
        self.source_hash[..4]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Input molecule names, sorted, for the join signature.
    pub fn sorted_input_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inputs.iter().map(|p| p.molecule.name()).collect();
        names.sort_unstable();
        names
    }
}

fn display_inputs(inputs: &[InputPattern]) -> String {
    if inputs.is_empty() {
        return "(no inputs)".to_string();
    }
    inputs
        .iter()
        .map(|p| p.molecule.name().to_string())
        .collect::<Vec<_>>()
        .join(" + ")
}

fn source_hash(reaction: &Reaction) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for input in &reaction.inputs {
        hasher.update(input.molecule.name().as_bytes());
        hasher.update([0u8]);
        match input.matcher.content_hash() {
            Some(h) => hasher.update(h),
            None => hasher.update(b"opaque"),
        }
    }
    hasher.update([if reaction.guard.is_some() { 1u8 } else { 0u8 }]);
    for output in &reaction.outputs {
        hasher.update(output.molecule.name().as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}
