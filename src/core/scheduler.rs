//! The decision engine.
//!
//! Every emission inserts under the junction mutex and queues a decision
//! pass on the decision pool. A pass selects at most one reaction: it walks
//! the reaction list from a rotating start index, searches for a candidate
//! tuple per reaction with backtracking (fair random offsets inside each
//! molecule's candidates, short-circuiting on the first impossible slot),
//! and on success removes the tuple, releases the mutex, and hands the body
//! to the reaction pool. The pass then requeues itself, since the remaining
//! soup may enable another reaction.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::core::error::EmitError;
use crate::core::junction::{DecisionState, JunctionCore};
use crate::core::molecule::MoleculeId;
use crate::core::reaction::{Bindings, BindingsRef, ReactionDescriptor};
use crate::core::soup::{MoleculeBag, Stored};
use crate::core::value::Value;
use crate::pool::fixed::panic_message;

/// One selected reaction and the tuple it consumed, mutex already released.
pub(crate) struct Fired {
    reaction: usize,
    consumed: Vec<Stored>,
}

/// Insert an emitted value and trigger matching.
///
/// The mutex is held across the pool submission so a rejected submission can
/// take the value back out: emission is fail-fast, never a silent drop.
pub(crate) fn on_emit(
    core: &Arc<JunctionCore>,
    id: &MoleculeId,
    stored: Stored,
) -> Result<(), EmitError> {
    if !core.is_accepting() {
        return Err(EmitError::ShuttingDown {
            molecule: id.name().to_string(),
        });
    }
    let mut state = core.lock_state();
    state.soup.insert(id.clone(), stored);
    if let Err(err) = schedule_pass(core) {
        state.soup.remove_last(id);
        tracing::error!(
            junction = %core.site(),
            molecule = %id.name(),
            error = %err,
            "emission rejected: decision pool refused the pass"
        );
        return Err(EmitError::Pool(err));
    }
    drop(state);
    core.stats().emissions.fetch_add(1, Ordering::Relaxed);
    if core.log_level() >= 2 {
        tracing::debug!(junction = %core.site(), molecule = %id.name(), "molecule emitted");
    }
    Ok(())
}

pub(crate) fn schedule_pass(core: &Arc<JunctionCore>) -> Result<(), crate::pool::PoolError> {
    let c = Arc::clone(core);
    core.decision_pool()
        .submit(Box::new(move || decision_pass(&c)))
}

/// One matching pass over the junction. Runs on the decision pool.
pub(crate) fn decision_pass(core: &Arc<JunctionCore>) {
    core.stats().passes.fetch_add(1, Ordering::Relaxed);
    let fired = {
        let mut state = core.lock_state();
        try_select(core, &mut state)
    };
    let Some(fired) = fired else {
        return;
    };
    core.stats().fired.fetch_add(1, Ordering::Relaxed);

    // The payload is shared with the task so a pool rejection can reclaim
    // the consumed molecules instead of dropping them.
    let payload = Arc::new(Mutex::new(Some(fired)));
    let task_payload = Arc::clone(&payload);
    let task_core = Arc::clone(core);
    let submitted = core.reaction_pool().submit(Box::new(move || {
        let fired = task_payload.lock().expect("reaction payload lock").take();
        if let Some(fired) = fired {
            run_reaction(&task_core, fired);
        }
    }));
    if let Err(err) = submitted {
        if let Some(fired) = payload.lock().expect("reaction payload lock").take() {
            tracing::error!(
                junction = %core.site(),
                error = %err,
                "reaction pool rejected a selected reaction; returning its molecules to the soup"
            );
            reinsert(core, fired.reaction, fired.consumed);
        }
        return;
    }
    // More reactions may be enabled by what is left.
    if let Err(err) = schedule_pass(core) {
        tracing::debug!(junction = %core.site(), error = %err, "follow-up pass not scheduled");
    }
}

/// Under the mutex: pick one enabled reaction and remove its tuple.
fn try_select(core: &Arc<JunctionCore>, state: &mut DecisionState) -> Option<Fired> {
    let reactions = core.reactions();
    let n = reactions.len();
    let start = state.next_reaction;
    for k in 0..n {
        let ri = (start + k) % n;
        let desc = &reactions[ri];
        if desc.inputs.is_empty() {
            continue;
        }
        if let Some(chosen) = find_tuple(desc, &state.soup, &mut state.rng) {
            // Rotate so an equally enabled neighbor goes first next pass.
            state.next_reaction = (ri + 1) % n;
            let consumed = state.soup.remove_tuple(&chosen);
            if core.log_level() >= 2 {
                tracing::debug!(junction = %core.site(), reaction = %desc.display, "reaction selected");
            }
            return Some(Fired {
                reaction: ri,
                consumed,
            });
        }
    }
    None
}

/// Find one candidate per input such that all matchers and the guard hold.
///
/// Candidates for each slot are collected once, rotated by a random offset
/// for fairness, then combined by depth-first search. Two slots on the same
/// molecule never take the same candidate.
fn find_tuple(
    desc: &ReactionDescriptor,
    soup: &MoleculeBag,
    rng: &mut impl Rng,
) -> Option<Vec<(MoleculeId, usize)>> {
    let mut candidates: Vec<Vec<usize>> = Vec::with_capacity(desc.inputs.len());
    for input in &desc.inputs {
        let population = soup.count(&input.molecule);
        if population == 0 {
            return None;
        }
        let offset = rng.random_range(0..population);
        let hits = soup.select(&input.molecule, offset, |stored| {
            if input.matcher.is_reply_binder() && stored.slot.is_none() {
                return false;
            }
            input.matcher.admits(&stored.value)
        });
        if hits.is_empty() {
            return None;
        }
        candidates.push(hits);
    }

    let mut chosen: Vec<(MoleculeId, usize)> = Vec::with_capacity(desc.inputs.len());
    if search(desc, &candidates, 0, &mut chosen, soup) {
        Some(chosen)
    } else {
        None
    }
}

fn search(
    desc: &ReactionDescriptor,
    candidates: &[Vec<usize>],
    depth: usize,
    chosen: &mut Vec<(MoleculeId, usize)>,
    soup: &MoleculeBag,
) -> bool {
    if depth == desc.inputs.len() {
        return guard_accepts(desc, chosen, soup);
    }
    let molecule = &desc.inputs[depth].molecule;
    for &index in &candidates[depth] {
        let taken = chosen
            .iter()
            .any(|(m, i)| m == molecule && *i == index);
        if taken {
            continue;
        }
        chosen.push((molecule.clone(), index));
        if search(desc, candidates, depth + 1, chosen, soup) {
            return true;
        }
        chosen.pop();
    }
    false
}

fn guard_accepts(
    desc: &ReactionDescriptor,
    chosen: &[(MoleculeId, usize)],
    soup: &MoleculeBag,
) -> bool {
    let Some(guard) = &desc.guard else {
        return true;
    };
    let values: Vec<&Value> = chosen
        .iter()
        .map(|(m, i)| &soup.get(m, *i).expect("chosen candidate present").value)
        .collect();
    guard(&BindingsRef::new(&values))
}

/// Execute a reaction body on the reaction pool and settle its aftermath:
/// reply-protocol enforcement, fault handling per the retry flag, and the
/// follow-up decision pass.
fn run_reaction(core: &Arc<JunctionCore>, fired: Fired) {
    let desc = &core.reactions()[fired.reaction];
    let retry_copies: Option<Vec<Stored>> = desc
        .retry
        .then(|| fired.consumed.iter().map(Stored::retry_copy).collect());

    let (mut bindings, reply_slots, expired) = Bindings::from_consumed(&desc.inputs, fired.consumed);
    let result = catch_unwind(AssertUnwindSafe(|| (desc.body)(&mut bindings)));
    // Reply handles do not survive the body; late replies are no-ops.
    expired.store(true, Ordering::Release);

    match result {
        Ok(()) => {
            core.stats().completed.fetch_add(1, Ordering::Relaxed);
            for slot in &reply_slots {
                if slot.is_pending() {
                    tracing::error!(
                        junction = %core.site(),
                        reaction = %desc.display,
                        "reaction finished without replying to a consumed blocking molecule"
                    );
                    slot.fail("reaction finished without replying");
                }
            }
        }
        Err(panic) => {
            let fault = panic_message(&panic);
            core.stats().faults.fetch_add(1, Ordering::Relaxed);
            if let Some(copies) = retry_copies {
                core.stats().retries.fetch_add(1, Ordering::Relaxed);
                if core.log_level() >= 1 {
                    tracing::warn!(
                        junction = %core.site(),
                        reaction = %desc.display,
                        error = %fault,
                        "reaction faulted; re-emitting its consumed molecules"
                    );
                }
                reinsert(core, fired.reaction, copies);
            } else {
                tracing::error!(
                    junction = %core.site(),
                    reaction = %desc.display,
                    error = %fault,
                    "reaction faulted; consumed molecules discarded"
                );
                for slot in &reply_slots {
                    slot.fail(&format!("reaction faulted: {fault}"));
                }
            }
        }
    }

    if let Err(err) = schedule_pass(core) {
        tracing::debug!(junction = %core.site(), error = %err, "post-reaction pass not scheduled");
    }
}

/// Put a consumed tuple back (retry, or a rejected body submission) and
/// trigger matching again.
fn reinsert(core: &Arc<JunctionCore>, reaction: usize, consumed: Vec<Stored>) {
    let desc = &core.reactions()[reaction];
    {
        let mut state = core.lock_state();
        for (pattern, stored) in desc.inputs.iter().zip(consumed) {
            state.soup.insert(pattern.molecule.clone(), stored);
        }
    }
    if let Err(err) = schedule_pass(core) {
        tracing::debug!(junction = %core.site(), error = %err, "post-reinsert pass not scheduled");
    }
}
