//! Activation-time static analysis of a reaction list.
//!
//! Runs once, before any molecule is bound. Configuration defects and
//! unavoidable-indeterminism/livelock findings are fatal; possible-livelock
//! and possible-deadlock findings are returned as warnings.
//!
//! Matcher comparisons go through content hashes and structural equality
//! only; anything the analyzer cannot compare is treated as "not known
//! weaker", so every reported finding is real even though some real
//! findings go unreported.

use std::fmt;

use crate::core::error::ConfigurationError;
use crate::core::reaction::{InputPattern, OutputPattern, ReactionDescriptor};

/// Analyzer verdict for one activation.
#[derive(Clone, Debug, Default)]
pub struct AnalysisReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    /// The join signature the findings are about.
    pub site: String,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} error(s), {} warning(s)",
            self.site,
            self.errors.len(),
            self.warnings.len()
        )
    }
}

/// Shape checks that make a reaction list unconditionally invalid.
pub(crate) fn check_configuration(
    descriptors: &[ReactionDescriptor],
) -> Result<(), ConfigurationError> {
    for desc in descriptors {
        if desc.inputs.is_empty() && !desc.singleton {
            return Err(ConfigurationError::EmptyInputs {
                reaction: desc.display.clone(),
            });
        }
        for input in &desc.inputs {
            if input.molecule.is_blocking() && !input.matcher.is_reply_binder() {
                return Err(ConfigurationError::MissingReplyBinder {
                    reaction: desc.display.clone(),
                    molecule: input.molecule.name().to_string(),
                });
            }
            if !input.molecule.is_blocking() && input.matcher.is_reply_binder() {
                return Err(ConfigurationError::ReplyBinderOnNonBlocking {
                    reaction: desc.display.clone(),
                    molecule: input.molecule.name().to_string(),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn analyze(descriptors: &[ReactionDescriptor], site: &str) -> AnalysisReport {
    let mut report = AnalysisReport {
        warnings: Vec::new(),
        errors: Vec::new(),
        site: site.to_string(),
    };
    check_shadowing(descriptors, site, &mut report);
    check_livelock(descriptors, site, &mut report);
    check_deadlock(descriptors, &mut report);
    report
}

/// Reaction A shadows reaction B when every soup state enabling B also
/// enables A: A has no guard and each of A's inputs pairs with a distinct
/// input of B on the same molecule with a weaker-or-equal matcher. The
/// choice between them is then forever nondeterministic.
fn check_shadowing(descriptors: &[ReactionDescriptor], site: &str, report: &mut AnalysisReport) {
    for (bi, shadowed) in descriptors.iter().enumerate() {
        if shadowed.singleton {
            continue;
        }
        let mut shadowers: Vec<&str> = Vec::new();
        for (ai, candidate) in descriptors.iter().enumerate() {
            if ai == bi || candidate.singleton || candidate.guard.is_some() {
                continue;
            }
            if pair_inputs(&candidate.inputs, &shadowed.inputs, |a, b| {
                a.molecule == b.molecule && a.matcher.weaker_or_equal(&b.matcher)
            }) {
                shadowers.push(&candidate.display);
            }
        }
        if !shadowers.is_empty() {
            report.errors.push(format!(
                "In {site}: Unavoidable indeterminism: reaction {} is shadowed by {}",
                shadowed.display,
                shadowers.join("; ")
            ));
        }
    }
}

/// A reaction whose outputs re-enable its own inputs loops forever once it
/// fires. With only infallible or constant-covered inputs and no guard the
/// loop is certain; otherwise it is merely possible.
fn check_livelock(descriptors: &[ReactionDescriptor], site: &str, report: &mut AnalysisReport) {
    let mut unavoidable: Vec<&str> = Vec::new();
    for desc in descriptors {
        if desc.singleton || desc.inputs.is_empty() {
            continue;
        }
        let self_enabling = pair_inputs_into_outputs(desc, false);
        if !self_enabling {
            continue;
        }
        let certain =
            desc.guard.is_none() && pair_inputs_into_outputs(desc, true);
        if certain {
            unavoidable.push(&desc.display);
        } else {
            report.warnings.push(format!(
                "Possible livelock: reaction {} => {}",
                desc.display,
                desc.display_outputs()
            ));
        }
    }
    match unavoidable.as_slice() {
        [] => {}
        [one] => report
            .errors
            .push(format!("In {site}: Unavoidable livelock: reaction {one}")),
        many => report.errors.push(format!(
            "In {site}: Unavoidable livelock: reactions {}",
            many.join(", ")
        )),
    }
}

/// Inputs pair into outputs by molecule. With `strict`, each pairing must
/// also be certain to re-enable: an infallible input matcher, or a constant
/// input covered by an equal constant output.
fn pair_inputs_into_outputs(desc: &ReactionDescriptor, strict: bool) -> bool {
    pair_slots(&desc.inputs, &desc.outputs, |input, output| {
        if input.molecule != output.molecule {
            return false;
        }
        if !strict {
            return true;
        }
        if input.matcher.is_infallible() {
            return true;
        }
        match (input.matcher.constant_value(), &output.constant) {
            (Some(expected), Some(emitted)) => expected.structural_eq(emitted),
            _ => false,
        }
    })
}

/// A reaction that emits a blocking molecule parks there until the reply;
/// molecules it would emit afterwards are not in the soup yet. If the
/// blocked molecule's consumer needs one of them, nothing can move.
fn check_deadlock(descriptors: &[ReactionDescriptor], report: &mut AnalysisReport) {
    for desc in descriptors {
        for (bi, blocker) in desc.outputs.iter().enumerate() {
            if !blocker.molecule.is_blocking() {
                continue;
            }
            let starved: Vec<&OutputPattern> = desc.outputs[bi + 1..]
                .iter()
                .filter(|later| !later.molecule.is_blocking())
                .collect();
            if starved.is_empty() {
                continue;
            }
            let needs_later = |consumer: &ReactionDescriptor| {
                consumer
                    .inputs
                    .iter()
                    .any(|input| input.molecule == blocker.molecule)
                    && starved.iter().any(|later| {
                        consumer
                            .inputs
                            .iter()
                            .any(|input| input.molecule == later.molecule)
                    })
            };
            // The consumer may live in this activation or in the junction
            // the blocking molecule is already bound to.
            let endangered = match blocker.molecule.binding() {
                Some(owner) => owner.reactions().iter().any(needs_later),
                None => descriptors.iter().any(needs_later),
            };
            if endangered {
                let warning = format!(
                    "Possible deadlock: molecule {} may deadlock due to outputs of {}",
                    blocker.molecule.name(),
                    desc.display
                );
                if !report.warnings.contains(&warning) {
                    report.warnings.push(warning);
                }
            }
        }
    }
}

/// Injective pairing over two slot lists: every `from` element must claim a
/// distinct `into` element accepted by `ok`. Backtracking; lists are small.
fn pair_inputs(
    from: &[InputPattern],
    into: &[InputPattern],
    ok: impl Fn(&InputPattern, &InputPattern) -> bool,
) -> bool {
    pair_slots(from, into, ok)
}

fn pair_slots<A, B>(from: &[A], into: &[B], ok: impl Fn(&A, &B) -> bool) -> bool {
    fn go<A, B>(
        from: &[A],
        into: &[B],
        ok: &impl Fn(&A, &B) -> bool,
        depth: usize,
        used: &mut Vec<bool>,
    ) -> bool {
        if depth == from.len() {
            return true;
        }
        for (i, candidate) in into.iter().enumerate() {
            if used[i] || !ok(&from[depth], candidate) {
                continue;
            }
            used[i] = true;
            if go(from, into, ok, depth + 1, used) {
                return true;
            }
            used[i] = false;
        }
        false
    }
    if from.len() > into.len() {
        return false;
    }
    let mut used = vec![false; into.len()];
    go(from, into, &ok, 0, &mut used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::molecule::{blocking, molecule};
    use crate::core::reaction::Reaction;

    fn freeze(reactions: Vec<Reaction>) -> Vec<ReactionDescriptor> {
        reactions.into_iter().map(Reaction::freeze).collect()
    }

    #[test]
    fn subset_reaction_shadows_superset() {
        let a = molecule::<i64>("a");
        let b = molecule::<i64>("b");
        let descs = freeze(vec![
            Reaction::new([a.wildcard()]),
            Reaction::new([a.wildcard(), b.wildcard()]),
        ]);
        let report = analyze(&descs, "Join{a; a + b}");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Unavoidable indeterminism"));
        assert!(report.errors[0].contains("reaction a + b is shadowed by a"));
    }

    #[test]
    fn guard_on_shadower_suppresses_the_finding() {
        let a = molecule::<i64>("a");
        let b = molecule::<i64>("b");
        let descs = freeze(vec![
            Reaction::new([a.consume()]).guard(|bound| *bound.value::<i64>(0) > 0),
            Reaction::new([a.consume(), b.consume()]),
        ]);
        let report = analyze(&descs, "Join{a; a + b}");
        assert!(report.errors.is_empty());
    }

    #[test]
    fn stronger_matcher_does_not_shadow() {
        let a = molecule::<i64>("a");
        let b = molecule::<i64>("b");
        // `a(=1)` does not enable whenever `a(var) + b(var)` does.
        let descs = freeze(vec![
            Reaction::new([a.eq(1)]),
            Reaction::new([a.consume(), b.consume()]),
        ]);
        let report = analyze(&descs, "Join{a; a + b}");
        assert!(report.errors.is_empty());
    }

    #[test]
    fn identical_reactions_shadow_both_ways() {
        let a = molecule::<i64>("a");
        let descs = freeze(vec![
            Reaction::new([a.consume()]),
            Reaction::new([a.consume()]),
        ]);
        let report = analyze(&descs, "Join{a; a}");
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn self_reenabling_reaction_is_unavoidable_livelock() {
        let a = molecule::<i64>("a");
        let b = molecule::<i64>("b");
        let descs = freeze(vec![
            Reaction::new([a.eq(1), b.wildcard()]).emits([
                b.output_value(1),
                b.output_value(2),
                a.output_value(1),
            ]),
        ]);
        let report = analyze(&descs, "Join{a + b}");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Unavoidable livelock: reaction a + b"));
    }

    #[test]
    fn guard_downgrades_livelock_to_warning() {
        let a = molecule::<i64>("a");
        let descs = freeze(vec![
            Reaction::new([a.consume()])
                .guard(|bound| *bound.value::<i64>(0) > 0)
                .emits([a.output()]),
        ]);
        let report = analyze(&descs, "Join{a}");
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Possible livelock: reaction a => a"));
    }

    #[test]
    fn constant_input_needs_matching_constant_output() {
        let a = molecule::<i64>("a");
        // Emits a(2) but consumes a(=1): the loop is not certain.
        let descs = freeze(vec![Reaction::new([a.eq(1)]).emits([a.output_value(2)])]);
        let report = analyze(&descs, "Join{a}");
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn non_reenabling_outputs_are_quiet() {
        let a = molecule::<i64>("a");
        let b = molecule::<i64>("b");
        let descs = freeze(vec![Reaction::new([a.consume()]).emits([b.output()])]);
        let report = analyze(&descs, "Join{a}");
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn blocking_before_needed_molecule_warns() {
        let f = blocking::<(), i64>("f");
        let a = molecule::<i64>("a");
        let c = molecule::<()>("c");
        let descs = freeze(vec![
            Reaction::new([f.consume_with_reply(), a.consume()]),
            Reaction::new([c.wildcard()]).emits([f.output(), a.output()]),
        ]);
        let report = analyze(&descs, "Join{a + f; c}");
        assert_eq!(report.warnings.len(), 1);
        assert!(
            report.warnings[0]
                .starts_with("Possible deadlock: molecule f may deadlock due to outputs of c")
        );
    }

    #[test]
    fn emission_order_decides_the_deadlock_warning() {
        let f = blocking::<(), i64>("f");
        let a = molecule::<i64>("a");
        let c = molecule::<()>("c");
        // `a` is emitted before the blocking `f`: the consumer can fire.
        let descs = freeze(vec![
            Reaction::new([f.consume_with_reply(), a.consume()]),
            Reaction::new([c.wildcard()]).emits([a.output(), f.output()]),
        ]);
        let report = analyze(&descs, "Join{a + f; c}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn configuration_rejects_blocking_without_reply_binder() {
        let f = blocking::<(), i64>("f");
        let raw = crate::core::reaction::InputPattern::new(
            f.id().clone(),
            crate::core::matcher::Matcher::simple_var(),
        );
        let descs = freeze(vec![Reaction::new([raw])]);
        let err = check_configuration(&descs).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingReplyBinder { .. }
        ));
    }

    #[test]
    fn configuration_rejects_empty_non_singleton() {
        let descs = freeze(vec![Reaction::new([])]);
        let err = check_configuration(&descs).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyInputs { .. }));
    }
}
