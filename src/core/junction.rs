//! Join definitions: the binding unit of the chemical machine.
//!
//! A junction owns its soup, a frozen reaction list, and handles to the two
//! pools its work runs on. One mutex serializes the soup and the decision
//! step. Molecules bind to exactly one junction for their lifetime;
//! activation is all-or-nothing under a process-wide registration lock, so
//! a refused activation leaves every molecule exactly as it was.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::config::Config;
use crate::core::analyzer;
pub use crate::core::analyzer::AnalysisReport;
use crate::core::error::ActivationError;
use crate::core::molecule::MoleculeId;
use crate::core::reaction::{Bindings, Reaction, ReactionDescriptor};
use crate::core::soup::MoleculeBag;
use crate::pool::fixed::panic_message;
use crate::pool::{BlockingAwarePool, FixedPool, ThreadPool};

/// Everything the decision mutex protects.
pub(crate) struct DecisionState {
    pub soup: MoleculeBag,
    /// Rotating start index over the reaction list.
    pub next_reaction: usize,
    pub rng: StdRng,
}

pub(crate) struct JunctionCore {
    site: String,
    site_id: Uuid,
    reactions: Vec<ReactionDescriptor>,
    state: Mutex<DecisionState>,
    decision_pool: Arc<dyn ThreadPool>,
    reaction_pool: Arc<dyn ThreadPool>,
    log_level: AtomicU8,
    accepting: AtomicBool,
    stats: JunctionStats,
}

#[derive(Default)]
pub(crate) struct JunctionStats {
    pub emissions: AtomicU64,
    pub passes: AtomicU64,
    pub fired: AtomicU64,
    pub completed: AtomicU64,
    pub faults: AtomicU64,
    pub retries: AtomicU64,
}

/// Point-in-time counters of a junction's activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub emissions: u64,
    pub passes: u64,
    pub fired: u64,
    pub completed: u64,
    pub faults: u64,
    pub retries: u64,
}

impl JunctionCore {
    pub(crate) fn site(&self) -> &str {
        &self.site
    }

    pub(crate) fn reactions(&self) -> &[ReactionDescriptor] {
        &self.reactions
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DecisionState> {
        self.state.lock().expect("junction decision lock")
    }

    pub(crate) fn decision_pool(&self) -> &Arc<dyn ThreadPool> {
        &self.decision_pool
    }

    pub(crate) fn reaction_pool(&self) -> &Arc<dyn ThreadPool> {
        &self.reaction_pool
    }

    pub(crate) fn stats(&self) -> &JunctionStats {
        &self.stats
    }

    pub(crate) fn log_level(&self) -> u8 {
        self.log_level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_log_level(&self, level: u8) {
        self.log_level.store(level, Ordering::Relaxed);
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// The diagnostic string: join signature, then the soup contents.
    pub(crate) fn log_soup(&self) -> String {
        let listing = self.lock_state().soup.listing();
        if listing.is_empty() {
            format!("{}\nNo molecules", self.site)
        } else {
            format!("{}\nMolecules: {}", self.site, listing.join(", "))
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            emissions: self.stats.emissions.load(Ordering::Relaxed),
            passes: self.stats.passes.load(Ordering::Relaxed),
            fired: self.stats.fired.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            faults: self.stats.faults.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
        }
    }
}

/// An activated join definition.
///
/// Dropping it does not tear anything down: bound molecules keep routing to
/// it for the lifetime of the process, per the single-binding invariant.
pub struct Junction {
    core: Arc<JunctionCore>,
    report: AnalysisReport,
}

impl Junction {
    /// Static-analysis warnings collected at activation.
    pub fn warnings(&self) -> &[String] {
        &self.report.warnings
    }

    pub fn report(&self) -> &AnalysisReport {
        &self.report
    }

    /// The join signature, e.g. `Join{counter + decr; counter + fetch}`.
    pub fn site(&self) -> &str {
        self.core.site()
    }

    pub fn log_soup(&self) -> String {
        self.core.log_soup()
    }

    pub fn set_log_level(&self, level: u8) {
        self.core.set_log_level(level);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.snapshot()
    }

    /// Stop accepting emissions. In-flight reactions drain on their pools;
    /// shared pools are not stopped here.
    pub fn shutdown(&self) {
        self.core.accepting.store(false, Ordering::Release);
        if self.core.log_level() >= 1 {
            tracing::info!(junction = %self.core.site(), "junction shut down");
        }
    }
}

/// Activate a reaction list on the default pools.
pub fn activate(reactions: Vec<Reaction>) -> Result<Junction, ActivationError> {
    let (decision, reaction) = default_pools();
    activate_with(reactions, decision, reaction)
}

/// Activate a reaction list on explicit pools.
///
/// Derives the bound molecule set from the reaction inputs, runs the static
/// analyzer, and publishes the junction only if there is no configuration
/// error, no analysis error, and no molecule already bound elsewhere.
pub fn activate_with(
    reactions: Vec<Reaction>,
    decision_pool: Arc<dyn ThreadPool>,
    reaction_pool: Arc<dyn ThreadPool>,
) -> Result<Junction, ActivationError> {
    if reactions.is_empty() {
        return Err(ActivationError::Config(
            crate::core::error::ConfigurationError::NoReactions,
        ));
    }
    let descriptors: Vec<ReactionDescriptor> =
        reactions.into_iter().map(Reaction::freeze).collect();
    let site = join_signature(&descriptors);

    analyzer::check_configuration(&descriptors)?;
    let report = analyzer::analyze(&descriptors, &site);
    if !report.errors.is_empty() {
        return Err(ActivationError::Rejected(report));
    }

    let bound = bound_molecules(&descriptors);
    let config = config();
    let rng = match config.limits.scheduler_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let core = Arc::new(JunctionCore {
        site,
        site_id: Uuid::new_v4(),
        reactions: descriptors,
        state: Mutex::new(DecisionState {
            soup: MoleculeBag::default(),
            next_reaction: 0,
            rng,
        }),
        decision_pool,
        reaction_pool,
        log_level: AtomicU8::new(config.limits.default_log_level),
        accepting: AtomicBool::new(true),
        stats: JunctionStats::default(),
    });

    {
        let _registration = registration_lock().lock().expect("registration lock");
        for id in &bound {
            if let Some(owner) = id.binding() {
                return Err(ActivationError::AlreadyBound {
                    molecule: id.name().to_string(),
                    site: owner.site().to_string(),
                });
            }
        }
        for id in &bound {
            let _ = id.0.bound.set(Arc::clone(&core));
        }
    }

    if core.log_level() >= 1 {
        tracing::info!(
            junction = %core.site(),
            site_id = %core.site_id,
            reactions = core.reactions.len(),
            molecules = bound.len(),
            "join definition activated"
        );
        for warning in &report.warnings {
            tracing::warn!(junction = %core.site(), "{warning}");
        }
    }
    if core.log_level() >= 2 {
        for desc in core.reactions() {
            tracing::debug!(
                junction = %core.site(),
                reaction = %desc.display,
                source = %desc.source_hash_hex(),
                "reaction registered"
            );
        }
    }

    run_initializers(&core);
    Ok(Junction { core, report })
}

/// Singleton initializers run exactly once, on the reaction pool, after the
/// junction is published.
fn run_initializers(core: &Arc<JunctionCore>) {
    for (index, desc) in core.reactions.iter().enumerate() {
        if !desc.singleton {
            continue;
        }
        let pool = Arc::clone(core.reaction_pool());
        let core_for_task = Arc::clone(core);
        let core_for_log = Arc::clone(core);
        let submitted = pool.submit(Box::new(move || {
            let desc = &core_for_task.reactions()[index];
            let (mut bindings, _, _) = Bindings::from_consumed(&[], Vec::new());
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (desc.body)(&mut bindings))) {
                tracing::error!(
                    junction = %core_for_task.site(),
                    error = %panic_message(&panic),
                    "singleton initializer faulted"
                );
            }
        }));
        if let Err(err) = submitted {
            tracing::error!(junction = %core_for_log.site(), error = %err, "singleton initializer rejected");
        }
    }
}

fn bound_molecules(descriptors: &[ReactionDescriptor]) -> Vec<MoleculeId> {
    let mut bound: Vec<MoleculeId> = Vec::new();
    for desc in descriptors {
        for input in &desc.inputs {
            if !bound.contains(&input.molecule) {
                bound.push(input.molecule.clone());
            }
        }
    }
    bound
}

/// `Join{...}`: per reaction, its input molecule names sorted and joined by
/// `" + "`; reactions joined by `"; "` in declaration order. Singleton
/// initializers contribute nothing.
fn join_signature(descriptors: &[ReactionDescriptor]) -> String {
    let parts: Vec<String> = descriptors
        .iter()
        .filter(|d| !d.inputs.is_empty())
        .map(|d| d.sorted_input_names().join(" + "))
        .collect();
    format!("Join{{{}}}", parts.join("; "))
}

fn registration_lock() -> &'static Mutex<()> {
    static REGISTRATION: OnceLock<Mutex<()>> = OnceLock::new();
    REGISTRATION.get_or_init(|| Mutex::new(()))
}

fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(Config::from_env)
}

fn default_pools() -> (Arc<dyn ThreadPool>, Arc<dyn ThreadPool>) {
    static DECISION: OnceLock<Arc<FixedPool>> = OnceLock::new();
    static REACTION: OnceLock<Arc<BlockingAwarePool>> = OnceLock::new();
    let limits = &config().limits;
    let decision = DECISION.get_or_init(|| {
        let pool = match limits.pool_queue_cap {
            0 => FixedPool::new("retort-decision", limits.decision_pool_size),
            cap => FixedPool::with_queue_cap("retort-decision", limits.decision_pool_size, cap),
        };
        Arc::new(pool)
    });
    let reaction = REACTION.get_or_init(|| {
        Arc::new(BlockingAwarePool::with_max_extra(
            "retort-reaction",
            limits.reaction_pool_size,
            limits.max_extra_workers,
        ))
    });
    let decision = Arc::clone(decision);
    let decision: Arc<dyn ThreadPool> = decision;
    let reaction = Arc::clone(reaction);
    let reaction: Arc<dyn ThreadPool> = reaction;
    (decision, reaction)
}
