//! Core chemical-machine types.
//!
//! Module hierarchy follows type dependency order:
//! - value: the erased payload cell
//! - matcher: per-slot admission + the analyzer's comparison order
//! - reply: the blocking rendezvous
//! - soup: the pending-molecule multiset
//! - reaction: descriptors, builder, binding environments
//! - molecule: identity + typed injectors
//! - analyzer: activation-time static checks
//! - junction: the binding unit owning soup, reactions, and pools
//! - scheduler: the decision engine

pub mod analyzer;
pub mod error;
pub mod junction;
pub mod matcher;
pub mod molecule;
pub mod reaction;
pub mod reply;
pub(crate) mod scheduler;
pub(crate) mod soup;
pub mod value;

pub use analyzer::AnalysisReport;
pub use error::{ActivationError, ConfigurationError, EmitError, RequestError};
pub use junction::{Junction, StatsSnapshot, activate, activate_with};
pub use matcher::Matcher;
pub use molecule::{BlockingMolecule, Molecule, MoleculeId, blocking, molecule};
pub use reaction::{Bindings, BindingsRef, InputPattern, OutputPattern, Reaction};
pub use reply::ReplyHandle;
pub use value::{Molecular, Value};
