//! Input matchers and their comparison order.
//!
//! A matcher decides whether one candidate value from the soup is acceptable
//! for one input slot of a reaction. `Arbitrary` carries a user predicate
//! over the erased value; `Constant` carries the expected value itself and
//! compares structurally.
//!
//! Matchers carry a stable content hash where one can be computed. The
//! static analyzer compares matchers across reactions through these hashes;
//! a matcher without a hash is never considered weaker-or-equal to another,
//! which keeps the analysis conservative (no false positives).

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::core::value::{Molecular, Value};

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub struct Matcher {
    kind: MatcherKind,
    hash: Option<[u8; 32]>,
}

pub(crate) enum MatcherKind {
    /// Matches anything, binds nothing.
    Wildcard,
    /// Matches anything, binds the value.
    SimpleVar,
    /// Matches structurally equal values.
    Constant(Value),
    /// Matches values the predicate accepts.
    Arbitrary(Predicate),
    /// Matches a blocking molecule with a live reply slot; binds value and
    /// reply handle.
    ReplyBinder,
}

impl Matcher {
    pub fn wildcard() -> Self {
        Matcher {
            kind: MatcherKind::Wildcard,
            hash: Some(tag_hash(&["wildcard"])),
        }
    }

    pub fn simple_var() -> Self {
        Matcher {
            kind: MatcherKind::SimpleVar,
            hash: Some(tag_hash(&["var"])),
        }
    }

    pub fn constant(expected: impl Molecular) -> Self {
        let expected = Value::new(expected);
        let hash = tag_hash(&["constant", &format!("{expected:?}")]);
        Matcher {
            kind: MatcherKind::Constant(expected),
            hash: Some(hash),
        }
    }

    /// A predicate matcher the analyzer cannot compare to anything.
    pub fn arbitrary(pred: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Matcher {
            kind: MatcherKind::Arbitrary(Arc::new(pred)),
            hash: None,
        }
    }

    /// A predicate matcher with a caller-supplied identity tag. Two tagged
    /// matchers with equal tags are treated as the same matcher by the
    /// analyzer.
    pub fn arbitrary_tagged(
        pred: impl Fn(&Value) -> bool + Send + Sync + 'static,
        tag: &str,
    ) -> Self {
        Matcher {
            kind: MatcherKind::Arbitrary(Arc::new(pred)),
            hash: Some(tag_hash(&["arbitrary", tag])),
        }
    }

    pub fn reply_binder() -> Self {
        Matcher {
            kind: MatcherKind::ReplyBinder,
            hash: Some(tag_hash(&["reply"])),
        }
    }

    pub(crate) fn admits(&self, value: &Value) -> bool {
        match &self.kind {
            MatcherKind::Wildcard | MatcherKind::SimpleVar | MatcherKind::ReplyBinder => true,
            MatcherKind::Constant(expected) => expected.structural_eq(value),
            MatcherKind::Arbitrary(pred) => pred(value),
        }
    }

    /// True when the matcher accepts every value of its molecule.
    pub(crate) fn is_infallible(&self) -> bool {
        matches!(
            self.kind,
            MatcherKind::Wildcard | MatcherKind::SimpleVar | MatcherKind::ReplyBinder
        )
    }

    pub(crate) fn is_reply_binder(&self) -> bool {
        matches!(self.kind, MatcherKind::ReplyBinder)
    }

    pub(crate) fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            MatcherKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn content_hash(&self) -> Option<[u8; 32]> {
        self.hash
    }

    /// Whether `self` matches every value `other` matches, as far as the
    /// analyzer can tell. Infallible matchers are weaker than everything;
    /// fallible ones compare only through equal content hashes.
    pub(crate) fn weaker_or_equal(&self, other: &Matcher) -> bool {
        if self.is_infallible() {
            return true;
        }
        match (&self.kind, &other.kind) {
            (MatcherKind::Constant(a), MatcherKind::Constant(b)) => a.structural_eq(b),
            _ => match (self.hash, other.hash) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MatcherKind::Wildcard => f.write_str("_"),
            MatcherKind::SimpleVar => f.write_str("var"),
            MatcherKind::Constant(v) => write!(f, "={v:?}"),
            MatcherKind::Arbitrary(_) => f.write_str("pred"),
            MatcherKind::ReplyBinder => f.write_str("var/reply"),
        }
    }
}

fn tag_hash(parts: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_matches_structurally() {
        let m = Matcher::constant(5i64);
        assert!(m.admits(&Value::new(5i64)));
        assert!(!m.admits(&Value::new(6i64)));
        assert!(!m.admits(&Value::new(5i32)));
    }

    #[test]
    fn arbitrary_runs_the_predicate() {
        let even = Matcher::arbitrary(|v| v.downcast_ref::<i64>().is_some_and(|n| n % 2 == 0));
        assert!(even.admits(&Value::new(4i64)));
        assert!(!even.admits(&Value::new(3i64)));
        assert!(!even.admits(&Value::new("four".to_string())));
    }

    #[test]
    fn infallible_is_weaker_than_everything() {
        let var = Matcher::simple_var();
        assert!(var.weaker_or_equal(&Matcher::constant(1i64)));
        assert!(var.weaker_or_equal(&Matcher::arbitrary(|_| false)));
        assert!(Matcher::wildcard().weaker_or_equal(&var));
    }

    #[test]
    fn constants_compare_by_value() {
        assert!(Matcher::constant(1i64).weaker_or_equal(&Matcher::constant(1i64)));
        assert!(!Matcher::constant(1i64).weaker_or_equal(&Matcher::constant(2i64)));
        assert!(!Matcher::constant(1i64).weaker_or_equal(&Matcher::simple_var()));
    }

    #[test]
    fn untagged_arbitrary_is_incomparable() {
        let a = Matcher::arbitrary(|_| true);
        let b = Matcher::arbitrary(|_| true);
        assert!(!a.weaker_or_equal(&b));
        let t1 = Matcher::arbitrary_tagged(|_| true, "positive");
        let t2 = Matcher::arbitrary_tagged(|_| true, "positive");
        assert!(t1.weaker_or_equal(&t2));
    }
}
