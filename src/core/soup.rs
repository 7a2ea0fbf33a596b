//! The soup: a multiset of pending molecule values.
//!
//! Owned by a join definition and touched only while that definition's
//! decision mutex is held, so nothing here synchronizes. Selection among
//! equally eligible candidates starts from a caller-supplied offset; the
//! scheduler randomizes it so no candidate is structurally favored.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::molecule::MoleculeId;
use crate::core::reply::ReplySlot;
use crate::core::value::Value;

/// One pending molecule value, paired with its reply slot when blocking.
pub(crate) struct Stored {
    pub value: Value,
    pub slot: Option<Arc<ReplySlot>>,
}

impl Stored {
    /// Copy for retry re-emission: the value is cloned, the reply slot is
    /// shared so the original emitter still gets its reply.
    pub(crate) fn retry_copy(&self) -> Stored {
        Stored {
            value: self.value.clone_value(),
            slot: self.slot.clone(),
        }
    }
}

#[derive(Default)]
pub(crate) struct MoleculeBag {
    contents: HashMap<MoleculeId, Vec<Stored>>,
}

impl MoleculeBag {
    pub fn insert(&mut self, id: MoleculeId, stored: Stored) {
        self.contents.entry(id).or_default().push(stored);
    }

    pub fn count(&self, id: &MoleculeId) -> usize {
        self.contents.get(id).map_or(0, Vec::len)
    }

    /// Indices of candidates satisfying `pred`, scanned from `offset` and
    /// wrapping, so repeated selection rotates over equivalent values.
    pub fn select(
        &self,
        id: &MoleculeId,
        offset: usize,
        mut pred: impl FnMut(&Stored) -> bool,
    ) -> Vec<usize> {
        let Some(values) = self.contents.get(id) else {
            return Vec::new();
        };
        let n = values.len();
        let mut hits = Vec::new();
        for k in 0..n {
            let i = (offset + k) % n;
            if pred(&values[i]) {
                hits.push(i);
            }
        }
        hits
    }

    pub fn get(&self, id: &MoleculeId, index: usize) -> Option<&Stored> {
        self.contents.get(id).and_then(|values| values.get(index))
    }

    /// Remove a chosen tuple. Indices are per-molecule positions returned by
    /// `select`; removal is ordered so earlier removals do not displace
    /// later ones.
    pub fn remove_tuple(&mut self, chosen: &[(MoleculeId, usize)]) -> Vec<Stored> {
        let mut out: Vec<Option<Stored>> = (0..chosen.len()).map(|_| None).collect();
        // Group per molecule, remove highest index first.
        let mut order: Vec<usize> = (0..chosen.len()).collect();
        order.sort_by(|&a, &b| chosen[b].1.cmp(&chosen[a].1));
        for slot in order {
            let (id, index) = &chosen[slot];
            let values = self.contents.get_mut(id).expect("molecule present");
            out[slot] = Some(values.swap_remove(*index));
            if values.is_empty() {
                self.contents.remove(id);
            }
        }
        out.into_iter().map(|s| s.expect("tuple removed")).collect()
    }

    /// Remove the most recently inserted value of `id`. Used to roll an
    /// emission back when its decision pass cannot be scheduled.
    pub fn remove_last(&mut self, id: &MoleculeId) -> Option<Stored> {
        let values = self.contents.get_mut(id)?;
        let out = values.pop();
        if values.is_empty() {
            self.contents.remove(id);
        }
        out
    }

    /// Sorted `name(value)` listing for the diagnostic string.
    pub fn listing(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .contents
            .iter()
            .flat_map(|(id, values)| {
                values
                    .iter()
                    .map(move |stored| format!("{}({:?})", id.name(), stored.value))
            })
            .collect();
        lines.sort();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::molecule::molecule;

    fn plain(v: i64) -> Stored {
        Stored {
            value: Value::new(v),
            slot: None,
        }
    }

    #[test]
    fn insert_count_remove() {
        let m = molecule::<i64>("a");
        let mut bag = MoleculeBag::default();
        bag.insert(m.id().clone(), plain(1));
        bag.insert(m.id().clone(), plain(2));
        assert_eq!(bag.count(m.id()), 2);

        let hits = bag.select(m.id(), 0, |_| true);
        assert_eq!(hits.len(), 2);
        let removed = bag.remove_tuple(&[(m.id().clone(), hits[0])]);
        assert_eq!(removed.len(), 1);
        assert_eq!(bag.count(m.id()), 1);
    }

    #[test]
    fn select_rotates_with_offset() {
        let m = molecule::<i64>("a");
        let mut bag = MoleculeBag::default();
        for v in 0..4 {
            bag.insert(m.id().clone(), plain(v));
        }
        assert_eq!(bag.select(m.id(), 0, |_| true), vec![0, 1, 2, 3]);
        assert_eq!(bag.select(m.id(), 2, |_| true), vec![2, 3, 0, 1]);
    }

    #[test]
    fn select_filters_by_predicate() {
        let m = molecule::<i64>("a");
        let mut bag = MoleculeBag::default();
        for v in 0..6 {
            bag.insert(m.id().clone(), plain(v));
        }
        let evens = bag.select(m.id(), 3, |s| {
            s.value.downcast_ref::<i64>().is_some_and(|n| n % 2 == 0)
        });
        assert_eq!(evens.len(), 3);
        for i in evens {
            let v = bag.get(m.id(), i).unwrap().value.downcast_ref::<i64>();
            assert_eq!(v.copied().unwrap() % 2, 0);
        }
    }

    #[test]
    fn removing_two_slots_of_one_molecule() {
        let m = molecule::<i64>("a");
        let mut bag = MoleculeBag::default();
        for v in 0..3 {
            bag.insert(m.id().clone(), plain(v));
        }
        // Indices 0 and 2 of the same molecule: swap_remove order matters.
        let removed = bag.remove_tuple(&[(m.id().clone(), 0), (m.id().clone(), 2)]);
        let mut got: Vec<i64> = removed
            .iter()
            .map(|s| *s.value.downcast_ref::<i64>().unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 2]);
        assert_eq!(bag.count(m.id()), 1);
    }

    #[test]
    fn listing_is_sorted() {
        let a = molecule::<i64>("beta");
        let b = molecule::<i64>("alpha");
        let mut bag = MoleculeBag::default();
        bag.insert(a.id().clone(), plain(1));
        bag.insert(b.id().clone(), plain(2));
        assert_eq!(bag.listing(), vec!["alpha(2)", "beta(1)"]);
    }
}
