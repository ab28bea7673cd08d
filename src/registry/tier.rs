//! Slot storage for one priority tier.
//!
//! A tier is an append-only list of job-ID slots. Removing a job leaves a
//! tombstone (`None`) in place so the positions of every other job stay
//! valid; [`Tier::compact`] rebuilds the list without tombstones.

/// Insertion-ordered job slots of a single priority tier.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tier {
    slots: Vec<Option<String>>,
    live: usize,
}

impl Tier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a job at the tail. Returns its slot index.
    pub(crate) fn push(&mut self, job_id: String) -> usize {
        self.slots.push(Some(job_id));
        self.live += 1;
        self.slots.len() - 1
    }

    /// Turns a slot into a tombstone. Returns false if it was already empty.
    pub(crate) fn vacate(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry @ Some(_)) => {
                *entry = None;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Live job IDs in insertion order.
    pub(crate) fn live_ids(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| id.as_deref().map(|id| (slot, id)))
    }

    /// Rebuilds the slot list without tombstones.
    ///
    /// Returns the new slot index of every live job, in order.
    pub(crate) fn compact(&mut self) -> Vec<(String, usize)> {
        let old = std::mem::take(&mut self.slots);
        self.slots = old.into_iter().flatten().map(Some).collect();
        self.live = self.slots.len();
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| id.clone().map(|id| (id, slot)))
            .collect()
    }

    /// Number of live jobs.
    pub(crate) fn live_len(&self) -> usize {
        self.live
    }

    /// Number of physical slots, tombstones included.
    pub(crate) fn slot_len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_vacate() {
        let mut tier = Tier::new();
        let a = tier.push("a".into());
        let b = tier.push("b".into());
        assert_eq!((a, b), (0, 1));

        assert!(tier.vacate(a));
        assert!(!tier.vacate(a));
        assert!(!tier.vacate(42));

        assert_eq!(tier.live_len(), 1);
        assert_eq!(tier.slot_len(), 2);
        let ids: Vec<_> = tier.live_ids().collect();
        assert_eq!(ids, vec![(1, "b")]);
    }

    #[test]
    fn test_compact_preserves_order() {
        let mut tier = Tier::new();
        for id in ["a", "b", "c", "d"] {
            tier.push(id.into());
        }
        tier.vacate(0);
        tier.vacate(2);

        let moved = tier.compact();
        assert_eq!(moved, vec![("b".to_string(), 0), ("d".to_string(), 1)]);
        assert_eq!(tier.slot_len(), 2);
        assert_eq!(tier.live_len(), 2);
    }
}
