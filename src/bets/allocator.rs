//! Bet id allocation
//!
//! Ids advance from a cursor and skip anything in the used set, so a
//! retired id is never handed out again — not within a process, and not
//! after a restart once the used set is restored from a snapshot.

use crate::types::BetId;
use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct AllocState {
    cursor: u64,
    used: BTreeSet<BetId>,
}

/// Issues unique, never-reused bet ids.
///
/// `next` is a single critical section: two bet creations racing from
/// separate chat commands can never receive the same id.
#[derive(Debug, Default)]
pub struct BetIdAllocator {
    state: Mutex<AllocState>,
}

impl BetIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an allocator from a persisted used-id set.
    pub fn restore(used: impl IntoIterator<Item = BetId>) -> Self {
        Self {
            state: Mutex::new(AllocState {
                cursor: 0,
                used: used.into_iter().collect(),
            }),
        }
    }

    /// Reserve and return the next free id.
    pub fn next(&self) -> BetId {
        let mut state = self.state.lock();
        let mut candidate = state.cursor + 1;
        while state.used.contains(&BetId(candidate)) {
            candidate += 1;
        }
        state.cursor = candidate;
        state.used.insert(BetId(candidate));
        BetId(candidate)
    }

    /// Whether this id was ever issued (open or retired).
    pub fn is_used(&self, id: BetId) -> bool {
        self.state.lock().used.contains(&id)
    }

    pub fn used_ids(&self) -> Vec<BetId> {
        self.state.lock().used.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn issues_sequential_ids_from_one() {
        let alloc = BetIdAllocator::new();
        assert_eq!(alloc.next(), BetId(1));
        assert_eq!(alloc.next(), BetId(2));
        assert_eq!(alloc.next(), BetId(3));
    }

    #[test]
    fn skips_restored_used_ids() {
        let alloc = BetIdAllocator::restore([BetId(1), BetId(2), BetId(4)]);
        assert_eq!(alloc.next(), BetId(3));
        assert_eq!(alloc.next(), BetId(5));
        assert!(alloc.is_used(BetId(4)));
    }

    #[test]
    fn never_reissues_across_restore() {
        let alloc = BetIdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();

        let restored = BetIdAllocator::restore(alloc.used_ids());
        let c = restored.next();
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn concurrent_callers_get_distinct_ids() {
        let alloc = Arc::new(BetIdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = Arc::clone(&alloc);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| alloc.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} issued twice", id);
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
