#![forbid(unsafe_code)]

/// Reference count of client processes sharing one backend, kept as a set of OS process ids.
///
/// Insertion order is preserved so the persisted file reads in arrival order. Duplicates and
/// the non-process id `0` are never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PidSet {
    pids: Vec<u32>,
}

impl PidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pids(pids: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::new();
        for pid in pids {
            set.insert(pid);
        }
        set
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.pids
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// Returns `false` when `pid` was already present (or is `0`).
    pub fn insert(&mut self, pid: u32) -> bool {
        if pid == 0 || self.contains(pid) {
            return false;
        }
        self.pids.push(pid);
        true
    }

    pub fn remove(&mut self, pid: u32) -> bool {
        let before = self.pids.len();
        self.pids.retain(|p| *p != pid);
        self.pids.len() != before
    }

    /// Drops every id for which `is_alive` reports `false` and returns the dropped ids.
    pub fn retain_alive<F>(&mut self, mut is_alive: F) -> Vec<u32>
    where
        F: FnMut(u32) -> bool,
    {
        let mut dropped = Vec::new();
        self.pids.retain(|pid| {
            if is_alive(*pid) {
                true
            } else {
                dropped.push(*pid);
                false
            }
        });
        dropped
    }
}

impl FromIterator<u32> for PidSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_pids(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = PidSet::new();
        assert!(set.insert(1234));
        assert!(!set.insert(1234));
        assert_eq!(set.as_slice(), &[1234]);
    }

    #[test]
    fn from_pids_dedupes_and_skips_zero() {
        let set = PidSet::from_pids([5, 0, 7, 5, 9]);
        assert_eq!(set.as_slice(), &[5, 7, 9]);
    }

    #[test]
    fn retain_alive_reports_dropped_ids_in_order() {
        let mut set = PidSet::from_pids([10, 11, 12, 13]);
        let dropped = set.retain_alive(|pid| pid % 2 == 0);
        assert_eq!(dropped, vec![11, 13]);
        assert_eq!(set.as_slice(), &[10, 12]);
    }

    #[test]
    fn remove_missing_pid_is_noop() {
        let mut set = PidSet::from_pids([1, 2]);
        assert!(!set.remove(3));
        assert!(set.remove(1));
        assert_eq!(set.as_slice(), &[2]);
    }
}
