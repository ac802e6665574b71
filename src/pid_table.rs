//! Per-PID state storage.

use crate::packet::Pid;

/// Maps each [`Pid`](../packet/struct.Pid.html) to an optional value of type `T`.
///
/// Storage grows on demand up to the highest PID inserted, so a stream touching only low PIDs
/// (the common case) stays small, while lookups remain a single index operation.
pub struct PidTable<T> {
    entries_by_pid: Vec<Option<T>>,
}
impl<T> Default for PidTable<T> {
    fn default() -> PidTable<T> {
        PidTable {
            entries_by_pid: vec![],
        }
    }
}
impl<T> PidTable<T> {
    /// Borrow the entry for the given PID, if any
    pub fn get(&self, pid: Pid) -> Option<&T> {
        self.entries_by_pid
            .get(usize::from(pid))
            .and_then(|e| e.as_ref())
    }

    /// Mutably borrow the entry for the given PID, if any
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut T> {
        self.entries_by_pid
            .get_mut(usize::from(pid))
            .and_then(|e| e.as_mut())
    }

    /// Returns the existing entry for `pid`, first creating it with `f` if absent.
    pub fn get_or_insert_with<F: FnOnce() -> T>(&mut self, pid: Pid, f: F) -> &mut T {
        let idx = usize::from(pid);
        if idx >= self.entries_by_pid.len() {
            self.entries_by_pid.resize_with(idx + 1, || None);
        }
        self.entries_by_pid[idx].get_or_insert_with(f)
    }

    /// Store `value` for `pid`, replacing any previous entry.
    pub fn insert(&mut self, pid: Pid, value: T) {
        let idx = usize::from(pid);
        if idx >= self.entries_by_pid.len() {
            self.entries_by_pid.resize_with(idx + 1, || None);
        }
        self.entries_by_pid[idx] = Some(value);
    }

    /// Remove and return the entry for `pid`.
    pub fn remove(&mut self, pid: Pid) -> Option<T> {
        self.entries_by_pid
            .get_mut(usize::from(pid))
            .and_then(|e| e.take())
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries_by_pid.clear();
    }

    /// Iterate over present entries, in PID order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Pid, &mut T)> {
        self.entries_by_pid
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.as_mut().map(|v| (Pid::new(i as u16), v)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sparse() {
        let mut table = PidTable::default();
        assert_eq!(table.get(Pid::new(0x100)), None);
        table.insert(Pid::new(0x100), "a");
        *table.get_or_insert_with(Pid::new(0x11), || "b") = "c";
        assert_eq!(table.get(Pid::new(0x11)), Some(&"c"));
        assert_eq!(table.get(Pid::new(0x1fff)), None);
        let pids: Vec<Pid> = table.iter_mut().map(|(pid, _)| pid).collect();
        assert_eq!(pids, vec![Pid::new(0x11), Pid::new(0x100)]);
        assert_eq!(table.remove(Pid::new(0x100)), Some("a"));
        assert_eq!(table.remove(Pid::new(0x100)), None);
        assert_eq!(table.iter_mut().count(), 1);
        table.clear();
        assert_eq!(table.iter_mut().count(), 0);
    }
}
