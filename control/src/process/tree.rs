//! Point-in-time process trees and leaf-to-root termination.
//!
//! Descendants are enumerated from a fresh snapshot at call time, never from a
//! cached tree, so a reused pid cannot pull an unrelated process into a kill.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::process::{ProcessInfo, ProcessTable, ResourceSample, SignalKind};

const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// One live process and its descendants at observation time.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// Root first, then descendants breadth-first.
    members: Vec<ProcessInfo>,
    /// Depth of each member below the root, parallel to `members`.
    depths: Vec<usize>,
}

impl ProcessHandle {
    /// Captures `root` and every descendant present in `snapshot`.
    ///
    /// A child that claims to predate its parent is a pid-reuse artefact and is
    /// left out.
    pub fn capture(root: &ProcessInfo, snapshot: &[ProcessInfo]) -> Self {
        let mut children: HashMap<u32, Vec<&ProcessInfo>> = HashMap::new();
        for p in snapshot {
            if let Some(ppid) = p.ppid {
                if ppid != p.pid {
                    children.entry(ppid).or_default().push(p);
                }
            }
        }

        let mut members = vec![root.clone()];
        let mut depths = vec![0];
        let mut visited = HashSet::from([root.pid]);
        let mut cursor = 0;
        while cursor < members.len() {
            let parent = members[cursor].clone();
            let depth = depths[cursor];
            if let Some(kids) = children.get(&parent.pid) {
                let mut kids = kids.clone();
                kids.sort_by_key(|p| p.pid);
                for child in kids {
                    if child.start_time < parent.start_time || !visited.insert(child.pid) {
                        continue;
                    }
                    members.push(child.clone());
                    depths.push(depth + 1);
                }
            }
            cursor += 1;
        }
        Self { members, depths }
    }

    pub fn root(&self) -> &ProcessInfo {
        &self.members[0]
    }

    pub fn pid(&self) -> u32 {
        self.root().pid
    }

    pub fn members(&self) -> &[ProcessInfo] {
        &self.members
    }

    pub fn pids(&self) -> Vec<u32> {
        self.members.iter().map(|p| p.pid).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// CPU and memory summed over the whole tree.
    pub fn sample(&self) -> ResourceSample {
        self.members.iter().fold(ResourceSample::default(), |acc, p| ResourceSample {
            cpu_percent: acc.cpu_percent + p.cpu_percent,
            memory_bytes: acc.memory_bytes + p.memory_bytes,
        })
    }

    /// Deepest members first, the root last.
    pub fn leaf_to_root(&self) -> Vec<&ProcessInfo> {
        let mut order: Vec<usize> = (0..self.members.len()).collect();
        order.sort_by(|a, b| self.depths[*b].cmp(&self.depths[*a]).then(b.cmp(a)));
        order.into_iter().map(|i| &self.members[i]).collect()
    }
}

/// Terminates every member of `handle`, leaves first.
///
/// Each member gets a graceful signal; after `grace` any survivor is killed
/// forcefully and given another `grace` to disappear. Returns the pids still
/// alive after that, which is empty on success.
pub async fn terminate_tree<T: ProcessTable + ?Sized>(
    table: &mut T,
    handle: &ProcessHandle,
    grace: Duration,
) -> Vec<u32> {
    let order = handle.leaf_to_root();
    for p in &order {
        if !table.signal(p.pid, SignalKind::Graceful) {
            tracing::debug!(pid = p.pid, "already gone before graceful stop");
        }
    }

    let mut alive = wait_for_exit(table, order, grace).await;
    if alive.is_empty() {
        return Vec::new();
    }

    for p in &alive {
        tracing::warn!(pid = p.pid, name = %p.name, "survived graceful stop; killing");
        table.signal(p.pid, SignalKind::Forceful);
    }
    alive = wait_for_exit(table, alive, grace).await;
    alive.iter().map(|p| p.pid).collect()
}

async fn wait_for_exit<'a, T: ProcessTable + ?Sized>(
    table: &mut T,
    mut pending: Vec<&'a ProcessInfo>,
    timeout: Duration,
) -> Vec<&'a ProcessInfo> {
    let deadline = Instant::now() + timeout;
    loop {
        pending.retain(|p| table.is_alive(p));
        if pending.is_empty() || Instant::now() >= deadline {
            return pending;
        }
        sleep(LIVENESS_POLL.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeTable;

    fn info(pid: u32, ppid: Option<u32>, start: u64) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid,
            name: format!("p{pid}"),
            exe: None,
            argv: vec![format!("p{pid}")],
            start_time: start,
            cpu_percent: 1.5,
            memory_bytes: 1024,
        }
    }

    // ── capture ───────────────────────────────────────────────────────────────

    #[test]
    fn capture_collects_all_descendants() {
        let snapshot = vec![
            info(1, None, 1),
            info(2, Some(1), 2),
            info(3, Some(1), 2),
            info(4, Some(2), 3),
            info(9, None, 1),
        ];
        let handle = ProcessHandle::capture(&snapshot[0], &snapshot);
        let mut pids = handle.pids();
        pids.sort_unstable();
        assert_eq!(pids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn capture_skips_children_older_than_parent() {
        // pid 2 was reused: its recorded parent started after it did.
        let snapshot = vec![info(1, None, 10), info(2, Some(1), 5)];
        let handle = ProcessHandle::capture(&snapshot[0], &snapshot);
        assert_eq!(handle.pids(), vec![1]);
    }

    #[test]
    fn sample_sums_the_tree() {
        let snapshot = vec![info(1, None, 1), info(2, Some(1), 2)];
        let handle = ProcessHandle::capture(&snapshot[0], &snapshot);
        let sample = handle.sample();
        assert_eq!(sample.memory_bytes, 2048);
        assert!((sample.cpu_percent - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn leaf_to_root_puts_root_last() {
        let snapshot = vec![
            info(1, None, 1),
            info(2, Some(1), 2),
            info(3, Some(2), 3),
        ];
        let handle = ProcessHandle::capture(&snapshot[0], &snapshot);
        let order: Vec<u32> = handle.leaf_to_root().iter().map(|p| p.pid).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    // ── terminate_tree ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn terminate_kills_wrapper_and_workers() {
        let mut table = FakeTable::default();
        let root = table.insert("sh", &["sh", "-c", "worker"], None);
        table.insert("worker", &["worker", "a"], Some(root));
        table.insert("worker", &["worker", "b"], Some(root));

        let snapshot = table.snapshot();
        let root_info = snapshot.iter().find(|p| p.pid == root).unwrap().clone();
        let handle = ProcessHandle::capture(&root_info, &snapshot);
        assert_eq!(handle.len(), 3);

        let survivors = terminate_tree(&mut table, &handle, Duration::from_millis(100)).await;
        assert!(survivors.is_empty());
        assert!(table.snapshot().is_empty());
        // The root is signalled after its children.
        assert_eq!(table.signals().last().unwrap().0, root);
    }

    #[tokio::test]
    async fn terminate_escalates_to_forceful_kill() {
        let mut table = FakeTable::default();
        let pid = table.insert("stubborn", &["stubborn"], None);
        table.ignore_graceful(pid);

        let snapshot = table.snapshot();
        let handle = ProcessHandle::capture(&snapshot[0], &snapshot);
        let survivors = terminate_tree(&mut table, &handle, Duration::from_millis(60)).await;

        assert!(survivors.is_empty());
        assert!(table.signals().contains(&(pid, SignalKind::Forceful)));
    }

    #[tokio::test]
    async fn terminate_reports_unkillable_survivors() {
        let mut table = FakeTable::default();
        let pid = table.insert("zombie-ish", &["zombie-ish"], None);
        table.make_unkillable(pid);

        let snapshot = table.snapshot();
        let handle = ProcessHandle::capture(&snapshot[0], &snapshot);
        let survivors = terminate_tree(&mut table, &handle, Duration::from_millis(60)).await;
        assert_eq!(survivors, vec![pid]);
    }
}
