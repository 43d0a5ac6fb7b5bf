use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use sysinfo::{Pid, Process, ProcessStatus, System};
use tracing::{debug, instrument, warn};

/// Per-step outcome of a tree kill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    pub root: u32,
    /// False when the root was already gone before any signal went out.
    pub root_found: bool,
    pub root_signalled: bool,
    pub descendants_signalled: Vec<u32>,
    /// Descendants that vanished or refused the signal; never fatal.
    pub descendant_failures: Vec<u32>,
}

impl KillReport {
    fn missing(root: u32) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }
}

fn is_live(process: &Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Descendants of `root`, leaves first.
fn collect_descendants(system: &System, root: Pid) -> Vec<Pid> {
    let mut children_map: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            if parent != *pid {
                children_map.entry(parent).or_default().push(*pid);
            }
        }
    }

    let mut ordered = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(children) = children_map.get(&pid) {
            for child in children {
                if *child != root && !ordered.contains(child) {
                    ordered.push(*child);
                    queue.push_back(*child);
                }
            }
        }
    }
    ordered.reverse();
    ordered
}

/// Kills whole process trees and probes liveness through one shared process table.
#[derive(Debug)]
pub struct ProcessTreeKiller {
    system: StdMutex<System>,
}

impl Default for ProcessTreeKiller {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTreeKiller {
    pub fn new() -> Self {
        Self {
            system: StdMutex::new(System::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends SIGKILL (TerminateProcess on Windows) to every descendant of
    /// `root_id`, then to the root. Does not wait for the processes to die.
    #[instrument(skip(self))]
    pub fn kill_tree(&self, root_id: u32) -> KillReport {
        let mut system = self.guard();
        system.refresh_processes();

        let root = Pid::from_u32(root_id);
        match system.process(root) {
            Some(process) if is_live(process) => {}
            _ => {
                debug!(pid = root_id, "Root process not found, nothing to kill");
                return KillReport::missing(root_id);
            }
        }

        let mut report = KillReport {
            root: root_id,
            root_found: true,
            ..Default::default()
        };

        for pid in collect_descendants(&system, root) {
            let signalled = system.process(pid).map(|p| p.kill()).unwrap_or(false);
            if signalled {
                report.descendants_signalled.push(pid.as_u32());
            } else {
                report.descendant_failures.push(pid.as_u32());
            }
        }

        report.root_signalled = system.process(root).map(|p| p.kill()).unwrap_or(false);
        if !report.descendant_failures.is_empty() {
            debug!(pid = root_id, failures = ?report.descendant_failures, "Some descendants could not be signalled");
        }
        if !report.root_signalled {
            warn!(pid = root_id, "Failed to signal root process");
        }
        report
    }

    /// OS-reported start time of a live process, `None` when it cannot be confirmed alive.
    pub fn probe(&self, id: u32) -> Option<DateTime<Utc>> {
        let mut system = self.guard();
        let pid = Pid::from_u32(id);
        if !system.refresh_process(pid) {
            return None;
        }
        let process = system.process(pid).filter(|p| is_live(p))?;
        Utc.timestamp_opt(process.start_time() as i64, 0).single()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    fn wait_until_dead(killer: &ProcessTreeKiller, pid: u32) -> bool {
        for _ in 0..50 {
            if killer.probe(pid).is_none() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        false
    }

    #[test]
    fn missing_root_is_a_soft_failure() {
        let killer = ProcessTreeKiller::new();
        let report = killer.kill_tree(u32::MAX - 1);
        assert!(!report.root_found);
        assert!(!report.root_signalled);
        assert!(report.descendants_signalled.is_empty());
    }

    #[test]
    fn kills_root_and_descendants() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & sleep 30 & wait")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let root = child.id();
        std::thread::sleep(Duration::from_millis(300));

        let killer = ProcessTreeKiller::new();
        let report = killer.kill_tree(root);
        assert!(report.root_found);
        assert!(report.root_signalled);
        assert!(report.descendants_signalled.len() >= 2);

        let descendants = report.descendants_signalled.clone();
        child.wait().unwrap();
        for pid in descendants {
            assert!(wait_until_dead(&killer, pid), "descendant {} survived", pid);
        }
    }

    #[test]
    fn probe_reports_live_process() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let killer = ProcessTreeKiller::new();
        assert!(killer.probe(child.id()).is_some());
        child.kill().unwrap();
        child.wait().unwrap();
        assert!(killer.probe(child.id()).is_none());
    }
}
