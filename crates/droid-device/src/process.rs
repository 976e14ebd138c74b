//! Remote process table.
//!
//! A refresh parses `ps -t` output into a fresh [`ProcessSnapshot`] and
//! publishes it by swapping a single `Arc`. Readers always see one complete
//! generation: the pid table and both secondary indices come from the same
//! listing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::bridge::DeviceBridge;
use crate::device::Device;
use crate::error::DeviceError;

/// `user pid ppid vsize rss wchan pc state name`, name being the rest of the line.
const ROW_PATTERN: &str =
    r"^(\S+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\S+)\s+([A-Za-z0-9]+)\s+(\S+)\s+(.+?)\s*$";

/// One row of the remote process listing.
#[derive(Debug, Clone, Serialize)]
pub struct Process {
    pub pid: u32,
    pub ppid: u32,
    pub user: String,
    pub name: String,
    pub vsize: u64,
    pub rss: u64,
    pub wchan: String,
    pub pc: String,
    pub state: String,
    #[serde(skip)]
    device: Weak<Device>,
}

impl Process {
    /// The owning device, if it is still alive.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    pub fn internal_data_directory(&self) -> String {
        format!("/data/data/{}", self.name)
    }

    pub fn native_library_directory(&self) -> String {
        format!("{}/lib/", self.internal_data_directory())
    }
}

/// Outcome of [`DeviceProcessRegistry::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Refreshed { count: usize, generation: u64 },
    /// The listing was empty; the previous snapshot is kept.
    Skipped,
}

/// One consistent generation of the process table.
#[derive(Debug, Default)]
pub struct ProcessSnapshot {
    generation: u64,
    by_pid: BTreeMap<u32, Arc<Process>>,
    by_name: HashMap<String, BTreeSet<u32>>,
    by_parent: HashMap<u32, BTreeSet<u32>>,
}

impl ProcessSnapshot {
    fn build(generation: u64, processes: Vec<Process>) -> Self {
        let mut snapshot = Self {
            generation,
            ..Self::default()
        };
        for process in processes {
            // A repeated pid replaces the earlier row in every index.
            if let Some(old) = snapshot.by_pid.remove(&process.pid) {
                snapshot.unindex(&old);
            }
            snapshot
                .by_name
                .entry(process.name.clone())
                .or_default()
                .insert(process.pid);
            snapshot
                .by_parent
                .entry(process.ppid)
                .or_default()
                .insert(process.pid);
            snapshot.by_pid.insert(process.pid, Arc::new(process));
        }
        snapshot
    }

    fn unindex(&mut self, old: &Process) {
        if let Some(ids) = self.by_name.get_mut(&old.name) {
            ids.remove(&old.pid);
            if ids.is_empty() {
                self.by_name.remove(&old.name);
            }
        }
        if let Some(ids) = self.by_parent.get_mut(&old.ppid) {
            ids.remove(&old.pid);
            if ids.is_empty() {
                self.by_parent.remove(&old.ppid);
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    pub fn get(&self, pid: u32) -> Option<Arc<Process>> {
        self.by_pid.get(&pid).cloned()
    }

    pub fn ids_by_name(&self, name: &str) -> Vec<u32> {
        self.by_name
            .get(name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn child_ids(&self, ppid: u32) -> Vec<u32> {
        self.by_parent
            .get(&ppid)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All pids in ascending order.
    pub fn pids(&self) -> Vec<u32> {
        self.by_pid.keys().copied().collect()
    }

    pub fn processes(&self) -> impl Iterator<Item = &Arc<Process>> {
        self.by_pid.values()
    }
}

/// Holds the latest process snapshot of one device.
pub struct DeviceProcessRegistry {
    bridge: Arc<dyn DeviceBridge>,
    owner: Weak<Device>,
    current: RwLock<Arc<ProcessSnapshot>>,
    timeout: Duration,
}

impl std::fmt::Debug for DeviceProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProcessRegistry")
            .field("generation", &self.generation())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DeviceProcessRegistry {
    pub fn new(bridge: Arc<dyn DeviceBridge>, owner: Weak<Device>, timeout: Duration) -> Self {
        Self {
            bridge,
            owner,
            current: RwLock::new(Arc::new(ProcessSnapshot::default())),
            timeout,
        }
    }

    /// Re-read the process listing, optionally limited to one pid.
    ///
    /// On a failed command the error is returned and the current snapshot is
    /// left in place. An empty listing, or output with neither a header nor a
    /// single process row (a shell error such as `ps: not found`), is reported
    /// as [`RefreshOutcome::Skipped`] and also leaves it in place.
    pub fn refresh(&self, pid_filter: Option<u32>) -> Result<RefreshOutcome, DeviceError> {
        let args = match pid_filter {
            Some(pid) => format!("-t {pid}"),
            None => "-t".to_string(),
        };
        let output = self.bridge.execute("ps", &args, self.timeout)?;
        if !output.success() {
            return Err(DeviceError::CommandFailed {
                command: format!("ps {args}"),
                code: output.exit_code,
            });
        }
        if output.stdout.trim().is_empty() {
            tracing::debug!("empty process listing, keeping previous snapshot");
            return Ok(RefreshOutcome::Skipped);
        }

        let Some(processes) = parse_listing(&output.stdout, &self.owner)? else {
            tracing::warn!(
                output = %output.stdout.trim(),
                "unrecognised process listing, keeping previous snapshot"
            );
            return Ok(RefreshOutcome::Skipped);
        };
        let count = processes.len();

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.generation + 1;
        *current = Arc::new(ProcessSnapshot::build(generation, processes));
        drop(current);

        tracing::debug!(count, generation, "process snapshot refreshed");
        Ok(RefreshOutcome::Refreshed { count, generation })
    }

    pub fn snapshot(&self) -> Arc<ProcessSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    pub fn process_by_id(&self, pid: u32) -> Option<Arc<Process>> {
        self.snapshot().get(pid)
    }

    pub fn ids_by_name(&self, name: &str) -> Vec<u32> {
        self.snapshot().ids_by_name(name)
    }

    pub fn child_ids_by_parent(&self, ppid: u32) -> Vec<u32> {
        self.snapshot().child_ids(ppid)
    }

    pub fn active_ids(&self) -> Vec<u32> {
        self.snapshot().pids()
    }
}

/// Rows of a `ps -t` listing, or `None` when the output has no header and
/// no row shaped like a process.
fn parse_listing(
    output: &str,
    owner: &Weak<Device>,
) -> Result<Option<Vec<Process>>, DeviceError> {
    let pattern = Regex::new(ROW_PATTERN)?;
    let mut processes = Vec::new();
    let mut lines = output.lines().filter(|l| !l.trim().is_empty()).peekable();

    let mut recognised = lines.peek().is_some_and(|l| l.trim_start().starts_with("USER"));
    if recognised {
        lines.next();
    }

    for line in lines {
        let Some(caps) = pattern.captures(line) else {
            tracing::warn!(line, "skipping malformed process row");
            continue;
        };
        recognised = true;
        let (Ok(pid), Ok(ppid), Ok(vsize), Ok(rss)) = (
            caps[2].parse::<u32>(),
            caps[3].parse::<u32>(),
            caps[4].parse::<u64>(),
            caps[5].parse::<u64>(),
        ) else {
            tracing::warn!(line, "skipping process row with out-of-range numbers");
            continue;
        };
        processes.push(Process {
            pid,
            ppid,
            user: caps[1].to_string(),
            name: caps[9].to_string(),
            vsize,
            rss,
            wchan: caps[6].to_string(),
            pc: caps[7].to_string(),
            state: caps[8].to_string(),
            device: owner.clone(),
        });
    }
    Ok(recognised.then_some(processes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedBridge;

    const LISTING: &str = "USER PID PPID VSIZE RSS WCHAN PC S NAME\n\
                           root 1 0 123 45 0 0 S init\n\
                           root 42 1 999 50 0 0 S com.example.app\n";

    fn registry(bridge: &Arc<ScriptedBridge>) -> DeviceProcessRegistry {
        DeviceProcessRegistry::new(bridge.clone(), Weak::new(), Duration::from_secs(1))
    }

    #[test]
    fn refresh_builds_consistent_indices() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell("ps -t", LISTING);
        let reg = registry(&bridge);

        let outcome = reg.refresh(None).unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Refreshed {
                count: 2,
                generation: 1
            }
        );
        assert_eq!(reg.process_by_id(42).unwrap().ppid, 1);
        assert_eq!(reg.ids_by_name("com.example.app"), vec![42]);
        assert_eq!(reg.child_ids_by_parent(1), vec![42]);
        assert_eq!(reg.active_ids(), vec![1, 42]);
    }

    #[test]
    fn row_columns_are_captured() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell(
            "ps -t",
            "USER     PID   PPID  VSIZE  RSS   WCHAN    PC         S NAME\n\
             u0_a52   1234  180   912344 41200 ffffffff 00000000 S com.example.app:remote\n",
        );
        let reg = registry(&bridge);
        reg.refresh(None).unwrap();

        let p = reg.process_by_id(1234).unwrap();
        assert_eq!(p.user, "u0_a52");
        assert_eq!(p.vsize, 912_344);
        assert_eq!(p.rss, 41_200);
        assert_eq!(p.wchan, "ffffffff");
        assert_eq!(p.state, "S");
        assert_eq!(p.name, "com.example.app:remote");
        assert_eq!(p.native_library_directory(), "/data/data/com.example.app:remote/lib/");
        assert!(p.device().is_none());
    }

    #[test]
    fn names_with_spaces_keep_rest_of_line() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell("ps -t", "root 7 2 0 0 worker 0 S [kworker/0:1 H]\n");
        let reg = registry(&bridge);
        reg.refresh(None).unwrap();
        assert_eq!(reg.process_by_id(7).unwrap().name, "[kworker/0:1 H]");
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell(
            "ps -t",
            "USER PID PPID VSIZE RSS WCHAN PC S NAME\n\
             root 1 0 123 45 0 0 S init\n\
             this row is not a process\n\
             root x 1 1 1 0 0 S bad-pid\n",
        );
        let reg = registry(&bridge);
        assert_eq!(
            reg.refresh(None).unwrap(),
            RefreshOutcome::Refreshed {
                count: 1,
                generation: 1
            }
        );
        assert_eq!(reg.active_ids(), vec![1]);
    }

    #[test]
    fn empty_listing_keeps_previous_snapshot() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell("ps -t", LISTING).on_shell("ps -t", "  \n");
        let reg = registry(&bridge);

        reg.refresh(None).unwrap();
        assert_eq!(reg.refresh(None).unwrap(), RefreshOutcome::Skipped);
        assert_eq!(reg.generation(), 1);
        assert_eq!(reg.active_ids(), vec![1, 42]);
    }

    #[test]
    fn header_only_listing_publishes_empty_snapshot() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge
            .on_shell("ps -t", LISTING)
            .on_shell("ps -t", "USER PID PPID VSIZE RSS WCHAN PC S NAME\n");
        let reg = registry(&bridge);

        reg.refresh(None).unwrap();
        assert_eq!(
            reg.refresh(None).unwrap(),
            RefreshOutcome::Refreshed {
                count: 0,
                generation: 2
            }
        );
        assert!(reg.active_ids().is_empty());
    }

    #[test]
    fn shell_error_text_keeps_previous_snapshot() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge
            .on_shell("ps -t", LISTING)
            .on_shell("ps -t", "/system/bin/sh: ps: not found\n");
        let reg = registry(&bridge);

        reg.refresh(None).unwrap();
        assert_eq!(reg.refresh(None).unwrap(), RefreshOutcome::Skipped);
        assert_eq!(reg.generation(), 1);
        assert_eq!(reg.active_ids(), vec![1, 42]);
        assert_eq!(reg.ids_by_name("com.example.app"), vec![42]);
    }

    #[test]
    fn failed_command_keeps_previous_snapshot() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge
            .on_shell("ps -t", LISTING)
            .on_shell_exit("ps -t", 1, "");
        let reg = registry(&bridge);

        reg.refresh(None).unwrap();
        let err = reg.refresh(None).unwrap_err();
        assert!(matches!(err, DeviceError::CommandFailed { code: 1, .. }));
        assert_eq!(reg.generation(), 1);
        assert_eq!(reg.ids_by_name("init"), vec![1]);
    }

    #[test]
    fn timeout_propagates() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.fail_shell("ps -t");
        let reg = registry(&bridge);
        assert!(matches!(
            reg.refresh(None),
            Err(DeviceError::Shell(crate::ShellError::Timeout { .. }))
        ));
        assert_eq!(reg.generation(), 0);
    }

    #[test]
    fn pid_filter_is_passed_to_ps() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell("ps -t 42", "root 42 1 999 50 0 0 S com.example.app\n");
        let reg = registry(&bridge);
        reg.refresh(Some(42)).unwrap();
        assert_eq!(reg.active_ids(), vec![42]);
    }

    #[test]
    fn old_snapshot_stays_valid_after_refresh() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge
            .on_shell("ps -t", LISTING)
            .on_shell("ps -t", "root 77 1 1 1 0 0 S other\n");
        let reg = registry(&bridge);

        reg.refresh(None).unwrap();
        let before = reg.snapshot();
        reg.refresh(None).unwrap();

        assert_eq!(before.pids(), vec![1, 42]);
        assert_eq!(reg.active_ids(), vec![77]);
        assert!(reg.process_by_id(42).is_none());
    }

    #[test]
    fn duplicate_pid_replaces_earlier_row() {
        let snapshot = ProcessSnapshot::build(
            1,
            vec![
                Process {
                    pid: 5,
                    ppid: 1,
                    user: "root".into(),
                    name: "old".into(),
                    vsize: 0,
                    rss: 0,
                    wchan: "0".into(),
                    pc: "0".into(),
                    state: "S".into(),
                    device: Weak::new(),
                },
                Process {
                    pid: 5,
                    ppid: 2,
                    user: "root".into(),
                    name: "new".into(),
                    vsize: 0,
                    rss: 0,
                    wchan: "0".into(),
                    pc: "0".into(),
                    state: "S".into(),
                    device: Weak::new(),
                },
            ],
        );
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.ids_by_name("old").is_empty());
        assert!(snapshot.child_ids(1).is_empty());
        assert_eq!(snapshot.ids_by_name("new"), vec![5]);
        assert_eq!(snapshot.child_ids(2), vec![5]);
    }

    #[test]
    fn process_serializes_without_device() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.on_shell("ps -t", LISTING);
        let reg = registry(&bridge);
        reg.refresh(None).unwrap();

        let json = serde_json::to_value(&*reg.process_by_id(42).unwrap()).unwrap();
        assert_eq!(json["name"], "com.example.app");
        assert_eq!(json["ppid"], 1);
        assert!(json.get("device").is_none());
    }
}
