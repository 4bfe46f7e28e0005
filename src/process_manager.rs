//! Process Manager Module
//!
//! Tracks live sclang processes so a crashed host never leaves interpreters
//! (and the audio servers they started) running.
//!
//! This module provides:
//! - Active interpreter PIDs file at ~/.sclang-runtime/active-pids.json
//! - Thread-safe process registration/unregistration
//! - Orphan detection on startup
//! - Bulk kill for shutdown
//!

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::executor::force_kill_group;

/// Global singleton process manager
pub static PROCESS_MANAGER: LazyLock<ProcessManager> = LazyLock::new(ProcessManager::new);

/// Information about a tracked interpreter process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    /// Executable the process was spawned from
    pub command: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ProcessManager {
    active_processes: RwLock<HashMap<u32, ProcessInfo>>,
    active_pids_path: PathBuf,
}

impl ProcessManager {
    /// Create a new ProcessManager with the default registry path
    pub fn new() -> Self {
        let state_dir = dirs::home_dir()
            .map(|h| h.join(".sclang-runtime"))
            .unwrap_or_else(|| std::env::temp_dir().join(".sclang-runtime"));
        Self::with_path(state_dir.join("active-pids.json"))
    }

    pub fn with_path(active_pids_path: PathBuf) -> Self {
        Self {
            active_processes: RwLock::new(HashMap::new()),
            active_pids_path,
        }
    }

    pub fn register_process(&self, pid: u32, command: &str) {
        let info = ProcessInfo {
            pid,
            command: command.to_string(),
            started_at: Utc::now(),
        };
        debug!(pid, command, "Registering interpreter process");

        self.active_processes.write().insert(pid, info);

        if let Err(e) = self.persist_active_pids() {
            warn!(error = %e, "Failed to persist active PIDs");
        }
    }

    pub fn unregister_process(&self, pid: u32) {
        let removed = self.active_processes.write().remove(&pid).is_some();
        if !removed {
            return;
        }
        debug!(pid, "Unregistered interpreter process");

        if let Err(e) = self.persist_active_pids() {
            warn!(error = %e, "Failed to persist active PIDs");
        }
    }

    pub fn get_active_processes(&self) -> Vec<ProcessInfo> {
        self.active_processes.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_processes.read().len()
    }

    /// Force-kill every tracked process group and clear the registry
    pub fn kill_all_processes(&self) {
        let processes: Vec<ProcessInfo> = self
            .active_processes
            .write()
            .drain()
            .map(|(_, info)| info)
            .collect();

        if processes.is_empty() {
            debug!("No active interpreter processes to kill");
        } else {
            info!(count = processes.len(), "Killing active interpreter process(es)");
            for info in &processes {
                force_kill_group(info.pid);
            }
        }

        self.remove_registry_file();
    }

    /// Check if a process is currently running
    pub fn is_process_running(&self, pid: u32) -> bool {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        system.process(Pid::from_u32(pid)).is_some()
    }

    /// Whether `pid` is alive and still runs the recorded executable
    ///
    /// Guards against killing an unrelated process that reused the pid.
    fn is_same_program(&self, info: &ProcessInfo) -> bool {
        let pid = Pid::from_u32(info.pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = system.process(pid) else {
            return false;
        };
        let expected = Path::new(&info.command)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| info.command.clone());
        process.name().to_string_lossy() == expected.as_str()
    }

    /// Detect and clean up interpreters left behind by a previous crash
    ///
    /// Call at startup, before any runtime boots. Returns the number of
    /// orphans killed.
    pub fn cleanup_orphans(&self) -> usize {
        let orphans = self.load_persisted_pids();
        if orphans.is_empty() {
            debug!("No orphaned interpreter processes found");
            return 0;
        }

        let mut killed_count = 0;
        for info in &orphans {
            if self.is_same_program(info) {
                warn!(pid = info.pid, command = %info.command, "Killing orphaned interpreter");
                force_kill_group(info.pid);
                killed_count += 1;
            } else {
                debug!(pid = info.pid, "Orphan PID already exited");
            }
        }

        self.remove_registry_file();

        if killed_count > 0 {
            info!(count = killed_count, "Cleaned up orphaned interpreter(s)");
        }
        killed_count
    }

    fn remove_registry_file(&self) {
        if self.active_pids_path.exists() {
            if let Err(e) = fs::remove_file(&self.active_pids_path) {
                warn!(error = %e, "Failed to remove active PIDs file");
            }
        }
    }

    fn persist_active_pids(&self) -> std::io::Result<()> {
        let processes = self.get_active_processes();

        if let Some(parent) = self.active_pids_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&processes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.active_pids_path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn load_persisted_pids(&self) -> Vec<ProcessInfo> {
        if !self.active_pids_path.exists() {
            return Vec::new();
        }

        let contents = match fs::read_to_string(&self.active_pids_path) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to read active PIDs file");
                return Vec::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(pids) => pids,
            Err(e) => {
                warn!(error = %e, "Failed to parse active PIDs JSON");
                Vec::new()
            }
        }
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
