//! Per-switch packet capture.
//!
//! A sniffer is a detached `tcpdump` writing `{pcap_dir}/{switch}.pcap`.
//! Sniffers are found by scanning process command lines, so they are
//! detected even when started by an earlier invocation, and may keep
//! running after their switch was brought down.

#![allow(unsafe_code)]

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use vnet_common::settings::pcap_path;
use vnet_common::{VnetError, VnetResult};

/// Capture program.
pub const CAPTURE_PROGRAM: &str = "tcpdump";

/// A process on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Command line, one entry per argument.
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    /// Whether this is a capture process on `switch`.
    #[must_use]
    pub fn captures(&self, switch: &str) -> bool {
        let Some(program) = self.cmdline.first() else {
            return false;
        };
        let is_capture = Path::new(program)
            .file_name()
            .is_some_and(|name| name == CAPTURE_PROGRAM);

        is_capture
            && self
                .cmdline
                .windows(2)
                .any(|pair| pair[0] == "-i" && pair[1] == switch)
    }
}

/// Access to host processes.
pub trait ProcessTable: Send + Sync {
    /// List running processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read.
    fn processes(&self) -> VnetResult<Vec<ProcessInfo>>;

    /// Start a detached background process, returning its pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn spawn_detached(&self, program: &str, args: &[String]) -> VnetResult<u32>;

    /// Ask a process to terminate.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn terminate(&self, pid: u32) -> VnetResult<()>;
}

/// [`ProcessTable`] backed by `/proc` and POSIX signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFs;

impl ProcessTable for ProcFs {
    fn processes(&self) -> VnetResult<Vec<ProcessInfo>> {
        let mut processes = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes may exit while we scan
            let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let cmdline: Vec<String> = raw
                .split(|b| *b == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect();
            if !cmdline.is_empty() {
                processes.push(ProcessInfo { pid, cmdline });
            }
        }
        Ok(processes)
    }

    fn spawn_detached(&self, program: &str, args: &[String]) -> VnetResult<u32> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group, so an interrupt of vnet does not reach it
            .process_group(0)
            .spawn()
            .map_err(|e| VnetError::Command {
                program: program.to_string(),
                message: format!("unable to execute: {e}"),
            })?;
        Ok(child.id())
    }

    fn terminate(&self, pid: u32) -> VnetResult<()> {
        let raw = libc::pid_t::try_from(pid).map_err(|_| VnetError::NotFound {
            kind: "process",
            name: pid.to_string(),
        })?;
        // SAFETY: kill(2) has no memory safety requirements
        if unsafe { libc::kill(raw, libc::SIGTERM) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Err(VnetError::NotFound {
                    kind: "process",
                    name: pid.to_string(),
                });
            }
            return Err(err.into());
        }
        Ok(())
    }
}

/// Starts, finds and stops switch sniffers.
#[derive(Clone)]
pub struct SnifferManager {
    processes: Arc<dyn ProcessTable>,
}

impl std::fmt::Debug for SnifferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnifferManager").finish_non_exhaustive()
    }
}

impl SnifferManager {
    /// Create a sniffer manager on top of a process table.
    pub fn new(processes: Arc<dyn ProcessTable>) -> Self {
        Self { processes }
    }

    /// Sniffer manager for the local host.
    #[must_use]
    pub fn host() -> Self {
        Self::new(Arc::new(ProcFs))
    }

    /// Pids of the capture processes on `switch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read.
    pub fn pids(&self, switch: &str) -> VnetResult<Vec<u32>> {
        Ok(self
            .processes
            .processes()?
            .into_iter()
            .filter(|p| p.captures(switch))
            .map(|p| p.pid)
            .collect())
    }

    /// Whether a capture process is running on `switch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read.
    pub fn is_running(&self, switch: &str) -> VnetResult<bool> {
        Ok(!self.pids(switch)?.is_empty())
    }

    /// Start capturing on `switch` unless a sniffer is already running.
    ///
    /// Returns whether a new sniffer was started.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture process cannot be started.
    pub fn start(&self, switch: &str, pcap_dir: &Path) -> VnetResult<bool> {
        if self.is_running(switch)? {
            tracing::debug!(switch, "Sniffer already running");
            return Ok(false);
        }

        let file = pcap_path(pcap_dir, switch);
        let args = vec![
            "-i".to_string(),
            switch.to_string(),
            "-w".to_string(),
            file.to_string_lossy().into_owned(),
        ];
        let pid = self.processes.spawn_detached(CAPTURE_PROGRAM, &args)?;
        tracing::info!(switch, pid, file = %file.display(), "Sniffer started");
        Ok(true)
    }

    /// Terminate every capture process on the given switches.
    ///
    /// Returns the number of processes signalled.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read or a signal
    /// cannot be delivered to a live process.
    pub fn kill<S: AsRef<str>>(&self, switches: &[S]) -> VnetResult<usize> {
        let mut killed = 0;
        for process in self.processes.processes()? {
            let Some(switch) = switches.iter().map(AsRef::as_ref).find(|s| process.captures(s))
            else {
                continue;
            };
            match self.processes.terminate(process.pid) {
                Ok(()) => {
                    tracing::info!(switch, pid = process.pid, "Sniffer killed");
                    killed += 1;
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(switch, pid = process.pid, "Sniffer exited before kill");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(killed)
    }
}
