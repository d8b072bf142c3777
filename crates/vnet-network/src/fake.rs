//! In-memory host backends for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use vnet_common::{MacAddress, VnetError, VnetResult};

use crate::isolation::{Firewall, IsolationRule};
use crate::link::{Link, LinkOps, LinkTable};
use crate::sniffer::{ProcessInfo, ProcessTable};

fn missing(name: &str) -> VnetError {
    VnetError::NotFound {
        kind: "link",
        name: name.to_string(),
    }
}

#[derive(Debug, Default)]
struct LinkState {
    links: BTreeMap<String, Link>,
    next_index: u32,
}

impl LinkState {
    fn insert(&mut self, name: &str, kind: &str) -> VnetResult<()> {
        if self.links.contains_key(name) {
            return Err(VnetError::ResourceConflict {
                resource: name.to_string(),
            });
        }
        self.next_index += 1;
        self.links.insert(
            name.to_string(),
            Link {
                index: self.next_index,
                name: name.to_string(),
                admin_up: false,
                oper_state: "DOWN".to_string(),
                address: None,
                kind: Some(kind.to_string()),
                peer: None,
                peer_index: None,
                master: None,
                master_index: None,
                stp_enabled: (kind == "bridge").then_some(false),
            },
        );
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> VnetResult<&mut Link> {
        self.links.get_mut(name).ok_or_else(|| missing(name))
    }
}

/// In-memory kernel link table.
#[derive(Debug, Default)]
pub struct FakeLinks {
    state: Mutex<LinkState>,
    bridge_adds: AtomicUsize,
    veth_adds: AtomicUsize,
}

impl FakeLinks {
    /// Number of bridges created.
    pub fn bridge_adds(&self) -> usize {
        self.bridge_adds.load(Ordering::SeqCst)
    }

    /// Number of veth pairs created.
    pub fn veth_adds(&self) -> usize {
        self.veth_adds.load(Ordering::SeqCst)
    }

    /// Names of all devices.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().links.keys().cloned().collect()
    }
}

#[async_trait]
impl LinkOps for FakeLinks {
    async fn links(&self) -> VnetResult<LinkTable> {
        Ok(LinkTable::new(self.state.lock().links.values().cloned()))
    }

    async fn add_bridge(&self, name: &str) -> VnetResult<()> {
        self.state.lock().insert(name, "bridge")?;
        self.bridge_adds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_veth(&self, name: &str, peer: &str) -> VnetResult<()> {
        let mut state = self.state.lock();
        if state.links.contains_key(peer) {
            return Err(VnetError::ResourceConflict {
                resource: peer.to_string(),
            });
        }
        state.insert(name, "veth")?;
        state.insert(peer, "veth")?;
        state.get_mut(name)?.peer = Some(peer.to_string());
        state.get_mut(peer)?.peer = Some(name.to_string());
        self.veth_adds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_up(&self, name: &str, up: bool) -> VnetResult<()> {
        let mut state = self.state.lock();
        let link = state.get_mut(name)?;
        link.admin_up = up;
        link.oper_state = if up { "UP" } else { "DOWN" }.to_string();
        Ok(())
    }

    async fn set_address(&self, name: &str, mac: &MacAddress) -> VnetResult<()> {
        self.state.lock().get_mut(name)?.address = Some(mac.to_string());
        Ok(())
    }

    async fn set_master(&self, name: &str, master: &str) -> VnetResult<()> {
        let mut state = self.state.lock();
        if !state.links.contains_key(master) {
            return Err(missing(master));
        }
        state.get_mut(name)?.master = Some(master.to_string());
        Ok(())
    }

    async fn set_stp(&self, bridge: &str, enabled: bool) -> VnetResult<()> {
        self.state.lock().get_mut(bridge)?.stp_enabled = Some(enabled);
        Ok(())
    }

    async fn delete(&self, name: &str) -> VnetResult<()> {
        let mut state = self.state.lock();
        let link = state.links.remove(name).ok_or_else(|| missing(name))?;
        // Deleting one end of a veth removes its peer
        if link.kind.as_deref() == Some("veth") {
            if let Some(peer) = &link.peer {
                state.links.remove(peer);
            }
        }
        for other in state.links.values_mut() {
            if other.master.as_deref() == Some(name) {
                other.master = None;
            }
        }
        Ok(())
    }
}

/// In-memory packet filter.
#[derive(Debug, Default)]
pub struct FakeFirewall {
    rules: Mutex<Vec<String>>,
    appends: AtomicUsize,
    fail: bool,
}

impl FakeFirewall {
    /// A firewall rejecting every operation.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of rules appended.
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Interfaces with an installed rule.
    pub fn rules(&self) -> Vec<String> {
        self.rules.lock().clone()
    }

    fn check(&self) -> VnetResult<()> {
        if self.fail {
            return Err(VnetError::Command {
                program: "iptables".to_string(),
                message: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Firewall for FakeFirewall {
    async fn contains(&self, rule: &IsolationRule) -> VnetResult<bool> {
        self.check()?;
        Ok(self.rules.lock().contains(&rule.out_interface))
    }

    async fn append(&self, rule: &IsolationRule) -> VnetResult<()> {
        self.check()?;
        self.rules.lock().push(rule.out_interface.clone());
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, rule: &IsolationRule) -> VnetResult<()> {
        self.check()?;
        self.rules.lock().retain(|r| r != &rule.out_interface);
        Ok(())
    }
}

/// In-memory process table.
#[derive(Debug, Default)]
pub struct FakeProcesses {
    processes: Mutex<Vec<ProcessInfo>>,
    spawned: AtomicUsize,
    next_pid: AtomicU32,
}

impl FakeProcesses {
    /// Add a process that was not started through the table.
    pub fn insert(&self, cmdline: &[&str]) -> u32 {
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.lock().push(ProcessInfo {
            pid,
            cmdline: cmdline.iter().map(ToString::to_string).collect(),
        });
        pid
    }

    /// Number of processes spawned.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Running processes.
    pub fn list(&self) -> Vec<ProcessInfo> {
        self.processes.lock().clone()
    }
}

impl ProcessTable for FakeProcesses {
    fn processes(&self) -> VnetResult<Vec<ProcessInfo>> {
        Ok(self.list())
    }

    fn spawn_detached(&self, program: &str, args: &[String]) -> VnetResult<u32> {
        let mut cmdline = vec![program];
        cmdline.extend(args.iter().map(String::as_str));
        let pid = self.insert(&cmdline);
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> VnetResult<()> {
        let mut processes = self.processes.lock();
        let before = processes.len();
        processes.retain(|p| p.pid != pid);
        if processes.len() == before {
            return Err(VnetError::NotFound {
                kind: "process",
                name: pid.to_string(),
            });
        }
        Ok(())
    }
}
