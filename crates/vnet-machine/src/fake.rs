//! In-memory container platform for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use vnet_common::{VnetError, VnetResult};

use crate::platform::{ContainerPlatform, ContainerState, Devices, InstanceInfo, InstanceSpec};

#[derive(Debug, Clone)]
struct Instance {
    state: ContainerState,
    // State reached after the given number of further checks
    pending: Option<(ContainerState, u32)>,
    checks: u32,
    spec: Option<InstanceSpec>,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<String, Instance>,
    calls: Vec<String>,
    stuck: BTreeSet<String>,
}

/// In-memory [`ContainerPlatform`].
///
/// Non-waiting stops take effect after `transition_lag` state checks;
/// starts and waiting stops take effect immediately.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<State>,
    transition_lag: AtomicU32,
}

fn not_found(name: &str) -> VnetError {
    VnetError::NotFound {
        kind: "container",
        name: name.to_string(),
    }
}

impl FakePlatform {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Add an existing instance.
    pub fn insert(&self, name: &str, state: ContainerState) {
        self.lock().instances.insert(
            name.to_string(),
            Instance {
                state,
                pending: None,
                checks: 0,
                spec: None,
                files: BTreeMap::new(),
            },
        );
    }

    /// Report the current state for `checks` more checks, then `target`.
    pub fn lag_checks(&self, name: &str, target: ContainerState, checks: u32) {
        if let Some(instance) = self.lock().instances.get_mut(name) {
            instance.pending = Some((target, checks));
        }
    }

    /// Number of checks before non-waiting state changes take effect.
    pub fn set_transition_lag(&self, checks: u32) {
        self.transition_lag.store(checks, Ordering::SeqCst);
    }

    /// Make state changes of `name` never take effect.
    pub fn stick(&self, name: &str) {
        self.lock().stuck.insert(name.to_string());
    }

    /// Recorded calls, such as `start router100`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(operation))
            .count()
    }

    /// Number of state checks made on `name`.
    pub fn state_checks(&self, name: &str) -> u32 {
        self.lock().instances.get(name).map_or(0, |i| i.checks)
    }

    /// Content of a file written into `name`.
    pub fn file(&self, name: &str, path: &str) -> Option<String> {
        self.lock().instances.get(name)?.files.get(path).cloned()
    }

    /// Creation request of `name`.
    pub fn spec(&self, name: &str) -> Option<InstanceSpec> {
        self.lock().instances.get(name)?.spec.clone()
    }

    /// Current state, without counting as a check.
    pub fn current(&self, name: &str) -> ContainerState {
        self.lock()
            .instances
            .get(name)
            .map_or(ContainerState::Absent, |i| i.state)
    }

    fn transition(&self, name: &str, target: ContainerState, wait: bool) -> VnetResult<()> {
        let lag = self.transition_lag.load(Ordering::SeqCst);
        let mut state = self.lock();
        let stuck = state.stuck.contains(name);
        let instance = state.instances.get_mut(name).ok_or_else(|| not_found(name))?;
        if stuck {
            return Ok(());
        }
        if wait || lag == 0 {
            instance.state = target;
            instance.pending = None;
        } else {
            instance.pending = Some((target, lag));
        }
        Ok(())
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl ContainerPlatform for FakePlatform {
    async fn get(&self, name: &str) -> VnetResult<InstanceInfo> {
        let state = self.lock();
        let instance = state.instances.get(name).ok_or_else(|| not_found(name))?;
        let (profiles, config, devices) = instance.spec.as_ref().map_or_else(
            || (Vec::new(), BTreeMap::new(), Devices::new()),
            |s| (s.profiles.clone(), s.config.clone(), s.devices.clone()),
        );
        Ok(InstanceInfo {
            name: name.to_string(),
            status: instance.state.to_string(),
            profiles,
            config,
            devices,
        })
    }

    async fn state(&self, name: &str) -> VnetResult<ContainerState> {
        let mut state = self.lock();
        let instance = state.instances.get_mut(name).ok_or_else(|| not_found(name))?;
        instance.checks += 1;
        match instance.pending {
            Some((target, 0)) => {
                instance.state = target;
                instance.pending = None;
            }
            Some((target, remaining)) => instance.pending = Some((target, remaining - 1)),
            None => {}
        }
        Ok(instance.state)
    }

    async fn create(&self, spec: &InstanceSpec) -> VnetResult<()> {
        self.record(format!("create {}", spec.name));
        let mut state = self.lock();
        if state.instances.contains_key(&spec.name) {
            return Err(VnetError::ResourceConflict {
                resource: format!("container {}", spec.name),
            });
        }
        state.instances.insert(
            spec.name.clone(),
            Instance {
                state: ContainerState::Stopped,
                pending: None,
                checks: 0,
                spec: Some(spec.clone()),
                files: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> VnetResult<()> {
        self.record(format!("start {name}"));
        // Starts wait on the platform
        self.transition(name, ContainerState::Running, true)
    }

    async fn stop(&self, name: &str, wait: bool) -> VnetResult<()> {
        self.record(format!("stop {name} wait={wait}"));
        self.transition(name, ContainerState::Stopped, wait)
    }

    async fn delete(&self, name: &str) -> VnetResult<()> {
        self.record(format!("delete {name}"));
        let mut state = self.lock();
        let instance = state.instances.get(name).ok_or_else(|| not_found(name))?;
        if instance.state == ContainerState::Running {
            return Err(VnetError::Command {
                program: "lxc".to_string(),
                message: "Instance is running".to_string(),
            });
        }
        state.instances.remove(name);
        Ok(())
    }

    async fn exec(&self, name: &str, command: &[&str]) -> VnetResult<String> {
        self.record(format!("exec {name} {}", command.join(" ")));
        if !self.lock().instances.contains_key(name) {
            return Err(not_found(name));
        }
        Ok(String::new())
    }

    async fn put_file(&self, name: &str, path: &str, content: &str) -> VnetResult<()> {
        self.record(format!("put_file {name} {path}"));
        let mut state = self.lock();
        let instance = state.instances.get_mut(name).ok_or_else(|| not_found(name))?;
        instance.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn publish(&self, name: &str, alias: &str) -> VnetResult<()> {
        self.record(format!("publish {name} {alias}"));
        if !self.lock().instances.contains_key(name) {
            return Err(not_found(name));
        }
        Ok(())
    }
}
