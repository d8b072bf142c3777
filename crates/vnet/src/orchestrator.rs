//! Orchestration entry points.

use std::path::Path;
use std::sync::Arc;

use vnet_common::confirm::confirmer;
use vnet_common::{Config, Confirm, Settings, VnetResult};
use vnet_machine::lifecycle::render_machines;
use vnet_machine::{
    BatchReport, ContainerPlatform, LxcProvider, LxdClient, MachineManager, ProviderRegistry,
    StatusChange,
};
use vnet_network::Topology;
use vnet_network::status::{render_switches, render_veths};
use vnet_network::topology::BringUpReport;

/// The topology engine and machine manager behind one set of settings.
pub struct Vnet {
    settings: Settings,
    topology: Topology,
    machines: MachineManager,
    confirm: Arc<dyn Confirm>,
}

impl std::fmt::Debug for Vnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vnet")
            .field("settings", &self.settings)
            .field("topology", &self.topology)
            .field("machines", &self.machines)
            .finish_non_exhaustive()
    }
}

impl Vnet {
    /// Assemble from explicit parts.
    pub fn new(
        settings: Settings,
        topology: Topology,
        platform: Arc<dyn ContainerPlatform>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        let registry =
            ProviderRegistry::new().with(Arc::new(LxcProvider::new(platform, settings.clone())));
        let machines = MachineManager::new(registry, confirm.clone());
        Self {
            settings,
            topology,
            machines,
            confirm,
        }
    }

    /// Operate on the local host with LXD, prompting on the terminal
    /// unless `settings.force` is set.
    #[must_use]
    pub fn host(settings: Settings) -> Self {
        let confirm: Arc<dyn Confirm> = Arc::from(confirmer(settings.force));
        let topology = Topology::host(settings.clone());
        Self::new(settings, topology, Arc::new(LxdClient), confirm)
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ask the operator a yes/no question.
    pub fn confirm(&self, message: &str) -> bool {
        self.confirm.confirm(message)
    }

    /// Load and validate a topology file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load_config(&self, path: &Path) -> VnetResult<Config> {
        Config::from_file(path)?.validate(&self.settings)
    }

    /// Create and activate switches and veth pairs, optionally starting a
    /// sniffer per switch.
    ///
    /// # Errors
    ///
    /// Returns an error if a device cannot be created or configured.
    pub async fn bring_up_topology(
        &self,
        config: &Config,
        sniffer: bool,
        pcap_dir: &Path,
    ) -> VnetResult<BringUpReport> {
        self.topology.bring_up(config, sniffer, pcap_dir).await
    }

    /// Deactivate veth pairs and switches. Returns true if sniffers are
    /// still capturing on deactivated switches.
    ///
    /// # Errors
    ///
    /// Returns an error if a device state cannot be changed.
    pub async fn bring_down_topology(&self, config: &Config) -> VnetResult<bool> {
        self.topology.bring_down(config).await
    }

    /// Delete veth pairs and switches.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing device cannot be deleted.
    pub async fn delete_topology(&self, config: &Config) -> VnetResult<()> {
        self.topology.delete(config).await
    }

    /// Rendered switch status table.
    ///
    /// # Errors
    ///
    /// Returns an error if the host state cannot be read.
    pub async fn show_switch_status(&self, config: &Config) -> VnetResult<String> {
        Ok(render_switches(&self.topology.switch_status(config).await?))
    }

    /// Rendered veth status table.
    ///
    /// # Errors
    ///
    /// Returns an error if the link table cannot be read.
    pub async fn show_veth_status(&self, config: &Config) -> VnetResult<String> {
        Ok(render_veths(&self.topology.veth_status(config).await?))
    }

    /// Rendered machine status table.
    ///
    /// # Errors
    ///
    /// Returns an error if a machine status cannot be read.
    pub async fn show_machine_status(&self, config: &Config) -> VnetResult<String> {
        Ok(render_machines(&self.machines.status(config).await?))
    }

    /// Create machines (all when `names` is empty).
    ///
    /// # Errors
    ///
    /// Returns an error if a machine type has no provider.
    pub async fn create_machines(
        &self,
        config: &Config,
        names: Option<&[String]>,
    ) -> VnetResult<BatchReport> {
        self.machines.create(config, names).await
    }

    /// Destroy machines (all when `names` is empty) after one confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`vnet_common::VnetError::Aborted`] if not confirmed.
    pub async fn destroy_machines(
        &self,
        config: &Config,
        names: Option<&[String]>,
    ) -> VnetResult<BatchReport> {
        self.machines.destroy(config, names).await
    }

    /// Start or stop machines (all when `names` is empty).
    ///
    /// # Errors
    ///
    /// Returns an error if a machine type has no provider.
    pub async fn change_machine_status(
        &self,
        config: &Config,
        names: Option<&[String]>,
        change: StatusChange,
    ) -> VnetResult<BatchReport> {
        self.machines.change_status(config, names, change).await
    }

    /// Terminate the sniffers of the topology's switches.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read.
    pub fn kill_sniffer_processes(&self, config: &Config) -> VnetResult<usize> {
        self.topology.kill_sniffers(config)
    }
}
