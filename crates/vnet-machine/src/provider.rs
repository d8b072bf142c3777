//! Machine providers.
//!
//! A provider realizes machines on one container platform. Providers are
//! looked up in a [`ProviderRegistry`] by [`ProviderKind`]; every machine
//! type maps to exactly one kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use vnet_common::{MacAddress, MachineConfig, MachineType, Settings, VnetError, VnetResult};

use crate::convergence::wait_for_state;
use crate::netplan::NetplanDocument;
use crate::platform::{
    ContainerPlatform, ContainerState, Devices, InstanceInfo, InstanceSource, InstanceSpec,
};

/// Guest sysctl files controlling packet forwarding.
pub const FORWARDING_SYSCTLS: [(&str, &str); 2] = [
    ("/etc/sysctl.d/20-net.ipv4.ip_forward.conf", "net.ipv4.ip_forward"),
    (
        "/etc/sysctl.d/20-net.ipv6.conf.all.forwarding.conf",
        "net.ipv6.conf.all.forwarding",
    ),
];

/// Container platform a machine is realized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    /// LXD system containers.
    Lxc,
}

impl ProviderKind {
    /// The provider realizing machines of `machine_type`.
    #[must_use]
    pub const fn for_machine_type(machine_type: MachineType) -> Self {
        match machine_type {
            MachineType::Host | MachineType::Router => Self::Lxc,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lxc => write!(f, "LXC"),
        }
    }
}

/// Requested machine state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Start the machine.
    Start,
    /// Stop the machine.
    Stop,
}

impl StatusChange {
    /// State the machine converges to.
    #[must_use]
    pub const fn target(self) -> ContainerState {
        match self {
            Self::Start => ContainerState::Running,
            Self::Stop => ContainerState::Stopped,
        }
    }
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Lifecycle operations of one machine provider.
#[async_trait]
pub trait MachineProvider: Send + Sync {
    /// The kind of this provider.
    fn kind(&self) -> ProviderKind;

    /// Whether the machine exists.
    async fn exists(&self, name: &str) -> VnetResult<bool>;

    /// Observed state, [`ContainerState::Absent`] if the machine does not exist.
    async fn status(&self, name: &str) -> VnetResult<ContainerState>;

    /// Create the machine.
    async fn create(&self, name: &str, machine: &MachineConfig) -> VnetResult<()>;

    /// Write the guest network declaration and type-specific settings,
    /// applying them right away when the machine is running.
    async fn configure(&self, name: &str, machine: &MachineConfig) -> VnetResult<()>;

    /// Issue a state change and wait for it to converge.
    async fn change_status(&self, name: &str, change: StatusChange) -> VnetResult<()>;

    /// Stop the machine if running, then delete it.
    async fn destroy(&self, name: &str) -> VnetResult<()>;
}

/// Providers keyed by kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn MachineProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its kind, replacing any previous one.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn MachineProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Provider for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`VnetError::NotFound`] if no provider is registered.
    pub fn get(&self, kind: ProviderKind) -> VnetResult<&dyn MachineProvider> {
        self.providers
            .get(&kind)
            .map(AsRef::as_ref)
            .ok_or_else(|| VnetError::NotFound {
                kind: "provider",
                name: kind.to_string(),
            })
    }

    /// Provider for machines of `machine_type`.
    ///
    /// # Errors
    ///
    /// Returns [`VnetError::NotFound`] if no provider is registered.
    pub fn for_machine(&self, machine_type: MachineType) -> VnetResult<&dyn MachineProvider> {
        self.get(ProviderKind::for_machine_type(machine_type))
    }
}

/// Provider creating machines as LXD containers.
pub struct LxcProvider {
    platform: Arc<dyn ContainerPlatform>,
    settings: Settings,
}

impl fmt::Debug for LxcProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LxcProvider")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LxcProvider {
    /// Create a provider on top of a container platform.
    pub fn new(platform: Arc<dyn ContainerPlatform>, settings: Settings) -> Self {
        Self { platform, settings }
    }

    /// Device map of a machine: `eth0` disabled and one bridged NIC per
    /// interface, plugged into its switch with a fixed hardware address.
    ///
    /// The switch does not have to exist yet; the platform only resolves
    /// NIC parents when the container starts.
    #[must_use]
    pub fn devices(&self, name: &str, machine: &MachineConfig) -> Devices {
        let mut devices = Devices::new();
        devices.insert(
            "eth0".to_string(),
            BTreeMap::from([("type".to_string(), "none".to_string())]),
        );
        for (iface, config) in &machine.interfaces {
            let nic = BTreeMap::from([
                ("name".to_string(), iface.clone()),
                ("host_name".to_string(), format!("{name}-{iface}")),
                ("parent".to_string(), self.settings.switch_name(config.bridge)),
                ("type".to_string(), "nic".to_string()),
                ("nictype".to_string(), "bridged".to_string()),
                ("hwaddr".to_string(), config.mac.clone()),
            ]);
            devices.insert(iface.clone(), nic);
        }
        devices
    }

    /// `machine` with every interface MAC replaced by the hardware address
    /// its NIC in `info` actually has.
    ///
    /// Generated MACs differ on every config load, so the declaration of an
    /// existing container must match the NIC, not the config.
    fn with_nic_addresses(info: &InstanceInfo, machine: &MachineConfig) -> MachineConfig {
        let mut machine = machine.clone();
        for (iface, config) in &mut machine.interfaces {
            let Some(hwaddr) = info.devices.get(iface).and_then(|nic| nic.get("hwaddr")) else {
                continue;
            };
            let hwaddr = MacAddress::parse(hwaddr)
                .map_or_else(|_| hwaddr.clone(), |mac| mac.to_string());
            if hwaddr != config.mac {
                tracing::debug!(
                    machine = %info.name,
                    iface = %iface,
                    configured = %config.mac,
                    nic = %hwaddr,
                    "Using NIC hardware address"
                );
                config.mac = hwaddr;
            }
        }
        machine
    }

    /// Creation request of a machine.
    #[must_use]
    pub fn instance_spec(&self, name: &str, machine: &MachineConfig) -> InstanceSpec {
        InstanceSpec {
            name: name.to_string(),
            source: InstanceSource::image(&self.settings.base_image_alias),
            ephemeral: false,
            config: BTreeMap::from([(
                "user.network-config".to_string(),
                "disabled".to_string(),
            )]),
            devices: self.devices(name, machine),
            profiles: vec![self.settings.profile.clone()],
        }
    }
}

#[async_trait]
impl MachineProvider for LxcProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Lxc
    }

    async fn exists(&self, name: &str) -> VnetResult<bool> {
        self.platform.exists(name).await
    }

    async fn status(&self, name: &str) -> VnetResult<ContainerState> {
        self.platform.observe(name).await
    }

    async fn create(&self, name: &str, machine: &MachineConfig) -> VnetResult<()> {
        tracing::info!(machine = name, "Creating LXC container");
        self.platform.create(&self.instance_spec(name, machine)).await
    }

    async fn configure(&self, name: &str, machine: &MachineConfig) -> VnetResult<()> {
        let info = self.platform.get(name).await?;
        let machine = Self::with_nic_addresses(&info, machine);
        let netplan = NetplanDocument::for_machine(&machine).to_yaml()?;
        self.platform
            .put_file(name, &self.settings.netplan_path, &netplan)
            .await?;
        tracing::debug!(
            machine = name,
            path = %self.settings.netplan_path,
            "Network declaration written"
        );

        let forwarding = u8::from(machine.machine_type == MachineType::Router);
        for (path, key) in FORWARDING_SYSCTLS {
            self.platform
                .put_file(name, path, &format!("{key}={forwarding}\n"))
                .await?;
        }
        tracing::debug!(machine = name, forwarding, "IP forwarding configured");

        if info.state() == ContainerState::Running {
            self.platform.exec(name, &["netplan", "apply"]).await?;
            self.platform.exec(name, &["sysctl", "--system"]).await?;
            tracing::info!(machine = name, "Guest configuration applied");
        }
        Ok(())
    }

    async fn change_status(&self, name: &str, change: StatusChange) -> VnetResult<()> {
        match change {
            StatusChange::Start => self.platform.start(name).await?,
            StatusChange::Stop => self.platform.stop(name, false).await?,
        }
        tokio::time::sleep(self.settings.settle_delay).await;

        wait_for_state(self.platform.as_ref(), name, change.target(), &self.settings.retry).await?;
        tracing::debug!(machine = name, state = %change.target(), "Container converged");
        Ok(())
    }

    async fn destroy(&self, name: &str) -> VnetResult<()> {
        let info = self.platform.get(name).await?;
        if info.state() == ContainerState::Running {
            tracing::info!(machine = name, "Stopping LXC container");
            self.platform.stop(name, true).await?;
        }
        tracing::info!(machine = name, "Deleting LXC container");
        self.platform.delete(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakePlatform;
    use vnet_common::Config;

    const CONFIG: &str = r#"
switches: 2
machines:
  router100:
    type: router
    interfaces:
      eth12: {ipv4: 192.168.0.2/24, mac: "00:00:00:00:01:11", bridge: 0}
      eth13: {ipv4: 10.0.0.1/24, bridge: 1}
  host102:
    type: host
    interfaces:
      eth0: {ipv4: 192.168.0.10/24, bridge: 0}
"#;

    fn setup() -> (Arc<FakePlatform>, LxcProvider, Config) {
        let settings = Settings::default();
        let platform = Arc::new(FakePlatform::default());
        let provider = LxcProvider::new(platform.clone(), settings.clone());
        let config = Config::from_yaml(CONFIG).unwrap().validate(&settings).unwrap();
        (platform, provider, config)
    }

    #[test]
    fn every_type_has_a_provider() {
        let (_, provider, _) = setup();
        let registry = ProviderRegistry::new().with(Arc::new(provider));
        assert_eq!(registry.for_machine(MachineType::Host).unwrap().kind(), ProviderKind::Lxc);
        assert_eq!(registry.for_machine(MachineType::Router).unwrap().kind(), ProviderKind::Lxc);
        assert!(ProviderRegistry::new().get(ProviderKind::Lxc).is_err());
    }

    #[test]
    fn device_map() {
        let (_, provider, config) = setup();
        let devices = provider.devices("router100", &config.machines["router100"]);

        assert_eq!(devices["eth0"]["type"], "none");
        let eth12 = &devices["eth12"];
        assert_eq!(eth12["host_name"], "router100-eth12");
        assert_eq!(eth12["parent"], "vnet-br0");
        assert_eq!(eth12["nictype"], "bridged");
        assert_eq!(eth12["hwaddr"], "00:00:00:00:01:11");
        assert_eq!(devices["eth13"]["parent"], "vnet-br1");
    }

    #[tokio::test]
    async fn create_uses_base_image_and_profile() {
        let (platform, provider, config) = setup();
        provider.create("router100", &config.machines["router100"]).await.unwrap();

        let spec = platform.spec("router100").unwrap();
        assert_eq!(spec.source.alias, "vnet-base-image");
        assert_eq!(spec.profiles, ["vnet-profile"]);
        assert_eq!(spec.config["user.network-config"], "disabled");
        assert!(provider.exists("router100").await.unwrap());
    }

    #[tokio::test]
    async fn configure_sets_forwarding_by_type() {
        let (platform, provider, config) = setup();
        for name in ["router100", "host102"] {
            provider.create(name, &config.machines[name]).await.unwrap();
            provider.configure(name, &config.machines[name]).await.unwrap();
        }

        let netplan = platform
            .file("router100", "/etc/netplan/10-vnet-config.yaml")
            .unwrap();
        assert!(netplan.contains("00:00:00:00:01:11"));
        assert_eq!(
            platform.file("router100", "/etc/sysctl.d/20-net.ipv4.ip_forward.conf").as_deref(),
            Some("net.ipv4.ip_forward=1\n")
        );
        assert_eq!(
            platform
                .file("host102", "/etc/sysctl.d/20-net.ipv6.conf.all.forwarding.conf")
                .as_deref(),
            Some("net.ipv6.conf.all.forwarding=0\n")
        );
    }

    #[tokio::test]
    async fn configure_matches_nic_hardware_address() {
        let (platform, provider, config) = setup();
        provider.create("host102", &config.machines["host102"]).await.unwrap();
        let hwaddr = platform.spec("host102").unwrap().devices["eth0"]["hwaddr"].clone();

        let mut reloaded = config.machines["host102"].clone();
        reloaded.interfaces.get_mut("eth0").unwrap().mac = "02:00:00:aa:bb:cc".to_string();
        provider.configure("host102", &reloaded).await.unwrap();

        let netplan = platform
            .file("host102", "/etc/netplan/10-vnet-config.yaml")
            .unwrap();
        let document = NetplanDocument::from_yaml(&netplan).unwrap();
        assert_eq!(document.network.ethernets["eth0"].matches.macaddress, hwaddr);
    }

    #[tokio::test]
    async fn dashed_mac_reaches_guest_in_colon_form() {
        let settings = Settings::default();
        let platform = Arc::new(FakePlatform::default());
        let provider = LxcProvider::new(platform.clone(), settings.clone());
        let yaml = r#"
switches: 1
machines:
  host1:
    type: host
    interfaces:
      eth0: {ipv4: 10.0.0.1/24, mac: "AA-BB-CC-00-01-02", bridge: 0}
"#;
        let config = Config::from_yaml(yaml).unwrap().validate(&settings).unwrap();
        let machine = &config.machines["host1"];

        provider.create("host1", machine).await.unwrap();
        provider.configure("host1", machine).await.unwrap();

        assert_eq!(
            platform.spec("host1").unwrap().devices["eth0"]["hwaddr"],
            "aa:bb:cc:00:01:02"
        );
        let netplan = platform.file("host1", "/etc/netplan/10-vnet-config.yaml").unwrap();
        let document = NetplanDocument::from_yaml(&netplan).unwrap();
        assert_eq!(
            document.network.ethernets["eth0"].matches.macaddress,
            "aa:bb:cc:00:01:02"
        );
    }

    #[tokio::test]
    async fn configure_applies_on_running_machine() {
        let (platform, provider, config) = setup();
        provider.create("router100", &config.machines["router100"]).await.unwrap();
        provider.configure("router100", &config.machines["router100"]).await.unwrap();
        assert_eq!(platform.count("exec"), 0);

        platform.insert("router100", ContainerState::Running);
        provider.configure("router100", &config.machines["router100"]).await.unwrap();
        let calls = platform.calls();
        assert!(calls.contains(&"exec router100 netplan apply".to_string()));
        assert!(calls.contains(&"exec router100 sysctl --system".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_and_stop_does_not() {
        let (platform, provider, config) = setup();
        provider.create("router100", &config.machines["router100"]).await.unwrap();
        platform.set_transition_lag(1);

        provider.change_status("router100", StatusChange::Start).await.unwrap();
        assert_eq!(platform.current("router100"), ContainerState::Running);

        provider.change_status("router100", StatusChange::Stop).await.unwrap();
        assert_eq!(platform.current("router100"), ContainerState::Stopped);
        assert!(platform.calls().contains(&"stop router100 wait=false".to_string()));
    }

    #[tokio::test]
    async fn destroy_stops_running_container() {
        let (platform, provider, _) = setup();
        platform.insert("router100", ContainerState::Running);

        provider.destroy("router100").await.unwrap();
        assert_eq!(
            platform.calls(),
            ["stop router100 wait=true", "delete router100"]
        );
        assert!(provider.destroy("router100").await.unwrap_err().is_not_found());
    }
}
