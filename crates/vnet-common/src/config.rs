//! Topology configuration.
//!
//! The configuration is a YAML document declaring the number of switches,
//! the machines with their interfaces, and optional veth pairs connecting
//! switches to each other.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::error::{VnetError, VnetResult};
use crate::mac::MacAddress;
use crate::settings::Settings;

/// A vnet topology (the user's YAML file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of switches. Switch `i` is realized as `vnet-br{i}`.
    pub switches: u32,

    /// Machines keyed by name.
    pub machines: BTreeMap<String, MachineConfig>,

    /// Veth ends keyed by device name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub veths: BTreeMap<String, VethConfig>,

    /// Directory containing the config file.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

/// Machine role. Routers forward packets, hosts do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    /// End host.
    Host,
    /// Router.
    Router,
}

impl std::fmt::Display for MachineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Router => write!(f, "router"),
        }
    }
}

/// A machine (container) in the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine role.
    #[serde(rename = "type")]
    pub machine_type: MachineType,

    /// Interfaces keyed by guest interface name.
    pub interfaces: BTreeMap<String, InterfaceConfig>,

    /// VLAN sub-interfaces keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vlans: BTreeMap<String, VlanConfig>,

    /// Guest-internal bridges keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bridges: BTreeMap<String, BridgeConfig>,

    /// Host path to guest path copy map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
}

/// A machine interface attached to a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// IPv4 address with prefix length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    /// IPv6 address with prefix length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,

    /// Hardware address. Generated during validation when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    /// Index of the switch this interface is plugged into.
    pub bridge: u32,

    /// Static routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

impl InterfaceConfig {
    /// Configured addresses in declaration order (IPv4 first).
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.ipv4.iter().chain(self.ipv6.iter()).cloned().collect()
    }
}

/// A static route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Destination network, or `default`.
    pub to: String,
    /// Next hop.
    pub via: String,
    /// Treat the gateway as directly reachable.
    #[serde(
        default,
        rename = "on-link",
        alias = "on_link",
        skip_serializing_if = "Option::is_none"
    )]
    pub on_link: Option<bool>,
    /// Route metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<u32>,
    /// Route type (unicast, blackhole, ...).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub route_type: Option<String>,
    /// Route scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Routing table id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<u32>,
    /// Route MTU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

/// A VLAN sub-interface inside a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConfig {
    /// VLAN id.
    pub id: u16,
    /// Parent interface.
    pub link: String,
    /// Addresses with prefix length.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// A bridge inside a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Member interfaces.
    #[serde(default)]
    pub slaves: Vec<String>,
    /// IPv4 address with prefix length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    /// IPv6 address with prefix length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

/// One end of a veth pair connecting two switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VethConfig {
    /// Switch device this end is enslaved to.
    pub bridge: String,
    /// The other end. Only one end of a pair carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Spanning tree state for the bridge this end is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stp: Option<bool>,
}

impl Config {
    /// Parse from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid topology.
    pub fn from_yaml(yaml: &str) -> VnetResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse from file. `config_dir` is set to the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> VnetResult<Self> {
        tracing::debug!(path = %path.display(), "Loading config");
        let content = std::fs::read_to_string(path).map_err(|e| VnetError::Config {
            message: format!("Unable to read {}: {e}", path.display()),
        })?;
        let mut config = Self::from_yaml(&content)?;
        let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        config.config_dir = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Validate the config, filling in generated values.
    ///
    /// Interfaces without a MAC get a random locally administered one,
    /// configured MACs are rewritten in lowercase colon form and relative
    /// `files` host paths are resolved against `config_dir`. All problems
    /// are collected and reported in a single error.
    ///
    /// # Errors
    ///
    /// Returns [`VnetError::Config`] listing every problem found.
    pub fn validate(mut self, settings: &Settings) -> VnetResult<Self> {
        let mut problems = Vec::new();
        let switches = self.switches;
        let config_dir = self.config_dir.clone();

        for (name, machine) in &mut self.machines {
            if machine.interfaces.is_empty() {
                problems.push(format!("machine {name} does not have any interfaces"));
            }
            for (iface, values) in &mut machine.interfaces {
                validate_interface(name, iface, values, switches, &mut problems);
            }
            for (vlan, values) in &machine.vlans {
                if !machine.interfaces.contains_key(&values.link) {
                    problems.push(format!(
                        "vlan {vlan} on machine {name} links to unknown interface {}",
                        values.link
                    ));
                }
                for address in &values.addresses {
                    check_network(address, &mut problems, || {
                        format!("vlan {vlan} on machine {name}")
                    });
                }
            }
            for (bridge, values) in &machine.bridges {
                for slave in &values.slaves {
                    if !machine.interfaces.contains_key(slave) {
                        problems.push(format!(
                            "bridge {bridge} on machine {name} has unknown slave {slave}"
                        ));
                    }
                }
            }
            machine.files = resolve_files(name, &machine.files, &config_dir);
        }

        self.validate_veths(settings, &mut problems);

        if problems.is_empty() {
            Ok(self)
        } else {
            for problem in &problems {
                tracing::error!("{problem}");
            }
            Err(VnetError::Config {
                message: problems.join("; "),
            })
        }
    }

    fn validate_veths(&self, settings: &Settings, problems: &mut Vec<String>) {
        let switch_names = self.switch_names(settings);
        for (name, veth) in &self.veths {
            if !switch_names.contains(&veth.bridge) {
                problems.push(format!(
                    "veth {name} is attached to {}, which is not one of the {} switches",
                    veth.bridge, self.switches
                ));
            }
            match &veth.peer {
                Some(peer) => match self.veths.get(peer) {
                    None => problems.push(format!("veth {name} has unknown peer {peer}")),
                    Some(other) if other.peer.is_some() => problems.push(format!(
                        "veth {name} and {peer} both declare a peer, only one end may"
                    )),
                    Some(_) => {}
                },
                None => {
                    let referenced = self
                        .veths
                        .values()
                        .any(|v| v.peer.as_deref() == Some(name.as_str()));
                    if !referenced {
                        problems.push(format!("veth {name} is not the peer of any other veth"));
                    }
                }
            }
        }
    }

    /// Device names of all switches.
    #[must_use]
    pub fn switch_names(&self, settings: &Settings) -> Vec<String> {
        settings.switch_names(self.switches)
    }

    /// Look up a machine.
    ///
    /// # Errors
    ///
    /// Returns [`VnetError::ConfigReference`] if the machine is not declared.
    pub fn machine(&self, name: &str) -> VnetResult<&MachineConfig> {
        self.machines
            .get(name)
            .ok_or_else(|| VnetError::ConfigReference {
                message: format!("there is no config entry for machine {name}"),
            })
    }

    /// Names of the machines with an interface on `switch`.
    #[must_use]
    pub fn machines_on_switch(&self, settings: &Settings, switch: &str) -> Vec<&str> {
        self.machines
            .iter()
            .filter(|(_, machine)| {
                machine
                    .interfaces
                    .values()
                    .any(|iface| settings.switch_name(iface.bridge) == switch)
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The requested machine names, or all machines when none were given.
    #[must_use]
    pub fn select_machines(&self, requested: Option<&[String]>) -> Vec<String> {
        match requested {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => self.machines.keys().cloned().collect(),
        }
    }

    /// Veth entries that trigger pair creation, as `(name, peer, config)`.
    pub fn veth_pairs(&self) -> impl Iterator<Item = (&str, &str, &VethConfig)> {
        self.veths.iter().filter_map(|(name, veth)| {
            veth.peer
                .as_deref()
                .map(|peer| (name.as_str(), peer, veth))
        })
    }
}

fn validate_interface(
    machine: &str,
    iface: &str,
    values: &mut InterfaceConfig,
    switches: u32,
    problems: &mut Vec<String>,
) {
    let context = || format!("interface {iface} on machine {machine}");

    if let Some(ipv4) = &values.ipv4 {
        if let Err(e) = ipv4.parse::<Ipv4Network>() {
            problems.push(format!("unable to parse IPv4 address {ipv4} for {}: {e}", context()));
        }
    }
    if let Some(ipv6) = &values.ipv6 {
        if let Err(e) = ipv6.parse::<Ipv6Network>() {
            problems.push(format!("unable to parse IPv6 address {ipv6} for {}: {e}", context()));
        }
    }

    if values.mac.is_empty() {
        let mac = MacAddress::random();
        tracing::info!(machine, iface, %mac, "MAC not set, generated a random one");
        values.mac = mac.to_string();
    } else {
        match MacAddress::parse(&values.mac) {
            Ok(mac) => values.mac = mac.to_string(),
            Err(_) => problems.push(format!(
                "MAC {} for {} does not seem to be valid",
                values.mac,
                context()
            )),
        }
    }

    if values.bridge >= switches {
        problems.push(format!(
            "invalid bridge number {} for {}, there are only {switches} switches (numbered from 0)",
            values.bridge,
            context()
        ));
    }

    for route in &values.routes {
        if route.to != "default" {
            check_network(&route.to, problems, context);
        }
        if route.via.parse::<IpAddr>().is_err() {
            problems.push(format!(
                "route via {} for {} is not an IP address",
                route.via,
                context()
            ));
        }
    }
}

fn check_network(value: &str, problems: &mut Vec<String>, context: impl Fn() -> String) {
    if let Err(e) = value.parse::<IpNetwork>() {
        problems.push(format!("unable to parse network {value} for {}: {e}", context()));
    }
}

fn resolve_files(
    machine: &str,
    files: &BTreeMap<String, String>,
    config_dir: &Path,
) -> BTreeMap<String, String> {
    let mut resolved = BTreeMap::new();
    for (host, guest) in files {
        let relative = config_dir.join(host);
        let host_path = if Path::new(host).is_relative() && relative.exists() {
            relative
        } else {
            PathBuf::from(host)
        };
        // Copying happens outside vnet, so a missing path is only reported
        if !host_path.exists() {
            tracing::warn!(machine, host, "Host file does not seem to be a dir or a file");
        }
        resolved.insert(host_path.to_string_lossy().into_owned(), guest.clone());
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
switches: 2
machines:
  router100:
    type: router
    interfaces:
      eth12:
        ipv4: 192.168.0.2/24
        ipv6: "fd00:12::2/64"
        mac: "00:00:00:00:01:11"
        bridge: 0
        routes:
          - to: 172.16.0.0/24
            via: 172.16.0.1
          - to: default
            via: 192.168.0.1
    vlans:
      vlan.100:
        id: 100
        link: eth12
        addresses: [10.0.100.1/24]
    bridges:
      br1:
        slaves: [eth12]
        ipv4: 192.168.0.1/24
  router101:
    type: router
    interfaces:
      eth12: {ipv4: 192.168.0.1/24, mac: "00:00:00:00:02:12", bridge: 0}
      eth23: {ipv4: 10.0.0.1/8, mac: "00:00:00:00:02:22", bridge: 1}
  host102:
    type: host
    interfaces:
      eth23: {ipv4: 10.0.0.2/8, bridge: 1}
veths:
  vnet-veth1: {bridge: vnet-br1, stp: true}
  vnet-veth0: {peer: vnet-veth1, bridge: vnet-br0, stp: false}
"#;

    fn example() -> Config {
        Config::from_yaml(EXAMPLE).unwrap()
    }

    #[test]
    fn parse_example() {
        let config = example();
        assert_eq!(config.switches, 2);
        assert_eq!(config.machines.len(), 3);
        assert_eq!(config.machines["host102"].machine_type, MachineType::Host);
        let eth12 = &config.machines["router100"].interfaces["eth12"];
        assert_eq!(eth12.routes.len(), 2);
        assert_eq!(eth12.addresses(), ["192.168.0.2/24", "fd00:12::2/64"]);
        assert_eq!(config.veth_pairs().count(), 1);
    }

    #[test]
    fn missing_section_is_rejected() {
        assert!(Config::from_yaml("switches: 2\n").is_err());
    }

    #[test]
    fn validate_generates_missing_mac() {
        let config = example().validate(&Settings::default()).unwrap();
        let mac = &config.machines["host102"].interfaces["eth23"].mac;
        assert!(mac.starts_with("02:"), "{mac}");
        assert!(MacAddress::parse(mac).is_ok());
    }

    #[test]
    fn validate_normalizes_mac() {
        let mut config = example();
        config
            .machines
            .get_mut("router100")
            .unwrap()
            .interfaces
            .get_mut("eth12")
            .unwrap()
            .mac = "AA-BB-CC-00-01-02".to_string();

        let config = config.validate(&Settings::default()).unwrap();
        assert_eq!(config.machines["router100"].interfaces["eth12"].mac, "aa:bb:cc:00:01:02");
    }

    #[test]
    fn validate_rejects_out_of_range_bridge() {
        let mut config = example();
        config
            .machines
            .get_mut("router101")
            .unwrap()
            .interfaces
            .get_mut("eth23")
            .unwrap()
            .bridge = 2;
        let err = config.validate(&Settings::default()).unwrap_err();
        assert!(err.to_string().contains("invalid bridge number 2"));
    }

    #[test]
    fn validate_collects_all_problems() {
        let mut config = example();
        let router = config.machines.get_mut("router100").unwrap();
        let eth12 = router.interfaces.get_mut("eth12").unwrap();
        eth12.mac = "00:00:00:00:01".to_string();
        eth12.ipv4 = Some("192.168.0.300/24".to_string());
        let err = config.validate(&Settings::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("MAC 00:00:00:00:01"));
        assert!(message.contains("IPv4 address 192.168.0.300/24"));
    }

    #[test]
    fn validate_rejects_dangling_veths() {
        let mut config = example();
        config.veths.insert(
            "vnet-veth9".to_string(),
            VethConfig {
                bridge: "vnet-br7".to_string(),
                peer: None,
                stp: None,
            },
        );
        let message = config.validate(&Settings::default()).unwrap_err().to_string();
        assert!(message.contains("vnet-br7"));
        assert!(message.contains("not the peer of any other veth"));
    }

    #[test]
    fn validate_resolves_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("router100")).unwrap();
        let mut config = example();
        config.config_dir = dir.path().to_path_buf();
        config
            .machines
            .get_mut("router100")
            .unwrap()
            .files
            .insert("router100".to_string(), "/etc/frr/".to_string());

        let config = config.validate(&Settings::default()).unwrap();
        let expected = dir.path().join("router100").to_string_lossy().into_owned();
        assert_eq!(config.machines["router100"].files[&expected], "/etc/frr/");
    }

    #[test]
    fn missing_host_files_do_not_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = example();
        config.config_dir = dir.path().to_path_buf();
        config
            .machines
            .get_mut("host102")
            .unwrap()
            .files
            .insert("nowhere".to_string(), "/root/".to_string());

        let config = config.validate(&Settings::default()).unwrap();
        assert_eq!(config.machines["host102"].files["nowhere"], "/root/");
    }

    #[test]
    fn machines_on_switch() {
        let config = example();
        let settings = Settings::default();
        assert_eq!(
            config.machines_on_switch(&settings, "vnet-br0"),
            ["router100", "router101"]
        );
        assert_eq!(
            config.machines_on_switch(&settings, "vnet-br1"),
            ["host102", "router101"]
        );
    }

    #[test]
    fn select_machines_defaults_to_all() {
        let config = example();
        assert_eq!(config.select_machines(None).len(), 3);
        assert_eq!(config.select_machines(Some(&[])).len(), 3);
        let one = vec!["router100".to_string()];
        assert_eq!(config.select_machines(Some(&one)), one);
        assert!(config.machine("nope").is_err());
    }
}
