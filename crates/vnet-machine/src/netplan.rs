//! Guest network declarations.
//!
//! Machines are configured with a netplan document matching each
//! interface by hardware address, with static addressing only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vnet_common::{MachineConfig, RouteConfig, VnetResult};
use vnet_common::config::VlanConfig;

/// A netplan document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetplanDocument {
    /// The `network` section.
    pub network: Network,
}

/// The `network` section of a netplan document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Format version, always 2.
    pub version: u8,
    /// Backend, always `networkd`.
    pub renderer: String,
    /// Physical interfaces.
    pub ethernets: BTreeMap<String, Ethernet>,
    /// VLAN sub-interfaces.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vlans: BTreeMap<String, VlanConfig>,
    /// Bridges inside the guest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bridges: BTreeMap<String, Bridge>,
}

/// Match clause selecting an interface by hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacMatch {
    /// Hardware address.
    pub macaddress: String,
}

/// A physical interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ethernet {
    /// Interface selector.
    #[serde(rename = "match")]
    pub matches: MacMatch,
    /// Static addresses.
    pub addresses: Vec<String>,
    /// DHCPv4, always `"no"`.
    pub dhcp4: String,
    /// DHCPv6, always `"no"`.
    pub dhcp6: String,
    /// Static routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

/// A bridge inside the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    /// Member interfaces.
    pub interfaces: Vec<String>,
    /// Static addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

impl NetplanDocument {
    /// Build the declaration of a machine.
    #[must_use]
    pub fn for_machine(machine: &MachineConfig) -> Self {
        let ethernets = machine
            .interfaces
            .iter()
            .map(|(name, iface)| {
                let ethernet = Ethernet {
                    matches: MacMatch {
                        macaddress: iface.mac.clone(),
                    },
                    addresses: iface.addresses(),
                    dhcp4: "no".to_string(),
                    dhcp6: "no".to_string(),
                    routes: iface.routes.clone(),
                };
                (name.clone(), ethernet)
            })
            .collect();

        let bridges = machine
            .bridges
            .iter()
            .map(|(name, bridge)| {
                let addresses = bridge.ipv4.iter().chain(bridge.ipv6.iter()).cloned().collect();
                let bridge = Bridge {
                    interfaces: bridge.slaves.clone(),
                    addresses,
                };
                (name.clone(), bridge)
            })
            .collect();

        Self {
            network: Network {
                version: 2,
                renderer: "networkd".to_string(),
                ethernets,
                vlans: machine.vlans.clone(),
                bridges,
            },
        }
    }

    /// Serialize to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> VnetResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a netplan declaration.
    pub fn from_yaml(yaml: &str) -> VnetResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
