//! Kernel link table introspection and mutation.
//!
//! The link table is read with `ip -json -details link show` and parsed
//! eagerly into [`Link`] values, so nothing downstream deals with raw
//! netlink attributes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use vnet_common::command::run_checked;
use vnet_common::{MacAddress, VnetError, VnetResult};

/// A network device as seen in the kernel link table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Administrative state (`IFF_UP`).
    pub admin_up: bool,
    /// Operational state (`UP`, `DOWN`, `UNKNOWN`, ...).
    pub oper_state: String,
    /// Link-layer address.
    pub address: Option<String>,
    /// Link kind (`bridge`, `veth`, ...).
    pub kind: Option<String>,
    /// Name of the linked device (the other end of a veth).
    pub peer: Option<String>,
    /// Index of the linked device.
    pub peer_index: Option<u32>,
    /// Name of the master device (the bridge a port is enslaved to).
    pub master: Option<String>,
    /// Index of the master device.
    pub master_index: Option<u32>,
    /// Spanning tree state, for bridges.
    pub stp_enabled: Option<bool>,
}

/// Snapshot of the kernel link table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    links: BTreeMap<String, Link>,
}

impl LinkTable {
    /// Build a table from links, resolving peer and master indices by name.
    #[must_use]
    pub fn new(links: impl IntoIterator<Item = Link>) -> Self {
        let mut links: BTreeMap<String, Link> =
            links.into_iter().map(|l| (l.name.clone(), l)).collect();

        let indices: BTreeMap<String, u32> = links
            .values()
            .map(|l| (l.name.clone(), l.index))
            .collect();

        for link in links.values_mut() {
            if link.peer_index.is_none() {
                link.peer_index = link.peer.as_ref().and_then(|p| indices.get(p).copied());
            }
            if link.master_index.is_none() {
                link.master_index = link.master.as_ref().and_then(|m| indices.get(m).copied());
            }
        }

        Self { links }
    }

    /// Parse the output of `ip -json -details link show`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output is not the expected JSON.
    pub fn from_json(json: &str) -> VnetResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Vec<RawLink> = serde_json::from_str(json)?;
        Ok(Self::new(raw.into_iter().map(Link::from)))
    }

    /// Look up a link by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    /// Look up a link by index.
    #[must_use]
    pub fn by_index(&self, index: u32) -> Option<&Link> {
        self.links.values().find(|l| l.index == index)
    }

    /// Whether a link with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    /// Iterate over all links.
    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }
}

#[derive(Debug, Deserialize)]
struct RawLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    operstate: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    link_index: Option<u32>,
    #[serde(default)]
    master: Option<String>,
    #[serde(default)]
    linkinfo: Option<RawLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct RawLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<serde_json::Value>,
}

impl From<RawLink> for Link {
    fn from(raw: RawLink) -> Self {
        let stp_enabled = raw
            .linkinfo
            .as_ref()
            .and_then(|info| info.info_data.as_ref())
            .and_then(|data| data.get("stp_state"))
            .and_then(serde_json::Value::as_u64)
            .map(|state| state != 0);

        Self {
            index: raw.ifindex,
            admin_up: raw.flags.iter().any(|f| f == "UP"),
            oper_state: raw.operstate.unwrap_or_else(|| "UNKNOWN".to_string()),
            address: raw.address,
            kind: raw.linkinfo.and_then(|info| info.info_kind),
            peer: raw.link,
            peer_index: raw.link_index,
            master: raw.master,
            master_index: None,
            stp_enabled,
            name: raw.ifname,
        }
    }
}

/// Operations on the host's network devices.
#[async_trait]
pub trait LinkOps: Send + Sync {
    /// Read the current link table.
    async fn links(&self) -> VnetResult<LinkTable>;

    /// Add a bridge device.
    async fn add_bridge(&self, name: &str) -> VnetResult<()>;

    /// Add a veth pair.
    async fn add_veth(&self, name: &str, peer: &str) -> VnetResult<()>;

    /// Set the administrative state of a device.
    async fn set_up(&self, name: &str, up: bool) -> VnetResult<()>;

    /// Set the link-layer address of a device.
    async fn set_address(&self, name: &str, mac: &MacAddress) -> VnetResult<()>;

    /// Enslave a device to a bridge.
    async fn set_master(&self, name: &str, master: &str) -> VnetResult<()>;

    /// Set the spanning tree state of a bridge.
    async fn set_stp(&self, bridge: &str, enabled: bool) -> VnetResult<()>;

    /// Delete a device.
    async fn delete(&self, name: &str) -> VnetResult<()>;

    /// Look up a single link.
    async fn link(&self, name: &str) -> VnetResult<Option<Link>> {
        Ok(self.links().await?.get(name).cloned())
    }

    /// Look up a link that must exist.
    async fn require(&self, name: &str) -> VnetResult<Link> {
        self.link(name).await?.ok_or_else(|| VnetError::NotFound {
            kind: "link",
            name: name.to_string(),
        })
    }
}

/// [`LinkOps`] backed by the iproute2 `ip` tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpRoute2;

impl IpRoute2 {
    async fn ip(args: &[&str]) -> VnetResult<()> {
        run_checked("ip", args).await.map(drop)
    }
}

#[async_trait]
impl LinkOps for IpRoute2 {
    async fn links(&self) -> VnetResult<LinkTable> {
        let json = run_checked("ip", &["-json", "-details", "link", "show"]).await?;
        LinkTable::from_json(&json)
    }

    async fn add_bridge(&self, name: &str) -> VnetResult<()> {
        tracing::debug!(name, "Adding bridge");
        Self::ip(&["link", "add", "name", name, "type", "bridge"]).await
    }

    async fn add_veth(&self, name: &str, peer: &str) -> VnetResult<()> {
        tracing::debug!(name, peer, "Adding veth pair");
        Self::ip(&["link", "add", name, "type", "veth", "peer", "name", peer]).await
    }

    async fn set_up(&self, name: &str, up: bool) -> VnetResult<()> {
        let state = if up { "up" } else { "down" };
        tracing::debug!(name, state, "Setting link state");
        Self::ip(&["link", "set", "dev", name, state]).await
    }

    async fn set_address(&self, name: &str, mac: &MacAddress) -> VnetResult<()> {
        let mac = mac.to_string();
        tracing::debug!(name, %mac, "Setting link address");
        Self::ip(&["link", "set", "dev", name, "address", mac.as_str()]).await
    }

    async fn set_master(&self, name: &str, master: &str) -> VnetResult<()> {
        tracing::debug!(name, master, "Enslaving link");
        Self::ip(&["link", "set", "dev", name, "master", master]).await
    }

    async fn set_stp(&self, bridge: &str, enabled: bool) -> VnetResult<()> {
        let state = if enabled { "1" } else { "0" };
        tracing::debug!(bridge, enabled, "Setting STP state");
        Self::ip(&["link", "set", "dev", bridge, "type", "bridge", "stp_state", state]).await
    }

    async fn delete(&self, name: &str) -> VnetResult<()> {
        tracing::debug!(name, "Deleting link");
        Self::ip(&["link", "delete", "dev", name]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_JSON: &str = r#"[
        {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"mtu":65536,
         "operstate":"UNKNOWN","link_type":"loopback","address":"00:00:00:00:00:00"},
        {"ifindex":5,"ifname":"vnet-br0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],
         "operstate":"UP","link_type":"ether","address":"02:00:00:ab:cd:ef",
         "linkinfo":{"info_kind":"bridge","info_data":{"forward_delay":1500,"stp_state":1}}},
        {"ifindex":6,"ifname":"vnet-br1","flags":["BROADCAST","MULTICAST"],
         "operstate":"DOWN","link_type":"ether","address":"02:00:00:12:34:56",
         "linkinfo":{"info_kind":"bridge","info_data":{"stp_state":0}}},
        {"ifindex":7,"link":"vnet-veth1","ifname":"vnet-veth0","flags":["BROADCAST","UP"],
         "master":"vnet-br0","operstate":"UP","address":"a2:1b:3c:4d:5e:6f",
         "linkinfo":{"info_kind":"veth","info_slave_kind":"bridge"}},
        {"ifindex":8,"link":"vnet-veth0","ifname":"vnet-veth1","flags":["BROADCAST"],
         "master":"vnet-br1","operstate":"DOWN","address":"a2:1b:3c:4d:5e:70",
         "linkinfo":{"info_kind":"veth"}}
    ]"#;

    #[test]
    fn parse_link_table() {
        let table = LinkTable::from_json(IP_JSON).unwrap();
        assert_eq!(table.iter().count(), 5);

        let br0 = table.get("vnet-br0").unwrap();
        assert_eq!(br0.index, 5);
        assert!(br0.admin_up);
        assert_eq!(br0.oper_state, "UP");
        assert_eq!(br0.kind.as_deref(), Some("bridge"));
        assert_eq!(br0.stp_enabled, Some(true));

        let br1 = table.get("vnet-br1").unwrap();
        assert!(!br1.admin_up);
        assert_eq!(br1.stp_enabled, Some(false));
    }

    #[test]
    fn veth_peer_and_master_are_resolved() {
        let table = LinkTable::from_json(IP_JSON).unwrap();
        let veth0 = table.get("vnet-veth0").unwrap();
        assert_eq!(veth0.peer.as_deref(), Some("vnet-veth1"));
        assert_eq!(veth0.peer_index, Some(8));
        assert_eq!(veth0.master.as_deref(), Some("vnet-br0"));
        assert_eq!(veth0.master_index, Some(5));
        assert_eq!(veth0.stp_enabled, None);

        let veth1 = table.by_index(8).unwrap();
        assert_eq!(veth1.peer_index, Some(7));
        assert_eq!(veth1.master_index, Some(6));
    }

    #[test]
    fn empty_output_is_an_empty_table() {
        let table = LinkTable::from_json("  \n").unwrap();
        assert!(!table.contains("vnet-br0"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(LinkTable::from_json("{not json").is_err());
    }
}
