//! Status tables for switches and veth pairs.

use tabled::{Table, Tabled};
use vnet_common::{Config, Settings, VethConfig};

use crate::link::LinkTable;

/// Placeholder for values of devices that do not exist.
pub const NOT_AVAILABLE: &str = "NA";

/// One row of the switch status table.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct SwitchStatusRow {
    /// Device name.
    #[tabled(rename = "Name")]
    pub name: String,
    /// Operational state.
    #[tabled(rename = "Status")]
    pub status: String,
    /// Link-layer address.
    #[tabled(rename = "L2_addr")]
    pub address: String,
    /// Whether a sniffer is capturing on the switch.
    #[tabled(rename = "Sniffer")]
    pub sniffer: String,
    /// Whether spanning tree is enabled.
    #[tabled(rename = "STP")]
    pub stp: String,
    /// Machines with an interface on the switch.
    #[tabled(rename = "Used by")]
    pub used_by: String,
}

impl SwitchStatusRow {
    /// Build the row for `switch` from a link table snapshot.
    #[must_use]
    pub fn new(
        config: &Config,
        settings: &Settings,
        links: &LinkTable,
        switch: &str,
        sniffing: bool,
    ) -> Self {
        let used_by = config.machines_on_switch(settings, switch).join(", ");
        let Some(link) = links.get(switch) else {
            return Self {
                name: switch.to_string(),
                status: NOT_AVAILABLE.to_string(),
                address: NOT_AVAILABLE.to_string(),
                sniffer: NOT_AVAILABLE.to_string(),
                stp: NOT_AVAILABLE.to_string(),
                used_by,
            };
        };

        Self {
            name: switch.to_string(),
            status: link.oper_state.clone(),
            address: or_na(link.address.clone()),
            sniffer: sniffing.to_string(),
            stp: or_na(link.stp_enabled.map(|stp| stp.to_string())),
            used_by,
        }
    }
}

/// One row of the veth status table.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct VethStatusRow {
    /// Device name.
    #[tabled(rename = "Name")]
    pub name: String,
    /// Operational state.
    #[tabled(rename = "Status")]
    pub status: String,
    /// Link-layer address.
    #[tabled(rename = "L2_addr")]
    pub address: String,
    /// Other end of the pair.
    #[tabled(rename = "Peer")]
    pub peer: String,
    /// Switch the end is attached to.
    #[tabled(rename = "Master")]
    pub master: String,
}

impl VethStatusRow {
    /// Build the row for the veth end `name` from a link table snapshot.
    #[must_use]
    pub fn new(links: &LinkTable, name: &str, veth: &VethConfig) -> Self {
        let Some(link) = links.get(name) else {
            return Self {
                name: name.to_string(),
                status: NOT_AVAILABLE.to_string(),
                address: NOT_AVAILABLE.to_string(),
                peer: or_na(veth.peer.clone()),
                master: veth.bridge.clone(),
            };
        };

        // The peer of the configured end is only recorded on one side
        let peer = link.peer.clone().or_else(|| veth.peer.clone());
        Self {
            name: name.to_string(),
            status: link.oper_state.clone(),
            address: or_na(link.address.clone()),
            peer: with_index(peer, link.peer_index),
            master: with_index(link.master.clone(), link.master_index),
        }
    }
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn with_index(name: Option<String>, index: Option<u32>) -> String {
    match (name, index) {
        (Some(name), Some(index)) => format!("{name} ({index})"),
        (Some(name), None) => name,
        (None, _) => NOT_AVAILABLE.to_string(),
    }
}

/// Render switch rows as a table.
#[must_use]
pub fn render_switches(rows: &[SwitchStatusRow]) -> String {
    Table::new(rows).to_string()
}

/// Render veth rows as a table.
#[must_use]
pub fn render_veths(rows: &[VethStatusRow]) -> String {
    Table::new(rows).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;

    const CONFIG: &str = r#"
switches: 2
machines:
  router100:
    type: router
    interfaces:
      eth12: {ipv4: 192.168.0.2/24, bridge: 0}
  router101:
    type: router
    interfaces:
      eth12: {ipv4: 192.168.0.3/24, bridge: 0}
      eth13: {ipv4: 10.0.0.1/24, bridge: 1}
veths:
  vnet-veth0: {peer: vnet-veth1, bridge: vnet-br0}
  vnet-veth1: {bridge: vnet-br1, stp: true}
"#;

    fn config() -> Config {
        Config::from_yaml(CONFIG)
            .unwrap()
            .validate(&Settings::default())
            .unwrap()
    }

    fn link(index: u32, name: &str) -> Link {
        Link {
            index,
            name: name.to_string(),
            admin_up: true,
            oper_state: "UP".to_string(),
            address: Some("02:00:00:aa:bb:cc".to_string()),
            kind: None,
            peer: None,
            peer_index: None,
            master: None,
            master_index: None,
            stp_enabled: None,
        }
    }

    #[test]
    fn missing_switch_row() {
        let row = SwitchStatusRow::new(
            &config(),
            &Settings::default(),
            &LinkTable::default(),
            "vnet-br0",
            false,
        );
        assert_eq!(row.name, "vnet-br0");
        assert_eq!(row.status, "NA");
        assert_eq!(row.address, "NA");
        assert_eq!(row.sniffer, "NA");
        assert_eq!(row.stp, "NA");
        assert_eq!(row.used_by, "router100, router101");
    }

    #[test]
    fn present_switch_row() {
        let mut bridge = link(3, "vnet-br1");
        bridge.kind = Some("bridge".to_string());
        bridge.stp_enabled = Some(true);
        let table = LinkTable::new([bridge]);

        let row = SwitchStatusRow::new(&config(), &Settings::default(), &table, "vnet-br1", true);
        assert_eq!(row.status, "UP");
        assert_eq!(row.address, "02:00:00:aa:bb:cc");
        assert_eq!(row.sniffer, "true");
        assert_eq!(row.stp, "true");
        assert_eq!(row.used_by, "router101");
    }

    #[test]
    fn veth_rows() {
        let config = config();
        let mut end = link(5, "vnet-veth1");
        end.peer = Some("vnet-veth0".to_string());
        end.master = Some("vnet-br1".to_string());
        let table = LinkTable::new([link(4, "vnet-veth0"), end, link(3, "vnet-br1")]);

        let row = VethStatusRow::new(&table, "vnet-veth1", &config.veths["vnet-veth1"]);
        assert_eq!(row.peer, "vnet-veth0 (4)");
        assert_eq!(row.master, "vnet-br1 (3)");

        let missing =
            VethStatusRow::new(&LinkTable::default(), "vnet-veth0", &config.veths["vnet-veth0"]);
        assert_eq!(missing.status, "NA");
        assert_eq!(missing.peer, "vnet-veth1");
        assert_eq!(missing.master, "vnet-br0");
    }

    #[test]
    fn rendered_table_has_headers() {
        let rows = [SwitchStatusRow::new(
            &config(),
            &Settings::default(),
            &LinkTable::default(),
            "vnet-br0",
            false,
        )];
        let rendered = render_switches(&rows);
        for header in ["Name", "Status", "L2_addr", "Sniffer", "STP", "Used by"] {
            assert!(rendered.contains(header), "missing {header}");
        }
        assert!(rendered.contains("router100, router101"));
    }
}
