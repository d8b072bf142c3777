//! # vnet-network
//!
//! Network topology construction for vnet.
//!
//! Switches are kernel bridges named `vnet-br{i}`, optionally connected to
//! each other through veth pairs. Every switch gets an isolation rule so the
//! host never sends its own traffic onto it, and can be watched by a
//! `tcpdump` sniffer.

#![warn(missing_docs)]

pub mod bridge;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod isolation;
pub mod link;
pub mod sniffer;
pub mod status;
pub mod topology;
pub mod veth;

pub use isolation::{Firewall, IsolationRule, Iptables};
pub use link::{IpRoute2, Link, LinkOps, LinkTable};
pub use sniffer::{ProcFs, ProcessInfo, ProcessTable, SnifferManager};
pub use status::{SwitchStatusRow, VethStatusRow};
pub use topology::Topology;
