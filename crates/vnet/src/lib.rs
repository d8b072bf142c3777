//! # vnet
//!
//! Build and operate emulated virtual networks on a single Linux host.
//!
//! A topology is a set of switches (kernel bridges `vnet-br{i}`),
//! optional veth pairs connecting them, and machines (LXD containers)
//! plugged into the switches. [`Vnet`] exposes the operations behind the
//! `vnet` command line.
//!
//! ```no_run
//! use std::path::Path;
//! use vnet::Vnet;
//! use vnet_common::Settings;
//!
//! # async fn example() -> vnet_common::VnetResult<()> {
//! let vnet = Vnet::host(Settings::from_env());
//! let config = vnet.load_config(Path::new("topology.yaml"))?;
//! vnet.bring_up_topology(&config, false, Path::new("/tmp")).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod orchestrator;

pub use orchestrator::Vnet;
