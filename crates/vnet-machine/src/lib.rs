//! # vnet-machine
//!
//! Lifecycle of the containers ("machines") of a vnet topology.
//!
//! Machines move through `Absent -> Stopped -> Running -> Stopped ->
//! Absent`. Every transition is issued to a [`ContainerPlatform`] and, for
//! start and stop, followed by bounded polling until the observed state
//! converges.

#![warn(missing_docs)]

pub mod convergence;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod lifecycle;
pub mod netplan;
pub mod platform;
pub mod provider;

pub use lifecycle::{BatchReport, MachineManager, MachineStatusRow, render_machines};
pub use platform::{ContainerPlatform, ContainerState, InstanceInfo, InstanceSpec, LxdClient};
pub use provider::{LxcProvider, MachineProvider, ProviderKind, ProviderRegistry, StatusChange};
