//! # vnet-common
//!
//! Shared types for the vnet virtual network manager.
//!
//! This crate provides functionality used across all vnet crates:
//! - The validated topology configuration model
//! - Immutable runtime settings
//! - MAC address generation and validation
//! - The confirmation port used before destructive operations
//! - Common error types

#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod confirm;
pub mod error;
pub mod mac;
pub mod settings;

pub use config::{Config, InterfaceConfig, MachineConfig, MachineType, RouteConfig, VethConfig};
pub use confirm::{AlwaysConfirm, Confirm, TerminalConfirm};
pub use error::{VnetError, VnetResult};
pub use mac::MacAddress;
pub use settings::{RetryPolicy, Settings};
