//! Topology construction and teardown.
//!
//! Every operation reads the link table before acting, so repeating an
//! operation never creates duplicate devices or rules. Switches are
//! handled before veths on the way up and after them on the way down.

use std::path::Path;
use std::sync::Arc;

use vnet_common::{Config, Settings, VnetResult};

use crate::bridge::Switch;
use crate::isolation::{self, Firewall, Iptables};
use crate::link::{IpRoute2, LinkOps};
use crate::sniffer::SnifferManager;
use crate::status::{SwitchStatusRow, VethStatusRow};
use crate::veth;

/// Outcome of [`Topology::bring_up`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BringUpReport {
    /// Switches that did not exist before.
    pub switches_created: usize,
    /// Veth pairs that did not exist before.
    pub veths_created: usize,
    /// Sniffers started by this call.
    pub sniffers_started: usize,
    /// Non-fatal failures, one message per failed step.
    pub failures: Vec<String>,
}

/// The switches and veth pairs of a configuration on the host.
pub struct Topology {
    settings: Settings,
    links: Arc<dyn LinkOps>,
    firewall: Arc<dyn Firewall>,
    sniffers: SnifferManager,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Topology {
    /// Create a topology manager on top of host backends.
    pub fn new(
        settings: Settings,
        links: Arc<dyn LinkOps>,
        firewall: Arc<dyn Firewall>,
        sniffers: SnifferManager,
    ) -> Self {
        Self {
            settings,
            links,
            firewall,
            sniffers,
        }
    }

    /// Topology manager for the local host.
    #[must_use]
    pub fn host(settings: Settings) -> Self {
        Self::new(
            settings,
            Arc::new(IpRoute2),
            Arc::new(Iptables),
            SnifferManager::host(),
        )
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sniffer manager in use.
    #[must_use]
    pub const fn sniffers(&self) -> &SnifferManager {
        &self.sniffers
    }

    /// Create and activate every switch and veth pair, isolate the
    /// switches and optionally start sniffers on them.
    ///
    /// Isolation and sniffer failures are logged and reported without
    /// stopping the remaining steps.
    ///
    /// # Errors
    ///
    /// Returns an error if a device cannot be created or configured.
    pub async fn bring_up(
        &self,
        config: &Config,
        sniffer: bool,
        pcap_dir: &Path,
    ) -> VnetResult<BringUpReport> {
        let mut report = BringUpReport::default();
        let switches = config.switch_names(&self.settings);
        tracing::info!(
            switches = switches.len(),
            veths = config.veths.len(),
            "Bringing up topology"
        );

        for name in &switches {
            if Switch::new(self.links.as_ref(), name).create().await? {
                report.switches_created += 1;
            }
            if let Err(e) = isolation::ensure_rule(self.firewall.as_ref(), name).await {
                tracing::warn!(switch = %name, error = %e, "Unable to isolate switch");
                report.failures.push(format!("isolation of {name}: {e}"));
            }
        }

        for (name, peer, _) in config.veth_pairs() {
            if veth::create_pair(self.links.as_ref(), name, peer).await? {
                report.veths_created += 1;
            }
        }
        for (name, spec) in &config.veths {
            veth::attach(self.links.as_ref(), name, spec).await?;
        }

        if sniffer {
            for name in &switches {
                match self.sniffers.start(name, pcap_dir) {
                    Ok(true) => report.sniffers_started += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(switch = %name, error = %e, "Unable to start sniffer");
                        report.failures.push(format!("sniffer on {name}: {e}"));
                    }
                }
            }
        }

        Ok(report)
    }

    /// Set existing veths down, then existing switches.
    ///
    /// Returns true if a sniffer is still capturing on one of the
    /// deactivated switches. Sniffers are never killed here.
    ///
    /// # Errors
    ///
    /// Returns an error if a device state cannot be changed or the process
    /// list cannot be read.
    pub async fn bring_down(&self, config: &Config) -> VnetResult<bool> {
        tracing::info!("Bringing down topology");
        for name in config.veths.keys() {
            if veth::set_down(self.links.as_ref(), name).await? {
                tracing::debug!(veth = %name, "Veth down");
            }
        }

        let mut deactivated = Vec::new();
        for name in config.switch_names(&self.settings) {
            if Switch::new(self.links.as_ref(), &name).set_state(false).await? {
                deactivated.push(name);
            }
        }

        let mut lingering = false;
        for name in &deactivated {
            if self.sniffers.is_running(name)? {
                tracing::warn!(switch = %name, "Sniffer still running on deactivated switch");
                lingering = true;
            }
        }
        Ok(lingering)
    }

    /// Delete existing veths, then existing switches and their isolation
    /// rules. Missing devices are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing device cannot be deleted.
    pub async fn delete(&self, config: &Config) -> VnetResult<()> {
        tracing::info!("Deleting topology");
        for name in config.veths.keys() {
            veth::delete(self.links.as_ref(), name).await?;
        }
        for name in config.switch_names(&self.settings) {
            Switch::new(self.links.as_ref(), &name).delete().await?;
            if let Err(e) = isolation::remove_rule(self.firewall.as_ref(), &name).await {
                tracing::warn!(switch = %name, error = %e, "Unable to remove isolation rule");
            }
        }
        Ok(())
    }

    /// Terminate the sniffers of every switch in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read or a sniffer
    /// cannot be signalled.
    pub fn kill_sniffers(&self, config: &Config) -> VnetResult<usize> {
        let killed = self.sniffers.kill(&config.switch_names(&self.settings))?;
        tracing::info!(killed, "Sniffers killed");
        Ok(killed)
    }

    /// Status row of every switch.
    ///
    /// # Errors
    ///
    /// Returns an error if the link table or process list cannot be read.
    pub async fn switch_status(&self, config: &Config) -> VnetResult<Vec<SwitchStatusRow>> {
        let table = self.links.links().await?;
        config
            .switch_names(&self.settings)
            .iter()
            .map(|name| {
                let sniffing = self.sniffers.is_running(name)?;
                Ok(SwitchStatusRow::new(config, &self.settings, &table, name, sniffing))
            })
            .collect()
    }

    /// Status row of every configured veth end.
    ///
    /// # Errors
    ///
    /// Returns an error if the link table cannot be read.
    pub async fn veth_status(&self, config: &Config) -> VnetResult<Vec<VethStatusRow>> {
        let table = self.links.links().await?;
        Ok(config
            .veths
            .iter()
            .map(|(name, spec)| VethStatusRow::new(&table, name, spec))
            .collect())
    }
}
