//! Batch lifecycle operations over the machines of a topology.
//!
//! Each requested machine is handled on its own: unknown names, missing
//! containers and failed transitions are logged and recorded, and never
//! stop the rest of the batch.

use std::sync::Arc;

use tabled::{Table, Tabled};
use vnet_common::{Config, Confirm, MachineConfig, VnetError, VnetResult};

use crate::platform::ContainerState;
use crate::provider::{MachineProvider, ProviderKind, ProviderRegistry, StatusChange};

/// Outcome of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Machines the operation was applied to.
    pub done: Vec<String>,
    /// Requested names without a config entry.
    pub unknown: Vec<String>,
    /// Machines left alone: already existing on create, absent on destroy.
    pub untouched: Vec<String>,
    /// Machines the operation failed on, with the error.
    pub failed: Vec<(String, String)>,
}

/// One row of the machine status table.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct MachineStatusRow {
    /// Machine name.
    #[tabled(rename = "Name")]
    pub name: String,
    /// Observed state, `NA` if the machine does not exist.
    #[tabled(rename = "Status")]
    pub status: String,
    /// Provider realizing the machine.
    #[tabled(rename = "Provider")]
    pub provider: String,
}

/// Render machine rows as a table.
#[must_use]
pub fn render_machines(rows: &[MachineStatusRow]) -> String {
    Table::new(rows).to_string()
}

/// Creates, starts, stops and destroys machines.
pub struct MachineManager {
    registry: ProviderRegistry,
    confirm: Arc<dyn Confirm>,
}

impl std::fmt::Debug for MachineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineManager")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl MachineManager {
    /// Create a machine manager.
    pub fn new(registry: ProviderRegistry, confirm: Arc<dyn Confirm>) -> Self {
        Self { registry, confirm }
    }

    /// Resolve a requested name to its provider, recording unknown names.
    fn resolve<'a>(
        &self,
        config: &'a Config,
        name: &str,
        report: &mut BatchReport,
    ) -> VnetResult<Option<(&'a MachineConfig, &dyn MachineProvider)>> {
        match config.machine(name) {
            Ok(machine) => Ok(Some((machine, self.registry.for_machine(machine.machine_type)?))),
            Err(e) => {
                tracing::warn!(machine = name, error = %e, "Skipping machine");
                report.unknown.push(name.to_string());
                Ok(None)
            }
        }
    }

    /// Create the requested machines (all when `names` is empty) and write
    /// their guest configuration.
    ///
    /// Machines that already exist are skipped. If there are any, one
    /// confirmation is requested before their guest configuration is
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error only if a machine type has no provider.
    pub async fn create(
        &self,
        config: &Config,
        names: Option<&[String]>,
    ) -> VnetResult<BatchReport> {
        let mut report = BatchReport::default();

        for name in config.select_machines(names) {
            let Some((machine, provider)) = self.resolve(config, &name, &mut report)? else {
                continue;
            };
            match provider.exists(&name).await {
                Ok(true) => {
                    tracing::warn!(machine = %name, "Machine already exists, skipping");
                    report.untouched.push(name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(machine = %name, error = %e, "Unable to look up machine");
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            }

            let result = async {
                provider.create(&name, machine).await?;
                provider.configure(&name, machine).await
            }
            .await;
            match result {
                Ok(()) => {
                    tracing::info!(machine = %name, "Machine created");
                    report.done.push(name);
                }
                Err(e) => {
                    tracing::error!(machine = %name, error = %e, "Unable to create machine");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if !report.untouched.is_empty() {
            self.reconfigure_existing(config, &report.untouched).await?;
        }
        Ok(report)
    }

    async fn reconfigure_existing(&self, config: &Config, existing: &[String]) -> VnetResult<()> {
        let message = format!(
            "Some machines already existed ({}), their network and forwarding \
             configuration will be overwritten",
            existing.join(", ")
        );
        if !self.confirm.confirm(&message) {
            tracing::info!("Leaving configuration of existing machines untouched");
            return Ok(());
        }

        for name in existing {
            let machine = config.machine(name)?;
            let provider = self.registry.for_machine(machine.machine_type)?;
            if let Err(e) = provider.configure(name, machine).await {
                tracing::error!(machine = %name, error = %e, "Unable to configure machine");
            }
        }
        Ok(())
    }

    /// Start or stop the requested machines (all when `names` is empty)
    /// and wait for each to converge.
    ///
    /// Timeouts and missing machines are logged and recorded as failures.
    ///
    /// # Errors
    ///
    /// Returns an error only if a machine type has no provider.
    pub async fn change_status(
        &self,
        config: &Config,
        names: Option<&[String]>,
        change: StatusChange,
    ) -> VnetResult<BatchReport> {
        let mut report = BatchReport::default();

        for name in config.select_machines(names) {
            let Some((_, provider)) = self.resolve(config, &name, &mut report)? else {
                continue;
            };
            tracing::info!(
                machine = %name,
                provider = %provider.kind(),
                %change,
                "Changing machine status"
            );

            match provider.change_status(&name, change).await {
                Ok(()) => report.done.push(name),
                Err(e @ VnetError::ConvergenceTimeout { .. }) => {
                    tracing::error!(machine = %name, error = %e, "Machine did not converge");
                    report.failed.push((name, e.to_string()));
                }
                Err(e) => {
                    tracing::error!(machine = %name, error = %e, "Unable to {change} machine");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Destroy the requested machines (all when `names` is empty).
    ///
    /// One confirmation naming every target is requested first.
    ///
    /// # Errors
    ///
    /// Returns [`VnetError::Aborted`] if the confirmation is declined, in
    /// which case nothing is deleted.
    pub async fn destroy(
        &self,
        config: &Config,
        names: Option<&[String]>,
    ) -> VnetResult<BatchReport> {
        let targets = config.select_machines(names);
        let message = format!(
            "Requesting confirmation of deletion for the following machines: {}",
            targets.join(", ")
        );
        if !self.confirm.confirm(&message) {
            return Err(VnetError::Aborted);
        }

        let mut report = BatchReport::default();
        for name in targets {
            let Some((_, provider)) = self.resolve(config, &name, &mut report)? else {
                continue;
            };
            match provider.destroy(&name).await {
                Ok(()) => report.done.push(name),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        machine = %name,
                        "Machine does not exist, maybe it was already deleted"
                    );
                    report.untouched.push(name);
                }
                Err(e) => {
                    tracing::error!(machine = %name, error = %e, "Unable to destroy machine");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Status row of every machine in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if a machine type has no provider or a status
    /// cannot be read.
    pub async fn status(&self, config: &Config) -> VnetResult<Vec<MachineStatusRow>> {
        let mut rows = Vec::with_capacity(config.machines.len());
        for (name, machine) in &config.machines {
            let kind = ProviderKind::for_machine_type(machine.machine_type);
            let state = self.registry.get(kind)?.status(name).await?;
            let status = match state {
                ContainerState::Absent => "NA".to_string(),
                other => other.to_string(),
            };
            rows.push(MachineStatusRow {
                name: name.clone(),
                status,
                provider: kind.to_string(),
            });
        }
        Ok(rows)
    }
}
