//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use vnet_common::{Config, Settings, VnetError};
use vnet_machine::{BatchReport, StatusChange};

use crate::Vnet;

/// VNet - emulated networks of containers
#[derive(Parser, Debug)]
#[command(name = "vnet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Topology file
    pub config: PathBuf,

    /// Only act on these machines (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub machines: Vec<String>,

    /// Do not ask for confirmation
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Directory sniffers write their captures to
    #[arg(long, global = true, env = vnet_common::settings::PCAP_DIR_ENV)]
    pub pcap_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The action to perform.
    #[command(subcommand)]
    pub action: Action,
}

/// Topology actions.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Show machine, switch and veth status
    Show,

    /// Create machines
    Create,

    /// Bring the topology up and start machines
    Start {
        /// Capture traffic on every switch
        #[arg(long)]
        sniffer: bool,
    },

    /// Stop machines and bring the topology down
    Stop,

    /// Destroy machines and delete the topology
    Destroy,

    /// Kill the sniffers of the topology's switches
    KillSniffers,
}

impl Cli {
    /// Settings for this invocation: the environment, overridden by flags.
    #[must_use]
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::from_env();
        if self.yes {
            settings = settings.with_force(true);
        }
        if let Some(dir) = &self.pcap_dir {
            settings = settings.with_pcap_dir(dir.clone());
        }
        settings
    }

    /// Machines selected with `--machines`, if any.
    #[must_use]
    pub fn selection(&self) -> Option<&[String]> {
        (!self.machines.is_empty()).then_some(self.machines.as_slice())
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let vnet = Vnet::host(self.settings());
        self.execute_with(&vnet).await
    }

    /// Execute the CLI command against a prepared [`Vnet`].
    pub async fn execute_with(&self, vnet: &Vnet) -> Result<()> {
        let config = vnet.load_config(&self.config)?;
        let selection = self.selection();

        match &self.action {
            Action::Show => {
                println!("{}", vnet.show_machine_status(&config).await?);
                println!("{}", vnet.show_switch_status(&config).await?);
                if !config.veths.is_empty() {
                    println!("{}", vnet.show_veth_status(&config).await?);
                }
                Ok(())
            }

            Action::Create => {
                let report = vnet.create_machines(&config, selection).await?;
                print_report("created", &report);
                Ok(())
            }

            Action::Start { sniffer } => {
                let pcap_dir = vnet.settings().pcap_dir.clone();
                let up = vnet.bring_up_topology(&config, *sniffer, &pcap_dir).await?;
                for failure in &up.failures {
                    eprintln!("warning: {failure}");
                }
                if *sniffer {
                    for switch in config.switch_names(vnet.settings()) {
                        let path = vnet.settings().pcap_path(&switch);
                        println!("Capturing {switch} to {}", path.display());
                    }
                }
                let report = vnet
                    .change_machine_status(&config, selection, StatusChange::Start)
                    .await?;
                print_report("started", &report);
                Ok(())
            }

            Action::Stop => {
                let report = vnet
                    .change_machine_status(&config, selection, StatusChange::Stop)
                    .await?;
                print_report("stopped", &report);
                // Switches are shared, keep them up while other machines may run
                if selection.is_none() {
                    stop_topology(vnet, &config).await?;
                }
                Ok(())
            }

            Action::Destroy => {
                match vnet.destroy_machines(&config, selection).await {
                    Ok(report) => print_report("destroyed", &report),
                    Err(VnetError::Aborted) => {
                        println!("Aborted, nothing was destroyed");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
                if selection.is_none() {
                    vnet.delete_topology(&config).await?;
                    println!("Topology deleted");
                }
                Ok(())
            }

            Action::KillSniffers => {
                let killed = vnet.kill_sniffer_processes(&config)?;
                println!("{killed} sniffer(s) killed");
                Ok(())
            }
        }
    }
}

async fn stop_topology(vnet: &Vnet, config: &Config) -> Result<()> {
    let lingering = vnet.bring_down_topology(config).await?;
    println!("Topology down");
    if lingering
        && vnet.confirm("Sniffers are still running on the deactivated switches, kill them?")
    {
        let killed = vnet.kill_sniffer_processes(config)?;
        println!("{killed} sniffer(s) killed");
    }
    Ok(())
}

fn print_report(verb: &str, report: &BatchReport) {
    for name in &report.done {
        println!("Machine {name} {verb}");
    }
    for name in &report.untouched {
        println!("Machine {name} skipped");
    }
    for name in &report.unknown {
        eprintln!("warning: no config entry for machine {name}");
    }
    for (name, error) in &report.failed {
        eprintln!("error: {name}: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_start_with_machines() {
        let cli = Cli::parse_from([
            "vnet",
            "topology.yaml",
            "start",
            "--sniffer",
            "--machines",
            "router100,host102",
        ]);
        assert_eq!(cli.action, Action::Start { sniffer: true });
        assert_eq!(cli.config, PathBuf::from("topology.yaml"));
        assert_eq!(
            cli.selection(),
            Some(&["router100".to_string(), "host102".to_string()][..])
        );
    }

    #[test]
    fn parse_destroy_forced() {
        let cli = Cli::parse_from(["vnet", "-y", "topology.yaml", "destroy"]);
        assert_eq!(cli.action, Action::Destroy);
        assert!(cli.yes);
        assert!(cli.selection().is_none());
        assert!(cli.settings().force);
    }

    #[test]
    fn parse_kill_sniffers() {
        let cli = Cli::parse_from(["vnet", "topology.yaml", "kill-sniffers"]);
        assert_eq!(cli.action, Action::KillSniffers);
    }
}
