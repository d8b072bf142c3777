//! End-to-end topology and machine lifecycle against in-memory backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use vnet::Vnet;
use vnet::cli::Cli;
use vnet_common::{AlwaysConfirm, Confirm, Settings, VnetError};
use vnet_machine::fake::FakePlatform;
use vnet_machine::{ContainerState, StatusChange};
use vnet_network::fake::{FakeFirewall, FakeLinks, FakeProcesses};
use vnet_network::{LinkOps, SnifferManager, Topology};

const TOPOLOGY: &str = r"
switches: 2
machines:
  router100:
    type: router
    interfaces:
      eth12:
        ipv4: 192.168.0.2/24
        bridge: 0
  host102:
    type: host
    interfaces:
      eth0:
        ipv4: 10.0.0.2/24
        bridge: 1
        routes:
          - {to: default, via: 10.0.0.1}
veths:
  vnet-veth0: {peer: vnet-veth1, bridge: vnet-br0}
  vnet-veth1: {bridge: vnet-br1}
";

struct Decline;

impl Confirm for Decline {
    fn confirm(&self, _message: &str) -> bool {
        false
    }
}

struct Lab {
    vnet: Vnet,
    links: Arc<FakeLinks>,
    processes: Arc<FakeProcesses>,
    platform: Arc<FakePlatform>,
    _dir: tempfile::TempDir,
    config_path: PathBuf,
}

fn lab(confirm: Arc<dyn Confirm>) -> Lab {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("topology.yaml");
    std::fs::write(&config_path, TOPOLOGY).unwrap();

    let settings = Settings::default().with_pcap_dir(dir.path());
    let links = Arc::new(FakeLinks::default());
    let processes = Arc::new(FakeProcesses::default());
    let platform = Arc::new(FakePlatform::default());
    let topology = Topology::new(
        settings.clone(),
        links.clone(),
        Arc::new(FakeFirewall::default()),
        SnifferManager::new(processes.clone()),
    );
    let vnet = Vnet::new(settings, topology, platform.clone(), confirm);

    Lab {
        vnet,
        links,
        processes,
        platform,
        _dir: dir,
        config_path,
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn example_router_is_listed_on_its_switch() {
    let lab = lab(Arc::new(AlwaysConfirm));
    let config = lab.vnet.load_config(&lab.config_path).unwrap();

    let mac = &config.machines["router100"].interfaces["eth12"].mac;
    assert!(mac.starts_with("02:"), "generated MAC {mac}");

    let created = lab.vnet.create_machines(&config, None).await.unwrap();
    assert_eq!(created.done.len(), 2);

    let spec = lab.platform.spec("router100").unwrap();
    assert_eq!(spec.devices["eth12"]["parent"], "vnet-br0");
    assert_eq!(&spec.devices["eth12"]["hwaddr"], mac);

    lab.vnet
        .bring_up_topology(&config, false, Path::new("/tmp"))
        .await
        .unwrap();
    let started = lab
        .vnet
        .change_machine_status(&config, None, StatusChange::Start)
        .await
        .unwrap();
    assert!(started.failed.is_empty());
    assert_eq!(lab.platform.current("router100"), ContainerState::Running);

    let switches = lab.vnet.show_switch_status(&config).await.unwrap();
    let br0 = switches.lines().find(|l| l.contains("vnet-br0")).unwrap();
    assert!(br0.contains("router100"));
    assert!(br0.contains("UP"));
    let br1 = switches.lines().find(|l| l.contains("vnet-br1")).unwrap();
    assert!(br1.contains("host102"));

    let machines = lab.vnet.show_machine_status(&config).await.unwrap();
    assert!(machines.contains("Running"));

    let veths = lab.vnet.show_veth_status(&config).await.unwrap();
    assert!(veths.contains("vnet-veth1"));
}

#[tokio::test]
async fn stop_reports_lingering_sniffers() {
    let lab = lab(Arc::new(AlwaysConfirm));
    let config = lab.vnet.load_config(&lab.config_path).unwrap();

    let pcap_dir = lab.vnet.settings().pcap_dir.clone();
    let report = lab
        .vnet
        .bring_up_topology(&config, true, &pcap_dir)
        .await
        .unwrap();
    assert_eq!(report.sniffers_started, 2);
    let capture = &lab.processes.list()[0].cmdline;
    assert!(capture.iter().any(|arg| arg.ends_with("vnet-br0.pcap")));

    assert!(lab.vnet.bring_down_topology(&config).await.unwrap());
    assert_eq!(lab.vnet.kill_sniffer_processes(&config).unwrap(), 2);
    assert!(!lab.vnet.bring_down_topology(&config).await.unwrap());

    lab.vnet.delete_topology(&config).await.unwrap();
    assert!(lab.links.names().is_empty());
}

#[tokio::test]
async fn declined_destroy_keeps_everything() {
    let lab = lab(Arc::new(Decline));
    let config = lab.vnet.load_config(&lab.config_path).unwrap();
    lab.vnet.create_machines(&config, None).await.unwrap();

    let err = lab.vnet.destroy_machines(&config, None).await.unwrap_err();
    assert!(matches!(err, VnetError::Aborted));
    assert_eq!(lab.platform.count("delete"), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn cli_start_then_destroy() {
    let lab = lab(Arc::new(AlwaysConfirm));
    let path = lab.config_path.to_string_lossy().into_owned();

    Cli::parse_from(["vnet", path.as_str(), "create"])
        .execute_with(&lab.vnet)
        .await
        .unwrap();
    Cli::parse_from(["vnet", path.as_str(), "start", "--machines", "router100"])
        .execute_with(&lab.vnet)
        .await
        .unwrap();

    assert_eq!(lab.platform.current("router100"), ContainerState::Running);
    assert_eq!(lab.platform.current("host102"), ContainerState::Stopped);
    assert!(lab.links.link("vnet-br1").await.unwrap().is_some());

    Cli::parse_from(["vnet", path.as_str(), "destroy"])
        .execute_with(&lab.vnet)
        .await
        .unwrap();
    assert_eq!(lab.platform.current("router100"), ContainerState::Absent);
    assert!(lab.links.names().is_empty());
}

#[tokio::test]
async fn cli_declined_destroy_is_not_an_error() {
    let lab = lab(Arc::new(Decline));
    let path = lab.config_path.to_string_lossy().into_owned();

    Cli::parse_from(["vnet", path.as_str(), "create"])
        .execute_with(&lab.vnet)
        .await
        .unwrap();
    Cli::parse_from(["vnet", path.as_str(), "destroy"])
        .execute_with(&lab.vnet)
        .await
        .unwrap();
    assert_eq!(lab.platform.count("delete"), 0);
    assert_eq!(lab.platform.current("host102"), ContainerState::Stopped);
}

#[tokio::test]
async fn invalid_topology_is_rejected_before_any_change() {
    let lab = lab(Arc::new(AlwaysConfirm));
    std::fs::write(
        &lab.config_path,
        "switches: 1\nmachines:\n  r1:\n    type: router\n    interfaces:\n      \
         eth0: {ipv4: 10.0.0.1/24, bridge: 3}\n",
    )
    .unwrap();

    let path = lab.config_path.to_string_lossy().into_owned();
    let result = Cli::parse_from(["vnet", path.as_str(), "create"])
        .execute_with(&lab.vnet)
        .await;
    assert!(result.is_err());
    assert!(lab.platform.calls().is_empty());
}
