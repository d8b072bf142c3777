//! Binary smoke tests. None of these reach the host tools: they fail or
//! exit before any device or container is touched.

use assert_cmd::Command;
use predicates::prelude::*;

fn vnet() -> Command {
    let mut cmd = Command::cargo_bin("vnet").unwrap();
    cmd.env_remove("VNET_FORCE");
    cmd
}

#[test]
fn help_lists_actions() {
    vnet()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("kill-sniffers"))
        .stdout(predicate::str::contains("--machines"));
}

#[test]
fn missing_action_is_a_usage_error() {
    vnet().arg("topology.yaml").assert().failure().code(2);
}

#[test]
fn missing_config_file() {
    vnet()
        .args(["/nonexistent/topology.yaml", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unable to read"));
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("topology.yaml");
    std::fs::write(
        &path,
        "switches: 1\nmachines:\n  r1:\n    type: router\n    interfaces:\n      \
         eth0: {ipv4: 10.0.0.300/24, bridge: 4}\n",
    )
    .unwrap();

    vnet()
        .arg(&path)
        .arg("create")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid bridge number 4"))
        .stderr(predicate::str::contains("IPv4"));
}
