//! Switch isolation.
//!
//! Each switch gets a packet filter rule dropping host output on the
//! bridge, so traffic from the emulated network is never routed through
//! the real host network.

use async_trait::async_trait;
use vnet_common::VnetResult;
use vnet_common::command::{run, run_checked};

/// A DROP rule for traffic leaving through a switch device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRule {
    /// Chain the rule lives in.
    pub chain: &'static str,
    /// Outgoing interface matched by the rule.
    pub out_interface: String,
}

impl IsolationRule {
    /// The isolation rule for a switch.
    #[must_use]
    pub fn for_switch(switch: &str) -> Self {
        Self {
            chain: "OUTPUT",
            out_interface: switch.to_string(),
        }
    }

    /// iptables arguments for `operation` (`-C`, `-A` or `-D`).
    #[must_use]
    pub fn args<'a>(&'a self, operation: &'a str) -> [&'a str; 6] {
        [operation, self.chain, "-o", self.out_interface.as_str(), "-j", "DROP"]
    }
}

/// Host packet filter.
#[async_trait]
pub trait Firewall: Send + Sync {
    /// Whether the rule is installed.
    async fn contains(&self, rule: &IsolationRule) -> VnetResult<bool>;

    /// Append the rule.
    async fn append(&self, rule: &IsolationRule) -> VnetResult<()>;

    /// Remove the rule.
    async fn remove(&self, rule: &IsolationRule) -> VnetResult<()>;
}

/// [`Firewall`] backed by `iptables`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iptables;

#[async_trait]
impl Firewall for Iptables {
    async fn contains(&self, rule: &IsolationRule) -> VnetResult<bool> {
        // -C exits non-zero when the rule is missing
        let output = run("iptables", &rule.args("-C")).await?;
        Ok(output.status.success())
    }

    async fn append(&self, rule: &IsolationRule) -> VnetResult<()> {
        run_checked("iptables", &rule.args("-A")).await?;
        tracing::debug!(
            chain = rule.chain,
            interface = %rule.out_interface,
            "Isolation rule added"
        );
        Ok(())
    }

    async fn remove(&self, rule: &IsolationRule) -> VnetResult<()> {
        run_checked("iptables", &rule.args("-D")).await?;
        tracing::debug!(
            chain = rule.chain,
            interface = %rule.out_interface,
            "Isolation rule removed"
        );
        Ok(())
    }
}

/// Install the isolation rule for `switch` unless it is already present.
///
/// Returns whether a rule was added.
///
/// # Errors
///
/// Returns an error if the rule is missing and cannot be appended.
pub async fn ensure_rule(firewall: &dyn Firewall, switch: &str) -> VnetResult<bool> {
    let rule = IsolationRule::for_switch(switch);
    match firewall.contains(&rule).await {
        Ok(true) => {
            tracing::debug!(switch, "Isolation rule already present");
            return Ok(false);
        }
        Ok(false) => {}
        Err(e) => tracing::debug!(switch, error = %e, "Isolation probe failed, adding rule"),
    }
    firewall.append(&rule).await?;
    tracing::info!(switch, "Switch isolated from host network");
    Ok(true)
}

/// Remove the isolation rule for `switch` if it is present.
///
/// Returns whether a rule was removed. A failed probe counts as absent.
///
/// # Errors
///
/// Returns an error if the rule is present and cannot be removed.
pub async fn remove_rule(firewall: &dyn Firewall, switch: &str) -> VnetResult<bool> {
    let rule = IsolationRule::for_switch(switch);
    match firewall.contains(&rule).await {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(e) => {
            tracing::debug!(switch, error = %e, "Isolation probe failed, leaving rules alone");
            return Ok(false);
        }
    }
    firewall.remove(&rule).await?;
    Ok(true)
}
