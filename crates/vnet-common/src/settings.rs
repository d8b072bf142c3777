//! Runtime settings for vnet.
//!
//! Settings are built once at startup and passed by reference to everything
//! that needs them. Nothing in the workspace reads them from globals.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the sniffer capture directory.
pub const PCAP_DIR_ENV: &str = "VNET_SNIFFER_PCAP_DIR";
/// Environment variable overriding the base image alias.
pub const BASE_IMAGE_ENV: &str = "VNET_LXC_BASE_IMAGE";
/// Environment variable that skips confirmation prompts when set.
pub const FORCE_ENV: &str = "VNET_FORCE";

/// Bounded polling policy for state convergence.
///
/// The delay grows linearly with the attempt number:
/// `base_sleep + attempt * base_sleep * backoff_multiplier`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of status checks.
    pub max_attempts: u32,
    /// Base sleep between checks.
    pub base_sleep: Duration,
    /// Multiplier applied to the attempt-scaled part of the delay.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Sleep to perform after the given failed attempt (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_sleep
            + self
                .base_sleep
                .mul_f64(f64::from(attempt) * self.backoff_multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            base_sleep: Duration::from_secs(4),
            backoff_multiplier: 0.3,
        }
    }
}

/// Immutable settings shared by the topology and machine managers.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Prefix of switch bridge devices (default: `vnet-br`).
    pub bridge_prefix: String,
    /// Directory that sniffers write their pcap files to.
    pub pcap_dir: PathBuf,
    /// Alias of the image new machines are created from.
    pub base_image_alias: String,
    /// Container profile applied to every machine.
    pub profile: String,
    /// Guest path of the generated network declaration.
    pub netplan_path: String,
    /// Convergence polling policy.
    pub retry: RetryPolicy,
    /// Pause after issuing a start/stop before the first status check.
    pub settle_delay: Duration,
    /// Skip confirmation prompts.
    pub force: bool,
}

impl Settings {
    /// Build settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            pcap_dir: lookup(PCAP_DIR_ENV)
                .filter(|v| !v.is_empty())
                .map_or(defaults.pcap_dir, PathBuf::from),
            base_image_alias: lookup(BASE_IMAGE_ENV)
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.base_image_alias),
            force: lookup(FORCE_ENV).is_some_and(|v| is_truthy(&v)),
            ..Self::default()
        }
    }

    /// Override the capture directory.
    #[must_use]
    pub fn with_pcap_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pcap_dir = dir.into();
        self
    }

    /// Override the polling policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the confirmation behaviour.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Device name of the switch with the given index.
    #[must_use]
    pub fn switch_name(&self, index: u32) -> String {
        format!("{}{}", self.bridge_prefix, index)
    }

    /// Device names of the first `count` switches.
    #[must_use]
    pub fn switch_names(&self, count: u32) -> Vec<String> {
        (0..count).map(|i| self.switch_name(i)).collect()
    }

    /// Capture file of a switch sniffer.
    #[must_use]
    pub fn pcap_path(&self, switch: &str) -> PathBuf {
        pcap_path(&self.pcap_dir, switch)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge_prefix: "vnet-br".to_string(),
            pcap_dir: PathBuf::from("/tmp"),
            base_image_alias: "vnet-base-image".to_string(),
            profile: "vnet-profile".to_string(),
            netplan_path: "/etc/netplan/10-vnet-config.yaml".to_string(),
            retry: RetryPolicy::default(),
            settle_delay: Duration::from_secs(1),
            force: false,
        }
    }
}

/// Capture file for `switch` inside `dir`.
#[must_use]
pub fn pcap_path(dir: &Path, switch: &str) -> PathBuf {
    dir.join(format!("{switch}.pcap"))
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_names() {
        let settings = Settings::default();
        assert_eq!(settings.switch_name(0), "vnet-br0");
        assert_eq!(settings.switch_names(3), ["vnet-br0", "vnet-br1", "vnet-br2"]);
        assert_eq!(
            settings.pcap_path("vnet-br1"),
            PathBuf::from("/tmp/vnet-br1.pcap")
        );
    }

    #[test]
    fn from_vars_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (PCAP_DIR_ENV, "/var/tmp/captures"),
            (BASE_IMAGE_ENV, "lab-image"),
            (FORCE_ENV, "1"),
        ]);
        let settings = Settings::from_vars(|k| vars.get(k).map(ToString::to_string));
        assert_eq!(settings.pcap_dir, PathBuf::from("/var/tmp/captures"));
        assert_eq!(settings.base_image_alias, "lab-image");
        assert!(settings.force);
    }

    #[test]
    fn force_is_off_for_falsy_values() {
        for value in ["", "0", "false", "No"] {
            let settings = Settings::from_vars(|k| (k == FORCE_ENV).then(|| value.to_string()));
            assert!(!settings.force, "{value:?} should not force");
        }
    }

    #[test]
    fn retry_delay_is_attempt_scaled() {
        let retry = RetryPolicy::default();
        let close =
            |a: Duration, ms: u64| a.abs_diff(Duration::from_millis(ms)) < Duration::from_micros(1);
        assert!(close(retry.delay(0), 4000));
        assert!(close(retry.delay(1), 5200));
        assert!(close(retry.delay(5), 10_000));
        assert!(retry.delay(2) > retry.delay(1));
    }
}
