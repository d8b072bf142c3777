//! Container platform port and its LXD implementation.
//!
//! [`LxdClient`] drives the `lxc` CLI: REST calls go through `lxc query`
//! so requests and responses are the plain LXD API JSON.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vnet_common::command::{run_checked, run_with_input};
use vnet_common::{VnetError, VnetResult};

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// The container does not exist.
    Absent,
    /// Created but not running.
    Stopped,
    /// Running.
    Running,
    /// Any other platform status (freezing, error, ...).
    Unknown,
}

impl ContainerState {
    /// Map a platform status string.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Running => write!(f, "Running"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Device map of an instance: device name to its string properties.
pub type Devices = BTreeMap<String, BTreeMap<String, String>>;

/// An existing instance as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Instance name.
    pub name: String,
    /// Platform status string (`Running`, `Stopped`, ...).
    pub status: String,
    /// Applied profiles.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Instance configuration keys.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Instance-local devices.
    #[serde(default)]
    pub devices: Devices,
}

impl InstanceInfo {
    /// The state corresponding to the status string.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        ContainerState::from_status(&self.status)
    }
}

/// Image source of a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSource {
    /// Source type, `image` for an image alias.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Image alias.
    pub alias: String,
}

impl InstanceSource {
    /// Source from a local image alias.
    #[must_use]
    pub fn image(alias: &str) -> Self {
        Self {
            source_type: "image".to_string(),
            alias: alias.to_string(),
        }
    }
}

/// Creation request for a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Image to create the instance from.
    pub source: InstanceSource,
    /// Whether the instance is removed when stopped.
    pub ephemeral: bool,
    /// Instance configuration keys.
    pub config: BTreeMap<String, String>,
    /// Instance-local devices.
    pub devices: Devices,
    /// Profiles to apply.
    pub profiles: Vec<String>,
}

/// Operations of a container platform.
///
/// Every operation on a named instance fails with
/// [`VnetError::NotFound`] when the instance does not exist.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Fetch an instance.
    async fn get(&self, name: &str) -> VnetResult<InstanceInfo>;

    /// Fetch the live state of an instance.
    async fn state(&self, name: &str) -> VnetResult<ContainerState>;

    /// Create an instance, waiting for the operation to finish.
    async fn create(&self, spec: &InstanceSpec) -> VnetResult<()>;

    /// Start an instance, waiting for the platform to report the result.
    async fn start(&self, name: &str) -> VnetResult<()>;

    /// Stop an instance.
    async fn stop(&self, name: &str, wait: bool) -> VnetResult<()>;

    /// Delete an instance.
    async fn delete(&self, name: &str) -> VnetResult<()>;

    /// Run a command inside an instance, returning its stdout.
    async fn exec(&self, name: &str, command: &[&str]) -> VnetResult<String>;

    /// Write a file inside an instance, creating parent directories.
    async fn put_file(&self, name: &str, path: &str, content: &str) -> VnetResult<()>;

    /// Publish an instance as an image under `alias`.
    async fn publish(&self, name: &str, alias: &str) -> VnetResult<()>;

    /// Whether an instance exists.
    async fn exists(&self, name: &str) -> VnetResult<bool> {
        match self.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The observed state, with a missing instance reported as
    /// [`ContainerState::Absent`].
    async fn observe(&self, name: &str) -> VnetResult<ContainerState> {
        match self.state(name).await {
            Err(e) if e.is_not_found() => Ok(ContainerState::Absent),
            other => other,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceStateResponse {
    status: String,
}

#[derive(Debug, Serialize)]
struct StateChange {
    action: &'static str,
    timeout: i32,
    force: bool,
}

/// [`ContainerPlatform`] backed by the `lxc` client.
#[derive(Debug, Clone, Copy, Default)]
pub struct LxdClient;

impl LxdClient {
    async fn lxc(name: &str, args: &[&str]) -> VnetResult<String> {
        run_checked("lxc", args)
            .await
            .map_err(|e| not_found_as(e, name))
    }

    async fn change_state(name: &str, action: &'static str, wait: bool) -> VnetResult<()> {
        let body = serde_json::to_string(&StateChange {
            action,
            timeout: -1,
            force: false,
        })?;
        let path = format!("/1.0/instances/{name}/state");
        let mut args = vec!["query", "-X", "PUT", "-d", body.as_str()];
        if wait {
            args.insert(1, "--wait");
        }
        args.push(&path);
        Self::lxc(name, &args).await?;
        tracing::debug!(container = name, action, wait, "State change issued");
        Ok(())
    }
}

#[async_trait]
impl ContainerPlatform for LxdClient {
    async fn get(&self, name: &str) -> VnetResult<InstanceInfo> {
        let path = format!("/1.0/instances/{name}");
        let output = Self::lxc(name, &["query", path.as_str()]).await?;
        Ok(serde_json::from_str(&output)?)
    }

    async fn state(&self, name: &str) -> VnetResult<ContainerState> {
        let path = format!("/1.0/instances/{name}/state");
        let output = Self::lxc(name, &["query", path.as_str()]).await?;
        let response: InstanceStateResponse = serde_json::from_str(&output)?;
        Ok(ContainerState::from_status(&response.status))
    }

    async fn create(&self, spec: &InstanceSpec) -> VnetResult<()> {
        let body = serde_json::to_string(spec)?;
        run_checked(
            "lxc",
            &["query", "--wait", "-X", "POST", "-d", body.as_str(), "/1.0/instances"],
        )
        .await
        .map_err(|e| match e {
            VnetError::Command { message, .. } if message.contains("already exists") => {
                VnetError::ResourceConflict {
                    resource: format!("container {}", spec.name),
                }
            }
            other => other,
        })?;
        tracing::debug!(container = %spec.name, "Container created");
        Ok(())
    }

    async fn start(&self, name: &str) -> VnetResult<()> {
        Self::change_state(name, "start", true).await
    }

    async fn stop(&self, name: &str, wait: bool) -> VnetResult<()> {
        Self::change_state(name, "stop", wait).await
    }

    async fn delete(&self, name: &str) -> VnetResult<()> {
        let path = format!("/1.0/instances/{name}");
        Self::lxc(name, &["query", "--wait", "-X", "DELETE", path.as_str()]).await?;
        Ok(())
    }

    async fn exec(&self, name: &str, command: &[&str]) -> VnetResult<String> {
        let mut args = vec!["exec", name, "--"];
        args.extend_from_slice(command);
        Self::lxc(name, &args).await
    }

    async fn put_file(&self, name: &str, path: &str, content: &str) -> VnetResult<()> {
        let target = format!("{name}{path}");
        run_with_input(
            "lxc",
            &["file", "push", "--create-dirs", "-", target.as_str()],
            content.as_bytes(),
        )
        .await
        .map_err(|e| not_found_as(e, name))?;
        tracing::debug!(container = name, path, "File written");
        Ok(())
    }

    async fn publish(&self, name: &str, alias: &str) -> VnetResult<()> {
        Self::lxc(name, &["publish", name, "--alias", alias]).await?;
        tracing::info!(container = name, alias, "Image published");
        Ok(())
    }
}

/// Map a failed `lxc` call reporting a missing object to
/// [`VnetError::NotFound`] for the container `name`.
fn not_found_as(err: VnetError, name: &str) -> VnetError {
    match err {
        VnetError::Command { ref message, .. } if message.to_lowercase().contains("not found") => {
            VnetError::NotFound {
                kind: "container",
                name: name.to_string(),
            }
        }
        other => other,
    }
}
