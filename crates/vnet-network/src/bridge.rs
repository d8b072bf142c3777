//! Switch (kernel bridge) management.

use vnet_common::{MacAddress, VnetResult};

use crate::link::LinkOps;

/// A switch device on the host.
pub struct Switch<'a> {
    links: &'a dyn LinkOps,
    name: &'a str,
}

impl<'a> Switch<'a> {
    /// Handle for the switch device `name`.
    pub fn new(links: &'a dyn LinkOps, name: &'a str) -> Self {
        Self { links, name }
    }

    /// The device name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Whether the device exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the link table cannot be read.
    pub async fn exists(&self) -> VnetResult<bool> {
        Ok(self.links.link(self.name).await?.is_some())
    }

    /// Create the bridge if absent, then give it a fresh MAC and bring it up.
    ///
    /// The address can only change while the device is down, so the
    /// device is cycled on every call. Returns whether the bridge was
    /// created.
    ///
    /// # Errors
    ///
    /// Returns an error if any device operation fails.
    pub async fn create(&self) -> VnetResult<bool> {
        let created = if self.exists().await? {
            tracing::debug!(switch = self.name, "Switch already exists");
            false
        } else {
            self.links.add_bridge(self.name).await?;
            tracing::info!(switch = self.name, "Switch created");
            true
        };

        let mac = MacAddress::random();
        self.links.set_up(self.name, false).await?;
        self.links.set_address(self.name, &mac).await?;
        self.links.set_up(self.name, true).await?;
        tracing::debug!(switch = self.name, %mac, "Switch address set");

        Ok(created)
    }

    /// Set the administrative state if the device exists.
    ///
    /// Returns whether the device exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be changed.
    pub async fn set_state(&self, up: bool) -> VnetResult<bool> {
        if !self.exists().await? {
            return Ok(false);
        }
        self.links.set_up(self.name, up).await?;
        tracing::debug!(switch = self.name, up, "Switch state changed");
        Ok(true)
    }

    /// Delete the device if it exists.
    ///
    /// Returns whether a device was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the device exists and cannot be deleted.
    pub async fn delete(&self) -> VnetResult<bool> {
        if !self.exists().await? {
            tracing::debug!(switch = self.name, "Switch already absent");
            return Ok(false);
        }
        self.links.delete(self.name).await?;
        tracing::info!(switch = self.name, "Switch deleted");
        Ok(true)
    }
}
