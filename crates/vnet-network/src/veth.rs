//! Veth pairs connecting switches.

use vnet_common::{VethConfig, VnetResult};

use crate::link::LinkOps;

/// Create the pair `name`/`peer` unless `name` already exists.
///
/// Returns whether the pair was created.
///
/// # Errors
///
/// Returns an error if the link table cannot be read or the pair cannot
/// be added.
pub async fn create_pair(links: &dyn LinkOps, name: &str, peer: &str) -> VnetResult<bool> {
    if links.link(name).await?.is_some() {
        tracing::debug!(veth = name, peer, "Veth pair already exists");
        return Ok(false);
    }
    links.add_veth(name, peer).await?;
    tracing::info!(veth = name, peer, "Veth pair created");
    Ok(true)
}

/// Attach one end to its switch, apply the switch STP setting and bring
/// the end up.
///
/// # Errors
///
/// Returns an error if the end or its switch does not exist, or a device
/// operation fails.
pub async fn attach(links: &dyn LinkOps, name: &str, veth: &VethConfig) -> VnetResult<()> {
    let end = links.require(name).await?;
    links.require(&veth.bridge).await?;

    if end.master.as_deref() != Some(veth.bridge.as_str()) {
        links.set_master(name, &veth.bridge).await?;
        tracing::debug!(veth = name, switch = %veth.bridge, "Veth attached");
    }
    if let Some(stp) = veth.stp {
        links.set_stp(&veth.bridge, stp).await?;
        tracing::debug!(switch = %veth.bridge, stp, "STP state set");
    }
    links.set_up(name, true).await
}

/// Set an existing end down. Returns whether it exists.
///
/// # Errors
///
/// Returns an error if the state cannot be changed.
pub async fn set_down(links: &dyn LinkOps, name: &str) -> VnetResult<bool> {
    if links.link(name).await?.is_none() {
        return Ok(false);
    }
    links.set_up(name, false).await?;
    Ok(true)
}

/// Delete an existing end. Deleting either end removes the pair.
///
/// # Errors
///
/// Returns an error if the device exists and cannot be deleted.
pub async fn delete(links: &dyn LinkOps, name: &str) -> VnetResult<bool> {
    if links.link(name).await?.is_none() {
        return Ok(false);
    }
    links.delete(name).await?;
    tracing::info!(veth = name, "Veth deleted");
    Ok(true)
}
