//! Bounded polling for container state convergence.

use vnet_common::{RetryPolicy, VnetError, VnetResult};

use crate::platform::{ContainerPlatform, ContainerState};

/// Poll `name` until it reports `target`.
///
/// The state is checked up to `retry.max_attempts` times. After a failed
/// check the delay grows with the attempt number (see
/// [`RetryPolicy::delay`]). Returns the number of checks performed.
///
/// # Errors
///
/// Returns [`VnetError::ConvergenceTimeout`] when the attempts run out,
/// or the platform error if the state cannot be read.
pub async fn wait_for_state(
    platform: &dyn ContainerPlatform,
    name: &str,
    target: ContainerState,
    retry: &RetryPolicy,
) -> VnetResult<u32> {
    tracing::debug!(container = name, %target, "Waiting for container state");

    for attempt in 1..=retry.max_attempts {
        let observed = platform.observe(name).await?;
        if observed == target {
            tracing::debug!(container = name, %target, attempt, "Container converged");
            return Ok(attempt);
        }
        if attempt == retry.max_attempts {
            break;
        }

        let delay = retry.delay(attempt);
        tracing::info!(
            container = name,
            %observed,
            %target,
            delay_secs = delay.as_secs_f64(),
            "Container not converged yet, waiting"
        );
        tokio::time::sleep(delay).await;
    }

    Err(VnetError::ConvergenceTimeout {
        name: name.to_string(),
        target: target.to_string(),
        attempts: retry.max_attempts,
    })
}
