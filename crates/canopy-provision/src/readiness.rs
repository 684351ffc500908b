//! Polling a resource until its Ready condition is True

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use canopy_common::kube_utils::{find_condition, ReadinessCondition, CONDITION_READY};
use canopy_common::resources::ResourceRef;
use canopy_common::{Error, Result};

use crate::client::ControlPlane;

/// Default deadline for a Project to become Ready
pub const PROJECT_READY_TIMEOUT: Duration = Duration::from_secs(900);

/// Polling cadence and progress logging for [`wait_ready_with`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadinessPolicy {
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Stay quiet this long before explaining what we wait for
    pub quiet_period: Duration,
    /// Minimum spacing between progress lines
    pub log_every: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            quiet_period: Duration::from_secs(10),
            log_every: Duration::from_secs(15),
        }
    }
}

/// Wait for `resource` to report Ready=True with the default policy.
pub async fn wait_ready(
    client: &dyn ControlPlane,
    resource: &ResourceRef,
    timeout: Duration,
    log_context: &str,
) -> Result<()> {
    wait_ready_with(&ReadinessPolicy::default(), client, resource, timeout, log_context).await
}

/// Wait for `resource` to report Ready=True.
///
/// Fetch failures are logged and polling continues; if the deadline passes
/// first the error is [`Error::Timeout`] naming the resource.
pub async fn wait_ready_with(
    policy: &ReadinessPolicy,
    client: &dyn ControlPlane,
    resource: &ResourceRef,
    timeout: Duration,
    log_context: &str,
) -> Result<()> {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut progress = ProgressLog::new(policy, start);

    loop {
        let waiting_on = match client.get(resource).await {
            Ok(obj) => match find_condition(&obj, CONDITION_READY) {
                Some(cond) if cond.is_true() => {
                    debug!(
                        resource = %resource,
                        elapsed_s = start.elapsed().as_secs_f64(),
                        "Resource is Ready"
                    );
                    return Ok(());
                }
                cond => describe_condition(cond.as_ref()),
            },
            Err(e) => {
                warn!(resource = %resource, error = %e, "Failed to fetch resource while waiting for Ready");
                format!("fetch failed: {}", e)
            }
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout(resource.to_string(), timeout));
        }

        if progress.due(now) {
            info!(
                context = log_context,
                resource = %resource,
                elapsed_s = now.duration_since(start).as_secs(),
                "{}",
                waiting_line(log_context, resource, &waiting_on)
            );
        }

        tokio::time::sleep(policy.poll_interval).await;
    }
}

/// Progress-line schedule: silent for the quiet period, then at most one
/// line per `log_every`
#[derive(Debug)]
struct ProgressLog {
    quiet_until: Instant,
    log_every: Duration,
    last: Option<Instant>,
}

impl ProgressLog {
    fn new(policy: &ReadinessPolicy, start: Instant) -> Self {
        Self {
            quiet_until: start + policy.quiet_period,
            log_every: policy.log_every,
            last: None,
        }
    }

    /// Whether a line is due at `now`; records it when it is
    fn due(&mut self, now: Instant) -> bool {
        if now < self.quiet_until {
            return false;
        }
        if self.last.is_some_and(|t| now.duration_since(t) < self.log_every) {
            return false;
        }
        self.last = Some(now);
        true
    }
}

fn describe_condition(cond: Option<&ReadinessCondition>) -> String {
    match cond {
        Some(c) => format!("Ready={} reason={} message={}", c.status, c.reason, c.message),
        None => "no Ready condition yet".to_string(),
    }
}

fn waiting_line(log_context: &str, resource: &ResourceRef, waiting_on: &str) -> String {
    format!("Waiting for {} ({}): {}", log_context, resource, waiting_on)
}
