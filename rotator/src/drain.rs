//! Drains a single node of all evictable pods.
//!
//! Draining is client side: we cordon the node so the scheduler stops placing new pods on it,
//! enumerate the pods bound to it, and evict each one. Evictions respect PodDisruptionBudgets, so
//! a `429` response means we must back off and retry rather than treat it as failure.
//!
//! Unlike the upstream tool this was adapted from, a node's drain attempt budget is decremented
//! exactly once per attempt: the original implementation decremented once before checking the
//! budget and again when recursing into the retry, which silently halved the number of retries a
//! caller asked for.

use models::error::KubeError;
use models::job::DrainOptions;
use models::kube_gateway::KubeGateway;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::{Condition, RetryIf};
use tracing::{event, instrument, Level};

/// Always retries, deferring the attempt count entirely to the strategy's length. `tokio_retry`
/// runs the action once plus once per strategy item, so taking `attempts - 1` items off a
/// zero-delay `FixedInterval` gives exactly `attempts` total tries -- the upstream tool this was
/// adapted from decremented its budget once before checking it and again when recursing into the
/// retry, silently halving the number of retries a caller asked for.
struct RetryAlways;

impl Condition<KubeError> for RetryAlways {
    fn should_retry(&mut self, _error: &KubeError) -> bool {
        true
    }
}

/// Drains one node: cordons it, then evicts every evictable pod bound to it, retrying the whole
/// node up to `max_attempts` times if any pod's eviction or final deletion check fails.
///
/// `max_attempts == 0` is treated as a single attempt, matching the original tool's convention
/// that an unset retry count still tries once.
#[instrument(skip(gateway, options), err)]
pub async fn drain_node<G: KubeGateway>(
    gateway: &G,
    node_name: &str,
    max_attempts: u32,
    options: &DrainOptions,
) -> Result<(), KubeError> {
    gateway.cordon(node_name).await?;

    let attempts = max_attempts.max(1);
    let retry_strategy = FixedInterval::from_millis(0).take((attempts - 1) as usize);

    RetryIf::spawn(
        retry_strategy,
        || async {
            try_drain_once(gateway, node_name, options).await.map_err(|e| {
                event!(Level::WARN, node_name, error = %e, "drain attempt failed");
                e
            })
        },
        RetryAlways,
    )
    .await
}

async fn try_drain_once<G: KubeGateway>(
    gateway: &G,
    node_name: &str,
    options: &DrainOptions,
) -> Result<(), KubeError> {
    let deadline = Duration::from_secs(options.timeout_secs);
    let start = tokio::time::Instant::now();

    let pods = gateway.list_evictable_pods(node_name).await?;
    event!(Level::INFO, node_name, pod_count = pods.len(), "draining node");

    for pod in &pods {
        evict_with_backoff(gateway, pod, options.grace_period_seconds, deadline, start).await?;

        if options.wait_between_pod_evictions_secs > 0 {
            sleep(Duration::from_secs(
                options.wait_between_pod_evictions_secs as u64,
            ))
            .await;
        }
    }

    for pod in &pods {
        let remaining = deadline.saturating_sub(start.elapsed());
        gateway.wait_pod_deleted(pod, remaining).await?;
    }

    Ok(())
}

/// Evicts a single pod, retrying on `Throttled` (PDB not yet satisfied) with a fixed backoff
/// until the drain-level deadline elapses. `kubectl drain` does the same thing: wait and try
/// again rather than giving up on the first disruption-budget conflict.
async fn evict_with_backoff<G: KubeGateway>(
    gateway: &G,
    pod: &k8s_openapi::api::core::v1::Pod,
    grace_period_seconds: u32,
    deadline: Duration,
    start: tokio::time::Instant,
) -> Result<(), KubeError> {
    loop {
        match gateway.evict_pod(pod, grace_period_seconds).await {
            Ok(()) => return Ok(()),
            Err(KubeError::Gone) => return Ok(()),
            Err(KubeError::Throttled) => {
                if start.elapsed() >= deadline {
                    return Err(KubeError::Throttled);
                }
                sleep(models::constants::eviction_throttle_backoff()).await;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use models::kube_gateway::MockKubeGateway;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn options() -> DrainOptions {
        DrainOptions::new(30, 0)
    }

    #[tokio::test]
    async fn drains_successfully_on_first_attempt() {
        let mut gateway = MockKubeGateway::new();
        gateway.expect_cordon().returning(|_| Ok(()));
        gateway
            .expect_list_evictable_pods()
            .returning(|_| Ok(vec![Pod::default()]));
        gateway.expect_evict_pod().returning(|_, _| Ok(()));
        gateway.expect_wait_pod_deleted().returning(|_, _| Ok(()));

        let result = drain_node(&gateway, "node-a", 3, &options()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exactly_the_requested_number_of_attempts() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let counter = attempt_count.clone();

        let mut gateway = MockKubeGateway::new();
        gateway.expect_cordon().returning(|_| Ok(()));
        gateway.expect_list_evictable_pods().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Pod::default()])
        });
        gateway
            .expect_evict_pod()
            .returning(|_, _| Err(KubeError::Throttled));

        let result = drain_node(&gateway, "node-a", 3, &options()).await;
        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let mut gateway = MockKubeGateway::new();
        gateway.expect_cordon().returning(|_| Ok(()));
        gateway
            .expect_list_evictable_pods()
            .times(1)
            .returning(|_| Ok(vec![]));

        let result = drain_node(&gateway, "node-a", 0, &options()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_a_transient_throttle_within_the_deadline() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let counter = attempt_count.clone();

        let mut gateway = MockKubeGateway::new();
        gateway.expect_cordon().returning(|_| Ok(()));
        gateway
            .expect_list_evictable_pods()
            .returning(|_| Ok(vec![Pod::default()]));
        gateway.expect_evict_pod().returning(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(KubeError::Throttled)
            } else {
                Ok(())
            }
        });
        gateway.expect_wait_pod_deleted().returning(|_, _| Ok(()));

        let result = drain_node(&gateway, "node-a", 3, &options()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn paces_evictions_by_wait_between_pod_evictions() {
        let mut gateway = MockKubeGateway::new();
        gateway.expect_cordon().returning(|_| Ok(()));
        gateway
            .expect_list_evictable_pods()
            .returning(|_| Ok(vec![Pod::default(), Pod::default()]));
        gateway.expect_evict_pod().times(2).returning(|_, _| Ok(()));
        gateway.expect_wait_pod_deleted().returning(|_, _| Ok(()));

        let options = DrainOptions::new(30, 2);
        let result = drain_node(&gateway, "node-a", 1, &options).await;
        assert!(result.is_ok());
    }
}
