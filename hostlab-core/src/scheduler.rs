//! Priority-tiered parallel scheduler
//!
//! Resources of one kind are grouped by priority. Tiers run one after
//! another, highest priority first (lowest first for teardown). Inside a
//! tier every resource runs concurrently on its own task with its own
//! forked [`ExecutionContext`], so no session is ever shared between
//! workers, and a worker's sessions are closed when it finishes. A tier is a barrier: every worker finishes before the next
//! tier starts, and any failure stops the run after the barrier.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, Dispatch};

use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult, WorkerFailure};
use crate::lifecycle::Lifecycle;
use crate::observability::{worker_log_path, worker_subscriber};
use crate::types::{Action, ResourceKind};

/// A resource the scheduler can drive
pub trait Schedulable: Lifecycle + 'static {
    fn id(&self) -> &str;

    fn kind(&self) -> ResourceKind;

    /// Higher runs earlier in forward order
    fn priority(&self) -> i64;

    /// Node whose sessions the resource's actions use
    fn node_id(&self) -> &str;
}

/// Group resources into priority tiers in execution order
///
/// Tiers are sorted by descending priority, ascending when `reverse`.
/// Resources keep their relative order within a tier.
pub fn priority_groups<R: Schedulable>(resources: &[Arc<R>], reverse: bool) -> Vec<(i64, Vec<Arc<R>>)> {
    let mut priorities: Vec<i64> = resources.iter().map(|r| r.priority()).collect();
    priorities.sort_unstable_by(|a, b| b.cmp(a));
    priorities.dedup();
    if reverse {
        priorities.reverse();
    }

    priorities
        .into_iter()
        .map(|priority| {
            let tier = resources
                .iter()
                .filter(|r| r.priority() == priority)
                .cloned()
                .collect();
            (priority, tier)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelScheduler;

impl ParallelScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Run `action` across `resources`, tier by tier
    pub async fn run<R: Schedulable>(
        &self,
        action: Action,
        resources: &[Arc<R>],
        reverse: bool,
        force: bool,
        ctx: &ExecutionContext,
    ) -> HostlabResult<()> {
        for (priority, tier) in priority_groups(resources, reverse) {
            match tier.as_slice() {
                [] => {}
                [resource] => {
                    debug!(
                        "Running {} on {} '{}' (priority {})",
                        action,
                        resource.kind(),
                        resource.id(),
                        priority
                    );
                    resource.perform(action, ctx, force).await?;
                }
                _ => self.run_tier(action, priority, &tier, force, ctx).await?,
            }
        }
        Ok(())
    }

    async fn run_tier<R: Schedulable>(
        &self,
        action: Action,
        priority: i64,
        tier: &[Arc<R>],
        force: bool,
        ctx: &ExecutionContext,
    ) -> HostlabResult<()> {
        let kind = tier[0].kind();

        // Workers open their own sessions; drop ours for every affected node
        let node_ids: BTreeSet<&str> = tier.iter().map(|r| r.node_id()).collect();
        for node_id in node_ids {
            ctx.connections().shutdown_node(node_id).await;
        }

        info!(
            "Running {} on {} {} resources in parallel (priority {})",
            action,
            tier.len(),
            kind,
            priority
        );

        let mut workers = JoinSet::new();
        let mut running = BTreeSet::new();
        for resource in tier {
            let id = resource.id().to_string();
            let dispatch = self.worker_dispatch(&id, ctx)?;
            let worker_ctx = Arc::new(ctx.fork());
            let perform_ctx = worker_ctx.clone();
            let resource = resource.clone();

            let worker = async move { resource.perform(action, &perform_ctx, force).await }
                .with_subscriber(dispatch);

            running.insert(id.clone());
            workers.spawn(async move {
                let outcome = match tokio::spawn(worker).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("worker aborted: {}", e)),
                };
                // Sessions the worker opened die with it, panic or not
                worker_ctx.connections().shutdown_all().await;
                (id, outcome)
            });
        }

        let mut ticker = time::interval(ctx.config().scheduler.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut failures = Vec::new();
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok((id, Ok(())))) => {
                        running.remove(&id);
                        debug!("{} '{}' finished {}", kind, id, action);
                    }
                    Some(Ok((id, Err(message)))) => {
                        running.remove(&id);
                        error!("{} '{}' failed {}: {}", kind, id, action, message);
                        failures.push(WorkerFailure { resource_id: id, message });
                    }
                    Some(Err(e)) => {
                        error!("Scheduler task failed: {}", e);
                        failures.push(WorkerFailure {
                            resource_id: "scheduler".to_string(),
                            message: e.to_string(),
                        });
                    }
                },
                _ = ticker.tick() => {
                    info!(
                        "Waiting on {} {}: {}",
                        kind,
                        action,
                        running.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
            Err(HostlabError::Scheduler {
                kind: kind.to_string(),
                action: action.to_string(),
                failures,
            })
        }
    }

    /// Per-resource log file when a log directory is configured, else
    /// whatever the caller is logging to
    fn worker_dispatch(&self, resource_id: &str, ctx: &ExecutionContext) -> HostlabResult<Dispatch> {
        match &ctx.config().scheduler.log_dir {
            Some(dir) => {
                let path = worker_log_path(dir, resource_id);
                Ok(Dispatch::new(worker_subscriber(&path)?))
            }
            None => Ok(tracing::dispatcher::get_default(Dispatch::clone)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_helpers::{single_stack_definition, EventLog, ProbeResource, TestLab};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ids<R: Schedulable>(tiers: &[(i64, Vec<Arc<R>>)]) -> Vec<(i64, Vec<String>)> {
        tiers
            .iter()
            .map(|(p, tier)| (*p, tier.iter().map(|r| r.id().to_string()).collect()))
            .collect()
    }

    fn probes(log: &EventLog) -> Vec<Arc<ProbeResource>> {
        vec![
            Arc::new(ProbeResource::new("a", 10, log).with_delay(Duration::from_millis(50))),
            Arc::new(ProbeResource::new("b", 10, log).with_delay(Duration::from_millis(20))),
            Arc::new(ProbeResource::new("c", 5, log)),
        ]
    }

    #[test]
    fn test_priority_groups() {
        let log = EventLog::new();
        let resources = probes(&log);

        assert_eq!(
            ids(&priority_groups(&resources, false)),
            vec![
                (10, vec!["a".to_string(), "b".to_string()]),
                (5, vec!["c".to_string()])
            ]
        );
        assert_eq!(
            ids(&priority_groups(&resources, true)),
            vec![
                (5, vec!["c".to_string()]),
                (10, vec!["a".to_string(), "b".to_string()])
            ]
        );
    }

    #[tokio::test]
    async fn test_forward_run_finishes_tier_before_next() {
        let lab = TestLab::new();
        let log = EventLog::new();

        ParallelScheduler::new()
            .run(Action::Up, &probes(&log), false, false, &lab.context())
            .await
            .unwrap();

        let c = log.position("c:up").unwrap();
        assert!(log.position("a:up:done").unwrap() < c);
        assert!(log.position("b:up:done").unwrap() < c);
    }

    #[tokio::test]
    async fn test_reverse_run_visits_low_priority_first() {
        let lab = TestLab::new();
        let log = EventLog::new();

        ParallelScheduler::new()
            .run(Action::Down, &probes(&log), true, false, &lab.context())
            .await
            .unwrap();

        let c = log.position("c:down").unwrap();
        assert!(c < log.position("a:down").unwrap());
        assert!(c < log.position("b:down").unwrap());
    }

    #[tokio::test]
    async fn test_tier_failure_waits_for_siblings_and_stops_run() {
        let lab = TestLab::new();
        let log = EventLog::new();
        let resources = vec![
            Arc::new(ProbeResource::new("a", 10, &log).failing_on(Action::Up)),
            Arc::new(ProbeResource::new("b", 10, &log).with_delay(Duration::from_millis(50))),
            Arc::new(ProbeResource::new("c", 5, &log)),
        ];

        let err = ParallelScheduler::new()
            .run(Action::Up, &resources, false, false, &lab.context())
            .await
            .unwrap_err();

        match err {
            HostlabError::Scheduler { action, failures, .. } => {
                assert_eq!(action, "up");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].resource_id, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.position("b:up:done").is_some());
        assert!(log.position("c:up").is_none());
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported() {
        let lab = TestLab::new();
        let log = EventLog::new();
        let resources = vec![
            Arc::new(ProbeResource::new("a", 0, &log).panicking()),
            Arc::new(ProbeResource::new("b", 0, &log)),
        ];

        let err = ParallelScheduler::new()
            .run(Action::Create, &resources, false, false, &lab.context())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("a: worker aborted"));
        assert!(log.position("b:create").is_some());
    }

    #[tokio::test]
    async fn test_single_resource_error_propagates_unchanged() {
        let lab = TestLab::new();
        let log = EventLog::new();
        let resources = vec![Arc::new(ProbeResource::new("solo", 0, &log).failing_on(Action::Create))];

        let err = ParallelScheduler::new()
            .run(Action::Build, &resources, false, false, &lab.context())
            .await
            .unwrap_err();

        assert!(matches!(err, HostlabError::Node { .. }));
        assert_eq!(log.events(), vec!["solo:create"]);
    }

    #[tokio::test]
    async fn test_parallel_tier_drops_parent_sessions() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        ctx.connections()
            .node_session(topology.node("host").unwrap())
            .await
            .unwrap();

        let log = EventLog::new();
        let resources = vec![
            Arc::new(ProbeResource::new("a", 0, &log).on_node("host")),
            Arc::new(ProbeResource::new("b", 0, &log).on_node("host")),
        ];
        ParallelScheduler::new()
            .run(Action::Up, &resources, false, false, &ctx)
            .await
            .unwrap();

        assert_eq!(ctx.connections().session_count().await, 0);
        assert_eq!(lab.connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_workers_close_the_sessions_they_open() {
        let lab = TestLab::new();
        let mut def = single_stack_definition();
        let mut second = def.nodes[0].networks[0].clone();
        second.id = "backnet".to_string();
        second.address = "10.11.0.1/16".to_string();
        second.bridge = "br1".to_string();
        def.nodes[0].networks.push(second);
        let topology = lab.load(def).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();

        ParallelScheduler::new()
            .run(Action::Create, topology.networks(), false, false, &ctx)
            .await
            .unwrap();

        assert!(lab.connector.connect_count() >= 2);
        assert_eq!(lab.connector.connect_count(), lab.connector.close_count());
        assert_eq!(lab.log.matching("agent:create_network").len(), 2);
    }

    #[tokio::test]
    async fn test_workers_log_to_their_own_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.scheduler.log_dir = Some(dir.path().to_path_buf());
        let lab = TestLab::new();
        let ctx = lab.context_with(config);

        let log = EventLog::new();
        let resources = vec![
            Arc::new(ProbeResource::new("Alpha", 0, &log)),
            Arc::new(ProbeResource::new("beta", 0, &log)),
        ];
        ParallelScheduler::new()
            .run(Action::Provision, &resources, false, false, &ctx)
            .await
            .unwrap();

        let alpha = std::fs::read_to_string(dir.path().join("hostlab.log.alpha")).unwrap();
        let beta = std::fs::read_to_string(dir.path().join("hostlab.log.beta")).unwrap();
        assert!(alpha.contains("probe Alpha provision"));
        assert!(!alpha.contains("probe beta"));
        assert!(beta.contains("probe beta provision"));
    }
}
