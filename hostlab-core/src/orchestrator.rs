//! Topology-wide actions
//!
//! An action on the whole topology runs the scheduler once per resource
//! kind: nodes, then networks, then containers, and the other way round
//! for teardown. Each kind completes before the next one starts.

use std::sync::Arc;
use tracing::info;

use crate::context::ExecutionContext;
use crate::doctor::{Doctor, DoctorReport};
use crate::error::HostlabResult;
use crate::model::Topology;
use crate::scheduler::ParallelScheduler;
use crate::status::StatusReport;
use crate::types::{Action, ResourceKind};

const FORWARD: [ResourceKind; 3] = [
    ResourceKind::Node,
    ResourceKind::Network,
    ResourceKind::Container,
];

const REVERSE: [ResourceKind; 3] = [
    ResourceKind::Container,
    ResourceKind::Network,
    ResourceKind::Node,
];

pub struct Orchestrator {
    topology: Arc<Topology>,
    ctx: ExecutionContext,
    scheduler: ParallelScheduler,
    doctor: Doctor,
}

impl Orchestrator {
    pub fn new(topology: Arc<Topology>, ctx: ExecutionContext) -> Self {
        let doctor = Doctor::new(ctx.config().doctor.clone());
        Self {
            topology,
            ctx,
            scheduler: ParallelScheduler::new(),
            doctor,
        }
    }

    pub fn with_doctor(mut self, doctor: Doctor) -> Self {
        self.doctor = doctor;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    async fn run_kind(&self, kind: ResourceKind, action: Action, force: bool) -> HostlabResult<()> {
        let reverse = action.is_reverse();
        match kind {
            ResourceKind::Node => {
                self.scheduler
                    .run(action, self.topology.nodes(), reverse, force, &self.ctx)
                    .await
            }
            ResourceKind::Network => {
                self.scheduler
                    .run(action, self.topology.networks(), reverse, force, &self.ctx)
                    .await
            }
            ResourceKind::Container => {
                let containers = self.topology.schedulable_containers();
                self.scheduler
                    .run(action, &containers, reverse, force, &self.ctx)
                    .await
            }
        }
    }

    /// Run `action` over every kind in dependency order
    async fn run_all(&self, action: Action, force: bool) -> HostlabResult<()> {
        let kinds = if action.is_reverse() { REVERSE } else { FORWARD };
        info!("Running {} on the topology", action);
        for kind in kinds {
            self.run_kind(kind, action, force).await?;
        }
        Ok(())
    }

    pub async fn create(&self) -> HostlabResult<()> {
        self.run_all(Action::Create, false).await
    }

    pub async fn destroy(&self) -> HostlabResult<()> {
        self.run_all(Action::Destroy, false).await
    }

    pub async fn up(&self) -> HostlabResult<()> {
        self.run_all(Action::Up, false).await
    }

    pub async fn down(&self) -> HostlabResult<()> {
        self.run_all(Action::Down, false).await
    }

    pub async fn provision(&self) -> HostlabResult<()> {
        self.run_all(Action::Provision, false).await
    }

    pub async fn deprovision(&self) -> HostlabResult<()> {
        self.run_all(Action::Deprovision, false).await
    }

    pub async fn import(&self) -> HostlabResult<()> {
        self.run_all(Action::Import, false).await
    }

    /// Every node builds before any network, every network before any
    /// container
    pub async fn build(&self, force: bool) -> HostlabResult<()> {
        self.run_all(Action::Build, force).await
    }

    pub async fn demolish(&self) -> HostlabResult<()> {
        self.run_all(Action::Demolish, false).await
    }

    /// The whole topology goes down before anything comes back up
    pub async fn bounce(&self) -> HostlabResult<()> {
        self.down().await?;
        self.up().await
    }

    pub async fn recycle(&self, force: bool) -> HostlabResult<()> {
        self.demolish().await?;
        self.build(force).await
    }

    pub async fn perform(&self, action: Action, force: bool) -> HostlabResult<()> {
        match action {
            Action::Bounce => self.bounce().await,
            Action::Recycle => self.recycle(force).await,
            _ => self.run_all(action, force).await,
        }
    }

    /// True when every node is running
    pub async fn alive(&self) -> bool {
        for node in self.topology.nodes() {
            if node.dead().await {
                return false;
            }
        }
        true
    }

    pub async fn dead(&self) -> bool {
        !self.alive().await
    }

    pub async fn doctor(&self) -> HostlabResult<DoctorReport> {
        self.doctor.check_topology(&self.topology, &self.ctx).await
    }

    /// Reports for every node, network and container, in that order
    pub async fn status(&self) -> Vec<StatusReport> {
        let mut reports = Vec::new();
        for node in self.topology.nodes() {
            reports.push(node.status(&self.ctx).await);
        }
        for network in self.topology.networks() {
            reports.push(network.status(&self.ctx).await);
        }
        for container in self.topology.schedulable_containers() {
            reports.push(container.status(&self.ctx).await);
        }
        reports
    }

    /// Close every cached session
    pub async fn shutdown(&self) {
        self.ctx.connections().shutdown_all().await;
    }
}
