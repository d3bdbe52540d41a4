//! Lifecycle actions shared by every resource kind
//!
//! Resources implement the six primitives; the composites are defined once
//! here in terms of them and stop at the first failing step.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::types::Action;

#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn create(&self, ctx: &ExecutionContext) -> HostlabResult<()>;

    async fn destroy(&self, ctx: &ExecutionContext) -> HostlabResult<()>;

    async fn up(&self, ctx: &ExecutionContext) -> HostlabResult<()>;

    async fn down(&self, ctx: &ExecutionContext) -> HostlabResult<()>;

    async fn provision(&self, ctx: &ExecutionContext) -> HostlabResult<()>;

    async fn deprovision(&self, ctx: &ExecutionContext) -> HostlabResult<()>;

    /// Whether `import` is supported and should replace create/up/provision
    fn importable(&self) -> bool {
        false
    }

    async fn import(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        Err(HostlabError::NotImplemented {
            feature: "import".to_string(),
        })
    }

    /// `import` when importable and not forced, otherwise create, up, provision
    async fn build(&self, ctx: &ExecutionContext, force: bool) -> HostlabResult<()> {
        if !force && self.importable() {
            return self.import(ctx).await;
        }
        self.create(ctx).await?;
        self.up(ctx).await?;
        self.provision(ctx).await
    }

    async fn demolish(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        self.deprovision(ctx).await?;
        self.down(ctx).await?;
        self.destroy(ctx).await
    }

    async fn bounce(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        self.down(ctx).await?;
        self.up(ctx).await
    }

    async fn recycle(&self, ctx: &ExecutionContext, force: bool) -> HostlabResult<()> {
        self.demolish(ctx).await?;
        self.build(ctx, force).await
    }

    /// Run any action by name; `force` only matters to build and recycle
    async fn perform(&self, action: Action, ctx: &ExecutionContext, force: bool) -> HostlabResult<()> {
        match action {
            Action::Create => self.create(ctx).await,
            Action::Destroy => self.destroy(ctx).await,
            Action::Up => self.up(ctx).await,
            Action::Down => self.down(ctx).await,
            Action::Provision => self.provision(ctx).await,
            Action::Deprovision => self.deprovision(ctx).await,
            Action::Import => self.import(ctx).await,
            Action::Build => self.build(ctx, force).await,
            Action::Demolish => self.demolish(ctx).await,
            Action::Bounce => self.bounce(ctx).await,
            Action::Recycle => self.recycle(ctx, force).await,
        }
    }
}
