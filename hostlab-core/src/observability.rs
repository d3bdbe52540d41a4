//! Logging setup and span helpers

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::HostlabResult;
use crate::types::{Action, ResourceKind};

/// Initialize tracing with environment-based configuration
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hostlab_core=info,hostlab_vm=info"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);

    // A subscriber may already be installed by the embedding binary
    let _ = Registry::default().with(env_filter).with(fmt_layer).try_init();
}

/// Create a span for a lifecycle action on one resource
#[inline]
pub fn resource_span(kind: ResourceKind, id: &str, action: Action) -> Span {
    tracing::info_span!(
        "resource",
        kind = %kind,
        id = %id,
        action = %action,
    )
}

/// Path of the log file a parallel worker writes to
pub fn worker_log_path(log_dir: &Path, resource_id: &str) -> PathBuf {
    log_dir.join(format!("hostlab.log.{}", resource_id.to_lowercase()))
}

/// Build a subscriber that writes everything a worker logs into its own
/// file, replacing any log left by a previous run.
pub fn worker_subscriber(path: &Path) -> HostlabResult<impl tracing::Subscriber + Send + Sync + 'static> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        fs::remove_file(path)?;
    }
    let file = Arc::new(File::create(path)?);

    Ok(fmt()
        .with_ansi(false)
        .with_target(true)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(file)
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::instrument::WithSubscriber;

    #[test]
    fn test_worker_log_path() {
        let path = worker_log_path(Path::new("/tmp/logs"), "Web-1");
        assert_eq!(path, PathBuf::from("/tmp/logs/hostlab.log.web-1"));
    }

    #[tokio::test]
    async fn test_worker_subscriber_captures_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = worker_log_path(dir.path(), "db");
        std::fs::write(&path, "stale").unwrap();

        let subscriber = worker_subscriber(&path).unwrap();
        async {
            tracing::info!("bringing up db");
        }
        .with_subscriber(subscriber)
        .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("bringing up db"));
        assert!(!contents.contains("stale"));
    }
}
