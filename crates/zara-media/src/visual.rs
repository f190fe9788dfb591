//! Visual context attached to chat requests.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use zara_core::VisualContext;
use zara_core::config::{Config, expand_path};

/// Supplies the latest visual observation, if any, at request time.
#[async_trait]
pub trait VisualContextSource: Send + Sync {
    async fn snapshot(&self) -> Option<VisualContext>;
}

/// Never attaches visual context.
pub struct NoVisualContext;

#[async_trait]
impl VisualContextSource for NoVisualContext {
    async fn snapshot(&self) -> Option<VisualContext> {
        None
    }
}

/// Always attaches the same observation.
pub struct FixedVisualContext(pub VisualContext);

#[async_trait]
impl VisualContextSource for FixedVisualContext {
    async fn snapshot(&self) -> Option<VisualContext> {
        Some(self.0)
    }
}

/// Reads the observation from a JSON file maintained by an external sensor.
/// A missing or malformed file means no context.
pub struct FileVisualContext {
    path: PathBuf,
}

impl FileVisualContext {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl VisualContextSource for FileVisualContext {
    async fn snapshot(&self) -> Option<VisualContext> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), %e, "No visual context available");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(context) => Some(context),
            Err(e) => {
                debug!(path = %self.path.display(), %e, "Ignoring malformed visual context");
                None
            }
        }
    }
}

/// Build the source named by `visual.source`. Unknown names attach nothing.
pub fn visual_source_from_config(config: &Config) -> Arc<dyn VisualContextSource> {
    let visual = config.visual();
    match visual.source.as_str() {
        "fixed" => Arc::new(FixedVisualContext(VisualContext {
            is_smiling: visual.is_smiling,
            fingers_up: visual.fingers_up,
        })),
        "file" => match visual.path.as_deref() {
            Some(path) => Arc::new(FileVisualContext::new(expand_path(path))),
            None => Arc::new(NoVisualContext),
        },
        _ => Arc::new(NoVisualContext),
    }
}
