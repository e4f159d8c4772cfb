// src/load_balancer/file_size.rs
use std::sync::Arc;

use super::{LeastConnectionsBalancer, RoundRobinBalancer};
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::registry::Backend;

const LARGE_FILE_EXTENSIONS: [&str; 5] = [".mp4", ".mkv", ".avi", ".zip", ".iso"];

/// Whether a request path names a large download: a known archive or
/// media extension, or anything under a `video/` directory.
pub fn is_large_file(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    LARGE_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) || path.contains("video/")
}

/// Large downloads go to the least loaded backend; everything else rotates.
#[derive(Debug, Default)]
pub struct FileSizeBalancer {
    small: RoundRobinBalancer,
}

impl FileSizeBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for FileSizeBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if is_large_file(ctx.path) {
            return LeastConnectionsBalancer::least_loaded(backends).cloned();
        }
        self.small.select_backend(backends, ctx)
    }

    fn name(&self) -> &'static str {
        "file-size"
    }
}
