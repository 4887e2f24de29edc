//! Plan artifact storage
//!
//! Content-addressed storage of plan binaries and their JSON renderings,
//! keyed by artifact name. Variants: local filesystem, object-store bucket,
//! and a write-only REST endpoint.

mod bucket;
mod local;
mod rest;
mod upload;

pub use bucket::BucketPlanStore;
pub use local::LocalPlanStore;
pub use rest::RestPlanStore;
pub use upload::PlanUploader;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a plan store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from plan store")]
    Status { status: u16 },

    #[error("{0} is not supported by this plan store")]
    Unsupported(&'static str),
}

/// Capability surface of a plan store.
///
/// `retrieve_plan` materialises the stored bytes at `local_path` and returns
/// that path, or `None` when the artifact does not exist.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn plan_exists(
        &self,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<bool, StoreError>;

    async fn store_plan(
        &self,
        contents: &[u8],
        artifact_name: &str,
        file_name: &str,
    ) -> Result<(), StoreError>;

    async fn retrieve_plan(
        &self,
        local_path: &Path,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<Option<PathBuf>, StoreError>;

    async fn delete_stored_plan(
        &self,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<(), StoreError>;
}
