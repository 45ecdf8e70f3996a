//! The container capabilities the docker driver needs.
//!
//! [`DockerCli`](super::cli::DockerCli) implements them by shelling out to
//! the docker binary; tests substitute an in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::sink::OutputSink;
use cnab_core::Result;

/// Entry point every invocation image is started with.
pub const ENTRYPOINT: &str = "/cnab/app/run";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    /// Fully resolved reference, pinned to a digest when one is known.
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub entrypoint: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn pull(&self, image: &str) -> Result<()>;

    /// Create (without starting) a container and return its ID.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Write `files` (absolute path → content) into a created container.
    async fn copy_in(&self, id: &str, files: &BTreeMap<String, String>) -> Result<()>;

    /// Start the container, stream its output as it is produced, and wait
    /// for it to exit. Returns the exit code.
    ///
    /// The future may be dropped mid-stream on cancellation; nothing is
    /// written to the sinks after that.
    async fn start_attached(
        &self,
        id: &str,
        out: &mut OutputSink,
        err: &mut OutputSink,
    ) -> Result<i64>;

    /// Read one file from a stopped container.
    async fn copy_out(&self, id: &str, path: &str) -> Result<Vec<u8>>;

    async fn kill(&self, id: &str) -> Result<()>;

    /// Remove the container. Removing a container that does not exist is
    /// not an error.
    async fn remove(&self, id: &str) -> Result<()>;
}
