//! [`ContainerRuntime`] over the docker command line client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::runtime::{ContainerRuntime, ContainerSpec};
use crate::sink::OutputSink;
use cnab_core::{CnabError, Result};

const READ_CHUNK: usize = 8 * 1024;

// ─── DockerCli ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    /// Parent directory for the temporary directories used by `docker cp`.
    staging_dir: Option<PathBuf>,
    quiet_pull: bool,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            staging_dir: None,
            quiet_pull: false,
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn with_quiet_pull(mut self, quiet: bool) -> Self {
        self.quiet_pull = quiet;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn exec(&self, mut cmd: Command, what: &str) -> Result<Output> {
        debug!(binary = %self.binary, command = what, "running docker");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.output().await.map_err(|e| {
            CnabError::Execution(format!("failed to run {} {what}: {e}", self.binary))
        })
    }

    fn staging(&self, prefix: &str) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.staging_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn stderr_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).trim().to_string()
}

fn failed(what: &str, out: &Output) -> CnabError {
    let code = out
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".into());
    CnabError::Execution(format!("docker {what} failed ({code}): {}", stderr_of(out)))
}

/// Location of an absolute container path inside a local staging directory.
fn staged_path(root: &Path, container_path: &str) -> PathBuf {
    root.join(container_path.trim_start_matches('/'))
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", "--format", "{{.Id}}", image]);
        let out = self.exec(cmd, "image inspect").await?;
        Ok(out.status.success())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("pull");
        if self.quiet_pull {
            cmd.arg("--quiet");
        }
        cmd.arg(image);
        let out = self.exec(cmd, "pull").await?;
        if !out.status.success() {
            return Err(failed("pull", &out));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut cmd = self.command();
        cmd.args([
            "create",
            "--name",
            spec.name.as_str(),
            "--entrypoint",
            spec.entrypoint.as_str(),
        ]);
        // Values travel through the client's environment, not its argv.
        for (key, value) in &spec.env {
            cmd.arg("--env").arg(key);
            cmd.env(key, value);
        }
        cmd.arg(&spec.image);

        let out = self.exec(cmd, "create").await?;
        if !out.status.success() {
            return Err(failed("create", &out));
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if id.is_empty() {
            return Err(CnabError::Execution(
                "docker create did not report a container id".into(),
            ));
        }
        Ok(id)
    }

    async fn copy_in(&self, id: &str, files: &BTreeMap<String, String>) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let staging = self.staging("cnab-files-")?;
        for (path, content) in files {
            let local = staged_path(staging.path(), path);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&local, content).await?;
        }

        let mut cmd = self.command();
        cmd.arg("cp")
            .arg(format!("{}/.", staging.path().display()))
            .arg(format!("{id}:/"));
        let out = self.exec(cmd, "cp").await?;
        if !out.status.success() {
            return Err(failed("cp", &out));
        }
        Ok(())
    }

    async fn start_attached(
        &self,
        id: &str,
        out: &mut OutputSink,
        err: &mut OutputSink,
    ) -> Result<i64> {
        let mut child = self
            .command()
            .args(["start", "--attach", id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CnabError::Execution(format!("failed to run {} start: {e}", self.binary)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CnabError::Execution("container stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CnabError::Execution("container stderr not captured".into()))?;

        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => {
                    let n = read?;
                    if n == 0 {
                        out_open = false;
                    } else {
                        out.write_all(&out_buf[..n]).await?;
                        out.flush().await?;
                    }
                }
                read = stderr.read(&mut err_buf), if err_open => {
                    let n = read?;
                    if n == 0 {
                        err_open = false;
                    } else {
                        err.write_all(&err_buf[..n]).await?;
                        err.flush().await?;
                    }
                }
            }
        }

        let status = child.wait().await?;
        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn copy_out(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let staging = self.staging("cnab-outputs-")?;
        let local = staging.path().join("content");

        let mut cmd = self.command();
        cmd.arg("cp").arg(format!("{id}:{path}")).arg(&local);
        let out = self.exec(cmd, "cp").await?;
        if !out.status.success() {
            let stderr = stderr_of(&out);
            if stderr.contains("Could not find the file") || stderr.contains("No such") {
                return Err(CnabError::not_found("file", path));
            }
            return Err(failed("cp", &out));
        }
        Ok(tokio::fs::read(&local).await?)
    }

    async fn kill(&self, id: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["kill", id]);
        let out = self.exec(cmd, "kill").await?;
        if !out.status.success() && !stderr_of(&out).contains("is not running") {
            return Err(failed("kill", &out));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["rm", "--force", id]);
        let out = self.exec(cmd, "rm").await?;
        if !out.status.success() && !stderr_of(&out).contains("No such container") {
            return Err(failed("rm", &out));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_paths_stay_inside_root() {
        let root = Path::new("/tmp/stage");
        assert_eq!(
            staged_path(root, "/cnab/app/image-map.json"),
            PathBuf::from("/tmp/stage/cnab/app/image-map.json")
        );
    }

    #[tokio::test]
    async fn missing_binary_is_an_execution_error() {
        let cli = DockerCli::new("/nonexistent/docker-binary");
        let err = cli.pull("ubuntu").await.unwrap_err();
        assert!(matches!(err, CnabError::Execution(_)), "got {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_attached_streams_both_pipes() {
        use crate::sink::BufferSink;

        // A stand-in binary that ignores its arguments.
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-docker");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'Install action'\necho 'warn' >&2\nexit 3\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let cli = DockerCli::new(script.to_string_lossy());
        let out = BufferSink::new();
        let err = BufferSink::new();
        let code = cli
            .start_attached("abc", &mut out.boxed(), &mut err.boxed())
            .await
            .unwrap();

        assert_eq!(code, 3);
        assert_eq!(out.contents_lossy(), "Install action\n");
        assert_eq!(err.contents_lossy(), "warn\n");
    }
}
