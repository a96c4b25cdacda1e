// src/exec/shell.rs

//! Collaborator that runs commands through the platform shell.
//!
//! Each invocation gets a scratch directory:
//!
//! ```text
//! <scratch>/inputs/<artifact>    (materialised inputs, $PIPEDAG_INPUTS)
//! <scratch>/outputs/<artifact>   (declared outputs, $PIPEDAG_OUTPUTS)
//! ```
//!
//! Parameters and secrets are exported as `PIPEDAG_PARAM_<KEY>` and
//! `PIPEDAG_SECRET_<KEY>`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::InfrastructureError;
use crate::exec::collaborator::{Collaborator, Execution, Invocation};

#[derive(Debug, Clone)]
pub struct ShellCollaborator {
    /// Working directory for commands; the scratch directory if unset.
    workdir: Option<PathBuf>,
    scratch_root: PathBuf,
}

impl Default for ShellCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellCollaborator {
    pub fn new() -> Self {
        Self {
            workdir: None,
            scratch_root: std::env::temp_dir().join("pipedag"),
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    async fn run(&self, invocation: Invocation) -> Result<Execution, InfrastructureError> {
        let task = invocation.task.clone();
        let io_err = |source: std::io::Error| InfrastructureError::Io {
            task: task.clone(),
            source,
        };

        let scratch = ScratchDir::create(
            self.scratch_root
                .join(invocation.run_id.to_string())
                .join(format!("{}-{}", scratch_component(&invocation.task), invocation.attempt)),
        )
        .await
        .map_err(io_err)?;

        let inputs_dir = scratch.path().join("inputs");
        let outputs_dir = scratch.path().join("outputs");
        tokio::fs::create_dir_all(&inputs_dir).await.map_err(io_err)?;
        tokio::fs::create_dir_all(&outputs_dir).await.map_err(io_err)?;

        for input in &invocation.inputs {
            tokio::fs::write(inputs_dir.join(&input.name), &input.payload)
                .await
                .map_err(io_err)?;
        }

        let mut cmd = shell_command(&invocation.command);
        cmd.current_dir(self.workdir.as_deref().unwrap_or(scratch.path()))
            .env("PIPEDAG_RUN_ID", invocation.run_id.to_string())
            .env("PIPEDAG_TASK", &invocation.task)
            .env("PIPEDAG_INPUTS", &inputs_dir)
            .env("PIPEDAG_OUTPUTS", &outputs_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &invocation.parameters {
            cmd.env(format!("PIPEDAG_PARAM_{}", env_key(key)), value);
        }
        for (key, value) in invocation.secrets.iter() {
            cmd.env(format!("PIPEDAG_SECRET_{}", env_key(key)), value);
        }

        let mut child = cmd.spawn().map_err(|source| InfrastructureError::Spawn {
            task: task.clone(),
            source,
        })?;
        debug!(task = %task, pid = ?child.id(), "spawned shell command");

        let mut logs = Vec::new();
        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        // Interleave both streams in arrival order.
        loop {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line.map_err(io_err)? {
                    Some(line) => logs.push(line),
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line.map_err(io_err)? {
                    Some(line) => logs.push(line),
                    None => stderr = None,
                },
                else => break,
            }
        }

        let status = child.wait().await.map_err(io_err)?;
        info!(
            task = %task,
            attempt = invocation.attempt,
            exit_code = ?status.code(),
            "shell command exited"
        );

        let mut outputs = Vec::new();
        for name in &invocation.outputs {
            let path = outputs_dir.join(name);
            match tokio::fs::read(&path).await {
                Ok(bytes) => outputs.push((name.clone(), bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(task = %task, artifact = %name, "declared output not written");
                }
                Err(e) => return Err(io_err(e)),
            }
        }

        Ok(Execution {
            exit_code: status.code(),
            outputs,
            logs,
        })
    }
}

impl Collaborator for ShellCollaborator {
    fn execute(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<Execution, InfrastructureError>> + Send + '_>> {
        Box::pin(self.run(invocation))
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}

async fn next_line<R>(
    lines: &mut Option<tokio::io::Lines<R>>,
) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

/// `image-tag` -> `IMAGE_TAG`.
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Single path component for a task's scratch directory.
fn scratch_component(task: &str) -> String {
    task.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Scratch directory removed when dropped, including on cancellation.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create(path: PathBuf) -> std::io::Result<Self> {
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_component_never_leaves_the_scratch_root() {
        assert_eq!(scratch_component("build-image_2"), "build-image_2");
        assert_eq!(scratch_component("../../victim"), "______victim");
        assert_eq!(scratch_component("a/b\\c"), "a_b_c");
        assert!(!scratch_component("..").contains('.'));
    }

    #[test]
    fn env_keys_are_shell_safe() {
        assert_eq!(env_key("image-tag"), "IMAGE_TAG");
        assert_eq!(env_key("branch"), "BRANCH");
        assert_eq!(env_key("a.b"), "A_B");
    }
}
