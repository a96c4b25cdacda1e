// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`collaborator`] defines the uniform interface to external tools.
//! - [`shell`] is the production collaborator, running commands via the
//!   platform shell.
//! - [`template`] expands `${{ params.* }}` / `${{ secrets.* }}`.
//! - [`secrets`] holds secret values and redacts them from logs.
//! - [`executor_loop`] owns the background loop managing task workers.
//! - [`task_runner`] drives one task: inputs, retries, timeout, outputs.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod collaborator;
pub mod executor_loop;
pub mod secrets;
pub mod shell;
pub mod task_runner;
pub mod template;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use collaborator::{Collaborator, Execution, Invocation};
pub use executor_loop::{WorkerContext, spawn_executor};
pub use secrets::SecretBag;
pub use shell::ShellCollaborator;
