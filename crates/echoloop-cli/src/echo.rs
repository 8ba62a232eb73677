//! The echo loop.
//!
//! Each iteration is a queued task that reads the previous agent's output
//! (`ai_1_out.txt`), runs the agent step on it and writes the reply
//! (`ai_2_out.txt`). Every `commit_every` iterations a commit task stages,
//! commits and optionally pushes the working tree.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use echoloop_core::{QueueError, Task, TaskId, TaskQueue, TaskSnapshot, TaskStatus};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const INPUT_FILE: &str = "ai_1_out.txt";
pub const OUTPUT_FILE: &str = "ai_2_out.txt";

/// Commits jump ahead of iterations.
pub const ITERATION_PRIORITY: i32 = 1;
pub const COMMIT_PRIORITY: i32 = 0;

/// What turns one agent's output into the next agent's input.
#[derive(Debug, Clone, Default)]
pub enum AgentStep {
    /// Pass the text through unchanged.
    #[default]
    Echo,

    /// Pipe the text through a shell command and take its stdout.
    Command(String),
}

impl AgentStep {
    pub fn run(&self, input: &str) -> anyhow::Result<String> {
        match self {
            AgentStep::Echo => Ok(input.to_string()),
            AgentStep::Command(cmd) => run_agent_command(cmd, input),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub repo_dir: PathBuf,
    pub push: bool,
}

#[derive(Debug, Clone)]
pub struct EchoLoopConfig {
    /// Directory holding the hand-off files.
    pub data_dir: PathBuf,

    /// Stop after this many successful iterations. `None` runs until shutdown.
    pub iterations: Option<u64>,

    pub commit_every: u64,

    /// `None` disables commits.
    pub git: Option<GitSettings>,

    /// Pause between iterations.
    pub cycle_delay: Duration,

    pub agent: AgentStep,
    pub iteration_retry_delay: Duration,
    pub commit_retry_delay: Duration,
}

impl Default for EchoLoopConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            iterations: None,
            commit_every: 25,
            git: None,
            cycle_delay: Duration::from_secs(5),
            agent: AgentStep::Echo,
            iteration_retry_delay: Duration::from_secs(5),
            commit_retry_delay: Duration::from_secs(10),
        }
    }
}

/// Totals for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EchoLoopReport {
    pub iterations: u64,
    /// Iteration tasks that failed for good and were resubmitted.
    pub failed_attempts: u64,
    pub commits: u64,
}

pub fn iteration_task(config: &EchoLoopConfig, iteration: u64) -> anyhow::Result<Task> {
    let data_dir = config.data_dir.clone();
    let agent = config.agent.clone();
    let task = Task::builder(format!("iteration_{iteration}"), move |_| {
        process_iteration(&data_dir, &agent, iteration)
    })
    .args(json!({ "iteration": iteration }))
    .max_retries(3)
    .retry_delay(config.iteration_retry_delay)
    .build()?;
    Ok(task)
}

pub fn commit_task(
    config: &EchoLoopConfig,
    git: &GitSettings,
    iteration: u64,
) -> anyhow::Result<Task> {
    let git = git.clone();
    let message = format!("Automated commit - iteration {iteration}");
    let task = Task::builder(format!("commit_{iteration}"), move |_| {
        commit_and_push(&git, &message)
    })
    .args(json!({ "iteration": iteration }))
    .max_retries(2)
    .retry_delay(config.commit_retry_delay)
    .build()?;
    Ok(task)
}

/// One hand-off: read input, run the agent, write the reply.
pub fn process_iteration(data_dir: &Path, agent: &AgentStep, iteration: u64) -> anyhow::Result<Value> {
    let input_path = data_dir.join(INPUT_FILE);
    let input = fs::read_to_string(&input_path)
        .with_context(|| format!("reading {}", input_path.display()))?;
    let input = input.trim();
    if input.is_empty() {
        bail!("no input text in {}", input_path.display());
    }

    let response = agent.run(input).context("agent step failed")?;

    let output_path = data_dir.join(OUTPUT_FILE);
    fs::write(&output_path, &response)
        .with_context(|| format!("writing {}", output_path.display()))?;

    debug!(iteration, output = %output_path.display(), "hand-off written");
    Ok(json!({
        "iteration": iteration,
        "input_bytes": input.len(),
        "output_bytes": response.len(),
    }))
}

fn run_agent_command(cmd: &str, input: &str) -> anyhow::Result<String> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning agent command `{cmd}`"))?;

    // Dropping stdin closes the pipe so the command sees EOF.
    child
        .stdin
        .take()
        .context("agent command has no stdin")?
        .write_all(input.as_bytes())
        .context("writing to agent command")?;

    let output = child.wait_with_output()?;
    if !output.status.success() {
        bail!(
            "agent command `{cmd}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

/// Stage everything, commit, and push if configured. A clean tree is not an
/// error; nothing is committed.
pub fn commit_and_push(git_settings: &GitSettings, message: &str) -> anyhow::Result<Value> {
    let dir = &git_settings.repo_dir;
    git(dir, &["add", "-A"])?;

    if git(dir, &["status", "--porcelain"])?.trim().is_empty() {
        info!("nothing to commit");
        return Ok(json!({ "committed": false, "pushed": false }));
    }

    git(dir, &["commit", "-m", message])?;
    if git_settings.push {
        git(dir, &["push"])?;
    }
    info!(commit_message = message, pushed = git_settings.push, "changes committed");
    Ok(json!({ "committed": true, "pushed": git_settings.push }))
}

/// `git init` unless `dir` is already inside a work tree.
pub fn ensure_repository(dir: &Path) -> anyhow::Result<()> {
    if git(dir, &["rev-parse", "--is-inside-work-tree"]).is_ok() {
        debug!(dir = %dir.display(), "git repository already initialized");
        return Ok(());
    }
    git(dir, &["init"])?;
    info!(dir = %dir.display(), "initialized new git repository");
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("running git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Drive the loop until `iterations` is reached or `shutdown` flips.
///
/// A failed iteration is resubmitted under the same number; a failed commit
/// is logged and tried again at the next iteration. While `paused` is set the
/// loop holds before starting the next iteration.
pub async fn run(
    queue: Arc<TaskQueue>,
    config: EchoLoopConfig,
    mut shutdown: watch::Receiver<bool>,
    mut paused: watch::Receiver<bool>,
) -> anyhow::Result<EchoLoopReport> {
    if let Some(git_settings) = &config.git {
        let dir = git_settings.repo_dir.clone();
        tokio::task::spawn_blocking(move || ensure_repository(&dir)).await??;
    }

    let mut report = EchoLoopReport::default();
    let mut iteration: u64 = 0;
    let mut last_commit: u64 = 0;

    loop {
        if config.iterations.is_some_and(|max| report.iterations >= max) || *shutdown.borrow() {
            break;
        }
        if !hold_while_paused(&mut paused, &mut shutdown).await {
            break;
        }

        info!(iteration, "starting iteration");
        let id = queue
            .add_task(iteration_task(&config, iteration)?, ITERATION_PRIORITY)
            .await;
        let Some(snapshot) = await_task(&queue, &id, &mut shutdown).await else {
            break;
        };

        if snapshot.status == TaskStatus::Failed {
            report.failed_attempts += 1;
            error!(iteration, task_id = %id, error = ?snapshot.error, "iteration failed, resubmitting");
            if !pause(config.cycle_delay, &mut shutdown).await {
                break;
            }
            continue;
        }
        report.iterations += 1;
        info!(iteration, "iteration complete");

        if let Some(git_settings) = &config.git
            && iteration - last_commit >= config.commit_every
        {
            let id = queue
                .add_task(commit_task(&config, git_settings, iteration)?, COMMIT_PRIORITY)
                .await;
            let Some(snapshot) = await_task(&queue, &id, &mut shutdown).await else {
                break;
            };
            if snapshot.status == TaskStatus::Completed {
                last_commit = iteration;
                report.commits += 1;
            } else {
                warn!(iteration, error = ?snapshot.error, "commit failed");
            }
        }

        iteration += 1;
        if !pause(config.cycle_delay, &mut shutdown).await {
            break;
        }
    }

    info!(
        iterations = report.iterations,
        failed_attempts = report.failed_attempts,
        commits = report.commits,
        "echo loop finished"
    );
    Ok(report)
}

/// Wait for a task to finish. `None` on shutdown.
///
/// While the queue is stopped (e.g. through the control endpoint) this keeps
/// waiting for it to be started again.
async fn await_task(
    queue: &TaskQueue,
    id: &TaskId,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<TaskSnapshot> {
    loop {
        let result = tokio::select! {
            result = queue.wait_for_task(id, None) => result,
            _ = shutdown.changed() => return None,
        };
        match result {
            Ok(snapshot) => return Some(snapshot),
            Err(QueueError::QueueNotRunning) => {
                debug!(task_id = %id, "queue stopped, waiting for restart");
                if !pause(queue.config().poll_interval, shutdown).await {
                    return None;
                }
            }
            Err(err) => {
                error!(task_id = %id, error = %err, "lost track of task");
                return None;
            }
        }
    }
}

/// Block while `paused` is set. Returns false if shutdown was requested
/// meanwhile; a dropped pause sender counts as resumed.
async fn hold_while_paused(
    paused: &mut watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if !*paused.borrow_and_update() {
        return true;
    }
    info!("echo loop paused");
    while *paused.borrow_and_update() {
        tokio::select! {
            changed = paused.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => return false,
        }
    }
    info!("echo loop resumed");
    !*shutdown.borrow()
}

/// Sleep for `delay`. Returns false if shutdown was requested meanwhile.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}
