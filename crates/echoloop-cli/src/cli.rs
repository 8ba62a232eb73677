//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, ensure};
use clap::{Args, Parser, Subcommand};

use crate::echo::{AgentStep, EchoLoopConfig, GitSettings};

/// EchoLoop: a priority task queue driving an agent hand-off loop.
#[derive(Parser, Debug)]
#[command(name = "echoloop", version, about)]
pub struct Cli {
    /// Worker count (overrides ECHOLOOP_MAX_WORKERS).
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "ECHOLOOP_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a short retry/dependency scenario and print the final snapshots.
    Demo,

    /// Run the echo loop in the foreground until Ctrl-C.
    Run(LoopArgs),

    /// Serve the JSON API, with the echo loop in the background.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoopArgs {
    /// Directory holding ai_1_out.txt / ai_2_out.txt.
    #[arg(long, env = "ECHOLOOP_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Stop after this many successful iterations.
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Commit every N iterations.
    #[arg(long, env = "ECHOLOOP_COMMIT_EVERY", default_value_t = 25)]
    pub commit_every: u64,

    /// Commit through git every `commit_every` iterations.
    #[arg(long, env = "ECHOLOOP_GIT")]
    pub git: bool,

    /// Repository the commit task runs in.
    #[arg(long, env = "ECHOLOOP_REPO_DIR", default_value = ".")]
    pub repo_dir: PathBuf,

    /// Push after committing.
    #[arg(long, env = "ECHOLOOP_PUSH")]
    pub push: bool,

    /// Pause between iterations, in seconds.
    #[arg(long, env = "ECHOLOOP_CYCLE_DELAY_SECS", default_value_t = 5.0)]
    pub cycle_delay_secs: f64,

    /// Shell command used as the agent step (stdin in, stdout out).
    /// Without it the text is echoed unchanged.
    #[arg(long, env = "ECHOLOOP_AGENT_COMMAND")]
    pub agent_command: Option<String>,
}

impl LoopArgs {
    pub fn into_config(self) -> anyhow::Result<EchoLoopConfig> {
        ensure!(self.commit_every >= 1, "--commit-every must be at least 1");
        let cycle_delay = Duration::try_from_secs_f64(self.cycle_delay_secs)
            .with_context(|| format!("invalid --cycle-delay-secs {}", self.cycle_delay_secs))?;

        Ok(EchoLoopConfig {
            data_dir: self.data_dir,
            iterations: self.iterations,
            commit_every: self.commit_every,
            git: self.git.then_some(GitSettings {
                repo_dir: self.repo_dir,
                push: self.push,
            }),
            cycle_delay,
            agent: self.agent_command.map_or(AgentStep::Echo, AgentStep::Command),
            ..EchoLoopConfig::default()
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "ECHOLOOP_ADDR", default_value = "127.0.0.1:5000")]
    pub addr: String,

    /// Serve the API only; do not start the echo loop.
    #[arg(long)]
    pub no_loop: bool,

    #[command(flatten)]
    pub echo: LoopArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_match_the_loop_defaults() {
        let cli = Cli::try_parse_from(["echoloop", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.commit_every, 25);
        assert_eq!(config.cycle_delay, Duration::from_secs(5));
        assert!(config.git.is_none());
        assert!(matches!(config.agent, AgentStep::Echo));
    }

    #[test]
    fn serve_accepts_loop_flags() {
        let cli = Cli::try_parse_from([
            "echoloop",
            "serve",
            "--addr",
            "0.0.0.0:8080",
            "--git",
            "--push",
            "--commit-every",
            "5",
            "--workers",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(2));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.addr, "0.0.0.0:8080");
        let config = args.echo.into_config().unwrap();
        let git = config.git.unwrap();
        assert!(git.push);
        assert_eq!(config.commit_every, 5);
    }

    #[test]
    fn zero_commit_interval_is_rejected() {
        let cli = Cli::try_parse_from(["echoloop", "run", "--commit-every", "0"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.into_config().is_err());
    }

    #[test]
    fn negative_cycle_delay_is_rejected() {
        let cli = Cli::try_parse_from(["echoloop", "run", "--cycle-delay-secs=-1"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.into_config().is_err());
    }
}
