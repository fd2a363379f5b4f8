use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Provision hosts from declarative, idempotent steps", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge a target: run every step in dependency order
    Run(RunArgs),

    /// Show the order steps would run in (no target needed)
    Plan(PlanArgs),

    /// Evaluate preconditions only; change nothing
    Check(CheckArgs),

    /// Inspect saved run reports
    #[command(subcommand)]
    Report(ReportCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared Arguments
// ============================================================================

#[derive(Args, Clone)]
pub struct TargetArgs {
    /// Host to provision: `local` or `[user@]host[:port]`
    #[arg(short, long, env = "STAGEHAND_TARGET")]
    pub target: String,

    /// Login user when the target does not name one
    #[arg(long)]
    pub user: Option<String>,

    /// ssh port when the target does not name one
    #[arg(long)]
    pub port: Option<u16>,

    /// Private key for ssh
    #[arg(short, long)]
    pub identity: Option<String>,
}

#[derive(Args, Clone)]
pub struct StepsArgs {
    /// Steps file (TOML, or JSON by extension)
    #[arg(short, long, env = "STAGEHAND_STEPS")]
    pub steps: PathBuf,

    /// Set a template variable, overriding [vars] (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
}

#[derive(Args, Clone, Default)]
pub struct ConnectArgs {
    /// Seconds ssh may take to connect
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Trust host keys seen for the first time
    #[arg(long)]
    pub accept_new_host_keys: bool,

    /// Open a new ssh connection for every command
    #[arg(long)]
    pub no_multiplex: bool,
}

// ============================================================================
// Run / Plan / Check
// ============================================================================

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub steps: StepsArgs,

    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Stop at the first failure (default)
    #[arg(long, conflicts_with = "continue_on_failure")]
    pub halt_on_failure: bool,

    /// Keep running steps whose dependencies succeeded
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Steps that may run at once
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Time budget for each command, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the confirmation prompt for remote targets
    #[arg(short, long)]
    pub yes: bool,

    /// Do not save the report
    #[arg(long)]
    pub no_save: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub steps: StepsArgs,

    /// Print the expanded commands of every step
    #[arg(long)]
    pub commands: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub steps: StepsArgs,

    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Time budget for each command, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

// ============================================================================
// Report Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ReportCommand {
    /// List saved reports
    List {
        /// Only reports for this target
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Show a saved report
    Show {
        /// Report file, or `latest`
        #[arg(default_value = "latest")]
        report: String,

        /// Target for `latest`
        #[arg(short, long)]
        target: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse `KEY=VALUE`
fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("domain=example.com").unwrap(),
            ("domain".into(), "example.com".into())
        );
        assert_eq!(parse_var("opts=a=b").unwrap(), ("opts".into(), "a=b".into()));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".into(), String::new()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "stagehand",
            "run",
            "--target",
            "deploy@web1",
            "--steps",
            "web.toml",
            "--continue-on-failure",
            "--concurrency",
            "4",
            "--var",
            "domain=example.com",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.continue_on_failure);
        assert_eq!(args.concurrency, Some(4));
        assert_eq!(args.steps.vars.len(), 1);
    }

    #[test]
    fn test_policies_conflict() {
        let result = Cli::try_parse_from([
            "stagehand",
            "run",
            "-t",
            "local",
            "-s",
            "web.toml",
            "--halt-on-failure",
            "--continue-on-failure",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = Cli::try_parse_from([
            "stagehand",
            "run",
            "-t",
            "local",
            "-s",
            "web.toml",
            "-j",
            "0",
        ]);
        assert!(result.is_err());
    }
}
