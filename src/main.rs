use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use bmtlab::commands::{self, Session, SummaryOptions};
use bmtlab::utils::{logging, Console, TerminalConsole};
use bmtlab::{BmtError, SystemLauncher};

#[derive(Debug, Parser)]
#[command(
    name = "bmtlab",
    version,
    about = "Run the project's utility scripts and plugin commands.",
    long_about = "bmtlab finds scripts under <project>/scripts/<category>/ and runs them as child processes. Plugins in <project>/plugins/<name>/main.py can add their own commands.",
    after_help = "Scripts can also be run as `bmtlab <category> <script> [args...]`. Run `bmtlab plugins` to see plugin commands.",
    arg_required_else_help = true
)]
struct Args {
    #[arg(short = '!', long, global = true, long_help = "Enable debug mode", default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Show version and system information
    Version,

    /// List all available scripts
    List,

    /// Run a script, e.g. `bmtlab run -s webcam.show -- 1`
    Run {
        #[arg(short, long, help = "Script to run as category.script-name; lists scripts when omitted")]
        script: Option<String>,

        #[arg(help = "Arguments for the script", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List installed plugins
    Plugins {
        #[arg(long, help = "Rescan the plugin directories first")]
        reload: bool,
    },

    /// Inspect bmtlab.toml
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Git helpers
    #[command(subcommand)]
    Git(GitCommand),

    /// Show which required and optional Python packages are installed
    CheckDependencies,

    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective settings
    Show,
    /// Check settings and required environment variables
    Validate,
}

#[derive(Debug, Subcommand)]
enum GitCommand {
    /// Build an AI prompt for the last commit and save the resulting summary
    CommitSummary {
        #[arg(long, help = "Read the summary from a file instead of stdin")]
        summary_file: Option<PathBuf>,

        #[arg(long, help = "Only print the prompt")]
        prompt_only: bool,
    },
}

fn dispatch(command: CliCommand, session: &mut Session, console: &mut dyn Console) -> anyhow::Result<()> {
    match command {
        CliCommand::Version => commands::cmd_version(session, console),
        CliCommand::List => commands::cmd_list(session, console)?,
        CliCommand::Run { script, args } => {
            commands::cmd_run(session, console, script.as_deref(), &args)?
        }
        CliCommand::Plugins { reload } => commands::cmd_plugins(session, console, reload),
        CliCommand::Config(ConfigCommand::Show) => commands::cmd_config_show(session, console)?,
        CliCommand::Config(ConfigCommand::Validate) => {
            commands::cmd_config_validate(session, console)?
        }
        CliCommand::Git(GitCommand::CommitSummary {
            summary_file,
            prompt_only,
        }) => {
            let options = SummaryOptions {
                summary_file,
                prompt_only,
            };
            commands::cmd_commit_summary(session, console, &options, &mut io::stdin().lock())?;
        }
        CliCommand::CheckDependencies => commands::cmd_check_dependencies(session, console)?,
        CliCommand::External(args) => commands::cmd_external(session, console, &args)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.debug);

    let mut console = TerminalConsole;
    let cwd = match env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            console.error(&format!("Cannot determine the current directory: {}", e));
            return ExitCode::FAILURE;
        }
    };

    let launcher = SystemLauncher;
    let mut session = Session::open(cwd, &launcher);

    match dispatch(args.command, &mut session, &mut console) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("{:?}", e);
            console.error(&format!("Error: {:#}", e));
            let code = e.downcast_ref::<BmtError>().map(BmtError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
