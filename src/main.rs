use std::io::Write;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use colored::Colorize;
use stacker::App;
use stacker::Config;
use stacker::StackerError;
use stacker::ops::git::RealGit;
use stacker::ops::github::MergeMethod;
use stacker::ops::github::RealGithub;

#[derive(Parser)]
#[command(name = "stacker")]
#[command(about = "Manage a stack of dependent GitHub pull requests", long_about = None)]
pub struct Cli {
    /// Print debug logging and full error chains
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the stack configuration to .git/config
    Init {
        /// Remote to push branches to
        #[arg(long, default_value = "origin")]
        remote: String,
        /// Remote branch PRs ultimately merge into
        #[arg(long)]
        target: String,
        /// Open new PRs as drafts
        #[arg(long)]
        draft: bool,
        /// Namespace for generated PR branches
        #[arg(long, default_value = "stacker")]
        prefix: String,
    },
    /// Push a branch per commit and create or update the PRs
    Submit {
        /// Base commit of the stack (defaults to the merge base with the target)
        #[arg(long)]
        base: Option<String>,
    },
    /// Show the stack and its PRs
    Status {
        /// Base commit of the stack (defaults to the merge base with the target)
        #[arg(long)]
        base: Option<String>,
    },
    /// Merge the bottom PR and rebase the rest of the stack on top
    Land {
        /// Proceed despite failing checks or requested changes
        #[arg(long)]
        force: bool,
        /// Land every PR in the stack, bottom up
        #[arg(long)]
        all: bool,
        /// How to merge each PR
        #[arg(long, value_enum, default_value_t = MergeMethod::Squash)]
        method: MergeMethod,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "stacker=debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_app() -> Result<App<RealGit, RealGithub>> {
    let config = Config::load()?;
    let path = std::env::current_dir()?;
    let git = RealGit::new(path.clone());
    let gh = RealGithub::new(path).await?;
    Ok(App::new(config, git, gh))
}

async fn run(command: Commands) -> Result<()> {
    let mut stdout = std::io::stdout();
    match command {
        Commands::Init {
            remote,
            target,
            draft,
            prefix,
        } => {
            let config = Config::new(remote, target, draft, prefix);
            config.save()?;
            writeln!(
                stdout,
                "Configured stacker to target {}/{}",
                config.remote, config.target
            )?;
            Ok(())
        }
        Commands::Submit { base } => {
            build_app().await?.cmd_submit(base.as_deref(), &mut stdout).await
        }
        Commands::Status { base } => {
            build_app().await?.cmd_status(base.as_deref(), &mut stdout).await
        }
        Commands::Land { force, all, method } => {
            build_app().await?.cmd_land(force, all, method, &mut stdout).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli.command).await {
        eprintln!("{} {}", "error:".red().bold(), err);
        let domain = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<StackerError>());
        if let Some(hint) = domain.and_then(StackerError::suggestion) {
            eprintln!("{} {}", "hint:".yellow(), hint);
        }
        if cli.verbose {
            eprintln!("\n{err:?}");
        }
        std::process::exit(1);
    }
}
