mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_SPEC_ERROR, EXIT_STORE_ERROR};
use director_core::{
    install_signal_handler, DirectorConfig, DotEnv, DownOptions, Engine, UpOptions,
};
use director_store::ProjectState;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "director",
    version,
    about = "Declarative multi-jail orchestrator for AppJail"
)]
struct Cli {
    /// Configuration file (TOML). Defaults to $DIRECTOR_CONFIG or ~/.config/director/director.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Environment file whose variables are visible to !ENV values.
    #[arg(short, long, default_value = ".env", global = true)]
    env_file: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or update a project from a Director file.
    Up {
        /// Path to the Director file.
        #[arg(short, long, default_value = "director.yml")]
        file: PathBuf,
        /// Project name. Defaults to $DIRECTOR_PROJECT, then a random name.
        #[arg(short, long)]
        project: Option<String>,
        /// Re-create every service, even when nothing changed.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Stop at the first service that fails.
        #[arg(long, default_value_t = false)]
        fail_fast: bool,
    },
    /// Stop a project and optionally destroy it.
    Down {
        /// Project name. Defaults to $DIRECTOR_PROJECT.
        #[arg(short, long)]
        project: Option<String>,
        /// Destroy the jails and remove the project after stopping it.
        #[arg(short, long, default_value_t = false)]
        destroy: bool,
        /// Continue when a jail cannot be destroyed.
        #[arg(long, default_value_t = false)]
        ignore_failed: bool,
        /// Leave the jails untouched.
        #[arg(long, default_value_t = false)]
        ignore_services: bool,
    },
    /// List projects.
    Ls {
        /// Only show projects in this state. Can be given several times.
        #[arg(short, long = "state", value_parser = parse_state)]
        states: Vec<ProjectState>,
    },
    /// Show information about a project.
    Info {
        /// Project name. Defaults to $DIRECTOR_PROJECT.
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Exit 0 if a project exists, non-zero otherwise.
    Check {
        /// Project name. Defaults to $DIRECTOR_PROJECT.
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_state(s: &str) -> Result<ProjectState, String> {
    ProjectState::parse(s).ok_or_else(|| {
        format!("invalid state '{s}' (expected done, failed, unfinished or destroying)")
    })
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DIRECTOR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        return exit_code(commands::completions::run::<Cli>(shell));
    }

    install_signal_handler();

    let result =
        setup(&cli).and_then(|(engine, env)| dispatch(cli.command, &engine, &env, cli.json));
    exit_code(result)
}

fn setup(cli: &Cli) -> Result<(Engine, DotEnv), String> {
    let config = DirectorConfig::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    let env = DotEnv::load(&cli.env_file).map_err(|e| e.to_string())?;
    let backend = commands::make_backend()?;
    Ok((Engine::new(config, backend), env))
}

fn dispatch(command: Commands, engine: &Engine, env: &DotEnv, json: bool) -> Result<u8, String> {
    match command {
        Commands::Up {
            file,
            project,
            overwrite,
            fail_fast,
        } => commands::up::run(
            engine,
            env,
            &file,
            project.as_deref(),
            UpOptions {
                overwrite,
                fail_fast,
            },
            json,
        ),
        Commands::Down {
            project,
            destroy,
            ignore_failed,
            ignore_services,
        } => commands::down::run(
            engine,
            env,
            project.as_deref(),
            DownOptions {
                destroy,
                ignore_failed,
                ignore_services,
            },
            json,
        ),
        Commands::Ls { states } => commands::ls::run(engine, &states, json),
        Commands::Info { project } => commands::info::run(engine, env, project.as_deref(), json),
        Commands::Check { project } => commands::check::run(engine, env, project.as_deref()),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn exit_code(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("specification error:")
                || msg.starts_with("configuration error:")
            {
                EXIT_SPEC_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("lock timeout:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
