mod commands;

use clap::{Parser, Subcommand};
use commands::{NetworkArgs, EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_POLICY_ERROR};
use quarry_schema::ToolRequest;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "quarry",
    version,
    about = "Offline-first tool hydration from verified archive mirrors"
)]
struct Cli {
    /// Network policy file (defaults to ~/.config/quarry/policy.json).
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

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
    /// Install tools from a repository or stack manifest into the library.
    Hydrate {
        /// Manifest path, file:// URL or http(s) URL.
        #[arg(long)]
        manifest: String,
        /// Treat the manifest as a frozen stack (entries carry `path`).
        #[arg(long, default_value_t = false)]
        stack: bool,
        /// Mirror root for relative archive paths (directory or URL).
        /// Defaults to the manifest's own location.
        #[arg(long)]
        mirror: Option<String>,
        /// Library directory tools are installed into.
        #[arg(long, default_value = "~/.local/share/quarry/library")]
        library: String,
        /// Staging directory (defaults to <library>/.staging).
        #[arg(long)]
        staging: Option<String>,
        #[command(flatten)]
        network: NetworkArgs,
        /// Tools to install, as <id>@<version>.
        #[arg(required = true)]
        tools: Vec<ToolRequest>,
    },
    /// Validate a manifest file and list every finding.
    Validate {
        /// Path to manifest JSON file.
        manifest: PathBuf,
        /// Validate as a stack manifest instead of a repository manifest.
        #[arg(long, default_value_t = false)]
        stack: bool,
    },
    /// Compute the SHA-256 of a file, optionally checking it.
    Hash {
        file: PathBuf,
        /// Expected lowercase hex digest.
        #[arg(long)]
        expect: Option<String>,
    },
    /// List tools installed in the library.
    List {
        /// Only list versions of this tool.
        id: Option<String>,
        #[arg(long, default_value = "~/.local/share/quarry/library")]
        library: String,
    },
    /// Download a single URL through the network gate.
    Fetch {
        url: String,
        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Inspect the effective network policy.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Debug, Subcommand)]
enum PolicyAction {
    /// Print the effective policy.
    Show {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Report whether the gate would allow a connection to a URL.
    Check {
        url: String,
        #[command(flatten)]
        network: NetworkArgs,
    },
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
            tracing_subscriber::EnvFilter::try_from_env("QUARRY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;
    let policy_file = cli.policy.as_deref();

    let result = match cli.command {
        Commands::Hydrate {
            manifest,
            stack,
            mirror,
            library,
            staging,
            network,
            tools,
        } => {
            let library = expand_tilde(&library);
            let staging = staging.map_or_else(|| library.join(".staging"), |s| expand_tilde(&s));
            commands::hydrate::run(
                &commands::hydrate::HydrateOptions {
                    manifest,
                    stack,
                    mirror,
                    library,
                    staging,
                },
                &network,
                policy_file,
                tools,
                json_output,
            )
        }
        Commands::Validate { manifest, stack } => {
            commands::validate::run(&manifest, stack, json_output)
        }
        Commands::Hash { file, expect } => {
            commands::hash::run(&file, expect.as_deref(), json_output)
        }
        Commands::List { id, library } => {
            commands::list::run(&expand_tilde(&library), id.as_deref(), json_output)
        }
        Commands::Fetch {
            url,
            output,
            network,
        } => commands::fetch::run(&url, &output, &network, policy_file, json_output),
        Commands::Policy { action } => match action {
            PolicyAction::Show { network } => {
                commands::policy::show(&network, policy_file, json_output)
            }
            PolicyAction::Check { url, network } => {
                commands::policy::check(&url, &network, policy_file, json_output)
            }
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest") || msg.starts_with("failed to read manifest")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("policy") || msg.starts_with("network access blocked") {
                EXIT_POLICY_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
