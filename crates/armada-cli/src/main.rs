mod commands;

use armada_core::{install_signal_handler, BuildOptions};
use armada_schema::NamePattern;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_DEFINITION_ERROR, EXIT_FAILURE, EXIT_RUNTIME_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "armada",
    version,
    about = "Declarative container deployment with drift-aware reconciliation"
)]
struct Cli {
    /// Path to the shipment YAML document.
    #[arg(short = 'c', long, default_value = "shipment.yaml", global = true)]
    shipment: PathBuf,

    /// Settings file replacing the layered system and user settings.
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Namespace for repositories declared without one, overriding settings.
    #[arg(short = 'n', long, global = true)]
    namespace: Option<String>,

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

/// Name filter shared by every listing group.
#[derive(Debug, Args)]
struct Filter {
    /// Wildcard pattern matched against full names.
    #[arg(short, long, default_value = "*")]
    pattern: String,
    /// Treat the pattern as a regular expression.
    #[arg(short, long, default_value_t = false)]
    regex: bool,
}

impl Filter {
    fn compile(&self) -> Result<NamePattern, String> {
        NamePattern::new(&self.pattern, self.regex).map_err(|e| format!("definition error: {e}"))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Shipment management commands.
    Shipment {
        #[command(subcommand)]
        command: ShipmentCommand,
    },
    /// Container management commands.
    Container {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: ContainerCommand,
    },
    /// Image management commands.
    Image {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: ImageCommand,
    },
    /// Ship management commands.
    Ship {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: ShipCommand,
    },
    /// Volume commands.
    Volume {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: ListCommand,
    },
    /// Config file commands.
    File {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: FileCommand,
    },
    /// Container door commands.
    Door {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: ListCommand,
    },
    /// Local settings commands.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum ShipmentCommand {
    /// Print the shipment summary.
    List,
    /// Print the shipment document.
    Dump,
    /// Resolve image ids, build missing images and print the stamped document.
    Generate,
}

#[derive(Debug, Subcommand)]
enum ContainerCommand {
    /// Print container names.
    List,
    /// Render config volumes and bring containers to their declaration.
    Start,
    /// Stop running containers.
    Stop,
    /// Stop if running, then start.
    Restart,
    /// Stop and remove containers.
    Remove,
    /// Show container state and drift.
    Status {
        /// Show the field-level diff of running containers.
        #[arg(short, long, default_value_t = false)]
        diff: bool,
    },
    /// Print container logs.
    Log {
        /// Keep streaming new output.
        #[arg(short, long, default_value_t = false)]
        follow: bool,
    },
    /// Print the container declaration.
    Dump,
    /// Start, attach and wait for containers.
    Exec {
        /// Keep the container after it stops.
        #[arg(short, long, default_value_t = false)]
        keep: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ImageCommand {
    /// Print buildable images in build order.
    List,
    /// Build buildable images whose derived tag is absent.
    Build {
        /// Build even when the derived tag already exists.
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        /// Do not reuse cached layers.
        #[arg(long, default_value_t = false)]
        nocache: bool,
    },
    /// Push buildable images to their registry.
    Push,
}

#[derive(Debug, Subcommand)]
enum ListCommand {
    /// Print matching names.
    List,
}

#[derive(Debug, Subcommand)]
enum ShipCommand {
    /// Print ship names and hostnames.
    List,
    /// Restart every declared container of the ships.
    Restart,
    /// Commands for any running container on the ships.
    Container {
        #[command(flatten)]
        filter: Filter,
        #[command(subcommand)]
        command: ShipContainerCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ShipContainerCommand {
    /// Print ship, name, status and published ports.
    List,
    /// Print the runtime record of each container.
    Inspect,
    /// Print container logs.
    Log {
        /// Keep streaming new output.
        #[arg(short, long, default_value_t = false)]
        follow: bool,
    },
}

#[derive(Debug, Subcommand)]
enum FileCommand {
    /// Print file names and host paths.
    List,
    /// Print file content as deployed.
    View,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective settings as TOML.
    Dump,
    /// Write default settings to the user settings file.
    Create {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn dispatch(cli: Cli) -> Result<u8, String> {
    if let Commands::Completions { shell } = cli.command {
        return commands::completions::run::<Cli>(shell);
    }
    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommand::Dump => commands::config::dump(
                cli.settings.as_deref(),
                cli.namespace.as_deref(),
                cli.json,
            ),
            ConfigCommand::Create { force } => {
                commands::config::create(cli.settings.as_deref(), *force)
            }
        };
    }

    let mut ctx = Context::load(
        &cli.shipment,
        cli.settings.as_deref(),
        cli.namespace.as_deref(),
        cli.json,
    )?;
    match cli.command {
        Commands::Shipment { command } => match command {
            ShipmentCommand::List => commands::shipment::list(&ctx),
            ShipmentCommand::Dump => commands::shipment::dump(&ctx),
            ShipmentCommand::Generate => commands::shipment::generate(&mut ctx),
        },
        Commands::Container { filter, command } => {
            let pattern = filter.compile()?;
            let selected = commands::container::select(&ctx.shipment, &pattern);
            match command {
                ContainerCommand::List => commands::container::list(&ctx, &selected),
                ContainerCommand::Start => commands::container::start(&mut ctx, &selected),
                ContainerCommand::Stop => commands::container::stop(&mut ctx, &selected),
                ContainerCommand::Restart => commands::container::restart(&mut ctx, &selected),
                ContainerCommand::Remove => commands::container::remove(&mut ctx, &selected),
                ContainerCommand::Status { diff } => {
                    commands::container::status(&mut ctx, &selected, diff)
                }
                ContainerCommand::Log { follow } => {
                    commands::container::log(&mut ctx, &selected, follow)
                }
                ContainerCommand::Dump => commands::container::dump(&ctx, &selected),
                ContainerCommand::Exec { keep } => {
                    commands::container::exec(&mut ctx, &selected, keep)
                }
            }
        }
        Commands::Image { filter, command } => {
            let pattern = filter.compile()?;
            let selected = commands::image::select(&ctx.shipment, &pattern)?;
            match command {
                ImageCommand::List => commands::image::list(&ctx, &selected),
                ImageCommand::Build { rebuild, nocache } => {
                    let options = BuildOptions { rebuild, nocache };
                    commands::image::build(&mut ctx, &selected, options)
                }
                ImageCommand::Push => commands::image::push(&mut ctx, &selected),
            }
        }
        Commands::Ship { filter, command } => {
            let ships = filter.compile()?;
            match command {
                ShipCommand::List => commands::ship::list(&ctx, &ships),
                ShipCommand::Restart => commands::ship::restart(&mut ctx, &ships),
                ShipCommand::Container { filter, command } => {
                    let containers = filter.compile()?;
                    match command {
                        ShipContainerCommand::List => {
                            commands::ship::container_list(&mut ctx, &ships, &containers)
                        }
                        ShipContainerCommand::Inspect => {
                            commands::ship::container_inspect(&mut ctx, &ships, &containers)
                        }
                        ShipContainerCommand::Log { follow } => {
                            commands::ship::container_log(&mut ctx, &ships, &containers, follow)
                        }
                    }
                }
            }
        }
        Commands::Volume { filter, command } => match command {
            ListCommand::List => commands::volume::list(&ctx, &filter.compile()?),
        },
        Commands::File { filter, command } => match command {
            FileCommand::List => commands::file::list(&ctx, &filter.compile()?),
            FileCommand::View => commands::file::view(&ctx, &filter.compile()?),
        },
        Commands::Door { filter, command } => match command {
            ListCommand::List => commands::door::list(&ctx, &filter.compile()?),
        },
        Commands::Config { .. } | Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
    }
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
            tracing_subscriber::EnvFilter::try_from_env("ARMADA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("definition error:") {
                EXIT_DEFINITION_ERROR
            } else if msg.starts_with("runtime error:") {
                EXIT_RUNTIME_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
