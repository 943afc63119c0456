//! sensorhub CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use sensorhub::{
    changes::ChangeTracker,
    commands::{
        cmd_changelog, cmd_detect, cmd_import_template, cmd_ingest, cmd_init,
        cmd_list_templates, cmd_remove_template, cmd_replay, cmd_rows, cmd_run, cmd_schema,
        cmd_show_template, cmd_status, cmd_sync, cmd_tables, print_changelog,
        print_detect_report, print_ingest_report, print_init_report, print_line_stats,
        print_rows, print_source_stats, print_status, print_sync_stats, print_table_info,
        print_tables, print_template, print_templates, InitOptions,
    },
    config::{default_row_limit, Config},
    error::{Error, Result},
    progress::LogWriterFactory,
    query::QueryFacade,
    schema::StoreRegistry,
    template::TemplateStore,
};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sensorhub")]
#[command(version, about = "Template-driven sensor telemetry ingestion into SQLite", long_about = None)]
struct Cli {
    /// Path to config file or data directory
    #[arg(short, long, global = true, env = "SENSORHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize sensorhub configuration and data directories
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Do not write the example weather-station template
        #[arg(long)]
        no_example: bool,
    },

    /// Manage device templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Create or evolve template stores and record changes
    Sync {
        /// Only sync this template
        template: Option<String>,
    },

    /// Ingest a single raw line
    Ingest {
        /// Template to parse the line with
        template: String,

        /// The raw line, e.g. "Sensor:outdoor_01;T:15.3;P:1013.2"
        line: String,
    },

    /// Replay a captured log file through a template
    Replay {
        /// Template to parse lines with
        template: String,

        /// Capture file, one line per reading
        file: PathBuf,
    },

    /// Collect from all configured sources until Ctrl-C
    Run,

    /// Sample a source and score stored templates against it
    Detect {
        /// Device, FIFO or capture file ('-' for stdin)
        path: PathBuf,
    },

    /// List tables per template store
    Tables {
        /// Only this template
        template: Option<String>,
    },

    /// Show the columns and indexes of a table
    Schema {
        /// Template owning the table
        template: String,

        /// Table name
        table: String,
    },

    /// Show the most recent rows of a table
    Rows {
        /// Template owning the table
        template: String,

        /// Table name (optional with --sensor)
        table: Option<String>,

        /// Show rows of this sensor instead
        #[arg(short, long)]
        sensor: Option<String>,

        /// Maximum number of rows
        #[arg(short, long, default_value_t = default_row_limit())]
        limit: usize,
    },

    /// Show the recorded changes of a template
    Changelog {
        /// Template name
        template: String,
    },

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Template management actions
#[derive(Subcommand)]
enum TemplateAction {
    /// List stored templates
    List {
        /// Output only template names (one per line, for scripting)
        #[arg(long)]
        names_only: bool,
    },

    /// Print a stored template as TOML
    Show {
        /// Template name
        name: String,
    },

    /// Validate and store a template file
    Import {
        /// Path to a TOML template
        path: PathBuf,
    },

    /// Delete a stored template (its store and changelog are kept)
    Remove {
        /// Template name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(if e.is_not_found() { 2 } else { 1 });
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(LogWriterFactory))
            .init();
    }

    // Handle init command specially (doesn't need existing config)
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    // Handle completions command (doesn't need config or stores)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "sensorhub", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    config.ensure_dirs()?;

    let templates = TemplateStore::open(&config.paths.templates_dir)?;
    let tracker = ChangeTracker::open(&config.paths.changelog_dir)?;
    let registry = StoreRegistry::new(&config.paths.databases_dir, config.storage.clone());

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Templates { action } => handle_templates(&templates, action, cli.json)?,

        Commands::Sync { template } => {
            let stats = cmd_sync(&templates, &tracker, &registry, template.as_deref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_sync_stats(&stats);
            }
            if !stats.failed.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Ingest { template, line } => {
            let report = cmd_ingest(&templates, &registry, &template, &line).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_ingest_report(&report);
            }
            if !report.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Replay { template, file } => {
            let stats = cmd_replay(&templates, &registry, &template, &file, !cli.json).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_line_stats(&stats);
            }
        }

        Commands::Run => {
            let stats = cmd_run(&config, &templates, &tracker, &registry).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_source_stats(&stats);
            }
        }

        Commands::Detect { path } => {
            let report = cmd_detect(&config, &templates, &path).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_detect_report(&report);
            }
        }

        Commands::Tables { template } => {
            let query = QueryFacade::new(&templates, &registry);
            let tables = cmd_tables(&query, template.as_deref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                print_tables(&tables);
            }
        }

        Commands::Schema { template, table } => {
            let query = QueryFacade::new(&templates, &registry);
            let info = cmd_schema(&query, &template, &table).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_table_info(&info);
            }
        }

        Commands::Rows {
            template,
            table,
            sensor,
            limit,
        } => {
            let query = QueryFacade::new(&templates, &registry);
            let rows = cmd_rows(&query, &template, table.as_deref(), sensor.as_deref(), limit).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_rows(&rows);
            }
        }

        Commands::Changelog { template } => {
            let entries = cmd_changelog(&tracker, &template)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_changelog(&template, &entries);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &templates, &tracker, &registry).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    registry.close().await;
    Ok(())
}

fn handle_templates(templates: &TemplateStore, action: TemplateAction, json: bool) -> Result<()> {
    match action {
        TemplateAction::List { names_only } => {
            let summaries = cmd_list_templates(templates)?;
            if names_only {
                for summary in &summaries {
                    println!("{}", summary.name);
                }
            } else if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_templates(&summaries);
            }
        }

        TemplateAction::Show { name } => {
            let template = cmd_show_template(templates, &name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&template)?);
            } else {
                print_template(&template)?;
            }
        }

        TemplateAction::Import { path } => {
            let template = cmd_import_template(templates, &path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&template)?);
            } else {
                println!(
                    "✓ Template '{}' v{} imported ({} sensors)",
                    template.name,
                    template.version,
                    template.sensors.len()
                );
                println!("  Run 'sensorhub sync {}' to create its store", template.name);
            }
        }

        TemplateAction::Remove { name } => {
            cmd_remove_template(templates, &name)?;
            if json {
                println!(r#"{{"status": "ok", "removed": "{}"}}"#, name);
            } else {
                println!("✓ Template '{}' removed", name);
            }
        }
    }

    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force, no_example } = cli.command else {
        unreachable!()
    };

    // A .toml path names the config file; anything else is the data directory
    let (base_dir, config_path) = match cli.config {
        Some(path) if is_toml(&path) => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => (dir.clone(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    };

    let report = cmd_init(InitOptions {
        base_dir,
        config_path,
        force,
        example_template: !no_example,
    })
    .await
    .map_err(|e| match e {
        Error::AlreadyInitialized(path) => Error::Config(format!(
            "Config file already exists at: {}. Use --force to overwrite.",
            path
        )),
        other => other,
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_init_report(&report);
    }

    Ok(())
}

fn is_toml(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "toml")
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) if is_toml(p) => p.to_path_buf(),
        Some(dir) => dir.join("config.toml"),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
