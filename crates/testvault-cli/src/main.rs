use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use testvault_core::{
    ARCHIVER_VERSION, ArchiveConfig, ArchiveEvent, ArchiveEventSink, BuildNumberCache,
    ConfigOverrides, DbEngine, Tracker, archive_event_channel, parse_log_length,
    parse_metadata_pair,
};
use testvault_parsers::{ReportFormat, archive_report};
use testvault_store::{
    MemoryArchiveStore, SharedArchiveStore, SqliteArchiveStore, load_keyword_tree,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "testvault")]
#[command(about = "Archive test results into a queryable database")]
#[command(version)]
struct Cli {
    /// Default log filter; RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Archive(ArchiveArgs),
    KeywordTree(KeywordTreeArgs),
}

#[derive(clap::Args, Debug)]
struct ArchiveArgs {
    /// Report files, archived in order as separate test runs.
    #[arg(required = true)]
    files: Vec<PathBuf>,
    #[arg(long, default_value = "robot")]
    format: String,
    /// JSON config file; command-line values take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long = "dbengine")]
    db_engine: Option<String>,
    #[arg(long)]
    database: Option<PathBuf>,
    #[arg(long)]
    repository: Option<String>,
    #[arg(long)]
    team: Option<String>,
    /// NAME or NAME#BUILD
    #[arg(long)]
    series: Vec<String>,
    /// NAME:VALUE
    #[arg(long)]
    metadata: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    no_keywords: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    no_keyword_stats: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    ignore_logs: bool,
    #[arg(long)]
    ignore_logs_below: Option<String>,
    /// Integer or `full`.
    #[arg(long)]
    max_log_message_length: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    time_adjust_secs: Option<i64>,
    #[arg(long, action = ArgAction::SetTrue)]
    time_adjust_with_system_timezone: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    allow_minor_schema_updates: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    allow_major_schema_updates: bool,
    /// Print archive events as JSON lines.
    #[arg(long, action = ArgAction::SetTrue)]
    event_json: bool,
}

#[derive(clap::Args, Debug)]
struct KeywordTreeArgs {
    #[arg(long)]
    database: PathBuf,
    #[arg(long)]
    fingerprint: String,
    #[arg(long, default_value_t = 64)]
    max_depth: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Archive(args) => archive_command(args).await,
        Commands::KeywordTree(args) => keyword_tree_command(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn archive_command(args: ArchiveArgs) -> Result<ExitCode, String> {
    if let Some(missing) = args.files.iter().find(|file| !file.exists()) {
        return Err(format!("could not find input file: {}", missing.display()));
    }
    let format: ReportFormat = args.format.parse().map_err(|error| format!("{error}"))?;
    let config = load_config(&args)?;
    let store = open_store(&config)?;

    let (events, event_task) = event_stream(args.event_json);
    let mut build_numbers = BuildNumberCache::new();
    for file in &args.files {
        let mut tracker = Tracker::new(store.clone(), config.clone())
            .with_build_numbers(build_numbers)
            .with_events(events.clone());
        build_numbers =
            archive_report(file, format, &mut tracker).map_err(|error| error.to_string())?;
    }

    drop(events);
    event_task.await.map_err(|error| error.to_string())?;
    Ok(ExitCode::SUCCESS)
}

fn load_config(args: &ArchiveArgs) -> Result<ArchiveConfig, String> {
    let mut config = match args.config.as_deref() {
        Some(path) => ArchiveConfig::from_json_file(path).map_err(|error| error.to_string())?,
        None => ArchiveConfig::default(),
    };
    let metadata = args
        .metadata
        .iter()
        .map(|pair| parse_metadata_pair(pair))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| error.to_string())?;
    let db_engine = args
        .db_engine
        .as_deref()
        .map(str::parse::<DbEngine>)
        .transpose()
        .map_err(|error| error.to_string())?;
    let max_log_message_length = args
        .max_log_message_length
        .as_deref()
        .map(parse_log_length)
        .transpose()
        .map_err(|error| error.to_string())?;

    config.apply(ConfigOverrides {
        database: args.database.clone(),
        db_engine,
        repository: args.repository.clone(),
        team: args.team.clone(),
        series: args.series.clone(),
        metadata,
        no_keywords: args.no_keywords,
        no_keyword_stats: args.no_keyword_stats,
        ignore_logs: args.ignore_logs,
        ignore_logs_below: args.ignore_logs_below.clone(),
        max_log_message_length,
        time_adjust_secs: args.time_adjust_secs,
        time_adjust_with_system_timezone: args.time_adjust_with_system_timezone,
        allow_minor_schema_updates: args.allow_minor_schema_updates,
        allow_major_schema_updates: args.allow_major_schema_updates,
    });
    Ok(config)
}

fn open_store(config: &ArchiveConfig) -> Result<SharedArchiveStore, String> {
    match config.db_engine {
        DbEngine::Memory => Ok(Arc::new(MemoryArchiveStore::new())),
        DbEngine::Sqlite => {
            let store =
                SqliteArchiveStore::open(&config.database).map_err(|error| error.to_string())?;
            let version = store
                .check_and_update_schema(
                    config.schema_policy(),
                    &format!("testvault {ARCHIVER_VERSION}"),
                )
                .map_err(|error| error.to_string())?;
            tracing::info!(database = %config.database.display(), version, "archive database ready");
            Ok(Arc::new(store))
        }
    }
}

fn event_stream(event_json: bool) -> (ArchiveEventSink, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = archive_event_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event_json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(_) => print_event_text(&event),
                }
            } else if matches!(event, ArchiveEvent::RunFinished { .. }) {
                print_event_text(&event);
            }
        }
    });
    (ArchiveEventSink::default().sender(tx), task)
}

fn print_event_text(event: &ArchiveEvent) {
    match event {
        ArchiveEvent::SuiteFinished {
            full_name, status, ..
        } => println!("suite {full_name}: {status}"),
        ArchiveEvent::TestFinished {
            full_name, status, ..
        } => println!("test {full_name}: {status}"),
        ArchiveEvent::RunFinished {
            run_id,
            dryrun,
            builds,
        } => {
            println!("test run {run_id} archived{}", if *dryrun { " (dry run)" } else { "" });
            for build in builds {
                println!(
                    "  {} / {}: build {}",
                    build.team, build.name, build.build_number
                );
            }
        }
    }
}

fn keyword_tree_command(args: KeywordTreeArgs) -> Result<ExitCode, String> {
    let store = open_existing(&args.database)?;
    let tree = load_keyword_tree(&store, &args.fingerprint, args.max_depth)
        .map_err(|error| error.to_string())?;
    let json = serde_json::to_string_pretty(&tree).map_err(|error| error.to_string())?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

fn open_existing(database: &Path) -> Result<SqliteArchiveStore, String> {
    if !database.exists() {
        return Err(format!("archive database not found: {}", database.display()));
    }
    SqliteArchiveStore::open(database).map_err(|error| error.to_string())
}
