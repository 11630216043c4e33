//! HeTu game server binary: `start`/`migrate`/`shell` subcommands over a
//! shared `HetuConfig`, wiring the component store, system executor,
//! subscription broker and WebSocket gateway together.
//!
//! `clap` + `tokio` + `tracing-subscriber` + `anyhow`, a `tokio::signal::
//! ctrl_c` shutdown, and subcommands declared with a `clap::Subcommand`
//! derive over one `--config` flag each.

mod config;
mod demo;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use hetu_broker::Broker;
use hetu_gateway::{Gateway, GatewayState};
use hetu_runtime::{ExecConfig, Executor, SystemRegistry};
use hetu_store::persistence::PersistenceManager;
use hetu_store::{Database, StoreConfig};

use config::HetuConfig;

/// Exit codes, per the CLI surface's documented contract: 0 normal, 1
/// config error, 2 backend error, 3 migration required.
const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_BACKEND_ERROR: u8 = 2;
const EXIT_MIGRATION_REQUIRED: u8 = 3;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server: gateway, runtime and broker, until Ctrl-C.
    Start {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Compare the persisted schema against the in-process registry and
    /// report what changed, without writing anything.
    Migrate {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Open a blocking diagnostic shell over a freshly loaded store.
    Shell {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_path, is_start) = match &cli.command {
        Command::Start { config } => (config.clone(), true),
        Command::Migrate { config } => (config.clone(), false),
        Command::Shell { config } => (config.clone(), false),
    };

    let config = match HetuConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    tracing_subscriber::fmt().with_max_level(config.tracing_level()).init();

    if is_start {
        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!(error = %e, "failed to build tokio runtime");
                return ExitCode::from(EXIT_BACKEND_ERROR);
            }
        };
        return ExitCode::from(runtime.block_on(run_start(config)));
    }

    match &cli.command {
        Command::Migrate { .. } => ExitCode::from(run_migrate(config)),
        Command::Shell { .. } => ExitCode::from(run_shell(config)),
        Command::Start { .. } => unreachable!("handled above"),
    }
}

fn store_config(config: &HetuConfig) -> StoreConfig {
    StoreConfig {
        initial_table_capacity: config.initial_table_capacity,
        data_dir: config.data_dir.clone(),
        persistence_interval_ticks: config.persistence_interval_ticks,
        persistence_max_retries: config.max_retries,
        persistence_retry_delay_ms: config.persistence_retry_delay_ms,
    }
}

/// Loads the persisted schema (if any), registers the demo components not
/// already present, loads persistent row data, and clears transient
/// components — the startup sequence every subcommand that touches the
/// store shares.
fn open_store(config: &HetuConfig) -> anyhow::Result<(Arc<Database>, PersistenceManager)> {
    let persistence = PersistenceManager::new(&store_config(config));
    let db = persistence.load_schema()?;
    demo::register_components(&db)?;

    for name in db.component_names() {
        let table = db.component(&name)?;
        persistence.load_table_data(&table)?;
    }
    db.clear_transient();

    let db = Arc::new(db);
    demo::seed_rows(&db)?;
    persistence.save_schema(&db)?;

    Ok((db, persistence))
}

async fn run_start(config: HetuConfig) -> u8 {
    let (db, persistence) = match open_store(&config) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to open store");
            return EXIT_BACKEND_ERROR;
        }
    };

    let registry = SystemRegistry::new();
    if let Err(e) = demo::register_systems(&registry) {
        error!(error = %e, "failed to register systems");
        return EXIT_BACKEND_ERROR;
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let exec_config = ExecConfig {
        worker_pool_size: config.worker_pool_size,
        max_retries: config.max_retries,
        call_deadline_ms: config.call_deadline_ms,
    };
    let executor = Executor::new(Arc::clone(&db), registry, exec_config).with_event_sink(event_tx);
    let broker = Broker::new(Arc::clone(&db));

    let forward_broker = broker.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(events) = event_rx.recv().await {
            forward_broker.publish(events);
        }
    });

    let state = GatewayState::new(Arc::clone(&db), executor, broker);
    let gateway = Gateway::new(config.listen, state, config.max_connections);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let persistence = Arc::new(persistence);
    let flush_db = Arc::clone(&db);
    let flush_persistence = Arc::clone(&persistence);
    let mut flush_shutdown = shutdown_tx.subscribe();
    let flusher = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = flush_persistence.tick(&flush_db) {
                        warn!(error = %e, "periodic persistence tick failed");
                    }
                }
                _ = flush_shutdown.changed() => return,
            }
        }
    });

    let serve_result = tokio::select! {
        result = gateway.serve(shutdown_rx) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    // `forwarder` drains until every `Executor` clone's event-sink handle is
    // dropped; it's left running and is cleaned up when the runtime itself
    // is torn down on process exit, same as any in-flight connection task.
    forwarder.abort();
    let _ = flusher.await;
    if let Err(e) = persistence.flush_all_tables(&db) {
        warn!(error = %e, "final flush on shutdown failed");
    }

    match serve_result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!(error = %e, "gateway exited with error");
            EXIT_BACKEND_ERROR
        }
    }
}

/// Validates the on-disk schema file against what this binary would
/// register at startup, in an ordinary blocking call, not an async task —
/// `migrate` never opens a gateway or runs a System.
fn run_migrate(config: HetuConfig) -> u8 {
    let persistence = PersistenceManager::new(&store_config(&config));

    let persisted = match persistence.read_schema_file() {
        Ok(Some(schema)) => schema,
        Ok(None) => {
            info!("no persisted schema file found; nothing to migrate");
            return EXIT_OK;
        }
        Err(e) => {
            error!(error = %e, "failed to read schema file");
            return EXIT_BACKEND_ERROR;
        }
    };

    let registered_db = Database::new();
    if let Err(e) = demo::register_components(&registered_db) {
        error!(error = %e, "failed to register components");
        return EXIT_BACKEND_ERROR;
    }

    let mut registered = std::collections::HashMap::new();
    for name in registered_db.component_names() {
        let Ok(table) = registered_db.component(&name) else {
            continue;
        };
        let fields = table
            .fields
            .iter()
            .map(|f| hetu_store::persistence::FieldSchema {
                name: f.name.clone(),
                ty: f.ty.clone(),
                default: f.default.clone(),
            })
            .collect();
        let indices = table
            .indices
            .iter()
            .map(|(field, kind)| hetu_store::persistence::IndexSchema {
                field: field.clone(),
                kind: *kind,
            })
            .collect();
        registered.insert(
            name,
            hetu_store::persistence::TableSchema {
                fields,
                indices,
                persistency: table.persistency,
                permission: table.permission,
            },
        );
    }

    let diffs = hetu_store::persistence::diff_schema(&persisted, &registered);
    if diffs.is_empty() {
        info!("persisted schema matches the registered components");
        return EXIT_OK;
    }

    for diff in &diffs {
        warn!(?diff, "schema divergence detected");
    }
    EXIT_MIGRATION_REQUIRED
}

/// A blocking diagnostic shell: lists registered components and systems
/// and reports row counts. Runs on the calling thread, not inside a tokio
/// runtime, since it never awaits anything.
fn run_shell(config: HetuConfig) -> u8 {
    let (db, _persistence) = match open_store(&config) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to open store");
            return EXIT_BACKEND_ERROR;
        }
    };

    let registry = SystemRegistry::new();
    if let Err(e) = demo::register_systems(&registry) {
        error!(error = %e, "failed to register systems");
        return EXIT_BACKEND_ERROR;
    }

    println!("components:");
    for name in db.component_names() {
        if let Ok(table) = db.component(&name) {
            println!("  {name} ({} rows)", table.row_count());
        }
    }

    println!("systems:");
    for name in registry.names() {
        println!("  {name}");
    }

    EXIT_OK
}
