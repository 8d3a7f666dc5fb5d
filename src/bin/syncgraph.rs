//! syncgraph CLI: run sync passes and manage tenant sources.
//!
//! Usage:
//!   syncgraph run [--once] [--config path]
//!   syncgraph tenant <enable|disable|list>
//!   syncgraph import <tenant> <source> <table> <file>

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use syncgraph::{
    Connector, GraphDownstreamWriter, OpenStore, PooledProviderFactory, RawTableProvider, SchemaPool,
    SqliteStore, SyncConfig, SyncOrchestrator, SyncStateStore, TenantName, TenantSyncSettings,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "syncgraph", version, about = "Cross-source CRM sync into a tenant graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More logging (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync passes until interrupted
    Run {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Manage which (tenant, source) pairs are synced
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },
    /// Show recent sync runs
    Runs {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Load newline-delimited JSON records into a raw table
    Import {
        tenant: String,
        source: String,
        /// Raw table suffix, e.g. "contacts"
        table: String,
        file: PathBuf,
        #[arg(long, default_value = "")]
        instance: String,
    },
    /// List records that reached the attempt ceiling
    Exhausted {
        tenant: String,
        source: String,
        #[arg(long, default_value = "")]
        instance: String,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum TenantAction {
    /// Enable syncing of a source for a tenant
    Enable {
        tenant: String,
        source: String,
        #[arg(long, default_value = "")]
        instance: String,
    },
    /// Stop syncing a source for a tenant
    Disable {
        tenant: String,
        source: String,
        #[arg(long, default_value = "")]
        instance: String,
    },
    /// List configured pairs
    List,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &SyncConfig) -> Result<Arc<SqliteStore>, String> {
    let store = SqliteStore::open(&config.graph_db).map_err(|e| format!("Failed to open graph database: {}", e))?;
    Ok(Arc::new(store))
}

fn parse_tenant(name: &str) -> Result<TenantName, String> {
    TenantName::parse(name).map_err(|e| e.to_string())
}

fn parse_connector(source: &str) -> Result<Connector, String> {
    source.parse::<Connector>()
}

fn cmd_run(config: &SyncConfig, once: bool) -> i32 {
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let pool = Arc::new(SchemaPool::new(&config.raw_dir, config.pool_ttl()));
    let providers = Arc::new(PooledProviderFactory::new(Arc::clone(&pool), config.max_attempts));
    let writer = Arc::new(GraphDownstreamWriter::new(store.clone()));
    let orchestrator = SyncOrchestrator::new(store.clone(), store, providers, writer)
        .with_batch_size(config.batch_size)
        .with_pass_interval(config.pass_interval())
        .with_visibility_retry(config.visibility_retry.clone());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {}", e);
            return 1;
        }
    };
    let code = runtime.block_on(async {
        if once {
            match orchestrator.run_pass().await {
                Ok(runs) => {
                    for run in &runs {
                        let totals = run.totals();
                        println!(
                            "{} {}: {} completed, {} failed, {} skipped",
                            run.tenant, run.source, totals.completed, totals.failed, totals.skipped
                        );
                    }
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        } else {
            orchestrator
                .run_forever(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
            0
        }
    });
    pool.close_all();
    code
}

fn cmd_tenant_set(config: &SyncConfig, tenant: &str, source: &str, instance: &str, enabled: bool) -> i32 {
    if let Err(e) = parse_tenant(tenant).and_then(|_| parse_connector(source)) {
        eprintln!("Error: {}", e);
        return 1;
    }
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut settings = TenantSyncSettings::new(tenant, source).with_instance(instance);
    settings.enabled = enabled;
    match store.save_settings(&settings) {
        Ok(()) => {
            let state = if enabled { "Enabled" } else { "Disabled" };
            println!("{} {} for tenant '{}'", state, source, tenant);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_tenant_list(config: &SyncConfig) -> i32 {
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let settings = match store.list_settings(false) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if settings.is_empty() {
        println!("No tenants configured.");
        return 0;
    }
    println!("{:<24}  {:<16}  {:<12}  {:>7}", "TENANT", "SOURCE", "INSTANCE", "ENABLED");
    println!("{}", "-".repeat(65));
    for s in settings {
        println!("{:<24}  {:<16}  {:<12}  {:>7}", s.tenant, s.source, s.instance, s.enabled);
    }
    0
}

fn cmd_runs(config: &SyncConfig, tenant: Option<&str>, limit: usize) -> i32 {
    let tenant = match tenant.map(parse_tenant).transpose() {
        Ok(tenant) => tenant,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match store.list_runs(tenant.as_ref(), limit) {
        Ok(runs) if runs.is_empty() => {
            println!("No sync runs recorded.");
            0
        }
        Ok(runs) => {
            println!(
                "{:<36}  {:<16}  {:<16}  {:<25}  {:>9}  {:>6}  {:>7}",
                "RUN", "TENANT", "SOURCE", "STARTED", "COMPLETED", "FAILED", "SKIPPED"
            );
            for run in runs {
                let totals = run.totals();
                println!(
                    "{:<36}  {:<16}  {:<16}  {:<25}  {:>9}  {:>6}  {:>7}",
                    run.run_id,
                    run.tenant,
                    run.source,
                    run.started_at.to_rfc3339(),
                    totals.completed,
                    totals.failed,
                    totals.skipped
                );
                if !run.aborted_stages.is_empty() {
                    let aborted: Vec<String> = run.aborted_stages.iter().map(|e| e.to_string()).collect();
                    println!("  aborted: {}", aborted.join(", "));
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_import(config: &SyncConfig, tenant: &str, source: &str, instance: &str, table: &str, file: &Path) -> i32 {
    let (tenant, connector) = match parse_tenant(tenant).and_then(|t| parse_connector(source).map(|c| (t, c))) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let reader = match std::fs::File::open(file) {
        Ok(f) => std::io::BufReader::new(f),
        Err(e) => {
            eprintln!("Error: cannot open '{}': {}", file.display(), e);
            return 1;
        }
    };
    let pool = SchemaPool::new(&config.raw_dir, config.pool_ttl());
    let schema = SchemaPool::schema_name(connector.source_id(), instance, tenant.as_str());
    let raw = match pool.get(&schema) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut imported = 0;
    for (n, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => line,
            Err(e) => {
                eprintln!("Error: read failed at line {}: {}", n + 1, e);
                return 1;
            }
        };
        let data: serde_json::Value = match serde_json::from_str(&line) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Error: line {} is not valid JSON: {}", n + 1, e);
                return 1;
            }
        };
        let record_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = raw.insert_raw(table, &record_id, &data, chrono::Utc::now()) {
            eprintln!("Error: {}", e);
            return 1;
        }
        imported += 1;
    }
    pool.close_all();
    println!("Imported {} records into {}.{}", imported, schema, table);
    0
}

fn cmd_exhausted(config: &SyncConfig, tenant: &str, source: &str, instance: &str) -> i32 {
    let (tenant, connector) = match parse_tenant(tenant).and_then(|t| parse_connector(source).map(|c| (t, c))) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let pool = Arc::new(SchemaPool::new(&config.raw_dir, config.pool_ttl()));
    let provider =
        RawTableProvider::new(connector, tenant, instance, Arc::clone(&pool)).with_max_attempts(config.max_attempts);
    let entries = match provider.exhausted_records() {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    pool.close_all();
    if entries.is_empty() {
        println!("No exhausted records.");
        return 0;
    }
    println!("{:<16}  {:<16}  {:<36}  {:>7}  REASON", "ENTITY", "TABLE", "RECORD", "ATTEMPT");
    for entry in entries {
        println!(
            "{:<16}  {:<16}  {:<36}  {:>7}  {}",
            entry.entity, entry.table_suffix, entry.record_id, entry.attempt, entry.reason
        );
    }
    0
}

fn cmd_config(config: &SyncConfig) -> i32 {
    match config.to_yaml() {
        Ok(yaml) => {
            print!("{}", yaml);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = match SyncConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Run { once } => cmd_run(&config, once),
        Commands::Tenant { action } => match action {
            TenantAction::Enable { tenant, source, instance } => {
                cmd_tenant_set(&config, &tenant, &source, &instance, true)
            }
            TenantAction::Disable { tenant, source, instance } => {
                cmd_tenant_set(&config, &tenant, &source, &instance, false)
            }
            TenantAction::List => cmd_tenant_list(&config),
        },
        Commands::Runs { tenant, limit } => cmd_runs(&config, tenant.as_deref(), limit),
        Commands::Import {
            tenant,
            source,
            table,
            file,
            instance,
        } => cmd_import(&config, &tenant, &source, &instance, &table, &file),
        Commands::Exhausted { tenant, source, instance } => cmd_exhausted(&config, &tenant, &source, &instance),
        Commands::Config => cmd_config(&config),
    };
    std::process::exit(code);
}
