use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use schemabind::catalog::{connect_pool, CatalogReader, PostgresCatalog, StaticCatalog};
use schemabind::{
    bind_queries, introspect, BindOptions, Config, Engine, Introspection, Snapshot,
    TracingObserver,
};

/// Normalize a database schema and bind SQL queries into a typed model
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Read the catalog from a JSON dump instead of a live database
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long, short)]
    port: Option<u16>,

    #[arg(long, short)]
    database: Option<String>,

    #[arg(long = "username", short = 'U')]
    username: Option<String>,

    /// Schema to introspect, overriding the config file
    #[arg(long)]
    schema: Option<String>,

    /// Write the snapshot to this file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Pretty-print the snapshot JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the snapshot
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let (mut config, base_dir) = load_config(cli.config.as_deref())?;
    if let Some(schema) = &cli.schema {
        config.schema.name = schema.clone();
    }

    let reader = build_reader(&cli, &config)?;

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let Introspection { graph, diagnostics } =
        introspect(reader.as_ref(), &config.schema, &token, &TracingObserver)
            .await
            .context("Schema introspection failed")?;

    let mut queries = Vec::with_capacity(config.queries.len());
    for query in &config.queries {
        let text = query
            .load_text(&base_dir)
            .with_context(|| format!("Failed to load query {:?}", query.name))?;
        queries.push((query.clone(), text));
    }

    let graph = Arc::new(graph);
    let options = BindOptions {
        engine: config.engine,
        allow_nulls: config.schema.allow_nulls,
        type_override: None,
    };
    let report = bind_queries(Arc::clone(&graph), queries, options, &token, &TracingObserver)
        .await
        .context("Query binding failed")?;

    for failure in &report.failures {
        eprintln!("Error: query {:?}: {}", failure.name, failure.error);
    }

    let graph = Arc::try_unwrap(graph).unwrap_or_else(|shared| (*shared).clone());
    let snapshot = Snapshot::new(config.engine, Introspection { graph, diagnostics }, report);
    let json = if cli.pretty {
        snapshot.to_json_pretty()
    } else {
        snapshot.to_json()
    };

    match &cli.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}

/// Load the config file and the directory query paths are relative to.
fn load_config(path: Option<&Path>) -> Result<(Config, PathBuf)> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = Config::default_path();
            if !default.exists() {
                return Ok((Config::default(), PathBuf::from(".")));
            }
            default
        }
    };
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base_dir))
}

fn build_reader(cli: &Cli, config: &Config) -> Result<Box<dyn CatalogReader>> {
    if let Some(path) = &cli.catalog {
        let reader = StaticCatalog::load(config.engine, path)?;
        return Ok(Box::new(reader));
    }

    if config.engine != Engine::Postgres {
        bail!(
            "live introspection is only available for postgres; pass --catalog with a {} catalog dump",
            config.engine.label()
        );
    }

    let mut connection = config.connection.clone().unwrap_or_default();
    if let Some(host) = &cli.host {
        connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        connection.port = port;
    }
    if let Some(database) = &cli.database {
        connection.database = database.clone();
    }
    if let Some(username) = &cli.username {
        connection.username = username.clone();
    }

    // Resolve password: PGPASSWORD env var, then interactive prompt
    if connection.password.is_empty() {
        if let Ok(pw) = std::env::var("PGPASSWORD") {
            connection.password = pw;
        } else {
            let prompt = format!("Password for {}: ", connection.display_string());
            connection.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    let pool = connect_pool(&connection)?;
    Ok(Box::new(
        PostgresCatalog::new(pool).with_observer(Arc::new(TracingObserver)),
    ))
}
