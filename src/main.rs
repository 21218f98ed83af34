use std::path::Path;
use std::process::ExitCode;

use schemaforge::core::config::Config;
use schemaforge::core::{
    Exporter, GraphError, Schema, SchemaGraph, SchemaId, SchemaStore, SqlEmitter, StoreError,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("usage: schemaforge <schema.json | stored-id> [sql|prompt]")]
    Usage,

    #[error("Failed to read schema: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Schema is inconsistent: {0}")]
    Invalid(#[from] GraphError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Sql,
    Prompt,
}

fn load_schema(config: &Config, source: &str) -> Result<Schema, CliError> {
    let path = Path::new(source);
    if !path.exists()
        && let Some(dir) = &config.store_dir
    {
        let store = schemaforge::core::FileStore::open(dir)?;
        return Ok(store.load(&SchemaId::from(source.to_string()))?);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

async fn run(config: &Config, args: &[String]) -> Result<String, CliError> {
    let (source, format) = match args {
        [source] => (source, Format::Sql),
        [source, format] => match format.as_str() {
            "sql" => (source, Format::Sql),
            "prompt" => (source, Format::Prompt),
            _ => return Err(CliError::Usage),
        },
        _ => return Err(CliError::Usage),
    };

    // Round-trip through the graph so invariant violations are reported
    let schema = SchemaGraph::from_schema(load_schema(config, source)?)?.snapshot();
    let exporter = Exporter::new(
        SqlEmitter::new(config.schema_name.clone()),
        config.generation_timeout(),
    );

    if format == Format::Prompt {
        return Ok(exporter.describe(&schema));
    }

    #[cfg(feature = "remote")]
    if config.has_generation() {
        match schemaforge::core::remote::HttpGenerator::from_config(config) {
            Ok(generator) => {
                let export = exporter.export_with(&generator, &schema).await;
                tracing::info!("Export source: {:?}", export.source);
                return Ok(export.sql);
            }
            Err(e) => tracing::warn!("Generation unavailable: {}", e),
        }
    }

    Ok(exporter.export(&schema))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Logs go to stderr, stdout carries the export
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: schema={}, generation={}, store={}",
        config.schema_name,
        config.has_generation(),
        config.has_store()
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&config, &args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
