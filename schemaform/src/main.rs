//! `schemaform`: evaluate a schema-driven form from the command line.
//!
//! Loads a schema (and optionally initial data), applies `--set` and `--add`
//! mutations in order, and prints the resulting form state as JSON.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use log::{LevelFilter, info};
use serde_json::{Map, Value, json};

use schemaform::{
    FormRuntime, MemoryTree, PathResolver, RuntimeConfig, SchemaNode, SchemaSource,
    config::load_data,
};

#[derive(Parser, Debug)]
#[command(version, about = "Evaluate the conditional state of a JSON Schema form")]
struct Cli {
    /// Schema file, or an http(s) URL with the `remote` feature.
    #[arg(short, long, required_unless_present = "print_config_schema")]
    schema: Option<String>,

    /// Initial form data (.json or .toml).
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Runtime configuration (.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Field update `field=value`; the value is parsed as JSON when possible.
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    updates: Vec<String>,

    /// Add an item to an array section.
    #[arg(long = "add", value_name = "ARRAY")]
    additions: Vec<String>,

    /// Include recent visibility history in the output.
    #[arg(long)]
    history: bool,

    /// Validate and try to submit after the mutations.
    #[arg(long)]
    submit: bool,

    /// Print the JSON Schema of the configuration file and exit.
    #[arg(long)]
    print_config_schema: bool,

    /// Log verbosely.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_update(update: &str) -> anyhow::Result<(String, Value)> {
    let Some((field, raw)) = update.split_once('=') else {
        bail!("expected FIELD=VALUE, got {update:?}");
    };
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.trim().to_string(), value))
}

async fn schema_tree(source: &SchemaSource) -> MemoryTree {
    let value = match source {
        SchemaSource::Path(path) => tokio::fs::read_to_string(path)
            .await
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok()),
        SchemaSource::Inline(value) => Some(value.clone()),
        SchemaSource::Url(_) => None,
    };
    value
        .and_then(|v| SchemaNode::from_value(&v).ok())
        .map(|node| MemoryTree::scaffold(&node))
        .unwrap_or_default()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .parse_default_env()
        .init();

    if cli.print_config_schema {
        println!("{}", serde_json::to_string_pretty(&RuntimeConfig::json_schema())?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let data = match &cli.data {
        Some(path) => load_data(path).with_context(|| format!("loading data {}", path.display()))?,
        None => json!({}),
    };
    let Some(schema) = cli.schema.as_deref() else {
        bail!("--schema is required");
    };
    let source = if schema.starts_with("http://") || schema.starts_with("https://") {
        SchemaSource::Url(schema.to_string())
    } else {
        SchemaSource::Path(PathBuf::from(schema))
    };

    let tree = schema_tree(&source).await;
    let mut form = FormRuntime::new(tree, data, config);
    form.load(source).await.context("initialising form")?;

    for update in &cli.updates {
        let (field, value) = parse_update(update)?;
        info!("set {field} = {value}");
        form.update_field(&field, value)?;
    }
    for array in &cli.additions {
        if form.add_array_item(array)?.is_none() {
            bail!("no array section {array:?}");
        }
    }

    let resolver = form.schema().map(PathResolver::build).unwrap_or_default();
    let mut fields = Map::new();
    for path in resolver.field_paths() {
        let mut state = json!({
            "visible": form.is_visible(path),
            "required": form.is_required(path),
        });
        if cli.history {
            state["history"] = serde_json::to_value(form.recent_history(path))?;
        }
        fields.insert(path.to_string(), state);
    }

    let mut output = json!({
        "formData": form.get_data(),
        "fields": fields,
        "submitEnabled": form.submit_enabled(),
    });
    if cli.submit {
        output["submitted"] = json!(form.submit());
        output["errors"] = serde_json::to_value(form.errors())?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
