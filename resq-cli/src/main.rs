//! resq - inspect schema documents and compile queries from the command line.
//!
//! ```text
//! resq check schema.yaml
//! resq compile schema.yaml User 'f$status=active&order=name&fields=*,-password'
//! resq resolve schema.yaml User manager.address.city
//! ```
//!
//! Logging is controlled by `RESQ_LOG` (e.g. `RESQ_LOG=resq_core=debug`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use resq_core::{
    compiler::QueryCompiler,
    config::CompilerConfig,
    error::Error,
    params::QueryParams,
    path::PathStep,
    schema::{container::ContainerRole, declaration::SchemaDocument, Schema},
};

#[derive(Parser)]
#[command(name = "resq", version, about = "Schema and query language tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a schema document and list its containers
    Check {
        /// Schema document (.yaml, .yml or .json)
        schema: PathBuf,
    },
    /// Compile a query string against a resource type and print the specification as JSON
    Compile {
        schema: PathBuf,
        resource_type: String,
        /// Query string, e.g. `f$status=active&order=name:desc`
        query: String,
        /// Compiler configuration (.yaml or .json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the re-encoded query string instead of JSON
        #[arg(long)]
        encode: bool,
    },
    /// Resolve a property path and print its steps
    Resolve {
        schema: PathBuf,
        container: String,
        path: String,
    },
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::configuration_error(format!("Can't read {}: {}", path.display(), e))
    })
}

fn load_document(path: &Path) -> Result<SchemaDocument, Error> {
    let text = read(path)?;
    if is_json(path) {
        SchemaDocument::from_json(&text)
    } else {
        SchemaDocument::from_yaml(&text)
    }
}

fn load_config(path: Option<&Path>) -> Result<CompilerConfig, Error> {
    match path {
        Some(path) => {
            let text = read(path)?;
            if is_json(path) {
                CompilerConfig::from_json(&text)
            } else {
                CompilerConfig::from_yaml(&text)
            }
        }
        None => Ok(CompilerConfig::default()),
    }
}

fn check(path: &Path) -> Result<(), Error> {
    let document = load_document(path)?;
    let fingerprint = document.fingerprint()?;
    let schema = Schema::from_document(document)?;
    println!("{} containers, fingerprint {}", schema.len(), fingerprint);
    for container in schema.containers() {
        let role = match container.role() {
            ContainerRole::Resource { persistent: true } => "resource",
            ContainerRole::Resource { persistent: false } => "transient resource",
            ContainerRole::Object => "object",
        };
        let variant = container
            .variant_tag()
            .map(|tag| format!(" variant {}", tag))
            .unwrap_or_default();
        println!("{} ({}{})", container.name(), role, variant);
        for handler in container.handlers() {
            println!(
                "  {:<20} {:<12} {}",
                handler.name(),
                handler.kind().name(),
                handler.value_type()
            );
        }
    }
    Ok(())
}

fn compile(
    path: &Path,
    resource_type: &str,
    query: &str,
    config: Option<&Path>,
    encode: bool,
) -> Result<(), Error> {
    let schema = Schema::from_document(load_document(path)?)?;
    let config = load_config(config)?;
    let compiler = QueryCompiler::new(&schema, config.clone());
    let spec = compiler.compile(resource_type, &QueryParams::parse(query))?;
    if encode {
        println!("{}", spec.encode_params(&config)?.encode());
    } else {
        let json = serde_json::to_string_pretty(&spec)
            .map_err(|e| Error::general_error(format!("Can't serialize the specification: {}", e)))?;
        println!("{}", json);
    }
    Ok(())
}

fn resolve(path: &Path, container: &str, property_path: &str) -> Result<(), Error> {
    let schema = Schema::from_document(load_document(path)?)?;
    let resolved = schema.resolve(container, property_path)?;
    for step in resolved.steps() {
        let owner = schema.container(step.container()).name();
        match step {
            PathStep::Property { handler, .. } => println!(
                "{}.{:<20} {:<12} {}",
                owner,
                handler.name(),
                handler.kind().name(),
                handler.value_type()
            ),
            PathStep::Variant { tag, .. } => println!("{}[{}]", owner, tag),
        }
    }
    match resolved.persistence_path() {
        Ok(persisted) => println!("persisted as {}", persisted),
        Err(e) => {
            debug!("No persistence path: {}", e);
            println!("not persisted");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("RESQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Check { schema } => check(schema),
        Command::Compile {
            schema,
            resource_type,
            query,
            config,
            encode,
        } => compile(schema, resource_type, query, config.as_deref(), *encode),
        Command::Resolve {
            schema,
            container,
            path,
        } => resolve(schema, container, path),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
