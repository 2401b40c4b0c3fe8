use std::collections::BTreeMap;
use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use azul_metadata::app::{App, DocumentStore, MemoryStore};
use azul_metadata::config::{ConfigLoader, EntityTypeRequest, ResolvedConfig};
use azul_metadata::domain::EntityType;
use azul_metadata::error::AzulError;
use azul_metadata::metadata::source::BundleSource;
use azul_metadata::output::JsonOutput;
use azul_metadata::transform::Contribution;
use azul_metadata::transform::shape::field_types;

#[derive(Parser)]
#[command(name = "azul-index")]
#[command(about = "Transform HCA metadata bundles into index contributions and aggregate them")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Transform a bundle directory into contributions")]
    Transform(TransformArgs),
    #[command(about = "Aggregate contributions read from JSON files")]
    Aggregate(AggregateArgs),
    #[command(about = "Print the field types of contribution documents")]
    FieldTypes(FieldTypesArgs),
}

#[derive(Args)]
struct TransformArgs {
    bundle_dir: Utf8PathBuf,
    #[arg(long)]
    config: Option<String>,
    #[arg(long = "entity-type", value_enum)]
    entity_types: Vec<EntityType>,
    #[arg(long)]
    partition_bits: Option<u8>,
    #[arg(long, help = "Emit deletions for the bundle's contributions")]
    delete: bool,
}

#[derive(Args)]
struct AggregateArgs {
    #[arg(required = true)]
    contributions: Vec<Utf8PathBuf>,
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct FieldTypesArgs {
    #[arg(long = "entity-type", value_enum)]
    entity_types: Vec<EntityType>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(azul) = report.downcast_ref::<AzulError>() {
            return ExitCode::from(map_exit_code(azul));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AzulError) -> u8 {
    if error.is_malformed_input() { 2 } else { 1 }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Transform(args) => run_transform(args),
        Commands::Aggregate(args) => run_aggregate(args),
        Commands::FieldTypes(args) => run_field_types(args),
    }
}

fn load_config(path: Option<&str>) -> miette::Result<ResolvedConfig> {
    match ConfigLoader::resolve(path) {
        Ok(config) => Ok(config),
        Err(AzulError::MissingConfig) => Ok(ResolvedConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn run_transform(args: TransformArgs) -> miette::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if !args.entity_types.is_empty() {
        let partition_bits = args.partition_bits.unwrap_or(0);
        config.entity_types = args
            .entity_types
            .iter()
            .map(|entity_type| EntityTypeRequest {
                entity_type: *entity_type,
                partition_bits,
            })
            .collect();
    } else if let Some(partition_bits) = args.partition_bits {
        for request in &mut config.entity_types {
            request.partition_bits = partition_bits;
        }
    }

    let source = BundleSource::from_dir(&args.bundle_dir)?;
    let app = App::new(MemoryStore::new(), config);
    let result = if args.delete {
        app.delete(&source, &JsonOutput)?
    } else {
        app.transform(&source, &JsonOutput)?
    };
    JsonOutput::print_transform(&result).into_diagnostic()?;
    Ok(())
}

/// Accepts the output of `transform` or a bare list of contributions.
fn read_contributions(path: &Utf8PathBuf) -> Result<Vec<Contribution>, AzulError> {
    let content = fs::read_to_string(path)
        .map_err(|err| AzulError::Filesystem(format!("read {path}: {err}")))?;
    let value: Value =
        serde_json::from_str(&content).map_err(|err| AzulError::Json(format!("{path}: {err}")))?;
    let contributions = match value {
        Value::Object(mut result) => result.remove("contributions").unwrap_or(Value::Null),
        value => value,
    };
    serde_json::from_value(contributions).map_err(|err| AzulError::Json(format!("{path}: {err}")))
}

fn run_aggregate(args: AggregateArgs) -> miette::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let store = MemoryStore::new();
    for path in &args.contributions {
        for contribution in read_contributions(path)? {
            store.put_contribution(contribution)?;
        }
    }
    let app = App::new(store, config);
    let result = app.aggregate(None, &JsonOutput)?;
    JsonOutput::print_aggregate(&result).into_diagnostic()?;
    Ok(())
}

fn run_field_types(args: FieldTypesArgs) -> miette::Result<()> {
    let entity_types = if args.entity_types.is_empty() {
        EntityType::ALL.to_vec()
    } else {
        args.entity_types
    };
    let types = entity_types
        .into_iter()
        .map(|entity_type| (entity_type, field_types(entity_type)))
        .collect::<BTreeMap<_, _>>();
    JsonOutput::print_field_types(&types).into_diagnostic()?;
    Ok(())
}
