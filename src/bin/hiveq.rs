//! Command-line front end: translates and runs JSON operator trees.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use hiveq::{
    config::HiveqConfig,
    connection::BeelineConnection,
    query::{
        errors::ErrorWithCode,
        mapping::MappingProvider,
        ops::QueryOp,
        record::value_to_json,
        translator, EntityProvider, Record, TransformScript, Translation, Value,
    },
    types::HiveError,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "hiveq",
    version,
    about = "Compile typed queries to HiveQL and run them",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "HIVEQ_PROFILE_NAME",
        help = "Connection profile to use"
    )]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for results"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct QueryArg {
    #[arg(long, value_name = "FILE", help = "JSON operator tree")]
    query: PathBuf,
}

#[derive(Args, Debug)]
struct TransformCmd {
    #[arg(long, value_name = "PATH", help = "Driver executable shipped to the cluster")]
    driver: String,

    #[arg(long, value_name = "PATH", help = "Program hosting the map method")]
    target: String,

    #[arg(long = "type", value_name = "NAME", help = "Type declaring the map method")]
    type_name: String,

    #[arg(long, value_name = "NAME", help = "Map method name")]
    method: String,

    #[arg(long, value_name = "TABLE", help = "Input table of key/value rows")]
    input: String,

    #[arg(long, default_value = "cat", help = "Reduce command")]
    reducer: String,

    #[arg(long, help = "Submit the command instead of printing it")]
    run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the HiveQL text of a query.
    Translate {
        #[command(flatten)]
        query: QueryArg,

        #[arg(long, help = "Print every rewrite stage as an explain tree")]
        explain: bool,
    },
    /// Run a query and print its rows.
    Run(QueryArg),
    /// Store a query result as a table.
    CreateTable {
        #[command(flatten)]
        query: QueryArg,

        #[arg(long, help = "Table name")]
        name: String,
    },
    /// Drop a table created with `create-table`.
    DropTable {
        #[arg(long, help = "Table name")]
        name: String,
    },
    /// List the configured entities.
    Entities,
    /// Render a streaming map/reduce command.
    Transform(TransformCmd),
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        match err.downcast_ref::<HiveError>() {
            Some(hive) => eprintln!("error: {}", ErrorWithCode(hive)),
            None => eprintln!("error: {err}"),
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = HiveqConfig::load(cli.config.clone())?;

    match &cli.command {
        Command::Translate { query, explain } => {
            let op = read_query(&query.query)?;
            let translation = translator::translate(&op, config.mapping())?;
            print_translation(cli.format, &translation, *explain)?;
        }
        Command::Run(query) => {
            let op = read_query(&query.query)?;
            let provider = provider(&config, cli.profile.as_deref())?;
            let translation = provider.translate(&op)?;
            let rows = match translation.projection()?.aggregator {
                Some(_) => provider.scalar::<Record>(&op)?.into_iter().collect(),
                None => provider.stream::<Record>(&translation)?.collect::<Result<Vec<_>, _>>()?,
            };
            print_rows(cli.format, &rows)?;
        }
        Command::CreateTable { query, name } => {
            let op = read_query(&query.query)?;
            let provider = provider(&config, cli.profile.as_deref())?;
            let table = provider.create_table(&op, name)?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(table.entity())?)
                }
                OutputFormat::Text => println!(
                    "created table {} ({} columns)",
                    table.name(),
                    table.entity().columns.len()
                ),
            }
        }
        Command::DropTable { name } => {
            let provider = provider(&config, cli.profile.as_deref())?;
            provider.drop_table_named(name)?;
            if cli.format == OutputFormat::Text {
                println!("dropped table {name}");
            }
        }
        Command::Entities => print_entities(cli.format, &config)?,
        Command::Transform(cmd) => {
            let script = TransformScript::new(
                &cmd.driver,
                &cmd.target,
                cmd.type_name.clone(),
                cmd.method.clone(),
                cmd.input.clone(),
            )
            .reducer(cmd.reducer.clone());
            let command = script.to_command()?;
            if cmd.run {
                let provider = provider(&config, cli.profile.as_deref())?;
                provider.lease()?.run(&command, &[])?;
            } else {
                println!("{}", command.text());
            }
        }
    }
    Ok(())
}

fn read_query(path: &Path) -> Result<QueryOp, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("failed to read query {}: {err}", path.display()))?;
    let op = QueryOp::from_json(&text)
        .map_err(|err| format!("failed to parse query {}: {err}", path.display()))?;
    Ok(op)
}

fn provider(config: &HiveqConfig, profile: Option<&str>) -> Result<EntityProvider, Box<dyn Error>> {
    let settings = config.connection(profile)?.clone();
    settings.validate()?;
    let connection = BeelineConnection::new(settings);
    Ok(EntityProvider::new(
        Box::new(connection),
        config.mapping().clone(),
    ))
}

fn print_translation(
    format: OutputFormat,
    translation: &Translation,
    explain: bool,
) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => {
            let mut doc = json!({
                "text": translation.command.text(),
                "parameters": translation
                    .values
                    .iter()
                    .map(|param| json!({
                        "name": param.name,
                        "type": param.wire.hive_name(),
                        "value": value_to_json(&param.value),
                    }))
                    .collect::<Vec<_>>(),
                "shape_hash": format!("{:016x}", translation.shape_hash),
            });
            if explain {
                doc["stages"] = translation
                    .explain_stages()
                    .into_iter()
                    .map(|(name, plan)| json!({ "pass": name, "plan": plan.to_json() }))
                    .collect();
            }
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            if explain {
                for (name, plan) in translation.explain_stages() {
                    println!("-- {name}");
                    println!("{plan}");
                }
                println!("-- hive");
            }
            println!("{}", translation.command.text());
            for param in &translation.values {
                println!(
                    "-- ${{hivevar:{}}} = {} ({})",
                    param.name,
                    plain(&param.value),
                    param.wire
                );
            }
        }
    }
    Ok(())
}

fn print_rows(format: OutputFormat, rows: &[Record]) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => {
            let doc: Vec<_> = rows.iter().map(Record::to_json).collect();
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            if let Some(first) = rows.first() {
                println!("{}", first.members().collect::<Vec<_>>().join("\t"));
            }
            for row in rows {
                let fields: Vec<_> = row.values().map(plain).collect();
                println!("{}", fields.join("\t"));
            }
            println!("({} rows)", rows.len());
        }
    }
    Ok(())
}

fn print_entities(format: OutputFormat, config: &HiveqConfig) -> Result<(), Box<dyn Error>> {
    let mapping = config.mapping();
    let mut entities = Vec::new();
    for name in mapping.entity_names() {
        entities.push(mapping.entity(&name)?);
    }
    match format {
        OutputFormat::Json => {
            let doc: Vec<_> = entities.iter().map(|entity| entity.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            for entity in &entities {
                let columns: Vec<_> = entity
                    .columns
                    .iter()
                    .map(|col| format!("{}:{}", col.member, col.wire))
                    .collect();
                println!("{} -> {} [{}]", entity.name, entity.table, columns.join(", "));
                for assoc in &entity.associations {
                    println!("  {} -> {}", assoc.member, assoc.target);
                }
            }
        }
    }
    Ok(())
}

fn plain(value: &Value) -> String {
    value
        .to_plain_text()
        .unwrap_or_else(|_| "<binary>".to_owned())
}
