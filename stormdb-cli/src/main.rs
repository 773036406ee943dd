use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use stormdb::{Config, ConfigStore, Model, Store};

/// StormDB CLI: inspect and edit a StormDB data directory from the command line
#[derive(Parser)]
#[command(name = "stormdb", version, about)]
struct Cli {
    /// Path to the data directory (default: ./data, or the options file value)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// YAML or JSON options file (same keys as setConfig)
    #[arg(long)]
    config: Option<PathBuf>,

    /// YAML or JSON schema applied to the collection for writes
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Log persistence and backup progress
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Get a single document by ID
    Get {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Find documents matching a query
    Find {
        /// Collection name
        collection: String,
        /// Query as JSON (e.g. '{"age":{"$gte":18}}')
        #[arg(long, default_value = "{}")]
        query: String,
        /// Return only the first match
        #[arg(long)]
        one: bool,
    },

    /// Count documents matching a query
    Count {
        /// Collection name
        collection: String,
        /// Query as JSON
        #[arg(long, default_value = "{}")]
        query: String,
    },

    /// Insert a new document
    Insert {
        /// Collection name
        collection: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Whole document (or array of documents) as JSON
        #[arg(long, conflicts_with = "fields")]
        json: Option<String>,
    },

    /// Update an existing document
    Update {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
        /// Field values to update (e.g. --field status=published)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Field paths to remove
        #[arg(long = "unset")]
        unset: Vec<String>,
    },

    /// Delete documents by ID or query
    Delete {
        /// Collection name
        collection: String,
        /// Document ID
        #[arg(required_unless_present = "query")]
        id: Option<String>,
        /// Delete every document matching this JSON query instead
        #[arg(long, conflicts_with = "id")]
        query: Option<String>,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a backup archive now
    Backup,

    /// Show collections, document counts and write statistics
    Stats,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let options = ConfigStore::default();
    if let Some(path) = &cli.config {
        options.load_file(path)?;
    }
    let mut config = options.get_config();
    if let Some(dir) = &cli.data_dir {
        config.data_directory = dir.clone();
    }
    config.verbose |= cli.verbose;
    Ok(config)
}

fn model(store: &Store, cli_schema: Option<&PathBuf>, collection: &str) -> stormdb::Result<Model> {
    let schema = cli_schema.map(|path| stormdb::schema::parse_schema(path)).transpose()?;
    store.model(collection, schema)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    let store = Store::open(config)?;
    let schema = cli.schema.as_ref();

    match &cli.command {
        Command::Get { collection, id } => {
            let doc = model(&store, schema, collection)?.find_by_id(id)?;
            let doc = doc.ok_or_else(|| format!("Document '{id}' not found in {collection}"))?;
            print_output(&doc, &cli.format)?;
        }

        Command::Find {
            collection,
            query,
            one,
        } => {
            let query = parse_json("query", query)?;
            let target = model(&store, schema, collection)?;
            let result = if *one {
                target.find_one(query)?.unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Array(target.find(query)?)
            };
            print_output(&result, &cli.format)?;
        }

        Command::Count { collection, query } => {
            let count = model(&store, schema, collection)?.count(parse_json("query", query)?)?;
            print_output(&serde_json::json!({ "count": count }), &cli.format)?;
        }

        Command::Insert {
            collection,
            fields,
            json,
        } => {
            let target = model(&store, schema, collection)?;
            let result = match json {
                Some(raw) => match parse_json("json", raw)? {
                    items @ serde_json::Value::Array(_) => {
                        serde_json::Value::Array(target.insert_many(items)?)
                    }
                    item => target.insert_one(item)?.unwrap_or(serde_json::Value::Null),
                },
                None => target
                    .insert_one(fields_to_value(fields))?
                    .unwrap_or(serde_json::Value::Null),
            };
            print_output(&result, &cli.format)?;
        }

        Command::Update {
            collection,
            id,
            fields,
            unset,
        } => {
            let mut updates = fields_to_value(fields);
            if !unset.is_empty() {
                let paths: serde_json::Map<String, serde_json::Value> = unset
                    .iter()
                    .map(|path| (path.clone(), serde_json::Value::Bool(true)))
                    .collect();
                updates["$unset"] = serde_json::Value::Object(paths);
            }
            let doc = model(&store, schema, collection)?
                .find_by_id_and_update(id, updates)?
                .ok_or_else(|| format!("Document '{id}' not found in {collection}"))?;
            print_output(&doc, &cli.format)?;
        }

        Command::Delete {
            collection,
            id,
            query,
            dry_run,
        } => {
            let target = model(&store, schema, collection)?;
            let query = match (id, query) {
                (Some(id), _) => serde_json::json!({ "_id": id }),
                (None, Some(raw)) => parse_json("query", raw)?,
                (None, None) => return Err("Either an id or --query is required".into()),
            };
            if *dry_run {
                let docs = target.find(query)?;
                print_output(
                    &serde_json::json!({ "dry_run": true, "would_delete": docs }),
                    &cli.format,
                )?;
            } else {
                let deleted = target.delete_many(query)?;
                print_output(
                    &serde_json::json!({ "ok": true, "deleted": deleted.len() }),
                    &cli.format,
                )?;
            }
        }

        Command::Backup => {
            store.backup_now()?;
            print_output(&serde_json::json!({ "ok": true }), &cli.format)?;
        }

        Command::Stats => {
            let counts: serde_json::Map<String, serde_json::Value> = store
                .snapshot()
                .into_iter()
                .map(|(name, docs)| (name, serde_json::json!(docs.len())))
                .collect();
            print_output(
                &serde_json::json!({
                    "data_directory": store.config().data_directory,
                    "collections": counts,
                    "writes": store.stats(),
                }),
                &cli.format,
            )?;
        }
    }

    store.close();
    Ok(())
}

fn parse_json(name: &str, raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid JSON in {name}: {e}"))
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_value(fields: &[(String, String)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        // Numbers, booleans, arrays and objects parse as JSON; anything else is a string
        let json_val =
            serde_json::from_str(val).unwrap_or_else(|_| serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    serde_json::Value::Object(map)
}
