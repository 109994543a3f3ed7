//! mvjournal CLI
//!
//! Command-line driver for a journaled demo table with the schema
//! `(id u64, name bytes, value i64)`. Every command opens the data
//! directory, replays the WAL, runs one transaction and exits.

use clap::{Parser, Subcommand};
use mvjournal::filter::{CmpOp, FilterNode};
use mvjournal::wal::WalRecovery;
use mvjournal::{Config, Engine, Field, FieldType, Row, Schema, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// mvjournal CLI
#[derive(Parser, Debug)]
#[command(name = "mvjournal-cli")]
#[command(about = "Drive a WAL-backed multi-version journal")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./mvjournal_data")]
    data_dir: String,

    /// Max rows per journal segment
    #[arg(short = 's', long, default_value = "1024")]
    segment_size: usize,

    /// Max journal segments before a merge is forced
    #[arg(short = 'n', long, default_value = "8")]
    max_segments: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a row, printing its assigned primary key
    Insert {
        name: String,
        value: i64,
    },

    /// Set the value column of a row
    Update {
        pk: u64,
        value: i64,
    },

    /// Delete rows by primary key
    Delete {
        pks: Vec<u64>,
    },

    /// Print rows, optionally only those with value >= min
    Query {
        #[arg(long)]
        min: Option<i64>,
    },

    /// Merge complete journal segments into the table
    Merge,

    /// Print engine counters
    Stats,

    /// Scan the WAL without modifying it
    Verify,
}

fn schema() -> mvjournal::Result<Schema> {
    Schema::new(
        "demo",
        vec![
            Field::new("id", FieldType::U64),
            Field::new("name", FieldType::Bytes),
            Field::new("value", FieldType::I64),
        ],
    )
}

fn print_row(row: &Row) {
    match row.as_slice() {
        [Value::U64(id), Value::Bytes(name), Value::I64(value)] => {
            println!("{:>8}  {:<24} {}", id, String::from_utf8_lossy(name), value)
        }
        other => println!("{:?}", other),
    }
}

fn run(args: Args) -> mvjournal::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .journal_max_size(args.segment_size)
        .journal_max_segments(args.max_segments)
        .build();

    if let Commands::Verify = args.command {
        let result = WalRecovery::verify(&config.data_dir.join("journal.wal"))?;
        println!("{:#?}", result);
        return Ok(());
    }

    let engine = Engine::open(config, schema()?)?;

    match args.command {
        Commands::Insert { name, value } => {
            let tx = engine.begin_write()?;
            let row = vec![Value::U64(0), Value::Bytes(name.into_bytes()), Value::I64(value)];
            let (pk, _) = engine.insert(&tx, &[row])?;
            engine.commit(&tx)?;
            println!("inserted pk {}", pk);
        }
        Commands::Update { pk, value } => {
            let tx = engine.begin_write()?;
            engine.update_fields(&tx, pk, &[(2, Value::I64(value))])?;
            engine.commit(&tx)?;
            println!("updated pk {}", pk);
        }
        Commands::Delete { pks } => {
            let tx = engine.begin_write()?;
            let n = engine.delete(&tx, &pks)?;
            engine.commit(&tx)?;
            println!("deleted {} rows", n);
        }
        Commands::Query { min } => {
            let tx = engine.begin_read();
            let node = match min {
                Some(min) => FilterNode::cmp(2, CmpOp::Ge, Value::I64(min)),
                None => FilterNode::All,
            };
            let rows = engine.query(&tx, &node)?;
            for row in &rows {
                print_row(row);
            }
            println!("({} rows)", rows.len());
        }
        Commands::Merge => {
            let n = engine.merge()?;
            println!("merged {} segments", n);
        }
        Commands::Stats => {
            println!("{:#?}", engine.stats());
        }
        Commands::Verify => {}
    }

    engine.sync()
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mvjournal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("mvjournal v{}", mvjournal::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
