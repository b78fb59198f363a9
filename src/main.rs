use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use fluxdb::schema::AttributeSchema;
use fluxdb::types::{DataType, Value};
use fluxdb::{Database, TableSchema};

/// Single-process storage engine. No SQL front end: this binary wires up a
/// database directory from the command line and runs a short built-in
/// workload against the public table API, the way the original `main.rs`
/// built a `customers` table directly against the pager without a parser.
#[derive(Parser, Debug)]
#[command(name = "fluxdb", about = "Slotted-page storage engine")]
struct Args {
    /// Directory holding the heap (`db`) and catalog files.
    dir: PathBuf,

    /// Page size in bytes, used only when no catalog exists yet.
    page_size: u32,

    /// Buffer capacity, in pages.
    buffer_capacity_pages: usize,

    /// Enable the catalog's indexing flag (accepted, never consulted).
    indexing: bool,
}

fn main() -> fluxdb::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!(
        dir = %args.dir.display(),
        requested_page_size = args.page_size,
        buffer_capacity_pages = args.buffer_capacity_pages,
        requested_indexing = args.indexing,
        "starting fluxdb"
    );

    let mut db = Database::open(
        &args.dir,
        args.page_size,
        args.buffer_capacity_pages,
        args.indexing,
    )?;

    run_demo(&mut db)?;

    db.shutdown()
}

/// Stands in for the out-of-scope SQL front end: creates a `customers`
/// table, inserts a few rows, prints a full scan, widens the schema with
/// ALTER ADD, and scans again.
fn run_demo(db: &mut Database) -> fluxdb::Result<()> {
    if db.table_schema("customers").is_none() {
        let schema = TableSchema::new(
            "customers",
            vec![
                AttributeSchema::new("id", DataType::Integer, true, true, None),
                AttributeSchema::new("email", DataType::Varchar(64), false, true, None),
                AttributeSchema::new("first_name", DataType::Varchar(32), false, false, None),
                AttributeSchema::new("last_name", DataType::Varchar(32), false, false, None),
            ],
        );
        db.create_table(schema)?;
        info!("created customers table");
    }

    let rows = [
        (1, "ada@example.com", "Ada", "Lovelace"),
        (2, "alan@example.com", "Alan", "Turing"),
        (3, "grace@example.com", "Grace", "Hopper"),
    ];
    for (id, email, first, last) in rows {
        let inserted = db.insert(
            "customers",
            vec![
                Value::Int(id),
                Value::Str(email.to_string()),
                Value::Str(first.to_string()),
                Value::Str(last.to_string()),
            ],
        )?;
        if !inserted {
            info!(id, "row already present, skipped");
        }
    }

    if let Some(rows) = db.select_all("customers")? {
        for row in &rows {
            println!("{row:?}");
        }
    }

    if db
        .table_schema("customers")
        .is_some_and(|s| s.attribute_index("signup_year").is_none())
    {
        let mut widened = db.table_schema("customers").unwrap().clone();
        widened.attributes.push(AttributeSchema::new(
            "signup_year",
            DataType::Integer,
            false,
            true,
            Some(Value::Int(2024)),
        ));
        db.alter_table("customers", widened)?;
        info!("added signup_year column with default 2024");
    }

    if let Some(rows) = db.select_all("customers")? {
        println!("after ALTER:");
        for row in &rows {
            println!("{row:?}");
        }
    }

    Ok(())
}
