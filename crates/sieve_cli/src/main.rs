//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise `sieve_core` end to end against either repository backend.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `sieve_cli [offline|sqlite]` (default `offline`).

use log::error;
use sieve_core::{
    default_log_level, init_logging, open_repository, ColumnDef, EntitySchema, IdentifierKind,
    LoggingConfig, RepositoryKind, SchemaRegistry, Session, StoreConfig, StoreError,
};
use std::process::ExitCode;

const SEED: [(&str, i64); 6] = [("A", 5), ("B", 3), ("B", 4), ("B", 2), ("C", 2), ("D", 1)];

fn main() -> ExitCode {
    let logging = LoggingConfig {
        level: std::env::var("SIEVE_LOG").unwrap_or_else(|_| default_log_level().to_string()),
        log_dir: None,
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("logging disabled: {err}");
    }

    let binding = std::env::args().nth(1).unwrap_or_else(|| "offline".to_string());
    match run(&binding) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error");
            eprintln!("sieve_cli: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(binding: &str) -> Result<(), StoreError> {
    let config = match RepositoryKind::parse(binding)? {
        RepositoryKind::Offline => StoreConfig::offline(),
        RepositoryKind::Sqlite => StoreConfig::sqlite(None),
    };

    let mut schemas = SchemaRegistry::new();
    schemas.register(
        EntitySchema::builder("Company", "tblCompany")
            .identifier("CompanyID", IdentifierKind::AutoIncrement)
            .column(ColumnDef::text("CompanyName").public())
            .column(ColumnDef::integer("Balance").with_default(0).public())
            .label(["CompanyName"])
            .build()?,
    )?;

    let repository = open_repository(&config, &schemas)?;
    let session = Session::new(repository, schemas);
    for (name, balance) in SEED {
        let record = session.create("Company")?;
        record.borrow_mut().set("CompanyName", name);
        record.borrow_mut().set("Balance", balance);
        session.save(&record)?;
    }

    let mut companies = session.collection("Company")?;
    companies.replace_sort([("CompanyName", false), ("Balance", true)]);
    println!("repository={}", config.repository.as_str());
    for record in companies.iter()? {
        let record = record?;
        let record = record.borrow();
        println!(
            "{} {} {}",
            record.get("CompanyID"),
            record.label(),
            record.get("Balance")
        );
    }
    if let Some(applied) = companies.negotiation() {
        println!(
            "filter_native={} sort_native={} range_native={}",
            applied.filter, applied.sort, applied.range
        );
    }
    Ok(())
}
