//! Schema-driven table creation.

use super::{quote_ident, DbResult};
use crate::schema::{ColumnKind, EntitySchema, IdentifierKind};
use log::debug;
use rusqlite::{Connection, OptionalExtension};

/// Creates the entity table if it does not exist yet.
///
/// The identifier becomes the primary key; auto-increment identifiers use
/// SQLite `INTEGER PRIMARY KEY AUTOINCREMENT`.
pub fn ensure_entity_table(conn: &mut Connection, schema: &EntitySchema) -> DbResult<()> {
    let identifier = match schema.identifier.kind {
        IdentifierKind::AutoIncrement => "INTEGER PRIMARY KEY AUTOINCREMENT",
        IdentifierKind::Uuid | IdentifierKind::External => "TEXT PRIMARY KEY NOT NULL",
    };
    let mut definitions = vec![format!(
        "{} {identifier}",
        quote_ident(schema.identifier_column())
    )];
    definitions.extend(
        schema
            .native_columns()
            .map(|column| format!("{} {}", quote_ident(&column.name), sql_type(column.kind))),
    );
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote_ident(&schema.table),
        definitions.join(", ")
    );

    let tx = conn.transaction()?;
    tx.execute_batch(&sql)?;
    tx.commit()?;
    debug!(
        "event=table_ensure module=db status=ok entity={} table={}",
        schema.name, schema.table
    );
    Ok(())
}

/// Returns whether a table with this name exists.
pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1;",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer | ColumnKind::Boolean => "INTEGER",
        ColumnKind::Real => "REAL",
        ColumnKind::Text => "TEXT",
    }
}
