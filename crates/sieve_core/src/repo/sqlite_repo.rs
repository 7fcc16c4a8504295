//! SQLite-backed repository.
//!
//! # Responsibility
//! - Translate negotiated filters, orderings and ranges into SQL.
//! - Map column values to and from SQLite storage classes.
//!
//! # Invariants
//! - Only native columns appear in generated SQL; computed columns are left
//!   to the in-memory interpreter.
//! - Every leaf renders as `COALESCE(expr, 0)` so NULL behaves like false,
//!   matching in-memory evaluation.
//! - Every ORDER BY ends with the identifier so ties order the same way as
//!   the in-memory fallback.

use crate::config::{NegotiationPolicy, RepositoryKind};
use crate::db::{ensure_entity_table, quote_ident};
use crate::error::{StoreError, StoreResult};
use crate::model::record::Record;
use crate::model::value::{FieldValues, RecordId, Value};
use crate::query::capability::Capabilities;
use crate::query::filter::{BooleanOp, FilterNode, Operator};
use crate::repo::negotiate::negotiate;
use crate::repo::{FetchOutcome, FetchRequest, PersistOutcome, Repository};
use crate::schema::{EntitySchema, IdentifierKind, SchemaRegistry};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::cell::RefCell;
use std::time::Instant;

/// Repository over one owned SQLite connection.
pub struct SqliteRepository {
    conn: Connection,
    policy: NegotiationPolicy,
    last_statement: RefCell<Option<String>>,
}

impl SqliteRepository {
    /// Wraps a connection and creates tables for every registered entity.
    pub fn try_new(mut conn: Connection, schemas: &SchemaRegistry) -> StoreResult<Self> {
        for schema in schemas.iter() {
            ensure_entity_table(&mut conn, schema)?;
        }
        Ok(Self {
            conn,
            policy: NegotiationPolicy::default(),
            last_statement: RefCell::new(None),
        })
    }

    pub fn with_policy(mut self, policy: NegotiationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Text of the last statement executed, with placeholders.
    pub fn last_statement(&self) -> Option<String> {
        self.last_statement.borrow().clone()
    }

    fn record_statement(&self, entity: &str, operation: &str, sql: &str) {
        debug!("event=repo_sql module=repo entity={entity} op={operation} sql={sql}");
        *self.last_statement.borrow_mut() = Some(sql.to_string());
    }
}

impl Repository for SqliteRepository {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Sqlite
    }

    fn read_capabilities(&self, schema: &EntitySchema) -> Capabilities {
        Capabilities::all_native(schema)
    }

    fn mutation_capabilities(&self, schema: &EntitySchema) -> Capabilities {
        Capabilities::all_native(schema)
    }

    fn fetch_identifiers(
        &self,
        schema: &EntitySchema,
        request: &FetchRequest<'_>,
    ) -> StoreResult<FetchOutcome> {
        let started_at = Instant::now();
        let plan = negotiate(request, &self.read_capabilities(schema), self.policy);
        let identifier = quote_ident(schema.identifier_column());

        let mut query = SqlQuery::default();
        query.push(&format!(
            "SELECT {identifier} FROM {}",
            quote_ident(&schema.table)
        ));
        if let Some(filter) = &plan.native_filter {
            query.push(" WHERE ");
            query.push_filter(filter);
        }

        let mut order_by = Vec::new();
        if plan.sort_native() {
            for key in request.sort.keys() {
                let direction = if key.ascending { "ASC" } else { "DESC" };
                order_by.push(format!("{} {direction}", quote_ident(&key.column)));
            }
        }
        let last_key_is_identifier = plan.sort_native()
            && request
                .sort
                .keys()
                .last()
                .is_some_and(|key| key.column == schema.identifier_column());
        if !last_key_is_identifier {
            order_by.push(format!("{identifier} ASC"));
        }
        query.push(&format!(" ORDER BY {}", order_by.join(", ")));

        if let (Some(range), true) = (request.range, plan.range_native()) {
            query.push(" LIMIT ? OFFSET ?");
            query.bind(SqlValue::Integer(to_i64(range.count)));
            query.bind(SqlValue::Integer(to_i64(range.offset)));
        }

        self.record_statement(&schema.name, "fetch", &query.sql);
        let mut stmt = self.conn.prepare(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(query.binds))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(parse_identifier(row.get(0)?)?);
        }

        debug!(
            "event=repo_fetch module=repo status=ok entity={} filter_native={} sort_native={} range_native={} rows={} duration_ms={}",
            schema.name,
            plan.applied.filter,
            plan.applied.sort,
            plan.applied.range,
            ids.len(),
            started_at.elapsed().as_millis()
        );
        Ok(FetchOutcome {
            ids,
            applied: plan.applied,
        })
    }

    fn hydrate(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<FieldValues> {
        let columns: Vec<_> = schema.native_columns().collect();
        let select_list = if columns.is_empty() {
            quote_ident(schema.identifier_column())
        } else {
            columns
                .iter()
                .map(|column| quote_ident(&column.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let sql = format!(
            "SELECT {select_list} FROM {} WHERE {} = ?1",
            quote_ident(&schema.table),
            quote_ident(schema.identifier_column())
        );
        self.record_statement(&schema.name, "hydrate", &sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([identifier_to_sql(id)])?;
        let Some(row) = rows.next()? else {
            return Err(StoreError::not_found(&schema.name, id));
        };

        let mut values = FieldValues::new();
        for (index, column) in columns.iter().enumerate() {
            let stored: SqlValue = row.get(index)?;
            values.insert(column.name.clone(), column.kind.coerce(from_sql(stored)?));
        }
        Ok(values)
    }

    fn persist(&self, schema: &EntitySchema, record: &Record) -> StoreResult<PersistOutcome> {
        let table = quote_ident(&schema.table);
        let identifier = quote_ident(schema.identifier_column());

        if !record.is_new() {
            let id = existing_identifier(schema, record)?;
            let changed = record.changed_native_values();
            if changed.is_empty() {
                return Ok(PersistOutcome { id, written: false });
            }
            let assignments = changed
                .keys()
                .map(|column| format!("{} = ?", quote_ident(column)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE {table} SET {assignments} WHERE {identifier} = ?");
            let mut binds: Vec<SqlValue> = changed.values().map(to_sql).collect();
            binds.push(identifier_to_sql(&id));

            self.record_statement(&schema.name, "update", &sql);
            let updated = self.conn.execute(&sql, params_from_iter(binds))?;
            if updated == 0 {
                return Err(StoreError::not_found(&schema.name, &id));
            }
            return Ok(PersistOutcome { id, written: true });
        }

        let values = record.native_values();
        let mut columns: Vec<String> = values.keys().map(|column| quote_ident(column)).collect();
        let mut binds: Vec<SqlValue> = values.values().map(to_sql).collect();

        // Auto-increment tables accept an explicit identifier on import.
        let assigned = match schema.identifier.kind {
            IdentifierKind::AutoIncrement => record.id().cloned(),
            IdentifierKind::Uuid | IdentifierKind::External => {
                Some(existing_identifier(schema, record)?)
            }
        };
        if let Some(id) = &assigned {
            columns.insert(0, identifier.clone());
            binds.insert(0, identifier_to_sql(id));
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut sql = format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                columns.join(", ")
            );
            if assigned.is_some() && columns.len() > 1 {
                let updates = columns[1..]
                    .iter()
                    .map(|column| format!("{column} = excluded.{column}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" ON CONFLICT({identifier}) DO UPDATE SET {updates}"));
            } else if assigned.is_some() {
                sql.push_str(&format!(" ON CONFLICT({identifier}) DO NOTHING"));
            }
            sql
        };

        self.record_statement(&schema.name, "insert", &sql);
        self.conn.execute(&sql, params_from_iter(binds))?;
        let id = match assigned {
            Some(id) => id,
            None => RecordId::Int(self.conn.last_insert_rowid()),
        };
        Ok(PersistOutcome { id, written: true })
    }

    fn delete(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&schema.table),
            quote_ident(schema.identifier_column())
        );
        self.record_statement(&schema.name, "delete", &sql);
        let removed = self.conn.execute(&sql, [identifier_to_sql(id)])?;
        if removed == 0 {
            return Err(StoreError::not_found(&schema.name, id));
        }
        Ok(())
    }

    fn batch_apply(
        &self,
        schema: &EntitySchema,
        filter: &FilterNode,
        values: &FieldValues,
    ) -> StoreResult<usize> {
        if !filter.natively_supported_by(&self.mutation_capabilities(schema)) {
            return Err(StoreError::BatchUpdateNotPossible {
                entity: schema.name.clone(),
                reason: "filter is not natively supported by the store".to_string(),
            });
        }
        if let Some(column) = schema.unwritable_column(values) {
            return Err(StoreError::BatchUpdateNotPossible {
                entity: schema.name.clone(),
                reason: format!("column `{column}` is not a stored column"),
            });
        }
        if values.is_empty() {
            return Ok(0);
        }

        let mut query = SqlQuery::default();
        let mut assignments = Vec::new();
        for (column, value) in values {
            let value = match schema.column(column) {
                Some(definition) => definition.kind.coerce(value.clone()),
                None => value.clone(),
            };
            assignments.push(format!("{} = ?", quote_ident(column)));
            query.bind(to_sql(&value));
        }
        query.push(&format!(
            "UPDATE {} SET {}",
            quote_ident(&schema.table),
            assignments.join(", ")
        ));
        if !filter.is_always_true() {
            query.push(" WHERE ");
            query.push_filter(filter);
        }

        self.record_statement(&schema.name, "batch_update", &query.sql);
        let updated = self.conn.execute(&query.sql, params_from_iter(query.binds))?;
        Ok(updated)
    }
}

/// SQL text with positional bind values, built left to right.
#[derive(Debug, Default)]
struct SqlQuery {
    sql: String,
    binds: Vec<SqlValue>,
}

impl SqlQuery {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn bind(&mut self, value: SqlValue) {
        self.binds.push(value);
    }

    fn push_filter(&mut self, node: &FilterNode) {
        match node {
            FilterNode::Group { op, children } if children.is_empty() => {
                self.push(match op {
                    BooleanOp::And => "1",
                    BooleanOp::Or => "0",
                });
            }
            FilterNode::Group { op, children } => {
                let joiner = match op {
                    BooleanOp::And => " AND ",
                    BooleanOp::Or => " OR ",
                };
                self.push("(");
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        self.push(joiner);
                    }
                    self.push_filter(child);
                }
                self.push(")");
            }
            FilterNode::Leaf(predicate) => {
                if predicate.negated {
                    self.push("NOT ");
                }
                self.push("COALESCE((");
                self.push_operator(&quote_ident(&predicate.column), &predicate.operator);
                self.push("), 0)");
            }
        }
    }

    fn push_operator(&mut self, column: &str, operator: &Operator) {
        match operator {
            Operator::Equals(Value::Null) => self.push(&format!("{column} IS NULL")),
            Operator::Equals(value) => {
                self.push(&format!("{column} = ?"));
                self.bind(to_sql(value));
            }
            Operator::GreaterThan { value, inclusive } => {
                let symbol = if *inclusive { ">=" } else { ">" };
                self.push(&format!("{column} {symbol} ?"));
                self.bind(to_sql(value));
            }
            Operator::LessThan { value, inclusive } => {
                let symbol = if *inclusive { "<=" } else { "<" };
                self.push(&format!("{column} {symbol} ?"));
                self.bind(to_sql(value));
            }
            Operator::Contains {
                needle,
                case_sensitive: true,
            } => {
                self.push(&format!("instr(CAST({column} AS TEXT), ?) > 0"));
                self.bind(SqlValue::Text(needle.clone()));
            }
            Operator::Contains {
                needle,
                case_sensitive: false,
            } => {
                self.push(&format!("instr(lower(CAST({column} AS TEXT)), lower(?)) > 0"));
                self.bind(SqlValue::Text(needle.clone()));
            }
            Operator::OneOf(candidates) if candidates.is_empty() => self.push("0"),
            Operator::OneOf(candidates) => {
                let placeholders = vec!["?"; candidates.len()].join(", ");
                self.push(&format!("{column} IN ({placeholders})"));
                for candidate in candidates {
                    self.bind(to_sql(candidate));
                }
            }
        }
    }
}

fn existing_identifier(schema: &EntitySchema, record: &Record) -> StoreResult<RecordId> {
    record.id().cloned().ok_or_else(|| {
        StoreError::InvalidData(format!(
            "{} record has no identifier in column `{}`",
            schema.name,
            schema.identifier_column()
        ))
    })
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Int(number) => SqlValue::Integer(*number),
        Value::Float(number) => SqlValue::Real(*number),
        Value::Text(text) => SqlValue::Text(text.clone()),
    }
}

fn from_sql(value: SqlValue) -> StoreResult<Value> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Integer(number) => Ok(Value::Int(number)),
        SqlValue::Real(number) => Ok(Value::Float(number)),
        SqlValue::Text(text) => Ok(Value::Text(text)),
        SqlValue::Blob(_) => Err(StoreError::InvalidData(
            "blob values are not supported".to_string(),
        )),
    }
}

fn identifier_to_sql(id: &RecordId) -> SqlValue {
    match id {
        RecordId::Int(number) => SqlValue::Integer(*number),
        RecordId::Text(text) => SqlValue::Text(text.clone()),
    }
}

fn parse_identifier(value: SqlValue) -> StoreResult<RecordId> {
    match value {
        SqlValue::Integer(number) => Ok(RecordId::Int(number)),
        SqlValue::Text(text) => Ok(RecordId::Text(text)),
        other => Err(StoreError::InvalidData(format!(
            "unsupported identifier value `{other:?}`"
        ))),
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
