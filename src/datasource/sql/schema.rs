//! Catalog queries used to describe a database.
//!
//! Every backend answers the same questions with the same column aliases so
//! that one assembler can build the table documents.

use serde_json::{Map, Value, json};

use super::SqlDriver;
use super::validate::quote_identifier;

/// Catalog SQL for one backend.
pub(crate) struct Catalog {
    pub database: &'static str,
    pub tables: &'static str,
    pub columns: &'static str,
    pub indexes: &'static str,
    pub foreign_keys: &'static str,
    /// Whether catalog queries bind the database name before the table name.
    pub binds_database: bool,
}

const MYSQL: Catalog = Catalog {
    database: "SELECT DATABASE() AS db",
    tables: "SELECT TABLE_NAME AS name, TABLE_COMMENT AS comment, TABLE_ROWS AS row_count, \
             DATA_LENGTH AS data_size, INDEX_LENGTH AS index_size \
             FROM information_schema.TABLES WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
    columns: "SELECT COLUMN_NAME AS name, DATA_TYPE AS type, IS_NULLABLE AS nullable, \
              COLUMN_DEFAULT AS default_value, COLUMN_KEY AS column_key, EXTRA AS extra, \
              COLUMN_COMMENT AS comment \
              FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
              ORDER BY ORDINAL_POSITION",
    indexes: "SELECT INDEX_NAME AS index_name, COLUMN_NAME AS column_name, \
              NON_UNIQUE AS non_unique, INDEX_TYPE AS index_type \
              FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
              ORDER BY INDEX_NAME, SEQ_IN_INDEX",
    foreign_keys: "SELECT CONSTRAINT_NAME AS constraint_name, COLUMN_NAME AS column_name, \
                   REFERENCED_TABLE_NAME AS referenced_table, \
                   REFERENCED_COLUMN_NAME AS referenced_column \
                   FROM information_schema.KEY_COLUMN_USAGE \
                   WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL",
    binds_database: true,
};

const POSTGRES: Catalog = Catalog {
    database: "SELECT current_database()::text AS db",
    tables: "SELECT c.relname::text AS name, obj_description(c.oid, 'pg_class')::text AS comment, \
             c.reltuples::bigint AS row_count, pg_relation_size(c.oid)::bigint AS data_size, \
             pg_indexes_size(c.oid)::bigint AS index_size \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p') ORDER BY c.relname",
    columns: "SELECT c.column_name::text AS name, c.data_type::text AS type, \
              c.is_nullable::text AS nullable, c.column_default::text AS default_value, \
              CASE WHEN pk.column_name IS NOT NULL THEN 'PRI' ELSE '' END AS column_key, \
              ''::text AS extra, NULL::text AS comment \
              FROM information_schema.columns c \
              LEFT JOIN (SELECT kcu.column_name FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage kcu \
                  ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = current_schema() \
                  AND tc.table_name = $1) pk ON pk.column_name = c.column_name \
              WHERE c.table_schema = current_schema() AND c.table_name = $1 \
              ORDER BY c.ordinal_position",
    indexes: "SELECT i.relname::text AS index_name, a.attname::text AS column_name, \
              CASE WHEN ix.indisunique THEN 0 ELSE 1 END AS non_unique, am.amname::text AS index_type \
              FROM pg_index ix \
              JOIN pg_class t ON t.oid = ix.indrelid \
              JOIN pg_class i ON i.oid = ix.indexrelid \
              JOIN pg_am am ON am.oid = i.relam \
              JOIN pg_namespace n ON n.oid = t.relnamespace \
              JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
              WHERE n.nspname = current_schema() AND t.relname = $1 \
              ORDER BY i.relname, a.attnum",
    foreign_keys: "SELECT tc.constraint_name::text AS constraint_name, kcu.column_name::text AS column_name, \
                   ccu.table_name::text AS referenced_table, ccu.column_name::text AS referenced_column \
                   FROM information_schema.table_constraints tc \
                   JOIN information_schema.key_column_usage kcu \
                     ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                   JOIN information_schema.constraint_column_usage ccu \
                     ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
                   WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema() \
                     AND tc.table_name = $1",
    binds_database: false,
};

const SQLITE: Catalog = Catalog {
    database: "SELECT 'main' AS db",
    tables: "SELECT name, NULL AS comment, NULL AS row_count, NULL AS data_size, NULL AS index_size \
             FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    columns: "SELECT name, type, CASE WHEN \"notnull\" = 1 THEN 'NO' ELSE 'YES' END AS nullable, \
              dflt_value AS default_value, CASE WHEN pk > 0 THEN 'PRI' ELSE '' END AS column_key, \
              '' AS extra, NULL AS comment FROM pragma_table_info(?) ORDER BY cid",
    indexes: "SELECT il.name AS index_name, ii.name AS column_name, \
              CASE WHEN il.\"unique\" = 1 THEN 0 ELSE 1 END AS non_unique, il.origin AS index_type \
              FROM pragma_index_list(?) il JOIN pragma_index_info(il.name) ii \
              ORDER BY il.name, ii.seqno",
    foreign_keys: "SELECT 'fk_' || id AS constraint_name, \"from\" AS column_name, \
                   \"table\" AS referenced_table, \"to\" AS referenced_column \
                   FROM pragma_foreign_key_list(?)",
    binds_database: false,
};

impl SqlDriver {
    pub(crate) fn catalog(&self) -> &'static Catalog {
        match self {
            SqlDriver::Mysql => &MYSQL,
            SqlDriver::Postgresql => &POSTGRES,
            SqlDriver::Sqlite => &SQLITE,
        }
    }

    fn identifier_quote(&self) -> char {
        match self {
            SqlDriver::Mysql => '`',
            SqlDriver::Postgresql | SqlDriver::Sqlite => '"',
        }
    }

    pub(crate) fn sample_query(&self, table: &str) -> String {
        format!(
            "SELECT * FROM {} LIMIT 3",
            quote_identifier(table, self.identifier_quote())
        )
    }

    pub(crate) fn count_query(&self, table: &str) -> String {
        format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            quote_identifier(table, self.identifier_quote())
        )
    }
}

fn text(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn flag(row: &Map<String, Value>, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => s != "0",
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Catalog rows describing one table.
pub(crate) struct TableRows {
    pub table: Map<String, Value>,
    pub columns: Vec<Map<String, Value>>,
    pub indexes: Vec<Map<String, Value>>,
    pub foreign_keys: Vec<Map<String, Value>>,
    pub sample: Vec<Map<String, Value>>,
}

/// Build the document for one table from its catalog rows.
pub(crate) fn table_document(rows: TableRows) -> Value {
    let mut columns = Map::new();
    for col in &rows.columns {
        let Some(name) = text(col, "name") else { continue };
        let key = text(col, "column_key").unwrap_or_default();
        columns.insert(
            name,
            json!({
                "type": text(col, "type"),
                "nullable": text(col, "nullable").is_some_and(|n| n.eq_ignore_ascii_case("YES")),
                "default": col.get("default_value").cloned().unwrap_or(Value::Null),
                "key": key,
                "extra": text(col, "extra").unwrap_or_default(),
                "comment": text(col, "comment"),
                "primary_key": key == "PRI",
            }),
        );
    }

    let mut indexes = Map::new();
    for idx in &rows.indexes {
        let Some(name) = text(idx, "index_name") else { continue };
        let entry = indexes.entry(name).or_insert_with(|| {
            json!({
                "columns": [],
                "unique": !flag(idx, "non_unique"),
                "type": text(idx, "index_type"),
            })
        });
        if let (Some(list), Some(column)) = (
            entry.get_mut("columns").and_then(Value::as_array_mut),
            text(idx, "column_name"),
        ) {
            list.push(Value::String(column));
        }
    }

    let mut foreign_keys = Map::new();
    for fk in &rows.foreign_keys {
        let Some(name) = text(fk, "constraint_name") else { continue };
        foreign_keys.insert(
            name,
            json!({
                "column": text(fk, "column_name"),
                "referenced_table": text(fk, "referenced_table"),
                "referenced_column": text(fk, "referenced_column"),
            }),
        );
    }

    json!({
        "comment": text(&rows.table, "comment").unwrap_or_default(),
        "row_count": rows.table.get("row_count").cloned().unwrap_or(Value::Null),
        "data_size": rows.table.get("data_size").cloned().unwrap_or(Value::Null),
        "index_size": rows.table.get("index_size").cloned().unwrap_or(Value::Null),
        "columns": columns,
        "indexes": indexes,
        "foreign_keys": foreign_keys,
        "sample_data": rows.sample.into_iter().map(Value::Object).collect::<Vec<_>>(),
    })
}
