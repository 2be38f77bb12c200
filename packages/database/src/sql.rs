//! SQL text helpers and table plans.
//!
//! Table names reaching these helpers have already been checked with
//! [`liveability_region_models::config::is_identifier`]; free-text values
//! go through [`quote_literal`].

/// Renders `value` as a single-quoted SQL string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders `name` as a double-quoted SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of the spatial index on a table's `geom` column.
#[must_use]
pub fn spatial_index_name(table: &str) -> String {
    format!("{table}_gix")
}

/// The statements that (re)build one table, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    /// Table being built.
    pub table: String,
    /// Statements, in execution order.
    pub statements: Vec<String>,
}

impl TablePlan {
    /// Drops `table`, recreates it from `select`, and indexes `geom`.
    #[must_use]
    pub fn replace(table: &str, select: &str) -> Self {
        Self {
            table: table.to_string(),
            statements: vec![
                drop_table(table),
                format!("CREATE TABLE {table} AS\n{select}"),
                spatial_index(table),
            ],
        }
    }

    /// Creates `table` from `select` without dropping first, for tables
    /// only built when absent from the catalog.
    #[must_use]
    pub fn create(table: &str, select: &str) -> Self {
        Self {
            table: table.to_string(),
            statements: vec![
                format!("CREATE TABLE {table} AS\n{select}"),
                spatial_index(table),
            ],
        }
    }

    /// Drops and recreates `table` without a spatial index.
    #[must_use]
    pub fn replace_attributes(table: &str, select: &str) -> Self {
        Self {
            table: table.to_string(),
            statements: vec![drop_table(table), format!("CREATE TABLE {table} AS\n{select}")],
        }
    }

    /// Appends a statement to run after the existing ones.
    #[must_use]
    pub fn then(mut self, statement: String) -> Self {
        self.statements.push(statement);
        self
    }
}

/// `DROP TABLE IF EXISTS` for `table`.
#[must_use]
pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

/// GiST index on `table.geom`.
#[must_use]
pub fn spatial_index(table: &str) -> String {
    format!(
        "CREATE INDEX {} ON {table} USING GIST (geom)",
        spatial_index_name(table)
    )
}
