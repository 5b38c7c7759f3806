//! Escaping and statement building for dynamic record inserts.
//!
//! Denormalized records insert into a column list that differs from row to
//! row, so those statements cannot be prepared once and parameterised. All
//! SQL text assembled from data goes through this module: identifiers via
//! [`quote_identifier`], values via [`quote_literal`] / [`quote_nullable`],
//! and the final statement via [`InsertStatement`].

/// Quotes an identifier for use in SQL text.
///
/// Wraps the name in double quotes and doubles any embedded double quote.
///
/// # Examples
///
/// ```
/// use pica_sqlite::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("003@0"), r#""003@0""#);
/// assert_eq!(quote_identifier(r#"a"b"#), r#""a""b""#);
/// ```
pub fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quotes a text value as an SQL literal.
///
/// Single quotes are doubled. Text containing NUL characters, which cannot
/// appear inside SQL text, is emitted as a blob literal cast to `TEXT`.
///
/// # Examples
///
/// ```
/// use pica_sqlite::sql::quote_literal;
///
/// assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
/// assert_eq!(quote_literal("a\0b"), "CAST(X'610062' AS TEXT)");
/// ```
pub fn quote_literal(value: &str) -> String {
    if value.contains('\0') {
        let hex: String = value.bytes().map(|b| format!("{b:02X}")).collect();
        return format!("CAST(X'{hex}' AS TEXT)");
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push('\'');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Quotes an optional text value; `None` becomes `NULL`.
pub fn quote_nullable(value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_string(), quote_literal)
}

/// Single-row `INSERT` whose columns are only known at runtime.
///
/// Column names are quoted on [`push`](Self::push); values must already be
/// SQL expressions produced by the quoting functions of this module.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    values: Vec<String>,
}

impl InsertStatement {
    /// Starts an insert into `table`.
    pub fn new(table: &str) -> Self {
        Self {
            table: quote_identifier(table),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Adds a column with an already quoted value expression.
    pub fn push(&mut self, column: &str, value_sql: String) -> &mut Self {
        self.columns.push(quote_identifier(column));
        self.values.push(value_sql);
        self
    }

    /// Number of columns added so far.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if no column has been added.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Renders the statement.
    pub fn to_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            self.values.join(", ")
        )
    }
}
