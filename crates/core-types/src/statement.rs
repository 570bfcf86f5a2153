use std::collections::BTreeMap;
use std::fmt;

use crate::status::Status;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    String,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Bool => "BOOL",
            ColumnType::Int64 => "INT64",
            ColumnType::Float64 => "FLOAT64",
            ColumnType::String => "STRING",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Value {
    /// `None` for `Null`, which is compatible with every column type.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int64(_) => Some(ColumnType::Int64),
            Value::Float64(_) => Some(ColumnType::Float64),
            Value::String(_) => Some(ColumnType::String),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    fn signature(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => format!("BOOL={v}"),
            Value::Int64(v) => format!("INT64={v}"),
            Value::Float64(v) => format!("FLOAT64={v:?}"),
            Value::String(v) => format!("STRING={v:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// Normalized lookup key of a [`Statement`]: collapsed SQL text followed by
/// the sorted parameter signature.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StatementKey(String);

impl StatementKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Statement> for StatementKey {
    fn from(statement: &Statement) -> Self {
        statement.key()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    sql: String,
    params: BTreeMap<String, Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn key(&self) -> StatementKey {
        let mut key = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if !self.params.is_empty() {
            let signature = self
                .params
                .iter()
                .map(|(name, value)| format!("{name}:{}", value.signature()))
                .collect::<Vec<_>>()
                .join(", ");
            key.push_str(" {");
            key.push_str(&signature);
            key.push('}');
        }
        StatementKey(key)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key().as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row. Rows must match the column count and types; `Null` is
    /// accepted for any column.
    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self, Status> {
        if row.len() != self.columns.len() {
            return Err(Status::invalid_argument(format!(
                "row has {} values, result set has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (value, column) in row.iter().zip(&self.columns) {
            if let Some(ty) = value.column_type() {
                if ty != column.ty {
                    return Err(Status::invalid_argument(format!(
                        "column {} expects {}, got {}",
                        column.name, column.ty, ty
                    )));
                }
            }
        }
        self.rows.push(row);
        Ok(self)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c.name == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Outcome of a statement: exactly one of rows, an update count or an error.
#[derive(Clone, Debug, PartialEq)]
pub enum StatementResult {
    ResultSet(ResultSet),
    UpdateCount(i64),
    Error(Status),
}

impl StatementResult {
    /// Turns an `Error` variant into `Err`, passing the other variants through.
    pub fn into_result(self) -> Result<StatementResult, Status> {
        match self {
            StatementResult::Error(status) => Err(status),
            other => Ok(other),
        }
    }

    pub fn update_count(&self) -> Option<i64> {
        match self {
            StatementResult::UpdateCount(count) => Some(*count),
            _ => None,
        }
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            StatementResult::ResultSet(rs) => Some(rs),
            _ => None,
        }
    }
}
