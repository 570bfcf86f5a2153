use crate::statement::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MutationOp {
    Insert,
    Update,
    InsertOrUpdate,
    Replace,
    Delete,
}

/// A write buffered inside a transaction attempt and applied at commit.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub table: String,
    pub op: MutationOp,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Mutation {
    pub fn new(table: impl Into<String>, op: MutationOp) -> Self {
        Self {
            table: table.into(),
            op,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn insert(table: impl Into<String>) -> Self {
        Self::new(table, MutationOp::Insert)
    }

    pub fn update(table: impl Into<String>) -> Self {
        Self::new(table, MutationOp::Update)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(table, MutationOp::Delete)
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }
}
