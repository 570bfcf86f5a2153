//! Canned statements shared by client tests and the simulator.

use once_cell::sync::Lazy;
use vellum_core_types::{Column, ColumnType, ResultSet, Statement, Status, Value};

use crate::backend::ProgrammableBackend;

pub const UPDATE_COUNT: i64 = 1;

pub static UPDATE_STATEMENT: Lazy<Statement> =
    Lazy::new(|| Statement::new("UPDATE FOO SET BAR=1 WHERE BAZ=2"));

pub static INVALID_UPDATE_STATEMENT: Lazy<Statement> =
    Lazy::new(|| Statement::new("UPDATE NON_EXISTENT_TABLE SET BAR=1 WHERE BAZ=2"));

pub static UPDATE_ABORTED_STATEMENT: Lazy<Statement> =
    Lazy::new(|| Statement::new("UPDATE FOO SET BAR=1 WHERE BAZ=2 AND FOO=3"));

pub static READ_ONE_EMPTY_KEY_VALUE_STATEMENT: Lazy<Statement> =
    Lazy::new(|| Statement::new("SELECT KEY, VALUE FROM TestTable WHERE KEY=@key").bind("key", "k99"));

pub static READ_ONE_KEY_VALUE_STATEMENT: Lazy<Statement> =
    Lazy::new(|| Statement::new("SELECT KEY, VALUE FROM TestTable WHERE KEY=@key").bind("key", "k1"));

pub static READ_MULTIPLE_KEY_VALUE_STATEMENT: Lazy<Statement> =
    Lazy::new(|| Statement::new("SELECT KEY, VALUE FROM TestTable WHERE 1=1"));

fn key_value_columns() -> Vec<Column> {
    vec![
        Column::new("KEY", ColumnType::String),
        Column::new("VALUE", ColumnType::String),
    ]
}

fn key_value_rows(pairs: &[(&str, &str)]) -> Result<ResultSet, Status> {
    pairs
        .iter()
        .try_fold(ResultSet::new(key_value_columns()), |rows, (key, value)| {
            rows.with_row(vec![Value::from(*key), Value::from(*value)])
        })
}

pub fn empty_key_value_rows() -> Result<ResultSet, Status> {
    key_value_rows(&[])
}

pub fn read_one_key_value_rows() -> Result<ResultSet, Status> {
    key_value_rows(&[("k1", "v1")])
}

pub fn read_multiple_key_value_rows() -> Result<ResultSet, Status> {
    key_value_rows(&[("k1", "v1"), ("k2", "v2"), ("k3", "v3")])
}

/// Registers every canned statement on `backend`.
pub fn register_all(backend: &ProgrammableBackend) -> Result<(), Status> {
    backend.put_query(&READ_ONE_EMPTY_KEY_VALUE_STATEMENT, empty_key_value_rows()?);
    backend.put_query(&READ_ONE_KEY_VALUE_STATEMENT, read_one_key_value_rows()?);
    backend.put_query(
        &READ_MULTIPLE_KEY_VALUE_STATEMENT,
        read_multiple_key_value_rows()?,
    );
    backend.put_update(&UPDATE_STATEMENT, UPDATE_COUNT);
    backend.put_error(
        &INVALID_UPDATE_STATEMENT,
        Status::invalid_argument("invalid statement"),
    );
    backend.put_error(
        &UPDATE_ABORTED_STATEMENT,
        Status::aborted("Transaction was aborted"),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core_types::{Code, SessionId, TransactionHandle};
    use vellum_txn::StatementExecutor;

    #[test]
    fn canned_statements_answer_as_registered() {
        let backend = ProgrammableBackend::new();
        register_all(&backend).unwrap();
        assert_eq!(backend.registered(), 6);

        let txn = TransactionHandle::new(SessionId::new(), 1);
        let multiple = backend
            .execute(&READ_MULTIPLE_KEY_VALUE_STATEMENT, &txn)
            .unwrap();
        assert_eq!(multiple.result_set().map(ResultSet::len), Some(3));
        let empty = backend
            .execute(&READ_ONE_EMPTY_KEY_VALUE_STATEMENT, &txn)
            .unwrap();
        assert_eq!(empty.result_set().map(ResultSet::is_empty), Some(true));

        let invalid = backend.execute(&INVALID_UPDATE_STATEMENT, &txn).unwrap_err();
        assert_eq!(invalid.code(), Code::InvalidArgument);
        let aborted = backend.execute(&UPDATE_ABORTED_STATEMENT, &txn).unwrap_err();
        assert!(aborted.is_aborted());
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let err = key_value_rows(&[("k1", "v1")])
            .and_then(|rows| rows.with_row(vec![Value::from("k2")]))
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
