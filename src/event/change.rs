//! Change Event Types
//!
//! The column-addressable post/pre value views a listener sees for a single
//! row change.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnValue {
    TinyInt(i8),
    Int(i32),
    BigInt(i64),
}

impl ColumnValue {
    pub fn as_i64(self) -> i64 {
        match self {
            ColumnValue::TinyInt(v) => v as i64,
            ColumnValue::Int(v) => v as i64,
            ColumnValue::BigInt(v) => v,
        }
    }

    pub fn as_bool(self) -> bool {
        self.as_i64() != 0
    }
}

/// A single decoded row, addressable by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowView(HashMap<String, ColumnValue>);

impl RowView {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: ColumnValue) {
        self.0.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<ColumnValue> {
        self.0.get(column).copied()
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).map(ColumnValue::as_i64)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).map(ColumnValue::as_bool)
    }
}

/// A single delivered change, as dispatched to registered listeners.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub event_name: String,
    pub table_name: String,
    pub post: RowView,
    pub pre: Option<RowView>,
}
