//! Fixed Row Schemas
//!
//! The change stream only ever needs to decode rows for the two tables the
//! core itself writes: the per-deployment ack and invalidation tables. Both
//! are fixed-width, all-NOT-NULL integer schemas, so a full general-purpose
//! column decoder is unnecessary. A short ordered column list per table is
//! enough to walk a row image.

/// Binlog column storage widths for the integer types used by both schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    TinyInt,
    Int,
    BigInt,
}

impl ColumnType {
    pub fn width(self) -> usize {
        match self {
            ColumnType::TinyInt => 1,
            ColumnType::Int => 4,
            ColumnType::BigInt => 8,
        }
    }
}

/// Ordered column list for a table, matching its `CREATE TABLE` definition.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table_kind: TableKind,
    pub columns: Vec<(&'static str, ColumnType)>,
}

/// Which of the two schema families a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Ack,
    Invalidation,
}

const ACK_COLUMNS: &[(&str, ColumnType)] = &[
    ("namenode_id", ColumnType::BigInt),
    ("deployment_number", ColumnType::Int),
    ("acknowledged", ColumnType::TinyInt),
    ("op_id", ColumnType::BigInt),
    ("timestamp", ColumnType::BigInt),
    ("leader_id", ColumnType::BigInt),
];

const INVALIDATION_COLUMNS: &[(&str, ColumnType)] = &[
    ("inode_id", ColumnType::BigInt),
    ("parent_id", ColumnType::BigInt),
    ("leader_id", ColumnType::BigInt),
    ("tx_start", ColumnType::BigInt),
    ("op_id", ColumnType::BigInt),
];

/// Resolve the schema for a deployment-suffixed table name, e.g.
/// `write_acks_deployment2` or `invalidations_deployment0`.
pub fn schema_for_table(table_name: &str) -> Option<TableSchema> {
    if let Some(rest) = table_name.strip_prefix("write_acks_deployment") {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            return Some(TableSchema {
                table_kind: TableKind::Ack,
                columns: ACK_COLUMNS.to_vec(),
            });
        }
    }
    if let Some(rest) = table_name.strip_prefix("invalidations_deployment") {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            return Some(TableSchema {
                table_kind: TableKind::Invalidation,
                columns: INVALIDATION_COLUMNS.to_vec(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ack_table_for_any_deployment() {
        let schema = schema_for_table("write_acks_deployment7").unwrap();
        assert_eq!(schema.table_kind, TableKind::Ack);
        assert_eq!(schema.columns.len(), 6);
    }

    #[test]
    fn resolves_invalidation_table_for_any_deployment() {
        let schema = schema_for_table("invalidations_deployment0").unwrap();
        assert_eq!(schema.table_kind, TableKind::Invalidation);
        assert_eq!(schema.columns.len(), 5);
    }

    #[test]
    fn rejects_unrelated_table_names() {
        assert!(schema_for_table("write_acks_deployment").is_none());
        assert!(schema_for_table("some_other_table").is_none());
    }
}
