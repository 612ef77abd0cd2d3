//! Fixed-Width Row Image Decoding
//!
//! MariaDB row-based replication encodes a row image as a null bitmap
//! followed by the non-null column values in table order. Both schemas this
//! core cares about declare every column `NOT NULL`, so the null bitmap is
//! expected to be all-zero; a set bit is treated as a decode error rather
//! than silently producing a missing column, since neither schema has an
//! optional field.

use super::change::{ColumnValue, RowView};
use super::schema::TableSchema;
use crate::error::{Error, Result};

/// Decode one row image into a `RowView`, returning the number of bytes
/// consumed so a caller can advance past chained row images in the same
/// event.
pub fn decode_row(schema: &TableSchema, data: &[u8]) -> Result<(RowView, usize)> {
    let bitmap_len = schema.columns.len().div_ceil(8);
    if data.len() < bitmap_len {
        return Err(Error::Subscription("row image shorter than null bitmap".into()));
    }
    let null_bitmap = &data[..bitmap_len];
    let mut offset = bitmap_len;
    let mut row = RowView::new();

    for (i, (name, col_type)) in schema.columns.iter().enumerate() {
        let byte = null_bitmap[i / 8];
        let is_null = byte & (1 << (i % 8)) != 0;
        if is_null {
            return Err(Error::Subscription(format!(
                "unexpected NULL in NOT NULL column {name}"
            )));
        }

        let width = col_type.width();
        if data.len() < offset + width {
            return Err(Error::Subscription(format!(
                "row image truncated reading column {name}"
            )));
        }

        let value = match col_type {
            super::schema::ColumnType::TinyInt => ColumnValue::TinyInt(data[offset] as i8),
            super::schema::ColumnType::Int => {
                let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
                ColumnValue::Int(i32::from_le_bytes(bytes))
            }
            super::schema::ColumnType::BigInt => {
                let bytes: [u8; 8] = data[offset..offset + 8].try_into().unwrap();
                ColumnValue::BigInt(i64::from_le_bytes(bytes))
            }
        };
        row.insert(*name, value);
        offset += width;
    }

    Ok((row, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::schema::schema_for_table;

    #[test]
    fn decodes_an_ack_row() {
        let schema = schema_for_table("write_acks_deployment0").unwrap();
        let mut data = vec![0u8]; // null bitmap, 6 columns -> 1 byte, all present
        data.extend_from_slice(&8i64.to_le_bytes()); // namenode_id
        data.extend_from_slice(&0i32.to_le_bytes()); // deployment_number
        data.push(1u8); // acknowledged
        data.extend_from_slice(&42i64.to_le_bytes()); // op_id
        data.extend_from_slice(&1000i64.to_le_bytes()); // timestamp
        data.extend_from_slice(&7i64.to_le_bytes()); // leader_id

        let (row, consumed) = decode_row(&schema, &data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(row.get_i64("namenode_id"), Some(8));
        assert_eq!(row.get_bool("acknowledged"), Some(true));
        assert_eq!(row.get_i64("op_id"), Some(42));
        assert_eq!(row.get_i64("leader_id"), Some(7));
    }

    #[test]
    fn rejects_truncated_row_image() {
        let schema = schema_for_table("invalidations_deployment0").unwrap();
        let data = vec![0u8, 1, 2, 3];
        assert!(decode_row(&schema, &data).is_err());
    }

    #[test]
    fn rejects_null_in_not_null_column() {
        let schema = schema_for_table("write_acks_deployment0").unwrap();
        let mut data = vec![0b0000_0001u8]; // first column flagged NULL
        data.extend_from_slice(&[0u8; 29]);
        assert!(decode_row(&schema, &data).is_err());
    }
}
