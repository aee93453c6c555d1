//! Record batches: a schema plus equally long columns.

use std::sync::Arc;

use crate::error::{IpcError, Result};
use crate::models::types::array_data::ArrayData;
use crate::models::types::schema::Schema;

/// A horizontal slice of a table.
///
/// Equality is column-wise logical equality plus schema field equality.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub schema: Arc<Schema>,
    pub length: usize,
    pub columns: Vec<ArrayData>,
}

impl RecordBatch {
    /// Builds a batch, checking column count, types and lengths against `schema`.
    ///
    /// The length is taken from the first column; a batch with no columns is empty.
    pub fn try_new(schema: Arc<Schema>, columns: Vec<ArrayData>) -> Result<Self> {
        let length = columns.first().map(|c| c.len).unwrap_or(0);
        Self::try_new_with_length(schema, columns, length)
    }

    /// Like [`RecordBatch::try_new`] with an explicit row count, for zero-column batches.
    pub fn try_new_with_length(schema: Arc<Schema>, columns: Vec<ArrayData>, length: usize) -> Result<Self> {
        if columns.len() != schema.fields.len() {
            return Err(IpcError::InvalidArgument(format!(
                "schema has {} fields but {} columns were supplied",
                schema.fields.len(),
                columns.len()
            )));
        }
        for (field, column) in schema.fields.iter().zip(&columns) {
            if field.data_type != column.data_type {
                return Err(IpcError::InvalidArgument(format!(
                    "column '{}' has type {} but the schema declares {}",
                    field.name, column.data_type, field.data_type
                )));
            }
            if column.len != length {
                return Err(IpcError::InvalidArgument(format!(
                    "column '{}' has length {} but the batch has {length} rows",
                    field.name, column.len
                )));
            }
        }
        Ok(Self {
            schema,
            length,
            columns,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.length
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, i: usize) -> Option<&ArrayData> {
        self.columns.get(i)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ArrayData> {
        let idx = self.schema.fields.iter().position(|f| f.name == name)?;
        self.columns.get(idx)
    }

    /// Zero-copy slice of every column.
    ///
    /// # Panics
    /// When `offset + len` exceeds the batch length.
    pub fn slice(&self, offset: usize, len: usize) -> RecordBatch {
        RecordBatch {
            schema: Arc::clone(&self.schema),
            length: len,
            columns: self.columns.iter().map(|c| c.slice(offset, len)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::datatype::DataType;
    use crate::models::types::schema::Field;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn test_try_new_checks_columns() {
        let ok = RecordBatch::try_new(
            schema(),
            vec![ArrayData::from_primitive(&[1i32, 2]), ArrayData::from_strs(&["x", "y"])],
        )
        .unwrap();
        assert_eq!(ok.num_rows(), 2);
        assert_eq!(ok.column_by_name("b").unwrap().len, 2);

        let wrong_len = RecordBatch::try_new(
            schema(),
            vec![ArrayData::from_primitive(&[1i32, 2]), ArrayData::from_strs(&["x"])],
        );
        assert!(matches!(wrong_len, Err(IpcError::InvalidArgument(_))));

        let wrong_type = RecordBatch::try_new(
            schema(),
            vec![ArrayData::from_primitive(&[1i64, 2]), ArrayData::from_strs(&["x", "y"])],
        );
        assert!(matches!(wrong_type, Err(IpcError::InvalidArgument(_))));
    }

    #[test]
    fn test_slice() {
        let batch = RecordBatch::try_new(
            schema(),
            vec![ArrayData::from_primitive(&[1i32, 2, 3]), ArrayData::from_strs(&["x", "y", "z"])],
        )
        .unwrap();
        let s = batch.slice(1, 2);
        assert_eq!(s.length, 2);
        assert_eq!(s.columns[1], ArrayData::from_strs(&["y", "z"]));
    }
}
