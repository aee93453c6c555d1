//! Fields, schemas and field positions.

use std::collections::BTreeMap;
use std::fmt;

use crate::models::types::datatype::{DataType, Endianness};

/// Key/value metadata attached to fields, schemas and footers.
pub type Metadata = BTreeMap<String, String>;

/// A named, typed column.
///
/// Equality covers name, type (recursively, including dictionary ids) and nullability.
/// Metadata is carried but not compared.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub metadata: Metadata,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.nullable == other.nullable
            && self.data_type == other.data_type
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let null = if self.nullable { "" } else { " not null" };
        write!(f, "{}: {}{}", self.name, self.data_type, null)
    }
}

/// Ordered fields plus schema-level metadata and declared byte order.
///
/// Immutable once built; equality compares the fields only.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
    pub metadata: Metadata,
    pub endianness: Endianness,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            metadata: Metadata::new(),
            endianness: Endianness::native(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every dictionary-encoded field, pre-order, with its position.
    ///
    /// Dictionary value types are walked too, so nested dictionaries come after
    /// the dictionary that contains them.
    pub fn dictionary_fields(&self) -> Vec<DictionaryField<'_>> {
        let mut out = Vec::new();
        for (i, field) in self.fields.iter().enumerate() {
            collect_dictionaries(&field.data_type, FieldPosition::root().child(i), &mut out);
        }
        out
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(|fld| fld.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// A dictionary-encoded location inside a schema.
#[derive(Debug, Clone)]
pub struct DictionaryField<'a> {
    pub position: FieldPosition,
    pub id: i64,
    pub value_type: &'a DataType,
}

fn collect_dictionaries<'a>(dt: &'a DataType, pos: FieldPosition, out: &mut Vec<DictionaryField<'a>>) {
    match dt {
        DataType::Extension { storage, .. } => collect_dictionaries(storage, pos, out),
        DataType::Dictionary { id, value, .. } => {
            out.push(DictionaryField {
                position: pos.clone(),
                id: *id,
                value_type: value,
            });
            for (i, child) in value.children().into_iter().enumerate() {
                collect_dictionaries(&child.data_type, pos.child(i), out);
            }
        }
        other => {
            for (i, child) in other.children().into_iter().enumerate() {
                collect_dictionaries(&child.data_type, pos.child(i), out);
            }
        }
    }
}

/// Child-index path from the schema root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldPosition(Vec<usize>);

impl FieldPosition {
    /// The schema itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Position of child `i` under this one.
    pub fn child(&self, i: usize) -> Self {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.extend_from_slice(&self.0);
        path.push(i);
        Self(path)
    }

    pub fn path(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<usize>> for FieldPosition {
    fn from(path: Vec<usize>) -> Self {
        Self(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_equality_ignores_metadata() {
        let mut md = Metadata::new();
        md.insert("k".into(), "v".into());
        let a = Field::new("a", DataType::Int32, true);
        let b = Field::new("a", DataType::Int32, true).with_metadata(md);
        assert_eq!(a, b);
        assert_ne!(a, Field::new("a", DataType::Int32, false));
    }

    #[test]
    fn test_dictionary_ids_participate_in_equality() {
        let a = Schema::new(vec![Field::new("d", DataType::dictionary(0, DataType::Int32, DataType::Utf8), true)]);
        let b = Schema::new(vec![Field::new("d", DataType::dictionary(1, DataType::Int32, DataType::Utf8), true)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_nested_dictionary_positions() {
        let inner = DataType::dictionary(7, DataType::Int8, DataType::Utf8);
        let outer = DataType::dictionary(3, DataType::Int32, DataType::list_of(inner));
        let schema = Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("y", DataType::Struct(vec![Field::new("z", outer, true)]), true),
        ]);
        let dicts = schema.dictionary_fields();
        assert_eq!(dicts.len(), 2);
        assert_eq!(dicts[0].id, 3);
        assert_eq!(dicts[0].position.path(), &[1, 0]);
        assert_eq!(dicts[1].id, 7);
        assert_eq!(dicts[1].position.path(), &[1, 0, 0]);
    }
}
