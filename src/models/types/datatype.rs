//! # Logical types
//!
//! The Arrow logical type system as far as the IPC wire format needs it.
//!
//! A single tagged [`DataType`] enum governs how many buffers and children an array
//! carries; readers and writers dispatch on it with one `match` rather than walking a
//! type hierarchy. Nested types hold their children as [`Field`]s so that nested
//! dictionary-encoded values keep their own ids.

use std::fmt;

use crate::models::types::schema::Field;

/// Unit of time for time, timestamp and duration types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

/// Representation of interval values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    /// Number of months as `i32`.
    YearMonth,
    /// Days and milliseconds as two `i32`.
    DayTime,
    /// Months, days (`i32` each) and nanoseconds (`i64`).
    MonthDayNano,
}

/// Sparse unions share one index space across children; dense unions carry offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnionMode {
    Sparse,
    Dense,
}

/// Byte order declared by a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the host.
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    #[inline]
    pub fn is_native(self) -> bool {
        self == Self::native()
    }

    /// The opposite byte order.
    pub fn flip(self) -> Self {
        match self {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        }
    }
}

/// IPC metadata format version. Ordered, so `version >= MetadataVersion::V4` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MetadataVersion {
    V1,
    V2,
    V3,
    V4,
    #[default]
    V5,
}

/// Arrow logical type of a field or array.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Null,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Half precision float, stored as raw `u16` bits.
    Float16,
    Float32,
    Float64,
    Decimal128 { precision: u8, scale: i8 },
    Decimal256 { precision: u8, scale: i8 },
    /// Days since the UNIX epoch.
    Date32,
    /// Milliseconds since the UNIX epoch.
    Date64,
    Time32(TimeUnit),
    Time64(TimeUnit),
    Timestamp(TimeUnit, Option<String>),
    Interval(IntervalUnit),
    Duration(TimeUnit),
    FixedSizeBinary(i32),
    Binary,
    LargeBinary,
    Utf8,
    LargeUtf8,
    BinaryView,
    Utf8View,
    List(Box<Field>),
    LargeList(Box<Field>),
    ListView(Box<Field>),
    LargeListView(Box<Field>),
    FixedSizeList(Box<Field>, i32),
    Struct(Vec<Field>),
    /// Entries field (a struct of key and value) and whether keys are sorted.
    Map(Box<Field>, bool),
    /// Children, the type id of each child, and the mode.
    Union(Vec<Field>, Vec<i32>, UnionMode),
    /// Run ends field and values field.
    RunEndEncoded(Box<Field>, Box<Field>),
    /// Dictionary encoded values.
    ///
    /// `index` is the integer type of the indices stored in record batches; `value` is the
    /// type of the dictionary array carried by dictionary batches with the same `id`.
    Dictionary {
        id: i64,
        index: Box<DataType>,
        value: Box<DataType>,
        ordered: bool,
    },
    /// A user type stored as `storage` and tagged through field metadata.
    Extension {
        name: String,
        metadata: Option<String>,
        storage: Box<DataType>,
    },
}

impl DataType {
    /// Shorthand for a dictionary type.
    pub fn dictionary(id: i64, index: DataType, value: DataType) -> Self {
        DataType::Dictionary {
            id,
            index: Box::new(index),
            value: Box::new(value),
            ordered: false,
        }
    }

    /// Shorthand for a list of a nullable `item` field.
    pub fn list_of(item: DataType) -> Self {
        DataType::List(Box::new(Field::new("item", item, true)))
    }

    /// Strips extension wrappers.
    pub fn storage_type(&self) -> &DataType {
        match self {
            DataType::Extension { storage, .. } => storage.storage_type(),
            other => other,
        }
    }

    /// Byte width of one element for fixed-width types.
    pub fn primitive_width(&self) -> Option<usize> {
        use DataType::*;
        match self.storage_type() {
            Int8 | UInt8 => Some(1),
            Int16 | UInt16 | Float16 => Some(2),
            Int32 | UInt32 | Float32 | Date32 | Time32(_) => Some(4),
            Interval(IntervalUnit::YearMonth) => Some(4),
            Int64 | UInt64 | Float64 | Date64 | Time64(_) | Timestamp(..) | Duration(_) => Some(8),
            Interval(IntervalUnit::DayTime) => Some(8),
            Interval(IntervalUnit::MonthDayNano) => Some(16),
            Decimal128 { .. } => Some(16),
            Decimal256 { .. } => Some(32),
            FixedSizeBinary(w) => usize::try_from(*w).ok(),
            _ => None,
        }
    }

    /// True for types whose arrays carry a leading validity slot.
    pub fn has_validity_slot(&self) -> bool {
        !matches!(
            self.storage_type(),
            DataType::Null | DataType::Union(..) | DataType::RunEndEncoded(..)
        )
    }

    /// True for signed and unsigned integer types, the only valid dictionary index types.
    pub fn is_integer(&self) -> bool {
        use DataType::*;
        matches!(
            self,
            Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64
        )
    }

    /// Child fields of nested types, in wire order.
    pub fn children(&self) -> Vec<&Field> {
        use DataType::*;
        match self.storage_type() {
            List(f) | LargeList(f) | ListView(f) | LargeListView(f) | FixedSizeList(f, _) | Map(f, _) => {
                vec![f.as_ref()]
            }
            Struct(fields) | Union(fields, ..) => fields.iter().collect(),
            RunEndEncoded(run_ends, values) => vec![run_ends.as_ref(), values.as_ref()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Dictionary { id, index, value, .. } => {
                write!(f, "Dictionary<{index}, {value}> (id {id})")
            }
            DataType::Extension { name, storage, .. } => write!(f, "Extension<{name}: {storage}>"),
            DataType::List(item) => write!(f, "List<{}>", item.data_type),
            DataType::LargeList(item) => write!(f, "LargeList<{}>", item.data_type),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Plain-old-data element types with a canonical logical type.
pub trait NativeType: bytemuck::Pod + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;
}

macro_rules! native_type {
    ($($t:ty => $dt:expr),* $(,)?) => {
        $(impl NativeType for $t {
            const DATA_TYPE: DataType = $dt;
        })*
    };
}

native_type!(
    i8 => DataType::Int8,
    i16 => DataType::Int16,
    i32 => DataType::Int32,
    i64 => DataType::Int64,
    u8 => DataType::UInt8,
    u16 => DataType::UInt16,
    u32 => DataType::UInt32,
    u64 => DataType::UInt64,
    f32 => DataType::Float32,
    f64 => DataType::Float64,
    i128 => DataType::Decimal128 { precision: 38, scale: 0 },
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_widths() {
        assert_eq!(DataType::Int16.primitive_width(), Some(2));
        assert_eq!(DataType::Timestamp(TimeUnit::Nanosecond, None).primitive_width(), Some(8));
        assert_eq!(DataType::Interval(IntervalUnit::MonthDayNano).primitive_width(), Some(16));
        assert_eq!(DataType::FixedSizeBinary(3).primitive_width(), Some(3));
        assert_eq!(DataType::Utf8.primitive_width(), None);
    }

    #[test]
    fn test_extension_is_transparent() {
        let ext = DataType::Extension {
            name: "uuid".into(),
            metadata: None,
            storage: Box::new(DataType::FixedSizeBinary(16)),
        };
        assert_eq!(ext.primitive_width(), Some(16));
        assert!(ext.has_validity_slot());
    }

    #[test]
    fn test_validity_slots() {
        assert!(!DataType::Null.has_validity_slot());
        assert!(!DataType::Union(vec![], vec![], UnionMode::Sparse).has_validity_slot());
        assert!(DataType::list_of(DataType::Int32).has_validity_slot());
    }

    #[test]
    fn test_metadata_version_ordering() {
        assert!(MetadataVersion::V5 >= MetadataVersion::V4);
        assert!(MetadataVersion::V3 < MetadataVersion::V4);
        assert_eq!(Endianness::native().flip().flip(), Endianness::native());
    }
}
