//! # FlatBuffers schema conversion
//!
//! Turns the `Schema` table of a schema message or file footer into a [`Schema`].
//!
//! Each field is decoded in three layers: the flatbuffer type tag gives the storage type,
//! a `dictionary` table wraps it as [`DataType::Dictionary`], and the
//! `ARROW:extension:*` metadata keys wrap the result as [`DataType::Extension`].

use arrow_ipc as fb;
use flatbuffers::{ForwardsUOffset, Vector};

use crate::constants::{EXTENSION_METADATA_KEY, EXTENSION_NAME_KEY, MAX_NESTING_DEPTH};
use crate::error::{IpcError, Result};
use crate::models::types::datatype::{
    DataType, Endianness, IntervalUnit, MetadataVersion, TimeUnit, UnionMode,
};
use crate::models::types::schema::{Field, Metadata, Schema};

/// Converts a flatbuffer schema.
pub(crate) fn schema_from_fb(schema: fb::Schema<'_>) -> Result<Schema> {
    let mut fields = Vec::new();
    if let Some(fb_fields) = schema.fields() {
        fields.reserve(fb_fields.len());
        for field in fb_fields.iter() {
            fields.push(field_from_fb(field, 1)?);
        }
    }
    let endianness = match schema.endianness() {
        fb::Endianness::Little => Endianness::Little,
        fb::Endianness::Big => Endianness::Big,
        other => return Err(IpcError::InvalidData(format!("unknown endianness {}", other.0))),
    };
    Ok(Schema {
        fields,
        metadata: metadata_from_fb(schema.custom_metadata()),
        endianness,
    })
}

pub(crate) fn metadata_from_fb(
    entries: Option<Vector<'_, ForwardsUOffset<fb::KeyValue<'_>>>>,
) -> Metadata {
    let mut out = Metadata::new();
    for kv in entries.iter().flat_map(|v| v.iter()) {
        if let Some(key) = kv.key() {
            out.insert(key.to_string(), kv.value().unwrap_or_default().to_string());
        }
    }
    out
}

pub(crate) fn version_from_fb(version: fb::MetadataVersion) -> Result<MetadataVersion> {
    Ok(match version {
        fb::MetadataVersion::V1 => MetadataVersion::V1,
        fb::MetadataVersion::V2 => MetadataVersion::V2,
        fb::MetadataVersion::V3 => MetadataVersion::V3,
        fb::MetadataVersion::V4 => MetadataVersion::V4,
        fb::MetadataVersion::V5 => MetadataVersion::V5,
        other => {
            return Err(IpcError::InvalidData(format!(
                "unsupported metadata version {}",
                other.0
            )));
        }
    })
}

fn field_from_fb(field: fb::Field<'_>, depth: usize) -> Result<Field> {
    if depth > MAX_NESTING_DEPTH {
        return Err(IpcError::NestingDepthExceeded(MAX_NESTING_DEPTH));
    }
    let name = field.name().unwrap_or_default().to_string();
    let mut metadata = metadata_from_fb(field.custom_metadata());

    let mut children = Vec::new();
    if let Some(fb_children) = field.children() {
        children.reserve(fb_children.len());
        for child in fb_children.iter() {
            children.push(field_from_fb(child, depth + 1)?);
        }
    }

    let mut data_type = type_from_fb(&field, children)?;
    if let Some(encoding) = field.dictionary() {
        let index = match encoding.indexType() {
            Some(int) => int_from_fb(int)?,
            // The format's default index type
            None => DataType::Int32,
        };
        data_type = DataType::Dictionary {
            id: encoding.id(),
            index: Box::new(index),
            value: Box::new(data_type),
            ordered: encoding.isOrdered(),
        };
    }
    if let Some(ext_name) = metadata.remove(EXTENSION_NAME_KEY) {
        data_type = DataType::Extension {
            name: ext_name,
            metadata: metadata.remove(EXTENSION_METADATA_KEY),
            storage: Box::new(data_type),
        };
    }

    Ok(Field::new(name, data_type, field.nullable()).with_metadata(metadata))
}

fn int_from_fb(int: fb::Int<'_>) -> Result<DataType> {
    Ok(match (int.bitWidth(), int.is_signed()) {
        (8, true) => DataType::Int8,
        (16, true) => DataType::Int16,
        (32, true) => DataType::Int32,
        (64, true) => DataType::Int64,
        (8, false) => DataType::UInt8,
        (16, false) => DataType::UInt16,
        (32, false) => DataType::UInt32,
        (64, false) => DataType::UInt64,
        (bits, signed) => {
            return Err(IpcError::UnknownType(format!(
                "integer of {bits} bits (signed: {signed})"
            )));
        }
    })
}

fn time_unit_from_fb(unit: fb::TimeUnit) -> Result<TimeUnit> {
    Ok(match unit {
        fb::TimeUnit::SECOND => TimeUnit::Second,
        fb::TimeUnit::MILLISECOND => TimeUnit::Millisecond,
        fb::TimeUnit::MICROSECOND => TimeUnit::Microsecond,
        fb::TimeUnit::NANOSECOND => TimeUnit::Nanosecond,
        other => return Err(IpcError::UnknownType(format!("time unit {}", other.0))),
    })
}

fn missing(what: &str) -> IpcError {
    IpcError::InvalidData(format!("{what} type table is missing"))
}

fn one_child(mut children: Vec<Field>, what: &str) -> Result<Box<Field>> {
    if children.len() != 1 {
        return Err(IpcError::InvalidData(format!(
            "{what} must have exactly one child, found {}",
            children.len()
        )));
    }
    Ok(Box::new(children.remove(0)))
}

/// The storage type of `field`, taking ownership of its decoded children.
fn type_from_fb(field: &fb::Field<'_>, children: Vec<Field>) -> Result<DataType> {
    let dt = match field.type_type() {
        fb::Type::Null => DataType::Null,
        fb::Type::Bool => DataType::Boolean,
        fb::Type::Int => int_from_fb(field.type_as_int().ok_or_else(|| missing("Int"))?)?,
        fb::Type::FloatingPoint => {
            let fp = field.type_as_floating_point().ok_or_else(|| missing("FloatingPoint"))?;
            match fp.precision() {
                fb::Precision::HALF => DataType::Float16,
                fb::Precision::SINGLE => DataType::Float32,
                fb::Precision::DOUBLE => DataType::Float64,
                other => return Err(IpcError::UnknownType(format!("float precision {}", other.0))),
            }
        }
        fb::Type::Decimal => {
            let dec = field.type_as_decimal().ok_or_else(|| missing("Decimal"))?;
            let precision = u8::try_from(dec.precision())
                .map_err(|_| IpcError::InvalidData(format!("decimal precision {}", dec.precision())))?;
            let scale = i8::try_from(dec.scale())
                .map_err(|_| IpcError::InvalidData(format!("decimal scale {}", dec.scale())))?;
            match dec.bitWidth() {
                128 => DataType::Decimal128 { precision, scale },
                256 => DataType::Decimal256 { precision, scale },
                bits => return Err(IpcError::UnknownType(format!("decimal of {bits} bits"))),
            }
        }
        fb::Type::Date => match field.type_as_date().ok_or_else(|| missing("Date"))?.unit() {
            fb::DateUnit::DAY => DataType::Date32,
            fb::DateUnit::MILLISECOND => DataType::Date64,
            other => return Err(IpcError::UnknownType(format!("date unit {}", other.0))),
        },
        fb::Type::Time => {
            let time = field.type_as_time().ok_or_else(|| missing("Time"))?;
            let unit = time_unit_from_fb(time.unit())?;
            match time.bitWidth() {
                32 => DataType::Time32(unit),
                64 => DataType::Time64(unit),
                bits => return Err(IpcError::UnknownType(format!("time of {bits} bits"))),
            }
        }
        fb::Type::Timestamp => {
            let ts = field.type_as_timestamp().ok_or_else(|| missing("Timestamp"))?;
            DataType::Timestamp(time_unit_from_fb(ts.unit())?, ts.timezone().map(str::to_string))
        }
        fb::Type::Interval => {
            match field.type_as_interval().ok_or_else(|| missing("Interval"))?.unit() {
                fb::IntervalUnit::YEAR_MONTH => DataType::Interval(IntervalUnit::YearMonth),
                fb::IntervalUnit::DAY_TIME => DataType::Interval(IntervalUnit::DayTime),
                fb::IntervalUnit::MONTH_DAY_NANO => DataType::Interval(IntervalUnit::MonthDayNano),
                other => return Err(IpcError::UnknownType(format!("interval unit {}", other.0))),
            }
        }
        fb::Type::Duration => {
            let d = field.type_as_duration().ok_or_else(|| missing("Duration"))?;
            DataType::Duration(time_unit_from_fb(d.unit())?)
        }
        fb::Type::FixedSizeBinary => {
            let f = field.type_as_fixed_size_binary().ok_or_else(|| missing("FixedSizeBinary"))?;
            if f.byteWidth() < 0 {
                return Err(IpcError::InvalidData(format!("fixed size binary width {}", f.byteWidth())));
            }
            DataType::FixedSizeBinary(f.byteWidth())
        }
        fb::Type::Binary => DataType::Binary,
        fb::Type::LargeBinary => DataType::LargeBinary,
        fb::Type::Utf8 => DataType::Utf8,
        fb::Type::LargeUtf8 => DataType::LargeUtf8,
        fb::Type::BinaryView => DataType::BinaryView,
        fb::Type::Utf8View => DataType::Utf8View,
        fb::Type::List => DataType::List(one_child(children, "List")?),
        fb::Type::LargeList => DataType::LargeList(one_child(children, "LargeList")?),
        fb::Type::ListView => DataType::ListView(one_child(children, "ListView")?),
        fb::Type::LargeListView => DataType::LargeListView(one_child(children, "LargeListView")?),
        fb::Type::FixedSizeList => {
            let f = field.type_as_fixed_size_list().ok_or_else(|| missing("FixedSizeList"))?;
            if f.listSize() < 0 {
                return Err(IpcError::InvalidData(format!("fixed size list size {}", f.listSize())));
            }
            DataType::FixedSizeList(one_child(children, "FixedSizeList")?, f.listSize())
        }
        fb::Type::Struct_ => DataType::Struct(children),
        fb::Type::Map => {
            let m = field.type_as_map().ok_or_else(|| missing("Map"))?;
            DataType::Map(one_child(children, "Map")?, m.keysSorted())
        }
        fb::Type::Union => {
            let u = field.type_as_union().ok_or_else(|| missing("Union"))?;
            let mode = match u.mode() {
                fb::UnionMode::Sparse => UnionMode::Sparse,
                fb::UnionMode::Dense => UnionMode::Dense,
                other => return Err(IpcError::UnknownType(format!("union mode {}", other.0))),
            };
            let type_ids: Vec<i32> = match u.typeIds() {
                Some(ids) => ids.iter().collect(),
                None => (0..children.len() as i32).collect(),
            };
            if type_ids.len() != children.len() {
                return Err(IpcError::InvalidData(format!(
                    "union has {} type ids for {} children",
                    type_ids.len(),
                    children.len()
                )));
            }
            DataType::Union(children, type_ids, mode)
        }
        fb::Type::RunEndEncoded => {
            if children.len() != 2 {
                return Err(IpcError::InvalidData(format!(
                    "run-end encoded type needs two children, found {}",
                    children.len()
                )));
            }
            let mut it = children.into_iter();
            match (it.next(), it.next()) {
                (Some(run_ends), Some(values)) => {
                    if !matches!(run_ends.data_type, DataType::Int16 | DataType::Int32 | DataType::Int64) {
                        return Err(IpcError::InvalidData(format!(
                            "run ends must be Int16, Int32 or Int64, found {}",
                            run_ends.data_type
                        )));
                    }
                    DataType::RunEndEncoded(Box::new(run_ends), Box::new(values))
                }
                _ => return Err(IpcError::InvalidData("run-end encoded children".into())),
            }
        }
        other => {
            return Err(IpcError::UnknownType(format!(
                "type tag {} on field {:?}",
                other.0,
                field.name().unwrap_or_default()
            )));
        }
    };
    Ok(dt)
}

#[cfg(test)]
mod tests {
    use flatbuffers::FlatBufferBuilder;

    use super::*;
    use crate::models::encoders::ipc::schema::build_schema;

    fn round_trip(schema: &Schema, endianness: Endianness) -> Schema {
        let mut fbb = FlatBufferBuilder::new();
        let root = build_schema(&mut fbb, schema, endianness).unwrap();
        fbb.finish(root, None);
        let parsed = flatbuffers::root::<fb::Schema>(fbb.finished_data()).unwrap();
        schema_from_fb(parsed).unwrap()
    }

    #[test]
    fn test_nested_types_survive() {
        let entries = Field::new(
            "entries",
            DataType::Struct(vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("value", DataType::Float64, true),
            ]),
            false,
        );
        let schema = Schema::new(vec![
            Field::new("ts", DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())), true),
            Field::new("l", DataType::list_of(DataType::Int64), true),
            Field::new("m", DataType::Map(Box::new(entries), false), true),
            Field::new(
                "u",
                DataType::Union(
                    vec![
                        Field::new("i", DataType::Int32, true),
                        Field::new("s", DataType::Utf8, true),
                    ],
                    vec![5, 7],
                    UnionMode::Dense,
                ),
                true,
            ),
            Field::new(
                "r",
                DataType::RunEndEncoded(
                    Box::new(Field::new("run_ends", DataType::Int32, false)),
                    Box::new(Field::new("values", DataType::Utf8, true)),
                ),
                true,
            ),
            Field::new("d", DataType::Decimal256 { precision: 40, scale: -2 }, true),
        ])
        .with_metadata(Metadata::from([("origin".to_string(), "test".to_string())]));
        let back = round_trip(&schema, Endianness::Big);
        assert_eq!(back, schema);
        assert_eq!(back.endianness, Endianness::Big);
        assert_eq!(back.metadata.get("origin").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_dictionary_and_extension_layers() {
        let ext = DataType::Extension {
            name: "tag".into(),
            metadata: None,
            storage: Box::new(DataType::dictionary(3, DataType::Int8, DataType::Utf8)),
        };
        let schema = Schema::new(vec![Field::new("t", ext.clone(), true)]);
        let back = round_trip(&schema, Endianness::Little);
        assert_eq!(back.fields[0].data_type, ext);
        assert!(back.fields[0].metadata.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let mut dt = DataType::Int32;
        for _ in 0..MAX_NESTING_DEPTH {
            dt = DataType::list_of(dt);
        }
        let schema = Schema::new(vec![Field::new("deep", dt, true)]);
        let mut fbb = FlatBufferBuilder::new();
        assert!(matches!(
            build_schema(&mut fbb, &schema, Endianness::Little),
            Err(IpcError::NestingDepthExceeded(_))
        ));
    }
}
