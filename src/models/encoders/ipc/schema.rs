//! # IPC FlatBuffers Builders (internal)
//!
//! Helpers that construct FlatBuffer-encoded Arrow IPC artefacts used by the encoder:
//! schema messages, record batches, dictionary batches, and the file footer with block metadata.
//!
//! Follows the IPC protocol as outlined
//! [here](https://arrow.apache.org/docs/format/Columnar.html#serialisation-and-interprocess-communication-ipc).
//!
//! Dictionary-encoded fields are written the Arrow way: the field's type is the dictionary
//! *value* type, the `dictionary` table carries id and index type, and children are the
//! value type's children. Extension types are written as their storage type plus the
//! `ARROW:extension:*` metadata keys.

use arrow_ipc as fb;
use flatbuffers::{FlatBufferBuilder, ForwardsUOffset, UnionWIPOffset, Vector, WIPOffset};

use crate::compression::CompressionCodec;
use crate::constants::{EXTENSION_METADATA_KEY, EXTENSION_NAME_KEY, MAX_NESTING_DEPTH};
use crate::error::{IpcError, Result};
use crate::models::frames::ipc_message::FooterBlockMeta;
use crate::models::types::datatype::{
    DataType, Endianness, IntervalUnit, MetadataVersion, TimeUnit, UnionMode,
};
use crate::models::types::schema::{Field, Metadata, Schema};

/// Field nodes and buffer descriptors of one encoded record or dictionary batch.
pub(crate) struct RecordBatchMeta<'a> {
    pub length: usize,
    pub nodes: &'a [fb::FieldNode],
    pub buffers: &'a [fb::Buffer],
    pub variadic_counts: &'a [i64],
    pub codec: CompressionCodec,
}

/// Build the Arrow schema as a FlatBuffer-encoded IPC message.
pub(crate) fn build_schema_message(
    fbb: &mut FlatBufferBuilder<'static>,
    schema: &Schema,
    version: MetadataVersion,
    endianness: Endianness,
    custom_metadata: &Metadata,
) -> Result<Vec<u8>> {
    fbb.reset();
    let schema_obj = build_schema(fbb, schema, endianness)?;
    let md = build_metadata(fbb, custom_metadata);
    Ok(finish_message(
        fbb,
        version,
        fb::MessageHeader::Schema,
        schema_obj.as_union_value(),
        0,
        md,
    ))
}

/// Build an Arrow record batch message.
pub(crate) fn build_record_batch_message(
    fbb: &mut FlatBufferBuilder<'static>,
    version: MetadataVersion,
    batch: &RecordBatchMeta<'_>,
    body_len: usize,
) -> Vec<u8> {
    fbb.reset();
    let rb = build_record_batch(fbb, batch);
    finish_message(
        fbb,
        version,
        fb::MessageHeader::RecordBatch,
        rb.as_union_value(),
        body_len,
        None,
    )
}

/// Build a dictionary batch message wrapping a single-column record batch.
pub(crate) fn build_dictionary_message(
    fbb: &mut FlatBufferBuilder<'static>,
    version: MetadataVersion,
    id: i64,
    is_delta: bool,
    batch: &RecordBatchMeta<'_>,
    body_len: usize,
) -> Vec<u8> {
    fbb.reset();
    let rb = build_record_batch(fbb, batch);
    let dict = fb::DictionaryBatch::create(
        fbb,
        &fb::DictionaryBatchArgs {
            id,
            data: Some(rb),
            isDelta: is_delta,
        },
    );
    finish_message(
        fbb,
        version,
        fb::MessageHeader::DictionaryBatch,
        dict.as_union_value(),
        body_len,
        None,
    )
}

/// Build the file footer: schema plus dictionary and record blocks in write order.
pub(crate) fn build_footer(
    fbb: &mut FlatBufferBuilder<'static>,
    version: MetadataVersion,
    schema: &Schema,
    endianness: Endianness,
    dictionaries: &[FooterBlockMeta],
    records: &[FooterBlockMeta],
    custom_metadata: &Metadata,
) -> Result<Vec<u8>> {
    fbb.reset();
    let schema_obj = build_schema(fbb, schema, endianness)?;
    let dict_blocks: Vec<fb::Block> = dictionaries.iter().map(|b| b.to_fb()).collect();
    let record_blocks: Vec<fb::Block> = records.iter().map(|b| b.to_fb()).collect();
    let dict_vec = fbb.create_vector(&dict_blocks);
    let record_vec = fbb.create_vector(&record_blocks);
    let md = build_metadata(fbb, custom_metadata);
    let footer = fb::Footer::create(
        fbb,
        &fb::FooterArgs {
            version: version_to_fb(version),
            schema: Some(schema_obj),
            dictionaries: Some(dict_vec),
            recordBatches: Some(record_vec),
            custom_metadata: md,
        },
    );
    fbb.finish(footer, None);
    Ok(fbb.finished_data().to_vec())
}

fn finish_message(
    fbb: &mut FlatBufferBuilder<'static>,
    version: MetadataVersion,
    header_type: fb::MessageHeader,
    header: WIPOffset<UnionWIPOffset>,
    body_len: usize,
    custom_metadata: Option<WIPOffset<Vector<'static, ForwardsUOffset<fb::KeyValue<'static>>>>>,
) -> Vec<u8> {
    let msg = fb::Message::create(
        fbb,
        &fb::MessageArgs {
            version: version_to_fb(version),
            header_type,
            header: Some(header),
            bodyLength: body_len as i64,
            custom_metadata,
        },
    );
    fbb.finish(msg, None);
    fbb.finished_data().to_vec()
}

fn build_record_batch<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    batch: &RecordBatchMeta<'_>,
) -> WIPOffset<fb::RecordBatch<'fbb>> {
    let nodes = fbb.create_vector(batch.nodes);
    let buffers = fbb.create_vector(batch.buffers);
    let variadic = if batch.variadic_counts.is_empty() {
        None
    } else {
        Some(fbb.create_vector(batch.variadic_counts))
    };
    let compression = batch.codec.to_fb().map(|codec| {
        fb::BodyCompression::create(
            fbb,
            &fb::BodyCompressionArgs {
                codec,
                method: fb::BodyCompressionMethod::BUFFER,
            },
        )
    });
    fb::RecordBatch::create(
        fbb,
        &fb::RecordBatchArgs {
            length: batch.length as i64,
            nodes: Some(nodes),
            buffers: Some(buffers),
            compression,
            variadicBufferCounts: variadic,
        },
    )
}

/// Build the flatbuffer `Schema` table.
pub(crate) fn build_schema<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    schema: &Schema,
    endianness: Endianness,
) -> Result<WIPOffset<fb::Schema<'fbb>>> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        fields.push(build_field(fbb, field, 1)?);
    }
    let fields = fbb.create_vector(&fields);
    let md = build_metadata(fbb, &schema.metadata);
    Ok(fb::Schema::create(
        fbb,
        &fb::SchemaArgs {
            endianness: match endianness {
                Endianness::Little => fb::Endianness::Little,
                Endianness::Big => fb::Endianness::Big,
            },
            fields: Some(fields),
            custom_metadata: md,
            features: None,
        },
    ))
}

/// Build a single field, unwrapping extension and dictionary layers.
fn build_field<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    field: &Field,
    depth: usize,
) -> Result<WIPOffset<fb::Field<'fbb>>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(IpcError::NestingDepthExceeded(MAX_NESTING_DEPTH));
    }
    let mut metadata = field.metadata.clone();
    let mut dt = strip_extension(&field.data_type, &mut metadata);

    let mut dictionary = None;
    if let DataType::Dictionary {
        id,
        index,
        value,
        ordered,
    } = dt
    {
        dictionary = Some((*id, index.as_ref(), *ordered));
        dt = strip_extension(value, &mut metadata);
    }

    let mut children = Vec::new();
    for child in dt.children() {
        children.push(build_field(fbb, child, depth + 1)?);
    }
    let children = fbb.create_vector(&children);
    let name = fbb.create_string(&field.name);
    let (type_type, type_) = build_type(fbb, dt)?;

    let dictionary = match dictionary {
        Some((id, index, ordered)) => {
            let index_type = build_int(fbb, index)?;
            Some(fb::DictionaryEncoding::create(
                fbb,
                &fb::DictionaryEncodingArgs {
                    id,
                    indexType: Some(index_type),
                    isOrdered: ordered,
                    dictionaryKind: fb::DictionaryKind::DenseArray,
                },
            ))
        }
        None => None,
    };
    let custom_metadata = build_metadata(fbb, &metadata);

    Ok(fb::Field::create(
        fbb,
        &fb::FieldArgs {
            name: Some(name),
            nullable: field.nullable,
            type_type,
            type_: Some(type_),
            dictionary,
            children: Some(children),
            custom_metadata,
        },
    ))
}

/// Moves extension name and metadata into `metadata`, returning the storage type.
fn strip_extension<'a>(mut dt: &'a DataType, metadata: &mut Metadata) -> &'a DataType {
    while let DataType::Extension {
        name,
        metadata: ext_md,
        storage,
    } = dt
    {
        metadata.insert(EXTENSION_NAME_KEY.to_string(), name.clone());
        if let Some(md) = ext_md {
            metadata.insert(EXTENSION_METADATA_KEY.to_string(), md.clone());
        }
        dt = storage;
    }
    dt
}

fn build_metadata<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    metadata: &Metadata,
) -> Option<WIPOffset<Vector<'fbb, ForwardsUOffset<fb::KeyValue<'fbb>>>>> {
    if metadata.is_empty() {
        return None;
    }
    let mut entries = Vec::with_capacity(metadata.len());
    for (k, v) in metadata {
        let key = fbb.create_string(k);
        let value = fbb.create_string(v);
        entries.push(fb::KeyValue::create(
            fbb,
            &fb::KeyValueArgs {
                key: Some(key),
                value: Some(value),
            },
        ));
    }
    Some(fbb.create_vector(&entries))
}

fn build_int<'fbb>(fbb: &mut FlatBufferBuilder<'fbb>, dt: &DataType) -> Result<WIPOffset<fb::Int<'fbb>>> {
    let (bit_width, is_signed) = match dt {
        DataType::Int8 => (8, true),
        DataType::Int16 => (16, true),
        DataType::Int32 => (32, true),
        DataType::Int64 => (64, true),
        DataType::UInt8 => (8, false),
        DataType::UInt16 => (16, false),
        DataType::UInt32 => (32, false),
        DataType::UInt64 => (64, false),
        other => {
            return Err(IpcError::InvalidArgument(format!(
                "{other} is not an integer type"
            )));
        }
    };
    Ok(fb::Int::create(
        fbb,
        &fb::IntArgs {
            bitWidth: bit_width,
            is_signed,
        },
    ))
}

/// The flatbuffer type tag and table for a non-dictionary, non-extension type.
fn build_type<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    dt: &DataType,
) -> Result<(fb::Type, WIPOffset<UnionWIPOffset>)> {
    use DataType::*;
    Ok(match dt {
        Null => (fb::Type::Null, fb::Null::create(fbb, &fb::NullArgs {}).as_union_value()),
        Boolean => (fb::Type::Bool, fb::Bool::create(fbb, &fb::BoolArgs {}).as_union_value()),
        Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 => {
            (fb::Type::Int, build_int(fbb, dt)?.as_union_value())
        }
        Float16 | Float32 | Float64 => {
            let precision = match dt {
                Float16 => fb::Precision::HALF,
                Float32 => fb::Precision::SINGLE,
                _ => fb::Precision::DOUBLE,
            };
            let fp = fb::FloatingPoint::create(fbb, &fb::FloatingPointArgs { precision });
            (fb::Type::FloatingPoint, fp.as_union_value())
        }
        Decimal128 { precision, scale } | Decimal256 { precision, scale } => {
            let bit_width = if matches!(dt, Decimal128 { .. }) { 128 } else { 256 };
            let dec = fb::Decimal::create(
                fbb,
                &fb::DecimalArgs {
                    precision: *precision as i32,
                    scale: *scale as i32,
                    bitWidth: bit_width,
                },
            );
            (fb::Type::Decimal, dec.as_union_value())
        }
        Date32 | Date64 => {
            let unit = if matches!(dt, Date32) {
                fb::DateUnit::DAY
            } else {
                fb::DateUnit::MILLISECOND
            };
            let date = fb::Date::create(fbb, &fb::DateArgs { unit });
            (fb::Type::Date, date.as_union_value())
        }
        Time32(unit) | Time64(unit) => {
            let bit_width = if matches!(dt, Time32(_)) { 32 } else { 64 };
            let time = fb::Time::create(
                fbb,
                &fb::TimeArgs {
                    unit: time_unit_to_fb(*unit),
                    bitWidth: bit_width,
                },
            );
            (fb::Type::Time, time.as_union_value())
        }
        Timestamp(unit, tz) => {
            let timezone = tz.as_deref().map(|tz| fbb.create_string(tz));
            let ts = fb::Timestamp::create(
                fbb,
                &fb::TimestampArgs {
                    unit: time_unit_to_fb(*unit),
                    timezone,
                },
            );
            (fb::Type::Timestamp, ts.as_union_value())
        }
        Interval(unit) => {
            let unit = match unit {
                IntervalUnit::YearMonth => fb::IntervalUnit::YEAR_MONTH,
                IntervalUnit::DayTime => fb::IntervalUnit::DAY_TIME,
                IntervalUnit::MonthDayNano => fb::IntervalUnit::MONTH_DAY_NANO,
            };
            let iv = fb::Interval::create(fbb, &fb::IntervalArgs { unit });
            (fb::Type::Interval, iv.as_union_value())
        }
        Duration(unit) => {
            let d = fb::Duration::create(
                fbb,
                &fb::DurationArgs {
                    unit: time_unit_to_fb(*unit),
                },
            );
            (fb::Type::Duration, d.as_union_value())
        }
        FixedSizeBinary(width) => {
            let f = fb::FixedSizeBinary::create(fbb, &fb::FixedSizeBinaryArgs { byteWidth: *width });
            (fb::Type::FixedSizeBinary, f.as_union_value())
        }
        Binary => (fb::Type::Binary, fb::Binary::create(fbb, &fb::BinaryArgs {}).as_union_value()),
        LargeBinary => (
            fb::Type::LargeBinary,
            fb::LargeBinary::create(fbb, &fb::LargeBinaryArgs {}).as_union_value(),
        ),
        Utf8 => (fb::Type::Utf8, fb::Utf8::create(fbb, &fb::Utf8Args {}).as_union_value()),
        LargeUtf8 => (
            fb::Type::LargeUtf8,
            fb::LargeUtf8::create(fbb, &fb::LargeUtf8Args {}).as_union_value(),
        ),
        BinaryView => (
            fb::Type::BinaryView,
            fb::BinaryView::create(fbb, &fb::BinaryViewArgs {}).as_union_value(),
        ),
        Utf8View => (
            fb::Type::Utf8View,
            fb::Utf8View::create(fbb, &fb::Utf8ViewArgs {}).as_union_value(),
        ),
        List(_) => (fb::Type::List, fb::List::create(fbb, &fb::ListArgs {}).as_union_value()),
        LargeList(_) => (
            fb::Type::LargeList,
            fb::LargeList::create(fbb, &fb::LargeListArgs {}).as_union_value(),
        ),
        ListView(_) => (
            fb::Type::ListView,
            fb::ListView::create(fbb, &fb::ListViewArgs {}).as_union_value(),
        ),
        LargeListView(_) => (
            fb::Type::LargeListView,
            fb::LargeListView::create(fbb, &fb::LargeListViewArgs {}).as_union_value(),
        ),
        FixedSizeList(_, size) => {
            let f = fb::FixedSizeList::create(fbb, &fb::FixedSizeListArgs { listSize: *size });
            (fb::Type::FixedSizeList, f.as_union_value())
        }
        Struct(_) => (
            fb::Type::Struct_,
            fb::Struct_::create(fbb, &fb::Struct_Args {}).as_union_value(),
        ),
        Map(_, keys_sorted) => {
            let m = fb::Map::create(
                fbb,
                &fb::MapArgs {
                    keysSorted: *keys_sorted,
                },
            );
            (fb::Type::Map, m.as_union_value())
        }
        Union(_, type_ids, mode) => {
            let ids = if type_ids.is_empty() {
                None
            } else {
                Some(fbb.create_vector(type_ids))
            };
            let u = fb::Union::create(
                fbb,
                &fb::UnionArgs {
                    mode: match mode {
                        UnionMode::Sparse => fb::UnionMode::Sparse,
                        UnionMode::Dense => fb::UnionMode::Dense,
                    },
                    typeIds: ids,
                },
            );
            (fb::Type::Union, u.as_union_value())
        }
        RunEndEncoded(..) => (
            fb::Type::RunEndEncoded,
            fb::RunEndEncoded::create(fbb, &fb::RunEndEncodedArgs {}).as_union_value(),
        ),
        Dictionary { .. } => {
            return Err(IpcError::InvalidArgument(
                "a dictionary value type cannot itself be dictionary encoded".into(),
            ));
        }
        Extension { storage, .. } => return build_type(fbb, storage),
    })
}

pub(crate) fn version_to_fb(version: MetadataVersion) -> fb::MetadataVersion {
    match version {
        MetadataVersion::V1 => fb::MetadataVersion::V1,
        MetadataVersion::V2 => fb::MetadataVersion::V2,
        MetadataVersion::V3 => fb::MetadataVersion::V3,
        MetadataVersion::V4 => fb::MetadataVersion::V4,
        MetadataVersion::V5 => fb::MetadataVersion::V5,
    }
}

fn time_unit_to_fb(unit: TimeUnit) -> fb::TimeUnit {
    match unit {
        TimeUnit::Second => fb::TimeUnit::SECOND,
        TimeUnit::Millisecond => fb::TimeUnit::MILLISECOND,
        TimeUnit::Microsecond => fb::TimeUnit::MICROSECOND,
        TimeUnit::Nanosecond => fb::TimeUnit::NANOSECOND,
    }
}
