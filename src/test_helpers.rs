//! # Test Helpers - *Array and Batch Generators*
//!
//! Deterministic 4-row fixtures spanning the supported logical types, plus in-memory
//! round trips through the file and stream writers.

use std::io::Cursor;
use std::sync::Arc;

use crate::error::Result;
use crate::models::readers::ipc::file_reader::FileReader;
use crate::models::readers::ipc::stream_reader::StreamReader;
use crate::models::types::array_data::{ArrayData, Buffer};
use crate::models::types::datatype::{DataType, IntervalUnit, TimeUnit};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::{Field, Schema};
use crate::models::writers::ipc::file_writer::FileWriter;
use crate::models::writers::ipc::stream_writer::StreamWriter;
use crate::options::{ReadOptions, WriteOptions};

/// Validity bitmap for `[valid, null, valid, valid]`.
fn validity_1011() -> Option<Buffer> {
    Some(Buffer::from(vec![0b0000_1101u8]))
}

/// `(field, column)` pairs, one per covered type.
pub(crate) fn all_types_columns() -> Vec<(Field, ArrayData)> {
    let dict_values = Arc::new(ArrayData::from_strs(&["apple", "banana", "pear"]));
    let list_values = ArrayData::from_options(&[Some(1i32), Some(2), None, Some(4), Some(5)]);
    let item = Field::new("item", DataType::Int32, true);
    let struct_fields = vec![
        Field::new("x", DataType::Float64, false),
        Field::new("y", DataType::Utf8, true),
    ];
    let ts = DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()));

    vec![
        (Field::new("int8", DataType::Int8, false), ArrayData::from_primitive(&[1i8, -2, 3, -4])),
        (Field::new("int16", DataType::Int16, false), ArrayData::from_primitive(&[100i16, -200, 300, -400])),
        (
            Field::new("int32", DataType::Int32, true),
            ArrayData::from_options(&[Some(1i32), None, Some(3), Some(4)]),
        ),
        (Field::new("int64", DataType::Int64, false), ArrayData::from_primitive(&[i64::MIN, -1, 0, i64::MAX])),
        (Field::new("uint8", DataType::UInt8, false), ArrayData::from_primitive(&[0u8, 1, 254, 255])),
        (Field::new("uint16", DataType::UInt16, false), ArrayData::from_primitive(&[0u16, 1, 2, u16::MAX])),
        (Field::new("uint32", DataType::UInt32, false), ArrayData::from_primitive(&[7u32, 8, 9, u32::MAX])),
        (Field::new("uint64", DataType::UInt64, false), ArrayData::from_primitive(&[0u64, 1, 2, u64::MAX])),
        (Field::new("float32", DataType::Float32, false), ArrayData::from_primitive(&[1.5f32, -2.25, 0.0, 8.0])),
        (
            Field::new("float64", DataType::Float64, true),
            ArrayData::from_options(&[Some(1.1f64), Some(2.2), None, Some(4.4)]),
        ),
        (
            Field::new("bool", DataType::Boolean, true),
            ArrayData::from_bools(&[Some(true), None, Some(false), Some(true)]),
        ),
        (
            Field::new("utf8", DataType::Utf8, true),
            ArrayData::from_str_options(&[Some("alpha"), None, Some(""), Some("delta")]),
        ),
        (
            Field::new("large_utf8", DataType::LargeUtf8, true),
            ArrayData::from_large_str_options(&[Some("a"), Some("bb"), None, Some("dddd")]),
        ),
        (
            Field::new("binary", DataType::Binary, true),
            ArrayData::from_binary(&[Some(&[0u8, 1][..]), None, Some(&[][..]), Some(&[255u8][..])]),
        ),
        (
            Field::new("utf8_view", DataType::Utf8View, true),
            ArrayData::from_string_views(&[Some("short"), None, Some("a string past twelve bytes"), Some("x")]),
        ),
        (
            Field::new("date32", DataType::Date32, false),
            ArrayData::primitive_with_type(DataType::Date32, &[0i32, 1, 19_000, -1], None),
        ),
        (
            Field::new("timestamp", ts.clone(), true),
            ArrayData::primitive_with_type(ts, &[1_700_000_000_000i64, 0, 5, 6], validity_1011()),
        ),
        (
            Field::new("interval_ym", DataType::Interval(IntervalUnit::YearMonth), false),
            ArrayData::primitive_with_type(DataType::Interval(IntervalUnit::YearMonth), &[1i32, 12, 24, -3], None),
        ),
        (
            Field::new("decimal", DataType::Decimal128 { precision: 10, scale: 2 }, false),
            ArrayData::primitive_with_type(
                DataType::Decimal128 { precision: 10, scale: 2 },
                &[12_345i128, -1, 0, 99_999],
                None,
            ),
        ),
        (
            Field::new("fixed", DataType::FixedSizeBinary(4), true),
            ArrayData::primitive_with_type(
                DataType::FixedSizeBinary(4),
                &[[1u8, 2, 3, 4], [0; 4], [9, 9, 9, 9], [4, 3, 2, 1]],
                validity_1011(),
            ),
        ),
        (
            Field::new("list", DataType::List(Box::new(item.clone())), true),
            ArrayData::list(item, &[0, 2, 2, 3, 5], list_values, Some(&[true, false, true, true]))
                .expect("list fixture"),
        ),
        (
            Field::new("struct", DataType::Struct(struct_fields.clone()), true),
            ArrayData::struct_array(
                struct_fields,
                vec![
                    ArrayData::from_primitive(&[0.5f64, 1.5, 2.5, 3.5]),
                    ArrayData::from_str_options(&[Some("p"), Some("q"), None, Some("s")]),
                ],
                Some(&[true, true, false, true]),
            )
            .expect("struct fixture"),
        ),
        (Field::new("null", DataType::Null, true), ArrayData::new_null(4)),
        (
            Field::new("dict", DataType::dictionary(0, DataType::Int32, DataType::Utf8), true),
            ArrayData::dictionary_array(
                0,
                ArrayData::from_options(&[Some(2i32), Some(0), None, Some(1)]),
                dict_values,
            )
            .expect("dictionary fixture"),
        ),
    ]
}

/// One 4-row batch with a column per covered type.
pub(crate) fn all_types_batch() -> RecordBatch {
    let (fields, columns): (Vec<Field>, Vec<ArrayData>) = all_types_columns().into_iter().unzip();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("all types batch")
}

/// Writes `batches` as a file into memory and reads every record back.
pub(crate) fn roundtrip_file(
    batches: &[RecordBatch],
    write: WriteOptions,
    read: ReadOptions,
) -> Result<Vec<RecordBatch>> {
    let schema = Arc::clone(&batches[0].schema);
    let mut w = FileWriter::try_new(Cursor::new(Vec::new()), schema, write)?;
    for b in batches {
        w.write(b)?;
    }
    let bytes = w.into_inner()?.into_inner();
    let r = FileReader::try_new(bytes, read)?;
    r.batches().collect()
}

/// Writes `batches` as a stream into memory and reads every record back.
pub(crate) fn roundtrip_stream(
    batches: &[RecordBatch],
    write: WriteOptions,
    read: ReadOptions,
) -> Result<Vec<RecordBatch>> {
    let schema = Arc::clone(&batches[0].schema);
    let mut w = StreamWriter::try_new(Vec::new(), schema, write)?;
    for b in batches {
        w.write(b)?;
    }
    let bytes = w.into_inner()?;
    StreamReader::try_new(Cursor::new(bytes), read)?.collect()
}
