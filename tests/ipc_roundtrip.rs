#[cfg(test)]
mod integration {
    use std::io::{Cursor, Seek, SeekFrom, Write};
    use std::sync::Arc;

    use arrowpipe::constants::{ARROW_MAGIC_NUMBER, ARROW_MAGIC_NUMBER_PADDED};
    use arrowpipe::traits::read_at::SeekableSource;
    use arrowpipe::{
        ArrayData, Buffer, DataType, Endianness, Field, FileReader, FileWriter, FileWriter64, IpcError, Metadata,
        ReadOptions, RecordBatch, Schema, StreamReader, StreamWriter, UnionMode, WriteOptions,
    };
    use tempfile::NamedTempFile;

    fn int32_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]))
    }

    fn file_bytes(schema: Arc<Schema>, batches: &[RecordBatch], options: WriteOptions) -> Vec<u8> {
        let mut w = FileWriter::try_new(Vec::new(), schema, options).unwrap();
        for b in batches {
            w.write(b).unwrap();
        }
        w.into_inner().unwrap()
    }

    fn stream_bytes(schema: Arc<Schema>, batches: &[RecordBatch], options: WriteOptions) -> Vec<u8> {
        let mut w = StreamWriter::try_new(Vec::new(), schema, options).unwrap();
        for b in batches {
            w.write(b).unwrap();
        }
        w.into_inner().unwrap()
    }

    /// Every block and every body buffer starts on an 8-byte boundary.
    fn assert_aligned(bytes: &[u8]) {
        let len = bytes.len();
        let footer_len = u32::from_le_bytes(bytes[len - 10..len - 6].try_into().unwrap()) as usize;
        let footer = arrow_ipc::root_as_footer(&bytes[len - 10 - footer_len..len - 10]).unwrap();
        let blocks = footer
            .recordBatches()
            .into_iter()
            .flatten()
            .chain(footer.dictionaries().into_iter().flatten());
        for block in blocks {
            assert_eq!(block.offset() % 8, 0);
            assert_eq!(block.metaDataLength() % 8, 0);
            assert_eq!(block.bodyLength() % 8, 0);
            let start = block.offset() as usize + 8;
            let meta_len = i32::from_le_bytes(bytes[start - 4..start].try_into().unwrap()) as usize;
            let message = arrow_ipc::root_as_message(&bytes[start..start + meta_len]).unwrap();
            let buffers = message
                .header_as_record_batch()
                .or_else(|| message.header_as_dictionary_batch().and_then(|d| d.data()))
                .and_then(|r| r.buffers())
                .unwrap();
            for buf in buffers {
                assert_eq!(buf.offset() % 8, 0, "buffer offset {}", buf.offset());
            }
        }
    }

    #[test]
    fn empty_stream_yields_schema_then_eof() {
        let bytes = stream_bytes(int32_schema(), &[], WriteOptions::default());
        let mut reader = StreamReader::try_new(Cursor::new(bytes), ReadOptions::default()).unwrap();
        assert_eq!(reader.schema().fields, int32_schema().fields);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn single_primitive_record_file() {
        let batch = RecordBatch::try_new(int32_schema(), vec![ArrayData::from_primitive(&[1i32, 2, 3])]).unwrap();
        let bytes = file_bytes(int32_schema(), &[batch], WriteOptions::default());
        assert_eq!(&bytes[..8], ARROW_MAGIC_NUMBER_PADDED);
        assert_eq!(&bytes[bytes.len() - 6..], ARROW_MAGIC_NUMBER);
        assert_aligned(&bytes);

        let reader = FileReader::try_new(bytes, ReadOptions::default()).unwrap();
        assert_eq!(reader.num_records(), 1);
        let got = reader.read_record(0).unwrap();
        let col = got.column(0).unwrap();
        assert_eq!(col.len, 3);
        assert_eq!(col.null_count, 0);
        assert!(col.validity().is_none());
        assert_eq!(col.values::<i32>().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn nullable_values_keep_their_bitmap() {
        let batch = RecordBatch::try_new(
            int32_schema(),
            vec![ArrayData::from_options(&[Some(10i32), None, Some(30), None])],
        )
        .unwrap();
        let bytes = file_bytes(int32_schema(), &[batch], WriteOptions::default());
        let got = FileReader::try_new(bytes, ReadOptions::default()).unwrap().read_record(0).unwrap();
        let col = got.column(0).unwrap();
        assert_eq!(col.null_count, 2);
        assert_eq!(col.validity().unwrap()[0] & 0x0F, 0b0000_0101);
        assert_eq!(col.values::<i32>()[0], 10);
        assert_eq!(col.values::<i32>()[2], 30);
        assert!(col.is_null(1) && col.is_null(3));
    }

    fn dict_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::new(
            "a",
            DataType::dictionary(0, DataType::Int32, DataType::Utf8),
            true,
        )]))
    }

    fn dict_batch(indices: &[i32], values: &Arc<ArrayData>) -> RecordBatch {
        RecordBatch::try_new(
            dict_schema(),
            vec![ArrayData::dictionary_array(0, ArrayData::from_primitive(indices), Arc::clone(values)).unwrap()],
        )
        .unwrap()
    }

    fn strings(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|s| Some(s.to_string())).collect()
    }

    #[test]
    fn dictionary_column_resolves_values() {
        let values = Arc::new(ArrayData::from_strs(&["x", "y", "z"]));
        let bytes = file_bytes(dict_schema(), &[dict_batch(&[2, 0, 1, 2], &values)], WriteOptions::default());
        assert_aligned(&bytes);
        let reader = FileReader::try_new(bytes, ReadOptions::default()).unwrap();
        assert_eq!(reader.num_dictionaries(), 1);
        let got = reader.read_record(0).unwrap();
        assert_eq!(got.column(0).unwrap().string_values(), strings(&["z", "x", "y", "z"]));
    }

    #[test]
    fn dictionary_delta_in_stream() {
        let first = Arc::new(ArrayData::from_strs(&["x", "y"]));
        let grown = Arc::new(ArrayData::from_strs(&["x", "y", "z"]));
        let batches = [dict_batch(&[0, 1], &first), dict_batch(&[2], &grown)];

        let mut w = StreamWriter::try_new(Vec::new(), dict_schema(), WriteOptions::default()).unwrap();
        for b in &batches {
            w.write(b).unwrap();
        }
        assert_eq!(w.stats().num_dictionary_deltas, 1);
        let bytes = w.into_inner().unwrap();

        let reader = StreamReader::try_new(Cursor::new(bytes), ReadOptions::default()).unwrap();
        let mut all = Vec::new();
        for batch in reader {
            all.extend(batch.unwrap().column(0).unwrap().string_values());
        }
        assert_eq!(all, strings(&["x", "y", "z"]));
    }

    #[test]
    fn file_dictionary_replacement_is_refused() {
        let a = Arc::new(ArrayData::from_strs(&["x", "y"]));
        let b = Arc::new(ArrayData::from_strs(&["q"]));
        let mut w = FileWriter::try_new(Vec::new(), dict_schema(), WriteOptions::default()).unwrap();
        w.write(&dict_batch(&[0], &a)).unwrap();
        assert!(matches!(
            w.write(&dict_batch(&[0], &b)),
            Err(IpcError::UnsupportedDictionaryReplacement(0))
        ));
    }

    #[test]
    fn opposite_endian_file() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int16, false)]));
        let batch = RecordBatch::try_new(Arc::clone(&schema), vec![ArrayData::from_primitive(&[1i16, 2])]).unwrap();
        let foreign = Endianness::native().flip();
        let bytes = file_bytes(schema, &[batch], WriteOptions::default().with_endianness(foreign));

        let raw = FileReader::try_new(bytes.clone(), ReadOptions::default()).unwrap();
        assert_eq!(raw.schema().endianness, foreign);
        let col = raw.read_record(0).unwrap().columns[0].clone();
        assert_eq!(col.values::<i16>().as_ref(), &[0x0100, 0x0200]);

        let native = FileReader::try_new(bytes, ReadOptions::default().with_ensure_native_endian(true)).unwrap();
        assert_eq!(native.schema().endianness, Endianness::native());
        let col = native.read_record(0).unwrap().columns[0].clone();
        assert_eq!(col.values::<i16>().as_ref(), &[1, 2]);
    }

    #[test]
    fn close_twice_and_empty_file() {
        let mut w = FileWriter::try_new(Vec::new(), int32_schema(), WriteOptions::default()).unwrap();
        w.finish().unwrap();
        let first = w.get_ref().clone();
        w.finish().unwrap();
        assert_eq!(w.get_ref(), &first);
        let reader = FileReader::try_new(first, ReadOptions::default()).unwrap();
        assert_eq!(reader.num_records(), 0);
    }

    #[test]
    fn truncated_file_is_not_arrow() {
        let batch = RecordBatch::try_new(int32_schema(), vec![ArrayData::from_primitive(&[1i32])]).unwrap();
        let mut w = FileWriter::try_new(Vec::new(), int32_schema(), WriteOptions::default()).unwrap();
        w.write(&batch).unwrap();
        // dropped without finish: no footer
        let bytes = w.get_ref().clone();
        assert!(matches!(
            FileReader::try_new(bytes, ReadOptions::default()),
            Err(IpcError::NotArrowFile(_))
        ));
    }

    #[test]
    fn expected_schema_mismatch() {
        let bytes = file_bytes(int32_schema(), &[], WriteOptions::default());
        let other = Arc::new(Schema::new(vec![Field::new("b", DataType::Int32, true)]));
        assert!(matches!(
            FileReader::try_new(bytes, ReadOptions::default().with_schema(other)),
            Err(IpcError::SchemaMismatch(_))
        ));
    }

    fn nested_batch() -> RecordBatch {
        let entries = Field::new(
            "entries",
            DataType::Struct(vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("value", DataType::Int64, true),
            ]),
            false,
        );
        let map_entries = ArrayData::struct_array(
            vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("value", DataType::Int64, true),
            ],
            vec![
                ArrayData::from_strs(&["a", "b", "c"]),
                ArrayData::from_options(&[Some(1i64), None, Some(3)]),
            ],
            None,
        )
        .unwrap();
        let map = ArrayData::try_new(
            DataType::Map(Box::new(entries.clone()), false),
            3,
            vec![None, Some(Buffer::from_values(&[0i32, 2, 2, 3]))],
            vec![map_entries],
            None,
        )
        .unwrap();

        let union_fields = vec![
            Field::new("i", DataType::Int32, true),
            Field::new("s", DataType::Utf8, true),
        ];
        let dense = ArrayData::try_new(
            DataType::Union(union_fields.clone(), vec![0, 1], UnionMode::Dense),
            3,
            vec![
                Some(Buffer::from_values(&[0i8, 1, 0])),
                Some(Buffer::from_values(&[0i32, 0, 1])),
            ],
            vec![ArrayData::from_primitive(&[5i32, 6]), ArrayData::from_strs(&["u"])],
            None,
        )
        .unwrap();
        let sparse = ArrayData::try_new(
            DataType::Union(union_fields, vec![0, 1], UnionMode::Sparse),
            3,
            vec![Some(Buffer::from_values(&[1i8, 1, 0]))],
            vec![ArrayData::from_primitive(&[0i32, 0, 9]), ArrayData::from_strs(&["p", "q", ""])],
            None,
        )
        .unwrap();

        let run_ends = Field::new("run_ends", DataType::Int32, false);
        let run_values = Field::new("values", DataType::Utf8, true);
        let ree = ArrayData::try_new(
            DataType::RunEndEncoded(Box::new(run_ends), Box::new(run_values)),
            3,
            vec![],
            vec![ArrayData::from_primitive(&[2i32, 3]), ArrayData::from_str_options(&[Some("r"), None])],
            None,
        )
        .unwrap();

        let fsl_item = Field::new("item", DataType::Int16, true);
        let fsl = ArrayData::try_new(
            DataType::FixedSizeList(Box::new(fsl_item), 2),
            3,
            vec![None],
            vec![ArrayData::from_primitive(&[1i16, 2, 3, 4, 5, 6])],
            None,
        )
        .unwrap();

        let lv_item = Field::new("item", DataType::Int32, true);
        let list_view = ArrayData::try_new(
            DataType::ListView(Box::new(lv_item)),
            3,
            vec![
                None,
                Some(Buffer::from_values(&[2i32, 0, 1])),
                Some(Buffer::from_values(&[1i32, 2, 0])),
            ],
            vec![ArrayData::from_primitive(&[7i32, 8, 9])],
            None,
        )
        .unwrap();

        let columns = vec![map, dense, sparse, ree, fsl, list_view];
        let fields = columns
            .iter()
            .enumerate()
            .map(|(i, c)| Field::new(format!("c{i}"), c.data_type.clone(), true))
            .collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    }

    #[test]
    fn nested_types_roundtrip_both_formats() {
        let batch = nested_batch();
        let bytes = file_bytes(Arc::clone(&batch.schema), &[batch.clone()], WriteOptions::default());
        assert_aligned(&bytes);
        let got = FileReader::try_new(bytes, ReadOptions::default()).unwrap().read_record(0).unwrap();
        assert_eq!(got, batch);

        let bytes = stream_bytes(Arc::clone(&batch.schema), &[batch.clone()], WriteOptions::default());
        let got: Vec<_> = StreamReader::try_new(Cursor::new(bytes), ReadOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(got, vec![batch]);
    }

    #[test]
    fn sliced_batches_roundtrip() {
        let batch = nested_batch();
        let slices = vec![batch.slice(1, 2), batch.slice(2, 1), batch.slice(0, 0)];
        let bytes = file_bytes(Arc::clone(&batch.schema), &slices, WriteOptions::default());
        let reader = FileReader::try_new(bytes, ReadOptions::default()).unwrap();
        let got: Vec<_> = reader.batches().collect::<Result<_, _>>().unwrap();
        assert_eq!(got, slices);
    }

    #[test]
    fn sixty_four_byte_padding_is_readable() {
        let batch = nested_batch();
        let mut w = FileWriter64::try_new(Vec::new(), Arc::clone(&batch.schema), WriteOptions::default()).unwrap();
        w.write(&batch).unwrap();
        let bytes = w.into_inner().unwrap();
        assert_aligned(&bytes);
        let got = FileReader::try_new(bytes, ReadOptions::default()).unwrap().read_record(0).unwrap();
        assert_eq!(got, batch);
    }

    #[test]
    fn extension_and_metadata_survive() {
        let mut field_md = Metadata::new();
        field_md.insert("unit".into(), "meters".into());
        let mut schema_md = Metadata::new();
        schema_md.insert("source".into(), "sensor-7".into());
        let ext = DataType::Extension {
            name: "example.uuid".into(),
            metadata: Some("v1".into()),
            storage: Box::new(DataType::FixedSizeBinary(16)),
        };
        let schema = Arc::new(
            Schema::new(vec![
                Field::new("id", ext.clone(), false),
                Field::new("dist", DataType::Float64, true).with_metadata(field_md.clone()),
            ])
            .with_metadata(schema_md.clone()),
        );
        let ids = ArrayData::primitive_with_type(ext, &[[7u8; 16], [9u8; 16]], None);
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![ids, ArrayData::from_options(&[Some(1.5f64), None])],
        )
        .unwrap();

        let bytes = file_bytes(Arc::clone(&schema), &[batch.clone()], WriteOptions::default());
        let reader = FileReader::try_new(bytes, ReadOptions::default()).unwrap();
        assert_eq!(reader.schema().fields, schema.fields);
        assert_eq!(reader.schema().metadata, schema_md);
        assert_eq!(reader.schema().fields[1].metadata, field_md);
        assert_eq!(reader.read_record(0).unwrap(), batch);
    }

    #[test]
    fn on_disk_file_through_seekable_source() {
        let batch = nested_batch();
        let bytes = file_bytes(Arc::clone(&batch.schema), &[batch.clone(), batch.clone()], WriteOptions::default());
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let reader = FileReader::open(tmp.path(), ReadOptions::default()).unwrap();
        assert_eq!(reader.num_records(), 2);
        assert_eq!(reader.read_record(1).unwrap(), batch);

        let mut file = tmp.reopen().unwrap();
        file.seek(SeekFrom::Start(3)).unwrap();
        let seekable = SeekableSource::new(file).unwrap();
        let reader = FileReader::try_new(seekable, ReadOptions::default()).unwrap();
        assert_eq!(reader.read_record(0).unwrap(), batch);
    }

    #[test]
    fn records_decode_in_parallel() {
        let batches: Vec<RecordBatch> = (0..8)
            .map(|i| {
                RecordBatch::try_new(int32_schema(), vec![ArrayData::from_primitive(&[i, i + 1, i + 2])]).unwrap()
            })
            .collect();
        let bytes = file_bytes(int32_schema(), &batches, WriteOptions::default());
        let reader = FileReader::try_new(Arc::new(bytes), ReadOptions::default()).unwrap();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let reader = &reader;
                    s.spawn(move || reader.read_record(i).unwrap())
                })
                .collect();
            for (i, h) in handles.into_iter().enumerate() {
                assert_eq!(h.join().unwrap(), batches[i]);
            }
        });
    }
}
