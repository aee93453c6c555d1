#[cfg(test)]
mod async_io {
    use std::sync::Arc;

    use arrowpipe::enums::IPCMessageProtocol;
    use arrowpipe::models::writers::ipc::async_writer::{write_batches_to_file, write_file_with_schema};
    use arrowpipe::{
        ArrayData, AsyncBatchWriter, AsyncStreamReader64, BatchSink, DataType, Field, FileReader, IpcError,
        ReadOptions, RecordBatch, Schema, StreamWriter, WriteOptions,
    };
    use futures_util::{SinkExt, StreamExt, stream};
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::UInt32, false),
            Field::new("label", DataType::dictionary(0, DataType::Int8, DataType::Utf8), true),
        ]))
    }

    fn batch(start: u32, n: u32) -> RecordBatch {
        let ids: Vec<u32> = (start..start + n).collect();
        let labels: Vec<Option<i8>> = (0..n).map(|i| (i % 4 != 3).then_some((i % 3) as i8)).collect();
        let values = Arc::new(ArrayData::from_strs(&["low", "mid", "high"]));
        RecordBatch::try_new(
            schema(),
            vec![
                ArrayData::from_primitive(&ids),
                ArrayData::dictionary_array(0, ArrayData::from_options(&labels), values).unwrap(),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stream_over_duplex_pipe() {
        let (client, server) = tokio::io::duplex(64);
        let batches: Vec<_> = (0..5).map(|i| batch(i * 100, 50)).collect();

        let expected = batches.clone();
        let writer = tokio::spawn(async move {
            let mut w =
                AsyncBatchWriter::new(client, schema(), IPCMessageProtocol::Stream, WriteOptions::default()).unwrap();
            w.write_all(expected).await.unwrap();
            w.stats()
        });

        let mut reader = AsyncStreamReader64::from_reader(server, IPCMessageProtocol::Stream, ReadOptions::default());
        let got = reader.read_all().await.unwrap();
        let stats = writer.await.unwrap();

        assert_eq!(got, batches);
        assert_eq!(stats.num_record_batches, 5);
        assert_eq!(stats.num_dictionary_batches, 1);
        assert!(reader.is_finished());
        assert_eq!(reader.schema().unwrap().fields, schema().fields);
        assert_eq!(reader.dictionaries().get_array(0).unwrap().len, 3);
    }

    #[tokio::test]
    async fn sink_feeds_a_file_that_sync_reader_opens() {
        let tmp = NamedTempFile::new().unwrap();
        let file = tokio::fs::File::create(tmp.path()).await.unwrap();
        let mut sink = BatchSink::new(file, schema(), IPCMessageProtocol::File, WriteOptions::default()).unwrap();
        let mut source = stream::iter((0..3).map(|i| Ok(batch(i * 10, 10))));
        sink.send_all(&mut source).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(sink.stats().num_record_batches, 3);

        let reader = FileReader::open(tmp.path(), ReadOptions::default()).unwrap();
        assert_eq!(reader.num_records(), 3);
        assert_eq!(reader.read_record(2).unwrap(), batch(20, 10));
    }

    #[tokio::test]
    async fn async_reader_walks_a_file_in_order() {
        let tmp = NamedTempFile::new().unwrap();
        let batches = vec![batch(0, 7), batch(7, 0), batch(7, 9)];
        write_batches_to_file(tmp.path(), &batches, WriteOptions::default()).await.unwrap();

        let mut reader = AsyncStreamReader64::open(tmp.path(), ReadOptions::default()).await.unwrap();
        let first = reader.read_batches(Some(1)).await.unwrap();
        assert_eq!(first, vec![batches[0].clone()]);
        let rest = reader.read_all().await.unwrap();
        assert_eq!(rest, batches[1..].to_vec());
        assert_eq!(reader.protocol(), IPCMessageProtocol::File);
    }

    #[tokio::test]
    async fn empty_file_with_schema() {
        let tmp = NamedTempFile::new().unwrap();
        write_file_with_schema(tmp.path(), schema(), &[], WriteOptions::default()).await.unwrap();
        let reader = FileReader::open(tmp.path(), ReadOptions::default()).unwrap();
        assert_eq!(reader.num_records(), 0);
        assert_eq!(reader.schema().fields, schema().fields);
    }

    #[tokio::test]
    async fn sync_stream_read_by_async_reader() {
        let mut w = StreamWriter::try_new(Vec::new(), schema(), WriteOptions::default()).unwrap();
        w.write(&batch(0, 3)).unwrap();
        let bytes = w.into_inner().unwrap();

        let reader = AsyncStreamReader64::from_reader(&bytes[..], IPCMessageProtocol::Stream, ReadOptions::default());
        let got: Vec<_> = reader.collect().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].as_ref().unwrap(), &batch(0, 3));
    }

    #[tokio::test]
    async fn cut_stream_reports_truncation() {
        let mut w = StreamWriter::try_new(Vec::new(), schema(), WriteOptions::default()).unwrap();
        w.write(&batch(0, 30)).unwrap();
        let bytes = w.into_inner().unwrap();
        let cut = &bytes[..bytes.len() - 20];

        let mut reader = AsyncStreamReader64::from_reader(cut, IPCMessageProtocol::Stream, ReadOptions::default());
        let err = reader.read_all().await.unwrap_err();
        assert!(matches!(err, IpcError::Truncated(_)), "{err:?}");
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_read_stops() {
        let mut w = StreamWriter::try_new(Vec::new(), schema(), WriteOptions::default()).unwrap();
        w.write(&batch(0, 3)).unwrap();
        let bytes = w.into_inner().unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let mut reader = AsyncStreamReader64::from_reader(
            &bytes[..],
            IPCMessageProtocol::Stream,
            ReadOptions::default().with_cancellation(token),
        );
        assert!(matches!(reader.next().await, Some(Err(IpcError::Cancelled))));
        assert!(reader.next().await.is_none());
    }
}
