//! # Synchronous stream reader
//!
//! Reads the IPC stream format from any [`Read`]: schema, dictionaries, records, end marker.

use std::io::Read;
use std::sync::Arc;

use crate::enums::BatchState;
use crate::error::{IpcError, Result};
use crate::models::decoders::ipc::message::{MessageReader, StreamDecoder};
use crate::models::dictionary::memo::DictionaryMemo;
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::ReadOptions;

/// Blocking reader for the IPC stream format.
///
/// The schema is read eagerly by [`StreamReader::try_new`]. Record batches then come from
/// [`StreamReader::read_next`] or the [`Iterator`] impl.
///
/// A record that fails to decode is reported and the reader moves past it. Framing and I/O
/// errors make every later call fail with [`IpcError::Poisoned`].
///
/// ```ignore
/// let reader = StreamReader::try_new(std::io::stdin().lock(), ReadOptions::default())?;
/// for batch in reader {
///     println!("{} rows", batch?.num_rows());
/// }
/// ```
pub struct StreamReader<R> {
    messages: MessageReader<R>,
    decoder: StreamDecoder,
    schema: Arc<Schema>,
}

impl<R: Read> StreamReader<R> {
    /// Reads up to and including the schema message.
    ///
    /// An input that ends before the schema fails with [`IpcError::Truncated`].
    pub fn try_new(inner: R, options: ReadOptions) -> Result<Self> {
        let mut messages = MessageReader::new(inner, options.clone());
        let mut decoder = StreamDecoder::new(options);
        let schema = loop {
            match messages.read_message()? {
                Some(msg) => {
                    decoder.set_protocol(messages.protocol());
                    decoder.decode(&msg.metadata, &msg.body)?;
                    if let Some(schema) = decoder.schema() {
                        break Arc::clone(schema);
                    }
                }
                None => {
                    decoder.finish()?;
                    return Err(IpcError::Truncated("input ended before the schema message".into()));
                }
            }
        };
        Ok(Self {
            messages,
            decoder,
            schema,
        })
    }

    /// The stream schema. With native-endian conversion enabled it reports host endianness.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn dictionaries(&self) -> &DictionaryMemo {
        self.decoder.memo()
    }

    /// Whether the end-of-stream marker (or a clean end of input) has been reached.
    pub fn is_finished(&self) -> bool {
        self.decoder.state() == BatchState::Done
    }

    pub fn get_ref(&self) -> &R {
        self.messages.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.messages.into_inner()
    }

    /// Next record batch, or `None` at end of stream.
    pub fn read_next(&mut self) -> Result<Option<RecordBatch>> {
        loop {
            match self.decoder.state() {
                BatchState::Done => return Ok(None),
                BatchState::Failed => return Err(IpcError::Poisoned),
                _ => {}
            }
            let msg = match self.messages.read_message() {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    self.decoder.finish()?;
                    return Ok(None);
                }
                Err(e) => {
                    self.decoder.poison();
                    return Err(e);
                }
            };
            if let Some(batch) = self.decoder.decode(&msg.metadata, &msg.body)? {
                return Ok(Some(batch));
            }
        }
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(IpcError::Poisoned) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
