pub mod traits {
    pub mod frame_decoder;
    pub mod frame_encoder;
    pub mod read_at;
    pub mod stream_buffer;
}

pub mod models {

    pub mod sinks {
        pub mod batch_sink;
    }
    pub mod encoders {
        pub mod ipc {
            pub mod batch_stream;
            pub mod protocol;
            pub mod record;
            pub mod schema;
        }
    }
    pub mod decoders {
        pub mod ipc {
            pub mod batch_stream;
            pub mod loader;
            pub mod message;
            pub mod protocol;
            pub mod schema;
        }
    }
    pub mod dictionary {
        pub mod memo;
    }
    pub mod frames {
        pub mod ipc_message;
    }
    pub mod readers {
        pub mod ipc {
            pub mod async_stream_reader;
            pub mod file_reader;
            pub mod stream_reader;
        }
    }
    pub mod writers {
        pub mod ipc {
            pub mod async_writer;
            pub mod file_writer;
            pub mod ipc_writer;
            pub mod stream_writer;
        }
    }
    pub mod streams {
        pub mod disk;
        pub mod framed_byte_stream;
    }
    pub mod types {
        pub mod array_data;
        pub mod concat;
        pub mod datatype;
        pub mod record_batch;
        pub mod schema;
    }
    pub mod endian;
}

pub mod compression;
pub mod constants;
pub mod enums;
pub mod error;
pub mod options;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use crate::compression::CompressionCodec;
pub use crate::error::{IpcError, Result};
pub use crate::models::dictionary::memo::DictionaryMemo;
pub use crate::models::readers::ipc::async_stream_reader::{AsyncStreamReader, AsyncStreamReader64};
pub use crate::models::readers::ipc::file_reader::FileReader;
pub use crate::models::readers::ipc::stream_reader::StreamReader;
pub use crate::models::sinks::batch_sink::{BatchSink, BatchSink64};
pub use crate::models::types::array_data::{ArrayData, Buffer};
pub use crate::models::types::datatype::{DataType, Endianness, IntervalUnit, MetadataVersion, TimeUnit, UnionMode};
pub use crate::models::types::record_batch::RecordBatch;
pub use crate::models::types::schema::{Field, FieldPosition, Metadata, Schema};
pub use crate::models::writers::ipc::async_writer::AsyncBatchWriter;
pub use crate::models::writers::ipc::file_writer::{FileWriter, FileWriter64};
pub use crate::models::writers::ipc::stream_writer::{StreamWriter, StreamWriter64};
pub use crate::options::{ReadOptions, WriteOptions};
pub use crate::enums::IPCMessageProtocol;
