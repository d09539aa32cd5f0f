mod chunking;
mod pipeline;
mod source;
mod uploads;

pub use chunking::{chunk, TextChunk, DEFAULT_CHUNK_TOKENS, DEFAULT_OVERLAP_TOKENS};
pub use pipeline::{IngestConfig, IngestError, IngestErrorKind, IngestReport, Ingestor};
pub use source::SourceKind;
pub use uploads::{derivative_dir, safe_name, sha256_hex, store_original, StoredOriginal};
