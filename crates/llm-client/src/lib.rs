mod embedding;
mod generation;

pub use embedding::{EmbedMode, EmbeddingClient, EmbeddingError};
pub use generation::{
    ChatMessage, Deadline, GenerationClient, GenerationError, GenerationParams,
};
