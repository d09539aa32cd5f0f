mod context;
mod engine;
mod prompts;
mod routing;

pub use context::{compose_context, SourceRef};
pub use engine::{
    Answer, AnswerConfig, AnswerEngine, AnswerError, HistoryTurn, QueryParams, RagMode,
};
pub use routing::{
    choose_route, is_smalltalk, matches_table_keywords, merge_slices, RetrievalSummary, Route,
};
