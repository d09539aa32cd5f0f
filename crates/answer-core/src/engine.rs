use std::collections::HashSet;
use std::sync::Arc;

use doc_store::{FragmentKind, SearchOptions, StoreError, VectorStore};
use llm_client::{
    ChatMessage, Deadline, EmbedMode, EmbeddingClient, EmbeddingError, GenerationClient,
    GenerationError, GenerationParams,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{compose_context, SourceRef};
use crate::prompts;
use crate::routing::{
    choose_route, is_smalltalk, matches_table_keywords, merge_slices, Route,
};

/// Generation output that counts as "no answer"; such answers return with
/// an empty source list so the caller never shows citations for a refusal.
const REFUSALS: &[&str] = &[
    "모릅니다",
    "모릅니다.",
    "모르겠습니다",
    "모르겠습니다.",
    "알 수 없습니다",
    "알 수 없습니다.",
];

#[derive(Debug, Clone)]
pub struct AnswerConfig {
    /// Shared similarity floor for all retrieval slices.
    pub retrieve_min: f32,
    /// Best-hit similarity that alone selects document mode.
    pub use_as_ctx_min: f32,
    /// Top-3 mean similarity that alone selects document mode.
    pub min_top3_avg: f32,
    pub text_k: usize,
    pub table_k: usize,
    pub image_k: usize,
    pub max_ctx_chars: usize,
    pub fragment_trim_chars: usize,
    pub history_cap: usize,
    pub generation_timeout_ms: u64,
    pub classifier_timeout_ms: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            retrieve_min: 0.35,
            use_as_ctx_min: 0.60,
            min_top3_avg: 0.55,
            text_k: 5,
            table_k: 10,
            image_k: 4,
            max_ctx_chars: 4_000,
            fragment_trim_chars: 1_600,
            history_cap: 50,
            generation_timeout_ms: 60_000,
            classifier_timeout_ms: 5_000,
        }
    }
}

/// Per-request sampling overrides; unset fields fall back to the service
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Overrides the prose-slice K for this request.
    pub match_count: Option<usize>,
}

impl QueryParams {
    fn generation_params(&self) -> GenerationParams {
        let defaults = GenerationParams::default();
        GenerationParams {
            max_tokens: self.max_new_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RagMode {
    Smalltalk,
    RagPlain,
    RagTable,
    General,
}

impl RagMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Smalltalk => "smalltalk",
            Self::RagPlain => "rag-plain",
            Self::RagTable => "rag-table",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub rag_mode: RagMode,
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval failed: {0}")]
    Store(#[from] StoreError),

    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocIntent {
    Plain,
    Table,
}

/// Answers one question: smalltalk shortcut, query embedding, three-slice
/// retrieval, confidence gate, prompt-regime selection and streaming
/// generation.
pub struct AnswerEngine {
    store: Arc<VectorStore>,
    embedder: Arc<EmbeddingClient>,
    generator: Arc<GenerationClient>,
    config: AnswerConfig,
}

impl AnswerEngine {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<EmbeddingClient>,
        generator: Arc<GenerationClient>,
        config: AnswerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            config,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        history: &[HistoryTurn],
        params: &QueryParams,
    ) -> Result<Answer, AnswerError> {
        if is_smalltalk(question) {
            let answer = self
                .generate(prompts::SMALLTALK_SYSTEM.to_string(), history, question, params)
                .await?;
            return Ok(Answer {
                answer,
                sources: Vec::new(),
                rag_mode: RagMode::Smalltalk,
            });
        }

        let query_vec = self.embedder.embed_one(question, EmbedMode::Query).await?;
        let summary = self.retrieve(&query_vec, params)?;

        tracing::debug!(
            hits = summary.hits.len(),
            max_sim = summary.max_sim,
            top3_avg = summary.top3_avg,
            "retrieval summary"
        );

        let route = choose_route(&summary, self.config.use_as_ctx_min, self.config.min_top3_avg);
        if route == Route::General {
            let answer = self
                .generate(prompts::GENERAL_SYSTEM.to_string(), history, question, params)
                .await?;
            return Ok(Answer {
                answer,
                sources: Vec::new(),
                rag_mode: RagMode::General,
            });
        }

        let intent = self.classify_intent(question).await;

        let mut ranked = summary.hits;
        ranked.sort_by(|a, b| b.sim.partial_cmp(&a.sim).unwrap_or(std::cmp::Ordering::Equal));
        let (context, sources) = compose_context(
            &ranked,
            self.config.max_ctx_chars,
            self.config.fragment_trim_chars,
        );

        let base = match intent {
            DocIntent::Plain => prompts::PLAIN_SYSTEM,
            DocIntent::Table => prompts::TABLE_SYSTEM,
        };
        let system = format!("{base}\n\n{}\n{context}", prompts::CONTEXT_HEADER);

        let answer = self.generate(system, history, question, params).await?;

        let sources = if is_refusal(&answer) {
            Vec::new()
        } else {
            sources
        };

        Ok(Answer {
            answer,
            sources,
            rag_mode: match intent {
                DocIntent::Plain => RagMode::RagPlain,
                DocIntent::Table => RagMode::RagTable,
            },
        })
    }

    /// Run the three typed slices against one query vector and merge them.
    fn retrieve(
        &self,
        query_vec: &[f32],
        params: &QueryParams,
    ) -> Result<crate::routing::RetrievalSummary, StoreError> {
        let text_k = params.match_count.unwrap_or(self.config.text_k);

        let prose = self.store.top_k(
            query_vec,
            &SearchOptions {
                k: text_k,
                threshold: self.config.retrieve_min,
                kinds: Some(HashSet::from(FragmentKind::PROSE)),
                sha256: None,
            },
        )?;

        let tables = self.store.top_k(
            query_vec,
            &SearchOptions {
                k: self.config.table_k,
                threshold: self.config.retrieve_min,
                kinds: Some(HashSet::from([FragmentKind::TableRow])),
                sha256: None,
            },
        )?;

        let images = self.store.top_k(
            query_vec,
            &SearchOptions {
                k: self.config.image_k,
                threshold: self.config.retrieve_min,
                kinds: Some(HashSet::from([FragmentKind::ImageCaption])),
                sha256: None,
            },
        )?;

        Ok(merge_slices(vec![prose, tables, images]))
    }

    /// Decide plain vs table for document mode. Keyword matches skip the
    /// model; otherwise a one-token classification call decides, and any
    /// failure or timeout falls back to plain.
    async fn classify_intent(&self, question: &str) -> DocIntent {
        if matches_table_keywords(question) {
            return DocIntent::Table;
        }

        let messages = [
            ChatMessage::system(prompts::INTENT_CLASSIFIER_SYSTEM),
            ChatMessage::user(question),
        ];
        let params = GenerationParams {
            max_tokens: 10,
            temperature: 0.0,
            top_p: 1.0,
        };

        match self
            .generator
            .complete(
                &messages,
                &params,
                Deadline::new(self.config.classifier_timeout_ms, "intent-classifier"),
            )
            .await
        {
            Ok(verdict) if verdict.to_lowercase().contains("table") => DocIntent::Table,
            Ok(_) => DocIntent::Plain,
            Err(error) => {
                tracing::warn!("intent classifier failed, defaulting to plain: {error}");
                DocIntent::Plain
            }
        }
    }

    async fn generate(
        &self,
        system: String,
        history: &[HistoryTurn],
        question: &str,
        params: &QueryParams,
    ) -> Result<String, GenerationError> {
        let messages = build_messages(&system, history, question, self.config.history_cap);
        self.generator
            .stream(
                &messages,
                &params.generation_params(),
                Deadline::new(self.config.generation_timeout_ms, "answer-generation"),
            )
            .await
    }
}

fn build_messages(
    system: &str,
    history: &[HistoryTurn],
    question: &str,
    history_cap: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];

    let start = history.len().saturating_sub(history_cap);
    for turn in &history[start..] {
        match turn.role.as_str() {
            "user" => messages.push(ChatMessage::user(turn.content.clone())),
            "assistant" => messages.push(ChatMessage::assistant(turn.content.clone())),
            // Unknown roles are dropped rather than forwarded.
            _ => {}
        }
    }

    messages.push(ChatMessage::user(question));
    messages
}

fn is_refusal(answer: &str) -> bool {
    let trimmed = answer.trim();
    trimmed.is_empty() || REFUSALS.contains(&trimmed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use doc_store::{FragmentKind, FragmentMeta, VectorStore};
    use llm_client::{EmbeddingClient, GenerationClient};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        build_messages, is_refusal, AnswerConfig, AnswerEngine, HistoryTurn, QueryParams, RagMode,
    };

    const DIM: usize = 4;

    fn fragment_meta(kind: FragmentKind, filename: &str) -> FragmentMeta {
        let mut meta = FragmentMeta::of_kind(kind);
        meta.filepath = Some(filename.to_string());
        meta
    }

    /// Unit vector at `cos` similarity against the canonical query [1,0,0,0].
    fn vector_at(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt(), 0.0, 0.0]
    }

    async fn backends(sse_answer: &str) -> (MockServer, MockServer) {
        let emb = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0, 0.0, 0.0]}]
            })))
            .mount(&emb)
            .await;

        let llm = MockServer::start().await;
        let body = format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{sse_answer}\"}}}}]}}\n\ndata: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("content-type", "text/event-stream"),
            )
            .mount(&llm)
            .await;

        (emb, llm)
    }

    fn engine(store: Arc<VectorStore>, emb: &MockServer, llm: &MockServer) -> AnswerEngine {
        AnswerEngine::new(
            store,
            Arc::new(EmbeddingClient::new(emb.uri(), "test-embed")),
            Arc::new(GenerationClient::new(llm.uri(), "test-llm")),
            AnswerConfig::default(),
        )
    }

    #[tokio::test]
    async fn smalltalk_bypasses_retrieval_even_with_indexed_documents() {
        let store = Arc::new(VectorStore::open_in_memory(DIM).expect("store"));
        store
            .insert_fragment(
                "근거 문서",
                &fragment_meta(FragmentKind::Pdf, "a.pdf"),
                &vector_at(1.0),
            )
            .expect("insert");

        // The embedding backend is a dead address: smalltalk must never
        // reach it.
        let (_, llm) = backends("안녕하세요!").await;
        let engine = AnswerEngine::new(
            store,
            Arc::new(EmbeddingClient::new("http://127.0.0.1:1", "test-embed")),
            Arc::new(GenerationClient::new(llm.uri(), "test-llm")),
            AnswerConfig::default(),
        );

        let answer = engine
            .answer("안녕", &[], &QueryParams::default())
            .await
            .expect("smalltalk should succeed");

        assert_eq!(answer.rag_mode, RagMode::Smalltalk);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.answer, "안녕하세요!");
    }

    #[tokio::test]
    async fn weak_retrieval_falls_back_to_general_mode() {
        let store = Arc::new(VectorStore::open_in_memory(DIM).expect("store"));
        for index in 0..3 {
            store
                .insert_fragment(
                    &format!("약한 근거 {index}"),
                    &fragment_meta(FragmentKind::Pdf, "a.pdf"),
                    &vector_at(0.45),
                )
                .expect("insert");
        }

        let (emb, llm) = backends("일반 지식으로 답합니다.").await;
        let engine = engine(store, &emb, &llm);

        let answer = engine
            .answer("우리 회사 창립일이 언제야?", &[], &QueryParams::default())
            .await
            .expect("general mode should succeed");

        assert_eq!(answer.rag_mode, RagMode::General);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn table_keyword_question_uses_the_table_regime_with_sources() {
        let store = Arc::new(VectorStore::open_in_memory(DIM).expect("store"));
        store
            .insert_fragment(
                "Table: 연간 실적 | 연도=2023; 매출=1,200억",
                &fragment_meta(FragmentKind::TableRow, "실적.pdf"),
                &vector_at(0.95),
            )
            .expect("insert");

        let (emb, llm) = backends("2023년 매출은 1,200억 원입니다.").await;
        let engine = engine(store, &emb, &llm);

        let answer = engine
            .answer("표에서 2023년 매출은?", &[], &QueryParams::default())
            .await
            .expect("table mode should succeed");

        assert_eq!(answer.rag_mode, RagMode::RagTable);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].filename, "실적.pdf");
        assert_eq!(answer.sources[0].kind, "table_row");
    }

    #[tokio::test]
    async fn refusal_answers_return_no_sources() {
        let store = Arc::new(VectorStore::open_in_memory(DIM).expect("store"));
        store
            .insert_fragment(
                "Table: 연간 실적 | 연도=2023; 매출=1,200억",
                &fragment_meta(FragmentKind::TableRow, "실적.pdf"),
                &vector_at(0.95),
            )
            .expect("insert");

        let (emb, llm) = backends("모릅니다.").await;
        let engine = engine(store, &emb, &llm);

        let answer = engine
            .answer("표에서 2024년 순이익은?", &[], &QueryParams::default())
            .await
            .expect("query should succeed");

        assert!(answer.sources.is_empty(), "refusal must clear sources");
    }

    #[test]
    fn history_is_capped_and_unknown_roles_are_dropped() {
        let mut history = Vec::new();
        for index in 0..60 {
            history.push(HistoryTurn {
                role: if index % 2 == 0 { "user" } else { "assistant" }.to_string(),
                content: format!("turn {index}"),
            });
        }
        history.push(HistoryTurn {
            role: "tool".to_string(),
            content: "ignored".to_string(),
        });

        let messages = build_messages("system", &history, "question", 50);

        // system + capped history (50 minus the dropped role) + question
        assert_eq!(messages.len(), 1 + 49 + 1);
        assert_eq!(messages.first().unwrap().role, "system");
        assert_eq!(messages.last().unwrap().content, "question");
        assert!(messages.iter().all(|m| m.role != "tool"));
    }

    #[test]
    fn refusal_detection_covers_blank_and_known_phrases() {
        assert!(is_refusal(""));
        assert!(is_refusal("  모릅니다.  "));
        assert!(is_refusal("모르겠습니다"));
        assert!(!is_refusal("2023년 매출은 1,200억 원입니다."));
    }
}
