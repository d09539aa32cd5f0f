use std::sync::Arc;

use answer_core::{AnswerConfig, AnswerEngine};
use doc_store::VectorStore;
use ingest_core::{IngestConfig, Ingestor};
use llm_client::{EmbeddingClient, GenerationClient};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::router::AppState;

pub const TEST_DIM: usize = 4;

/// Answers `/v1/embeddings` with one constant unit vector per input, so
/// every passage and every query land at cosine similarity 1.
struct ConstantEmbeddings;

impl Respond for ConstantEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("embedding request should be json");
        let count = match &body["input"] {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::String(_) => 1,
            _ => 0,
        };

        let mut vector = vec![0.0f32; TEST_DIM];
        vector[0] = 1.0;
        let data: Vec<serde_json::Value> = (0..count)
            .map(|_| serde_json::json!({ "embedding": vector }))
            .collect();

        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
    }
}

pub struct Harness {
    pub state: AppState,
    pub emb_server: MockServer,
    pub llm_server: MockServer,
    _uploads: tempfile::TempDir,
}

impl Harness {
    /// Full application state backed by mock embedding/generation servers
    /// and an in-memory store.
    pub async fn new(generated_answer: &str) -> Self {
        let emb_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ConstantEmbeddings)
            .mount(&emb_server)
            .await;

        let llm_server = MockServer::start().await;
        // One-shot calls (the intent classifier) get a plain JSON body.
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "plain" } }]
            })))
            .mount(&llm_server)
            .await;
        // Streaming calls get an SSE body carrying the canned answer.
        let sse = format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{generated_answer}\"}}}}]}}\n\ndata: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "stream": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse)
                    .insert_header("content-type", "text/event-stream"),
            )
            .mount(&llm_server)
            .await;

        let uploads = tempfile::tempdir().expect("failed to create uploads tempdir");
        let store = Arc::new(VectorStore::open_in_memory(TEST_DIM).expect("store"));
        let embedder = Arc::new(EmbeddingClient::new(emb_server.uri(), "test-embed"));
        let generator = Arc::new(GenerationClient::new(llm_server.uri(), "test-llm"));

        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            None,
            IngestConfig {
                uploads_root: uploads.path().to_path_buf(),
                ..IngestConfig::default()
            },
        ));
        let engine = Arc::new(AnswerEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&generator),
            AnswerConfig::default(),
        ));

        let state = AppState {
            store,
            ingestor,
            engine,
            emb_url: emb_server.uri(),
            llm_url: llm_server.uri(),
            storage: ":memory:".to_string(),
            fast_mode: false,
            render_pages: false,
            enable_table_index: true,
        };

        Self {
            state,
            emb_server,
            llm_server,
            _uploads: uploads,
        }
    }

    pub fn app(&self) -> axum::Router {
        crate::router::build_router(self.state.clone())
    }
}

/// Build a single-field `multipart/form-data` body for upload tests.
pub fn multipart_file(boundary: &str, filename: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    out.extend_from_slice(body);
    out.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    out
}
