use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use doc_store::{
    AssetKind, FragmentKind, FragmentMeta, NewAsset, StoreError, TableBody, VectorStore,
};
use doc_text::{
    clean_text, decode_text_bytes, normalize_cell, normalize_table, read_hwpx, row_sentence,
    HwpxError, TableShape,
};
use llm_client::{EmbedMode, EmbeddingClient, EmbeddingError};
use parser_bridge::{ParseError, ParsedDocument, ParserBridge};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunking::{chunk, TextChunk};
use crate::source::SourceKind;
use crate::uploads::{store_original, StoredOriginal};

/// Chunk ceiling applied when fast mode is on.
const FAST_MODE_CHUNK_CAP: usize = 24;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub uploads_root: PathBuf,
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
    /// Post-chunking cap; 0 means unlimited.
    pub max_chunks_emb: usize,
    pub fast_mode: bool,
    pub render_pages: bool,
    pub enable_table_index: bool,
    /// Per-table row-embedding cap; 0 disables row fragments.
    pub max_table_rows_emb: usize,
    /// Captions on pages beyond this are not embedded.
    pub max_caption_pages: i64,
    pub hwp_converter: Option<PathBuf>,
    pub insert_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            uploads_root: PathBuf::from("uploads"),
            chunk_size_tokens: crate::chunking::DEFAULT_CHUNK_TOKENS,
            chunk_overlap_tokens: crate::chunking::DEFAULT_OVERLAP_TOKENS,
            max_chunks_emb: 0,
            fast_mode: false,
            render_pages: false,
            enable_table_index: true,
            max_table_rows_emb: 50,
            max_caption_pages: 8,
            hwp_converter: None,
            insert_concurrency: 8,
        }
    }
}

/// Counts returned to the upload endpoint.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub chunks: usize,
    pub stored: String,
    pub tables: usize,
    pub pages: usize,
    pub image_caption_chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestErrorKind {
    /// Caller mistakes: empty upload, unsupported format, no text.
    Input,
    /// HWP uploaded but no converter is configured.
    UnsupportedConversion,
    Internal,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("uploaded file is empty")]
    EmptyFile,

    #[error("unsupported document type: {name}")]
    Unsupported { name: String },

    #[error("no text or structure could be extracted from {name}")]
    EmptyText { name: String },

    #[error("hwp conversion is not configured")]
    HwpConverterUnavailable,

    #[error("hwp conversion failed: {0}")]
    HwpConversion(String),

    #[error("no extractor is configured for {name}")]
    ExtractorUnavailable { name: String },

    #[error("document extraction failed: {0}")]
    Parse(#[from] ParseError),

    #[error("hwpx reading failed: {0}")]
    Hwpx(#[from] HwpxError),

    #[error("{stage}: embedding failed: {source}")]
    Embedding {
        stage: &'static str,
        #[source]
        source: EmbeddingError,
    },

    #[error("{stage}: storage failed: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: {message}")]
    Internal { stage: &'static str, message: String },
}

impl IngestError {
    pub fn kind(&self) -> IngestErrorKind {
        match self {
            Self::EmptyFile | Self::Unsupported { .. } | Self::EmptyText { .. } => {
                IngestErrorKind::Input
            }
            Self::HwpConverterUnavailable => IngestErrorKind::UnsupportedConversion,
            _ => IngestErrorKind::Internal,
        }
    }
}

/// One extracted table, whatever the source format delivered.
#[derive(Debug, Clone, Default)]
struct TableCandidate {
    page: Option<i64>,
    caption: Option<String>,
    image_path: Option<String>,
    source: Option<String>,
    shape: TableShape,
}

#[derive(Debug, Clone, Default)]
struct PictureCandidate {
    page: Option<i64>,
    caption: Option<String>,
    image_path: Option<String>,
}

struct Extraction {
    text: String,
    tables: Vec<TableCandidate>,
    pictures: Vec<PictureCandidate>,
    engine: Option<String>,
    scratch: Option<PathBuf>,
}

/// Derived-artifact locations for one upload.
struct DerivativePaths {
    tables_dir: PathBuf,
    pictures_dir: PathBuf,
    pages_dir: PathBuf,
    rel_prefix: String,
}

impl DerivativePaths {
    fn new(root: &Path, now: DateTime<Utc>, sha256: &str) -> Self {
        let rel_prefix = format!(
            "{:04}/{:02}/{:02}/{}",
            now.year(),
            now.month(),
            now.day(),
            sha256
        );
        let base = root.join(&rel_prefix);
        Self {
            tables_dir: base.join("tables"),
            pictures_dir: base.join("pictures"),
            pages_dir: base.join("pages"),
            rel_prefix,
        }
    }
}

/// Orchestrates one upload end to end: persist the original, extract,
/// index tables and captions, chunk and embed prose, and commit fragments
/// with bounded concurrency.
pub struct Ingestor {
    store: Arc<VectorStore>,
    embedder: Arc<EmbeddingClient>,
    bridge: Option<Arc<ParserBridge>>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<EmbeddingClient>,
        bridge: Option<Arc<ParserBridge>>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            bridge,
            config,
        }
    }

    pub async fn ingest(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime: &str,
    ) -> Result<IngestReport, IngestError> {
        if bytes.is_empty() {
            return Err(IngestError::EmptyFile);
        }

        let kind =
            SourceKind::detect(original_name, mime).ok_or_else(|| IngestError::Unsupported {
                name: original_name.to_string(),
            })?;

        let now = Utc::now();
        let stored = store_original(&self.config.uploads_root, original_name, bytes, now)
            .map_err(|source| IngestError::Io {
                stage: "store-original",
                source,
            })?;

        let extraction = self.extract(kind, bytes, original_name, &stored, now).await?;

        if extraction.text.trim().is_empty()
            && extraction.tables.is_empty()
            && extraction.pictures.is_empty()
        {
            return Err(IngestError::EmptyText {
                name: original_name.to_string(),
            });
        }

        let paths = DerivativePaths::new(&self.config.uploads_root, now, &stored.sha256);
        let mut report = IngestReport {
            stored: stored.rel.clone(),
            ..IngestReport::default()
        };

        if self.config.render_pages && kind == SourceKind::Pdf {
            report.pages = self.collect_rendered_pages(extraction.scratch.as_deref(), &paths);
        }

        if self.config.enable_table_index && !extraction.tables.is_empty() {
            report.tables = self
                .index_tables(&extraction, original_name, &stored, &paths)
                .await?;
        }

        if !extraction.pictures.is_empty() {
            report.image_caption_chunks = self
                .index_pictures(&extraction, original_name, &stored, &paths)
                .await?;
        }

        report.chunks = self
            .index_prose(&extraction.text, kind, original_name, &stored)
            .await?;

        tracing::info!(
            file = original_name,
            sha256 = %stored.sha256,
            chunks = report.chunks,
            tables = report.tables,
            pages = report.pages,
            image_captions = report.image_caption_chunks,
            "ingestion finished"
        );

        Ok(report)
    }

    async fn extract(
        &self,
        kind: SourceKind,
        bytes: &[u8],
        original_name: &str,
        stored: &StoredOriginal,
        now: DateTime<Utc>,
    ) -> Result<Extraction, IngestError> {
        match kind {
            SourceKind::Pdf | SourceKind::Office => {
                let bridge =
                    self.bridge
                        .as_ref()
                        .ok_or_else(|| IngestError::ExtractorUnavailable {
                            name: original_name.to_string(),
                        })?;

                let scratch = crate::uploads::derivative_dir(
                    &self.config.uploads_root,
                    now,
                    &stored.sha256,
                    "scratch",
                );
                fs::create_dir_all(&scratch).map_err(|source| IngestError::Io {
                    stage: "create-scratch",
                    source,
                })?;

                let parsed = bridge.parse(&stored.abs, &scratch).await?;
                Ok(extraction_from_parsed(parsed, scratch))
            }
            SourceKind::Text => {
                let decoded = decode_text_bytes(bytes);
                tracing::debug!(encoding = decoded.encoding, "decoded plain text upload");
                Ok(Extraction {
                    text: clean_text(&decoded.text),
                    tables: Vec::new(),
                    pictures: Vec::new(),
                    engine: None,
                    scratch: None,
                })
            }
            SourceKind::Hwpx => {
                let document = read_hwpx(bytes)?;
                let tables = document
                    .tables
                    .iter()
                    .map(|_| TableCandidate::default())
                    .collect();
                Ok(Extraction {
                    text: clean_text(&document.text),
                    tables,
                    pictures: Vec::new(),
                    engine: Some("hwpx".to_string()),
                    scratch: None,
                })
            }
            SourceKind::Hwp => {
                let converter = self
                    .config
                    .hwp_converter
                    .clone()
                    .ok_or(IngestError::HwpConverterUnavailable)?;
                let text = convert_hwp(&converter, &stored.abs).await?;
                Ok(Extraction {
                    text: clean_text(&text),
                    tables: Vec::new(),
                    pictures: Vec::new(),
                    engine: Some("hwp2txt".to_string()),
                    scratch: None,
                })
            }
        }
    }

    /// Move rasterized pages the extractor left in its scratch directory
    /// into the uploads tree. Best-effort: failures log and report zero.
    fn collect_rendered_pages(&self, scratch: Option<&Path>, paths: &DerivativePaths) -> usize {
        let Some(scratch) = scratch else {
            return 0;
        };

        let source = if scratch.join("pages").is_dir() {
            scratch.join("pages")
        } else {
            scratch.to_path_buf()
        };

        match move_page_files(&source, &paths.pages_dir) {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!("page rendering collection failed: {error}");
                0
            }
        }
    }

    async fn index_tables(
        &self,
        extraction: &Extraction,
        original_name: &str,
        stored: &StoredOriginal,
        paths: &DerivativePaths,
    ) -> Result<usize, IngestError> {
        let mut indexed = 0usize;

        for candidate in &extraction.tables {
            let Some(normalized) = normalize_table(&candidate.shape) else {
                continue;
            };

            let caption = candidate
                .caption
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string();

            let caption_emb = self
                .caption_embedding(&caption, candidate.page)
                .await
                .map_err(|source| IngestError::Embedding {
                    stage: "table-caption",
                    source,
                })?;

            let image_url = candidate.image_path.as_deref().and_then(|src| {
                self.move_derivative(src, &paths.tables_dir, &paths.rel_prefix, "tables")
            });

            let asset = NewAsset {
                sha256: stored.sha256.clone(),
                filepath: original_name.to_string(),
                page: candidate.page,
                kind: AssetKind::Table,
                image_url,
                caption_text: (!caption.is_empty()).then(|| caption.clone()),
                caption_emb,
                meta: serde_json::json!({
                    "source": candidate.source,
                    "engine": extraction.engine,
                }),
            };

            // Asset bookkeeping is best-effort; a broken table must not
            // sink the rest of the document.
            let asset_id = match self.persist_table_asset(&asset, &normalized) {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(file = original_name, "table asset skipped: {error}");
                    continue;
                }
            };
            indexed += 1;

            let row_cap = if self.config.fast_mode {
                0
            } else {
                self.config.max_table_rows_emb
            };
            if row_cap == 0 || normalized.rows.is_empty() {
                continue;
            }

            let selected: Vec<&Vec<String>> = normalized.rows.iter().take(row_cap).collect();
            let sentences: Vec<String> = selected
                .iter()
                .map(|values| row_sentence(&caption, &normalized.header, values.as_slice()))
                .collect();

            let vectors = self
                .embedder
                .embed_batch(&sentences, EmbedMode::Passage)
                .await
                .map_err(|source| IngestError::Embedding {
                    stage: "table-rows",
                    source,
                })?;

            let items: Vec<(String, FragmentMeta, Vec<f32>)> = sentences
                .into_iter()
                .zip(vectors)
                .enumerate()
                .map(|(row_index, (sentence, vector))| {
                    let normalized_cells: Vec<_> = selected[row_index]
                        .iter()
                        .map(|cell| normalize_cell(cell))
                        .collect();
                    let meta = FragmentMeta {
                        kind: Some(FragmentKind::TableRow),
                        sha256: Some(stored.sha256.clone()),
                        filepath: Some(original_name.to_string()),
                        stored_path: Some(stored.rel.clone()),
                        asset_id: Some(asset_id),
                        row_index: Some(row_index),
                        headers: Some(normalized.header.clone()),
                        caption: (!caption.is_empty()).then(|| caption.clone()),
                        page: candidate.page,
                        normalized: serde_json::to_value(&normalized_cells).ok(),
                        ..FragmentMeta::default()
                    };
                    (sentence, meta, vector)
                })
                .collect();

            self.insert_fragments_bounded("table-row-fragments", items)
                .await?;
        }

        Ok(indexed)
    }

    fn persist_table_asset(
        &self,
        asset: &NewAsset,
        normalized: &doc_text::NormalizedTable,
    ) -> Result<i64, StoreError> {
        let asset_id = self.store.insert_asset(asset)?;
        self.store.insert_table_body(
            asset_id,
            &TableBody {
                n_rows: normalized.n_rows,
                n_cols: normalized.n_cols,
                tsv: normalized.tsv.clone(),
                md: normalized.md.clone(),
                html: normalized.html.clone(),
            },
        )?;
        Ok(asset_id)
    }

    async fn index_pictures(
        &self,
        extraction: &Extraction,
        original_name: &str,
        stored: &StoredOriginal,
        paths: &DerivativePaths,
    ) -> Result<usize, IngestError> {
        let mut caption_items: Vec<(String, FragmentMeta, Vec<f32>)> = Vec::new();

        for candidate in &extraction.pictures {
            let caption = candidate
                .caption
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string();

            let caption_emb = self
                .caption_embedding(&caption, candidate.page)
                .await
                .map_err(|source| IngestError::Embedding {
                    stage: "image-caption",
                    source,
                })?;

            let image_url = candidate.image_path.as_deref().and_then(|src| {
                self.move_derivative(src, &paths.pictures_dir, &paths.rel_prefix, "pictures")
            });

            let asset = NewAsset {
                sha256: stored.sha256.clone(),
                filepath: original_name.to_string(),
                page: candidate.page,
                kind: AssetKind::Image,
                image_url,
                caption_text: (!caption.is_empty()).then(|| caption.clone()),
                caption_emb: caption_emb.clone(),
                meta: serde_json::json!({ "engine": extraction.engine }),
            };

            let asset_id = match self.store.insert_asset(&asset) {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(file = original_name, "image asset skipped: {error}");
                    continue;
                }
            };

            // A computed caption embedding always materializes a caption
            // fragment so the image participates in retrieval.
            if let Some(vector) = caption_emb {
                let meta = FragmentMeta {
                    kind: Some(FragmentKind::ImageCaption),
                    sha256: Some(stored.sha256.clone()),
                    filepath: Some(original_name.to_string()),
                    stored_path: Some(stored.rel.clone()),
                    asset_id: Some(asset_id),
                    caption: Some(caption.clone()),
                    page: candidate.page,
                    ..FragmentMeta::default()
                };
                caption_items.push((caption.clone(), meta, vector));
            }
        }

        self.insert_fragments_bounded("image-caption-fragments", caption_items)
            .await
    }

    async fn index_prose(
        &self,
        text: &str,
        kind: SourceKind,
        original_name: &str,
        stored: &StoredOriginal,
    ) -> Result<usize, IngestError> {
        if text.trim().is_empty() {
            return Ok(0);
        }

        let chunks = chunk(
            text,
            self.config.chunk_size_tokens,
            self.config.chunk_overlap_tokens,
        )
        .map_err(|error| IngestError::Internal {
            stage: "chunking",
            message: error.to_string(),
        })?;

        let chunks = apply_chunk_caps(chunks, self.config.fast_mode, self.config.max_chunks_emb);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, EmbedMode::Passage)
            .await
            .map_err(|source| IngestError::Embedding {
                stage: "prose-embedding",
                source,
            })?;

        let fragment_kind = kind.fragment_kind();
        let items: Vec<(String, FragmentMeta, Vec<f32>)> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (chunk, vector))| {
                let meta = FragmentMeta {
                    kind: Some(fragment_kind),
                    sha256: Some(stored.sha256.clone()),
                    filepath: Some(original_name.to_string()),
                    stored_path: Some(stored.rel.clone()),
                    chunk_index: Some(chunk_index),
                    start_tok: Some(chunk.start_tok),
                    end_tok: Some(chunk.end_tok),
                    ..FragmentMeta::default()
                };
                (chunk.text, meta, vector)
            })
            .collect();

        self.insert_fragments_bounded("prose-fragments", items)
            .await
    }

    /// Commit fragments with a bounded fan-out. The first failure aborts
    /// the remaining inserts; fragments already committed stay indexed.
    async fn insert_fragments_bounded(
        &self,
        stage: &'static str,
        items: Vec<(String, FragmentMeta, Vec<f32>)>,
    ) -> Result<usize, IngestError> {
        if items.is_empty() {
            return Ok(0);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.insert_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (content, meta, vector) in items {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("insert semaphore closed");
            let store = Arc::clone(&self.store);
            join_set.spawn_blocking(move || {
                let _permit = permit;
                store.insert_fragment(&content, &meta, &vector)
            });
        }

        let mut inserted = 0usize;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(_)) => inserted += 1,
                Ok(Err(source)) => {
                    join_set.abort_all();
                    return Err(IngestError::Store { stage, source });
                }
                Err(join_error) => {
                    join_set.abort_all();
                    return Err(IngestError::Internal {
                        stage,
                        message: join_error.to_string(),
                    });
                }
            }
        }

        Ok(inserted)
    }

    /// Embed a caption when it is non-empty, on an early-enough page, and
    /// fast mode is off.
    async fn caption_embedding(
        &self,
        caption: &str,
        page: Option<i64>,
    ) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if self.config.fast_mode || caption.is_empty() {
            return Ok(None);
        }
        if page.unwrap_or(1) > self.config.max_caption_pages {
            return Ok(None);
        }

        self.embedder
            .embed_one(caption, EmbedMode::Passage)
            .await
            .map(Some)
    }

    /// Move an extractor artifact into the uploads tree and return its
    /// relative URL. Best-effort: a failed move logs and yields `None`.
    fn move_derivative(
        &self,
        source: &str,
        dest_dir: &Path,
        rel_prefix: &str,
        kind: &str,
    ) -> Option<String> {
        let source = Path::new(source);
        let file_name = source.file_name()?.to_string_lossy().into_owned();

        let result = fs::create_dir_all(dest_dir)
            .and_then(|_| move_file(source, &dest_dir.join(&file_name)));

        match result {
            Ok(()) => Some(format!("{rel_prefix}/{kind}/{file_name}")),
            Err(error) => {
                tracing::warn!(
                    source = %source.display(),
                    "derivative move failed: {error}"
                );
                None
            }
        }
    }
}

fn extraction_from_parsed(parsed: ParsedDocument, scratch: PathBuf) -> Extraction {
    let engine = parsed.engine.clone();
    let tables = parsed
        .tables
        .into_iter()
        .map(|table| {
            let html = table
                .html
                .clone()
                .or_else(|| table.metadata.as_ref().and_then(|m| m.text_as_html.clone()));
            TableCandidate {
                page: table.page,
                caption: table.caption,
                image_path: table.image_path,
                source: table.source,
                shape: TableShape {
                    html,
                    header: table.header,
                    rows: table.rows,
                    preview_rows: table.preview_rows,
                    n_rows: table.n_rows,
                    n_cols: table.n_cols,
                },
            }
        })
        .collect();

    let pictures = parsed
        .pictures
        .into_iter()
        .map(|picture| PictureCandidate {
            page: picture.page,
            caption: picture.caption,
            image_path: picture.image_path,
        })
        .collect();

    Extraction {
        text: clean_text(&parsed.text),
        tables,
        pictures,
        engine,
        scratch: Some(scratch),
    }
}

fn apply_chunk_caps(chunks: Vec<TextChunk>, fast_mode: bool, max_chunks: usize) -> Vec<TextChunk> {
    let mut chunks = chunks;
    if fast_mode && chunks.len() > FAST_MODE_CHUNK_CAP {
        chunks.truncate(FAST_MODE_CHUNK_CAP);
    } else if max_chunks > 0 && chunks.len() > max_chunks {
        chunks.truncate(max_chunks);
    }
    chunks
}

async fn convert_hwp(converter: &Path, input: &Path) -> Result<String, IngestError> {
    let output = tokio::process::Command::new(converter)
        .arg(input)
        .output()
        .await
        .map_err(|error| IngestError::HwpConversion(error.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::HwpConversion(stderr.trim().to_string()));
    }

    Ok(decode_text_bytes(&output.stdout).text)
}

fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device moves fall back to copy-then-remove.
            fs::copy(source, dest)?;
            fs::remove_file(source)
        }
    }
}

fn move_page_files(source_dir: &Path, dest_dir: &Path) -> std::io::Result<usize> {
    if !source_dir.is_dir() {
        return Ok(0);
    }
    fs::create_dir_all(dest_dir)?;

    let mut moved = 0usize;
    for entry in fs::read_dir(source_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let lower = name.to_lowercase();
        let is_page_raster = (lower.starts_with("page") || source_dir.ends_with("pages"))
            && (lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png"));
        if !is_page_raster {
            continue;
        }

        move_file(&path, &dest_dir.join(&name))?;
        moved += 1;
    }

    Ok(moved)
}
