use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory (opaque to the core — consumed by the memory capability)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub shared_directory: Option<PathBuf>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            directory: d_directory(),
            shared_directory: None,
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Embedding/BM25 index settings. The index itself is an external
/// collaborator; the gateway only passes this through and answers
/// `/index status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "d_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "d_bm25_weight")]
    pub bm25_weight: f32,
    #[serde(default = "d_top_k")]
    pub top_k: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: d_embedding_model(),
            api_base: None,
            api_key: None,
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            vector_weight: d_vector_weight(),
            bm25_weight: d_bm25_weight(),
            top_k: d_top_k(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_directory() -> PathBuf {
    PathBuf::from("./data/memory")
}
fn d_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn d_chunk_size() -> usize {
    800
}
fn d_chunk_overlap() -> usize {
    200
}
fn d_vector_weight() -> f32 {
    0.6
}
fn d_bm25_weight() -> f32 {
    0.4
}
fn d_top_k() -> usize {
    8
}
