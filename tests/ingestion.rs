//! Integration tests for batched ingestion.
//!
//! A keyword embedder stands in for a real encoder: each sentence maps to a
//! one-hot vector chosen by the first keyword it contains.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use sentencedb::{
    Config, EmbeddingService, FileOutcome, IndexKind, Result, SentenceDB, SentenceDBError,
};
use tempfile::tempdir;

const KEYWORDS: [&str; 4] = ["storage", "index", "search", "ingest"];

struct KeywordEmbedder {
    batches: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            batches: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingService for KeywordEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|text| {
                if text.contains("garbled") {
                    return Err(SentenceDBError::embedding("cannot encode garbled text"));
                }
                let mut v = vec![0.0; KEYWORDS.len()];
                let hit = KEYWORDS.iter().position(|k| text.contains(k)).unwrap_or(0);
                v[hit] = 1.0;
                Ok(v)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        KEYWORDS.len()
    }
}

/// Splits on periods, the way a trivial sentence splitter would.
fn split_sentences(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

fn sentences(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| t.to_string()).collect()
}

#[test]
fn test_ingest_then_search() {
    let dir = tempdir().unwrap();
    let db = SentenceDB::open(dir.path().join("test.db"), Config::default()).unwrap();
    let embedder = KeywordEmbedder::new();

    let report = db
        .ingest_sentences(
            "notes.md",
            "/notes.md",
            &sentences(&["the storage layer", "the index layer", "the search layer"]),
            &embedder,
        )
        .unwrap();
    assert_eq!(report.embedded, 3);
    assert_eq!(db.embedding_dimension(), Some(4));

    db.build_index(IndexKind::Flat).unwrap();
    let top = db.search_text("search please", 1, 0.5, &embedder).unwrap().into_results();
    assert_eq!(top[0].text, "the search layer");
    assert_eq!(top[0].position, 2);
}

#[test]
fn test_batch_size_from_config() {
    let dir = tempdir().unwrap();
    let config = Config {
        batch_size: 4,
        ..Default::default()
    };
    let db = SentenceDB::open(dir.path().join("test.db"), config).unwrap();
    let embedder = KeywordEmbedder::new();

    let texts: Vec<String> = (0..10).map(|i| format!("index entry {}", i)).collect();
    let report = db.ingest_sentences("a.md", "/a.md", &texts, &embedder).unwrap();

    assert_eq!(report.embedded, 10);
    assert_eq!(embedder.batches.load(Ordering::SeqCst), 3);
}

#[test]
fn test_failed_batch_does_not_abort_document() {
    let dir = tempdir().unwrap();
    let config = Config {
        batch_size: 2,
        ..Default::default()
    };
    let db = SentenceDB::open(dir.path().join("test.db"), config).unwrap();
    let embedder = KeywordEmbedder::new();

    let report = db
        .ingest_sentences(
            "a.md",
            "/a.md",
            &sentences(&["storage", "index", "garbled", "search", "ingest"]),
            &embedder,
        )
        .unwrap();

    assert_eq!(report.embedded, 3);
    assert_eq!(report.unembedded, 2);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!((report.failed_batches[0].start, report.failed_batches[0].end), (2, 4));

    // Text of the failed batch is kept, without embeddings.
    let stored = db.document_sentences(report.document_id).unwrap();
    assert_eq!(stored.len(), 5);
    assert_eq!(db.stats().unwrap().embeddings, 3);
}

#[test]
fn test_rebuild_after_ingest() {
    let dir = tempdir().unwrap();
    let config = Config {
        rebuild_after_ingest: true,
        ..Default::default()
    };
    let db = SentenceDB::open(dir.path().join("test.db"), config).unwrap();
    let embedder = KeywordEmbedder::new();

    db.ingest_sentences("a.md", "/a.md", &sentences(&["storage first"]), &embedder)
        .unwrap();
    assert_eq!(db.index_stats().unwrap().unwrap().total_vectors, 1);

    db.ingest_sentences("b.md", "/b.md", &sentences(&["index second"]), &embedder)
        .unwrap();
    assert_eq!(db.index_stats().unwrap().unwrap().total_vectors, 2);
}

#[test]
fn test_directory_ingestion_reports_each_file() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(corpus.join("sub")).unwrap();
    std::fs::write(corpus.join("one.md"), "storage is durable. index is derived.").unwrap();
    std::fs::write(corpus.join("two.txt"), "search is fast.").unwrap();
    std::fs::write(corpus.join("sub").join("three.md"), "ingest in batches.").unwrap();
    std::fs::write(corpus.join("image.png"), [0u8, 1, 2]).unwrap();

    let db = SentenceDB::open(dir.path().join("test.db"), Config::default()).unwrap();
    let embedder = KeywordEmbedder::new();
    let report = db
        .ingest_directory(&corpus, &split_sentences, &embedder)
        .unwrap();

    assert_eq!(report.files.len(), 3);
    assert_eq!(report.failed_files(), 0);
    assert_eq!(report.total_embedded(), 4);
    assert_eq!(db.list_documents().unwrap().len(), 3);

    let filenames: Vec<String> = report
        .files
        .iter()
        .filter_map(FileOutcome::report)
        .map(|r| r.path.clone())
        .collect();
    assert!(filenames.iter().any(|p| p.ends_with("three.md")));
}

#[test]
fn test_directory_ingestion_tolerates_unreadable_file() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("good.md"), "storage works.").unwrap();
    std::fs::write(corpus.join("bad.md"), [0xffu8, 0xfe, 0x00]).unwrap();

    let db = SentenceDB::open(dir.path().join("test.db"), Config::default()).unwrap();
    let embedder = KeywordEmbedder::new();
    let report = db
        .ingest_directory(&corpus, &split_sentences, &embedder)
        .unwrap();

    assert_eq!(report.files.len(), 2);
    assert_eq!(report.failed_files(), 1);
    assert_eq!(report.total_embedded(), 1);
    match &report.files[0] {
        FileOutcome::Failed { path, .. } => assert!(path.ends_with("bad.md")),
        other => panic!("expected bad.md to fail, got {:?}", other),
    }
}
