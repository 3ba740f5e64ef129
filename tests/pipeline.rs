//! Library-level tests for the ingest → store → retrieve → answer pipeline.
//!
//! These drive [`KnowledgeBase`] directly with deterministic fake gateways,
//! so scores and chunk boundaries are predictable.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use kbase::config::Config;
use kbase::embedding::EmbeddingGateway;
use kbase::generation::{GenerationGateway, GenerationOptions};
use kbase::ingest::{document_id_for, Upload};
use kbase::knowledge::{AskOptions, KnowledgeBase, NO_CONTEXT_ANSWER};
use kbase::store::memory::InMemoryStore;
use kbase::store::sqlite::SqliteStore;
use kbase::store::VectorStore;
use kbase::Error;

const DIMS: usize = 3;

/// Embeds by keyword counts: axis 0 counts "apple", axis 1 counts "banana",
/// axis 2 is a constant bias so no vector is zero.
///
/// Setting `stall` makes every later call hang until the caller times out.
struct KeywordGateway {
    stall: AtomicBool,
    calls: AtomicUsize,
}

impl KeywordGateway {
    fn new() -> Self {
        Self {
            stall: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0, 0.0, 1.0];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            match token.to_lowercase().as_str() {
                "apple" => v[0] += 1.0,
                "banana" => v[1] += 1.0,
                _ => {}
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingGateway for KeywordGateway {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> kbase::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Returns a fixed answer and counts calls.
struct CannedGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl GenerationGateway for CannedGenerator {
    fn model_name(&self) -> &str {
        "canned"
    }
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> kbase::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("[1] "));
        Ok("Apples, mostly.".to_string())
    }
}

fn config() -> Config {
    let src = format!(
        r#"
        [store]
        path = "unused.sqlite"
        backend = "memory"
        max_top_k = 10

        [chunking]
        chunk_size = 100
        chunk_overlap = 20

        [retrieval]
        default_top_k = 2
        max_context_size = 1000

        [embedding]
        provider = "hashing"
        dims = {dims}
        timeout_secs = 1
        "#,
        dims = DIMS,
    );
    toml::from_str(&src).unwrap()
}

struct Harness {
    kb: Arc<KnowledgeBase>,
    embedder: Arc<KeywordGateway>,
    generator: Arc<CannedGenerator>,
}

fn harness_with_store(store: Arc<dyn VectorStore>) -> Harness {
    let embedder = Arc::new(KeywordGateway::new());
    let generator = Arc::new(CannedGenerator {
        calls: AtomicUsize::new(0),
    });
    let kb = KnowledgeBase::new(&config(), store, embedder.clone(), generator.clone());
    Harness {
        kb: Arc::new(kb),
        embedder,
        generator,
    }
}

fn harness() -> Harness {
    harness_with_store(Arc::new(InMemoryStore::new(DIMS, 10)))
}

/// 250 characters about apples.
fn doc_a() -> String {
    let mut text = "apple ".repeat(41);
    text.push_str("pie!");
    assert_eq!(text.chars().count(), 250);
    text
}

/// 180 characters about bananas.
fn doc_b() -> String {
    let mut text = "banana ".repeat(25);
    text.push_str("split");
    assert_eq!(text.chars().count(), 180);
    text
}

#[tokio::test]
async fn test_reference_chunk_offsets() {
    let h = harness();
    let report = h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    assert_eq!(report.chunk_count, 3);

    let doc = h.kb.get_document(&report.document_id).await.unwrap().unwrap();
    let spans: Vec<_> = doc.chunks.iter().map(|c| (c.start, c.end)).collect();
    assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
    assert_eq!(doc.chunks[2].text.chars().count(), 90);
}

#[tokio::test]
async fn test_delete_removes_document_from_results() {
    let h = harness();
    let a = h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    let b = h.kb.ingest(Upload::new("b.txt", doc_b())).await.unwrap();
    assert_eq!(a.chunk_count, 3);
    assert_eq!(b.chunk_count, 2);

    let before = h.kb.query("apple", Some(2), None).await.unwrap();
    assert_eq!(before.results.len(), 2);
    assert!(before.results.iter().all(|r| r.document_id == a.document_id));

    assert!(h.kb.delete_document(&a.document_id).await.unwrap());

    let after = h.kb.query("apple", Some(2), None).await.unwrap();
    assert!(!after.results.is_empty() && after.results.len() <= 2);
    assert!(after.results.iter().all(|r| r.document_id == b.document_id));

    let docs = h.kb.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].filename, "b.txt");
}

#[tokio::test]
async fn test_results_sorted_and_bounded() {
    let h = harness();
    h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    h.kb.ingest(Upload::new("b.txt", doc_b())).await.unwrap();

    for k in 1..=8 {
        let response = h.kb.query("apple banana", Some(k), None).await.unwrap();
        assert!(response.results.len() <= k);
        assert!(response.results.len() <= 5);
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        let ranks: Vec<_> = response.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=response.results.len()).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_context_respects_budget() {
    let h = harness();
    h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    h.kb.ingest(Upload::new("b.txt", doc_b())).await.unwrap();

    let response = h.kb.query("apple", Some(5), None).await.unwrap();
    assert!(response.context.size <= 1000);
    for entry in &response.context.entries {
        let hit = response
            .results
            .iter()
            .find(|r| r.chunk_id == entry.chunk_id)
            .unwrap();
        assert!(response.context.text.contains(&hit.text));
    }
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let h = harness();
    let first = h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    let second = h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    assert_eq!(first.document_id, second.document_id);
    assert_eq!(first.chunk_count, second.chunk_count);

    let stats = h.kb.stats().await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_chunks, 3);
}

#[tokio::test]
async fn test_clear_then_list_is_empty() {
    let h = harness();
    h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    h.kb.ingest(Upload::new("b.txt", doc_b())).await.unwrap();

    h.kb.clear_all().await.unwrap();
    assert!(h.kb.list_documents().await.unwrap().is_empty());
    assert!(h.kb.query("apple", None, None).await.unwrap().results.is_empty());
}

#[tokio::test]
async fn test_embedding_timeout_leaves_store_untouched() {
    let h = harness();
    let original = h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();

    h.embedder.stall.store(true, Ordering::SeqCst);
    let err = h
        .kb
        .ingest(Upload::new("a.txt", doc_b()))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), Error::EmbeddingService(_)), "{err}");
    assert!(err.to_string().contains("a.txt"));

    let doc = h.kb.get_document(&original.document_id).await.unwrap().unwrap();
    assert_eq!(doc.chunks.len(), 3);
    assert!(doc.chunks[0].text.starts_with("apple"));
}

#[tokio::test]
async fn test_ask_uses_generator_only_with_context() {
    let h = harness();
    let empty = h.kb.ask("apple?", &AskOptions::default()).await.unwrap();
    assert_eq!(empty.answer, NO_CONTEXT_ANSWER);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);

    h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
    let answer = h.kb.ask("apple?", &AskOptions::default()).await.unwrap();
    assert_eq!(answer.answer, "Apples, mostly.");
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.metadata.model, "canned");
    assert_eq!(answer.metadata.chunks_used, 2);
}

#[tokio::test]
async fn test_invalid_requests_do_not_embed() {
    let h = harness();
    let calls = h.embedder.calls.load(Ordering::SeqCst);

    assert!(matches!(
        h.kb.query("   ", None, None).await,
        Err(Error::Query(_))
    ));
    assert!(matches!(
        h.kb.query("apple", Some(0), None).await,
        Err(Error::Query(_))
    ));
    let err = h
        .kb
        .ingest(Upload::new("a.exe", "apple"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unsupported_file_type");

    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_sqlite_backend_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");

    let document_id = {
        let store = SqliteStore::open(&path, DIMS, 10).await.unwrap();
        let h = harness_with_store(Arc::new(store));
        h.kb.ingest(Upload::new("a.txt", doc_a())).await.unwrap();
        h.kb.ingest(Upload::new("b.txt", doc_b()))
            .await
            .unwrap()
            .document_id
    };

    let store = SqliteStore::open(&path, DIMS, 10).await.unwrap();
    let h = harness_with_store(Arc::new(store));
    let docs = h.kb.list_documents().await.unwrap();
    let names: Vec<_> = docs.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);

    let response = h.kb.query("banana", Some(1), None).await.unwrap();
    assert_eq!(response.results[0].document_id, document_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_and_query() {
    let h = harness();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let kb = h.kb.clone();
        let text = if i % 2 == 0 { doc_a() } else { doc_b() };
        tasks.push(tokio::spawn(async move {
            kb.ingest(Upload::new(format!("doc-{i}.txt"), text)).await
        }));
    }
    // Same filename racing with itself must end as a single document.
    for _ in 0..4 {
        let kb = h.kb.clone();
        tasks.push(tokio::spawn(async move {
            kb.ingest(Upload::new("shared.txt", doc_a())).await
        }));
    }
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let kb = h.kb.clone();
            tokio::spawn(async move { kb.query("apple", Some(3), None).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    for reader in readers {
        let response = reader.await.unwrap().unwrap();
        assert!(response.results.len() <= 3);
    }

    let docs = h.kb.list_documents().await.unwrap();
    assert_eq!(docs.len(), 9);
    let shared = docs.iter().find(|d| d.filename == "shared.txt").unwrap();
    assert_eq!(shared.chunk_count, 3);

    let stats = h.kb.stats().await.unwrap();
    assert_eq!(stats.total_chunks, 4 * 3 + 4 * 2 + 3);
}

/// Writers flip `shared.txt` between the apple and banana versions while
/// readers check that every snapshot they see is one whole version.
async fn alternate_versions_under_readers(h: Harness) {
    let shared_id = document_id_for("shared.txt");
    h.kb.ingest(Upload::new("shared.txt", doc_a())).await.unwrap();

    let writers: Vec<_> = (0..12)
        .map(|i| {
            let kb = h.kb.clone();
            let text = if i % 2 == 0 { doc_b() } else { doc_a() };
            tokio::spawn(async move { kb.ingest(Upload::new("shared.txt", text)).await })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let kb = h.kb.clone();
            let id = shared_id.clone();
            tokio::spawn(async move {
                for _ in 0..40 {
                    let doc = kb.get_document(&id).await.unwrap().unwrap();
                    let apples = doc.chunks.iter().filter(|c| c.text.contains("apple")).count();
                    let bananas = doc.chunks.iter().filter(|c| c.text.contains("banana")).count();
                    assert!(
                        (apples == 3 && bananas == 0) || (apples == 0 && bananas == 2),
                        "mixed chunk set: {apples} apple, {bananas} banana"
                    );

                    let response = kb.query("apple banana", Some(10), None).await.unwrap();
                    let apples = response.results.iter().filter(|r| r.text.contains("apple")).count();
                    let bananas = response.results.iter().filter(|r| r.text.contains("banana")).count();
                    assert!(apples == 0 || bananas == 0, "query mixed versions");
                    assert!(apples <= 3 && bananas <= 2);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap().unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    let docs = h.kb.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert!(docs[0].chunk_count == 3 || docs[0].chunk_count == 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_mixed_versions_in_memory() {
    alternate_versions_under_readers(harness()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_mixed_versions_in_sqlite() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&tmp.path().join("kb.sqlite"), DIMS, 10)
        .await
        .unwrap();
    alternate_versions_under_readers(harness_with_store(Arc::new(store))).await;
}

#[tokio::test]
async fn test_blank_reupload_removes_document() {
    let h = harness();
    let first = h.kb.ingest(Upload::new("notes.txt", doc_a())).await.unwrap();
    let calls = h.embedder.calls.load(Ordering::SeqCst);

    let blank = h.kb.ingest(Upload::new("notes.txt", "   ")).await.unwrap();
    assert_eq!(blank.document_id, first.document_id);
    assert_eq!(blank.chunk_count, 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), calls);

    assert!(h.kb.get_document(&first.document_id).await.unwrap().is_none());
    assert!(h.kb.query("apple", None, None).await.unwrap().results.is_empty());
    assert_eq!(h.kb.stats().await.unwrap().total_chunks, 0);
}
