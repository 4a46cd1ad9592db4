use super::*;
use std::sync::atomic::AtomicUsize;

/// Deterministic provider: vector is `[len, first byte]`, counts calls and texts.
#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
    texts: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        if self.fail {
            return Err(RagError::Embedding("model not loaded".to_string()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let first = text.bytes().next().map_or(0.0, f32::from);
                vec![text.len() as f32, first]
            })
            .collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(2)
    }
}

fn strings(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|text| (*text).to_string()).collect()
}

#[test]
fn cache_hit_and_miss() {
    let cache = EmbeddingCache::new(100);

    assert!(cache.get("hello").is_none());
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 0);

    cache.insert("hello", vec![1.0, 2.0, 3.0]);
    let result = cache.get("hello").expect("cached embedding");
    assert_eq!(result, vec![1.0, 2.0, 3.0]);
    assert_eq!(cache.stats().hits, 1);
}

#[test]
fn cache_eviction() {
    let cache = EmbeddingCache::new(2);

    cache.insert("a", vec![1.0]);
    cache.insert("b", vec![2.0]);
    cache.insert("c", vec![3.0]); // evicts "a"

    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
    assert_eq!(cache.len(), 2);
}

#[test]
fn hit_rate_calculation() {
    let cache = EmbeddingCache::new(100);
    assert!(cache.stats().hit_rate().abs() < f64::EPSILON);

    cache.insert("x", vec![1.0]);
    cache.get("x"); // hit
    cache.get("y"); // miss
    let stats = cache.stats();
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.capacity, 100);
}

#[test]
fn keys_are_exact_content_hashes() {
    assert_eq!(EmbeddingCache::key("abc"), EmbeddingCache::key("abc"));
    assert_ne!(EmbeddingCache::key("abc"), EmbeddingCache::key("abc "));
}

#[test]
fn zero_capacity_is_clamped() {
    let cache = EmbeddingCache::new(0);
    assert_eq!(cache.stats().capacity, 1);
    assert!(
        CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        }
        .validate()
        .is_err()
    );
}

#[tokio::test]
async fn identical_texts_are_embedded_once() {
    let provider = Arc::new(CountingProvider::default());
    let cache = Arc::new(EmbeddingCache::new(100));
    let embedder = CachedEmbedder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, cache);

    let texts = strings(&["alpha", "beta", "alpha", "gamma", "beta"]);
    let vectors = embedder.embed(&texts).await.expect("embedding should succeed");

    assert_eq!(vectors.len(), 5);
    assert_eq!(vectors[0], vectors[2]);
    assert_eq!(vectors[1], vectors[4]);
    assert_eq!(vectors[3], vec![5.0, f32::from(b'g')]);
    assert_eq!(provider.texts.load(Ordering::SeqCst), 3);

    let again = embedder.embed(&texts).await.expect("embedding should succeed");
    assert_eq!(again, vectors);
    assert_eq!(provider.texts.load(Ordering::SeqCst), 3);
    assert_eq!(embedder.cache().stats().hits, 5);
}

#[tokio::test]
async fn misses_are_batched() {
    let provider = Arc::new(CountingProvider::default());
    let embedder = CachedEmbedder::new(
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
        Arc::new(EmbeddingCache::new(100)),
    )
    .with_batch_size(2)
    .with_concurrency(2);

    let texts = strings(&["a", "bb", "ccc", "dddd", "eeeee"]);
    let vectors = embedder.embed(&texts).await.expect("embedding should succeed");

    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(embedder.dimension(), Some(2));
}

#[tokio::test]
async fn failures_are_not_cached() {
    let provider = Arc::new(CountingProvider {
        fail: true,
        ..CountingProvider::default()
    });
    let cache = Arc::new(EmbeddingCache::new(100));
    let embedder = CachedEmbedder::new(
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
        Arc::clone(&cache),
    );

    let result = embedder.embed(&strings(&["alpha"])).await;
    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn embed_one_uses_the_cache() {
    let provider = Arc::new(CountingProvider::default());
    let embedder = CachedEmbedder::new(
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
        Arc::new(EmbeddingCache::new(10)),
    );

    let first = embedder.embed_one("query").await.expect("embedding should succeed");
    let second = embedder.embed_one("query").await.expect("embedding should succeed");
    assert_eq!(first, second);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}
