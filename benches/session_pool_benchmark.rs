use async_trait::async_trait;
use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{thread_rng, Rng};
use sabre_client::{
    ApiError, MemoryCache, PoolConfig, SessionPool, SessionToken, SessionTokenSource, SharedCache,
};
use std::sync::Arc;
use std::thread;

// Checkout/check-in never reaches the token source
struct NoopSource;

#[async_trait]
impl SessionTokenSource for NoopSource {
    async fn create(&self) -> Result<String, ApiError> {
        Ok(String::new())
    }

    async fn close(&self, _token: &SessionToken) -> Result<String, ApiError> {
        Ok(String::new())
    }

    async fn refresh(
        &self,
        _token: &SessionToken,
        _timestamp: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        Ok(String::new())
    }
}

fn seeded_pool(capacity: usize) -> Arc<SessionPool<MemoryCache, NoopSource>> {
    let cache = Arc::new(MemoryCache::new());
    for slot in 0..capacity {
        cache.set(&format!("session_{}", slot), format!("token-{}", slot));
    }
    cache.set("index_sessions", capacity.to_string());

    let config = PoolConfig {
        max_sessions: capacity,
        ..PoolConfig::default()
    };
    Arc::new(SessionPool::new(cache, Arc::new(NoopSource), config))
}

pub fn session_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_pool_checkout");

    for capacity in [1, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, &capacity| {
                b.iter(|| {
                    let pool = seeded_pool(capacity);

                    // Spawn multiple threads to simulate concurrent callers
                    let mut handles = vec![];
                    for _ in 0..4 {
                        let pool = Arc::clone(&pool);

                        let handle = thread::spawn(move || {
                            let mut rng = thread_rng();
                            for _ in 0..250 {
                                // Checkouts past the bounds are part of the workload
                                let _ = black_box(pool.acquire());
                                if rng.gen_bool(0.05) {
                                    let _ = black_box(pool.available());
                                }
                                let _ = pool.release();
                            }
                        });

                        handles.push(handle);
                    }

                    for handle in handles {
                        handle.join().unwrap();
                    }

                    black_box(pool.available())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, session_pool_benchmark);
criterion_main!(benches);
