//! Frame codec and interceptor pipeline benchmarks.
//!
//! - Codec: parse and stringify of a typical `perplexity_ask` frame
//! - Pipeline: one inbound frame walking N pass-through interceptors
//! - Rewrite: query rewriting over a parsed envelope
//!
//! Run with: cargo bench --bench pipeline
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

use cplx_bridge::messenger::Pipeline;
use cplx_bridge::policy::{MemoryCache, rewrite_ask};
use cplx_bridge::{
    Envelope, Interceptor, MatchOutcome, MessageData, QueryBoxSnapshot, Settings, Verdict, parse,
    stringify,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const INTERCEPTOR_COUNTS: &[usize] = &[1, 10, 50];

fn ask_envelope() -> Envelope {
    Envelope::event(
        420,
        "perplexity_ask",
        vec![
            json!("what is the borrow checker?"),
            json!({
                "version": "2.13",
                "source": "default",
                "query_source": "home",
                "frontend_uuid": "7b7bd4d2-5d3e-4b67-9b54-3f8a7c3f3a2e",
                "language": "en-US",
                "search_focus": "internet",
                "mode": "concise",
                "is_related_query": false,
                "is_default_related_query": false,
            }),
        ],
    )
}

// ============================================================================
// Benchmark: Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let envelope = ask_envelope();
    let raw = stringify(&envelope);

    let mut group = c.benchmark_group("codec");

    group.bench_function("parse", |b| b.iter(|| parse(black_box(&raw))));
    group.bench_function("stringify", |b| b.iter(|| stringify(black_box(&envelope))));

    group.finish();
}

// ============================================================================
// Benchmark: Pipeline Walk
// ============================================================================

fn bench_pipeline_walk(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let raw = stringify(&ask_envelope());

    let mut group = c.benchmark_group("pipeline_walk");

    for &count in INTERCEPTOR_COUNTS {
        let pipeline = Pipeline::new();
        let handles: Vec<_> = (0..count)
            .map(|_| {
                pipeline.register(Interceptor::new(
                    |message: &MessageData| MatchOutcome::from_bool(message.frame_text().is_some()),
                    |message, ()| async move { Ok(Verdict::Forward(message)) },
                ))
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("forward", count), &count, |b, _| {
            b.to_async(&rt).iter(|| async {
                pipeline
                    .run(MessageData::web_socket("send", raw.clone()))
                    .await
            });
        });

        drop(handles);
    }

    group.finish();
}

// ============================================================================
// Benchmark: Query Rewrite
// ============================================================================

fn bench_rewrite(c: &mut Criterion) {
    let envelope = ask_envelope();
    let settings = Settings::default();
    let cache = MemoryCache::new();
    let query_box = QueryBoxSnapshot {
        selected_language_model: "claude2".to_string(),
        focus_mode: "writing".to_string(),
        ..QueryBoxSnapshot::default()
    };

    c.bench_function("rewrite_ask", |b| {
        b.iter(|| rewrite_ask(black_box(&envelope), &settings, &query_box, &cache));
    });
}

criterion_group!(benches, bench_codec, bench_pipeline_walk, bench_rewrite);
criterion_main!(benches);
