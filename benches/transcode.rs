use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chat_bridge::assets::{encode_asset_path, AssetLinker};
use chat_bridge::config::TranscodeOptions;
use chat_bridge::session::Session;
use chat_bridge::stream::{EventTranscoder, NdjsonReassembler};

fn sample_lines() -> Vec<String> {
    let mut lines = Vec::with_capacity(64);
    for i in 0..16 {
        lines.push(format!(
            r#"{{"result":{{"response":{{"token":"thought {i} ","isThinking":true,"rolloutId":"Agent-1"}}}}}}"#
        ));
    }
    lines.push(
        r#"{"result":{"response":{"messageTag":"function_call","functionCall":{"name":"web_search","arguments":"{\"query\":\"rust ndjson\"}"}}}}"#
            .to_string(),
    );
    for i in 0..40 {
        lines.push(format!(
            r#"{{"result":{{"response":{{"token":"word {i} \"quoted\"\n","isThinking":false}}}}}}"#
        ));
    }
    lines.push(
        r#"{"result":{"response":{"modelResponse":{"message":"done"},"llmInfo":{"modelHash":"fp"}}}}"#
            .to_string(),
    );
    lines
}

fn transcoder(show_thinking: bool) -> EventTranscoder {
    EventTranscoder::new(
        Session::with_id("chatcmpl-bench".to_string(), 1_700_000_000, "bench-model"),
        Arc::new(TranscodeOptions {
            show_thinking,
            ..TranscodeOptions::default()
        }),
        AssetLinker::new(Some("https://proxy.example"), None),
    )
}

fn bench_event_transcoder(c: &mut Criterion) {
    let lines = sample_lines();
    for show_thinking in [false, true] {
        let name = format!("event_transcoder_session_thinking_{show_thinking}");
        c.bench_function(&name, |b| {
            b.iter(|| {
                let mut transcoder = transcoder(show_thinking);
                let mut frames = Vec::with_capacity(lines.len() + 2);
                for line in &lines {
                    transcoder.process_line(black_box(line), &mut frames);
                }
                transcoder.finish_input(&mut frames);
                black_box(frames.len());
            });
        });
    }
}

fn bench_ndjson_reassembly(c: &mut Criterion) {
    let body = sample_lines().join("\n").into_bytes();
    c.bench_function("ndjson_reassembly_64b_chunks", |b| {
        b.iter(|| {
            let mut reassembler = NdjsonReassembler::new();
            let mut lines = Vec::with_capacity(64);
            for chunk in body.chunks(64) {
                reassembler.feed_into(black_box(chunk), &mut lines);
            }
            reassembler.finish_into(&mut lines);
            black_box(lines.len());
        });
    });
}

fn bench_asset_codec(c: &mut Criterion) {
    let url = "https://assets.example.com/users/0f1e/generated/6a2b/image.jpg?sig=abc&exp=1";
    c.bench_function("encode_asset_path_url", |b| {
        b.iter(|| black_box(encode_asset_path(black_box(url))));
    });
}

criterion_group!(
    benches,
    bench_event_transcoder,
    bench_ndjson_reassembly,
    bench_asset_codec
);
criterion_main!(benches);
