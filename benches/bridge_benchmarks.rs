//! Performance benchmarks for the voice call bridge hot paths
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::time::Duration;
use voice_call_bridge::core::frames::{InboundFrame, audio_frame, stop_audio_frame};
use voice_call_bridge::{
    ClientFrame, FunctionCallRecord, PromptTemplate, ServiceEvent, Transcript, classify,
};

/// Service event parsing plus classification, per event kind
fn bench_event_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_classification");
    group.measurement_time(Duration::from_secs(5));

    let audio_delta = json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "delta": "A".repeat(1920),
    })
    .to_string();
    let transcription = json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": "item_1",
        "transcript": "I would like to move my delivery to Thursday morning.",
        "audio_start_ms": 3400,
    })
    .to_string();
    let function_call = json!({
        "type": "response.function_call_arguments.done",
        "call_id": "call_1",
        "name": "delivery-schedule_delivery",
        "arguments": "{\"slot_id\":\"3\"}",
    })
    .to_string();

    for (name, text) in [
        ("audio_delta", &audio_delta),
        ("transcription", &transcription),
        ("function_call", &function_call),
    ] {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, text.len()), text, |b, text| {
            b.iter(|| {
                let event = ServiceEvent::from_json(black_box(text)).unwrap();
                black_box(classify(&event));
            });
        });
    }

    group.finish();
}

/// Telephony frame encoding and decoding
fn bench_audio_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_frames");

    // 20 ms of 24 kHz 16-bit mono PCM
    let chunk = vec![0x55u8; 960];
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("encode_audio_20ms", |b| {
        b.iter(|| black_box(audio_frame(black_box(&chunk))));
    });

    let inbound = audio_frame(&chunk);
    group.throughput(Throughput::Bytes(inbound.len() as u64));
    group.bench_function("parse_inbound_audio_20ms", |b| {
        b.iter(|| {
            let _: Result<InboundFrame, _> = InboundFrame::parse(black_box(&inbound));
        });
    });

    group.bench_function("stop_audio", |b| {
        b.iter(|| black_box(stop_audio_frame()));
    });

    group.finish();
}

/// ChatHistory delta serialization for growing transcripts
fn bench_chat_history_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("chat_history_delta");

    for turns in [1usize, 10, 50] {
        let mut transcript = Transcript::new();
        for i in 0..turns {
            transcript.add_user_message(format!("Customer utterance number {i}"));
            transcript.add_function_invocation(FunctionCallRecord::Invocation {
                function_name: "get_delivery_slots".to_string(),
                plugin_name: "delivery".to_string(),
                arguments: json!({"date": "2026-10-15"}),
            });
            transcript.add_assistant_message(format!("Assistant reply number {i}"));
        }

        group.throughput(Throughput::Elements(transcript.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("serialize", transcript.len()),
            &transcript,
            |b, transcript| {
                b.iter(|| {
                    let frame = ClientFrame::ChatHistory {
                        data: transcript.since(0),
                    };
                    black_box(frame.to_text().unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_prompt_rendering(c: &mut Criterion) {
    let template = PromptTemplate::default();
    c.bench_function("render_agent_prompt", |b| {
        b.iter(|| black_box(template.render_agent(black_box("Sam"))));
    });
}

criterion_group!(
    benches,
    bench_event_classification,
    bench_audio_frames,
    bench_chat_history_delta,
    bench_prompt_rendering,
);
criterion_main!(benches);
