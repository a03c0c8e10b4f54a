//! Streaming tests: chunk forwarding, fallback before the first chunk, and
//! the rule that only complete streams reach the cache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockBackend, Script, settle};
use futures_util::StreamExt;
use skald::{
    Fingerprint, HealthConfig, Skald, SpeechEvent, SpeechSynthesizer, StreamEnd, SynthesisRequest,
    SynthesisSettings,
};

fn request() -> SynthesisRequest {
    SynthesisRequest::new("Hello", "v1", SynthesisSettings::default())
}

fn synth(backends: &[Arc<MockBackend>]) -> SpeechSynthesizer {
    let mut builder = Skald::builder().timeout(Duration::from_secs(2));
    for backend in backends {
        builder = builder.backend(backend.clone());
    }
    builder.build().unwrap()
}

async fn collect(synth: &SpeechSynthesizer) -> Vec<skald::Result<Vec<u8>>> {
    synth.stream_request(&request()).collect().await
}

fn ok_chunks(items: Vec<skald::Result<Vec<u8>>>) -> Vec<Vec<u8>> {
    items.into_iter().map(|c| c.unwrap()).collect()
}

// ============================================================================
// Facade stream
// ============================================================================

#[tokio::test(start_paused = true)]
async fn complete_stream_is_forwarded_and_cached() {
    let a = MockBackend::streaming("a", Script::Chunks(vec![vec![1, 2], vec![3], vec![4, 5]]));
    let synth = synth(&[a.clone()]);

    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![1, 2], vec![3], vec![4, 5]]);

    let key = Fingerprint::of(&request());
    assert!(synth.cache().contains(&key));
    assert_eq!(
        synth.cache().try_get(&key).unwrap().as_ref(),
        &[1, 2, 3, 4, 5]
    );
}

#[tokio::test(start_paused = true)]
async fn cache_hit_replays_as_single_chunk() {
    let a = MockBackend::streaming("a", Script::Chunks(vec![vec![1, 2], vec![3]]));
    let synth = synth(&[a.clone()]);

    collect(&synth).await;
    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![1, 2, 3]]);
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_streaming_backend_yields_one_chunk() {
    let a = MockBackend::new("a", Script::Audio(vec![9, 8, 7]));
    let synth = synth(&[a.clone()]);

    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![9, 8, 7]]);
    assert!(synth.cache().contains(&Fingerprint::of(&request())));
}

#[tokio::test(start_paused = true)]
async fn failure_before_first_chunk_falls_through() {
    let a = MockBackend::streaming("a", Script::Fail);
    let b = MockBackend::streaming("b", Script::Chunks(vec![vec![7], vec![8]]));
    let synth = synth(&[a.clone(), b.clone()]);

    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![7], vec![8]]);
    assert_eq!(synth.backend_health()[0].consecutive_failures, 1);
    assert!(synth.cache().contains(&Fingerprint::of(&request())));
}

#[tokio::test(start_paused = true)]
async fn empty_stream_counts_as_failure() {
    let a = MockBackend::streaming("a", Script::Empty);
    let b = MockBackend::streaming("b", Script::Chunks(vec![vec![7]]));
    let synth = synth(&[a.clone(), b.clone()]);

    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![7]]);
    assert_eq!(synth.backend_health()[0].consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn mid_stream_failure_ends_incomplete_and_is_not_cached() {
    let a = MockBackend::streaming("a", Script::ChunksThenFail(vec![vec![1, 2]]));
    let b = MockBackend::streaming("b", Script::Chunks(vec![vec![9]]));
    let synth = synth(&[a.clone(), b.clone()]);

    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![1, 2]]);

    assert_eq!(b.calls(), 0, "another voice must not be spliced in");
    assert_eq!(synth.cache_stats().entries, 0);
    assert_eq!(synth.backend_health()[0].consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_times_out_mid_stream() {
    let a = MockBackend::streaming("a", Script::ChunksThenHang(vec![vec![1]]));
    let synth = synth(&[a.clone()]);

    let chunks = ok_chunks(collect(&synth).await);
    assert_eq!(chunks, vec![vec![1]]);
    assert_eq!(synth.cache_stats().entries, 0);
    assert_eq!(a.abandoned(), 1);
}

#[tokio::test(start_paused = true)]
async fn incomplete_stream_is_reported_as_an_event() {
    let a = MockBackend::streaming("a", Script::ChunksThenFail(vec![vec![1, 2]]));
    let synth = synth(&[a.clone()]);

    let events: Vec<SpeechEvent> = synth.stream_events(&request()).collect().await;
    assert_eq!(
        events,
        vec![
            SpeechEvent::Audio(vec![1, 2]),
            SpeechEvent::Finished(StreamEnd {
                backend: "a".to_string(),
                complete: false,
                terminal: false,
            }),
        ]
    );
    assert_eq!(synth.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn cached_stream_events_report_cache_source() {
    let a = MockBackend::streaming("a", Script::Chunks(vec![vec![1], vec![2]]));
    let synth = synth(&[a.clone()]);
    collect(&synth).await;

    let events: Vec<SpeechEvent> = synth.stream_events(&request()).collect().await;
    assert_eq!(
        events,
        vec![
            SpeechEvent::Audio(vec![1, 2]),
            SpeechEvent::Finished(StreamEnd {
                backend: skald::CACHE_SOURCE.to_string(),
                complete: true,
                terminal: false,
            }),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn empty_text_stream_finishes_silently() {
    let a = MockBackend::streaming("a", Script::Chunks(vec![vec![1]]));
    let synth = synth(&[a.clone()]);
    let request = SynthesisRequest::new("   ", "v1", SynthesisSettings::default());

    let events: Vec<SpeechEvent> = synth.stream_events(&request).collect().await;
    assert!(matches!(
        events.as_slice(),
        [SpeechEvent::Finished(end)] if end.terminal && end.complete
    ));
    assert_eq!(a.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_stream_is_not_cached() {
    let a = MockBackend::streaming("a", Script::ChunksThenHang(vec![vec![1], vec![2]]));
    let synth = synth(&[a.clone()]);

    let mut stream = synth.stream_request(&request());
    assert_eq!(stream.next().await.unwrap().unwrap(), vec![1]);
    drop(stream);
    settle().await;

    assert_eq!(synth.cache_stats().entries, 0);
    assert_eq!(synth.backend_health()[0].consecutive_failures, 0);
}

// Real clock: a paused clock would auto-advance into the backend timeout.
#[tokio::test]
async fn dropping_stream_cancels_the_backend_stream() {
    let a = MockBackend::streaming("a", Script::ChunksThenHang(vec![vec![1]]));
    let synth = Skald::builder()
        .backend(a.clone())
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap();

    let mut stream = synth.stream_request(&request());
    assert_eq!(stream.next().await.unwrap().unwrap(), vec![1]);
    settle().await;
    assert_eq!(a.abandoned(), 0, "backend stream still in flight");

    drop(stream);
    settle().await;
    assert_eq!(a.abandoned(), 1);
    assert_eq!(synth.backend_health()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn dropping_stream_cancels_a_pending_call() {
    let a = MockBackend::new("a", Script::Hang);
    let synth = Skald::builder()
        .backend(a.clone())
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap();

    let stream = synth.stream_request(&request());
    settle().await;
    assert_eq!(a.calls(), 1);
    assert_eq!(a.abandoned(), 0);

    drop(stream);
    settle().await;
    assert_eq!(a.abandoned(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_stream_ends_without_audio_or_error() {
    let a = MockBackend::streaming("a", Script::Fail);
    let synth = synth(&[a.clone()]);

    let items = collect(&synth).await;
    assert!(items.is_empty());
    assert_eq!(synth.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn stream_speech_normalizes_like_generate_speech() {
    let a = MockBackend::streaming("a", Script::Chunks(vec![vec![5]]));
    let synth = synth(&[a.clone()]);
    let settings = SynthesisSettings::default();

    let streamed: Vec<_> = synth
        .stream_speech(" Hello ", "v1", &settings)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(ok_chunks(streamed), vec![vec![5]]);

    let audio = synth.generate_speech("Hello", "v1", &settings).await.unwrap();
    assert_eq!(audio, vec![5]);
    assert_eq!(a.calls(), 1);
}

// ============================================================================
// Orchestrator events
// ============================================================================

#[tokio::test(start_paused = true)]
async fn orchestrator_stream_ends_with_one_finished_event() {
    let a = MockBackend::streaming("a", Script::Chunks(vec![vec![1], vec![2]]));
    let synth = synth(&[a.clone()]);

    let events: Vec<SpeechEvent> = synth
        .orchestrator()
        .synthesize_streaming(&request())
        .collect()
        .await;
    assert_eq!(
        events,
        vec![
            SpeechEvent::Audio(vec![1]),
            SpeechEvent::Audio(vec![2]),
            SpeechEvent::Finished(StreamEnd {
                backend: "a".to_string(),
                complete: true,
                terminal: false,
            }),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn orchestrator_stream_skips_cooling_backend() {
    let a = MockBackend::streaming("a", Script::Fail);
    let b = MockBackend::streaming("b", Script::Chunks(vec![vec![3]]));
    let synth = Skald::builder()
        .backend(a.clone())
        .backend(b.clone())
        .health(HealthConfig::new().failure_threshold(1))
        .build()
        .unwrap();

    for _ in 0..2 {
        let events: Vec<SpeechEvent> = synth
            .orchestrator()
            .synthesize_streaming(&request())
            .collect()
            .await;
        assert!(matches!(
            events.last(),
            Some(SpeechEvent::Finished(end)) if end.backend == "b" && end.complete
        ));
    }
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_stream_falls_to_silent_terminal() {
    let a = MockBackend::streaming("a", Script::Fail);
    let synth = synth(&[a]);

    let events: Vec<SpeechEvent> = synth
        .orchestrator()
        .synthesize_streaming(&request())
        .collect()
        .await;
    assert_eq!(
        events,
        vec![SpeechEvent::Finished(StreamEnd {
            backend: "silent".to_string(),
            complete: true,
            terminal: true,
        })]
    );
}
