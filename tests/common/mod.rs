//! Scriptable backends shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use skald::{AudioStream, Result, SkaldError, SpeechBackend, SynthesisRequest};

/// What a [`MockBackend`] does on its next call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return these bytes (one chunk when streaming).
    Audio(Vec<u8>),
    /// Stream these chunks, then finish.
    Chunks(Vec<Vec<u8>>),
    /// Stream these chunks, then fail.
    ChunksThenFail(Vec<Vec<u8>>),
    /// Stream these chunks, then never finish.
    ChunksThenHang(Vec<Vec<u8>>),
    /// Fail with a transport error.
    Fail,
    /// Never answer.
    Hang,
    /// Answer with zero bytes.
    Empty,
}

/// Backend whose behaviour is set per test and which counts its calls.
pub struct MockBackend {
    name: String,
    streaming: bool,
    script: Mutex<Script>,
    calls: AtomicU32,
    abandoned: Arc<AtomicU32>,
}

/// Counts a hanging call as abandoned when its future or stream is dropped.
struct AbandonGuard(Arc<AtomicU32>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockBackend {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            streaming: false,
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            abandoned: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn streaming(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            streaming: true,
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            abandoned: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn set(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hanging calls whose future or stream has been dropped.
    pub fn abandoned(&self) -> u32 {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn guard(&self) -> AbandonGuard {
        AbandonGuard(self.abandoned.clone())
    }

    fn next_script(&self) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().clone()
    }
}

fn chunks(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>>> + Send {
    stream::iter(chunks.into_iter().map(Ok))
}

fn transport_error() -> SkaldError {
    SkaldError::Http("connection reset".to_string())
}

#[async_trait]
impl SpeechBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<Vec<u8>> {
        match self.next_script() {
            Script::Audio(bytes) => Ok(bytes),
            Script::Chunks(chunks) => Ok(chunks.concat()),
            Script::ChunksThenFail(_) | Script::Fail => Err(transport_error()),
            Script::ChunksThenHang(_) | Script::Hang => {
                let _guard = self.guard();
                std::future::pending().await
            }
            Script::Empty => Ok(Vec::new()),
        }
    }

    async fn synthesize_stream(&self, _request: &SynthesisRequest) -> Result<AudioStream> {
        match self.next_script() {
            Script::Audio(bytes) => Ok(Box::pin(stream::once(async move { Ok::<_, SkaldError>(bytes) }))),
            Script::Chunks(c) => Ok(Box::pin(chunks(c))),
            Script::ChunksThenFail(c) => Ok(Box::pin(
                chunks(c).chain(stream::once(async { Err::<Vec<u8>, _>(transport_error()) })),
            )),
            Script::ChunksThenHang(c) => {
                let guard = self.guard();
                Ok(Box::pin(chunks(c).chain(stream::pending()).map(move |chunk| {
                    let _held = &guard;
                    chunk
                })))
            }
            Script::Fail => Err(transport_error()),
            Script::Hang => {
                let _guard = self.guard();
                std::future::pending().await
            }
            Script::Empty => Ok(Box::pin(stream::empty::<Result<Vec<u8>>>())),
        }
    }
}

/// Sleep long enough for spawned producers to make progress.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
