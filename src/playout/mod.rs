//! Per-stream playout buffering and pacing: a `(session, participant,
//! stream_id)`-keyed store of in-flight outbound audio, each paced onto the
//! ACS-outbound bus by its own background task.

pub mod mixer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::audio::AudioFormat;
use crate::provider::ProviderOutputEvent;

/// Builds the stable `(session, participant, stream_id)` key for a provider
/// event's audio stream.
pub fn stream_key(event: &ProviderOutputEvent) -> String {
    let participant = event.participant_id.as_deref().unwrap_or("unknown");
    let stream = event
        .stream_id
        .as_deref()
        .or(event.commit_id.as_deref())
        .unwrap_or("stream");
    format!("{}:{}:{}", event.session_id, participant, stream)
}

struct StreamInner {
    buffer: Vec<u8>,
    done: bool,
    paused: bool,
    /// Set once the buffer has first crossed `start_buffered_bytes`. Never
    /// re-armed except by `clear`.
    started: bool,
}

/// One buffered outbound audio stream, keyed by [`stream_key`].
pub struct PlayoutStream {
    pub key: String,
    pub frame_bytes: usize,
    pub fmt: AudioFormat,
    start_buffered_bytes: usize,
    inner: Mutex<StreamInner>,
    data_ready: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlayoutStream {
    fn new(key: String, fmt: AudioFormat, frame_bytes: usize, start_buffered_bytes: usize) -> Self {
        Self {
            key,
            frame_bytes,
            fmt,
            start_buffered_bytes,
            inner: Mutex::new(StreamInner {
                buffer: Vec::new(),
                done: false,
                paused: false,
                started: start_buffered_bytes == 0,
            }),
            data_ready: Notify::new(),
            task: Mutex::new(None),
        }
    }

    pub async fn extend(&self, pcm: &[u8]) {
        let mut inner = self.inner.lock().await;
        inner.buffer.extend_from_slice(pcm);
        drop(inner);
        self.data_ready.notify_waiters();
    }

    pub async fn mark_done(&self) {
        let mut inner = self.inner.lock().await;
        if self.frame_bytes > 0 && !inner.buffer.is_empty() {
            let remainder = inner.buffer.len() % self.frame_bytes;
            if remainder != 0 {
                inner.buffer.extend(std::iter::repeat(0u8).take(self.frame_bytes - remainder));
            }
        }
        inner.done = true;
        drop(inner);
        self.data_ready.notify_waiters();
    }

    pub async fn pause(&self) {
        self.inner.lock().await.paused = true;
    }

    pub async fn resume(&self) {
        self.inner.lock().await.paused = false;
        self.data_ready.notify_waiters();
    }

    /// Drops buffered audio and re-arms the warm-up watermark.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.buffer.clear();
        inner.started = self.start_buffered_bytes == 0;
    }

    pub async fn is_done_and_drained(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.done && inner.buffer.len() < self.frame_bytes
    }
}

/// Holds every active [`PlayoutStream`] for a session, and drives each
/// stream's pacing task.
pub struct PlayoutStore {
    streams: Mutex<HashMap<String, Arc<PlayoutStream>>>,
}

impl Default for PlayoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayoutStore {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, key: &str, fmt: AudioFormat, frame_bytes: usize, start_buffered_bytes: usize) -> Arc<PlayoutStream> {
        let mut streams = self.streams.lock().await;
        streams
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(PlayoutStream::new(key.to_string(), fmt, frame_bytes, start_buffered_bytes)))
            .clone()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<PlayoutStream>> {
        self.streams.lock().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &str) {
        self.streams.lock().await.remove(key);
    }

    pub async fn keys(&self) -> Vec<String> {
        self.streams.lock().await.keys().cloned().collect()
    }
}

/// Pops frame-sized chunks from `stream`'s buffer and invokes `emit` for
/// each one, until `mark_done` has drained the buffer. Withholds real audio
/// until the buffer has first crossed `start_buffered_bytes` (the warm-up
/// watermark), and paces emission against an absolute deadline schedule
/// (`start + n * frame_ms`) so per-tick lock/emit latency cannot accumulate
/// drift. Runs as a background task started by [`ensure_task`].
async fn playout_loop<F, Fut>(stream: Arc<PlayoutStream>, frame_ms: u64, emit: F)
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let interval = Duration::from_millis(frame_ms);
    let start = tokio::time::Instant::now();
    let mut sequence: u64 = 0;

    loop {
        let chunk: Option<Vec<u8>> = {
            let mut inner = stream.inner.lock().await;
            if inner.paused {
                None
            } else {
                if !inner.started && inner.buffer.len() >= stream.start_buffered_bytes {
                    inner.started = true;
                }
                if inner.started && inner.buffer.len() >= stream.frame_bytes {
                    Some(inner.buffer.drain(..stream.frame_bytes).collect())
                } else if inner.done {
                    return;
                } else {
                    None
                }
            }
        };

        match chunk {
            Some(chunk) => {
                emit(chunk).await;
                sequence += 1;

                let next_deadline = start + interval * sequence as u32;
                let now = tokio::time::Instant::now();
                if next_deadline > now {
                    tokio::time::sleep_until(next_deadline).await;
                }
                // else: overran this tick; snap to now rather than bursting to catch up.
            }
            None => {
                tokio::select! {
                    _ = stream.data_ready.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if stream.is_done_and_drained().await {
                    return;
                }
            }
        }
    }
}

/// Starts (or no-ops if already running) the background pacing task for
/// `stream`.
pub async fn ensure_task<F, Fut>(stream: Arc<PlayoutStream>, frame_ms: u64, emit: F)
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut task = stream.task.lock().await;
    if let Some(handle) = task.as_ref() {
        if !handle.is_finished() {
            return;
        }
    }
    let stream_for_task = stream.clone();
    *task = Some(tokio::spawn(async move {
        playout_loop(stream_for_task, frame_ms, emit).await;
    }));
}

/// Waits for a stream's pacing task to finish, if one is running.
pub async fn wait(stream: &PlayoutStream) {
    let handle = stream.task.lock().await.take();
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}

/// Cancels a stream's pacing task immediately (used on decode/transcode
/// failure).
pub async fn cancel(stream: &PlayoutStream) {
    stream.mark_done().await;
    let handle = stream.task.lock().await.take();
    if let Some(handle) = handle {
        handle.abort();
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn paced_loop_emits_frames_until_drained() {
        let fmt = AudioFormat::new(16_000, 1);
        let frame_bytes = fmt.bytes_for_ms(20);
        let stream = Arc::new(PlayoutStream::new("k".into(), fmt, frame_bytes, 0));
        stream.extend(&vec![1u8; frame_bytes * 3]).await;
        stream.mark_done().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        ensure_task(stream.clone(), 1, move |chunk| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(chunk.len());
            }
        })
        .await;
        wait(&stream).await;

        let mut total = 0;
        while let Ok(len) = rx.try_recv() {
            total += len;
        }
        assert_eq!(total, frame_bytes * 3);
    }

    #[tokio::test]
    async fn store_round_trips_get_or_create_and_remove() {
        let store = PlayoutStore::new();
        let fmt = AudioFormat::new(16_000, 1);
        let s1 = store.get_or_create("a", fmt, 640, 0).await;
        let s2 = store.get_or_create("a", fmt, 640, 0).await;
        assert!(Arc::ptr_eq(&s1, &s2));
        store.remove("a").await;
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn warm_up_watermark_withholds_real_audio_until_crossed() {
        let fmt = AudioFormat::new(16_000, 1);
        let frame_bytes = fmt.bytes_for_ms(20);
        let warm_up_bytes = fmt.bytes_for_ms(60);
        let stream = Arc::new(PlayoutStream::new("k".into(), fmt, frame_bytes, warm_up_bytes));

        // One frame buffered, well below the 60ms watermark.
        stream.extend(&vec![9u8; frame_bytes]).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        ensure_task(stream.clone(), 5, move |chunk| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(chunk);
            }
        })
        .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err(), "no frame should emit before the watermark is crossed");

        stream.extend(&vec![9u8; warm_up_bytes]).await;
        stream.mark_done().await;
        wait(&stream).await;

        let mut total = 0;
        while let Ok(chunk) = rx.try_recv() {
            total += chunk.len();
        }
        assert!(total > 0, "buffered audio should drain once the watermark is crossed");
    }
}
