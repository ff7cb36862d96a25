//! Real-time transcription orchestrator.
//!
//! Wires the audio stream, slice manager, VAD gate and transcription queue
//! together: audio chunks accumulate into slices, ready slices pass the VAD
//! gate, speech-worthy slices queue for the engine, and one drain loop
//! keeps at most a single engine call in flight while results and
//! statistics stream out through callbacks.

pub mod events;
pub mod options;
pub mod queue;

pub use events::{
    StatsEvent, StatsEventKind, StatsSnapshot, TranscribeEvent, TranscribeEventKind,
    TranscriberCallbacks,
};
pub use options::{AutoSliceOptions, TranscriberOptions};
pub use queue::{QueueItem, TranscriptionQueue, TranscriptionRecord};

use crate::audio::sink::AudioSink;
use crate::audio::stream::{AudioStream, StreamEvent};
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{Result, StreamscribeError};
use crate::slice::SliceManager;
use crate::stt::engine::SpeechEngine;
use crate::vad::gate::{VadEvent, VadEventKind, VadGate};
use crate::vad::SpeechDetector;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Injected collaborator capabilities.
pub struct TranscriberDependencies {
    pub engine: Arc<dyn SpeechEngine>,
    /// Optional; a session without a detector treats all audio as speech.
    pub detector: Option<Arc<dyn SpeechDetector>>,
    pub stream: Box<dyn AudioStream>,
    /// Optional session recording destination.
    pub sink: Option<Box<dyn AudioSink>>,
}

/// Per-session mutable state. Guarded by one lock; never held across an
/// await point.
struct Session {
    slices: SliceManager,
    /// Audio accumulated but not yet pushed through the slice manager.
    pending: Vec<u8>,
    queue: TranscriptionQueue,
    gate: VadGate,
    /// VAD classification per slice, consumed when the slice's transcribe
    /// event is built.
    vad_events: HashMap<u64, VadEvent>,
    last_stats: Option<StatsSnapshot>,
    sample_rate: u32,
    channels: u16,
}

impl Session {
    fn new(options: &TranscriberOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            slices: SliceManager::with_clock(
                options.slice_duration,
                options.max_slices_in_memory,
                options.stream.sample_rate,
                options.stream.channels,
                clock,
            ),
            pending: Vec::new(),
            queue: TranscriptionQueue::new(),
            gate: VadGate::new(),
            vad_events: HashMap::new(),
            last_stats: None,
            sample_rate: options.stream.sample_rate,
            channels: options.stream.channels,
        }
    }
}

struct Inner {
    engine: Arc<dyn SpeechEngine>,
    detector: Option<Arc<dyn SpeechDetector>>,
    stream: AsyncMutex<Box<dyn AudioStream>>,
    sink: Option<AsyncMutex<Box<dyn AudioSink>>>,
    sink_open: AtomicBool,
    options: StdMutex<TranscriberOptions>,
    callbacks: StdMutex<TranscriberCallbacks>,
    session: StdMutex<Session>,
    session_start: StdMutex<Option<Instant>>,
    is_active: AtomicBool,
    is_transcribing: AtomicBool,
    /// Reentrancy guard for the queue drain loop.
    is_draining: AtomicBool,
    /// True while the pump task is handling one stream event.
    pump_busy: AtomicBool,
    released: AtomicBool,
    clock: Arc<dyn Clock>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

/// Orchestrates a live audio stream into serialized engine calls.
///
/// Cheap to clone through its internal `Arc`; all methods take `&self`.
#[derive(Clone)]
pub struct RealtimeTranscriber {
    inner: Arc<Inner>,
}

impl RealtimeTranscriber {
    /// Creates a transcriber over the given capabilities. Fails on invalid
    /// configuration; no capability is touched until [`start`](Self::start).
    pub fn new(options: TranscriberOptions, deps: TranscriberDependencies) -> Result<Self> {
        Self::with_clock(options, deps, Arc::new(SystemClock))
    }

    /// Creates a transcriber with a custom clock (for deterministic tests).
    pub fn with_clock(
        options: TranscriberOptions,
        deps: TranscriberDependencies,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        options.validate()?;
        let session = Session::new(&options, clock.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                engine: deps.engine,
                detector: deps.detector,
                stream: AsyncMutex::new(deps.stream),
                sink: deps.sink.map(AsyncMutex::new),
                sink_open: AtomicBool::new(false),
                options: StdMutex::new(options),
                callbacks: StdMutex::new(TranscriberCallbacks::default()),
                session: StdMutex::new(session),
                session_start: StdMutex::new(None),
                is_active: AtomicBool::new(false),
                is_transcribing: AtomicBool::new(false),
                is_draining: AtomicBool::new(false),
                pump_busy: AtomicBool::new(false),
                released: AtomicBool::new(false),
                clock,
                pump: StdMutex::new(None),
            }),
        })
    }

    /// Replaces the callback set wholesale.
    pub fn set_callbacks(&self, callbacks: TranscriberCallbacks) {
        *lock(&self.inner.callbacks) = callbacks;
    }

    /// Shallow-merges new callbacks over the current set without
    /// interrupting an active session.
    pub fn update_callbacks(&self, partial: TranscriberCallbacks) {
        lock(&self.inner.callbacks).merge(partial);
    }

    /// Replaces the live VAD options.
    pub fn update_vad_options(&self, vad: crate::vad::VadOptions) {
        lock(&self.inner.options).vad = Some(vad);
    }

    /// Replaces the live auto-slice options.
    pub fn update_auto_slice_options(&self, auto_slice: AutoSliceOptions) {
        lock(&self.inner.options).auto_slice = auto_slice;
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active.load(Ordering::SeqCst)
    }

    pub fn is_transcribing(&self) -> bool {
        self.inner.is_transcribing.load(Ordering::SeqCst)
    }

    /// Begins a session: fresh state, sink and stream brought up, pump task
    /// spawned. Rejects when already active or released; a stream failure
    /// rolls everything back to idle.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.released.load(Ordering::SeqCst) {
            return Err(StreamscribeError::Released);
        }
        if inner
            .is_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StreamscribeError::AlreadyActive);
        }

        let options = lock(&inner.options).clone();
        *lock(&inner.session) = Session::new(&options, inner.clock.clone());
        inner.is_transcribing.store(false, Ordering::SeqCst);
        *lock(&inner.session_start) = Some(inner.clock.now());

        if let Some(sink) = &inner.sink {
            match sink.lock().await.initialize(&options.stream).await {
                Ok(()) => inner.sink_open.store(true, Ordering::SeqCst),
                // A broken recorder must not block transcription.
                Err(e) => inner.report_error(&format!("audio sink initialize failed: {}", e)),
            }
        }

        let rx = {
            let mut stream = inner.stream.lock().await;
            match stream.initialize(&options.stream).await {
                Ok(rx) => match stream.start().await {
                    Ok(()) => rx,
                    Err(e) => {
                        drop(stream);
                        self.rollback_start().await;
                        return Err(e);
                    }
                },
                Err(e) => {
                    drop(stream);
                    self.rollback_start().await;
                    return Err(e);
                }
            }
        };

        let pump = tokio::spawn(Inner::pump(Arc::clone(inner), rx));
        *lock(&inner.pump) = Some(pump);

        inner.notify_status(true);
        inner.emit_stats(StatsEventKind::StatusChange);
        Ok(())
    }

    async fn rollback_start(&self) {
        let inner = &self.inner;
        inner.is_active.store(false, Ordering::SeqCst);
        if inner.sink_open.swap(false, Ordering::SeqCst)
            && let Some(sink) = &inner.sink
            && let Err(e) = sink.lock().await.cancel().await
        {
            inner.report_error(&format!("audio sink cancel failed: {}", e));
        }
    }

    /// Ends the session: stops capture, flushes the accumulation buffer
    /// once, drains queued transcriptions to completion, finalizes the
    /// sink and clears session state. Idempotent; internal failures are
    /// reported through `on_error` so cleanup always completes.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.is_active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = inner.stream.lock().await.stop().await {
            inner.report_error(&format!("audio stream stop failed: {}", e));
        }

        // Let the pump finish the event it is handling; aborting it while
        // a detection is in flight would lose the final slice.
        while inner.pump_busy.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let ready = {
            let mut session = lock(&inner.session);
            let pending = std::mem::take(&mut session.pending);
            if pending.is_empty() {
                Vec::new()
            } else {
                session.slices.add_audio_data(&pending)
            }
        };
        for index in ready {
            inner.process_ready_slice(index).await;
        }

        inner.drain_to_completion().await;

        if let Some(pump) = lock(&inner.pump).take() {
            pump.abort();
        }

        if inner.sink_open.swap(false, Ordering::SeqCst)
            && let Some(sink) = &inner.sink
            && let Err(e) = sink.lock().await.finalize().await
        {
            inner.report_error(&format!("audio sink finalize failed: {}", e));
        }

        // Results were delivered through on_transcribe; the session keeps
        // nothing across stop.
        inner.clear_session();

        inner.notify_status(false);
        inner.emit_stats(StatsEventKind::StatusChange);
    }

    /// Forces a slice boundary now. Pending queue work is drained first so
    /// the forced slice never races an outstanding engine call.
    pub async fn next_slice(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.is_active.load(Ordering::SeqCst) {
            return Err(StreamscribeError::NotActive);
        }

        let event = inner.transcribe_event(
            TranscribeEventKind::Start,
            None,
            None,
            None,
            Duration::ZERO,
            None,
        );
        inner.notify_transcribe(&event);

        inner.drain_to_completion().await;

        let ready = {
            let mut session = lock(&inner.session);
            let pending = std::mem::take(&mut session.pending);
            let mut ready = if pending.is_empty() {
                Vec::new()
            } else {
                session.slices.add_audio_data(&pending)
            };
            if let Some(forced) = session.slices.force_next_slice() {
                ready.push(forced);
            }
            ready
        };
        for index in ready {
            inner.process_ready_slice(index).await;
        }
        Ok(())
    }

    /// Clears session content (slices, queue, results, VAD state) without
    /// changing the lifecycle state. An open sink is cancelled, since the
    /// recording no longer matches the session.
    pub async fn reset(&self) {
        let inner = &self.inner;
        if inner.sink_open.swap(false, Ordering::SeqCst)
            && let Some(sink) = &inner.sink
            && let Err(e) = sink.lock().await.cancel().await
        {
            inner.report_error(&format!("audio sink cancel failed: {}", e));
        }

        inner.clear_session();
        inner.emit_stats(StatsEventKind::StatusChange);
    }

    /// Permanently tears the transcriber down: stops an active session,
    /// then releases the audio stream. Not restartable afterwards.
    pub async fn release(&self) {
        let inner = &self.inner;
        if inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if inner.is_active.load(Ordering::SeqCst) {
            self.stop().await;
        }
        if let Err(e) = inner.stream.lock().await.release().await {
            inner.report_error(&format!("audio stream release failed: {}", e));
        }
    }

    /// Pure read of current session statistics.
    pub fn get_statistics(&self) -> StatsSnapshot {
        self.inner.snapshot()
    }

    /// All results stored so far this session, in ascending slice index
    /// order. Empty after [`stop`](Self::stop) or [`reset`](Self::reset);
    /// consumers that need results across sessions collect them from
    /// `on_transcribe`.
    pub fn transcription_results(&self) -> Vec<TranscriptionRecord> {
        lock(&self.inner.session).queue.results()
    }
}

impl Inner {
    /// Consumes stream events for one session. Events are handled serially,
    /// which keeps slice completion and queueing in index order.
    async fn pump(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<StreamEvent>) {
        while let Some(event) = rx.recv().await {
            inner.pump_busy.store(true, Ordering::SeqCst);
            match event {
                StreamEvent::Data(bytes) => inner.handle_audio_data(bytes).await,
                StreamEvent::Error(message) => {
                    inner.report_error(&format!("audio stream error: {}", message));
                }
                StreamEvent::Status(recording) => {
                    tracing::debug!(recording, "audio stream status changed");
                }
            }
            inner.pump_busy.store(false, Ordering::SeqCst);
            if !inner.is_active.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn handle_audio_data(&self, data: Vec<u8>) {
        if !self.is_active.load(Ordering::SeqCst) {
            return;
        }

        if self.sink_open.load(Ordering::SeqCst)
            && let Some(sink) = &self.sink
            && let Err(e) = sink.lock().await.append(&data).await
        {
            self.report_error(&format!("audio sink append failed: {}", e));
        }

        let ready = {
            let mut session = lock(&self.session);
            session.pending.extend_from_slice(&data);
            let flush_bytes = (defaults::ACCUMULATION_FLUSH.as_secs_f64()
                * defaults::bytes_per_second(session.sample_rate, session.channels) as f64)
                as usize;
            if session.pending.len() < flush_bytes {
                Vec::new()
            } else {
                let pending = std::mem::take(&mut session.pending);
                session.slices.add_audio_data(&pending)
            }
        };

        for index in ready {
            self.process_ready_slice(index).await;
        }
    }

    /// Runs one ready slice through the VAD gate and queue. Boxed so the
    /// auto-slice path can recurse into the forced slice.
    fn process_ready_slice(&self, index: u64) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(audio) = ({
                let session = lock(&self.session);
                session
                    .slices
                    .audio_for_transcription(index)
                    .map(|bytes| bytes.to_vec())
            }) else {
                return;
            };

            let (min_speech, slice_duration, auto_slice, vad_options) = {
                let options = lock(&self.options);
                (
                    options.min_speech_duration,
                    options.slice_duration,
                    options.auto_slice,
                    options.resolved_vad(),
                )
            };
            let (sample_rate, channels) = {
                let session = lock(&self.session);
                (session.sample_rate, session.channels)
            };
            let duration = defaults::duration_of_bytes(audio.len(), sample_rate, channels);

            let detector = self
                .detector
                .as_ref()
                .filter(|_| self.begin_gate_allows(index, |c| c.on_begin_vad.clone()))
                .cloned();

            let event = match detector {
                Some(detector) => {
                    match detector.detect_speech(&audio, &vad_options).await {
                        Ok(segments) => lock(&self.session).gate.classify_detection(
                            &segments,
                            duration,
                            vad_options.threshold,
                            min_speech,
                            index,
                        ),
                        Err(e) => {
                            self.report_error(&format!("speech detection failed: {}", e));
                            lock(&self.session).gate.classify_failure(duration, index)
                        }
                    }
                }
                None => lock(&self.session).gate.classify_absent(duration, index),
            };

            lock(&self.session).vad_events.insert(index, event);
            self.notify_vad(&event);
            self.emit_stats(StatsEventKind::VadChange);

            let queued = event.kind != VadEventKind::Silence && duration >= min_speech;
            if queued {
                lock(&self.session).queue.enqueue(QueueItem {
                    slice_index: index,
                    audio,
                });
            }

            // Short bursts end early instead of waiting out the full target
            // duration.
            if auto_slice.enabled
                && matches!(event.kind, VadEventKind::SpeechEnd | VadEventKind::Silence)
            {
                let forced = {
                    let mut session = lock(&self.session);
                    let current = session.slices.slice_info().current_index;
                    let elapsed = session
                        .slices
                        .slice_by_index(current)
                        .map(|s| {
                            defaults::duration_of_bytes(s.byte_len(), sample_rate, channels)
                        })
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= min_speech
                        && elapsed >= slice_duration.mul_f32(auto_slice.threshold)
                    {
                        session.slices.force_next_slice()
                    } else {
                        None
                    }
                };
                if let Some(forced) = forced {
                    self.process_ready_slice(forced).await;
                }
            }

            if queued {
                self.drain_queue().await;
            }
        })
    }

    /// Drains the queue one item at a time. The swap guard ensures a single
    /// drain loop; items enqueued during a drain are picked up by it.
    async fn drain_queue(&self) {
        if self.is_draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let item = lock(&self.session).queue.pop();
            if let Some(item) = item {
                self.process_transcription(item).await;
                continue;
            }
            self.is_draining.store(false, Ordering::SeqCst);
            // An item enqueued between the pop and the guard release would
            // otherwise be stranded.
            let refill = !lock(&self.session).queue.is_empty();
            if refill && !self.is_draining.swap(true, Ordering::SeqCst) {
                continue;
            }
            break;
        }
    }

    async fn process_transcription(&self, item: QueueItem) {
        let index = item.slice_index;
        if !self.begin_gate_allows(index, |c| c.on_begin_transcribe.clone()) {
            return;
        }

        let (transcribe_options, timeout, initial_prompt, carry_previous) = {
            let options = lock(&self.options);
            (
                options.transcribe.clone(),
                options.engine_timeout,
                options.initial_prompt.clone(),
                options.prompt_previous_slices,
            )
        };
        let prompt = lock(&self.session)
            .queue
            .build_prompt(initial_prompt.as_deref(), carry_previous);
        let call_options = crate::stt::engine::TranscribeOptions {
            prompt,
            ..transcribe_options
        };

        self.is_transcribing.store(true, Ordering::SeqCst);
        self.emit_stats(StatsEventKind::StatusChange);

        let started = self.clock.now();
        let result = match timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.engine.transcribe(&item.audio, &call_options))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StreamscribeError::TranscriptionTimeout {
                        seconds: timeout.as_secs_f64(),
                    }),
                }
            }
            None => self.engine.transcribe(&item.audio, &call_options).await,
        };
        let process_time = self.clock.now().saturating_duration_since(started);
        self.is_transcribing.store(false, Ordering::SeqCst);

        match result {
            Ok(mut data) => {
                data.text = queue::strip_silence_markers(&data.text);
                let vad_event = lock(&self.session).vad_events.remove(&index);
                let event = self.transcribe_event(
                    TranscribeEventKind::Transcribe,
                    Some(index),
                    Some(data.clone()),
                    None,
                    process_time,
                    vad_event,
                );
                {
                    let mut session = lock(&self.session);
                    session.slices.mark_transcribed(index);
                    // Engines emit a bare "." for audio they cannot make
                    // out; keep the earlier result for the slice if one
                    // exists.
                    let degenerate =
                        data.text.trim() == "." && session.queue.result(index).is_some();
                    if !degenerate
                        && let Some(meta) =
                            session.slices.slice_by_index(index).map(|s| s.meta())
                    {
                        session.queue.store_result(
                            index,
                            TranscriptionRecord {
                                slice: meta,
                                event: event.clone(),
                            },
                        );
                    }
                }
                self.notify_transcribe(&event);
                self.emit_stats(StatsEventKind::SliceProcessed);
            }
            Err(e) => {
                self.report_error(&format!("transcription of slice {} failed: {}", index, e));
                let vad_event = lock(&self.session).vad_events.remove(&index);
                let event = self.transcribe_event(
                    TranscribeEventKind::Error,
                    Some(index),
                    None,
                    Some(e.to_string()),
                    process_time,
                    vad_event,
                );
                self.notify_transcribe(&event);
                self.emit_stats(StatsEventKind::SliceProcessed);
            }
        }
    }

    /// Waits until the pump is idle, no engine call is outstanding and the
    /// queue is empty.
    async fn drain_to_completion(&self) {
        loop {
            self.drain_queue().await;
            let busy = self.is_draining.load(Ordering::SeqCst)
                || self.is_transcribing.load(Ordering::SeqCst)
                || self.pump_busy.load(Ordering::SeqCst)
                || !lock(&self.session).queue.is_empty();
            if !busy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Clears all session content: slices, pending audio, queue, results
    /// and VAD state. Lifecycle flags other than `is_transcribing` are left
    /// alone.
    fn clear_session(&self) {
        {
            let mut session = lock(&self.session);
            session.slices.reset();
            session.pending.clear();
            session.queue.clear();
            session.gate.reset();
            session.vad_events.clear();
            session.last_stats = None;
        }
        self.is_transcribing.store(false, Ordering::SeqCst);
    }

    fn begin_gate_allows(
        &self,
        index: u64,
        pick: impl Fn(&TranscriberCallbacks) -> Option<events::GateCallback>,
    ) -> bool {
        let gate = pick(&lock(&self.callbacks));
        gate.map(|cb| cb(index)).unwrap_or(true)
    }

    fn transcribe_event(
        &self,
        kind: TranscribeEventKind,
        slice_index: Option<u64>,
        data: Option<crate::stt::engine::TranscribeResult>,
        error: Option<String>,
        process_time: Duration,
        vad_event: Option<VadEvent>,
    ) -> TranscribeEvent {
        let memory = lock(&self.session).slices.memory_usage();
        let recording_time = (*lock(&self.session_start))
            .map(|start| self.clock.now().saturating_duration_since(start))
            .unwrap_or(Duration::ZERO);
        TranscribeEvent {
            kind,
            slice_index,
            data,
            error,
            process_time,
            recording_time,
            is_capturing: self.is_recording(),
            memory,
            vad_event,
        }
    }

    fn is_recording(&self) -> bool {
        self.stream
            .try_lock()
            .map(|stream| stream.is_recording())
            .unwrap_or_else(|_| self.is_active.load(Ordering::SeqCst))
    }

    fn snapshot(&self) -> StatsSnapshot {
        let (queue_length, slices) = {
            let session = lock(&self.session);
            (session.queue.len(), session.slices.slice_info())
        };
        StatsSnapshot {
            is_active: self.is_active.load(Ordering::SeqCst),
            is_recording: self.is_recording(),
            is_transcribing: self.is_transcribing.load(Ordering::SeqCst),
            queue_length,
            slices,
            vad_enabled: self.detector.is_some(),
            auto_slice_enabled: lock(&self.options).auto_slice.enabled,
        }
    }

    fn emit_stats(&self, kind: StatsEventKind) {
        let snapshot = self.snapshot();
        let emit = {
            let mut session = lock(&self.session);
            if snapshot.should_emit(session.last_stats.as_ref()) {
                session.last_stats = Some(snapshot.clone());
                true
            } else {
                false
            }
        };
        if emit {
            let cb = lock(&self.callbacks).on_stats_update.clone();
            if let Some(cb) = cb {
                cb(&StatsEvent { kind, snapshot });
            }
        }
    }

    // Callbacks are cloned out in a separate statement so the registry
    // guard is released before the callback runs; a callback may re-enter
    // set_callbacks/update_callbacks.

    fn report_error(&self, message: &str) {
        tracing::warn!(message, "session error");
        let cb = lock(&self.callbacks).on_error.clone();
        if let Some(cb) = cb {
            cb(message);
        }
    }

    fn notify_status(&self, is_active: bool) {
        let cb = lock(&self.callbacks).on_status_change.clone();
        if let Some(cb) = cb {
            cb(is_active);
        }
    }

    fn notify_vad(&self, event: &VadEvent) {
        let cb = lock(&self.callbacks).on_vad.clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }

    fn notify_transcribe(&self, event: &TranscribeEvent) {
        let cb = lock(&self.callbacks).on_transcribe.clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }
}

/// Lock poisoning cannot leave session state half-written here; every
/// critical section is a short, non-panicking read or write.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream::MockAudioStream;
    use crate::stt::engine::MockSpeechEngine;
    use crate::vad::MockSpeechDetector;
    use std::sync::atomic::AtomicUsize;

    fn options_2s() -> TranscriberOptions {
        TranscriberOptions {
            slice_duration: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn transcriber(engine: MockSpeechEngine) -> (RealtimeTranscriber, crate::audio::stream::MockStreamHandle) {
        let stream = MockAudioStream::new();
        let handle = stream.handle();
        let t = RealtimeTranscriber::new(
            options_2s(),
            TranscriberDependencies {
                engine: Arc::new(engine),
                detector: None,
                stream: Box::new(stream),
                sink: None,
            },
        )
        .unwrap();
        (t, handle)
    }

    #[tokio::test]
    async fn test_start_rejects_double_start() {
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        t.start().await.unwrap();
        assert!(matches!(
            t.start().await,
            Err(StreamscribeError::AlreadyActive)
        ));
        t.stop().await;
    }

    #[tokio::test]
    async fn test_start_fails_after_release() {
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        t.release().await;
        assert!(matches!(t.start().await, Err(StreamscribeError::Released)));
    }

    #[tokio::test]
    async fn test_start_rolls_back_on_stream_failure() {
        let stream = MockAudioStream::new().with_start_failure();
        let t = RealtimeTranscriber::new(
            options_2s(),
            TranscriberDependencies {
                engine: Arc::new(MockSpeechEngine::new()),
                detector: None,
                stream: Box::new(stream),
                sink: None,
            },
        )
        .unwrap();

        assert!(t.start().await.is_err());
        assert!(!t.is_active());
        // A clean start must still be possible after the rollback.
        // (The mock fails every start; only the flag matters here.)
        assert!(!t.get_statistics().is_active);
    }

    #[tokio::test]
    async fn test_next_slice_requires_active_session() {
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        assert!(matches!(
            t.next_slice().await,
            Err(StreamscribeError::NotActive)
        ));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_at_construction() {
        let result = RealtimeTranscriber::new(
            TranscriberOptions {
                max_slices_in_memory: 0,
                ..Default::default()
            },
            TranscriberDependencies {
                engine: Arc::new(MockSpeechEngine::new()),
                detector: None,
                stream: Box::new(MockAudioStream::new()),
                sink: None,
            },
        );
        assert!(matches!(
            result,
            Err(StreamscribeError::ConfigInvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_audio_flows_through_to_engine() {
        let engine = MockSpeechEngine::new().with_response("hello");
        let engine_probe = engine.clone();
        let (t, handle) = transcriber(engine);
        t.start().await.unwrap();

        // One full slice: 2s at 16kHz mono = 64000 bytes.
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine_probe.call_count(), 1);
        let results = t.transcription_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event.data.as_ref().unwrap().text, "hello");

        t.stop().await;
        // Stop clears the session; results were already delivered.
        assert!(t.transcription_results().is_empty());
    }

    #[tokio::test]
    async fn test_status_callback_fires_on_start_and_stop() {
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        let statuses = Arc::new(StdMutex::new(Vec::new()));
        let statuses_probe = statuses.clone();
        t.set_callbacks(TranscriberCallbacks::new().with_on_status_change(move |active| {
            statuses_probe
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(active);
        }));

        t.start().await.unwrap();
        t.stop().await;
        t.stop().await; // idempotent; must not fire again

        assert_eq!(*statuses.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_callback_may_reenter_callback_registry() {
        // A status callback that swaps callbacks mid-notification must not
        // deadlock against the registry lock.
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        let reentrant = t.clone();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_count = fired.clone();
        t.set_callbacks(TranscriberCallbacks::new().with_on_status_change(move |_| {
            fired_count.fetch_add(1, Ordering::SeqCst);
            reentrant.update_callbacks(TranscriberCallbacks::new().with_on_error(|_| {}));
        }));

        t.start().await.unwrap();
        t.stop().await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clones_share_one_session() {
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        let clone = t.clone();
        t.start().await.unwrap();
        assert!(clone.is_active());
        clone.stop().await;
        assert!(!t.is_active());
    }

    #[tokio::test]
    async fn test_reset_clears_content_but_not_lifecycle() {
        let engine = MockSpeechEngine::new();
        let (t, handle) = transcriber(engine);
        t.start().await.unwrap();
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        t.reset().await;

        assert!(t.is_active());
        let stats = t.get_statistics();
        assert_eq!(stats.queue_length, 0);
        assert!(!stats.is_transcribing);
        assert_eq!(stats.slices.current_index, 0);
        assert!(t.transcription_results().is_empty());
        t.stop().await;
    }

    #[tokio::test]
    async fn test_on_begin_transcribe_veto_skips_engine() {
        let engine = MockSpeechEngine::new();
        let engine_probe = engine.clone();
        let (t, handle) = transcriber(engine);
        t.set_callbacks(TranscriberCallbacks::new().with_on_begin_transcribe(|_| false));

        t.start().await.unwrap();
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine_probe.call_count(), 0);
        assert!(t.transcription_results().is_empty());
        t.stop().await;
    }

    #[tokio::test]
    async fn test_vad_veto_treats_slice_as_speech() {
        let detector = MockSpeechDetector::new(); // would report silence
        let detector_probe = detector.clone();
        let engine = MockSpeechEngine::new();
        let engine_probe = engine.clone();

        let stream = MockAudioStream::new();
        let handle = stream.handle();
        let t = RealtimeTranscriber::new(
            options_2s(),
            TranscriberDependencies {
                engine: Arc::new(engine),
                detector: Some(Arc::new(detector)),
                stream: Box::new(stream),
                sink: None,
            },
        )
        .unwrap();
        t.set_callbacks(TranscriberCallbacks::new().with_on_begin_vad(|_| false));

        t.start().await.unwrap();
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.stop().await;

        // Detector never ran; the slice went straight to the engine.
        assert_eq!(detector_probe.call_count(), 0);
        assert_eq!(engine_probe.call_count(), 1);
    }

    #[tokio::test]
    async fn test_prompt_carries_initial_and_previous_results() {
        let engine = MockSpeechEngine::new().with_responses(&["first words", "second words"]);
        let engine_probe = engine.clone();

        let stream = MockAudioStream::new();
        let handle = stream.handle();
        let t = RealtimeTranscriber::new(
            TranscriberOptions {
                slice_duration: Duration::from_secs(2),
                initial_prompt: Some("Glossary: streamscribe.".to_string()),
                ..Default::default()
            },
            TranscriberDependencies {
                engine: Arc::new(engine),
                detector: None,
                stream: Box::new(stream),
                sink: None,
            },
        )
        .unwrap();

        t.start().await.unwrap();
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.stop().await;

        let calls = engine_probe.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].prompt.as_deref(), Some("Glossary: streamscribe."));
        assert_eq!(
            calls[1].prompt.as_deref(),
            Some("Glossary: streamscribe. first words")
        );
    }

    #[tokio::test]
    async fn test_engine_timeout_surfaces_as_slice_error() {
        let engine = MockSpeechEngine::new().with_delay(Duration::from_secs(5));
        let stream = MockAudioStream::new();
        let handle = stream.handle();
        let t = RealtimeTranscriber::new(
            TranscriberOptions {
                slice_duration: Duration::from_secs(2),
                engine_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
            TranscriberDependencies {
                engine: Arc::new(engine),
                detector: None,
                stream: Box::new(stream),
                sink: None,
            },
        )
        .unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_probe = errors.clone();
        t.set_callbacks(TranscriberCallbacks::new().with_on_error(move |_| {
            errors_probe.fetch_add(1, Ordering::SeqCst);
        }));

        t.start().await.unwrap();
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        t.stop().await;

        assert!(errors.load(Ordering::SeqCst) >= 1);
        assert!(t.transcription_results().is_empty());
    }

    #[tokio::test]
    async fn test_dot_only_result_is_stored_stripped_not_dropped() {
        // A lone "." with no prior result for the slice still gets stored;
        // the degenerate-result guard only protects an existing record.
        let engine = MockSpeechEngine::new().with_response(".");
        let (t, handle) = transcriber(engine);
        t.start().await.unwrap();
        handle.push(vec![0u8; 64000]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let results = t.transcription_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event.data.as_ref().unwrap().text, ".");
        t.stop().await;
    }

    #[tokio::test]
    async fn test_update_options_live() {
        let (t, _handle) = transcriber(MockSpeechEngine::new());
        t.update_auto_slice_options(AutoSliceOptions {
            enabled: true,
            threshold: 0.25,
        });
        assert!(t.get_statistics().auto_slice_enabled);

        t.update_vad_options(crate::vad::VadOptions {
            threshold: 0.9,
            ..Default::default()
        });
        assert_eq!(lock(&t.inner.options).resolved_vad().threshold, 0.9);
    }
}
