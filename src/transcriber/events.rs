//! Event and statistics types emitted to the consumer.

use crate::defaults;
use crate::slice::{MemoryUsage, SliceInfo};
use crate::stt::engine::TranscribeResult;
use crate::vad::gate::VadEvent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What a transcribe event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscribeEventKind {
    /// A slice boundary is being forced; transcription follows.
    Start,
    /// A slice finished transcription.
    Transcribe,
    /// A slice failed transcription.
    Error,
}

/// Event delivered through `on_transcribe` after each engine interaction.
#[derive(Debug, Clone, Serialize)]
pub struct TranscribeEvent {
    pub kind: TranscribeEventKind,
    /// Slice the event concerns; None for session-level Start events.
    pub slice_index: Option<u64>,
    /// Engine output, present for Transcribe events.
    pub data: Option<TranscribeResult>,
    /// Error description, present for Error events.
    pub error: Option<String>,
    /// Wall time the engine call took.
    #[serde(skip)]
    pub process_time: Duration,
    /// Time since the session started.
    #[serde(skip)]
    pub recording_time: Duration,
    /// Whether audio capture was running when the event was built.
    pub is_capturing: bool,
    pub memory: MemoryUsage,
    /// VAD classification of the slice, when a gate decision was made.
    pub vad_event: Option<VadEvent>,
}

/// Why a statistics update was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsEventKind {
    StatusChange,
    VadChange,
    MemoryChange,
    SliceProcessed,
}

/// Point-in-time view of session state. Reporting only, never control flow.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub is_active: bool,
    pub is_recording: bool,
    pub is_transcribing: bool,
    pub queue_length: usize,
    pub slices: SliceInfo,
    pub vad_enabled: bool,
    pub auto_slice_enabled: bool,
}

impl StatsSnapshot {
    /// Debounce check against the previously emitted snapshot.
    ///
    /// Emission happens on any status-flag change, any queue-length change,
    /// or a memory change beyond an absolute or relative threshold, so a
    /// slow consumer sees every materially different state without being
    /// flooded by near-duplicates.
    pub fn should_emit(&self, previous: Option<&StatsSnapshot>) -> bool {
        let Some(prev) = previous else {
            return true;
        };
        if self.is_active != prev.is_active
            || self.is_recording != prev.is_recording
            || self.is_transcribing != prev.is_transcribing
            || self.vad_enabled != prev.vad_enabled
            || self.auto_slice_enabled != prev.auto_slice_enabled
        {
            return true;
        }
        if self.queue_length != prev.queue_length {
            return true;
        }
        let delta = (self.slices.memory.estimated_mb - prev.slices.memory.estimated_mb).abs();
        if delta > defaults::STATS_MEMORY_DELTA_MB {
            return true;
        }
        let base = prev.slices.memory.estimated_mb.max(f64::EPSILON);
        delta / base > defaults::STATS_MEMORY_DELTA_RATIO
    }
}

/// Statistics update paired with the reason it fired.
#[derive(Debug, Clone, Serialize)]
pub struct StatsEvent {
    pub kind: StatsEventKind,
    pub snapshot: StatsSnapshot,
}

pub type TranscribeCallback = Arc<dyn Fn(&TranscribeEvent) + Send + Sync>;
pub type VadCallback = Arc<dyn Fn(&VadEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub type StatsCallback = Arc<dyn Fn(&StatsEvent) + Send + Sync>;
/// Gating callback: return false to skip the slice it was asked about.
pub type GateCallback = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// Consumer callbacks. All are best-effort and invoked after the state
/// mutation they report, never interleaved with it.
#[derive(Clone, Default)]
pub struct TranscriberCallbacks {
    pub on_transcribe: Option<TranscribeCallback>,
    pub on_vad: Option<VadCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_status_change: Option<StatusCallback>,
    pub on_stats_update: Option<StatsCallback>,
    /// Veto VAD processing of a slice before detector time is spent.
    pub on_begin_vad: Option<GateCallback>,
    /// Veto transcription of a slice before engine time is spent.
    pub on_begin_transcribe: Option<GateCallback>,
}

impl TranscriberCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_transcribe(mut self, f: impl Fn(&TranscribeEvent) + Send + Sync + 'static) -> Self {
        self.on_transcribe = Some(Arc::new(f));
        self
    }

    pub fn with_on_vad(mut self, f: impl Fn(&VadEvent) + Send + Sync + 'static) -> Self {
        self.on_vad = Some(Arc::new(f));
        self
    }

    pub fn with_on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn with_on_status_change(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    pub fn with_on_stats_update(mut self, f: impl Fn(&StatsEvent) + Send + Sync + 'static) -> Self {
        self.on_stats_update = Some(Arc::new(f));
        self
    }

    pub fn with_on_begin_vad(mut self, f: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        self.on_begin_vad = Some(Arc::new(f));
        self
    }

    pub fn with_on_begin_transcribe(
        mut self,
        f: impl Fn(u64) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_begin_transcribe = Some(Arc::new(f));
        self
    }

    /// Shallow-merges another set over this one: fields set in `other`
    /// replace the current ones, unset fields are left alone.
    pub fn merge(&mut self, other: TranscriberCallbacks) {
        if other.on_transcribe.is_some() {
            self.on_transcribe = other.on_transcribe;
        }
        if other.on_vad.is_some() {
            self.on_vad = other.on_vad;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
        if other.on_status_change.is_some() {
            self.on_status_change = other.on_status_change;
        }
        if other.on_stats_update.is_some() {
            self.on_stats_update = other.on_stats_update;
        }
        if other.on_begin_vad.is_some() {
            self.on_begin_vad = other.on_begin_vad;
        }
        if other.on_begin_transcribe.is_some() {
            self.on_begin_transcribe = other.on_begin_transcribe;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::SliceInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(queue_length: usize, estimated_mb: f64) -> StatsSnapshot {
        StatsSnapshot {
            is_active: true,
            is_recording: true,
            is_transcribing: false,
            queue_length,
            slices: SliceInfo {
                current_index: 0,
                transcribe_index: 0,
                total_slices: 1,
                memory: MemoryUsage {
                    slices_in_memory: 1,
                    total_samples: 0,
                    estimated_mb,
                },
            },
            vad_enabled: false,
            auto_slice_enabled: false,
        }
    }

    #[test]
    fn test_first_snapshot_always_emits() {
        assert!(snapshot(0, 0.0).should_emit(None));
    }

    #[test]
    fn test_identical_snapshot_is_debounced() {
        let prev = snapshot(2, 10.0);
        assert!(!snapshot(2, 10.0).should_emit(Some(&prev)));
    }

    #[test]
    fn test_flag_change_emits() {
        let prev = snapshot(0, 0.0);
        let mut next = snapshot(0, 0.0);
        next.is_transcribing = true;
        assert!(next.should_emit(Some(&prev)));
    }

    #[test]
    fn test_queue_length_change_emits() {
        let prev = snapshot(1, 10.0);
        assert!(snapshot(2, 10.0).should_emit(Some(&prev)));
    }

    #[test]
    fn test_memory_absolute_delta_emits() {
        let prev = snapshot(0, 100.0);
        // 6MB over on a 100MB base: under 10% relative, over 5MB absolute.
        assert!(snapshot(0, 106.0).should_emit(Some(&prev)));
    }

    #[test]
    fn test_memory_relative_delta_emits() {
        let prev = snapshot(0, 10.0);
        // 2MB over on a 10MB base: under 5MB absolute, over 10% relative.
        assert!(snapshot(0, 12.0).should_emit(Some(&prev)));
    }

    #[test]
    fn test_small_memory_delta_is_debounced() {
        let prev = snapshot(0, 100.0);
        assert!(!snapshot(0, 101.0).should_emit(Some(&prev)));
    }

    #[test]
    fn test_transcribe_event_json_omits_internal_timings() {
        let event = TranscribeEvent {
            kind: TranscribeEventKind::Transcribe,
            slice_index: Some(3),
            data: Some(TranscribeResult::from_text("hello")),
            error: None,
            process_time: Duration::from_millis(40),
            recording_time: Duration::from_secs(5),
            is_capturing: true,
            memory: MemoryUsage {
                slices_in_memory: 1,
                total_samples: 32000,
                estimated_mb: 0.06,
            },
            vad_event: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "transcribe");
        assert_eq!(value["slice_index"], 3);
        assert_eq!(value["data"]["text"], "hello");
        // Wall-time measurements stay internal.
        assert_eq!(value.get("process_time"), None);
        assert_eq!(value.get("recording_time"), None);
    }

    #[test]
    fn test_stats_event_kind_serializes_snake_case() {
        let event = StatsEvent {
            kind: StatsEventKind::MemoryChange,
            snapshot: snapshot(2, 1.5),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "memory_change");
        assert_eq!(value["snapshot"]["queue_length"], 2);
        assert_eq!(value["snapshot"]["slices"]["memory"]["estimated_mb"], 1.5);
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let mut base = TranscriberCallbacks::new()
            .with_on_error(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            });

        base.merge(TranscriberCallbacks::new().with_on_status_change(|_| {}));

        assert!(base.on_error.is_some());
        assert!(base.on_status_change.is_some());
        if let Some(cb) = &base.on_error {
            cb("boom");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
