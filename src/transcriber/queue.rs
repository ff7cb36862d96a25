//! Transcription work queue and result store.

use crate::slice::SliceMeta;
use crate::transcriber::events::TranscribeEvent;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// One unit of queued transcription work. Consumed exactly once; the
/// pipeline never enqueues the same slice twice.
#[derive(Debug)]
pub struct QueueItem {
    pub slice_index: u64,
    pub audio: Vec<u8>,
}

/// Stored outcome of one transcribed slice: metadata only, no audio.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionRecord {
    pub slice: SliceMeta,
    pub event: TranscribeEvent,
}

/// FIFO of slices awaiting transcription plus the completed results map.
///
/// The single-flight guarantee lives in the orchestrator's drain guard;
/// this type only keeps order and results.
#[derive(Default)]
pub struct TranscriptionQueue {
    items: VecDeque<QueueItem>,
    results: BTreeMap<u64, TranscriptionRecord>,
}

impl TranscriptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: QueueItem) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Stores the completed record for a slice, replacing any earlier one.
    pub fn store_result(&mut self, index: u64, record: TranscriptionRecord) {
        self.results.insert(index, record);
    }

    pub fn result(&self, index: u64) -> Option<&TranscriptionRecord> {
        self.results.get(&index)
    }

    /// All completed records in ascending slice index order.
    pub fn results(&self) -> Vec<TranscriptionRecord> {
        self.results.values().cloned().collect()
    }

    /// Builds the context prompt for the next engine call: the initial
    /// session prompt followed by every completed result in slice order.
    pub fn build_prompt(&self, initial: Option<&str>, carry_previous: bool) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(initial) = initial {
            let initial = initial.trim();
            if !initial.is_empty() {
                parts.push(initial);
            }
        }
        if carry_previous {
            for record in self.results.values() {
                if let Some(data) = &record.event.data {
                    let text = data.text.trim();
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.results.clear();
    }
}

/// Removes bracketed single-word markers such as `[ silence ]` or
/// `[BLANK_AUDIO]` that some engines emit for non-speech audio, then
/// normalizes the surrounding whitespace.
pub fn strip_silence_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let (head, tail) = rest.split_at(open);
        match tail.find(']') {
            Some(close) => {
                let inner = &tail[1..close];
                if inner.trim().split_whitespace().count() <= 1 {
                    out.push_str(head);
                } else {
                    out.push_str(head);
                    out.push_str(&tail[..=close]);
                }
                rest = &tail[close + 1..];
            }
            None => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
