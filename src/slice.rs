//! Slice management for bounded-buffer transcription.
//!
//! A slice is a bounded-duration contiguous chunk of accumulated audio, the
//! unit of work submitted to the speech engine. The manager owns every slice
//! buffer, decides slice boundaries by byte capacity, and evicts the oldest
//! slices (strict FIFO by index) to bound memory over arbitrarily long
//! sessions.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One bounded chunk of accumulated audio.
///
/// The backing buffer is preallocated to full slice capacity and written
/// through a cursor (`Vec::len`); it is never resized upward. Once released,
/// the buffer is dropped and no further reads are permitted.
#[derive(Debug)]
pub struct AudioSlice {
    /// Monotonic slice index within the session.
    pub index: u64,
    /// PCM bytes written so far. Capacity is fixed at creation.
    pub data: Vec<u8>,
    /// Instant the slice was opened.
    pub start_time: Instant,
    /// Instant of the most recent append (or finalize).
    pub end_time: Instant,
    /// Whether the slice has been handed to the processing pipeline.
    pub is_processed: bool,
    /// Whether the buffer has been reclaimed.
    pub is_released: bool,
}

impl AudioSlice {
    fn new(index: u64, capacity: usize, now: Instant) -> Self {
        Self {
            index,
            data: Vec::with_capacity(capacity),
            start_time: now,
            end_time: now,
            is_processed: false,
            is_released: false,
        }
    }

    /// Number of valid bytes in the slice.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Metadata-only view of the slice, safe to retain after eviction.
    pub fn meta(&self) -> SliceMeta {
        SliceMeta {
            index: self.index,
            byte_len: self.data.len(),
            duration: self.end_time.saturating_duration_since(self.start_time),
            is_processed: self.is_processed,
            is_released: self.is_released,
        }
    }
}

/// Slice metadata without the audio buffer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SliceMeta {
    pub index: u64,
    pub byte_len: usize,
    #[serde(skip)]
    pub duration: Duration,
    pub is_processed: bool,
    pub is_released: bool,
}

/// Memory usage over non-released slices.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MemoryUsage {
    pub slices_in_memory: usize,
    pub total_samples: usize,
    pub estimated_mb: f64,
}

/// Read-only snapshot of slice bookkeeping, for reporting only.
#[derive(Debug, Clone, Serialize)]
pub struct SliceInfo {
    pub current_index: u64,
    pub transcribe_index: u64,
    pub total_slices: usize,
    pub memory: MemoryUsage,
}

/// Owns the ring of in-progress and recently-completed slices.
pub struct SliceManager {
    slices: BTreeMap<u64, AudioSlice>,
    current_index: u64,
    transcribe_index: u64,
    capacity: usize,
    max_slices_in_memory: usize,
    clock: Arc<dyn Clock>,
}

impl SliceManager {
    /// Creates a manager with preallocated slice capacity derived from the
    /// target slice duration and stream format.
    pub fn new(
        slice_duration: Duration,
        max_slices_in_memory: usize,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self::with_clock(
            slice_duration,
            max_slices_in_memory,
            sample_rate,
            channels,
            Arc::new(SystemClock),
        )
    }

    /// Creates a manager with a custom clock (for deterministic testing).
    pub fn with_clock(
        slice_duration: Duration,
        max_slices_in_memory: usize,
        sample_rate: u32,
        channels: u16,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = (slice_duration.as_secs_f64()
            * defaults::bytes_per_second(sample_rate, channels) as f64)
            as usize;
        Self {
            slices: BTreeMap::new(),
            current_index: 0,
            transcribe_index: 0,
            capacity: capacity.max(defaults::BYTES_PER_SAMPLE as usize),
            max_slices_in_memory: max_slices_in_memory.max(1),
            clock,
        }
    }

    /// Byte capacity of one slice.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ready_threshold(&self) -> usize {
        (self.capacity as f64 * defaults::SLICE_READY_FRACTION) as usize
    }

    fn open_current_slice(&mut self) -> u64 {
        let index = self.current_index;
        if !self.slices.contains_key(&index) {
            let now = self.clock.now();
            self.slices
                .insert(index, AudioSlice::new(index, self.capacity, now));
            self.cleanup_old_slices();
        }
        index
    }

    fn finalize_current_slice(&mut self) {
        let now = self.clock.now();
        if let Some(slice) = self.slices.get_mut(&self.current_index)
            && slice.byte_len() > 0
        {
            // Trim spare arena capacity; the slice will not grow again.
            slice.data.shrink_to_fit();
            slice.end_time = now;
        }
    }

    /// Appends audio to the current slice, opening new slices as capacity
    /// requires.
    ///
    /// The capacity check is "would exceed", so a slice is finalized before
    /// it can overflow its backing buffer; the buffer is never resized. A
    /// call whose bytes do not fit is flushed into the next slice whole;
    /// only a call larger than an entire slice is split across fresh slices.
    ///
    /// Returns the indices of slices that became ready (crossed 80% of
    /// capacity) or were finalized by this call, each reported at most once
    /// over the slice's lifetime.
    pub fn add_audio_data(&mut self, data: &[u8]) -> Vec<u64> {
        let mut completed = Vec::new();
        let mut remaining = data;

        while !remaining.is_empty() {
            let index = self.open_current_slice();
            let len = self
                .slices
                .get(&index)
                .map(AudioSlice::byte_len)
                .unwrap_or(0);

            if len + remaining.len() > self.capacity {
                if len > 0 {
                    // Flush the partially filled slice and retry against a
                    // fresh one.
                    self.finalize_current_slice();
                    if let Some(idx) = self.take_unreported(index) {
                        completed.push(idx);
                    }
                    self.current_index += 1;
                    continue;
                }

                // Single write larger than a whole slice: fill this slice to
                // capacity and spill the rest into the next.
                let (head, tail) = remaining.split_at(self.capacity);
                let now = self.clock.now();
                if let Some(slice) = self.slices.get_mut(&index) {
                    slice.data.extend_from_slice(head);
                    slice.end_time = now;
                }
                self.finalize_current_slice();
                if let Some(idx) = self.take_unreported(index) {
                    completed.push(idx);
                }
                self.current_index += 1;
                remaining = tail;
                continue;
            }

            let now = self.clock.now();
            if let Some(slice) = self.slices.get_mut(&index) {
                slice.data.extend_from_slice(remaining);
                slice.end_time = now;
            }
            remaining = &[];

            let filled = self
                .slices
                .get(&index)
                .map(AudioSlice::byte_len)
                .unwrap_or(0);
            if filled >= self.ready_threshold()
                && let Some(idx) = self.take_unreported(index)
            {
                completed.push(idx);
            }
        }

        completed
    }

    /// Marks a slice as handed to the pipeline, returning its index if it
    /// had not been reported before. Empty slices are never reported.
    fn take_unreported(&mut self, index: u64) -> Option<u64> {
        let slice = self.slices.get_mut(&index)?;
        if slice.is_processed || slice.byte_len() == 0 {
            return None;
        }
        slice.is_processed = true;
        Some(index)
    }

    /// Finalizes the current slice unconditionally and advances the index.
    ///
    /// Returns the slice index if it held data not yet reported to the
    /// pipeline.
    pub fn force_next_slice(&mut self) -> Option<u64> {
        let index = self.current_index;
        let has_data = self
            .slices
            .get(&index)
            .map(|s| s.byte_len() > 0)
            .unwrap_or(false);

        if has_data {
            self.finalize_current_slice();
            self.current_index += 1;
            self.take_unreported(index)
        } else {
            // Nothing to flush; just move on.
            self.current_index += 1;
            None
        }
    }

    /// Returns a view of a slice's valid bytes, or None if the slice is
    /// unknown, empty, or released.
    pub fn audio_for_transcription(&self, index: u64) -> Option<&[u8]> {
        let slice = self.slices.get(&index)?;
        if slice.is_released || slice.byte_len() == 0 {
            return None;
        }
        Some(&slice.data)
    }

    /// Looks up a slice by index.
    pub fn slice_by_index(&self, index: u64) -> Option<&AudioSlice> {
        self.slices.get(&index)
    }

    /// Records that a slice finished transcription.
    pub fn mark_transcribed(&mut self, index: u64) {
        self.transcribe_index = self.transcribe_index.max(index + 1);
    }

    /// Releases the oldest excess slices so no more than
    /// `max_slices_in_memory` non-released slices are retained.
    ///
    /// Invoked whenever a new slice is created. Strict FIFO by slice index;
    /// this is the system's sole eviction policy.
    fn cleanup_old_slices(&mut self) {
        while self.slices.values().filter(|s| !s.is_released).count() > self.max_slices_in_memory {
            let oldest = self
                .slices
                .values_mut()
                .find(|s| !s.is_released);
            match oldest {
                Some(slice) => {
                    slice.is_released = true;
                    // Keep the metadata entry; only the audio is reclaimed.
                    slice.data = Vec::new();
                    tracing::debug!(index = slice.index, "released old slice");
                }
                None => break,
            }
        }
    }

    /// Memory usage statistics over non-released slices.
    pub fn memory_usage(&self) -> MemoryUsage {
        let active: Vec<&AudioSlice> = self.slices.values().filter(|s| !s.is_released).collect();
        let total_bytes: usize = active.iter().map(|s| s.byte_len()).sum();
        let estimated_mb = total_bytes as f64 / (1024.0 * 1024.0);

        MemoryUsage {
            slices_in_memory: active.len(),
            total_samples: total_bytes / defaults::BYTES_PER_SAMPLE as usize,
            estimated_mb: (estimated_mb * 100.0).round() / 100.0,
        }
    }

    /// Current slice bookkeeping snapshot.
    pub fn slice_info(&self) -> SliceInfo {
        SliceInfo {
            current_index: self.current_index,
            transcribe_index: self.transcribe_index,
            total_slices: self.slices.len(),
            memory: self.memory_usage(),
        }
    }

    /// Releases and clears all slices, resetting both index counters.
    pub fn reset(&mut self) {
        self.slices.clear();
        self.current_index = 0;
        self.transcribe_index = 0;
    }
}
