//! Microphone capture stage.
//!
//! [`CaptureProducer`] is meant to be driven from a realtime audio callback:
//! every invocation converts one block of float frames to PCM16 and hands
//! fixed-size [`AudioChunk`]s to its sink. It never allocates more than the
//! queue of not-yet-emitted samples and never blocks.

use crate::audio_utils::{encode_base64, f32_to_pcm16, i16_to_le_bytes};
use std::collections::VecDeque;
use std::ops::ControlFlow;

/// Samples per emitted chunk (about 128 ms at 16 kHz).
pub const CHUNK_SAMPLES: usize = 2048;

/// An immutable block of [`CHUNK_SAMPLES`] signed 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Box<[i16]>,
}

impl AudioChunk {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        i16_to_le_bytes(&self.samples)
    }

    /// The encoding accepted by `RealtimeAdapter::send_audio`.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.to_le_bytes())
    }
}

/// Converts float capture blocks into PCM16 chunks.
pub struct CaptureProducer<S> {
    queue: VecDeque<i16>,
    sink: S,
    closed: bool,
}

impl<S> CaptureProducer<S>
where
    S: FnMut(AudioChunk),
{
    /// Creates a producer that hands every full chunk to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            queue: VecDeque::with_capacity(CHUNK_SAMPLES * 2),
            sink,
            closed: false,
        }
    }

    /// Processes one block of input channels; only the first channel is used.
    ///
    /// Returns `Continue` while the host should keep scheduling the producer
    /// and `Break` once it has been torn down. Missing or empty blocks are
    /// skipped.
    pub fn process(&mut self, inputs: &[&[f32]]) -> ControlFlow<()> {
        if self.closed {
            return ControlFlow::Break(());
        }
        let Some(samples) = inputs.first().filter(|samples| !samples.is_empty()) else {
            return ControlFlow::Continue(());
        };

        self.queue.extend(samples.iter().map(|&s| f32_to_pcm16(s)));

        while self.queue.len() >= CHUNK_SAMPLES {
            let samples: Box<[i16]> = self.queue.drain(..CHUNK_SAMPLES).collect();
            (self.sink)(AudioChunk { samples });
        }
        ControlFlow::Continue(())
    }

    /// Samples waiting for the next chunk boundary.
    pub fn pending_samples(&self) -> usize {
        self.queue.len()
    }

    /// Tears the producer down; queued samples are discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
    }
}
