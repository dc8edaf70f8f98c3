//! C2: Chunk Buffer.
//!
//! Accumulates raw PCM and emits fixed-size chunks to a downstream sink,
//! gated by an enable/disable flag that `flush` always ignores.
//! Grounded on the buffering semantics in `xfyun_asr_python`'s
//! `AudioBufferManager` (fixed threshold, sync/async sink, force-flush).

use bytes::Bytes;

/// A sink that receives full-sized (or final short remainder) chunks.
///
/// When a sink is registered, [`ChunkBuffer::add`] and
/// [`ChunkBuffer::flush`] deliver chunks to it directly and return an empty
/// vector; otherwise chunks are returned to the caller.
pub trait ChunkSink: Send + Sync {
    fn on_chunk(&self, chunk: Bytes);
}

/// Fixed-threshold byte buffer with emit-on-demand flush semantics.
pub struct ChunkBuffer {
    threshold: usize,
    buffer: Vec<u8>,
    enabled: bool,
    sink: Option<Box<dyn ChunkSink>>,
}

impl ChunkBuffer {
    /// Creates a buffer with an immutable positive threshold.
    ///
    /// # Panics
    /// Panics if `threshold` is zero.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        assert!(threshold > 0, "chunk buffer threshold must be positive");
        Self {
            threshold,
            buffer: Vec::new(),
            enabled: true,
            sink: None,
        }
    }

    /// Registers a sink; chunks are delivered to it rather than returned.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ChunkSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enables chunk emission on subsequent `add` calls.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Disables chunk emission on subsequent `add` calls. Buffered bytes
    /// are still accepted and accounted for; `flush` still emits them.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Current buffered byte count (`< threshold` after any `add`).
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Appends bytes, then emits full `threshold`-sized chunks while
    /// enabled. Chunks below threshold stay buffered until the next `add`
    /// or an explicit `flush`.
    pub fn add(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(bytes);
        self.drain_full_chunks(self.enabled)
    }

    /// Emits all buffered bytes regardless of the enable/disable gate: full
    /// chunks first, then a final short remainder if any bytes are left.
    pub fn flush(&mut self) -> Vec<Bytes> {
        let mut chunks = self.drain_full_chunks(true);
        if !self.buffer.is_empty() {
            let remainder = Bytes::from(std::mem::take(&mut self.buffer));
            self.deliver_or_collect(remainder, &mut chunks);
        }
        chunks
    }

    fn drain_full_chunks(&mut self, emit: bool) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while self.buffer.len() >= self.threshold {
            let chunk = Bytes::from(self.buffer.drain(..self.threshold).collect::<Vec<u8>>());
            if emit {
                self.deliver_or_collect(chunk, &mut chunks);
            }
            // When emission is gated off, the chunk is still removed from
            // the buffer (processed) but discarded, matching the source's
            // "disabled" behavior rather than failing the session.
        }
        chunks
    }

    fn deliver_or_collect(&self, chunk: Bytes, out: &mut Vec<Bytes>) {
        match &self.sink {
            Some(sink) => sink.on_chunk(chunk),
            None => out.push(chunk),
        }
    }
}
