//! Per-call buffering of inbound audio chunks.

/// Collects the chunks of one utterance in arrival order.
///
/// Chunks are trusted as delivered: nothing is reordered or deduplicated.
#[derive(Debug, Default)]
pub struct AudioAccumulator {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl AudioAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the current utterance. Empty chunks are dropped.
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk.to_vec());
    }

    /// Returns the buffered chunks as one contiguous clip and starts a new utterance.
    ///
    /// An empty result means there is no utterance to process.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut clip = Vec::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            clip.extend_from_slice(&chunk);
        }
        self.len = 0;
        clip
    }

    /// Drops everything buffered so far.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_concatenates_in_arrival_order() {
        let mut acc = AudioAccumulator::new();
        acc.append(b"b1");
        acc.append(b"-b2-");
        acc.append(b"b3");

        assert_eq!(acc.chunk_count(), 3);
        assert_eq!(acc.len(), 8);
        assert_eq!(acc.flush(), b"b1-b2-b3");
    }

    #[test]
    fn second_flush_is_empty() {
        let mut acc = AudioAccumulator::new();
        acc.append(b"hello");
        assert_eq!(acc.flush(), b"hello");

        assert!(acc.is_empty());
        assert!(acc.flush().is_empty());
    }

    #[test]
    fn append_after_flush_starts_new_utterance() {
        let mut acc = AudioAccumulator::new();
        acc.append(b"first");
        acc.flush();
        acc.append(b"second");

        assert_eq!(acc.flush(), b"second");
    }

    #[test]
    fn empty_chunks_are_ignored() {
        let mut acc = AudioAccumulator::new();
        acc.append(b"");
        assert!(acc.is_empty());
        assert_eq!(acc.chunk_count(), 0);

        acc.append(b"x");
        acc.append(b"");
        assert_eq!(acc.chunk_count(), 1);
        assert_eq!(acc.flush(), b"x");
    }

    #[test]
    fn clear_discards_buffer() {
        let mut acc = AudioAccumulator::new();
        acc.append(b"abc");
        acc.clear();

        assert!(acc.is_empty());
        assert!(acc.flush().is_empty());
    }

    #[test]
    fn many_chunks_preserve_order() {
        let mut acc = AudioAccumulator::new();
        let mut expected = Vec::new();
        for i in 0..=255u8 {
            let chunk = vec![i; (i as usize % 7) + 1];
            expected.extend_from_slice(&chunk);
            acc.append(&chunk);
        }

        assert_eq!(acc.flush(), expected);
    }
}
