use bytes::Bytes;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered bytes while hunting for frame markers. A frame
/// larger than this is discarded rather than growing without limit.
const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Reassembles complete JPEG frames from an arbitrary chunking of an
/// MJPEG byte stream, e.g. the stdout pipe of an ffmpeg encode process.
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    pending: Vec<u8>,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let Some(start) = position(&self.pending, &SOI) else {
                // No start marker anywhere; nothing before one is useful.
                self.pending.clear();
                break;
            };
            if start > 0 {
                self.pending.drain(..start);
            }

            match position(&self.pending[SOI.len()..], &EOI) {
                Some(offset) => {
                    let end = SOI.len() + offset + EOI.len();
                    let frame: Vec<u8> = self.pending.drain(..end).collect();
                    frames.push(Bytes::from(frame));
                }
                None => {
                    if self.pending.len() > MAX_PENDING_BYTES {
                        self.pending.clear();
                    }
                    break;
                }
            }
        }
        frames
    }
}

fn position(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(marker.len()).position(|w| w == marker)
}
