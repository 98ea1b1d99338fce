//! # NR Bytes
//!
//! A segmented byte buffer for protocol data unit assembly.
//!
//! PDU construction in the data plane prepends small headers and appends
//! trailers (a 4-byte MAC-I) to payloads that arrive as a single chunk.
//! `ByteBuffer` keeps the payload in segments so both operations are O(1):
//! headers go into headroom reserved in front of the first segment, trailers
//! extend the last segment. Ciphering mutates the stored bytes in place
//! through [`ByteBuffer::segments_mut`].
//!
//! All allocating operations are fallible and report [`BufferFailure`]
//! instead of aborting, so a pool-exhausted deep copy can be turned into a
//! dropped PDU by the caller.

use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;

/// Headroom reserved in front of buffers created from a slice, sized for the
/// largest PDCP data PDU header plus slack.
const DEFAULT_HEADROOM: usize = 8;

/// Allocation failed while growing or copying a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer failure")]
pub struct BufferFailure;

#[derive(Default)]
struct Segment {
    data: Vec<u8>,
    /// First valid byte in `data`; bytes before it are headroom.
    start: usize,
}

impl Segment {
    fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.start..]
    }

    fn len(&self) -> usize {
        self.data.len() - self.start
    }
}

/// A segmented sequence of bytes with cheap prepend and append.
#[derive(Default)]
pub struct ByteBuffer {
    segments: VecDeque<Segment>,
    len: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `bytes` into a fresh buffer with header headroom in front.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BufferFailure> {
        let mut data = Vec::new();
        data.try_reserve(bytes.len() + DEFAULT_HEADROOM)
            .map_err(|_| BufferFailure)?;
        data.resize(DEFAULT_HEADROOM, 0);
        data.extend_from_slice(bytes);
        let mut segments = VecDeque::new();
        segments.push_back(Segment {
            data,
            start: DEFAULT_HEADROOM,
        });
        Ok(Self {
            segments,
            len: bytes.len(),
        })
    }

    /// Takes ownership of `data` as a single segment without headroom.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        let mut segments = VecDeque::new();
        if len != 0 {
            segments.push_back(Segment { data, start: 0 });
        }
        Self { segments, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `bytes` at the tail, extending the last segment.
    pub fn append_slice(&mut self, bytes: &[u8]) -> Result<(), BufferFailure> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.segments.is_empty() {
            self.segments.push_back(Segment::default());
        }
        let last = self.segments.back_mut().unwrap();
        last.data.try_reserve(bytes.len()).map_err(|_| BufferFailure)?;
        last.data.extend_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub fn append_byte(&mut self, byte: u8) -> Result<(), BufferFailure> {
        self.append_slice(&[byte])
    }

    /// Appends another buffer at the tail, keeping its segmentation.
    pub fn append_buffer(&mut self, mut other: ByteBuffer) {
        self.len += other.len;
        self.segments.append(&mut other.segments);
    }

    /// Writes `bytes` in front of the buffer. Uses the first segment's
    /// headroom when available, otherwise a new front segment is allocated.
    pub fn prepend_slice(&mut self, bytes: &[u8]) -> Result<(), BufferFailure> {
        if bytes.is_empty() {
            return Ok(());
        }
        if let Some(first) = self.segments.front_mut() {
            if first.start >= bytes.len() {
                let new_start = first.start - bytes.len();
                first.data[new_start..first.start].copy_from_slice(bytes);
                first.start = new_start;
                self.len += bytes.len();
                return Ok(());
            }
        }
        let mut data = Vec::new();
        data.try_reserve(bytes.len() + DEFAULT_HEADROOM)
            .map_err(|_| BufferFailure)?;
        data.resize(DEFAULT_HEADROOM, 0);
        data.extend_from_slice(bytes);
        self.segments.push_front(Segment {
            data,
            start: DEFAULT_HEADROOM,
        });
        self.len += bytes.len();
        Ok(())
    }

    /// Removes `n` bytes from the head. Clamps to the buffer length.
    pub fn trim_head(&mut self, mut n: usize) {
        n = n.min(self.len);
        self.len -= n;
        while n > 0 {
            let first = self.segments.front_mut().unwrap();
            let avail = first.len();
            if avail > n {
                first.start += n;
                return;
            }
            n -= avail;
            self.segments.pop_front();
        }
    }

    /// Removes `n` bytes from the tail. Clamps to the buffer length.
    pub fn trim_tail(&mut self, mut n: usize) {
        n = n.min(self.len);
        self.len -= n;
        while n > 0 {
            let last = self.segments.back_mut().unwrap();
            let avail = last.len();
            if avail > n {
                let new_len = last.data.len() - n;
                last.data.truncate(new_len);
                return;
            }
            n -= avail;
            self.segments.pop_back();
        }
    }

    /// Byte at `index`. Panics when out of range, like slice indexing.
    pub fn byte_at(&self, mut index: usize) -> u8 {
        assert!(index < self.len, "index {index} out of range (len {})", self.len);
        for seg in &self.segments {
            if index < seg.len() {
                return seg.as_slice()[index];
            }
            index -= seg.len();
        }
        unreachable!()
    }

    pub fn iter_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.segments.iter().flat_map(|s| s.as_slice().iter().copied())
    }

    /// Contiguous read-only spans in order.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(|s| s.as_slice())
    }

    /// Contiguous modifiable spans in order; used for in-place ciphering.
    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        self.segments.iter_mut().map(|s| s.as_mut_slice())
    }

    /// Copies the contents into a new single-segment buffer.
    pub fn deep_copy(&self) -> Result<ByteBuffer, BufferFailure> {
        let mut data = Vec::new();
        data.try_reserve(self.len + DEFAULT_HEADROOM)
            .map_err(|_| BufferFailure)?;
        data.resize(DEFAULT_HEADROOM, 0);
        for seg in &self.segments {
            data.extend_from_slice(seg.as_slice());
        }
        let mut segments = VecDeque::new();
        segments.push_back(Segment {
            data,
            start: DEFAULT_HEADROOM,
        });
        Ok(ByteBuffer {
            segments,
            len: self.len,
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.iter_bytes().collect()
    }

    /// Zero-copy view over `[offset, offset + len)`.
    pub fn view(&self, offset: usize, len: usize) -> ByteBufferView<'_> {
        assert!(offset + len <= self.len, "view out of range");
        ByteBufferView {
            buf: self,
            offset,
            len,
        }
    }
}

impl std::ops::Index<usize> for ByteBuffer {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        let mut idx = index;
        for seg in &self.segments {
            if idx < seg.len() {
                return &seg.as_slice()[idx];
            }
            idx -= seg.len();
        }
        panic!("index {index} out of range (len {})", self.len);
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter_bytes().eq(other.iter_bytes())
    }
}

impl Eq for ByteBuffer {}

impl PartialEq<[u8]> for ByteBuffer {
    fn eq(&self, other: &[u8]) -> bool {
        self.len == other.len() && self.iter_bytes().eq(other.iter().copied())
    }
}

impl PartialEq<Vec<u8>> for ByteBuffer {
    fn eq(&self, other: &Vec<u8>) -> bool {
        self == other.as_slice()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteBuffer[len={}; ", self.len)?;
        for b in self.iter_bytes().take(32) {
            write!(f, "{b:02x}")?;
        }
        if self.len > 32 {
            write!(f, "..")?;
        }
        write!(f, "]")
    }
}

/// Read-only window into a [`ByteBuffer`].
#[derive(Clone, Copy)]
pub struct ByteBufferView<'a> {
    buf: &'a ByteBuffer,
    offset: usize,
    len: usize,
}

impl ByteBufferView<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.buf.iter_bytes().skip(self.offset).take(self.len)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.iter_bytes().collect()
    }
}
