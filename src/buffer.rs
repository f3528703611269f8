use std::io::{self, IoSliceMut, Read, Write};

/// Size of the stack region that absorbs reads larger than the free space.
const SCRATCH_SIZE: usize = 64 * 1024;

const DEFAULT_CAPACITY: usize = 1024;

/// A resizable byte buffer with separate read and write cursors.
///
/// The readable span is `[read_pos, write_pos)` and the writable span is
/// `[write_pos, capacity)`. `read_pos <= write_pos <= capacity` holds after
/// every operation.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    /// Create a new buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of bytes available to read
    pub fn readable_count(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Free space after the write cursor
    pub fn writable_count(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Already-consumed space in front of the read cursor
    pub fn prependable_count(&self) -> usize {
        self.read_pos
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readable_count() == 0
    }

    /// The readable span
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Advance the read cursor by `n` bytes.
    ///
    /// Consuming more than is readable resets both cursors.
    pub fn consume(&mut self, n: usize) {
        if n > self.readable_count() {
            self.clear();
        } else {
            self.read_pos += n;
        }
    }

    /// Reset both cursors, discarding any readable bytes
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Make room for at least `len` more bytes after the write cursor.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_count() >= len {
            return;
        }

        if self.prependable_count() + self.writable_count() >= len {
            // Compact: move the readable span to the front
            let readable = self.readable_count();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        } else {
            let new_capacity = self.data.len() + len;
            self.data.resize(new_capacity, 0);
        }
    }

    /// Copy `bytes` in after the write cursor, growing if needed
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Append the readable span of another buffer without consuming it
    pub fn append_buffer(&mut self, other: &ByteBuffer) {
        self.append(other.peek());
    }

    /// Take the whole readable span out of the buffer
    pub fn drain_all(&mut self) -> Vec<u8> {
        let bytes = self.peek().to_vec();
        self.clear();
        bytes
    }

    pub fn drain_all_to_string(&mut self) -> String {
        String::from_utf8_lossy(&self.drain_all()).into_owned()
    }

    /// Perform a single vectored read from `reader`.
    ///
    /// The first segment is the buffer's writable span, the second a 64 KiB
    /// stack scratch area. Bytes that overflow the writable span are appended
    /// afterwards, growing the buffer. Returns the number of bytes read.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable_count();

        let n = {
            let tail = &mut self.data[self.write_pos..];
            let mut segments = [IoSliceMut::new(tail), IoSliceMut::new(&mut scratch)];
            reader.read_vectored(&mut segments)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&scratch[..n - writable]);
        }

        Ok(n)
    }

    /// Perform a single write of the readable span to `writer`, consuming
    /// exactly the bytes the writer accepted.
    pub fn drain_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let n = writer.write(self.peek())?;
        self.consume(n);
        Ok(n)
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
