use parking_lot::Mutex;

use crate::models::error::BridgeError;

/// Thread-safe circular byte queue between one capture context and one
/// render context.
///
/// Share it as `Arc<RingBuffer>`; all methods take `&self`. The internal lock
/// is held only across the copy and offset update, so neither side ever
/// waits on the other for longer than a `memcpy`.
///
/// Overflow behavior: a push that does not fit is rejected whole. Partial
/// writes would split isochronous packets and shift the stereo frame
/// alignment; dropping the packet keeps the next one aligned.
#[derive(Debug)]
pub struct RingBuffer {
    state: Mutex<RingState>,
    capacity: usize,
}

#[derive(Debug)]
struct RingState {
    storage: Box<[u8]>,
    read_index: usize,
    write_index: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                storage: vec![0u8; capacity].into_boxed_slice(),
                read_index: 0,
                write_index: 0,
                len: 0,
            }),
            capacity,
        }
    }

    /// Append `data` if all of it fits.
    ///
    /// Returns the number of bytes accepted, which is always `data.len()`.
    /// When `data` is larger than the free space nothing is written and
    /// `BufferOverflow` is returned.
    pub fn push(&self, data: &[u8]) -> Result<usize, BridgeError> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut s = self.state.lock();
        let free = self.capacity - s.len;
        if data.len() > free {
            return Err(BridgeError::BufferOverflow {
                requested: data.len(),
                free,
            });
        }

        let write = s.write_index;
        let first = data.len().min(self.capacity - write);
        s.storage[write..write + first].copy_from_slice(&data[..first]);
        s.storage[..data.len() - first].copy_from_slice(&data[first..]);

        s.write_index = (write + data.len()) % self.capacity;
        s.len += data.len();
        Ok(data.len())
    }

    /// Move up to `dest.len()` bytes into `dest`.
    ///
    /// Returns the number of bytes copied. A short read leaves the tail of
    /// `dest` untouched; silence padding is the caller's job.
    pub fn pop(&self, dest: &mut [u8]) -> usize {
        let mut s = self.state.lock();
        let to_read = dest.len().min(s.len);
        if to_read == 0 {
            return 0;
        }

        let read = s.read_index;
        let first = to_read.min(self.capacity - read);
        dest[..first].copy_from_slice(&s.storage[read..read + first]);
        dest[first..to_read].copy_from_slice(&s.storage[..to_read - first]);

        s.read_index = (read + to_read) % self.capacity;
        s.len -= to_read;
        to_read
    }

    /// Number of bytes currently buffered.
    pub fn available(&self) -> usize {
        self.state.lock().len
    }

    /// Number of bytes a push can accept right now.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Discard all buffered bytes.
    pub fn clear(&self) {
        let mut s = self.state.lock();
        s.read_index = 0;
        s.write_index = 0;
        s.len = 0;
    }

    /// The total capacity of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
