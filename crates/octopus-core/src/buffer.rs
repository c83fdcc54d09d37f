//! Body data buffers

use bytes::{Bytes, BytesMut};
use std::cell::RefCell;
use std::rc::Rc;

/// Buffer owned by the host and shared with filters for one stream
pub type BufferRef = Rc<RefCell<Buffer>>;

/// Growable byte buffer holding body data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the buffer for sharing with a filter
    pub fn into_shared(self) -> BufferRef {
        Rc::new(RefCell::new(self))
    }

    /// Append bytes
    pub fn add(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Move all bytes out of `other` and append them, leaving `other` empty
    pub fn move_from(&mut self, other: &mut Buffer) {
        self.data.unsplit(other.data.split());
    }

    /// Replace the contents with `data`
    pub fn set(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    /// Remove and return all bytes
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Copy of the current contents
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Borrow the current contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self {
            data: BytesMut::from(data),
        }
    }
}

impl From<&str> for Buffer {
    fn from(data: &str) -> Self {
        Self::from(data.as_bytes())
    }
}

impl From<Bytes> for Buffer {
    fn from(data: Bytes) -> Self {
        Self::from(data.as_ref())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: BytesMut::from(data.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_from_drains_source() {
        let mut body = Buffer::from("hello ");
        let mut chunk = Buffer::from("world");

        body.move_from(&mut chunk);

        assert_eq!(body.as_slice(), b"hello world");
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_take_and_set() {
        let mut buffer = Buffer::from("abc");
        buffer.set(b"xyz!");
        assert_eq!(buffer.len(), 4);

        let taken = buffer.take();
        assert_eq!(taken.as_ref(), b"xyz!");
        assert!(buffer.is_empty());
    }
}
