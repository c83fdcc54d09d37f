//! Script-side views of host-owned stream data
//!
//! Wrappers never own what they point at. They hold weak references to the
//! stream and to the header map or buffer, so each wrapper is only usable
//! while the script is executing inside a pipeline callback or completion and
//! the data still exists. A body chunk lives in a cell that is dropped when
//! its data event returns. Any access outside that window is
//! [`ScriptError::Expired`].

use crate::error::{Result, ScriptError};
use crate::stream::StreamShared;
use bytes::Bytes;
use octopus_core::{Buffer, HeaderMap};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderBlock {
    Headers,
    Trailers,
}

impl HeaderBlock {
    fn name(self) -> &'static str {
        match self {
            HeaderBlock::Headers => "headers",
            HeaderBlock::Trailers => "trailers",
        }
    }
}

/// Headers or trailers of the current stream direction
#[derive(Debug, Clone)]
pub struct HeadersHandle {
    stream: Weak<StreamShared>,
    map: Weak<RefCell<HeaderMap>>,
    block: HeaderBlock,
}

impl HeadersHandle {
    pub(crate) fn headers(stream: &Rc<StreamShared>, map: &Rc<RefCell<HeaderMap>>) -> Self {
        Self {
            stream: Rc::downgrade(stream),
            map: Rc::downgrade(map),
            block: HeaderBlock::Headers,
        }
    }

    pub(crate) fn trailers(stream: &Rc<StreamShared>, map: &Rc<RefCell<HeaderMap>>) -> Self {
        Self {
            stream: Rc::downgrade(stream),
            map: Rc::downgrade(map),
            block: HeaderBlock::Trailers,
        }
    }

    fn live(&self) -> Result<(Rc<StreamShared>, Rc<RefCell<HeaderMap>>)> {
        let expired = || ScriptError::expired(self.block.name());
        let stream = self
            .stream
            .upgrade()
            .filter(|stream| stream.is_live())
            .ok_or_else(expired)?;
        let map = self.map.upgrade().ok_or_else(expired)?;
        Ok((stream, map))
    }

    fn read<R>(&self, f: impl FnOnce(&HeaderMap) -> R) -> Result<R> {
        let (_, map) = self.live()?;
        let map = map.borrow();
        Ok(f(&map))
    }

    fn modify<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> Result<R> {
        let (stream, map) = self.live()?;
        stream.ensure_active(self.block.name())?;
        if self.block == HeaderBlock::Headers && stream.headers_continued() {
            return Err(ScriptError::runtime(
                "headers can no longer be modified once they have been continued",
            ));
        }
        let mut map = map.borrow_mut();
        Ok(f(&mut map))
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        self.read(|map| map.get(name).map(str::to_owned))
    }

    /// Every value for `name`
    pub fn get_all(&self, name: &str) -> Result<Vec<String>> {
        self.read(|map| map.get_all(name).map(str::to_owned).collect())
    }

    /// Append a value
    pub fn add(&self, name: &str, value: &str) -> Result<()> {
        self.modify(|map| map.add(name, value))
    }

    /// Set `name` to a single value
    pub fn replace(&self, name: &str, value: &str) -> Result<()> {
        self.modify(|map| map.replace(name, value))
    }

    /// Remove every value for `name`
    pub fn remove(&self, name: &str) -> Result<()> {
        self.modify(|map| {
            map.remove(name);
        })
    }

    /// Snapshot of all `(name, value)` pairs in order
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        self.read(|map| {
            map.iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect()
        })
    }
}

/// Full body or a single body chunk
#[derive(Debug, Clone)]
pub struct BodyHandle {
    stream: Weak<StreamShared>,
    buffer: Weak<RefCell<Buffer>>,
    object: &'static str,
}

impl BodyHandle {
    pub(crate) fn body(stream: &Rc<StreamShared>, buffer: &Rc<RefCell<Buffer>>) -> Self {
        Self {
            stream: Rc::downgrade(stream),
            buffer: Rc::downgrade(buffer),
            object: "body",
        }
    }

    pub(crate) fn chunk(stream: &Rc<StreamShared>, buffer: &Rc<RefCell<Buffer>>) -> Self {
        Self {
            stream: Rc::downgrade(stream),
            buffer: Rc::downgrade(buffer),
            object: "body chunk",
        }
    }

    fn live(&self) -> Result<(Rc<StreamShared>, Rc<RefCell<Buffer>>)> {
        let expired = || ScriptError::expired(self.object);
        let stream = self
            .stream
            .upgrade()
            .filter(|stream| stream.is_live())
            .ok_or_else(expired)?;
        let buffer = self.buffer.upgrade().ok_or_else(expired)?;
        Ok((stream, buffer))
    }

    fn buffer(&self) -> Result<Rc<RefCell<Buffer>>> {
        self.live().map(|(_, buffer)| buffer)
    }

    /// Number of bytes
    pub fn length(&self) -> Result<usize> {
        Ok(self.buffer()?.borrow().len())
    }

    /// `len` bytes starting at `start`
    pub fn get_bytes(&self, start: usize, len: usize) -> Result<Bytes> {
        let buffer = self.buffer()?;
        let buffer = buffer.borrow();
        let end = start
            .checked_add(len)
            .filter(|end| *end <= buffer.len())
            .ok_or_else(|| {
                ScriptError::invalid_argument(format!(
                    "index out of range: {start}+{len} exceeds body length {}",
                    buffer.len()
                ))
            })?;
        Ok(Bytes::copy_from_slice(&buffer.as_slice()[start..end]))
    }

    /// Copy of the whole content
    pub fn bytes(&self) -> Result<Bytes> {
        Ok(self.buffer()?.borrow().to_bytes())
    }

    /// Whole content as text, replacing invalid UTF-8
    pub fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.buffer()?.borrow().as_slice()).into_owned())
    }

    /// Replace the content with `data`
    pub fn set_bytes(&self, data: &[u8]) -> Result<()> {
        let (stream, buffer) = self.live()?;
        stream.ensure_active(self.object)?;
        buffer.borrow_mut().set(data);
        Ok(())
    }
}
