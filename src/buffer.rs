//! Shareable, immutable views over captured bytes.
//!
//! A [`BufferView`] is what decoders hand to the engine and what the engine
//! hands back once a datagram has been rebuilt. It wraps [`Bytes`], so clones
//! and sub-ranges are cheap reference-count bumps.
//!
//! Ownership is explicit: a view is either [`Ownership::Owned`] or a window
//! [`Ownership::BorrowedFrom`] a parent buffer. A rebuilt buffer can also keep
//! older buffers alive through its chain, which replaces manual
//! "free unless it is a sub-view" bookkeeping.

use bytes::Bytes;

/// How a view relates to the storage it reads from.
#[derive(Debug, Clone)]
pub enum Ownership {
    /// The view holds its own storage.
    Owned,
    /// The view is a window into `parent`, starting at `offset`.
    BorrowedFrom { parent: Bytes, offset: usize },
}

/// Immutable view over captured or reassembled bytes.
#[derive(Debug, Clone)]
pub struct BufferView {
    bytes: Bytes,
    ownership: Ownership,
    /// Buffers kept alive for as long as this one lives.
    chain: Vec<Bytes>,
}

impl BufferView {
    /// Create an owned view.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            ownership: Ownership::Owned,
            chain: Vec::new(),
        }
    }

    /// Create an owned view by copying `data`.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Create an empty owned view.
    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The underlying shared bytes.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    /// Whether this view borrows from a parent buffer.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.ownership, Ownership::BorrowedFrom { .. })
    }

    /// Whether `len` bytes starting at `offset` are present.
    #[inline]
    pub fn bytes_exist(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .map(|end| end <= self.bytes.len())
            .unwrap_or(false)
    }

    /// Borrow `len` bytes starting at `offset` from this view.
    pub fn subview(&self, offset: usize, len: usize) -> Option<BufferView> {
        if !self.bytes_exist(offset, len) {
            return None;
        }
        Some(Self {
            bytes: self.bytes.slice(offset..offset + len),
            ownership: Ownership::BorrowedFrom {
                parent: self.bytes.clone(),
                offset,
            },
            chain: Vec::new(),
        })
    }

    /// Borrow everything from `offset` to the end of this view.
    pub fn subview_remaining(&self, offset: usize) -> Option<BufferView> {
        let len = self.bytes.len().checked_sub(offset)?;
        self.subview(offset, len)
    }

    /// Copy `len` bytes starting at `offset` into a new owned view.
    ///
    /// Used when a fragment must outlive the packet it arrived in.
    pub fn clone_range(&self, offset: usize, len: usize) -> Option<BufferView> {
        if !self.bytes_exist(offset, len) {
            return None;
        }
        Some(Self::copy_from_slice(&self.bytes[offset..offset + len]))
    }

    /// Keep `other` (and everything it keeps alive) alive with this view.
    pub fn chain(&mut self, other: BufferView) {
        let BufferView { bytes, chain, .. } = other;
        self.chain.push(bytes);
        self.chain.extend(chain);
    }

    /// Number of buffers this view keeps alive besides its own.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Compare `other` against the bytes at `offset`.
    ///
    /// Returns false when the range is not present.
    pub fn mem_eq(&self, offset: usize, other: &[u8]) -> bool {
        self.bytes_exist(offset, other.len()) && &self.bytes[offset..offset + other.len()] == other
    }
}

impl Default for BufferView {
    fn default() -> Self {
        Self::empty()
    }
}

impl AsRef<[u8]> for BufferView {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for BufferView {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for BufferView {}

impl From<Bytes> for BufferView {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for BufferView {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for BufferView {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}
