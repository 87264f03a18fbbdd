//! Logical sectors: extents mapped to assembled content.
//!
//! An extent is `ceil(byte_length / logical_block_size)` consecutive
//! physical sectors; its content is the concatenation of each sector's user
//! data, truncated to the extent's byte length. Directory extents also cache
//! their parsed child records here, since a directory's structure cannot
//! change for the filesystem's lifetime.

use std::cell::RefCell;
use std::io::{Read, Seek};
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::record::DataRecord;
use crate::sector::SectorAccessor;

/// Extent contents at most this long are retained in the filesystem's
/// content cache; larger reads are handed to the caller and re-read on
/// demand.
pub(crate) const CONTENT_RETAIN_LIMIT: u32 = 64 * 1024;

/// A span of physical sectors holding one record's data.
pub struct LogicalSector {
    /// Index of the first physical sector of the extent.
    pub start_sector: u32,
    /// Physical sectors spanned: `ceil(byte_length / logical_block_size)`.
    pub sector_count: u32,
    /// Exact byte length of the extent's content.
    pub byte_length: u32,
    owner: RefCell<Weak<DataRecord>>,
    children: RefCell<Option<Vec<Rc<DataRecord>>>>,
}

impl LogicalSector {
    pub(crate) fn new(start_sector: u32, byte_length: u32, logical_block_size: u32) -> Self {
        Self {
            start_sector,
            sector_count: byte_length.div_ceil(logical_block_size),
            byte_length,
            owner: RefCell::new(Weak::new()),
            children: RefCell::new(None),
        }
    }

    /// The record this extent belongs to, if it is still alive.
    pub fn owner(&self) -> Option<Rc<DataRecord>> {
        self.owner.borrow().upgrade()
    }

    pub(crate) fn set_owner(&self, record: &Rc<DataRecord>) {
        *self.owner.borrow_mut() = Rc::downgrade(record);
    }

    pub(crate) fn cached_children(&self) -> Option<Vec<Rc<DataRecord>>> {
        self.children.borrow().clone()
    }

    pub(crate) fn cache_children(&self, children: Vec<Rc<DataRecord>>) {
        *self.children.borrow_mut() = Some(children);
    }

    /// Assembles the extent's content: `min(remaining, block_size)` bytes of
    /// user data from each spanned sector, in order.
    pub(crate) fn assemble<R: Read + Seek>(
        &self,
        accessor: &SectorAccessor<R>,
        logical_block_size: u32,
    ) -> Result<Vec<u8>> {
        let mut content = Vec::with_capacity(self.byte_length as usize);
        let mut remaining = self.byte_length as usize;
        for i in 0..self.sector_count {
            let user = accessor.read_user_data(self.start_sector + i)?;
            let take = remaining.min(logical_block_size as usize).min(user.len());
            content.extend_from_slice(&user[..take]);
            remaining -= take;
        }
        Ok(content)
    }
}

/// Iterator yielding an extent's content one logical block at a time,
/// without assembling the whole extent in memory.
pub struct ContentChunks<'a, R: Read + Seek> {
    accessor: &'a SectorAccessor<R>,
    logical_block_size: u32,
    next_sector: u32,
    remaining: u32,
}

impl<'a, R: Read + Seek> ContentChunks<'a, R> {
    pub(crate) fn new(
        accessor: &'a SectorAccessor<R>,
        start_sector: u32,
        byte_length: u32,
        logical_block_size: u32,
    ) -> Self {
        Self {
            accessor,
            logical_block_size,
            next_sector: start_sector,
            remaining: byte_length,
        }
    }

    /// An already-exhausted iterator, for reads the engine declines
    /// (multi-extent records).
    pub(crate) fn empty(accessor: &'a SectorAccessor<R>, logical_block_size: u32) -> Self {
        Self::new(accessor, 0, 0, logical_block_size)
    }

    /// Bytes not yet yielded.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl<'a, R: Read + Seek> Iterator for ContentChunks<'a, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let user = match self.accessor.read_user_data(self.next_sector) {
            Ok(user) => user,
            Err(err) => {
                // fail once, then stop
                self.remaining = 0;
                return Some(Err(err));
            }
        };
        let take = (self.remaining as usize)
            .min(self.logical_block_size as usize)
            .min(user.len());
        let mut chunk = user;
        chunk.truncate(take);
        self.next_sector += 1;
        self.remaining -= take as u32;
        Some(Ok(chunk))
    }
}
