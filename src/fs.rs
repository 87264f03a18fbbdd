//! The filesystem engine.
//!
//! `IsoFs::open` detects the sector geometry, walks the volume descriptor
//! chain from sector 16 and selects the active descriptor (the first
//! Primary, superseded by a Joliet Supplemental). Everything after open is
//! lazy: directory extents are parsed on first enumeration, extent content
//! on first read, and both are cached for the filesystem's lifetime.
//!
//! The engine is single-threaded by design; caches are plain `RefCell`
//! structures scoped to one `IsoFs` instance, so multiple images can be
//! open side by side without interference.

use std::collections::HashMap;
use std::cell::RefCell;
use std::io::{Read, Seek};
use std::num::NonZero;
use std::rc::Rc;

use log::{debug, warn};
use lru::LruCache;

use crate::error::{IsoError, Result};
use crate::extent::{ContentChunks, LogicalSector, CONTENT_RETAIN_LIMIT};
use crate::format::{self, DiskFormat, DESCRIPTOR_AREA_START};
use crate::record::{self, DataRecord};
use crate::sector::{SectorAccessor, SectorGeometry};
use crate::volume::{self, MasterVolumeDescriptor, VolumeDescriptor};

/// Extent contents retained in the cache, counted in extents.
const CONTENT_CACHE_ENTRIES: usize = 64;

/// A parsed ISO-9660 filesystem over a random-access byte source.
pub struct IsoFs<R: Read + Seek> {
    accessor: SectorAccessor<R>,
    format: DiskFormat,
    joliet: bool,
    volume: MasterVolumeDescriptor,
    /// start sector -> the one logical sector claiming it
    sectors: RefCell<HashMap<u32, Rc<LogicalSector>>>,
    /// start sector -> assembled extent content (small extents only)
    content_cache: RefCell<LruCache<u32, Rc<[u8]>>>,
    /// absolute path -> resolution result, negatives included
    paths: RefCell<HashMap<String, Option<Rc<DataRecord>>>>,
}

impl<R: Read + Seek> IsoFs<R> {
    /// Opens a filesystem from a byte source. Fails whole: geometry that
    /// matches nothing, a UDF volume, a malformed descriptor chain or a
    /// missing primary descriptor all abort construction.
    pub fn open(source: R) -> Result<IsoFs<R>> {
        let mut accessor = SectorAccessor::new(source, SectorGeometry::LOGICAL)?;
        let format = format::detect(&mut accessor);
        match format {
            DiskFormat::Unknown => return Err(IsoError::UnrecognizedFormat),
            DiskFormat::Udf => return Err(IsoError::UnsupportedFormat),
            DiskFormat::Iso9660 => {}
        }

        let (volume, joliet) = Self::walk_descriptor_chain(&accessor)?;
        debug!(
            "opened volume {:?}: {} blocks of {} bytes, joliet={}",
            volume.volume_id, volume.logical_block_count, volume.logical_block_size, joliet
        );

        Ok(IsoFs {
            accessor,
            format,
            joliet,
            volume,
            sectors: RefCell::new(HashMap::new()),
            content_cache: RefCell::new(LruCache::new(
                NonZero::new(CONTENT_CACHE_ENTRIES).unwrap(),
            )),
            paths: RefCell::new(HashMap::new()),
        })
    }

    /// Walks sectors 16.. until the set terminator, keeping the first
    /// Primary descriptor and letting a Joliet Supplemental supersede it.
    fn walk_descriptor_chain(
        accessor: &SectorAccessor<R>,
    ) -> Result<(MasterVolumeDescriptor, bool)> {
        let mut active: Option<(MasterVolumeDescriptor, bool)> = None;
        let mut primary_seen = false;

        let mut sector = DESCRIPTOR_AREA_START;
        loop {
            let user = match accessor.read_user_data(sector) {
                Ok(user) => user,
                Err(IsoError::SectorOutOfRange(_)) => {
                    // ran off the image without a terminator
                    return Err(IsoError::MissingPrimaryDescriptor);
                }
                Err(err) => return Err(err),
            };

            match volume::decode(&user, sector)? {
                VolumeDescriptor::Terminator => break,
                VolumeDescriptor::Primary(body) => {
                    primary_seen = true;
                    if active.is_none() {
                        active = Some((body, false));
                    }
                }
                VolumeDescriptor::Supplemental(body) => {
                    if body.joliet_level.is_some() {
                        debug!(
                            "supplemental descriptor at sector {sector} supersedes the active one"
                        );
                        active = Some((body, true));
                    }
                }
                VolumeDescriptor::BootRecord
                | VolumeDescriptor::Partition
                | VolumeDescriptor::Unrecognized(_) => {}
            }
            sector += 1;
        }

        match active {
            Some(active) if primary_seen => Ok(active),
            _ => Err(IsoError::MissingPrimaryDescriptor),
        }
    }

    pub fn format(&self) -> DiskFormat {
        self.format
    }

    /// Whether identifiers decode as UCS-2 (a Joliet Supplemental
    /// descriptor is active).
    pub fn is_joliet(&self) -> bool {
        self.joliet
    }

    pub fn geometry(&self) -> SectorGeometry {
        self.accessor.geometry()
    }

    /// The active volume descriptor.
    pub fn volume(&self) -> &MasterVolumeDescriptor {
        &self.volume
    }

    pub fn root(&self) -> &Rc<DataRecord> {
        &self.volume.root
    }

    fn logical_block_size(&self) -> u32 {
        self.volume.logical_block_size as u32
    }

    /// The logical sector owning a record's extent, memoized on the record
    /// and registered in the filesystem-wide sector cache. Two records
    /// landing on the same start sector share one instance; the conflict is
    /// logged, not fatal.
    fn logical_sector(&self, record: &Rc<DataRecord>) -> Rc<LogicalSector> {
        if let Some(sector) = record.extent_slot().borrow().as_ref() {
            return sector.clone();
        }

        let start = record.fields().location_of_extent;
        let sector = {
            let mut sectors = self.sectors.borrow_mut();
            match sectors.get(&start) {
                Some(existing) => {
                    let other_owner = existing
                        .owner()
                        .filter(|owner| !Rc::ptr_eq(owner, record));
                    if let Some(owner) = other_owner {
                        warn!(
                            "sector {start} claimed by {:?} but already owned by {:?}; \
                             reusing the cached extent",
                            record.fully_qualified_identifier(),
                            owner.fully_qualified_identifier()
                        );
                    }
                    existing.clone()
                }
                None => {
                    let sector = Rc::new(LogicalSector::new(
                        start,
                        record.data_length(),
                        self.logical_block_size(),
                    ));
                    sector.set_owner(record);
                    sectors.insert(start, sector.clone());
                    sector
                }
            }
        };

        *record.extent_slot().borrow_mut() = Some(sector.clone());
        sector
    }

    fn extent_content(&self, sector: &Rc<LogicalSector>) -> Result<Rc<[u8]>> {
        if let Some(content) = self.content_cache.borrow_mut().get(&sector.start_sector) {
            return Ok(content.clone());
        }

        let content: Rc<[u8]> = sector
            .assemble(&self.accessor, self.logical_block_size())?
            .into();
        if sector.byte_length <= CONTENT_RETAIN_LIMIT {
            self.content_cache
                .borrow_mut()
                .put(sector.start_sector, content.clone());
        }
        Ok(content)
    }

    /// Reads a record's whole extent. Multi-extent records are not
    /// supported: the read is logged and yields empty content so callers
    /// can tell "unsupported" from a hard failure.
    pub fn read_content(&self, record: &Rc<DataRecord>) -> Result<Rc<[u8]>> {
        if record.fields().multi_extent {
            warn!(
                "multi-extent records are not supported yet; {:?} reads as empty",
                record.fully_qualified_identifier()
            );
            return Ok(Vec::new().into());
        }
        let sector = self.logical_sector(record);
        self.extent_content(&sector)
    }

    /// Streams a record's extent one logical block at a time.
    pub fn content_chunks(&self, record: &Rc<DataRecord>) -> ContentChunks<'_, R> {
        if record.fields().multi_extent {
            warn!(
                "multi-extent records are not supported yet; {:?} streams as empty",
                record.fully_qualified_identifier()
            );
            return ContentChunks::empty(&self.accessor, self.logical_block_size());
        }
        ContentChunks::new(
            &self.accessor,
            record.fields().location_of_extent,
            record.data_length(),
            self.logical_block_size(),
        )
    }

    /// Parses a directory's extent into child records, cached after the
    /// first enumeration. The `.` and `..` bootstrap entries are consumed
    /// but never exposed. Non-directories enumerate as empty.
    pub fn children(&self, record: &Rc<DataRecord>) -> Result<Vec<Rc<DataRecord>>> {
        if !record.is_directory() {
            return Ok(Vec::new());
        }
        if record.fields().multi_extent {
            warn!(
                "multi-extent directory {:?} cannot be enumerated",
                record.fully_qualified_identifier()
            );
            return Ok(Vec::new());
        }

        let sector = self.logical_sector(record);
        if let Some(children) = sector.cached_children() {
            return Ok(children);
        }

        let content = self.extent_content(&sector)?;
        let children = self.parse_directory(&content, record);
        sector.cache_children(children.clone());
        Ok(children)
    }

    /// Walks a directory extent's length-prefixed records. A zero length
    /// byte is block padding, not end-of-listing; the walk ends exactly at
    /// the end of the content.
    fn parse_directory(
        &self,
        content: &[u8],
        parent: &Rc<DataRecord>,
    ) -> Vec<Rc<DataRecord>> {
        let mut children = Vec::new();
        let mut pos = 0usize;
        while pos < content.len() {
            let stored_length = content[pos] as usize;
            if stored_length == 0 {
                pos += 1;
                continue;
            }
            let length = stored_length - 1;
            if pos + 1 + length > content.len() {
                warn!(
                    "directory {:?}: record at offset {pos} overruns the extent",
                    parent.fully_qualified_identifier()
                );
                break;
            }
            let data = &content[pos + 1..pos + 1 + length];
            match record::decode(data, Some(parent), self.joliet, self.logical_block_size()) {
                Some(child) => {
                    if child.identifier() != "." && child.identifier() != ".." {
                        children.push(child);
                    }
                }
                None => {
                    warn!(
                        "directory {:?}: undecodable record at offset {pos}",
                        parent.fully_qualified_identifier()
                    );
                    break;
                }
            }
            pos += 1 + length;
        }
        children
    }

    /// Exact-identifier lookup among a directory's children.
    pub fn child(&self, directory: &Rc<DataRecord>, name: &str) -> Result<Option<Rc<DataRecord>>> {
        Ok(self
            .children(directory)?
            .into_iter()
            .find(|child| child.identifier() == name))
    }

    /// Resolves an absolute path to a record. Paths must carry a leading
    /// `/`; relative input is the caller's problem and resolves to `None`.
    /// `/` alone is the root. Results, including negatives, are cached for
    /// the filesystem's lifetime.
    pub fn resolve(&self, path: &str) -> Result<Option<Rc<DataRecord>>> {
        let Some(rest) = path.strip_prefix('/') else {
            debug!("rejecting path without a leading separator: {path:?}");
            return Ok(None);
        };

        if let Some(cached) = self.paths.borrow().get(path) {
            return Ok(cached.clone());
        }

        let result = self.walk_path(rest)?;
        self.paths
            .borrow_mut()
            .insert(path.to_string(), result.clone());
        Ok(result)
    }

    fn walk_path(&self, rest: &str) -> Result<Option<Rc<DataRecord>>> {
        if rest.is_empty() {
            return Ok(Some(self.root().clone()));
        }

        let mut current = self.root().clone();
        for segment in rest.split('/') {
            if !current.is_directory() {
                return Ok(None);
            }
            match self.child(&current, segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}
