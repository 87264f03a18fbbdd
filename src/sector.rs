//! Physical sector access.
//!
//! An image is addressed as a run of fixed-size physical sectors. Logical
//! images carry the 2048-byte user data directly; raw disc dumps prepend a
//! 24-byte sync/header to each 2352-byte sector, with error-correction bytes
//! trailing the user data. This layer does bounds-checked reads only; all
//! caching happens above it.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};

use log::debug;
use static_assertions::const_assert;

use crate::error::{IsoError, Result};

/// The user-data payload carried by every sector, ECMA-119 6.1.2.
pub const USER_DATA_SIZE: usize = 2048;
/// Physical sector size of a logical-mode image.
pub const LOGICAL_SECTOR_SIZE: usize = 2048;
/// Physical sector size of a raw-mode disc dump (CD-ROM mode 2).
pub const RAW_SECTOR_SIZE: usize = 2352;
/// Sync pattern + header + subheader preceding user data in a raw sector.
pub const RAW_HEADER_SIZE: usize = 24;

const_assert!(RAW_HEADER_SIZE + USER_DATA_SIZE <= RAW_SECTOR_SIZE);
const_assert!(LOGICAL_SECTOR_SIZE == USER_DATA_SIZE);

/// How physical sectors are laid out in the backing image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorGeometry {
    /// Bytes to discard at the start of each physical sector.
    pub header_size: usize,
    /// Size of one physical sector in the image.
    pub sector_size: usize,
}

impl SectorGeometry {
    pub const LOGICAL: SectorGeometry = SectorGeometry {
        header_size: 0,
        sector_size: LOGICAL_SECTOR_SIZE,
    };
    pub const RAW: SectorGeometry = SectorGeometry {
        header_size: RAW_HEADER_SIZE,
        sector_size: RAW_SECTOR_SIZE,
    };

    pub fn is_raw(&self) -> bool {
        self.header_size != 0
    }
}

/// One physical sector's raw bytes. Transient: callers extract what they
/// need and drop it.
pub struct PhysicalSector {
    pub index: u32,
    data: Vec<u8>,
}

impl PhysicalSector {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The logical-block payload: everything after the sector header,
    /// truncated to one logical block.
    pub fn user_data(&self, geometry: SectorGeometry) -> &[u8] {
        let start = geometry.header_size;
        let end = (start + USER_DATA_SIZE).min(self.data.len());
        &self.data[start..end]
    }
}

/// Random-access reads against the backing byte source.
pub struct SectorAccessor<R: Read + Seek> {
    source: RefCell<R>,
    total_size: u64,
    geometry: SectorGeometry,
}

impl<R: Read + Seek> SectorAccessor<R> {
    /// Wraps a byte source, measuring its total size once.
    pub fn new(mut source: R, geometry: SectorGeometry) -> Result<Self> {
        let total_size = source.seek(SeekFrom::End(0))?;
        Ok(Self {
            source: RefCell::new(source),
            total_size,
            geometry,
        })
    }

    pub fn geometry(&self) -> SectorGeometry {
        self.geometry
    }

    /// Reconfigures the sector layout; done once, by format detection.
    pub(crate) fn set_geometry(&mut self, geometry: SectorGeometry) {
        debug!(
            "sector geometry set to header={} size={}",
            geometry.header_size, geometry.sector_size
        );
        self.geometry = geometry;
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Reads one whole physical sector, bounds-checked against the image.
    pub fn read_sector(&self, index: u32) -> Result<PhysicalSector> {
        let sector_size = self.geometry.sector_size as u64;
        let offset = index as u64 * sector_size;
        if offset + sector_size > self.total_size {
            return Err(IsoError::SectorOutOfRange(index));
        }

        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; self.geometry.sector_size];
        source.read_exact(&mut data)?;
        Ok(PhysicalSector { index, data })
    }

    /// Reads a sector and returns only its logical-block payload.
    pub fn read_user_data(&self, index: u32) -> Result<Vec<u8>> {
        let sector = self.read_sector(index)?;
        Ok(sector.user_data(self.geometry).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn logical_read_returns_whole_sector() {
        let mut data = vec![0u8; LOGICAL_SECTOR_SIZE * 3];
        data[LOGICAL_SECTOR_SIZE] = 0xAB;
        let accessor = SectorAccessor::new(Cursor::new(data), SectorGeometry::LOGICAL).unwrap();
        let user = accessor.read_user_data(1).unwrap();
        assert_eq!(user.len(), USER_DATA_SIZE);
        assert_eq!(user[0], 0xAB);
    }

    #[test]
    fn raw_read_skips_header() {
        let mut data = vec![0u8; RAW_SECTOR_SIZE * 2];
        data[RAW_SECTOR_SIZE + RAW_HEADER_SIZE] = 0xCD;
        let accessor = SectorAccessor::new(Cursor::new(data), SectorGeometry::RAW).unwrap();
        let user = accessor.read_user_data(1).unwrap();
        assert_eq!(user.len(), USER_DATA_SIZE);
        assert_eq!(user[0], 0xCD);
    }

    #[test]
    fn out_of_range_sector_is_rejected() {
        let data = vec![0u8; LOGICAL_SECTOR_SIZE * 2];
        let accessor = SectorAccessor::new(Cursor::new(data), SectorGeometry::LOGICAL).unwrap();
        assert!(matches!(
            accessor.read_sector(2),
            Err(IsoError::SectorOutOfRange(2))
        ));
        // a partial trailing sector is also out of range
        let data = vec![0u8; LOGICAL_SECTOR_SIZE + 100];
        let accessor = SectorAccessor::new(Cursor::new(data), SectorGeometry::LOGICAL).unwrap();
        assert!(accessor.read_sector(1).is_err());
    }
}
