//! On-disk format and sector-geometry detection.
//!
//! Nothing in an image states its own geometry, so it has to be inferred:
//! sector 16 is probed as a 2048-byte logical sector first and as a
//! 2352-byte raw sector second, looking for the ISO-9660 standard identifier
//! (or a UDF structure identifier, which is recognized only to be rejected).

use std::io::{Read, Seek};

use log::debug;

use crate::sector::{SectorAccessor, SectorGeometry};

/// ECMA-119 8.1.2 standard identifier, bytes 1..6 of every descriptor.
pub(crate) const ISO_MAGIC: &[u8; 5] = b"CD001";

/// ECMA-167 volume structure identifiers, same offset within the sector.
const UDF_MAGICS: [&[u8; 5]; 4] = [b"BEA01", b"NSR02", b"NSR03", b"TEA01"];

/// First sector of the volume descriptor set; everything before it is the
/// system area, ECMA-119 6.2.1.
pub(crate) const DESCRIPTOR_AREA_START: u32 = 16;

/// The filesystem family found on the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    /// No recognizable signature under either geometry.
    Unknown,
    /// A standard CD-ROM filesystem.
    Iso9660,
    /// Universal Disk Format; detected but unsupported.
    Udf,
}

/// Probes sector 16 under the accessor's current geometry.
fn probe<R: Read + Seek>(accessor: &SectorAccessor<R>) -> DiskFormat {
    let user = match accessor.read_user_data(DESCRIPTOR_AREA_START) {
        Ok(user) => user,
        Err(err) => {
            debug!("probe of sector 16 failed: {err}");
            return DiskFormat::Unknown;
        }
    };
    if user.len() < 6 {
        return DiskFormat::Unknown;
    }

    let magic = &user[1..6];
    if magic == ISO_MAGIC {
        return DiskFormat::Iso9660;
    }
    if UDF_MAGICS.iter().any(|m| magic == m.as_slice()) {
        return DiskFormat::Udf;
    }
    DiskFormat::Unknown
}

/// Runs detection once at open, leaving the accessor configured with the
/// geometry that matched (or raw geometry if neither did).
pub(crate) fn detect<R: Read + Seek>(accessor: &mut SectorAccessor<R>) -> DiskFormat {
    accessor.set_geometry(SectorGeometry::LOGICAL);
    let format = probe(accessor);
    if format != DiskFormat::Unknown {
        debug!("detected {format:?} under logical geometry");
        return format;
    }

    accessor.set_geometry(SectorGeometry::RAW);
    let format = probe(accessor);
    debug!("detected {format:?} under raw geometry");
    format
}
