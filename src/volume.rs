//! Volume descriptors, ECMA-119 8.
//!
//! The descriptor set starts at sector 16 and runs until a set terminator.
//! Primary and Supplemental descriptors share one body layout; a
//! Supplemental descriptor is only honored when its escape-sequence field
//! names a Joliet level, otherwise it is discarded as unrecognized.

use std::fmt::{self, Debug};
use std::rc::Rc;

use log::debug;

use crate::bytes::{ascii_trimmed, FieldReader};
use crate::error::{IsoError, Result};
use crate::format::ISO_MAGIC;
use crate::record::DataRecord;

/// Descriptor type byte, ECMA-119 8.1.1.
const TYPE_BOOT_RECORD: u8 = 0;
const TYPE_PRIMARY: u8 = 1;
const TYPE_SUPPLEMENTAL: u8 = 2;
const TYPE_PARTITION: u8 = 3;
const TYPE_TERMINATOR: u8 = 255;

/// One entry of the volume descriptor set.
pub enum VolumeDescriptor {
    BootRecord,
    Primary(MasterVolumeDescriptor),
    Supplemental(MasterVolumeDescriptor),
    Partition,
    Terminator,
    /// Any other type byte, or a Supplemental descriptor without a
    /// recognizable Joliet escape. Carries only the type tag.
    Unrecognized(u8),
}

/// The body shared by Primary and Supplemental descriptors,
/// ECMA-119 8.4 / 8.5.
pub struct MasterVolumeDescriptor {
    pub version: u8,
    /// Intended target system, trimmed fixed-width ASCII.
    pub system_id: String,
    /// The volume's friendly name.
    pub volume_id: String,
    /// Total logical blocks on the volume.
    pub logical_block_count: u32,
    /// Addressable unit of the filesystem, almost always 2048.
    pub logical_block_size: u16,
    /// Volumes in this volume set; nearly always 1.
    pub volume_set_size: u16,
    /// This volume's position in the set; nearly always 1.
    pub volume_sequence_number: u16,
    /// Byte length of the type-L path table.
    pub path_table_size: u32,
    /// The root directory, decoded from the embedded root record.
    pub root: Rc<DataRecord>,
    /// Synthetic record covering the type-L path table. Parsed, exposed,
    /// never traversed: lookups always walk the directory tree.
    pub path_table: Rc<DataRecord>,
    /// Joliet escape level (1-3); `Some` only on Supplemental descriptors.
    pub joliet_level: Option<u8>,
    pub volume_set_id: String,
    pub publisher_id: String,
    pub preparer_id: String,
    pub application_id: String,
    pub copyright_file_id: String,
    pub abstract_file_id: String,
    pub bibliographic_file_id: String,
}

/// ECMA-119 8.4.26.1 / Joliet 4.2: the escape sequences that flag UCS-2
/// identifier encoding.
fn joliet_level(escapes: &str) -> Option<u8> {
    match escapes {
        "%/@" => Some(1),
        "%/C" => Some(2),
        "%/E" => Some(3),
        _ => None,
    }
}

/// ECMA-119 8.4.26.1 digit-string date: 16 ASCII digits plus a 15-minute
/// GMT offset. Decoded positionally and then dropped; the engine keeps no
/// timestamps.
pub struct VolumeTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub gmt_offset: i8,
}

impl VolumeTimestamp {
    pub fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 17 {
            return None;
        }
        let digits = |range: std::ops::Range<usize>| -> u16 {
            bytes[range]
                .iter()
                .filter(|b| b.is_ascii_digit())
                .fold(0u16, |acc, &b| acc * 10 + (b - b'0') as u16)
        };
        Some(Self {
            year: digits(0..4),
            month: digits(4..6) as u8,
            day: digits(6..8) as u8,
            hour: digits(8..10) as u8,
            minute: digits(10..12) as u8,
            second: digits(12..14) as u8,
            centiseconds: digits(14..16) as u8,
            gmt_offset: bytes[16] as i8,
        })
    }
}

impl Debug for VolumeTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Decodes one descriptor from a sector's user data. Descriptors decode
/// whole or not at all; a truncated or mis-tagged sector is
/// [`IsoError::MalformedDescriptor`].
pub(crate) fn decode(user_data: &[u8], sector: u32) -> Result<VolumeDescriptor> {
    if user_data.len() < 7 || &user_data[1..6] != ISO_MAGIC {
        return Err(IsoError::MalformedDescriptor(sector));
    }

    let descriptor_type = user_data[0];
    let version = user_data[6];
    debug!("descriptor type {descriptor_type} version {version} at sector {sector}");

    match descriptor_type {
        TYPE_TERMINATOR => return Ok(VolumeDescriptor::Terminator),
        TYPE_BOOT_RECORD => return Ok(VolumeDescriptor::BootRecord),
        TYPE_PARTITION => return Ok(VolumeDescriptor::Partition),
        TYPE_PRIMARY | TYPE_SUPPLEMENTAL => {}
        other => return Ok(VolumeDescriptor::Unrecognized(other)),
    }

    let mut r = FieldReader::new(&user_data[7..]);
    let body = (|| -> Option<VolumeDescriptor> {
        // reserved, should be 0x00
        r.skip(1)?;
        let system_id = ascii_trimmed(r.take(32)?);
        let volume_id = ascii_trimmed(r.take(32)?);
        r.skip(8)?;
        let logical_block_count = r.u32_both()?;

        let escapes = ascii_trimmed(r.take(32)?);
        let joliet = if descriptor_type == TYPE_SUPPLEMENTAL {
            match joliet_level(&escapes) {
                Some(level) => {
                    debug!("joliet level {level}");
                    Some(level)
                }
                None => {
                    debug!("supplemental descriptor with unrecognized escapes {escapes:?}");
                    return Some(VolumeDescriptor::Unrecognized(TYPE_SUPPLEMENTAL));
                }
            }
        } else {
            None
        };

        let volume_set_size = r.u16_both()?;
        let volume_sequence_number = r.u16_both()?;
        let logical_block_size = r.u16_both()?;
        let path_table_size = r.u32_both()?;
        let path_table_location = r.u32_le()?;
        // optional type-L copy
        r.u32_le()?;
        // type-M path table locations, big-endian, unused
        r.skip(8)?;

        // the embedded root directory record: length byte counts itself
        let root_length = (r.u8()? as usize).checked_sub(1)?;
        let root_bytes = r.take(root_length)?;
        let mut root_reader = FieldReader::new(root_bytes);
        root_reader.skip(1)?;
        let root_extent = root_reader.u32_both()?;
        let root_data_length = root_reader.u32_both()?;
        let root = DataRecord::directory(root_extent, root_data_length, "", None);

        let volume_set_id = ascii_trimmed(r.take(128)?);
        let publisher_id = ascii_trimmed(r.take(128)?);
        let preparer_id = ascii_trimmed(r.take(128)?);
        let application_id = ascii_trimmed(r.take(128)?);
        let copyright_file_id = ascii_trimmed(r.take(37)?);
        let abstract_file_id = ascii_trimmed(r.take(37)?);
        let bibliographic_file_id = ascii_trimmed(r.take(37)?);

        let created = VolumeTimestamp::read(r.take(17)?)?;
        let modified = VolumeTimestamp::read(r.take(17)?)?;
        let _expires = VolumeTimestamp::read(r.take(17)?)?;
        let _effective = VolumeTimestamp::read(r.take(17)?)?;
        debug!("volume created {created:?}, modified {modified:?}");

        // file structure version + trailing reserved byte
        r.skip(2)?;

        let path_table =
            DataRecord::file(path_table_location, path_table_size, "PathTable", None);

        let body = MasterVolumeDescriptor {
            version,
            system_id,
            volume_id,
            logical_block_count,
            logical_block_size,
            volume_set_size,
            volume_sequence_number,
            path_table_size,
            root,
            path_table,
            joliet_level: joliet,
            volume_set_id,
            publisher_id,
            preparer_id,
            application_id,
            copyright_file_id,
            abstract_file_id,
            bibliographic_file_id,
        };
        Some(if descriptor_type == TYPE_PRIMARY {
            VolumeDescriptor::Primary(body)
        } else {
            VolumeDescriptor::Supplemental(body)
        })
    })();

    body.ok_or(IsoError::MalformedDescriptor(sector))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sector::USER_DATA_SIZE;

    /// Encodes a complete Primary or Supplemental descriptor sector.
    pub(crate) fn encode_descriptor(
        descriptor_type: u8,
        volume_id: &str,
        escapes: &[u8],
        root_extent: u32,
        root_data_length: u32,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(USER_DATA_SIZE);
        out.push(descriptor_type);
        out.extend_from_slice(b"CD001");
        out.push(1); // version
        out.push(0); // reserved
        out.extend_from_slice(&pad_ascii(b"TESTSYS", 32));
        out.extend_from_slice(&pad_ascii(volume_id.as_bytes(), 32));
        out.extend_from_slice(&[0u8; 8]);
        let block_count: u32 = 40;
        out.extend_from_slice(&block_count.to_le_bytes());
        out.extend_from_slice(&block_count.to_be_bytes());
        out.extend_from_slice(&pad_ascii(escapes, 32));
        for value in [1u16, 1, 2048] {
            out.extend_from_slice(&value.to_le_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        }
        let path_table_size: u32 = 10;
        out.extend_from_slice(&path_table_size.to_le_bytes());
        out.extend_from_slice(&path_table_size.to_be_bytes());
        out.extend_from_slice(&19u32.to_le_bytes()); // type-L location
        out.extend_from_slice(&0u32.to_le_bytes()); // optional copy
        out.extend_from_slice(&[0u8; 8]); // type-M
        let root = crate::record::tests::encode_record(0, root_extent, root_data_length, 0x02, &[0]);
        out.push((root.len() + 1) as u8);
        out.extend_from_slice(&root);
        for width in [128usize, 128, 128, 128, 37, 37, 37] {
            out.extend_from_slice(&pad_ascii(b"", width));
        }
        for _ in 0..4 {
            out.extend_from_slice(b"2024010112000000");
            out.push(0);
        }
        out.extend_from_slice(&[1, 0]);
        out.resize(USER_DATA_SIZE, 0);
        out
    }

    fn pad_ascii(s: &[u8], width: usize) -> Vec<u8> {
        let mut v = s.to_vec();
        v.resize(width, b' ');
        v
    }

    #[test]
    fn primary_descriptor_round_trip() {
        let sector = encode_descriptor(1, "TESTVOL", b"", 18, 2048);
        let descriptor = decode(&sector, 16).unwrap();
        let VolumeDescriptor::Primary(body) = descriptor else {
            panic!("expected a primary descriptor");
        };
        assert_eq!(body.volume_id, "TESTVOL");
        assert_eq!(body.system_id, "TESTSYS");
        assert_eq!(body.logical_block_count, 40);
        assert_eq!(body.logical_block_size, 2048);
        assert_eq!(body.volume_set_size, 1);
        assert_eq!(body.path_table_size, 10);
        assert_eq!(body.root.fields().location_of_extent, 18);
        assert_eq!(body.root.data_length(), 2048);
        assert!(body.root.is_directory());
        assert_eq!(body.path_table.identifier(), "PathTable");
        assert!(body.joliet_level.is_none());
    }

    #[test]
    fn supplemental_descriptor_requires_joliet_escape() {
        let sector = encode_descriptor(2, "JVOL", b"%/E", 18, 2048);
        match decode(&sector, 17).unwrap() {
            VolumeDescriptor::Supplemental(body) => assert_eq!(body.joliet_level, Some(3)),
            _ => panic!("expected a supplemental descriptor"),
        }

        let sector = encode_descriptor(2, "JVOL", b"%/Z", 18, 2048);
        assert!(matches!(
            decode(&sector, 17).unwrap(),
            VolumeDescriptor::Unrecognized(2)
        ));
    }

    #[test]
    fn terminator_and_minor_types() {
        let mut sector = encode_descriptor(1, "X", b"", 18, 2048);
        sector[0] = 255;
        assert!(matches!(decode(&sector, 18).unwrap(), VolumeDescriptor::Terminator));
        sector[0] = 0;
        assert!(matches!(decode(&sector, 18).unwrap(), VolumeDescriptor::BootRecord));
        sector[0] = 3;
        assert!(matches!(decode(&sector, 18).unwrap(), VolumeDescriptor::Partition));
        sector[0] = 9;
        assert!(matches!(
            decode(&sector, 18).unwrap(),
            VolumeDescriptor::Unrecognized(9)
        ));
    }

    #[test]
    fn missing_magic_is_malformed() {
        let mut sector = encode_descriptor(1, "X", b"", 18, 2048);
        sector[3] = b'X';
        assert!(matches!(
            decode(&sector, 16),
            Err(IsoError::MalformedDescriptor(16))
        ));
    }

    #[test]
    fn truncated_descriptor_is_malformed() {
        let sector = encode_descriptor(1, "X", b"", 18, 2048);
        assert!(matches!(
            decode(&sector[..200], 16),
            Err(IsoError::MalformedDescriptor(16))
        ));
    }

    #[test]
    fn digit_timestamp_parses_positionally() {
        let ts = VolumeTimestamp::read(b"2024010112300500\x04").unwrap();
        assert_eq!(ts.year, 2024);
        assert_eq!(ts.month, 1);
        assert_eq!(ts.day, 1);
        assert_eq!(ts.hour, 12);
        assert_eq!(ts.minute, 30);
        assert_eq!(ts.second, 5);
        assert_eq!(ts.gmt_offset, 4);
    }
}
