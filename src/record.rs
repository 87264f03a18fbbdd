//! Directory records, the nodes of the filesystem tree.
//!
//! ECMA-119 9.1 lays a directory out as a run of length-prefixed records,
//! each naming an extent (start block + byte length), flags and an
//! identifier. Records form a tagged sum: plain files, directories, and the
//! rarely-seen extended attribute records synthesized from a nonzero EAR
//! length field.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::debug;

use crate::bytes::FieldReader;
use crate::extent::LogicalSector;

/// Bit 1 of the file flags byte, ECMA-119 9.1.6: record is a directory.
const FLAG_DIRECTORY: u8 = 0x02;
/// Bit 5: the record's data continues in a further extent.
const FLAG_MULTI_EXTENT: u8 = 0x20;

/// One directory entry. `File` and `Directory` come straight off the disk;
/// `ExtendedAttribute` is synthesized for the metadata block that precedes
/// an extent when the EAR length field is nonzero.
pub enum DataRecord {
    File(RecordFields),
    Directory(RecordFields),
    ExtendedAttribute(RecordFields),
}

#[derive(Clone, Copy)]
enum RecordKind {
    File,
    Directory,
    ExtendedAttribute,
}

/// The fields shared by every record variant.
pub struct RecordFields {
    /// First logical block of this record's data, ECMA-119 9.1.3.
    pub location_of_extent: u32,
    /// Byte length of the data; spans multiple blocks when it exceeds the
    /// volume's logical block size.
    pub data_length: u32,
    /// The record's data continues in further extents (unsupported; reads
    /// of such records yield empty content).
    pub multi_extent: bool,
    /// File or directory name, version suffix stripped.
    pub identifier: String,
    /// The integer after the last `;` of the stored identifier, 0 if none.
    pub record_version: u32,
    /// Root-relative path: parent's path + `/` + identifier. The root's is
    /// the empty string, so every child composes to `/NAME`.
    pub fully_qualified: String,
    /// The metadata block preceding the extent, when present.
    pub extended_attributes: Option<Rc<DataRecord>>,
    parent: Weak<DataRecord>,
    extent: RefCell<Option<Rc<LogicalSector>>>,
}

impl DataRecord {
    pub fn fields(&self) -> &RecordFields {
        match self {
            DataRecord::File(f) | DataRecord::Directory(f) | DataRecord::ExtendedAttribute(f) => f,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, DataRecord::Directory(_))
    }

    pub fn identifier(&self) -> &str {
        &self.fields().identifier
    }

    pub fn fully_qualified_identifier(&self) -> &str {
        &self.fields().fully_qualified
    }

    pub fn data_length(&self) -> u32 {
        self.fields().data_length
    }

    pub fn record_version(&self) -> u32 {
        self.fields().record_version
    }

    /// The directory this record was listed in; `None` only for the root.
    pub fn containing_directory(&self) -> Option<Rc<DataRecord>> {
        self.fields().parent.upgrade()
    }

    /// Memoization slot for the record's owning logical sector.
    pub(crate) fn extent_slot(&self) -> &RefCell<Option<Rc<LogicalSector>>> {
        &self.fields().extent
    }

    /// Builds a directory node directly, used for the root and for the
    /// synthetic path table record embedded in a volume descriptor.
    pub(crate) fn directory(
        location_of_extent: u32,
        data_length: u32,
        identifier: &str,
        parent: Option<&Rc<DataRecord>>,
    ) -> Rc<DataRecord> {
        build(
            RecordKind::Directory,
            location_of_extent,
            data_length,
            false,
            identifier.to_string(),
            0,
            parent,
            None,
        )
    }

    pub(crate) fn file(
        location_of_extent: u32,
        data_length: u32,
        identifier: &str,
        parent: Option<&Rc<DataRecord>>,
    ) -> Rc<DataRecord> {
        build(
            RecordKind::File,
            location_of_extent,
            data_length,
            false,
            identifier.to_string(),
            0,
            parent,
            None,
        )
    }
}

/// Decodes one record from its length-delimited content (the bytes after
/// the leading length byte). Returns `None` if the slice is truncated.
pub(crate) fn decode(
    data: &[u8],
    parent: Option<&Rc<DataRecord>>,
    joliet: bool,
    logical_block_size: u32,
) -> Option<Rc<DataRecord>> {
    let mut r = FieldReader::new(data);

    let ea_length = r.u8()?;
    let location_of_extent = r.u32_both()?;
    let data_length = r.u32_both()?;
    // recording timestamp, not retained
    r.skip(7)?;
    let flags = r.u8()?;
    // interleave unit size and gap
    r.skip(2)?;
    // volume sequence number, both-endian
    r.skip(4)?;

    let id_length = r.u8()? as usize;
    let raw_id = r.take(id_length)?;
    let (identifier, record_version) = split_version(decode_identifier(raw_id, joliet));
    if r.remaining() > 0 {
        // padding or system-use data (e.g. Rock Ridge), not interpreted
        debug!("record {identifier:?}: {} trailing bytes ignored", r.remaining());
    }

    let ear = if ea_length > 0 {
        let ear_blocks = (ea_length as u32).div_ceil(logical_block_size);
        Some(build(
            RecordKind::ExtendedAttribute,
            location_of_extent.saturating_sub(ear_blocks),
            ea_length as u32,
            false,
            format!("{identifier}-EAR"),
            0,
            parent,
            None,
        ))
    } else {
        None
    };

    let kind = if flags & FLAG_DIRECTORY != 0 {
        RecordKind::Directory
    } else {
        RecordKind::File
    };
    let record = build(
        kind,
        location_of_extent,
        data_length,
        flags & FLAG_MULTI_EXTENT != 0,
        identifier,
        record_version,
        parent,
        ear,
    );
    debug!(
        "decoded record {:?} at block {} length {}",
        record.identifier(),
        location_of_extent,
        data_length
    );
    Some(record)
}

/// ECMA-119 7.4 / Joliet: identifiers are ASCII, or UCS-2 big-endian on a
/// Joliet volume; the single bytes 0x00 and 0x01 encode the self and parent
/// bootstrap entries.
fn decode_identifier(raw: &[u8], joliet: bool) -> String {
    if raw.len() == 1 {
        match raw[0] {
            0x00 => return ".".to_string(),
            0x01 => return "..".to_string(),
            _ => {}
        }
    }

    if joliet {
        let units = raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

/// Strips the `;N` version suffix, ECMA-119 7.5.1. Entries without one
/// (directories, bootstrap names) keep version 0.
fn split_version(identifier: String) -> (String, u32) {
    match identifier.rfind(';') {
        Some(semi) => {
            let version = identifier[semi + 1..].parse().unwrap_or(0);
            (identifier[..semi].to_string(), version)
        }
        None => (identifier, 0),
    }
}

#[allow(clippy::too_many_arguments)]
fn build(
    kind: RecordKind,
    location_of_extent: u32,
    data_length: u32,
    multi_extent: bool,
    identifier: String,
    record_version: u32,
    parent: Option<&Rc<DataRecord>>,
    extended_attributes: Option<Rc<DataRecord>>,
) -> Rc<DataRecord> {
    let fully_qualified = match parent {
        None => identifier.clone(),
        Some(p) => format!("{}/{}", p.fully_qualified_identifier(), identifier),
    };

    let fields = RecordFields {
        location_of_extent,
        data_length,
        multi_extent,
        identifier,
        record_version,
        fully_qualified,
        extended_attributes,
        parent: parent.map(Rc::downgrade).unwrap_or_default(),
        extent: RefCell::new(None),
    };

    Rc::new(match kind {
        RecordKind::File => DataRecord::File(fields),
        RecordKind::Directory => DataRecord::Directory(fields),
        RecordKind::ExtendedAttribute => DataRecord::ExtendedAttribute(fields),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encodes a directory record's content (without the length byte).
    pub(crate) fn encode_record(
        ea_length: u8,
        extent: u32,
        data_length: u32,
        flags: u8,
        identifier: &[u8],
    ) -> Vec<u8> {
        let mut out = vec![ea_length];
        out.extend_from_slice(&extent.to_le_bytes());
        out.extend_from_slice(&extent.to_be_bytes());
        out.extend_from_slice(&data_length.to_le_bytes());
        out.extend_from_slice(&data_length.to_be_bytes());
        out.extend_from_slice(&[0u8; 7]);
        out.push(flags);
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&[1, 0, 0, 1]);
        out.push(identifier.len() as u8);
        out.extend_from_slice(identifier);
        out
    }

    #[test]
    fn file_record_with_version_suffix() {
        let data = encode_record(0, 20, 10, 0, b"README.TXT;1");
        let rec = decode(&data, None, false, 2048).unwrap();
        assert!(!rec.is_directory());
        assert_eq!(rec.identifier(), "README.TXT");
        assert_eq!(rec.record_version(), 1);
        assert_eq!(rec.data_length(), 10);
        assert_eq!(rec.fields().location_of_extent, 20);
    }

    #[test]
    fn directory_flag_selects_directory_variant() {
        let data = encode_record(0, 19, 2048, 0x02, b"SOUNDS");
        let rec = decode(&data, None, false, 2048).unwrap();
        assert!(rec.is_directory());
        assert_eq!(rec.record_version(), 0);
    }

    #[test]
    fn bootstrap_identifiers() {
        let this = decode(&encode_record(0, 19, 2048, 0x02, &[0x00]), None, false, 2048).unwrap();
        assert_eq!(this.identifier(), ".");
        let up = decode(&encode_record(0, 19, 2048, 0x02, &[0x01]), None, false, 2048).unwrap();
        assert_eq!(up.identifier(), "..");
    }

    #[test]
    fn joliet_identifier_is_utf16be() {
        let name: Vec<u8> = "LONG NAME.DAT;1"
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect();
        let rec = decode(&encode_record(0, 30, 5, 0, &name), None, true, 2048).unwrap();
        assert_eq!(rec.identifier(), "LONG NAME.DAT");
        assert_eq!(rec.record_version(), 1);
    }

    #[test]
    fn fully_qualified_identifier_composes_from_parent() {
        let root = DataRecord::directory(18, 2048, "", None);
        let dir = decode(&encode_record(0, 19, 2048, 0x02, b"SOUNDS"), Some(&root), false, 2048)
            .unwrap();
        assert_eq!(dir.fully_qualified_identifier(), "/SOUNDS");
        let file =
            decode(&encode_record(0, 20, 44, 0, b"YAY.WAV;1"), Some(&dir), false, 2048).unwrap();
        assert_eq!(file.fully_qualified_identifier(), "/SOUNDS/YAY.WAV");
        assert!(Rc::ptr_eq(&file.containing_directory().unwrap(), &dir));
        assert!(root.containing_directory().is_none());
    }

    #[test]
    fn identifier_and_version_rebuild_the_stored_name() {
        let stored = "README.TXT;1";
        let rec = decode(&encode_record(0, 20, 10, 0, stored.as_bytes()), None, false, 2048)
            .unwrap();
        let last = rec.fully_qualified_identifier().rsplit('/').next().unwrap();
        let rebuilt = format!("{};{}", last, rec.record_version());
        assert_eq!(rebuilt, stored);
    }

    #[test]
    fn nonzero_ea_length_synthesizes_a_preceding_record() {
        let data = encode_record(100, 20, 10, 0, b"DATA.BIN;1");
        let rec = decode(&data, None, false, 2048).unwrap();
        let ear = rec.fields().extended_attributes.as_ref().unwrap();
        assert!(matches!(**ear, DataRecord::ExtendedAttribute(_)));
        assert_eq!(ear.fields().location_of_extent, 19);
        assert_eq!(ear.data_length(), 100);
        assert_eq!(ear.identifier(), "DATA.BIN-EAR");
    }

    #[test]
    fn truncated_record_is_rejected() {
        let data = encode_record(0, 20, 10, 0, b"README.TXT;1");
        assert!(decode(&data[..20], None, false, 2048).is_none());
    }

    #[test]
    fn multi_extent_flag_is_carried() {
        let data = encode_record(0, 20, 10, FLAG_MULTI_EXTENT, b"BIG.BIN;1");
        let rec = decode(&data, None, false, 2048).unwrap();
        assert!(rec.fields().multi_extent);
    }
}
