//! ECMA-119 (ISO-9660) filesystem reader.
//!
//! Parses CD-ROM images — both 2048-byte logical images and 2352-byte raw
//! disc dumps with per-sector headers — directly from any `Read + Seek`
//! source, without materializing the image in memory. Joliet supplemental
//! volumes are honored for long UCS-2 filenames; UDF volumes are detected
//! and rejected.
//!
//! ```no_run
//! use std::fs::File;
//! use isoprobe::IsoFs;
//!
//! # fn main() -> isoprobe::Result<()> {
//! let fs = IsoFs::open(File::open("image.iso")?)?;
//! if let Some(record) = fs.resolve("/README.TXT")? {
//!     let content = fs.read_content(&record)?;
//!     println!("{} bytes", content.len());
//! }
//! # Ok(())
//! # }
//! ```

mod bytes;

pub mod error;
pub mod extent;
pub mod format;
pub mod fs;
pub mod record;
pub mod sector;
pub mod shell;
pub mod volume;

pub use error::{IsoError, Result};
pub use format::DiskFormat;
pub use fs::IsoFs;
pub use record::DataRecord;
