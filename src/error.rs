use std::io;

use thiserror::Error;

/// Failures surfaced by the filesystem engine.
///
/// Everything here is fatal for the operation that raised it; conditions the
/// engine recovers from on its own (absent paths, multi-extent reads,
/// extent-ownership conflicts) are reported as values or log lines instead.
#[derive(Error, Debug)]
pub enum IsoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no ISO-9660 signature found at sector 16 under either sector geometry")]
    UnrecognizedFormat,
    #[error("the image contains a UDF volume, which is not supported")]
    UnsupportedFormat,
    #[error("sector {0} lies beyond the end of the image")]
    SectorOutOfRange(u32),
    #[error("malformed volume descriptor at sector {0}")]
    MalformedDescriptor(u32),
    #[error("volume descriptor chain contains no primary descriptor")]
    MissingPrimaryDescriptor,
}

pub type Result<T> = std::result::Result<T, IsoError>;
