//! The RITE script container: a checksummed header followed by tagged
//! sections, one of which carries the tree of compiled code records.
//!
//! Container layout (big-endian):
//! - magic[4] = "RITE", format version[4] = "0003"
//! - u16 crc (over everything after this field, seed 0)
//! - u32 total size of the encoded container
//! - producer name[4] = "MATZ", producer version[4] = "0000"
//! - sections until end of input: tag[4], i32 size (includes these 8
//!   bytes), then either an opaque blob of size-8 bytes or, for "IREP"
//!   sections, a version[4] = "0000" followed by one record tree.
//!
//! Re-serialization regenerates every size field, the alignment padding and
//! the crc; a container rendered with its own extracted lines reproduces
//! the input byte for byte.

pub mod crc;
mod io;
pub mod record;
pub mod strings;

pub use crc::crc16;
pub use record::{Irep, PoolEntry, SymbolEntry};
pub use strings::{escape_line, unescape_line, LineCursor, CR_TOKEN, LF_TOKEN};

use io::{
    expect_tag, patch_i32, patch_u16, patch_u32, put_tag, read_bytes, read_i32, read_tag, read_u16,
    read_u32, reserve,
};

pub const RITE_MAGIC: &[u8; 4] = b"RITE";
pub const RITE_VERSION: &[u8; 4] = b"0003";
pub const PRODUCER_NAME: &[u8; 4] = b"MATZ";
pub const PRODUCER_VERSION: &[u8; 4] = b"0000";
pub const IREP_TAG: &[u8; 4] = b"IREP";
pub const IREP_VERSION: &[u8; 4] = b"0000";

/// First checksummed byte: everything after the crc field (magic + format
/// version + the u16 crc itself).
const CRC_RANGE_START: usize = 10;
const SECTION_HEADER_LEN: usize = 8;

fn tag_str(tag: &[u8]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

/// Errors produced while decoding or re-encoding a container.
#[derive(thiserror::Error, Debug)]
pub enum RiteError {
    #[error("unexpected {field}: expected {:?}, found {:?}", tag_str(*.expected), tag_str(.found))]
    BadMagic {
        field: &'static str,
        expected: &'static [u8; 4],
        found: [u8; 4],
    },

    #[error("section {:?} declares size {size}, below its own 8-byte header", tag_str(.tag))]
    BadSectionSize { tag: [u8; 4], size: i32 },

    #[error("unexpected end of input: need {need} more bytes at offset {at}, {have} available")]
    UnexpectedEof { at: usize, need: usize, have: usize },

    #[error("record tree nested deeper than {limit} levels")]
    TreeTooDeep { limit: usize },

    #[error("expected {expected} replacement lines, found {found}")]
    LineCountMismatch { expected: usize, found: usize },

    #[error("replacement lines exhausted after {consumed}")]
    LinesExhausted { consumed: usize },

    #[error("replacement line {index} encodes to {len} bytes, over the u16 limit")]
    LineTooLong { index: usize, len: usize },
}

/// One top-level chunk of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub tag: [u8; 4],
    pub payload: SectionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPayload {
    /// Opaque bytes, preserved verbatim (everything after the section
    /// header).
    Raw(Vec<u8>),
    /// The compiled record tree of an "IREP" section.
    Irep(Irep),
}

impl Section {
    fn read(bytes: &[u8], off: &mut usize) -> Result<Section, RiteError> {
        let tag = read_tag(bytes, off)?;
        let size = read_i32(bytes, off)?;
        let payload = if &tag == IREP_TAG {
            expect_tag(bytes, off, "record tree version", IREP_VERSION)?;
            SectionPayload::Irep(Irep::read(bytes, off, 0)?)
        } else {
            let body = i64::from(size) - SECTION_HEADER_LEN as i64;
            if body < 0 {
                return Err(RiteError::BadSectionSize { tag, size });
            }
            SectionPayload::Raw(read_bytes(bytes, off, body as usize)?.to_vec())
        };
        Ok(Section { tag, payload })
    }

    fn write(&self, out: &mut Vec<u8>, lines: &mut LineCursor<'_>) -> Result<(), RiteError> {
        let start = out.len();
        put_tag(out, &self.tag);
        let size_pos = reserve(out, 4);
        match &self.payload {
            SectionPayload::Raw(body) => out.extend_from_slice(body),
            SectionPayload::Irep(root) => {
                put_tag(out, IREP_VERSION);
                root.write(out, lines)?;
            }
        }
        let section_size = (out.len() - start) as i32;
        patch_i32(out, size_pos, section_size);
        Ok(())
    }
}

/// A whole container image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiteFile {
    pub sections: Vec<Section>,
}

impl RiteFile {
    /// Parse a container image. The fixed magic, format version and
    /// producer tags must match; the stored crc and total size are read
    /// but not checked, since both are regenerated by [`RiteFile::render`].
    pub fn parse(bytes: &[u8]) -> Result<Self, RiteError> {
        let mut off = 0usize;
        expect_tag(bytes, &mut off, "magic", RITE_MAGIC)?;
        expect_tag(bytes, &mut off, "format version", RITE_VERSION)?;
        let crc = read_u16(bytes, &mut off)?;
        let total_size = read_u32(bytes, &mut off)?;
        expect_tag(bytes, &mut off, "producer name", PRODUCER_NAME)?;
        expect_tag(bytes, &mut off, "producer version", PRODUCER_VERSION)?;
        log::debug!(
            "container header: declared size {total_size} ({} actual), crc {crc:#06x}",
            bytes.len()
        );

        let mut sections = Vec::new();
        while off < bytes.len() {
            sections.push(Section::read(bytes, &mut off)?);
        }
        Ok(RiteFile { sections })
    }

    /// All string constants, escaped for the line-oriented artifact, in
    /// stream order.
    pub fn extract_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for section in &self.sections {
            if let SectionPayload::Irep(root) = &section.payload {
                root.collect_lines(&mut lines);
            }
        }
        lines
    }

    /// Number of string pool entries across all sections.
    pub fn string_count(&self) -> usize {
        self.sections
            .iter()
            .map(|section| match &section.payload {
                SectionPayload::Irep(root) => root.string_count(),
                SectionPayload::Raw(_) => 0,
            })
            .sum()
    }

    /// Serialize the container, substituting `lines` into the string pool
    /// entries in stream order. The line count must match the string count
    /// exactly; on mismatch nothing is serialized.
    pub fn render(&self, lines: &[String]) -> Result<Vec<u8>, RiteError> {
        let expected = self.string_count();
        if lines.len() != expected {
            return Err(RiteError::LineCountMismatch {
                expected,
                found: lines.len(),
            });
        }

        let mut cursor = LineCursor::new(lines);
        let mut out = Vec::new();
        put_tag(&mut out, RITE_MAGIC);
        put_tag(&mut out, RITE_VERSION);
        let crc_pos = reserve(&mut out, 2);
        let size_pos = reserve(&mut out, 4);
        put_tag(&mut out, PRODUCER_NAME);
        put_tag(&mut out, PRODUCER_VERSION);

        for section in &self.sections {
            section.write(&mut out, &mut cursor)?;
        }

        // The crc covers the finalized size field, so the size is patched
        // first.
        let total_len = out.len() as u32;
        patch_u32(&mut out, size_pos, total_len);
        let crc = crc16(&out[CRC_RANGE_START..], 0);
        patch_u16(&mut out, crc_pos, crc);
        Ok(out)
    }
}
