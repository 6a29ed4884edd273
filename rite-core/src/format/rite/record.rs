//! Code record codec: one compiled unit (instruction words, constant pool,
//! symbol table) plus the depth-first tree of nested records.
//!
//! Wire layout of one record (big-endian):
//! - u32 size (counts itself as 4 bytes; excludes the alignment pad)
//! - u16 n_locals, u16 n_regs, u16 n_children
//! - u32 n_iseq
//! - zero padding to the next 4-byte boundary of the absolute stream position
//! - [n_iseq] u32 instruction words
//! - u32 n_pool, then pool entries: u8 type, u16 length, [length] data
//! - u32 n_sym, then symbol entries: u16 length, [length + 1] data
//!   (data omitted when length == 0xFFFF)
//! - then n_children nested records, depth-first

use super::io::{
    align_to_skip, check_count, patch_u32, put_u16, put_u32, put_u8, read_bytes, read_u16,
    read_u32, read_u8, reserve,
};
use super::strings::{escape_line, unescape_line, LineCursor};
use super::RiteError;

const POOL_TAG_STRING: u8 = 0;
const POOL_TAG_FIXNUM: u8 = 1;
const POOL_TAG_FLOAT: u8 = 2;

/// Wire length sentinel for a symbol slot with no name.
const SYM_ABSENT: u16 = 0xFFFF;

/// Reject record trees nested deeper than this; the format carries no
/// explicit bound, so a cap keeps malformed child counts from recursing
/// without limit.
pub(crate) const MAX_TREE_DEPTH: usize = 512;

// Minimum encoded bytes per element, used to sanity-check declared counts
// against the remaining input before allocating.
const MIN_POOL_ENTRY_LEN: usize = 3;
const MIN_SYM_ENTRY_LEN: usize = 2;
const ISEQ_WORD_LEN: usize = 4;

/// One constant-pool slot. Tags other than string/fixnum/float are
/// structurally accepted and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEntry {
    Str(Vec<u8>),
    Fixnum(Vec<u8>),
    Float(Vec<u8>),
    Other { tag: u8, data: Vec<u8> },
}

impl PoolEntry {
    fn tag(&self) -> u8 {
        match self {
            PoolEntry::Str(_) => POOL_TAG_STRING,
            PoolEntry::Fixnum(_) => POOL_TAG_FIXNUM,
            PoolEntry::Float(_) => POOL_TAG_FLOAT,
            PoolEntry::Other { tag, .. } => *tag,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            PoolEntry::Str(data)
            | PoolEntry::Fixnum(data)
            | PoolEntry::Float(data)
            | PoolEntry::Other { data, .. } => data,
        }
    }
}

/// One symbol-table slot; `Name` holds the stored bytes including the
/// trailing byte (wire length is one less than the byte count).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolEntry {
    Absent,
    Name(Vec<u8>),
}

/// One code record and its subtree. The on-wire child count is
/// `children.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Irep {
    pub n_locals: u16,
    pub n_regs: u16,
    pub iseq: Vec<u32>,
    pub pool: Vec<PoolEntry>,
    pub syms: Vec<SymbolEntry>,
    pub children: Vec<Irep>,
}

impl Irep {
    /// Parse one record and its children, depth-first.
    pub(crate) fn read(bytes: &[u8], off: &mut usize, depth: usize) -> Result<Irep, RiteError> {
        if depth > MAX_TREE_DEPTH {
            return Err(RiteError::TreeTooDeep {
                limit: MAX_TREE_DEPTH,
            });
        }

        // The stored size is regenerated on write; parsing is driven by the
        // field counts alone.
        let _size = read_u32(bytes, off)?;
        let n_locals = read_u16(bytes, off)?;
        let n_regs = read_u16(bytes, off)?;
        let n_children = read_u16(bytes, off)?;
        let n_iseq = read_u32(bytes, off)? as usize;

        read_bytes(bytes, off, align_to_skip(*off))?;

        check_count(bytes, *off, n_iseq, ISEQ_WORD_LEN)?;
        let mut iseq = Vec::with_capacity(n_iseq);
        for _ in 0..n_iseq {
            iseq.push(read_u32(bytes, off)?);
        }

        let n_pool = read_u32(bytes, off)? as usize;
        check_count(bytes, *off, n_pool, MIN_POOL_ENTRY_LEN)?;
        let mut pool = Vec::with_capacity(n_pool);
        for _ in 0..n_pool {
            pool.push(read_pool_entry(bytes, off)?);
        }

        let n_sym = read_u32(bytes, off)? as usize;
        check_count(bytes, *off, n_sym, MIN_SYM_ENTRY_LEN)?;
        let mut syms = Vec::with_capacity(n_sym);
        for _ in 0..n_sym {
            syms.push(read_symbol_entry(bytes, off)?);
        }

        let mut children = Vec::with_capacity(n_children as usize);
        for _ in 0..n_children {
            children.push(Irep::read(bytes, off, depth + 1)?);
        }

        Ok(Irep {
            n_locals,
            n_regs,
            iseq,
            pool,
            syms,
            children,
        })
    }

    /// Serialize this record and its children; string pool entries take
    /// their data from `lines`.
    pub(crate) fn write(
        &self,
        out: &mut Vec<u8>,
        lines: &mut LineCursor<'_>,
    ) -> Result<(), RiteError> {
        let size_pos = reserve(out, 4);
        put_u16(out, self.n_locals);
        put_u16(out, self.n_regs);
        put_u16(out, self.children.len() as u16);
        put_u32(out, self.iseq.len() as u32);

        // Padding depends on the output position, never on the input.
        let skipped = align_to_skip(out.len());
        out.resize(out.len() + skipped, 0);

        for &word in &self.iseq {
            put_u32(out, word);
        }

        put_u32(out, self.pool.len() as u32);
        for entry in &self.pool {
            write_pool_entry(entry, out, lines)?;
        }

        put_u32(out, self.syms.len() as u32);
        for sym in &self.syms {
            write_symbol_entry(sym, out);
        }

        // The size field counts itself but not the alignment pad.
        let size = (out.len() - size_pos - skipped + 4) as u32;
        patch_u32(out, size_pos, size);

        for child in &self.children {
            child.write(out, lines)?;
        }
        Ok(())
    }

    /// Append this subtree's string constants to `lines`, escaped for the
    /// text artifact, in stream order.
    pub fn collect_lines(&self, lines: &mut Vec<String>) {
        for entry in &self.pool {
            if let PoolEntry::Str(data) = entry {
                lines.push(escape_line(data));
            }
        }
        for child in &self.children {
            child.collect_lines(lines);
        }
    }

    /// Number of string pool entries in this subtree.
    pub fn string_count(&self) -> usize {
        let own = self
            .pool
            .iter()
            .filter(|entry| matches!(entry, PoolEntry::Str(_)))
            .count();
        own + self
            .children
            .iter()
            .map(Irep::string_count)
            .sum::<usize>()
    }
}

fn read_pool_entry(bytes: &[u8], off: &mut usize) -> Result<PoolEntry, RiteError> {
    let tag = read_u8(bytes, off)?;
    let len = read_u16(bytes, off)? as usize;
    let data = read_bytes(bytes, off, len)?.to_vec();
    Ok(match tag {
        POOL_TAG_STRING => PoolEntry::Str(data),
        POOL_TAG_FIXNUM => PoolEntry::Fixnum(data),
        POOL_TAG_FLOAT => PoolEntry::Float(data),
        other => PoolEntry::Other { tag: other, data },
    })
}

fn write_pool_entry(
    entry: &PoolEntry,
    out: &mut Vec<u8>,
    lines: &mut LineCursor<'_>,
) -> Result<(), RiteError> {
    let replacement;
    let data = match entry {
        PoolEntry::Str(_) => {
            let line = lines.take()?;
            replacement = unescape_line(line);
            if replacement.len() > usize::from(u16::MAX) {
                return Err(RiteError::LineTooLong {
                    index: lines.consumed() - 1,
                    len: replacement.len(),
                });
            }
            &replacement[..]
        }
        other => other.data(),
    };
    put_u8(out, entry.tag());
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
    Ok(())
}

fn read_symbol_entry(bytes: &[u8], off: &mut usize) -> Result<SymbolEntry, RiteError> {
    let len = read_u16(bytes, off)?;
    if len == SYM_ABSENT {
        return Ok(SymbolEntry::Absent);
    }
    let data = read_bytes(bytes, off, len as usize + 1)?.to_vec();
    Ok(SymbolEntry::Name(data))
}

fn write_symbol_entry(sym: &SymbolEntry, out: &mut Vec<u8>) {
    match sym {
        SymbolEntry::Absent => put_u16(out, SYM_ABSENT),
        SymbolEntry::Name(data) => {
            debug_assert!(!data.is_empty());
            put_u16(out, (data.len() - 1) as u16);
            out.extend_from_slice(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    // One record embedded at offset 3 (header ends at 17, so 3 pad bytes):
    // n_locals=2, n_regs=3, iseq=[0x01020304], pool=[fixnum "7"],
    // syms=["x\0"].
    const UNALIGNED_RECORD: &str =
        "eeeeee00000026000200030000000000010000000102030400000001010001370000000100017800";

    // A depth-3 tree as laid out in a container (records begin at absolute
    // offset 34): root with two children, the first of which has two leaf
    // children of its own.
    const NESTED_TREE: &str = "000000240001000300020000000200000222000003330000000000000001ffff\
                               000000240000000200020000000100000111000000010000036d6964000000000000001e\
                               00000001000000000001000000aa00000000000000000000001e000000010000000000010000000000bb\
                               00000000000000000000001e000000010000000000010000000000cc0000000000000000";

    fn no_lines() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn record_at_unaligned_offset_round_trips() {
        let buf = hex::decode(UNALIGNED_RECORD).unwrap();
        let mut off = 3;
        let irep = Irep::read(&buf, &mut off, 0).unwrap();
        assert_eq!(off, buf.len());
        assert_eq!(irep.n_locals, 2);
        assert_eq!(irep.n_regs, 3);
        assert_eq!(irep.iseq, vec![0x01020304]);
        assert_eq!(irep.pool, vec![PoolEntry::Fixnum(b"7".to_vec())]);
        assert_eq!(irep.syms, vec![SymbolEntry::Name(b"x\0".to_vec())]);
        assert!(irep.children.is_empty());

        let mut out = vec![0xEE; 3];
        let lines = no_lines();
        irep.write(&mut out, &mut LineCursor::new(&lines)).unwrap();
        assert_eq!(hex::encode(out), UNALIGNED_RECORD);
    }

    #[test]
    fn padding_tracks_the_output_position() {
        let irep = Irep {
            n_locals: 0,
            n_regs: 1,
            iseq: vec![0xAABBCCDD, 0x11223344],
            pool: vec![PoolEntry::Float(b"1.5".to_vec())],
            syms: vec![SymbolEntry::Absent],
            children: Vec::new(),
        };
        for start in 0..8usize {
            let mut out = vec![0xEE; start];
            let lines = no_lines();
            irep.write(&mut out, &mut LineCursor::new(&lines)).unwrap();

            let pad_at = start + 14;
            let pad = (4 - pad_at % 4) % 4;
            assert_eq!((pad_at + pad) % 4, 0);
            assert!(out[pad_at..pad_at + pad].iter().all(|&b| b == 0));
            assert_eq!(out[pad_at + pad..pad_at + pad + 4], 0xAABBCCDDu32.to_be_bytes());

            let mut off = start;
            assert_eq!(Irep::read(&out, &mut off, 0).unwrap(), irep);
            assert_eq!(off, out.len());
        }
    }

    #[test]
    fn nested_tree_parses_and_re_serializes_identically() {
        let mut buf = vec![0u8; 34];
        buf.extend_from_slice(&hex::decode(NESTED_TREE).unwrap());

        let mut off = 34;
        let root = Irep::read(&buf, &mut off, 0).unwrap();
        assert_eq!(off, buf.len());

        assert_eq!(root.children.len(), 2);
        assert_eq!(root.iseq, vec![0x222, 0x333]);
        assert_eq!(root.syms, vec![SymbolEntry::Absent]);
        let mid = &root.children[0];
        assert_eq!(mid.pool, vec![PoolEntry::Str(b"mid".to_vec())]);
        assert_eq!(mid.children.len(), 2);
        assert_eq!(mid.children[0].iseq, vec![0xAA]);
        assert_eq!(mid.children[1].iseq, vec![0xBB]);
        assert_eq!(root.children[1].iseq, vec![0xCC]);
        assert_eq!(root.string_count(), 1);

        let mut lines = Vec::new();
        root.collect_lines(&mut lines);
        assert_eq!(lines, vec!["mid".to_string()]);

        let mut out = vec![0u8; 34];
        root.write(&mut out, &mut LineCursor::new(&lines)).unwrap();
        assert_eq!(hex::encode(&out[34..]), hex::encode(&buf[34..]));
    }

    #[test]
    fn symbol_sentinel_consumes_no_data() {
        let mut out = Vec::new();
        write_symbol_entry(&SymbolEntry::Absent, &mut out);
        assert_eq!(out, vec![0xFF, 0xFF]);

        let mut off = 0;
        assert_eq!(read_symbol_entry(&out, &mut off).unwrap(), SymbolEntry::Absent);
        assert_eq!(off, 2);
    }

    #[test]
    fn symbol_name_stores_length_plus_one_bytes() {
        let sym = SymbolEntry::Name(b"ab\0".to_vec());
        let mut out = Vec::new();
        write_symbol_entry(&sym, &mut out);
        assert_eq!(out, vec![0x00, 0x02, b'a', b'b', 0x00]);

        let mut off = 0;
        assert_eq!(read_symbol_entry(&out, &mut off).unwrap(), sym);
        assert_eq!(off, out.len());
    }

    #[test]
    fn unknown_pool_tag_passes_through() {
        let entry = PoolEntry::Other {
            tag: 9,
            data: vec![1, 2, 3],
        };
        let mut out = Vec::new();
        let lines = no_lines();
        write_pool_entry(&entry, &mut out, &mut LineCursor::new(&lines)).unwrap();
        assert_eq!(out, vec![9, 0x00, 0x03, 1, 2, 3]);

        let mut off = 0;
        assert_eq!(read_pool_entry(&out, &mut off).unwrap(), entry);
    }

    #[test]
    fn over_deep_tree_is_rejected() {
        let mut chain = Irep::default();
        for _ in 0..MAX_TREE_DEPTH + 2 {
            let mut parent = Irep::default();
            parent.children.push(chain);
            chain = parent;
        }
        let mut out = Vec::new();
        let lines = no_lines();
        chain.write(&mut out, &mut LineCursor::new(&lines)).unwrap();

        let mut off = 0;
        assert!(matches!(
            Irep::read(&out, &mut off, 0),
            Err(RiteError::TreeTooDeep { .. })
        ));
    }

    #[test]
    fn absurd_declared_counts_are_rejected_before_allocation() {
        // n_iseq = 0xFFFFFFFF with only a handful of trailing bytes.
        let mut buf = Vec::new();
        put_u32(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u32(&mut buf, 0xFFFF_FFFF);
        buf.extend_from_slice(&[0, 0]);

        let mut off = 0;
        assert!(matches!(
            Irep::read(&buf, &mut off, 0),
            Err(RiteError::UnexpectedEof { .. })
        ));
    }
}
