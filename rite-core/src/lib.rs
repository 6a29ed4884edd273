//! Support for the RITE script container format.
//!
//! This mostly includes parsing the container (header, tagged sections and
//! the nested tree of compiled code records), extracting the string
//! constants into an editable line list, and re-serializing the container
//! byte-exactly with replacement strings patched into the constant pool.

pub mod format;

// re-export for convenience
pub use format::rite::{
    crc16, Irep, LineCursor, PoolEntry, RiteError, RiteFile, Section, SectionPayload, SymbolEntry,
};
