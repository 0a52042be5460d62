//! dbheader reads and writes the fixed header at byte 0 of a database file.
//!
//! The header is 32 bytes: an 8-byte recognition signature, the page size
//! (2 bytes), the current root page number (4 bytes), the next transaction
//! identifier (4 bytes), the next table identifier (4 bytes), and zero
//! padding. The spare bytes leave room to signal a write-ahead log in a
//! later format revision without moving the page array.

use byteorder::{BigEndian, ByteOrder};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("The magic bytes for this file are wrong.")]
    WrongMagic,
    #[error("The pagesize {0} is not supported by this code.")]
    UnsupportedPagesize(u16),
    #[error("The header is truncated or unreadable.")]
    ReadFailed,
}

pub const HEADER_SIZE: usize = 32;

const MAGIC: &[u8] = b"solodb\x00\x01";

pub const DEFAULT_PAGE_SIZE: u16 = 4096;
// Small enough to force splits in tests, large enough for the page header
// plus a handful of objects.
pub const MIN_PAGE_SIZE: u16 = 64;

/// The database file header.
///
/// The root page number and the two allocation counters are the only pieces
/// of mutable global state in a database file; they are updated under the
/// writer's exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub pagesize: u16,
    pub root_page: u32,
    pub next_tid: u32,
    pub next_table_id: u32,
}

impl Header {
    /// A header for a freshly created database: empty tree rooted at page
    /// zero, counters starting at one so that zero can mean "none".
    pub fn new(pagesize: u16) -> Header {
        Header {
            pagesize,
            root_page: 0,
            next_tid: 1,
            next_table_id: 1,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Header, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::ReadFailed);
        }
        if &buf[0..MAGIC.len()] != MAGIC {
            return Err(Error::WrongMagic);
        }
        let pagesize = BigEndian::read_u16(&buf[8..10]);
        if pagesize < MIN_PAGE_SIZE {
            return Err(Error::UnsupportedPagesize(pagesize));
        }
        Ok(Header {
            pagesize,
            root_page: BigEndian::read_u32(&buf[10..14]),
            next_tid: BigEndian::read_u32(&buf[14..18]),
            next_table_id: BigEndian::read_u32(&buf[18..22]),
        })
    }

    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0_u8; HEADER_SIZE];
        buf[0..MAGIC.len()].copy_from_slice(MAGIC);
        BigEndian::write_u16(&mut buf[8..10], self.pagesize);
        BigEndian::write_u32(&mut buf[10..14], self.root_page);
        BigEndian::write_u32(&mut buf[14..18], self.next_tid);
        BigEndian::write_u32(&mut buf[18..22], self.next_table_id);
        buf
    }
}
