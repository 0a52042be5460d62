//! Manages page-addressed I/O for one open database.
//!
//! A pager hides whether the database lives in a single file or purely in
//! memory. Pages are numbered from zero; in a file they sit contiguously
//! after the fixed header (`dbheader::HEADER_SIZE`). The pager also owns the
//! header's mutable metadata (root page number and the transaction/table
//! identifier counters) and rewrites the header whenever one of them moves.
//!
//! `fetch_page` returns an owned copy of the page, decoupling B-tree
//! traversal from pager storage: callers mutate their copy and hand it back
//! through `store_page`.
//!
//! Durability is buffered-write only. `store_page` issues a single write
//! through the OS page cache with no fsync, so a crash mid-commit can leave
//! the file partially updated.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::dbheader::{Header, DEFAULT_PAGE_SIZE, HEADER_SIZE};
use crate::page::Page;

/// Page numbers are 0-based and 4 bytes wide, matching the on-disk width of
/// a non-leaf child pointer.
pub type PageNum = u32;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Page number {0} is beyond the end of the database.")]
    PageNumberBeyondLimits(PageNum),
    #[error("Cannot truncate a page off an empty database.")]
    NothingToTruncate,
    #[error("Error accessing database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error in database header: {0}")]
    DbHdr(#[from] crate::dbheader::Error),
    #[error("Error in page image: {0}")]
    BadPage(String),
}

pub enum Pager {
    Memory(MemoryPager),
    File(FilePager),
}

/// Keeps the whole database as a dense, ordered collection of pages.
pub struct MemoryPager {
    header: Header,
    pages: Vec<Page>,
}

/// Seeks and reads/writes exactly one page at a time; no page cache.
pub struct FilePager {
    f: std::fs::File,
    header: Header,
    num_pages: PageNum,
}

impl Pager {
    /// Opens a `:memory:` database. `page_size` is configurable here only;
    /// file databases always use the format default.
    pub fn open_memory(page_size: u16) -> Pager {
        Pager::Memory(MemoryPager {
            header: Header::new(page_size),
            pages: vec![],
        })
    }

    /// Opens (creating if absent) a database file, verifying the header of
    /// an existing file before touching any page.
    pub fn open_file(path: &Path) -> Result<Pager, Error> {
        let mut f = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let file_len = f.metadata()?.len();
        let header = if file_len == 0 {
            let header = Header::new(DEFAULT_PAGE_SIZE);
            f.seek(SeekFrom::Start(0))?;
            f.write_all(&header.serialize())?;
            header
        } else {
            let mut buf = [0_u8; HEADER_SIZE];
            f.seek(SeekFrom::Start(0))?;
            f.read_exact(&mut buf)?;
            Header::parse(&buf)?
        };
        let num_pages =
            ((file_len.saturating_sub(HEADER_SIZE as u64)) / header.pagesize as u64) as PageNum;
        Ok(Pager::File(FilePager { f, header, num_pages }))
    }

    pub fn page_size(&self) -> usize {
        self.header().pagesize as usize
    }

    pub fn total_pages(&self) -> PageNum {
        match self {
            Pager::Memory(m) => m.pages.len() as PageNum,
            Pager::File(fp) => fp.num_pages,
        }
    }

    pub fn root_page(&self) -> PageNum {
        self.header().root_page
    }

    pub fn set_root_page(&mut self, pn: PageNum) -> Result<(), Error> {
        self.header_mut().root_page = pn;
        self.persist_header()
    }

    /// Claims the next transaction identifier for a writer entering the
    /// active state. Called under the writer exclusion lock.
    pub fn claim_tid(&mut self) -> Result<u32, Error> {
        let tid = self.header().next_tid;
        self.header_mut().next_tid = tid + 1;
        self.persist_header()?;
        Ok(tid)
    }

    /// The next unused transaction identifier, read non-destructively.
    /// Autocommit readers use this as their snapshot.
    pub fn peek_tid(&self) -> u32 {
        self.header().next_tid
    }

    pub fn claim_table_id(&mut self) -> Result<u32, Error> {
        let id = self.header().next_table_id;
        self.header_mut().next_table_id = id + 1;
        self.persist_header()?;
        Ok(id)
    }

    /// Re-reads header and page count from the backing file, picking up
    /// changes made by other connections to the same path. A no-op for
    /// memory databases, which are never shared.
    pub fn refresh(&mut self) -> Result<(), Error> {
        match self {
            Pager::Memory(_) => Ok(()),
            Pager::File(fp) => {
                let mut buf = [0_u8; HEADER_SIZE];
                fp.f.seek(SeekFrom::Start(0))?;
                fp.f.read_exact(&mut buf)?;
                fp.header = Header::parse(&buf)?;
                let file_len = fp.f.metadata()?.len();
                fp.num_pages = ((file_len.saturating_sub(HEADER_SIZE as u64))
                    / fp.header.pagesize as u64) as PageNum;
                Ok(())
            }
        }
    }

    /// The backing file, for connection-level shared/exclusive locking.
    pub fn file(&self) -> Option<&std::fs::File> {
        match self {
            Pager::Memory(_) => None,
            Pager::File(fp) => Some(&fp.f),
        }
    }

    pub fn fetch_page(&mut self, pn: PageNum) -> Result<Page, Error> {
        if pn >= self.total_pages() {
            return Err(Error::PageNumberBeyondLimits(pn));
        }
        match self {
            Pager::Memory(m) => Ok(m.pages[pn as usize].clone()),
            Pager::File(fp) => {
                let ps = fp.header.pagesize as usize;
                let mut buf = vec![0_u8; ps];
                fp.f.seek(SeekFrom::Start(page_offset(pn, ps)))?;
                fp.f.read_exact(&mut buf)?;
                Page::from_bytes(&buf).map_err(|e| Error::BadPage(e.to_string()))
            }
        }
    }

    pub fn store_page(&mut self, pn: PageNum, page: &Page) -> Result<(), Error> {
        if pn >= self.total_pages() {
            return Err(Error::PageNumberBeyondLimits(pn));
        }
        match self {
            Pager::Memory(m) => {
                m.pages[pn as usize] = page.clone();
                Ok(())
            }
            Pager::File(fp) => {
                let ps = fp.header.pagesize as usize;
                fp.f.seek(SeekFrom::Start(page_offset(pn, ps)))?;
                fp.f.write_all(&page.to_bytes(ps))?;
                Ok(())
            }
        }
    }

    /// Adds a page at the end of the database, returning its number.
    pub fn append_page(&mut self, page: &Page) -> Result<PageNum, Error> {
        let pn = self.total_pages();
        match self {
            Pager::Memory(m) => {
                m.pages.push(page.clone());
            }
            Pager::File(fp) => {
                let ps = fp.header.pagesize as usize;
                fp.f.seek(SeekFrom::Start(page_offset(pn, ps)))?;
                fp.f.write_all(&page.to_bytes(ps))?;
                fp.num_pages += 1;
            }
        }
        Ok(pn)
    }

    /// Drops the last page; page reclamation swaps a doomed interior page
    /// with the last page first, then truncates.
    pub fn truncate_last_page(&mut self) -> Result<(), Error> {
        match self {
            Pager::Memory(m) => {
                if m.pages.pop().is_none() {
                    return Err(Error::NothingToTruncate);
                }
                Ok(())
            }
            Pager::File(fp) => {
                if fp.num_pages == 0 {
                    return Err(Error::NothingToTruncate);
                }
                fp.num_pages -= 1;
                let ps = fp.header.pagesize as usize;
                fp.f.set_len(page_offset(fp.num_pages, ps))?;
                Ok(())
            }
        }
    }

    /// Drops every page, leaving just the header.
    pub fn truncate_all(&mut self) -> Result<(), Error> {
        match self {
            Pager::Memory(m) => {
                m.pages.clear();
                Ok(())
            }
            Pager::File(fp) => {
                fp.num_pages = 0;
                fp.f.set_len(HEADER_SIZE as u64)?;
                Ok(())
            }
        }
    }

    fn header(&self) -> &Header {
        match self {
            Pager::Memory(m) => &m.header,
            Pager::File(fp) => &fp.header,
        }
    }

    fn header_mut(&mut self) -> &mut Header {
        match self {
            Pager::Memory(m) => &mut m.header,
            Pager::File(fp) => &mut fp.header,
        }
    }

    fn persist_header(&mut self) -> Result<(), Error> {
        match self {
            Pager::Memory(_) => Ok(()),
            Pager::File(fp) => {
                let buf = fp.header.serialize();
                fp.f.seek(SeekFrom::Start(0))?;
                fp.f.write_all(&buf)?;
                Ok(())
            }
        }
    }
}

fn page_offset(pn: PageNum, page_size: usize) -> u64 {
    HEADER_SIZE as u64 + pn as u64 * page_size as u64
}
