//! The page layer: byte layout and record manipulation for one fixed-size
//! page.
//!
//! A page is either a leaf (holds data objects) or a non-leaf (holds
//! key → child page number pointers). On disk a page is a 3-byte header
//! (one byte kind, two bytes `used`) followed by serialized PageObjects in
//! ascending key order. In memory we keep the parsed object list and
//! reserialize on store; `used` is always derivable as the header size plus
//! the sum of object lengths.
//!
//! The version policy lives here: a leaf key may be bound to at most two
//! objects at a time, the frozen version and the in-flight version whose
//! creator expired the frozen one. Any attempt to introduce a third version,
//! or to stack an in-flight version on top of a key whose current version is
//! not expired by the writer, fails with a serialization conflict for the
//! client to retry.

use crate::error::{Error, Result};
use crate::record::PageObject;

pub const PAGE_HEADER_SIZE: usize = 3;

const KIND_LEAF: u8 = 0;
const KIND_NON_LEAF: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Leaf,
    NonLeaf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub kind: PageKind,
    objects: Vec<PageObject>,
}

impl Page {
    pub fn new_leaf() -> Page {
        Page { kind: PageKind::Leaf, objects: vec![] }
    }

    pub fn new_non_leaf() -> Page {
        Page { kind: PageKind::NonLeaf, objects: vec![] }
    }

    /// Builds a page directly from pre-sorted objects, as the split path
    /// does when redistributing halves.
    pub fn with_objects(kind: PageKind, objects: Vec<PageObject>) -> Page {
        debug_assert!(objects.windows(2).all(|w| w[0].key <= w[1].key));
        Page { kind, objects }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Page> {
        use byteorder::{BigEndian, ByteOrder};
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::Corrupt(String::from("truncated page header")));
        }
        let kind = match buf[0] {
            KIND_LEAF => PageKind::Leaf,
            KIND_NON_LEAF => PageKind::NonLeaf,
            k => return Err(Error::Corrupt(format!("unknown page kind {}", k))),
        };
        let used = BigEndian::read_u16(&buf[1..3]) as usize;
        if used < PAGE_HEADER_SIZE || used > buf.len() {
            return Err(Error::Corrupt(format!("page used count {} out of bounds", used)));
        }
        let mut objects = vec![];
        let mut offset = PAGE_HEADER_SIZE;
        while offset < used {
            let (n, obj) = PageObject::parse(&buf[offset..used])?;
            if objects.last().map_or(false, |prev: &PageObject| prev.key > obj.key) {
                return Err(Error::Corrupt(String::from("page keys out of order")));
            }
            objects.push(obj);
            offset += n;
        }
        Ok(Page { kind, objects })
    }

    pub fn to_bytes(&self, page_size: usize) -> Vec<u8> {
        use byteorder::{BigEndian, ByteOrder};
        let used = self.used();
        debug_assert!(used <= page_size);
        let mut buf = Vec::with_capacity(page_size);
        buf.push(match self.kind {
            PageKind::Leaf => KIND_LEAF,
            PageKind::NonLeaf => KIND_NON_LEAF,
        });
        let mut used_buf = [0_u8; 2];
        BigEndian::write_u16(&mut used_buf, used as u16);
        buf.extend_from_slice(&used_buf);
        for obj in &self.objects {
            obj.serialize_into(&mut buf);
        }
        buf.resize(page_size, 0);
        buf
    }

    /// Total bytes this page occupies when serialized: the header plus the
    /// sum of all contained object lengths.
    pub fn used(&self) -> usize {
        PAGE_HEADER_SIZE + self.objects.iter().map(|o| o.serialized_len()).sum::<usize>()
    }

    /// Whether an additional `extra` bytes of object would still fit.
    pub fn fits(&self, extra: usize, page_size: usize) -> bool {
        self.used() + extra <= page_size
    }

    pub fn objects(&self) -> &[PageObject] {
        &self.objects
    }

    /// Consumes the page, yielding its objects for redistribution.
    pub fn into_objects(self) -> Vec<PageObject> {
        self.objects
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.objects.iter().map(|o| o.key.as_slice())
    }

    /// The first (smallest-keyed) object; its key is this page's head key.
    pub fn head(&self) -> Option<&PageObject> {
        self.objects.first()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn versions_of(&self, key: &[u8]) -> Vec<usize> {
        (0..self.objects.len()).filter(|i| self.objects[*i].key == key).collect()
    }

    /// Checks the version policy for `obj` without mutating. The B-tree
    /// consults this before splitting so a conflicting add fails with no
    /// structural change.
    pub fn can_add(&self, obj: &PageObject) -> Result<()> {
        let versions = self.versions_of(&obj.key);
        match versions.len() {
            0 => Ok(()),
            1 => {
                // The only tolerated second version sits on top of a version
                // this same transaction has already expired.
                if self.objects[versions[0]].xid != obj.tid {
                    return Err(Error::SerializationFailure);
                }
                Ok(())
            }
            _ => Err(Error::SerializationFailure),
        }
    }

    /// Inserts `obj` in sorted position.
    ///
    /// The caller is responsible for capacity (the B-tree splits before
    /// calling); overflowing here is a programming error, not a user error.
    /// Version conflicts are user-visible: adding over a live version, or as
    /// a third version, is a serialization failure.
    pub fn add(&mut self, obj: PageObject, page_size: usize) -> Result<()> {
        if !self.fits(obj.serialized_len(), page_size) {
            return Err(Error::Internal(format!(
                "object of {} bytes does not fit in page ({} of {} used)",
                obj.serialized_len(),
                self.used(),
                page_size
            )));
        }
        self.can_add(&obj)?;
        let pos = self.objects.partition_point(|o| o.key.as_slice() <= obj.key.as_slice());
        self.objects.insert(pos, obj);
        Ok(())
    }

    /// Removes every object matching both key and creator tid. Returns
    /// whether anything was removed; deleting an absent pair is a no-op.
    pub fn delete(&mut self, key: &[u8], tid: u32) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| !(o.key == key && o.tid == tid));
        self.objects.len() != before
    }

    /// Stamps `xid` onto every object matching key and creator tid. Rollback
    /// passes `xid == 0` to revive an expired version.
    pub fn expire(&mut self, key: &[u8], tid: u32, xid: u32) -> bool {
        let mut modified = false;
        for o in self.objects.iter_mut() {
            if o.key == key && o.tid == tid {
                o.xid = xid;
                modified = true;
            }
        }
        modified
    }

    /// Swaps the value bound to (key, tid), keeping the key. Non-leaf pages
    /// use this to repoint an entry at a different child page.
    pub fn replace(&mut self, key: &[u8], tid: u32, value: Vec<u8>, page_size: usize) -> Result<()> {
        self.delete(key, tid);
        self.add(PageObject::new(key.to_vec(), value, tid, 0), page_size)
    }

    /// Replaces the row version under one key according to the two-version
    /// policy: no versions means plain insert, one version is expired in
    /// place, and the in-flight twin of a second update collapses into the
    /// new one. A key whose versions belong to other transactions conflicts.
    pub fn update(&mut self, old: &PageObject, new: PageObject, tid: u32, page_size: usize) -> Result<()> {
        let versions = self.versions_of(&old.key);
        match versions.len() {
            0 => self.add(new, page_size),
            1 => {
                let existing = &self.objects[versions[0]];
                if existing.xid != 0 && existing.xid != tid {
                    return Err(Error::SerializationFailure);
                }
                let existing_tid = existing.tid;
                self.expire(&old.key, existing_tid, tid);
                self.add(new, page_size)
            }
            2 => {
                if self.objects[versions[0]].tid != tid && self.objects[versions[1]].tid != tid {
                    return Err(Error::SerializationFailure);
                }
                if !self.delete(&old.key, tid) {
                    return Err(Error::SerializationFailure);
                }
                self.add(new, page_size)
            }
            _ => Err(Error::SerializationFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS: usize = 4096;

    fn obj(key: &[u8], value: &[u8], tid: u32, xid: u32) -> PageObject {
        PageObject::new(key.to_vec(), value.to_vec(), tid, xid)
    }

    #[test]
    fn test_add_keeps_sorted_order() {
        let mut p = Page::new_leaf();
        p.add(obj(b"m", b"2", 1, 0), PS).unwrap();
        p.add(obj(b"a", b"1", 1, 0), PS).unwrap();
        p.add(obj(b"z", b"3", 1, 0), PS).unwrap();
        let keys: Vec<&[u8]> = p.keys().collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"m", b"z"]);
        assert_eq!(p.head().unwrap().key, b"a");
    }

    #[test]
    fn test_used_accounting() {
        let mut p = Page::new_leaf();
        assert_eq!(p.used(), PAGE_HEADER_SIZE);
        let o = obj(b"k", b"vvv", 1, 0);
        let len = o.serialized_len();
        p.add(o, PS).unwrap();
        assert_eq!(p.used(), PAGE_HEADER_SIZE + len);
    }

    #[test]
    fn test_add_over_live_version_conflicts() {
        let mut p = Page::new_leaf();
        p.add(obj(b"k", b"old", 1, 0), PS).unwrap();
        // A second writer may not stack a version on a live key.
        assert!(matches!(
            p.add(obj(b"k", b"new", 2, 0), PS),
            Err(Error::SerializationFailure)
        ));
    }

    #[test]
    fn test_add_twin_after_own_expire() {
        let mut p = Page::new_leaf();
        p.add(obj(b"k", b"old", 1, 0), PS).unwrap();
        assert!(p.expire(b"k", 1, 5));
        p.add(obj(b"k", b"new", 5, 0), PS).unwrap();
        assert_eq!(p.len(), 2);
        // Third version attempts conflict no matter who asks.
        assert!(matches!(
            p.add(obj(b"k", b"newer", 5, 0), PS),
            Err(Error::SerializationFailure)
        ));
        assert!(matches!(
            p.add(obj(b"k", b"newer", 6, 0), PS),
            Err(Error::SerializationFailure)
        ));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut p = Page::new_leaf();
        p.add(obj(b"k", b"v", 3, 0), PS).unwrap();
        assert!(p.delete(b"k", 3));
        assert!(!p.delete(b"k", 3));
        assert!(p.is_empty());
    }

    #[test]
    fn test_delete_matches_tid() {
        let mut p = Page::new_leaf();
        p.add(obj(b"k", b"v", 3, 0), PS).unwrap();
        assert!(!p.delete(b"k", 4));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_expire_and_revive() {
        let mut p = Page::new_leaf();
        p.add(obj(b"k", b"v", 3, 0), PS).unwrap();
        assert!(p.expire(b"k", 3, 9));
        assert_eq!(p.objects()[0].xid, 9);
        assert!(p.expire(b"k", 3, 0));
        assert!(p.objects()[0].is_live());
    }

    #[test]
    fn test_replace_repoints_value() {
        use byteorder::{BigEndian, ByteOrder};
        let mut p = Page::new_non_leaf();
        let mut child = [0_u8; 4];
        BigEndian::write_u32(&mut child, 7);
        p.add(obj(b"k", &child, 0, 0), PS).unwrap();
        BigEndian::write_u32(&mut child, 9);
        p.replace(b"k", 0, child.to_vec(), PS).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(BigEndian::read_u32(&p.objects()[0].value), 9);
    }

    #[test]
    fn test_update_zero_one_two_versions() {
        let mut p = Page::new_leaf();
        let frozen = obj(b"k", b"v0", 1, 0);
        // Zero versions: plain insert.
        p.update(&frozen, frozen.clone(), 1, PS).unwrap();
        assert_eq!(p.len(), 1);
        // One version: expire it, add the in-flight twin.
        p.update(&frozen, obj(b"k", b"v1", 5, 0), 5, PS).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.objects()[0].xid, 5);
        // Two versions: the in-flight twin collapses into the newest value.
        let twin = obj(b"k", b"v1", 5, 0);
        p.update(&twin, obj(b"k", b"v2", 5, 0), 5, PS).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.objects()[1].value, b"v2");
    }

    #[test]
    fn test_update_conflicts_with_other_writer() {
        let mut p = Page::new_leaf();
        p.add(obj(b"k", b"v0", 1, 0), PS).unwrap();
        p.expire(b"k", 1, 5);
        p.add(obj(b"k", b"v1", 5, 0), PS).unwrap();
        // Writer 6 finds two versions, neither of them its own twin.
        let frozen = obj(b"k", b"v0", 1, 5);
        assert!(matches!(
            p.update(&frozen, obj(b"k", b"v2", 6, 0), 6, PS),
            Err(Error::SerializationFailure)
        ));
    }

    #[test]
    fn test_page_bytes_round_trip() {
        let mut p = Page::new_leaf();
        p.add(obj(b"a", b"1", 1, 0), PS).unwrap();
        p.add(obj(b"b", b"2", 2, 7), PS).unwrap();
        let buf = p.to_bytes(PS);
        assert_eq!(buf.len(), PS);
        let parsed = Page::from_bytes(&buf).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Page::from_bytes(&[]).is_err());
        assert!(Page::from_bytes(&[9, 0, 3]).is_err());
        let mut p = Page::new_leaf();
        p.add(obj(b"a", b"1", 1, 0), PS).unwrap();
        let mut buf = p.to_bytes(PS);
        // Claim more used bytes than the page holds objects for.
        buf[2] = 0xff;
        assert!(Page::from_bytes(&buf[..64]).is_err());
    }

    #[test]
    fn test_add_overflow_is_internal_error() {
        let mut p = Page::new_leaf();
        let big = vec![0_u8; 100];
        assert!(matches!(
            p.add(PageObject::new(b"k".to_vec(), big, 1, 0), 64),
            Err(Error::Internal(_))
        ));
    }
}
