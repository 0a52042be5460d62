//! Btree orders pages into a search and range-scan tree over byte-string
//! keys.
//!
//! Leaves hold data objects; non-leaf pages hold (head key → child page
//! number) entries, where each entry's key is the smallest key in the child
//! subtree. There are no parent or sibling pointers in the page layout:
//! descents start at the root every time, and an operation caches its own
//! descent path for the head-key bookkeeping, never persisting it.
//!
//! Organization of btree submodules and types:
//! *  `Btree` owns the pager and implements the structural operations:
//!    insert with split-on-overflow, expire, remove with collapse-on-
//!    underflow, and per-key update.
//! *  `pub scan::RangeScan` is the lazy forward iterator over a half-open
//!    key range, built by `Btree::new_range_iterator`.

pub mod scan;

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::page::{Page, PageKind};
use crate::pager::{PageNum, Pager};
use crate::record::PageObject;

/// The descent path of one operation: (page number, chosen child index) for
/// each non-leaf level, root first.
type Path = Vec<(PageNum, usize)>;

pub struct Btree {
    pager: Pager,
    // Every page written during the current statement, for the transaction
    // coordinator's dirty-page set.
    touched: HashSet<PageNum>,
}

/// Reads the child page number out of a non-leaf entry.
pub fn child_page(obj: &PageObject) -> Result<PageNum> {
    if obj.value.len() != 4 {
        return Err(Error::Corrupt(format!(
            "non-leaf entry value has {} bytes, want 4",
            obj.value.len()
        )));
    }
    Ok(BigEndian::read_u32(&obj.value))
}

fn child_value(pn: PageNum) -> Vec<u8> {
    let mut buf = [0_u8; 4];
    BigEndian::write_u32(&mut buf, pn);
    buf.to_vec()
}

/// The child to descend into for `key`: the rightmost entry whose head key
/// is ≤ `key`, or the leftmost entry when every head is greater.
fn child_index(page: &Page, key: &[u8]) -> usize {
    let pp = page.objects().partition_point(|o| o.key.as_slice() <= key);
    pp.saturating_sub(1)
}

impl Btree {
    pub fn new(pager: Pager) -> Btree {
        Btree { pager, touched: HashSet::new() }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    /// Drains the set of page numbers written since the last call.
    pub fn take_touched(&mut self) -> HashSet<PageNum> {
        std::mem::take(&mut self.touched)
    }

    fn store(&mut self, pn: PageNum, page: &Page) -> Result<()> {
        self.pager.store_page(pn, page)?;
        self.touched.insert(pn);
        Ok(())
    }

    fn append(&mut self, page: &Page) -> Result<PageNum> {
        let pn = self.pager.append_page(page)?;
        self.touched.insert(pn);
        Ok(pn)
    }

    /// Bootstraps an empty database with an empty leaf as the root.
    pub fn ensure_root(&mut self) -> Result<()> {
        if self.pager.total_pages() == 0 {
            let pn = self.append(&Page::new_leaf())?;
            self.pager.set_root_page(pn)?;
        }
        Ok(())
    }

    /// Descends from the root to the leaf responsible for `key`, returning
    /// the leaf's page number, an owned copy, and the path taken.
    fn descend(&mut self, key: &[u8]) -> Result<(PageNum, Page, Path)> {
        let mut pn = self.pager.root_page();
        let mut path: Path = vec![];
        loop {
            let page = self.pager.fetch_page(pn)?;
            match page.kind {
                PageKind::Leaf => return Ok((pn, page, path)),
                PageKind::NonLeaf => {
                    if page.is_empty() {
                        return Err(Error::Corrupt(String::from("empty non-leaf page")));
                    }
                    let idx = child_index(&page, key);
                    let child = child_page(&page.objects()[idx])?;
                    path.push((pn, idx));
                    pn = child;
                }
            }
        }
    }

    /// Inserts one object, splitting the leaf (and ancestors, as needed) on
    /// overflow. Version conflicts surface as `SerializationFailure` before
    /// any structural change.
    pub fn add(&mut self, obj: PageObject) -> Result<()> {
        self.ensure_root()?;
        let ps = self.pager.page_size();
        let (pn, mut leaf, path) = self.descend(&obj.key)?;
        if !leaf.fits(obj.serialized_len(), ps) {
            return self.split_and_insert(pn, leaf, &path, Some(obj));
        }
        let old_head = leaf.head().map(|o| o.key.clone());
        leaf.add(obj, ps)?;
        let new_head = leaf.head().expect("leaf nonempty after add").key.clone();
        self.store(pn, &leaf)?;
        if let Some(old) = old_head {
            if old != new_head {
                self.refresh_head(&path, &old, &new_head)?;
            }
        }
        Ok(())
    }

    /// Marks the version of `key` created by `tid` as expired by `xid`.
    /// Rollback passes `xid == 0` to revive. No structural change. Expiring
    /// a version some other transaction already has in-flight deleted is a
    /// write-write conflict.
    pub fn expire(&mut self, key: &[u8], tid: u32, xid: u32) -> Result<bool> {
        self.ensure_root()?;
        let (pn, mut leaf, _path) = self.descend(key)?;
        if xid != 0 {
            if let Some(o) = leaf.objects().iter().find(|o| o.key == key && o.tid == tid) {
                if o.xid != 0 && o.xid != xid {
                    return Err(Error::SerializationFailure);
                }
            }
        }
        let modified = leaf.expire(key, tid, xid);
        if modified {
            self.store(pn, &leaf)?;
        }
        Ok(modified)
    }

    /// Physically removes the objects matching key and creator tid,
    /// unlinking and reclaiming pages that empty out.
    pub fn remove(&mut self, key: &[u8], tid: u32) -> Result<bool> {
        self.ensure_root()?;
        let (pn, mut leaf, path) = self.descend(key)?;
        let old_head = leaf.head().map(|o| o.key.clone());
        if !leaf.delete(key, tid) {
            return Ok(false);
        }
        if !leaf.is_empty() {
            let new_head = leaf.head().expect("leaf nonempty").key.clone();
            self.store(pn, &leaf)?;
            if let Some(old) = old_head {
                if old != new_head {
                    self.refresh_head(&path, &old, &new_head)?;
                }
            }
            return Ok(true);
        }
        if path.is_empty() {
            // The root leaf emptied; it stays as the reserved empty root.
            self.store(pn, &leaf)?;
            return Ok(true);
        }
        let mut doomed: Vec<PageNum> = vec![];
        self.unlink(&path, pn, &mut doomed)?;
        self.free_pages(doomed)?;
        Ok(true)
    }

    /// Replaces the row stored under one key according to the two-version
    /// policy, splitting the leaf first when the new version would not fit.
    pub fn update(&mut self, old: &PageObject, new: PageObject, tid: u32) -> Result<()> {
        debug_assert_eq!(old.key, new.key);
        self.ensure_root()?;
        let ps = self.pager.page_size();
        let (pn, mut leaf, path) = self.descend(&new.key)?;
        if !leaf.fits(new.serialized_len(), ps) {
            self.split_and_insert(pn, leaf, &path, None)?;
            return self.update(old, new, tid);
        }
        let old_head = leaf.head().map(|o| o.key.clone());
        leaf.update(old, new, tid, ps)?;
        let new_head = leaf.head().expect("leaf nonempty after update").key.clone();
        self.store(pn, &leaf)?;
        if let Some(old_key) = old_head {
            if old_key != new_head {
                self.refresh_head(&path, &old_key, &new_head)?;
            }
        }
        Ok(())
    }

    /// Builds a lazy forward iterator over `[start, end)`; `end == None`
    /// scans to the end of the key space.
    pub fn new_range_iterator(&mut self, start: Vec<u8>, end: Option<Vec<u8>>) -> scan::RangeScan<'_> {
        scan::RangeScan::new(self, start, end)
    }

    /// Splits an overflowing page into two halves by byte count, inserting
    /// `insert` (if any) into the half its key belongs to, and links the new
    /// right sibling into the parent, growing a new root when the split
    /// page was the root.
    fn split_and_insert(
        &mut self,
        pn: PageNum,
        page: Page,
        path: &[(PageNum, usize)],
        insert: Option<PageObject>,
    ) -> Result<()> {
        let ps = self.pager.page_size();
        if let Some(obj) = &insert {
            page.can_add(obj)?;
        }
        if page.len() < 2 {
            return Err(Error::Internal(String::from(
                "cannot split a page with fewer than two objects",
            )));
        }
        let kind = page.kind;
        let orig_head = page.head().expect("overflowing page nonempty").key.clone();
        let (left_objs, right_objs) = split_objects(page.into_objects());
        let mut left = Page::with_objects(kind, left_objs);
        let mut right = Page::with_objects(kind, right_objs);
        let pivot = right.head().expect("right half nonempty").key.clone();
        if let Some(obj) = insert {
            if obj.key.as_slice() < pivot.as_slice() {
                left.add(obj, ps)?;
            } else {
                right.add(obj, ps)?;
            }
        }
        let left_head = left.head().expect("left half nonempty").key.clone();
        let right_head = right.head().expect("right half nonempty").key.clone();
        self.store(pn, &left)?;
        let new_pn = self.append(&right)?;
        if path.is_empty() {
            // The root itself overflowed: allocate a non-leaf root holding
            // the two halves.
            let mut root = Page::new_non_leaf();
            root.add(PageObject::new(left_head, child_value(pn), 0, 0), ps)?;
            root.add(PageObject::new(right_head, child_value(new_pn), 0, 0), ps)?;
            let root_pn = self.append(&root)?;
            self.pager.set_root_page(root_pn)?;
            return Ok(());
        }
        if left_head != orig_head {
            self.refresh_head(path, &orig_head, &left_head)?;
        }
        self.insert_entry(path, right_head, new_pn)
    }

    /// Adds a (head key → child) entry to the deepest page on `path`,
    /// splitting upward as needed.
    fn insert_entry(&mut self, path: &[(PageNum, usize)], key: Vec<u8>, child: PageNum) -> Result<()> {
        let ps = self.pager.page_size();
        let ((ppn, _), rest) = path.split_last().expect("insert_entry needs a parent");
        let entry = PageObject::new(key, child_value(child), 0, 0);
        let mut parent = self.pager.fetch_page(*ppn)?;
        if !parent.fits(entry.serialized_len(), ps) {
            return self.split_and_insert(*ppn, parent, rest, Some(entry));
        }
        let old_head = parent.head().expect("non-leaf nonempty").key.clone();
        parent.add(entry, ps)?;
        let new_head = parent.head().expect("non-leaf nonempty").key.clone();
        self.store(*ppn, &parent)?;
        if old_head != new_head {
            self.refresh_head(rest, &old_head, &new_head)?;
        }
        Ok(())
    }

    /// Rewrites the ancestor entry keyed `old_key` to `new_key` at the
    /// deepest level of `path`, continuing upward while the rewritten entry
    /// was its page's head (so the page's own head key changed too).
    fn refresh_head(&mut self, path: &[(PageNum, usize)], old_key: &[u8], new_key: &[u8]) -> Result<()> {
        let ps = self.pager.page_size();
        let mut level = path.len();
        while level > 0 {
            let (ppn, _) = path[level - 1];
            let mut page = self.pager.fetch_page(ppn)?;
            let pos = page
                .objects()
                .iter()
                .position(|o| o.key.as_slice() == old_key)
                .ok_or_else(|| {
                    Error::Corrupt(String::from("ancestor entry missing during head propagation"))
                })?;
            let child = page.objects()[pos].value.clone();
            let was_head = pos == 0;
            page.delete(old_key, 0);
            page.add(PageObject::new(new_key.to_vec(), child, 0, 0), ps)?;
            self.store(ppn, &page)?;
            if !was_head {
                break;
            }
            level -= 1;
        }
        Ok(())
    }

    /// Removes the entry for an emptied `child` from its parent, cascading
    /// up through ancestors that empty out, collapsing single-entry non-root
    /// parents, and demoting a single-child non-leaf root. Freed page
    /// numbers accumulate in `doomed` for reclamation.
    fn unlink(&mut self, path: &[(PageNum, usize)], child: PageNum, doomed: &mut Vec<PageNum>) -> Result<()> {
        let ps = self.pager.page_size();
        let mut child = child;
        let mut level = path.len();
        loop {
            let (ppn, _) = path[level - 1];
            let mut parent = self.pager.fetch_page(ppn)?;
            let pos = parent
                .objects()
                .iter()
                .position(|o| o.value.len() == 4 && BigEndian::read_u32(&o.value) == child)
                .ok_or_else(|| Error::Corrupt(String::from("no parent entry for emptied page")))?;
            let entry_key = parent.objects()[pos].key.clone();
            parent.delete(&entry_key, 0);
            doomed.push(child);
            if parent.is_empty() {
                if level == 1 {
                    // Every subtree of the root vanished; the root becomes
                    // the reserved empty leaf.
                    self.store(ppn, &Page::new_leaf())?;
                    return Ok(());
                }
                child = ppn;
                level -= 1;
                continue;
            }
            let parent_head = parent.head().expect("parent nonempty").key.clone();
            if parent.len() == 1 && level == 1 {
                // Root non-leaf with one remaining child: demote the child.
                let survivor = child_page(&parent.objects()[0])?;
                doomed.push(ppn);
                self.pager.set_root_page(survivor)?;
                return Ok(());
            }
            if parent.len() == 1 {
                // Non-root parent down to one entry: the grandparent points
                // directly at the surviving child and the parent is freed.
                let survivor = parent.objects()[0].clone();
                let (gpn, _) = path[level - 2];
                let mut gp = self.pager.fetch_page(gpn)?;
                let gpos = gp
                    .objects()
                    .iter()
                    .position(|o| o.value.len() == 4 && BigEndian::read_u32(&o.value) == ppn)
                    .ok_or_else(|| {
                        Error::Corrupt(String::from("no grandparent entry for collapsed page"))
                    })?;
                let old_gp_key = gp.objects()[gpos].key.clone();
                let gp_was_head = gpos == 0;
                gp.delete(&old_gp_key, 0);
                gp.add(PageObject::new(survivor.key.clone(), survivor.value.clone(), 0, 0), ps)?;
                self.store(gpn, &gp)?;
                doomed.push(ppn);
                if gp_was_head && old_gp_key != survivor.key {
                    self.refresh_head(&path[..level - 2], &old_gp_key, &survivor.key)?;
                }
                return Ok(());
            }
            self.store(ppn, &parent)?;
            if pos == 0 && entry_key != parent_head {
                self.refresh_head(&path[..level - 1], &entry_key, &parent_head)?;
            }
            return Ok(());
        }
    }

    /// Reclaims freed pages: a doomed last page is truncated off; an
    /// interior hole is filled by swapping the last page in and patching
    /// whatever pointed at it. Highest-numbered pages go first so a swap
    /// never moves another doomed page.
    fn free_pages(&mut self, mut doomed: Vec<PageNum>) -> Result<()> {
        while !doomed.is_empty() {
            let (i, _) = doomed
                .iter()
                .enumerate()
                .max_by_key(|(_, p)| **p)
                .expect("doomed nonempty");
            let pn = doomed.remove(i);
            let last = self.pager.total_pages() - 1;
            if pn == last {
                self.pager.truncate_last_page()?;
                self.touched.remove(&pn);
                continue;
            }
            let moved = self.pager.fetch_page(last)?;
            self.store(pn, &moved)?;
            if self.pager.root_page() == last {
                self.pager.set_root_page(pn)?;
            } else {
                self.repoint_parent(last, pn, &moved)?;
            }
            self.pager.truncate_last_page()?;
            self.touched.remove(&last);
        }
        Ok(())
    }

    /// After the page at `old` moved to `new`, finds the one non-leaf entry
    /// holding `old` and repoints it. Descends by the moved page's head key,
    /// checking every entry value along the way.
    fn repoint_parent(&mut self, old: PageNum, new: PageNum, moved: &Page) -> Result<()> {
        let ps = self.pager.page_size();
        let head_key = moved
            .head()
            .map(|o| o.key.clone())
            .ok_or_else(|| Error::Corrupt(String::from("moved page is empty")))?;
        let mut pn = self.pager.root_page();
        loop {
            let mut page = self.pager.fetch_page(pn)?;
            if page.kind == PageKind::Leaf {
                return Err(Error::Corrupt(String::from("no parent entry for moved page")));
            }
            if let Some(pos) = page
                .objects()
                .iter()
                .position(|o| o.value.len() == 4 && BigEndian::read_u32(&o.value) == old)
            {
                let key = page.objects()[pos].key.clone();
                page.replace(&key, 0, child_value(new), ps)?;
                self.store(pn, &page)?;
                return Ok(());
            }
            let idx = child_index(&page, &head_key);
            pn = child_page(&page.objects()[idx])?;
        }
    }

    /// Collects, from the first leaf holding keys ≥ `from`, every object
    /// with key ≥ `from`. Returns empty when no such leaf remains. The range
    /// iterator calls this once per leaf, re-descending from the root.
    pub(crate) fn leaf_objects_from(&mut self, from: &[u8]) -> Result<Vec<PageObject>> {
        if self.pager.total_pages() == 0 {
            return Ok(vec![]);
        }
        let root = self.pager.root_page();
        self.collect_from(root, from)
    }

    fn collect_from(&mut self, pn: PageNum, from: &[u8]) -> Result<Vec<PageObject>> {
        let page = self.pager.fetch_page(pn)?;
        match page.kind {
            PageKind::Leaf => Ok(page
                .objects()
                .iter()
                .filter(|o| o.key.as_slice() >= from)
                .cloned()
                .collect()),
            PageKind::NonLeaf => {
                let start = child_index(&page, from);
                for i in start..page.len() {
                    let child = child_page(&page.objects()[i])?;
                    let batch = self.collect_from(child, from)?;
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
                Ok(vec![])
            }
        }
    }
}

/// Distributes pre-sorted objects into two halves, each at most half the
/// total byte count (lower keys stay left on a tie), shifting the boundary
/// so two versions of one key never land on different pages.
fn split_objects(objects: Vec<PageObject>) -> (Vec<PageObject>, Vec<PageObject>) {
    debug_assert!(objects.len() >= 2);
    let total: usize = objects.iter().map(|o| o.serialized_len()).sum();
    let half = total / 2;
    let mut acc = 0;
    let mut boundary = objects.len() - 1;
    for (i, o) in objects.iter().enumerate() {
        if acc + o.serialized_len() > half {
            boundary = i;
            break;
        }
        acc += o.serialized_len();
    }
    let mut boundary = boundary.clamp(1, objects.len() - 1);
    while boundary > 1 && objects[boundary].key == objects[boundary - 1].key {
        boundary -= 1;
    }
    if boundary == 1 && objects.len() > 2 && objects[1].key == objects[0].key {
        boundary = 2;
    }
    let mut left = objects;
    let right = left.split_off(boundary);
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbheader::MIN_PAGE_SIZE;

    fn obj(key: &str, value: &str) -> PageObject {
        PageObject::new(key.as_bytes().to_vec(), value.as_bytes().to_vec(), 1, 0)
    }

    fn small_tree() -> Btree {
        // A 64-byte page fits two ~22-byte objects, forcing splits early.
        Btree::new(Pager::open_memory(MIN_PAGE_SIZE))
    }

    fn scan_all(bt: &mut Btree) -> Vec<String> {
        let mut out = vec![];
        let mut it = bt.new_range_iterator(vec![], None);
        while let Some(o) = it.next_object().unwrap() {
            out.push(String::from_utf8(o.key).unwrap());
        }
        out
    }

    /// Walks the whole tree checking the structural invariants: sorted keys
    /// in every page, every non-leaf entry key equal to the head key of its
    /// child subtree, and no empty page below a non-leaf.
    fn check_invariants(bt: &mut Btree) {
        let root = bt.pager().root_page();
        if bt.pager().total_pages() == 0 {
            return;
        }
        check_subtree(bt, root, true);
    }

    fn check_subtree(bt: &mut Btree, pn: PageNum, is_root: bool) -> Option<Vec<u8>> {
        let page = bt.pager_mut().fetch_page(pn).unwrap();
        let keys: Vec<&[u8]> = page.objects().iter().map(|o| o.key.as_slice()).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "page {} keys out of order", pn);
        if !is_root {
            assert!(!page.is_empty(), "empty non-root page {}", pn);
        }
        match page.kind {
            PageKind::Leaf => page.head().map(|o| o.key.clone()),
            PageKind::NonLeaf => {
                let mut head = None;
                for entry in page.objects() {
                    let child = child_page(entry).unwrap();
                    let child_head = check_subtree(bt, child, false)
                        .expect("non-leaf child subtree must hold keys");
                    assert_eq!(
                        entry.key, child_head,
                        "entry key does not match child {} head",
                        child
                    );
                    if head.is_none() {
                        head = Some(child_head);
                    }
                }
                head
            }
        }
    }

    #[test]
    fn test_single_leaf_add_and_scan() {
        let mut bt = small_tree();
        bt.add(obj("b", "2")).unwrap();
        bt.add(obj("a", "1")).unwrap();
        assert_eq!(scan_all(&mut bt), vec!["a", "b"]);
        assert_eq!(bt.pager().total_pages(), 1);
        check_invariants(&mut bt);
    }

    #[test]
    fn test_split_grows_new_root() {
        let mut bt = small_tree();
        for i in 0..8 {
            bt.add(obj(&format!("k{:03}", i), "v")).unwrap();
        }
        assert!(bt.pager().total_pages() > 1);
        let root_page = bt.pager().root_page();
        let root = bt.pager_mut().fetch_page(root_page).unwrap();
        assert_eq!(root.kind, PageKind::NonLeaf);
        assert_eq!(
            scan_all(&mut bt),
            (0..8).map(|i| format!("k{:03}", i)).collect::<Vec<_>>()
        );
        check_invariants(&mut bt);
    }

    #[test]
    fn test_many_inserts_stay_ordered() {
        let mut bt = small_tree();
        // Insert in a scrambled order to exercise front inserts and head
        // propagation.
        let mut keys: Vec<u32> = (0..200).collect();
        keys.reverse();
        for k in &keys {
            bt.add(obj(&format!("k{:05}", k), "val")).unwrap();
        }
        check_invariants(&mut bt);
        let scanned = scan_all(&mut bt);
        assert_eq!(scanned.len(), 200);
        assert_eq!(scanned, {
            let mut s = scanned.clone();
            s.sort();
            s
        });
    }

    #[test]
    fn test_range_iterator_half_open() {
        let mut bt = small_tree();
        for i in 0..20 {
            bt.add(obj(&format!("k{:03}", i), "v")).unwrap();
        }
        let mut it = bt.new_range_iterator(b"k005".to_vec(), Some(b"k010".to_vec()));
        let mut got = vec![];
        while let Some(o) = it.next_object().unwrap() {
            got.push(String::from_utf8(o.key).unwrap());
        }
        assert_eq!(got, vec!["k005", "k006", "k007", "k008", "k009"]);
    }

    #[test]
    fn test_range_iterator_start_between_keys() {
        let mut bt = small_tree();
        for i in (0..20).step_by(2) {
            bt.add(obj(&format!("k{:03}", i), "v")).unwrap();
        }
        let mut it = bt.new_range_iterator(b"k005".to_vec(), Some(b"k009".to_vec()));
        let mut got = vec![];
        while let Some(o) = it.next_object().unwrap() {
            got.push(String::from_utf8(o.key).unwrap());
        }
        assert_eq!(got, vec!["k006", "k008"]);
    }

    #[test]
    fn test_expire_and_revive() {
        let mut bt = small_tree();
        bt.add(obj("k", "v")).unwrap();
        assert!(bt.expire(b"k", 1, 9).unwrap());
        let mut it = bt.new_range_iterator(vec![], None);
        assert_eq!(it.next_object().unwrap().unwrap().xid, 9);
        assert!(bt.expire(b"k", 1, 0).unwrap());
        let mut it = bt.new_range_iterator(vec![], None);
        assert!(it.next_object().unwrap().unwrap().is_live());
        assert!(!bt.expire(b"missing", 1, 9).unwrap());
    }

    #[test]
    fn test_remove_returns_tree_to_empty() {
        let mut bt = small_tree();
        for i in 0..100 {
            bt.add(obj(&format!("k{:05}", i), "value")).unwrap();
        }
        assert!(bt.pager().total_pages() > 3);
        check_invariants(&mut bt);
        for i in 0..100 {
            assert!(bt.remove(format!("k{:05}", i).as_bytes(), 1).unwrap());
            check_invariants(&mut bt);
        }
        // All pages reclaimed except the reserved empty root.
        assert_eq!(bt.pager().total_pages(), 1);
        let root_page = bt.pager().root_page();
        let root = bt.pager_mut().fetch_page(root_page).unwrap();
        assert_eq!(root.kind, PageKind::Leaf);
        assert!(root.is_empty());
    }

    #[test]
    fn test_remove_interleaved_with_scans() {
        let mut bt = small_tree();
        for i in 0..60 {
            bt.add(obj(&format!("k{:05}", i), "value")).unwrap();
        }
        // Remove every other key, back to front.
        for i in (0..60).rev().step_by(2) {
            assert!(bt.remove(format!("k{:05}", i).as_bytes(), 1).unwrap());
        }
        check_invariants(&mut bt);
        let got = scan_all(&mut bt);
        let want: Vec<String> = (1..60).step_by(2).map(|i| format!("k{:05}", i)).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut bt = small_tree();
        bt.add(obj("k", "v")).unwrap();
        assert!(bt.remove(b"k", 1).unwrap());
        assert!(!bt.remove(b"k", 1).unwrap());
    }

    #[test]
    fn test_remove_matches_tid() {
        let mut bt = small_tree();
        bt.add(obj("k", "v")).unwrap();
        assert!(!bt.remove(b"k", 2).unwrap());
        assert_eq!(scan_all(&mut bt), vec!["k"]);
    }

    #[test]
    fn test_add_conflict_leaves_tree_unchanged() {
        let mut bt = small_tree();
        bt.add(obj("k", "v")).unwrap();
        let pages_before = bt.pager().total_pages();
        let second = PageObject::new(b"k".to_vec(), b"other".to_vec(), 2, 0);
        assert!(matches!(bt.add(second), Err(Error::SerializationFailure)));
        assert_eq!(bt.pager().total_pages(), pages_before);
        check_invariants(&mut bt);
    }

    #[test]
    fn test_update_in_place() {
        let mut bt = small_tree();
        bt.add(obj("k", "v0")).unwrap();
        let old = obj("k", "v0");
        let new = PageObject::new(b"k".to_vec(), b"v1".to_vec(), 5, 0);
        bt.update(&old, new, 5).unwrap();
        let mut it = bt.new_range_iterator(vec![], None);
        let first = it.next_object().unwrap().unwrap();
        assert_eq!(first.xid, 5); // frozen version expired in place
        let second = it.next_object().unwrap().unwrap();
        assert_eq!(second.value, b"v1");
        assert!(it.next_object().unwrap().is_none());
    }

    #[test]
    fn test_touched_pages_tracked() {
        let mut bt = small_tree();
        bt.add(obj("a", "1")).unwrap();
        let touched = bt.take_touched();
        assert!(touched.contains(&0));
        assert!(bt.take_touched().is_empty());
    }

    #[test]
    fn test_split_objects_keeps_versions_together() {
        let objects = vec![
            PageObject::new(b"a".to_vec(), b"1111".to_vec(), 1, 0),
            PageObject::new(b"b".to_vec(), b"2222".to_vec(), 1, 2),
            PageObject::new(b"b".to_vec(), b"3333".to_vec(), 2, 0),
            PageObject::new(b"c".to_vec(), b"4444".to_vec(), 1, 0),
        ];
        let (left, right) = split_objects(objects);
        let split_key_crosses = left.last().unwrap().key == right.first().unwrap().key;
        assert!(!split_key_crosses);
    }
}
