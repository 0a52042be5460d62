//! Pages hold PageObjects, the stored unit of the B-tree.
//!
//! A PageObject is a key/value pair stamped with the transaction that
//! created it (`tid`) and the transaction that expired it (`xid`, zero while
//! the object is live). The multiversion record layer is built entirely out
//! of these two stamps: a delete never removes bytes in place, it fills in
//! `xid`, and physical removal is deferred to commit or rollback cleanup.
//!
//! Serialized form, all integers big-endian:
//!
//! ```text
//! [4 bytes total length][4 bytes tid][4 bytes xid][2 bytes key length][key][value]
//! ```

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Bytes before the key: length, tid, xid, key length.
pub const OBJECT_HEADER_SIZE: usize = 14;

/// Largest representable key, bounded by the 2-byte key length field.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageObject {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tid: u32,
    pub xid: u32,
}

impl PageObject {
    pub fn new(key: Vec<u8>, value: Vec<u8>, tid: u32, xid: u32) -> PageObject {
        debug_assert!(key.len() <= MAX_KEY_LEN);
        PageObject { key, value, tid, xid }
    }

    /// True while no transaction has expired this version.
    pub fn is_live(&self) -> bool {
        self.xid == 0
    }

    /// Total serialized size, including the length prefix itself.
    pub fn serialized_len(&self) -> usize {
        OBJECT_HEADER_SIZE + self.key.len() + self.value.len()
    }

    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        let mut hdr = [0_u8; OBJECT_HEADER_SIZE];
        BigEndian::write_u32(&mut hdr[0..4], self.serialized_len() as u32);
        BigEndian::write_u32(&mut hdr[4..8], self.tid);
        BigEndian::write_u32(&mut hdr[8..12], self.xid);
        BigEndian::write_u16(&mut hdr[12..14], self.key.len() as u16);
        buf.extend_from_slice(&hdr);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
    }

    /// Parses one object from the front of `buf`, returning the number of
    /// bytes consumed along with the object.
    pub fn parse(buf: &[u8]) -> Result<(usize, PageObject)> {
        if buf.len() < OBJECT_HEADER_SIZE {
            return Err(Error::Corrupt(String::from("truncated page object header")));
        }
        let total = BigEndian::read_u32(&buf[0..4]) as usize;
        let tid = BigEndian::read_u32(&buf[4..8]);
        let xid = BigEndian::read_u32(&buf[8..12]);
        let key_len = BigEndian::read_u16(&buf[12..14]) as usize;
        if total < OBJECT_HEADER_SIZE + key_len || buf.len() < total {
            return Err(Error::Corrupt(String::from("page object length out of bounds")));
        }
        let key = buf[OBJECT_HEADER_SIZE..OBJECT_HEADER_SIZE + key_len].to_vec();
        let value = buf[OBJECT_HEADER_SIZE + key_len..total].to_vec();
        Ok((total, PageObject { key, value, tid, xid }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let o = PageObject::new(vec![1, 2, 3], vec![9, 9, 9, 9], 7, 0);
        let mut buf = vec![];
        o.serialize_into(&mut buf);
        assert_eq!(buf.len(), o.serialized_len());
        let (consumed, parsed) = PageObject::parse(&buf).unwrap();
        assert_eq!(consumed, o.serialized_len());
        assert_eq!(parsed, o);
    }

    #[test]
    fn test_round_trip_empty_key_and_value() {
        let o = PageObject::new(vec![], vec![], 1, 2);
        let mut buf = vec![];
        o.serialize_into(&mut buf);
        assert_eq!(buf.len(), OBJECT_HEADER_SIZE);
        let (consumed, parsed) = PageObject::parse(&buf).unwrap();
        assert_eq!((consumed, parsed), (OBJECT_HEADER_SIZE, o));
    }

    #[test]
    fn test_parse_consumes_exactly_one_object() {
        let a = PageObject::new(vec![1], vec![10], 1, 0);
        let b = PageObject::new(vec![2], vec![20], 1, 0);
        let mut buf = vec![];
        a.serialize_into(&mut buf);
        b.serialize_into(&mut buf);
        let (n, first) = PageObject::parse(&buf).unwrap();
        assert_eq!(first, a);
        let (_, second) = PageObject::parse(&buf[n..]).unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let o = PageObject::new(vec![1, 2], vec![3, 4, 5], 1, 0);
        let mut buf = vec![];
        o.serialize_into(&mut buf);
        assert!(PageObject::parse(&buf[..buf.len() - 1]).is_err());
        assert!(PageObject::parse(&buf[..4]).is_err());
    }
}
