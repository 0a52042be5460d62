//! Table and column descriptors, the catalog record codec, and the key
//! prefix scheme that namespaces everything in the single shared key space.
//!
//! Key layout, all integers big-endian:
//!
//! ```text
//! catalog record:  [0x01][uppercase table name]
//! row record:      [0x02][4 bytes table id][8 bytes row id]
//! ```
//!
//! Byte-wise comparison of these keys gives: the whole catalog before any
//! row, rows clustered by table id, and rows within one table ordered by
//! row id. A table's scan range is therefore the half-open prefix range up
//! to the next table id.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::sql_type::SqlType;

pub const CATALOG_PREFIX: u8 = 0x01;
pub const ROW_PREFIX: u8 = 0x02;

const ROW_KEY_LEN: usize = 1 + 4 + 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Stable small-integer identifier, allocated from the header counter.
    pub id: u32,
    /// Case-insensitive; folded to uppercase everywhere.
    pub name: String,
    pub columns: Vec<Column>,
    /// Optional single-column integer primary key.
    pub primary_key: Option<String>,
    /// Creator transaction of the catalog record this descriptor was decoded
    /// from; expiring the record on DROP TABLE needs it. Zero for a
    /// descriptor not yet persisted.
    pub tid: u32,
}

pub fn catalog_key(table_name: &str) -> Vec<u8> {
    let mut key = vec![CATALOG_PREFIX];
    key.extend_from_slice(table_name.to_uppercase().as_bytes());
    key
}

/// The half-open key range holding every catalog record.
pub fn catalog_range() -> (Vec<u8>, Vec<u8>) {
    (vec![CATALOG_PREFIX], vec![ROW_PREFIX])
}

pub fn row_id_from_key(key: &[u8]) -> Result<i64> {
    if key.len() != ROW_KEY_LEN || key[0] != ROW_PREFIX {
        return Err(Error::Corrupt(String::from("not a row key")));
    }
    Ok(BigEndian::read_u64(&key[5..13]) as i64)
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// The B-tree key for one row of this table.
    pub fn row_key(&self, row_id: i64) -> Vec<u8> {
        let mut key = vec![0_u8; ROW_KEY_LEN];
        key[0] = ROW_PREFIX;
        BigEndian::write_u32(&mut key[1..5], self.id);
        BigEndian::write_u64(&mut key[5..13], row_id as u64);
        key
    }

    /// The half-open key range holding every row of this table.
    pub fn row_range(&self) -> (Vec<u8>, Vec<u8>) {
        let mut start = vec![0_u8; 5];
        start[0] = ROW_PREFIX;
        BigEndian::write_u32(&mut start[1..5], self.id);
        let mut end = vec![0_u8; 5];
        end[0] = ROW_PREFIX;
        BigEndian::write_u32(&mut end[1..5], self.id + 1);
        (start, end)
    }

    /// Serializes the descriptor as the value of its catalog record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![];
        push_u32(&mut buf, self.id);
        push_str(&mut buf, &self.name);
        match &self.primary_key {
            None => buf.push(0),
            Some(pk) => {
                buf.push(1);
                push_str(&mut buf, pk);
            }
        }
        push_u16(&mut buf, self.columns.len() as u16);
        for col in &self.columns {
            push_str(&mut buf, &col.name);
            let (code, param) = col.sql_type.to_code();
            buf.push(code);
            push_u32(&mut buf, param);
            buf.push(col.not_null as u8);
        }
        buf
    }

    /// Decodes a catalog record value; `tid` is the creator stamp of the
    /// record it came from.
    pub fn decode(buf: &[u8], tid: u32) -> Result<Table> {
        let mut r = Reader { buf, offset: 0 };
        let id = r.u32()?;
        let name = r.string()?;
        let primary_key = match r.u8()? {
            0 => None,
            _ => Some(r.string()?),
        };
        let col_count = r.u16()? as usize;
        let mut columns = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            let col_name = r.string()?;
            let code = r.u8()?;
            let param = r.u32()?;
            let sql_type = SqlType::from_code(code, param)
                .ok_or_else(|| Error::Corrupt(format!("unknown column type code {}", code)))?;
            let not_null = r.u8()? != 0;
            columns.push(Column { name: col_name, sql_type, not_null });
        }
        Ok(Table { id, name, columns, primary_key, tid })
    }
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    let mut b = [0_u8; 2];
    BigEndian::write_u16(&mut b, v);
    buf.extend_from_slice(&b);
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    let mut b = [0_u8; 4];
    BigEndian::write_u32(&mut b, v);
    buf.extend_from_slice(&b);
}

fn push_str(buf: &mut Vec<u8>, s: &str) {
    push_u16(buf, s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.buf.len() {
            return Err(Error::Corrupt(String::from("catalog record truncated")));
        }
        let s = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.bytes(4)?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        String::from_utf8(self.bytes(len)?.to_vec())
            .map_err(|_| Error::Corrupt(String::from("catalog string is not utf-8")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table {
            id: 3,
            name: String::from("PEOPLE"),
            columns: vec![
                Column { name: String::from("ID"), sql_type: SqlType::Int, not_null: true },
                Column {
                    name: String::from("NAME"),
                    sql_type: SqlType::Varchar(40),
                    not_null: false,
                },
            ],
            primary_key: Some(String::from("ID")),
            tid: 0,
        }
    }

    #[test]
    fn test_catalog_record_round_trip() {
        let t = sample_table();
        let decoded = Table::decode(&t.encode(), 5).unwrap();
        assert_eq!(decoded.id, t.id);
        assert_eq!(decoded.name, t.name);
        assert_eq!(decoded.columns, t.columns);
        assert_eq!(decoded.primary_key, t.primary_key);
        assert_eq!(decoded.tid, 5);
    }

    #[test]
    fn test_key_space_ordering() {
        let t = sample_table();
        let (cat_start, cat_end) = catalog_range();
        let ck = catalog_key("PEOPLE");
        assert!(cat_start <= ck && ck < cat_end);
        // Every catalog key sorts before every row key.
        assert!(ck < t.row_key(0));
        // Rows cluster by table and order by row id.
        let (start, end) = t.row_range();
        let k1 = t.row_key(1);
        let k2 = t.row_key(2);
        assert!(start <= k1 && k1 < k2 && k2 < end);
        let other = Table { id: 4, ..sample_table() };
        assert!(end <= other.row_key(0));
    }

    #[test]
    fn test_row_id_round_trip() {
        let t = sample_table();
        assert_eq!(row_id_from_key(&t.row_key(12345)).unwrap(), 12345);
        assert!(row_id_from_key(&catalog_key("PEOPLE")).is_err());
    }

    #[test]
    fn test_catalog_key_folds_case() {
        assert_eq!(catalog_key("people"), catalog_key("PEOPLE"));
    }
}
