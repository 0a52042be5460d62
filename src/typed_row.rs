//! Provides access to stored rows in typed form.
//!
//! A row is a mapping from column name to value plus the opaque row
//! identifier assigned at insert. Rows additionally remember the creator
//! transaction of the stored version they were decoded from: expiring a row
//! means stamping that exact version, so the tid has to travel with the row
//! through the executor and back down.
//!
//! The stored form is self-describing (column names and declared types are
//! part of the payload), so a row can be decoded without consulting the
//! catalog:
//!
//! ```text
//! [2 bytes column count]
//! per column:
//!   [2 bytes name length][name]
//!   [1 byte type code][4 bytes type parameter]
//!   [1 byte null flag]
//!   payload: bool 1 byte / number 8 bytes f64 / text [2 bytes length][bytes]
//! ```

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::record::PageObject;
use crate::sql_type::SqlType;
use crate::sql_value::{Datum, SqlValue};

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub row_id: i64,
    /// Creator transaction of the version this row was decoded from.
    pub tid: u32,
    pub items: HashMap<String, SqlValue>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.items.get(column)
    }
}

/// Serializes the values of one row in the given column order.
pub fn serialize_values(values: &[(&str, &SqlValue)]) -> Vec<u8> {
    let mut buf = vec![0_u8; 2];
    BigEndian::write_u16(&mut buf[0..2], values.len() as u16);
    for (name, value) in values {
        let name_bytes = name.as_bytes();
        push_u16(&mut buf, name_bytes.len() as u16);
        buf.extend_from_slice(name_bytes);
        let (code, param) = value.sql_type.to_code();
        buf.push(code);
        push_u32(&mut buf, param);
        match &value.datum {
            Datum::Null => buf.push(1),
            Datum::Bool(b) => {
                buf.push(0);
                buf.push(*b as u8);
            }
            Datum::Num(x) => {
                buf.push(0);
                let mut num = [0_u8; 8];
                BigEndian::write_f64(&mut num, *x);
                buf.extend_from_slice(&num);
            }
            Datum::Text(s) => {
                buf.push(0);
                push_u16(&mut buf, s.len() as u16);
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }
    buf
}

/// Parses a serialized row payload back into (column name, value) pairs, in
/// stored order.
pub fn parse_values(buf: &[u8]) -> Result<Vec<(String, SqlValue)>> {
    let mut r = Reader { buf, offset: 0 };
    let count = r.u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = r.u16()? as usize;
        let name = String::from_utf8(r.bytes(name_len)?.to_vec())
            .map_err(|_| Error::Corrupt(String::from("column name is not utf-8")))?;
        let code = r.u8()?;
        let param = r.u32()?;
        let sql_type = SqlType::from_code(code, param)
            .ok_or_else(|| Error::Corrupt(format!("unknown column type code {}", code)))?;
        let is_null = r.u8()? != 0;
        let datum = if is_null {
            Datum::Null
        } else if sql_type == SqlType::Boolean {
            Datum::Bool(r.u8()? != 0)
        } else if sql_type.is_numeric() {
            Datum::Num(r.f64()?)
        } else {
            let len = r.u16()? as usize;
            let text = String::from_utf8(r.bytes(len)?.to_vec())
                .map_err(|_| Error::Corrupt(String::from("text value is not utf-8")))?;
            Datum::Text(text)
        };
        out.push((name, SqlValue { sql_type, datum }));
    }
    Ok(out)
}

/// Decodes a stored object into a typed row. The row id comes from the key
/// (the caller parses it; key layout belongs to the schema layer).
pub fn row_from_object(obj: &PageObject, row_id: i64) -> Result<Row> {
    let items = parse_values(&obj.value)?
        .into_iter()
        .collect::<HashMap<String, SqlValue>>();
    Ok(Row { row_id, tid: obj.tid, items })
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

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.buf.len() {
            return Err(Error::Corrupt(String::from("row payload truncated")));
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

    fn f64(&mut self) -> Result<f64> {
        Ok(BigEndian::read_f64(self.bytes(8)?))
    }
}
