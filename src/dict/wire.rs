//! Dictionary wire format (spec §6):
//!
//! ```text
//!  4 bytes  pair count                    (big-endian)
//!  then per pair, repeated count times:
//!    4 bytes keylen                       (big-endian)
//!    4 bytes vallen                       (big-endian)
//!    keylen bytes  key                    (not NUL terminated on wire)
//!    1 byte        NUL
//!    vallen bytes  value                  (raw bytes)
//! ```
//!
//! Every value unserializes as `LegacyBytes` (the tag is not on the
//! wire); typed getters reinterpret it afterward.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use super::{Dict, Value};
use crate::error::{Result, ShardError};

impl Dict {
    /// Total serialized length: `4 + sum(4 + 4 + keylen + 1 + vallen)`.
    pub fn serialized_len(&self) -> usize {
        let inner = self.inner.lock();
        let mut total = 4usize;
        for pair in inner.pairs.iter().flatten() {
            total += 4 + 4 + pair.key.len() + 1 + pair.value.wire_len();
        }
        total
    }

    pub fn serialize(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<BigEndian>(inner.count as u32).unwrap();
        for pair in inner.pairs.iter().flatten() {
            let val_bytes = value_wire_bytes(&pair.value);
            buf.write_u32::<BigEndian>(pair.key.len() as u32).unwrap();
            buf.write_u32::<BigEndian>(val_bytes.len() as u32).unwrap();
            buf.extend_from_slice(pair.key.as_bytes());
            buf.write_u8(0).unwrap();
            buf.extend_from_slice(&val_bytes);
        }
        buf
    }

    /// Bounds-checks every step against `buf`'s length, failing cleanly
    /// with `InvalidArgument` ("undersized buffer"); negative keylen/
    /// vallen (i.e. a value not representable as u32) is a format error.
    pub fn unserialize(buf: &[u8]) -> Result<Dict> {
        let mut cur = Cursor::new(buf);
        let count = read_u32(&mut cur, "pair count")?;
        let dict = Dict::new(if count <= 1 { 1 } else { count as usize });
        for _ in 0..count {
            let keylen = read_u32(&mut cur, "keylen")? as usize;
            let vallen = read_u32(&mut cur, "vallen")? as usize;
            let key = read_exact(&mut cur, keylen, "key")?;
            let key = String::from_utf8(key)
                .map_err(|_| ShardError::InvalidArgument("key is not valid utf-8".into()))?;
            let nul = read_exact(&mut cur, 1, "key terminator")?;
            if nul != [0u8] {
                return Err(ShardError::InvalidArgument("missing key NUL terminator".into()));
            }
            let value = read_exact(&mut cur, vallen, "value")?;
            dict.add(&key, Value::legacy_bytes(value));
        }
        Ok(dict)
    }
}

fn value_wire_bytes(v: &Value) -> Vec<u8> {
    use super::ValueData::*;
    match v.data() {
        Int64(x) => x.to_be_bytes().to_vec(),
        Int32(x) => x.to_be_bytes().to_vec(),
        Int16(x) => x.to_be_bytes().to_vec(),
        Int8(x) => x.to_be_bytes().to_vec(),
        Uint64(x) => x.to_be_bytes().to_vec(),
        Uint32(x) => x.to_be_bytes().to_vec(),
        Uint16(x) => x.to_be_bytes().to_vec(),
        Double(x) => x.to_be_bytes().to_vec(),
        Str(s) => {
            let mut v = s.as_bytes().to_vec();
            v.push(0);
            v
        }
        Bytes(b) | LegacyBytes(b) => b.to_vec(),
        Uuid(u) => u.as_bytes().to_vec(),
        Iatt(i) => i.to_wire_bytes(),
        Mdata(m) => m.to_wire_bytes(),
    }
}

fn read_u32(cur: &mut Cursor<&[u8]>, what: &str) -> Result<u32> {
    cur.read_u32::<BigEndian>()
        .map_err(|_| ShardError::InvalidArgument(format!("undersized buffer reading {what}")))
}

fn read_exact(cur: &mut Cursor<&[u8]>, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    cur.read_exact(&mut out)
        .map_err(|_| ShardError::InvalidArgument(format!("undersized buffer reading {what}")))?;
    Ok(out)
}
