//! Dictionary value: a tagged union carrying one of the payload kinds of
//! spec §3 "Dictionary value", reference-counted via `Arc` (Rust's
//! allocator already gives us the "refcount, freed when it reaches zero"
//! behavior the source hand-rolled with `is_static`/`refcount`, so this
//! module does not reimplement a manual counter — see DESIGN.md).

use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, ShardError};
use crate::iatt::{Gfid, Iatt, Mdata, IATT_WIRE_LEN, MDATA_WIRE_LEN};

/// The payload carried by a dictionary value.
///
/// `LegacyBytes` is the wire-deserialized placeholder tag: every value
/// read off the wire (§6 "Dictionary wire format") arrives untyped and is
/// reinterpreted by whichever typed getter the reader calls, exactly as
/// the source's `string-old-version` compatibility tag works (§3).
#[derive(Debug, Clone)]
pub enum ValueData {
    Int64(i64),
    Int32(i32),
    Int16(i16),
    Int8(i8),
    Uint64(u64),
    Uint32(u32),
    Uint16(u16),
    Double(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Uuid(Gfid),
    Iatt(Iatt),
    Mdata(Mdata),
    LegacyBytes(Arc<[u8]>),
}

/// A dictionary value. Cheap to clone (`Arc` clone), matching `dict_ref`/
/// `dict_unref` in the source.
#[derive(Debug, Clone)]
pub struct Value(Arc<ValueData>);

impl Value {
    pub fn new(data: ValueData) -> Self {
        Self(Arc::new(data))
    }

    pub fn int64(v: i64) -> Self {
        Self::new(ValueData::Int64(v))
    }
    pub fn int32(v: i32) -> Self {
        Self::new(ValueData::Int32(v))
    }
    pub fn uint64(v: u64) -> Self {
        Self::new(ValueData::Uint64(v))
    }
    pub fn uint32(v: u32) -> Self {
        Self::new(ValueData::Uint32(v))
    }
    pub fn str(v: impl Into<Arc<str>>) -> Self {
        Self::new(ValueData::Str(v.into()))
    }
    pub fn bytes(v: impl Into<Arc<[u8]>>) -> Self {
        Self::new(ValueData::Bytes(v.into()))
    }
    pub fn uuid(v: Gfid) -> Self {
        Self::new(ValueData::Uuid(v))
    }
    pub fn iatt(v: Iatt) -> Self {
        Self::new(ValueData::Iatt(v))
    }
    pub fn mdata(v: Mdata) -> Self {
        Self::new(ValueData::Mdata(v))
    }
    pub fn legacy_bytes(v: impl Into<Arc<[u8]>>) -> Self {
        Self::new(ValueData::LegacyBytes(v.into()))
    }

    pub fn data(&self) -> &ValueData {
        &self.0
    }

    /// Exact byte length this value would occupy on the wire, including
    /// the trailing NUL for string form (§3 "length field").
    pub fn wire_len(&self) -> usize {
        match &*self.0 {
            ValueData::Int64(_) | ValueData::Uint64(_) | ValueData::Double(_) => 8,
            ValueData::Int32(_) | ValueData::Uint32(_) => 4,
            ValueData::Int16(_) | ValueData::Uint16(_) => 2,
            ValueData::Int8(_) => 1,
            ValueData::Str(s) => s.len() + 1,
            ValueData::Bytes(b) | ValueData::LegacyBytes(b) => b.len(),
            ValueData::Uuid(_) => 16,
            ValueData::Iatt(_) => IATT_WIRE_LEN,
            ValueData::Mdata(_) => MDATA_WIRE_LEN,
        }
    }

    fn mismatch(&self, key: &str, wanted: &str) -> ShardError {
        warn!(component = "dict", event = "type_mismatch", key, wanted, "dictionary value type mismatch");
        ShardError::InvalidArgument(format!("key {key}: expected {wanted}"))
    }

    pub fn as_int64(&self, key: &str) -> Result<i64> {
        match &*self.0 {
            ValueData::Int64(v) => Ok(*v),
            ValueData::LegacyBytes(b) if b.len() == 8 => Ok(i64::from_be_bytes(b[..8].try_into().unwrap())),
            _ => Err(self.mismatch(key, "int64")),
        }
    }

    pub fn as_int32(&self, key: &str) -> Result<i32> {
        match &*self.0 {
            ValueData::Int32(v) => Ok(*v),
            ValueData::LegacyBytes(b) if b.len() == 4 => Ok(i32::from_be_bytes(b[..4].try_into().unwrap())),
            _ => Err(self.mismatch(key, "int32")),
        }
    }

    /// Besides the typed `Uint64` tag, a wire-deserialized `LegacyBytes`
    /// of exactly 8 bytes decodes as a big-endian word (§6).
    pub fn as_uint64(&self, key: &str) -> Result<u64> {
        match &*self.0 {
            ValueData::Uint64(v) => Ok(*v),
            ValueData::LegacyBytes(b) if b.len() == 8 => Ok(u64::from_be_bytes(b[..8].try_into().unwrap())),
            _ => Err(self.mismatch(key, "uint64")),
        }
    }

    pub fn as_uint32(&self, key: &str) -> Result<u32> {
        match &*self.0 {
            ValueData::Uint32(v) => Ok(*v),
            ValueData::LegacyBytes(b) if b.len() == 4 => Ok(u32::from_be_bytes(b[..4].try_into().unwrap())),
            _ => Err(self.mismatch(key, "uint32")),
        }
    }

    /// String getter: the legacy wire tag is assignable to any string
    /// reader for backward compatibility (§3).
    pub fn as_str(&self, key: &str) -> Result<Arc<str>> {
        match &*self.0 {
            ValueData::Str(s) => Ok(s.clone()),
            ValueData::LegacyBytes(b) => {
                let b = b.strip_suffix(&[0u8]).unwrap_or(b);
                Ok(Arc::from(String::from_utf8_lossy(b).into_owned()))
            }
            _ => Err(self.mismatch(key, "string")),
        }
    }

    pub fn as_bytes(&self, key: &str) -> Result<Arc<[u8]>> {
        match &*self.0 {
            ValueData::Bytes(b) | ValueData::LegacyBytes(b) => Ok(b.clone()),
            _ => Err(self.mismatch(key, "bytes")),
        }
    }

    pub fn as_uuid(&self, key: &str) -> Result<Gfid> {
        match &*self.0 {
            ValueData::Uuid(u) => Ok(*u),
            _ => Err(self.mismatch(key, "uuid")),
        }
    }

    pub fn as_iatt(&self, key: &str) -> Result<Iatt> {
        match &*self.0 {
            ValueData::Iatt(i) => Ok(*i),
            ValueData::LegacyBytes(b) => Iatt::from_wire_bytes(b).ok_or_else(|| self.mismatch(key, "iatt")),
            _ => Err(self.mismatch(key, "iatt")),
        }
    }

    pub fn as_mdata(&self, key: &str) -> Result<Mdata> {
        match &*self.0 {
            ValueData::Mdata(m) => Ok(*m),
            ValueData::LegacyBytes(b) => Mdata::from_wire_bytes(b).ok_or_else(|| self.mismatch(key, "mdata")),
            _ => Err(self.mismatch(key, "mdata")),
        }
    }
}
