//! `iatt`: the fixed-layout stat-like structure carried through the stack
//! (GLOSSARY), plus the fixed `mdata` timestamp structure referenced by
//! the dictionary value tags (§3).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;
use uuid::Uuid;

/// 128-bit cluster-wide file identifier (GLOSSARY).
pub type Gfid = Uuid;

/// gfid preassigned to the internal `.shard/` directory (§6).
pub const SHARD_ROOT_GFID: Gfid = Uuid::from_u128(0xbe318638_e8a0_4c6d_977d_7a937aa84806);

/// gfid preassigned to `.shard/.remove_me/` (§6). Distinct fixed UUID.
pub const REMOVE_ME_GFID: Gfid = Uuid::from_u128(0xbe318638_e8a0_4c6d_977d_7a937aa84807);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IattType {
    Regular,
    Directory,
}

/// A stat-like snapshot of a file or directory, as returned by every
/// child call (GLOSSARY "iatt").
#[derive(Debug, Clone, Copy)]
pub struct Iatt {
    pub gfid: Gfid,
    pub ia_type: IattType,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u64,
    pub blksize: u32,
    pub atime_sec: i64,
    pub atime_nsec: u32,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub ctime_sec: i64,
    pub ctime_nsec: u32,
}

/// Byte width of [`Iatt::to_wire_bytes`]'s encoding (§6 `GF_POSTSTAT`/
/// `GF_PRESTAT` tag); `Value::wire_len` and `value_wire_bytes` both
/// derive from this constant so they can never drift apart.
pub const IATT_WIRE_LEN: usize = 16 + 1 + 8 + 8 + 4 + 4 + 4 + 4 + 8 + 4 + 8 + 4 + 8 + 4 + 8 + 4;

impl Iatt {
    pub fn zeroed(gfid: Gfid, ia_type: IattType) -> Self {
        Self {
            gfid,
            ia_type,
            size: 0,
            blocks: 0,
            nlink: 1,
            uid: 0,
            gid: 0,
            mode: 0o644,
            rdev: 0,
            blksize: 4096,
            atime_sec: 0,
            atime_nsec: 0,
            mtime_sec: 0,
            mtime_nsec: 0,
            ctime_sec: 0,
            ctime_nsec: 0,
        }
    }

    /// Fixed big-endian encoding used when this value crosses the wire
    /// as a dictionary value (§6).
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(IATT_WIRE_LEN);
        buf.extend_from_slice(self.gfid.as_bytes());
        buf.write_u8(match self.ia_type {
            IattType::Regular => 0,
            IattType::Directory => 1,
        })
        .unwrap();
        buf.write_u64::<BigEndian>(self.size).unwrap();
        buf.write_u64::<BigEndian>(self.blocks).unwrap();
        buf.write_u32::<BigEndian>(self.nlink).unwrap();
        buf.write_u32::<BigEndian>(self.uid).unwrap();
        buf.write_u32::<BigEndian>(self.gid).unwrap();
        buf.write_u32::<BigEndian>(self.mode).unwrap();
        buf.write_u64::<BigEndian>(self.rdev).unwrap();
        buf.write_u32::<BigEndian>(self.blksize).unwrap();
        buf.write_i64::<BigEndian>(self.atime_sec).unwrap();
        buf.write_u32::<BigEndian>(self.atime_nsec).unwrap();
        buf.write_i64::<BigEndian>(self.mtime_sec).unwrap();
        buf.write_u32::<BigEndian>(self.mtime_nsec).unwrap();
        buf.write_i64::<BigEndian>(self.ctime_sec).unwrap();
        buf.write_u32::<BigEndian>(self.ctime_nsec).unwrap();
        buf
    }

    /// Inverse of [`to_wire_bytes`](Self::to_wire_bytes); fails on anything
    /// but exactly [`IATT_WIRE_LEN`] bytes.
    pub fn from_wire_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != IATT_WIRE_LEN {
            return None;
        }
        let mut cur = std::io::Cursor::new(buf);
        let mut gfid_bytes = [0u8; 16];
        cur.read_exact(&mut gfid_bytes).ok()?;
        let ia_type = match cur.read_u8().ok()? {
            0 => IattType::Regular,
            1 => IattType::Directory,
            _ => return None,
        };
        Some(Self {
            gfid: Gfid::from_bytes(gfid_bytes),
            ia_type,
            size: cur.read_u64::<BigEndian>().ok()?,
            blocks: cur.read_u64::<BigEndian>().ok()?,
            nlink: cur.read_u32::<BigEndian>().ok()?,
            uid: cur.read_u32::<BigEndian>().ok()?,
            gid: cur.read_u32::<BigEndian>().ok()?,
            mode: cur.read_u32::<BigEndian>().ok()?,
            rdev: cur.read_u64::<BigEndian>().ok()?,
            blksize: cur.read_u32::<BigEndian>().ok()?,
            atime_sec: cur.read_i64::<BigEndian>().ok()?,
            atime_nsec: cur.read_u32::<BigEndian>().ok()?,
            mtime_sec: cur.read_i64::<BigEndian>().ok()?,
            mtime_nsec: cur.read_u32::<BigEndian>().ok()?,
            ctime_sec: cur.read_i64::<BigEndian>().ok()?,
            ctime_nsec: cur.read_u32::<BigEndian>().ok()?,
        })
    }
}

/// Byte width of [`Mdata::to_wire_bytes`]'s encoding.
pub const MDATA_WIRE_LEN: usize = 8 + 4 + 8 + 4 + 8 + 4;

/// Fixed `mdata` timestamp structure (§3 "Dictionary value").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mdata {
    pub atime_sec: i64,
    pub atime_nsec: u32,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub ctime_sec: i64,
    pub ctime_nsec: u32,
}

impl Mdata {
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MDATA_WIRE_LEN);
        buf.write_i64::<BigEndian>(self.atime_sec).unwrap();
        buf.write_u32::<BigEndian>(self.atime_nsec).unwrap();
        buf.write_i64::<BigEndian>(self.mtime_sec).unwrap();
        buf.write_u32::<BigEndian>(self.mtime_nsec).unwrap();
        buf.write_i64::<BigEndian>(self.ctime_sec).unwrap();
        buf.write_u32::<BigEndian>(self.ctime_nsec).unwrap();
        buf
    }

    pub fn from_wire_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != MDATA_WIRE_LEN {
            return None;
        }
        let mut cur = std::io::Cursor::new(buf);
        Some(Self {
            atime_sec: cur.read_i64::<BigEndian>().ok()?,
            atime_nsec: cur.read_u32::<BigEndian>().ok()?,
            mtime_sec: cur.read_i64::<BigEndian>().ok()?,
            mtime_nsec: cur.read_u32::<BigEndian>().ok()?,
            ctime_sec: cur.read_i64::<BigEndian>().ok()?,
            ctime_nsec: cur.read_u32::<BigEndian>().ok()?,
        })
    }
}
