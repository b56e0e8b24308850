//! ESIOP: the same-system cross-domain tagged message family (spec.md
//! §6). Large payloads reference OS shared memory by address; small
//! replies ride inline under `IMMEDIATE_DATA_SIZE`.

use crate::stream::{StreamError, StreamIn, StreamOut};

/// One cache line minus the fixed header fields, matching the spec's
/// "typically one cache line minus header" sizing note.
pub const IMMEDIATE_DATA_SIZE: usize = 64 - 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsiopTag {
    Request = 0,
    Reply = 1,
    SystemException = 2,
    CancelRequest = 3,
    FtHb = 4,
}

impl EsiopTag {
    fn from_u8(v: u8) -> Result<Self, StreamError> {
        Ok(match v {
            0 => Self::Request,
            1 => Self::Reply,
            2 => Self::SystemException,
            3 => Self::CancelRequest,
            4 => Self::FtHb,
            _ => return Err(StreamError::Malformed),
        })
    }
}

/// A reference to a large out-of-line payload living in shared memory:
/// a platform-sized address plus length, both local to the two domains
/// sharing the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMemoryRef {
    pub address: usize,
    pub len: usize,
}

pub enum EsiopPayload {
    Immediate(Vec<u8>),
    Shared(SharedMemoryRef),
}

pub struct EsiopMessage {
    pub tag: EsiopTag,
    pub request_id: u32,
    pub payload: EsiopPayload,
}

const FLAG_IMMEDIATE_DATA: u8 = 0x01;

impl EsiopMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = StreamOut::new(true);
        out.write_u8(self.tag as u8);
        match &self.payload {
            EsiopPayload::Immediate(bytes) => {
                out.write_u8(FLAG_IMMEDIATE_DATA);
                out.write_u32(self.request_id);
                let elems: Vec<&[u8]> = bytes.iter().map(std::slice::from_ref).collect();
                out.write_seq(1, &elems);
            }
            EsiopPayload::Shared(shm) => {
                out.write_u8(0);
                out.write_u32(self.request_id);
                out.write_u64(shm.address as u64);
                out.write_u64(shm.len as u64);
            }
        }
        out.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StreamError> {
        let mut input = StreamIn::new(bytes, false);
        let mut tag_byte = [0u8; 1];
        input.read(1, 1, &mut tag_byte)?;
        let tag = EsiopTag::from_u8(tag_byte[0])?;
        let mut flag_byte = [0u8; 1];
        input.read(1, 1, &mut flag_byte)?;
        let request_id = input.read_u32()?;
        let payload = if flag_byte[0] & FLAG_IMMEDIATE_DATA != 0 {
            let elems = input.unmarshal_seq(1, 1)?;
            EsiopPayload::Immediate(elems.into_iter().flatten().collect())
        } else {
            let address = input.read_u64()? as usize;
            let len = input.read_u64()? as usize;
            EsiopPayload::Shared(SharedMemoryRef { address, len })
        };
        Ok(Self { tag, request_id, payload })
    }

    /// Picks immediate-inline vs shared-memory framing for `data` per
    /// [`IMMEDIATE_DATA_SIZE`].
    pub fn reply(request_id: u32, data: &[u8], shm_if_large: impl FnOnce(&[u8]) -> SharedMemoryRef) -> Self {
        let payload = if data.len() <= IMMEDIATE_DATA_SIZE {
            EsiopPayload::Immediate(data.to_vec())
        } else {
            EsiopPayload::Shared(shm_if_large(data))
        };
        Self { tag: EsiopTag::Reply, request_id, payload }
    }
}
