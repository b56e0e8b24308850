//! GIOP 1.2 message framing beyond the 12-octet header already built by
//! [`crate::stream::StreamOut::write_message_header`] (spec.md §6).

use crate::stream::{StreamError, StreamIn, StreamOut};

pub const MAGIC: &[u8; 4] = b"GIOP";
pub const MAJOR: u8 = 1;
pub const MINOR: u8 = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 0,
    Reply = 1,
    CancelRequest = 2,
    LocateRequest = 3,
    LocateReply = 4,
    CloseConnection = 5,
    MessageError = 6,
    Fragment = 7,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, StreamError> {
        Ok(match v {
            0 => Self::Request,
            1 => Self::Reply,
            2 => Self::CancelRequest,
            3 => Self::LocateRequest,
            4 => Self::LocateReply,
            5 => Self::CloseConnection,
            6 => Self::MessageError,
            7 => Self::Fragment,
            _ => return Err(StreamError::Malformed),
        })
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    NoException = 0,
    UserException = 1,
    SystemException = 2,
    LocationForward = 3,
    LocationForwardPerm = 4,
    NeedsAddressingMode = 5,
}

impl ReplyStatus {
    fn from_u32(v: u32) -> Result<Self, StreamError> {
        Ok(match v {
            0 => Self::NoException,
            1 => Self::UserException,
            2 => Self::SystemException,
            3 => Self::LocationForward,
            4 => Self::LocationForwardPerm,
            5 => Self::NeedsAddressingMode,
            _ => return Err(StreamError::Malformed),
        })
    }
}

pub struct GiopHeader {
    pub little_endian: bool,
    pub fragment: bool,
    pub message_type: MessageType,
    pub message_size: u32,
}

impl GiopHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() < 12 || &bytes[0..4] != MAGIC {
            return Err(StreamError::Malformed);
        }
        let flags = bytes[6];
        let little_endian = flags & 0x01 != 0;
        let fragment = flags & 0x02 != 0;
        let message_type = MessageType::from_u8(bytes[7])?;
        let mut input = StreamIn::new(&bytes[8..12], !little_endian);
        let message_size = input.read_u32()?;
        Ok(Self { little_endian, fragment, message_type, message_size })
    }
}

/// Writes a GIOP Request header's body fields (the 12-octet message
/// header itself is added afterward via
/// [`crate::stream::StreamOut::write_message_header`]).
pub fn write_request_header(out: &mut StreamOut, request_id: u32, response_expected: bool, object_key: &[u8], operation: &str) {
    out.write_u32(request_id);
    out.write_u8(response_expected as u8);
    out.write_u32(0); // reserved bytes, GIOP 1.2 padding
    let key_elems: Vec<&[u8]> = object_key.iter().map(std::slice::from_ref).collect();
    out.write_seq(1, &key_elems);
    out.write_string(operation);
    out.write_seq(1, &[]); // empty service context list
}

pub struct RequestHeader {
    pub request_id: u32,
    pub response_expected: bool,
    pub object_key: Vec<u8>,
    pub operation: String,
}

pub fn read_request_header(input: &mut StreamIn) -> Result<RequestHeader, StreamError> {
    let request_id = input.read_u32()?;
    let mut flag = [0u8; 1];
    input.read(1, 1, &mut flag)?;
    let response_expected = flag[0] != 0;
    let _reserved = input.read_u32()?;
    let keys = input.unmarshal_seq(1, 1)?;
    let object_key = keys.into_iter().flatten().collect();
    let operation = input.unmarshal_string()?;
    let _service_context = input.unmarshal_seq(1, 1)?;
    Ok(RequestHeader { request_id, response_expected, object_key, operation })
}

pub fn write_reply_header(out: &mut StreamOut, request_id: u32, status: ReplyStatus) {
    out.write_u32(request_id);
    out.write_u32(status as u32);
    out.write_seq(1, &[]); // empty service context list
}

pub struct ReplyHeader {
    pub request_id: u32,
    pub status: ReplyStatus,
}

pub fn read_reply_header(input: &mut StreamIn) -> Result<ReplyHeader, StreamError> {
    let request_id = input.read_u32()?;
    let status = ReplyStatus::from_u32(input.read_u32()?)?;
    let _service_context = input.unmarshal_seq(1, 1)?;
    Ok(ReplyHeader { request_id, status })
}
