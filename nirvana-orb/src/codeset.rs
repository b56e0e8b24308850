//! Code-set conversion for narrow and wide character strings (spec.md §1
//! item 5, §4.6's "code-set conversion").
//!
//! Grounded on `original_source/Source/ORB/CodeSetConverter.cpp`: the
//! default narrow converter marshals/unmarshals strings verbatim (no
//! transcoding between native and transmission code set); the default
//! wide converter does the same but additionally byte-swaps wide
//! characters on unmarshal when the stream's byte order differs from the
//! host's, since `StreamIn`/`StreamOut` only byte-swap the primitives
//! they know about (`u32`/`u64`) and leave wide-char payloads to the
//! converter.

use crate::stream::{StreamError, StreamIn, StreamOut};

/// OSF-registered code set identifiers (the subset the default
/// converters care about): `TAG_CODE_SETS` service context entries name
/// one of these per native/transmission pairing.
pub mod id {
    pub const ISO8859_1: u32 = 0x0001_0001;
    pub const UTF8: u32 = 0x0501_0001;
    pub const UTF16: u32 = 0x0001_0109;
    pub const UCS2: u32 = 0x0001_0100;
}

/// Converts narrow (`char`) strings between a module's native code set
/// and the transmission code set negotiated for a connection.
pub trait CodeSetConverter: Send + Sync {
    fn marshal_string(&self, s: &str, out: &mut StreamOut);
    fn unmarshal_string(&self, input: &mut StreamIn) -> Result<String, StreamError>;
}

/// Converts wide (`wchar`) strings and character sequences, additionally
/// responsible for correcting wide-character byte order on unmarshal
/// since the stream layer does not know the width of an opaque wide-char
/// payload.
pub trait CodeSetConverterW: Send + Sync {
    fn marshal_string(&self, s: &[u16], out: &mut StreamOut);
    fn unmarshal_string(&self, input: &mut StreamIn) -> Result<Vec<u16>, StreamError>;
    fn marshal_char(&self, data: &[u16], out: &mut StreamOut);
    fn unmarshal_char(&self, input: &mut StreamIn, count: usize) -> Result<Vec<u16>, StreamError>;
}

/// No-op narrow converter: native and transmission code sets are both
/// assumed UTF-8, so marshaling is the identity transform — this is
/// `CodeSetConverter::get_default()` in the original.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodeSetConverter;

impl CodeSetConverter for DefaultCodeSetConverter {
    fn marshal_string(&self, s: &str, out: &mut StreamOut) {
        out.write_string(s);
    }

    fn unmarshal_string(&self, input: &mut StreamIn) -> Result<String, StreamError> {
        input.unmarshal_string()
    }
}

fn write_u16_seq(out: &mut StreamOut, data: &[u16]) {
    for &w in data {
        out.write(2, 2, &w.to_le_bytes());
    }
}

fn read_u16_seq(input: &mut StreamIn, count: usize) -> Result<Vec<u16>, StreamError> {
    let mut result = Vec::with_capacity(count);
    for _ in 0..count {
        let mut tmp = [0u8; 2];
        input.read(2, 2, &mut tmp)?;
        let mut w = u16::from_le_bytes(tmp);
        if input.other_endian() {
            w = w.swap_bytes();
        }
        result.push(w);
    }
    Ok(result)
}

/// No-op wide converter modulo the byte-swap every wide converter must
/// perform on unmarshal when the producer's endianness differs from the
/// reader's, mirroring `CodeSetConverterW::unmarshal_string`/
/// `unmarshal_char`'s `if (in.other_endian()) byteswap(...)` loops.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodeSetConverterW;

impl CodeSetConverterW for DefaultCodeSetConverterW {
    fn marshal_string(&self, s: &[u16], out: &mut StreamOut) {
        out.write_u32((s.len() + 1) as u32);
        write_u16_seq(out, s);
        out.write(2, 2, &0u16.to_le_bytes());
    }

    fn unmarshal_string(&self, input: &mut StreamIn) -> Result<Vec<u16>, StreamError> {
        let len = input.read_u32()? as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut chars = read_u16_seq(input, len - 1)?;
        let nul = read_u16_seq(input, 1)?;
        if nul[0] != 0 {
            return Err(StreamError::Malformed);
        }
        chars.shrink_to_fit();
        Ok(chars)
    }

    fn marshal_char(&self, data: &[u16], out: &mut StreamOut) {
        write_u16_seq(out, data);
    }

    fn unmarshal_char(&self, input: &mut StreamIn, count: usize) -> Result<Vec<u16>, StreamError> {
        read_u16_seq(input, count)
    }
}

/// Picks the converter pair for a negotiated `TAG_CODE_SETS` entry.
/// Every id above currently resolves to the same pass-through
/// converters since this runtime's native code set is already UTF-8 /
/// UTF-16; the lookup exists so a future transcoding converter (for a
/// native code set other than Unicode) has a single place to register.
pub fn converter_for(_native: u32, _transmission: u32) -> Box<dyn CodeSetConverter> {
    Box::new(DefaultCodeSetConverter)
}

pub fn converter_w_for(_native: u32, _transmission: u32) -> Box<dyn CodeSetConverterW> {
    Box::new(DefaultCodeSetConverterW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_round_trips_through_default_converter() {
        let conv = DefaultCodeSetConverter;
        let mut out = StreamOut::new(true);
        conv.marshal_string("hello", &mut out);
        let bytes = out.into_bytes();
        let mut input = StreamIn::new(&bytes, false);
        assert_eq!(conv.unmarshal_string(&mut input).unwrap(), "hello");
    }

    #[test]
    fn wide_round_trips_through_default_converter() {
        let conv = DefaultCodeSetConverterW;
        let text: Vec<u16> = "hi".encode_utf16().collect();
        let mut out = StreamOut::new(true);
        conv.marshal_string(&text, &mut out);
        let bytes = out.into_bytes();
        let mut input = StreamIn::new(&bytes, false);
        assert_eq!(conv.unmarshal_string(&mut input).unwrap(), text);
    }

    #[test]
    fn wide_char_is_byte_swapped_on_other_endian() {
        let conv = DefaultCodeSetConverterW;
        let data = [0x0041u16, 0x0042u16];
        let mut out = StreamOut::new(true);
        conv.marshal_char(&data, &mut out);
        let bytes = out.into_bytes();
        // Reader disagrees with the producer's endianness: each u16 must
        // come back byte-swapped relative to the raw little-endian bytes.
        let mut input = StreamIn::new(&bytes, true);
        let got = conv.unmarshal_char(&mut input, 2).unwrap();
        assert_eq!(got, vec![0x4100u16, 0x4200u16]);
    }

    #[test]
    fn wide_string_rejects_missing_terminator() {
        let conv = DefaultCodeSetConverterW;
        let mut out = StreamOut::new(true);
        out.write_u32(2);
        out.write(2, 2, &0x41u16.to_le_bytes());
        out.write(2, 2, &0x01u16.to_le_bytes()); // not a NUL terminator
        let bytes = out.into_bytes();
        let mut input = StreamIn::new(&bytes, false);
        assert!(matches!(conv.unmarshal_string(&mut input), Err(StreamError::Malformed)));
    }
}
