//! Text encodings for writes and the incremental read-side decoder.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// 7-bit; the high bit of every byte is dropped.
    Ascii,
    /// One byte per code point, also known as `binary`.
    Latin1,
    Hex,
    Base64,
    /// UTF-16 little endian, also known as `ucs2`.
    Utf16Le,
}

impl FromStr for Encoding {
    type Err = StreamError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            "ucs2" | "ucs-2" | "utf16le" | "utf-16le" => Ok(Encoding::Utf16Le),
            _ => Err(StreamError::UnknownEncoding(name.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin1",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
            Encoding::Utf16Le => "utf16le",
        };
        f.write_str(name)
    }
}

impl Encoding {
    /// Convert text to bytes.
    pub fn encode(self, text: &str) -> Result<Bytes, StreamError> {
        let bytes = match self {
            Encoding::Utf8 => return Ok(Bytes::copy_from_slice(text.as_bytes())),
            Encoding::Ascii => text.chars().map(|c| (c as u32 & 0x7f) as u8).collect(),
            Encoding::Latin1 => text.chars().map(|c| c as u32 as u8).collect(),
            Encoding::Hex => {
                hex::decode(text).map_err(|e| StreamError::InvalidInput(format!("hex: {e}")))?
            }
            Encoding::Base64 => STANDARD
                .decode(text.trim())
                .map_err(|e| StreamError::InvalidInput(format!("base64: {e}")))?,
            Encoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        };
        Ok(Bytes::from(bytes))
    }
}

/// Turns delivered plaintext into text, carrying incomplete multi-byte
/// sequences over to the next call.
#[derive(Debug)]
pub struct Decoder {
    encoding: Encoding,
    pending: Vec<u8>,
}

impl Decoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decode as much of `pending + bytes` as forms complete units.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        match self.encoding {
            Encoding::Utf8 => self.decode_utf8(bytes),
            Encoding::Utf16Le => self.decode_utf16(bytes),
            Encoding::Base64 => {
                self.pending.extend_from_slice(bytes);
                let whole = self.pending.len() / 3 * 3;
                let out = STANDARD.encode(&self.pending[..whole]);
                self.pending.drain(..whole);
                out
            }
            Encoding::Hex => hex::encode(bytes),
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Encoding::Ascii => bytes.iter().map(|&b| char::from(b & 0x7f)).collect(),
        }
    }

    /// Flush whatever is still buffered, e.g. at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let out = match self.encoding {
            Encoding::Base64 => STANDARD.encode(&rest),
            Encoding::Utf16Le if rest.len() >= 2 => {
                let units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|p| u16::from_le_bytes([p[0], p[1]]))
                    .collect();
                let mut s = String::from_utf16_lossy(&units);
                if rest.len() % 2 == 1 {
                    s.push(char::REPLACEMENT_CHARACTER);
                }
                s
            }
            Encoding::Utf16Le => char::REPLACEMENT_CHARACTER.to_string(),
            _ => String::from_utf8_lossy(&rest).into_owned(),
        };
        Some(out)
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + bad;
                        }
                        None => {
                            // Truncated sequence at the end: keep it.
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    fn decode_utf16(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut units: Vec<u16> = self
            .pending
            .chunks_exact(2)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect();
        let mut keep = self.pending.len() % 2;
        if let Some(&last) = units.last()
            && (0xD800..=0xDBFF).contains(&last)
        {
            // High surrogate waiting for its pair.
            units.pop();
            keep += 2;
        }
        let used = self.pending.len() - keep;
        self.pending.drain(..used);
        String::from_utf16_lossy(&units)
    }
}
