//! Incremental transfer-encoding decoders for part bodies.
//!
//! Both decoders wrap a downstream [`Sink`] and translate an unbounded
//! sequence of input chunks into decoded output, tolerating tokens split
//! across chunk boundaries.

use crate::constants::{hex_value, CR, LF};
use crate::error::Error;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// A byte sink that decoded part data is written into.
///
/// Implemented by [`Field`](crate::Field) and [`File`](crate::File); the
/// orchestrator threads one of these (optionally through a decoder) for
/// every part.
pub trait Sink {
    /// Writes a chunk of bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> crate::Result<usize>;

    /// Flushes any buffered state. Called exactly once per part.
    fn finalize(&mut self) -> crate::Result<()>;
}

/// Streaming base64 decoder.
///
/// Keeps a carry of up to three raw base64 characters so 4-character groups
/// split across `write` calls decode correctly. ASCII whitespace is skipped.
pub struct Base64Decoder<S> {
    sink: S,
    carry: [u8; 3],
    carry_len: usize,
    finalized: bool,
}

impl<S: Sink> Base64Decoder<S> {
    pub fn new(sink: S) -> Base64Decoder<S> {
        Base64Decoder {
            sink,
            carry: [0; 3],
            carry_len: 0,
            finalized: false,
        }
    }

    /// Consumes the decoder and returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: Sink> Sink for Base64Decoder<S> {
    fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        let mut buf = Vec::with_capacity(self.carry_len + data.len());
        buf.extend_from_slice(&self.carry[..self.carry_len]);
        buf.extend(data.iter().copied().filter(|b| !b.is_ascii_whitespace()));

        let decode_len = buf.len() / 4 * 4;
        if decode_len > 0 {
            let decoded = BASE64.decode(&buf[..decode_len]).map_err(|err| Error::Decode {
                message: format!("invalid base64 part data: {err}"),
            })?;
            self.sink.write(&decoded)?;
        }

        let rest = &buf[decode_len..];
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
        Ok(data.len())
    }

    fn finalize(&mut self) -> crate::Result<()> {
        if self.finalized {
            return Ok(());
        }

        match self.carry_len {
            0 => {}
            1 => {
                return Err(Error::Decode {
                    message: "truncated base64 part data: 1 character left over".to_owned(),
                })
            }
            n => {
                // An unpadded final group; pad it out and decode.
                let mut group = [b'='; 4];
                group[..n].copy_from_slice(&self.carry[..n]);
                let decoded = BASE64.decode(group).map_err(|err| Error::Decode {
                    message: format!("invalid base64 part data: {err}"),
                })?;
                self.sink.write(&decoded)?;
                self.carry_len = 0;
            }
        }

        self.finalized = true;
        self.sink.finalize()
    }
}

/// Streaming quoted-printable decoder.
///
/// Keeps a carry of up to two bytes so `=XY` escapes and `=CRLF` soft line
/// breaks split across `write` calls decode correctly.
pub struct QuotedPrintableDecoder<S> {
    sink: S,
    carry: [u8; 2],
    carry_len: usize,
    finalized: bool,
}

impl<S: Sink> QuotedPrintableDecoder<S> {
    pub fn new(sink: S) -> QuotedPrintableDecoder<S> {
        QuotedPrintableDecoder {
            sink,
            carry: [0; 2],
            carry_len: 0,
            finalized: false,
        }
    }

    /// Consumes the decoder and returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: Sink> Sink for QuotedPrintableDecoder<S> {
    fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        let mut buf = Vec::with_capacity(self.carry_len + data.len());
        buf.extend_from_slice(&self.carry[..self.carry_len]);
        buf.extend_from_slice(data);
        self.carry_len = 0;

        let mut out = Vec::with_capacity(buf.len());
        let mut i = 0;
        while i < buf.len() {
            let b = buf[i];
            if b != b'=' {
                out.push(b);
                i += 1;
                continue;
            }

            let rest = buf.len() - i - 1;
            if rest >= 1 && buf[i + 1] == LF {
                // Soft line break with a bare LF.
                i += 2;
            } else if rest >= 2 && buf[i + 1] == CR && buf[i + 2] == LF {
                // Soft line break.
                i += 3;
            } else if rest >= 2 {
                match (hex_value(buf[i + 1]), hex_value(buf[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        return Err(Error::Decode {
                            message: format!(
                                "invalid quoted-printable escape: ={}{}",
                                buf[i + 1].escape_ascii(),
                                buf[i + 2].escape_ascii()
                            ),
                        })
                    }
                }
            } else {
                // The escape is split across chunks; hold it until the next
                // write (or fail at finalize).
                let tail = &buf[i..];
                self.carry[..tail.len()].copy_from_slice(tail);
                self.carry_len = tail.len();
                break;
            }
        }

        if !out.is_empty() {
            self.sink.write(&out)?;
        }
        Ok(data.len())
    }

    fn finalize(&mut self) -> crate::Result<()> {
        if self.finalized {
            return Ok(());
        }

        if self.carry_len > 0 {
            return Err(Error::Decode {
                message: "trailing '=' in quoted-printable part data".to_owned(),
            });
        }

        self.finalized = true;
        self.sink.finalize()
    }
}
