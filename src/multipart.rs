use crate::constants::{is_token, CR, COLON, HYPHEN, LF, MAX_BOUNDARY_LEN, SPACE};
use crate::error::Error;

/// Events emitted by [`MultipartParser`].
///
/// Per part, in order: `on_part_begin`; for each header `on_header_begin`,
/// one or more `on_header_field`, one or more `on_header_value`,
/// `on_header_end`; then `on_headers_finished`; then one or more
/// `on_part_data`; then `on_part_end`. After the closing boundary, `on_end`.
///
/// Data slices borrow the caller's input buffer (or, when a partial boundary
/// match straddled a `write` call, the parser's own delimiter buffer) and
/// must not be retained past the callback; consecutive slices of the same
/// kind concatenate to the full value.
#[allow(unused_variables)]
pub trait MultipartHandler {
    fn on_part_begin(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn on_header_begin(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn on_header_field(&mut self, data: &[u8]) -> crate::Result<()> {
        Ok(())
    }

    fn on_header_value(&mut self, data: &[u8]) -> crate::Result<()> {
        Ok(())
    }

    fn on_header_end(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn on_headers_finished(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn on_part_data(&mut self, data: &[u8]) -> crate::Result<()> {
        Ok(())
    }

    fn on_part_end(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn on_end(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    StartBoundary,
    HeaderFieldStart,
    HeaderField,
    HeaderValueStart,
    HeaderValue,
    HeaderValueAlmostDone,
    HeadersAlmostDone,
    PartDataStart,
    PartData,
    EndBoundary,
    End,
    EndCr,
}

/// Byte-level streaming parser for `multipart/form-data` bodies.
///
/// The parser never buffers part bodies: every `write` runs the data through
/// the state machine and hands body bytes to the handler as subslices of the
/// input. Its working memory is bounded by the boundary length plus whatever
/// the handler keeps for header accumulation.
pub struct MultipartParser<H> {
    handler: H,
    // The full delimiter, `\r\n--` + boundary. The leading CRLF of the very
    // first boundary is handled by the start states instead.
    boundary: Vec<u8>,
    // Boyer-Moore-Horspool shift table over the delimiter.
    skip: Box<[usize; 256]>,
    state: State,
    // Number of delimiter bytes matched so far while scanning part data (or
    // start-boundary bytes in the start states).
    index: usize,
    // Set once the full delimiter was followed by CR (part boundary) or by a
    // hyphen (final boundary).
    part_boundary: bool,
    last_boundary: bool,
    // Callback marks. Header marks index into the current chunk; the part
    // data mark goes negative when already-matched delimiter bytes from a
    // previous chunk may still turn out to be body data.
    header_field_mark: Option<usize>,
    header_value_mark: Option<usize>,
    part_data_mark: Option<isize>,
    max_size: Option<u64>,
    written: u64,
    finalized: bool,
    error: Option<Error>,
}

impl<H: MultipartHandler> MultipartParser<H> {
    /// Creates a parser for the given boundary (without the leading `--`).
    pub fn new(
        boundary: impl AsRef<[u8]>,
        handler: H,
        max_size: Option<u64>,
    ) -> crate::Result<MultipartParser<H>> {
        let boundary = boundary.as_ref();
        if boundary.is_empty() {
            return Err(Error::InvalidBoundary {
                message: "boundary must not be empty".to_owned(),
            });
        }
        if boundary.len() > MAX_BOUNDARY_LEN {
            return Err(Error::InvalidBoundary {
                message: format!(
                    "boundary is {} bytes long, the maximum is {}",
                    boundary.len(),
                    MAX_BOUNDARY_LEN
                ),
            });
        }

        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary);

        let mut skip = Box::new([delimiter.len(); 256]);
        for (i, &b) in delimiter[..delimiter.len() - 1].iter().enumerate() {
            skip[b as usize] = delimiter.len() - 1 - i;
        }

        Ok(MultipartParser {
            handler,
            boundary: delimiter,
            skip,
            state: State::Start,
            index: 0,
            part_boundary: false,
            last_boundary: false,
            header_field_mark: None,
            header_value_mark: None,
            part_data_mark: None,
            max_size,
            written: 0,
            finalized: false,
            error: None,
        })
    }

    /// Feeds a chunk of body data, invoking callbacks inline. Returns the
    /// number of bytes consumed, which is always the full chunk on success.
    pub fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.finalized {
            return Err(self.fail(parse_error("data written after finalize", None)));
        }

        if let Some(max) = self.max_size {
            if self.written + data.len() as u64 > max {
                return Err(self.fail(Error::BodySizeExceeded { limit: max }));
            }
        }

        match self.run(data) {
            Ok(()) => {
                self.written += data.len() as u64;
                Ok(data.len())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn run(&mut self, data: &[u8]) -> crate::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let length = data.len();
        let mut state = self.state;
        let mut index = self.index;
        let mut part_boundary = self.part_boundary;
        let mut last_boundary = self.last_boundary;
        let mut i = 0;

        while i < length {
            let c = data[i];

            match state {
                State::Start => {
                    // Leading newlines before the first boundary are
                    // tolerated.
                    if c == CR || c == LF {
                        i += 1;
                        continue;
                    }
                    index = 0;
                    state = State::StartBoundary;
                }

                State::StartBoundary => {
                    // `index` runs over `--boundary`, which is the delimiter
                    // without its leading CRLF.
                    let dashed_len = self.boundary.len() - 2;
                    if index == dashed_len {
                        if c == HYPHEN {
                            // `--boundary--` with no parts at all.
                            state = State::EndBoundary;
                        } else if c != CR {
                            return Err(parse_error(
                                "expected CR at the end of the first boundary",
                                Some(i),
                            ));
                        }
                        index += 1;
                    } else if index == dashed_len + 1 {
                        if c != LF {
                            return Err(parse_error(
                                "expected LF at the end of the first boundary",
                                Some(i),
                            ));
                        }
                        index = 0;
                        self.handler.on_part_begin()?;
                        state = State::HeaderFieldStart;
                    } else {
                        if c != self.boundary[index + 2] {
                            return Err(parse_error("first boundary does not match", Some(i)));
                        }
                        index += 1;
                    }
                    i += 1;
                }

                State::HeaderFieldStart => {
                    index = 0;
                    self.header_field_mark = Some(i);
                    if c != CR {
                        self.handler.on_header_begin()?;
                    }
                    state = State::HeaderField;
                }

                State::HeaderField => {
                    if c == CR && index == 0 {
                        // Blank line: the headers are over.
                        self.header_field_mark = None;
                        state = State::HeadersAlmostDone;
                        i += 1;
                        continue;
                    }

                    index += 1;
                    if c == COLON {
                        if index == 1 {
                            return Err(parse_error("zero-length header name", Some(i)));
                        }
                        self.flush_header_field(data, i, false)?;
                        state = State::HeaderValueStart;
                    } else if !is_token(c) {
                        return Err(parse_error("invalid character in header name", Some(i)));
                    }
                    i += 1;
                }

                State::HeaderValueStart => {
                    if c == SPACE {
                        i += 1;
                        continue;
                    }
                    self.header_value_mark = Some(i);
                    state = State::HeaderValue;
                }

                State::HeaderValue => {
                    // A bare LF is tolerated here and passes through as a
                    // value byte; only CR ends the value.
                    if c == CR {
                        self.flush_header_value(data, i, false)?;
                        self.handler.on_header_end()?;
                        state = State::HeaderValueAlmostDone;
                    }
                    i += 1;
                }

                State::HeaderValueAlmostDone => {
                    if c != LF {
                        return Err(parse_error(
                            "expected LF after CR at the end of a header value",
                            Some(i),
                        ));
                    }
                    state = State::HeaderFieldStart;
                    i += 1;
                }

                State::HeadersAlmostDone => {
                    if c != LF {
                        return Err(parse_error(
                            "expected LF at the end of the part headers",
                            Some(i),
                        ));
                    }
                    self.handler.on_headers_finished()?;
                    state = State::PartDataStart;
                    i += 1;
                }

                State::PartDataStart => {
                    self.part_data_mark = Some(i as isize);
                    state = State::PartData;
                }

                State::PartData => {
                    let prev_index = index;
                    let blen = self.boundary.len();

                    if index == 0 {
                        // Fast path: look for a complete delimiter in the
                        // rest of the chunk, then fall through with the scan
                        // positioned on its last byte.
                        if let Some(pos) = self.find_boundary(data, i) {
                            index = blen - 1;
                            i = pos + blen - 1;
                        } else {
                            // No full delimiter here; only the chunk tail can
                            // still start one. Skip ahead to the first
                            // possible delimiter start in that tail.
                            i = i.max(length.saturating_sub(blen));
                            while i < length - 1 && data[i] != self.boundary[0] {
                                i += 1;
                            }
                        }
                    }
                    let c = data[i];

                    if index < blen {
                        if self.boundary[index] == c {
                            index += 1;
                        } else {
                            index = 0;
                        }
                    } else if index == blen {
                        // The full delimiter matched; the next byte decides
                        // between another part and the final boundary.
                        index += 1;
                        if c == CR {
                            part_boundary = true;
                        } else if c == HYPHEN {
                            last_boundary = true;
                        } else {
                            return Err(parse_error(
                                "boundary must be followed by CRLF or '--'",
                                Some(i),
                            ));
                        }
                    } else {
                        // index == blen + 1
                        if part_boundary {
                            if c != LF {
                                return Err(parse_error(
                                    "expected LF after the boundary CR",
                                    Some(i),
                                ));
                            }
                            part_boundary = false;
                            self.flush_part_data(data, i as isize - index as isize, false, length)?;
                            self.handler.on_part_end()?;
                            self.handler.on_part_begin()?;
                            index = 0;
                            state = State::HeaderFieldStart;
                            i += 1;
                            continue;
                        }
                        if last_boundary {
                            if c != HYPHEN {
                                return Err(parse_error(
                                    "expected '--' after the final boundary",
                                    Some(i),
                                ));
                            }
                            last_boundary = false;
                            self.flush_part_data(data, i as isize - index as isize, false, length)?;
                            self.handler.on_part_end()?;
                            self.handler.on_end()?;
                            state = State::End;
                            i += 1;
                            continue;
                        }
                        return Err(parse_error("boundary scan lost its state", Some(i)));
                    }

                    if index == 0 && prev_index > 0 {
                        // A partial delimiter match fell through; the bytes
                        // stay covered by the data mark, and the current byte
                        // could itself start a delimiter.
                        continue;
                    }
                    i += 1;
                }

                State::EndBoundary => {
                    if c != HYPHEN {
                        return Err(parse_error(
                            "expected '--' after the final boundary",
                            Some(i),
                        ));
                    }
                    self.handler.on_end()?;
                    state = State::End;
                    i += 1;
                }

                State::End => {
                    // Only complete CRLF pairs may trail the final boundary.
                    if c != CR {
                        return Err(parse_error("trailing data after the final boundary", Some(i)));
                    }
                    state = State::EndCr;
                    i += 1;
                }

                State::EndCr => {
                    if c != LF {
                        return Err(parse_error("trailing data after the final boundary", Some(i)));
                    }
                    state = State::End;
                    i += 1;
                }
            }
        }

        // Flush whatever is still marked; the marks restart at the front of
        // the next chunk (negative for part data still inside a potential
        // delimiter match).
        self.flush_header_field(data, length, true)?;
        self.flush_header_value(data, length, true)?;
        self.flush_part_data(data, length as isize - index as isize, true, length)?;

        self.state = state;
        self.index = index;
        self.part_boundary = part_boundary;
        self.last_boundary = last_boundary;
        Ok(())
    }

    // Boyer-Moore-Horspool scan for a complete delimiter inside the chunk.
    fn find_boundary(&self, data: &[u8], from: usize) -> Option<usize> {
        let boundary = &self.boundary;
        let n = boundary.len();
        let last = n - 1;
        let mut pos = from;

        while pos + n <= data.len() {
            let c = data[pos + last];
            if c == boundary[last] && data[pos..pos + n] == boundary[..] {
                return Some(pos);
            }
            pos += self.skip[c as usize];
        }
        None
    }

    fn flush_header_field(&mut self, data: &[u8], end: usize, remaining: bool) -> crate::Result<()> {
        if let Some(mark) = self.header_field_mark {
            if end > mark {
                self.handler.on_header_field(&data[mark..end])?;
            }
            self.header_field_mark = if remaining { Some(0) } else { None };
        }
        Ok(())
    }

    fn flush_header_value(&mut self, data: &[u8], end: usize, remaining: bool) -> crate::Result<()> {
        if let Some(mark) = self.header_value_mark {
            if end > mark {
                self.handler.on_header_value(&data[mark..end])?;
            }
            self.header_value_mark = if remaining { Some(0) } else { None };
        }
        Ok(())
    }

    fn flush_part_data(
        &mut self,
        data: &[u8],
        end: isize,
        remaining: bool,
        length: usize,
    ) -> crate::Result<()> {
        if let Some(mark) = self.part_data_mark {
            if end > mark {
                if mark >= 0 {
                    self.handler.on_part_data(&data[mark as usize..end as usize])?;
                } else {
                    // Delimiter bytes carried over from previous chunks
                    // turned out to be body data. They matched a prefix of
                    // the delimiter, so replay them from it.
                    let carried = (-mark) as usize;
                    self.handler.on_part_data(&self.boundary[..carried])?;
                    if end > 0 {
                        self.handler.on_part_data(&data[..end as usize])?;
                    }
                }
            }
            self.part_data_mark = if remaining {
                Some(end - length as isize)
            } else {
                None
            };
        }
        Ok(())
    }

    /// Signals the end of the body. Errors unless the closing boundary was
    /// seen; a no-op on an already-complete parser.
    pub fn finalize(&mut self) -> crate::Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if !matches!(self.state, State::End | State::EndCr) {
            return Err(self.fail(parse_error(
                "stream ended before the closing boundary",
                None,
            )));
        }
        self.finalized = true;
        Ok(())
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    fn fail(&mut self, err: Error) -> Error {
        self.error = Some(err.clone());
        err
    }
}

fn parse_error(message: &str, offset: Option<usize>) -> Error {
    Error::MultipartParse {
        message: message.to_owned(),
        offset,
    }
}
