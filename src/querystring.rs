use crate::constants::{AMPERSAND, EQUALS, SEMICOLON};
use crate::error::Error;

/// Events emitted by [`QuerystringParser`].
///
/// Per field, in order: `on_field_start`, one or more `on_field_name`, then
/// (only when an `=` was seen) one or more `on_field_data`, then
/// `on_field_end`. Data slices borrow the caller's input buffer and must not
/// be retained past the callback; consecutive slices of the same kind
/// concatenate to the full value. No percent-decoding is performed.
#[allow(unused_variables)]
pub trait QuerystringHandler {
    fn on_field_start(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn on_field_name(&mut self, data: &[u8]) -> crate::Result<()> {
        Ok(())
    }

    fn on_field_data(&mut self, data: &[u8]) -> crate::Result<()> {
        Ok(())
    }

    fn on_field_end(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Called from `finalize` once the body is complete.
    fn on_end(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    BeforeField,
    FieldName,
    FieldData,
    End,
}

/// Byte-level state machine for `application/x-www-form-urlencoded` bodies.
///
/// In lenient mode `&` and `;` both separate fields and empty segments are
/// skipped. With `strict_parsing` enabled, empty segments and fields without
/// an `=` are errors, and `;` is rejected unless re-enabled with
/// [`separator_semicolon`](Self::separator_semicolon).
pub struct QuerystringParser<H> {
    handler: H,
    state: State,
    found_sep: bool,
    // Whether the current field has produced any data callback yet. A field
    // whose '=' was seen but whose value is empty still gets one empty data
    // callback, so consumers can tell `bar=` apart from `bar`.
    value_emitted: bool,
    strict_parsing: bool,
    semicolon_separator: bool,
    max_size: Option<u64>,
    written: u64,
    error: Option<Error>,
}

enum NameScan {
    Equals(usize),
    Separator(usize),
    End,
}

impl<H: QuerystringHandler> QuerystringParser<H> {
    pub fn new(handler: H, strict_parsing: bool, max_size: Option<u64>) -> QuerystringParser<H> {
        QuerystringParser {
            handler,
            state: State::BeforeField,
            found_sep: false,
            value_emitted: false,
            strict_parsing,
            semicolon_separator: !strict_parsing,
            max_size,
            written: 0,
            error: None,
        }
    }

    /// Declares whether `;` separates fields. Defaults to on in lenient mode
    /// and off (an error) in strict mode.
    pub fn separator_semicolon(mut self, separator: bool) -> QuerystringParser<H> {
        self.semicolon_separator = separator;
        self
    }

    /// Feeds a chunk of body data, invoking callbacks inline. Returns the
    /// number of bytes consumed, which is always the full chunk on success.
    pub fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        if let Some(err) = &self.error {
            return Err(err.clone());
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
        let length = data.len();
        let mut i = 0;

        while i < length {
            match self.state {
                State::BeforeField => {
                    let c = data[i];
                    if c == AMPERSAND || c == SEMICOLON {
                        if c == SEMICOLON && !self.semicolon_separator {
                            return Err(parse_error("semicolon separator is not allowed", i));
                        }
                        if self.found_sep {
                            if self.strict_parsing {
                                return Err(parse_error("duplicate field separator", i));
                            }
                            log::debug!("skipping duplicate field separator at {}", i);
                        } else {
                            self.found_sep = true;
                        }
                        i += 1;
                    } else {
                        self.handler.on_field_start()?;
                        self.found_sep = false;
                        self.value_emitted = false;
                        self.state = State::FieldName;
                    }
                }

                State::FieldName => match self.scan_name(data, i)? {
                    NameScan::Equals(pos) => {
                        if pos > i {
                            self.handler.on_field_name(&data[i..pos])?;
                        }
                        self.state = State::FieldData;
                        i = pos + 1;
                    }
                    NameScan::Separator(pos) => {
                        if self.strict_parsing {
                            return Err(parse_error("field is missing an '='", i));
                        }
                        if pos > i {
                            self.handler.on_field_name(&data[i..pos])?;
                        }
                        self.handler.on_field_end()?;
                        self.state = State::BeforeField;
                        // Reprocess the separator so duplicates are tracked.
                        i = pos;
                    }
                    NameScan::End => {
                        if length > i {
                            self.handler.on_field_name(&data[i..length])?;
                        }
                        i = length;
                    }
                },

                State::FieldData => {
                    match memchr::memchr2(AMPERSAND, SEMICOLON, &data[i..]) {
                        Some(rel) => {
                            let pos = i + rel;
                            if data[pos] == SEMICOLON && !self.semicolon_separator {
                                return Err(parse_error("semicolon separator is not allowed", pos));
                            }
                            if pos > i || !self.value_emitted {
                                self.handler.on_field_data(&data[i..pos])?;
                                self.value_emitted = true;
                            }
                            self.handler.on_field_end()?;
                            self.state = State::BeforeField;
                            i = pos;
                        }
                        None => {
                            if length > i {
                                self.handler.on_field_data(&data[i..length])?;
                                self.value_emitted = true;
                            }
                            i = length;
                        }
                    }
                }

                State::End => {
                    return Err(parse_error("data written after finalize", i));
                }
            }
        }

        Ok(())
    }

    fn scan_name(&self, data: &[u8], from: usize) -> crate::Result<NameScan> {
        match memchr::memchr3(EQUALS, AMPERSAND, SEMICOLON, &data[from..]) {
            Some(rel) => {
                let pos = from + rel;
                match data[pos] {
                    EQUALS => Ok(NameScan::Equals(pos)),
                    SEMICOLON if !self.semicolon_separator => {
                        Err(parse_error("semicolon separator is not allowed", pos))
                    }
                    _ => Ok(NameScan::Separator(pos)),
                }
            }
            None => Ok(NameScan::End),
        }
    }

    /// Signals the end of the body, emitting the pending field end when a
    /// field was still open. Idempotent.
    pub fn finalize(&mut self) -> crate::Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.state == State::End {
            return Ok(());
        }

        if self.state == State::FieldData && !self.value_emitted {
            if let Err(err) = self.handler.on_field_data(&[]) {
                return Err(self.fail(err));
            }
        }
        if matches!(self.state, State::FieldName | State::FieldData) {
            if let Err(err) = self.handler.on_field_end() {
                return Err(self.fail(err));
            }
        }
        if let Err(err) = self.handler.on_end() {
            return Err(self.fail(err));
        }
        self.state = State::End;
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

fn parse_error(message: &str, offset: usize) -> Error {
    Error::QuerystringParse {
        message: message.to_owned(),
        offset: Some(offset),
    }
}
