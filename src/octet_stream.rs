use crate::error::Error;

/// Events emitted by [`OctetStreamParser`].
#[allow(unused_variables)]
pub trait OctetStreamHandler {
    /// Called once, before the first data callback.
    fn on_start(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// A chunk of body data. The slice borrows the caller's input buffer and
    /// must not be retained past the callback.
    fn on_data(&mut self, data: &[u8]) -> crate::Result<()> {
        Ok(())
    }

    /// Called from `finalize` once the body is complete.
    fn on_end(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Pass-through parser for opaque request bodies.
///
/// Forwards every byte to [`OctetStreamHandler::on_data`], enforcing an
/// optional size cap. Exceeding the cap is a fatal error, not a truncation.
pub struct OctetStreamParser<H> {
    handler: H,
    started: bool,
    finalized: bool,
    max_size: Option<u64>,
    written: u64,
    error: Option<Error>,
}

impl<H: OctetStreamHandler> OctetStreamParser<H> {
    pub fn new(handler: H, max_size: Option<u64>) -> OctetStreamParser<H> {
        OctetStreamParser {
            handler,
            started: false,
            finalized: false,
            max_size,
            written: 0,
            error: None,
        }
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

        if !self.started {
            if let Err(err) = self.handler.on_start() {
                return Err(self.fail(err));
            }
            self.started = true;
        }

        if !data.is_empty() {
            if let Err(err) = self.handler.on_data(data) {
                return Err(self.fail(err));
            }
        }

        self.written += data.len() as u64;
        Ok(data.len())
    }

    /// Signals the end of the body. Idempotent.
    pub fn finalize(&mut self) -> crate::Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.finalized {
            return Ok(());
        }

        if let Err(err) = self.handler.on_end() {
            return Err(self.fail(err));
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
