use derive_more::Display;
use std::fmt::{self, Debug, Display, Formatter};

/// A set of errors that can occur while parsing a form body or writing its
/// decoded contents.
///
/// Parse errors carry the byte offset of the offending byte within the chunk
/// that was passed to `write`, when it is known; see [`Error::offset`].
#[derive(Clone, Display, PartialEq, Eq)]
pub enum Error {
    /// Grammar violation inside a `multipart/form-data` body.
    #[display(fmt = "Multipart parse error: {}", message)]
    MultipartParse {
        message: String,
        offset: Option<usize>,
    },

    /// Grammar violation inside an `application/x-www-form-urlencoded` body.
    #[display(fmt = "Querystring parse error: {}", message)]
    QuerystringParse {
        message: String,
        offset: Option<usize>,
    },

    /// A base64 or quoted-printable part body could not be decoded.
    #[display(fmt = "Decode error: {}", message)]
    Decode { message: String },

    /// I/O failure while writing a spill file or reading the input stream.
    #[display(fmt = "File error: {}", message)]
    File { message: String },

    /// The `Content-Type` was `multipart/form-data` but carried no `boundary`
    /// parameter.
    #[display(fmt = "No boundary found in Content-Type header")]
    NoBoundary,

    /// The boundary supplied at parser construction is unusable.
    #[display(fmt = "Invalid multipart boundary: {}", message)]
    InvalidBoundary { message: String },

    /// No `Content-Type` header was given to `create_form_parser`.
    #[display(fmt = "No Content-Type header given")]
    NoContentType,

    /// An unrecognized `Content-Transfer-Encoding`, rejected because
    /// `upload_error_on_bad_cte` is enabled.
    #[display(fmt = "Unknown Content-Transfer-Encoding: {:?}", encoding)]
    UnknownTransferEncoding { encoding: String },

    /// The body grew past the configured `max_body_size`.
    #[display(fmt = "Body size exceeded the maximum limit: {} bytes", limit)]
    BodySizeExceeded { limit: u64 },
}

impl Error {
    /// The byte offset within the chunk passed to `write` at which a parse
    /// error was detected, if known.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::MultipartParse { offset, .. } | Error::QuerystringParse { offset, .. } => {
                *offset
            }
            _ => None,
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::File {
            message: err.to_string(),
        }
    }
}
