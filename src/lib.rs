//! A streaming push parser for HTML form bodies in Rust.
//!
//! `multiform` consumes the body of an HTTP request whose `Content-Type` is
//! `multipart/form-data` or `application/x-www-form-urlencoded` and emits
//! decoded fields and files as bounded chunks, without ever buffering the
//! whole body. Uploads may be arbitrarily large: file parts accumulate in
//! memory only up to a configurable threshold and then spill to a temp file.
//!
//! The crate is transport-agnostic and strictly synchronous: feed it byte
//! chunks of any size with `write`, and callbacks fire inline in grammar
//! order. It can be driven from a blocking reader via [`parse_form`] or
//! plugged under any server by pushing body chunks as they arrive.
//!
//! # Examples
//!
//! ```
//! use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
//! use multiform::parse_form;
//!
//! # fn run() -> multiform::Result<()> {
//! let mut headers = HeaderMap::new();
//! headers.insert(
//!     CONTENT_TYPE,
//!     HeaderValue::from_static("multipart/form-data; boundary=AaB03x"),
//! );
//!
//! let body: &[u8] = b"--AaB03x\r\n\
//!     Content-Disposition: form-data; name=\"greeting\"\r\n\
//!     \r\n\
//!     hello\r\n\
//!     --AaB03x--\r\n";
//!
//! let mut input = body;
//! parse_form(
//!     &headers,
//!     &mut input,
//!     Some(Box::new(|field| {
//!         println!("field {:?} = {:?}", field.name(), field.value());
//!     })),
//!     Some(Box::new(|file| {
//!         println!("file {:?} ({} bytes)", file.file_name(), file.size());
//!     })),
//! )?;
//! # Ok(())
//! # }
//! # run().unwrap();
//! ```
//!
//! For finer control, construct a [`FormParser`] directly, or drive the
//! byte-level [`MultipartParser`]/[`QuerystringParser`] state machines with
//! your own handler implementations.

pub use config::FormParserConfig;
pub use decoders::{Base64Decoder, QuotedPrintableDecoder, Sink};
pub use error::Error;
pub use field::Field;
pub use file::File;
pub use form::{create_form_parser, parse_form, FormParser, OnFieldCallback, OnFileCallback};
pub use multipart::{MultipartHandler, MultipartParser};
pub use octet_stream::{OctetStreamHandler, OctetStreamParser};
pub use options_header::parse_options_header;
pub use querystring::{QuerystringHandler, QuerystringParser};

mod config;
mod constants;
mod decoders;
mod error;
mod field;
mod file;
mod form;
mod multipart;
mod octet_stream;
mod options_header;
mod querystring;

/// A Result type often returned from methods that can have `multiform`
/// errors.
pub type Result<T> = std::result::Result<T, Error>;
