use crate::config::FormParserConfig;
use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::decoders::{Base64Decoder, QuotedPrintableDecoder, Sink};
use crate::error::Error;
use crate::field::Field;
use crate::file::File;
use crate::multipart::{MultipartHandler, MultipartParser};
use crate::octet_stream::{OctetStreamHandler, OctetStreamParser};
use crate::options_header::parse_options_header;
use crate::querystring::{QuerystringHandler, QuerystringParser};
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::io::Read;

/// Callback invoked with every completed [`Field`].
pub type OnFieldCallback = Box<dyn FnMut(Field)>;

/// Callback invoked with every completed [`File`].
pub type OnFileCallback = Box<dyn FnMut(File)>;

/// Orchestrator that picks a parser from the request's `Content-Type` and
/// assembles completed [`Field`]s and [`File`]s out of the callback stream.
///
/// - `application/x-www-form-urlencoded` bodies go through
///   [`QuerystringParser`] and emit fields.
/// - `multipart/form-data` bodies go through [`MultipartParser`]; parts with
///   a `filename` become files, the rest become fields, and
///   `Content-Transfer-Encoding` is honored per part.
/// - anything else is treated as an opaque upload via [`OctetStreamParser`].
pub struct FormParser {
    parser: InnerParser,
    bytes_received: u64,
}

enum InnerParser {
    OctetStream(OctetStreamParser<OctetFormHandler>),
    Querystring(QuerystringParser<QuerystringFormHandler>),
    Multipart(MultipartParser<MultipartFormHandler>),
}

impl FormParser {
    /// Creates a parser for the given `Content-Type` main value.
    ///
    /// `boundary` is required for multipart bodies; `file_name` seeds the
    /// filename of an opaque upload (for clients that send `X-File-Name`).
    pub fn new(
        content_type: &str,
        boundary: Option<&[u8]>,
        file_name: Option<Bytes>,
        config: FormParserConfig,
        on_field: Option<OnFieldCallback>,
        on_file: Option<OnFileCallback>,
    ) -> crate::Result<FormParser> {
        let max_size = config.max_body_size;
        let mime_type = content_type.trim().parse::<mime::Mime>().ok();

        let parser = match &mime_type {
            Some(m) if m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA => {
                let boundary = boundary.ok_or(Error::NoBoundary)?;
                let handler = MultipartFormHandler {
                    config,
                    header_name: BytesMut::new(),
                    header_value: BytesMut::new(),
                    headers: HeaderMap::new(),
                    writer: None,
                    on_field,
                    on_file,
                };
                InnerParser::Multipart(MultipartParser::new(boundary, handler, max_size)?)
            }

            Some(m)
                if m.type_() == mime::APPLICATION
                    && (m.subtype() == mime::WWW_FORM_URLENCODED
                        || m.subtype().as_str() == "x-url-encoded") =>
            {
                let handler = QuerystringFormHandler {
                    name: BytesMut::new(),
                    field: None,
                    on_field,
                };
                InnerParser::Querystring(QuerystringParser::new(handler, false, max_size))
            }

            _ => {
                log::debug!(
                    "treating Content-Type {:?} as an opaque byte stream",
                    content_type
                );
                let handler = OctetFormHandler {
                    config,
                    file_name,
                    file: None,
                    on_file,
                };
                InnerParser::OctetStream(OctetStreamParser::new(handler, max_size))
            }
        };

        Ok(FormParser {
            parser,
            bytes_received: 0,
        })
    }

    /// Feeds a chunk of body data. User callbacks run inline.
    pub fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        let written = match &mut self.parser {
            InnerParser::OctetStream(parser) => parser.write(data)?,
            InnerParser::Querystring(parser) => parser.write(data)?,
            InnerParser::Multipart(parser) => parser.write(data)?,
        };
        self.bytes_received += written as u64;
        Ok(written)
    }

    /// Signals the end of the body, emitting anything still pending.
    pub fn finalize(&mut self) -> crate::Result<()> {
        match &mut self.parser {
            InnerParser::OctetStream(parser) => parser.finalize(),
            InnerParser::Querystring(parser) => parser.finalize(),
            InnerParser::Multipart(parser) => parser.finalize(),
        }
    }

    /// Total bytes fed into the parser so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

// Either container a multipart part streams into.
enum PartTarget {
    Field(Field),
    File(File),
}

impl Sink for PartTarget {
    fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        match self {
            PartTarget::Field(field) => field.write(data),
            PartTarget::File(file) => file.write(data),
        }
    }

    fn finalize(&mut self) -> crate::Result<()> {
        match self {
            PartTarget::Field(field) => Sink::finalize(field),
            PartTarget::File(file) => Sink::finalize(file),
        }
    }
}

// The per-part write path: the container, optionally behind a
// transfer-encoding decoder.
enum PartWriter {
    Plain(PartTarget),
    Base64(Base64Decoder<PartTarget>),
    QuotedPrintable(QuotedPrintableDecoder<PartTarget>),
}

impl PartWriter {
    fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        match self {
            PartWriter::Plain(target) => target.write(data),
            PartWriter::Base64(decoder) => decoder.write(data),
            PartWriter::QuotedPrintable(decoder) => decoder.write(data),
        }
    }

    fn finalize(&mut self) -> crate::Result<()> {
        match self {
            PartWriter::Plain(target) => target.finalize(),
            PartWriter::Base64(decoder) => decoder.finalize(),
            PartWriter::QuotedPrintable(decoder) => decoder.finalize(),
        }
    }

    fn into_target(self) -> PartTarget {
        match self {
            PartWriter::Plain(target) => target,
            PartWriter::Base64(decoder) => decoder.into_inner(),
            PartWriter::QuotedPrintable(decoder) => decoder.into_inner(),
        }
    }
}

struct MultipartFormHandler {
    config: FormParserConfig,
    header_name: BytesMut,
    header_value: BytesMut,
    headers: HeaderMap,
    writer: Option<PartWriter>,
    on_field: Option<OnFieldCallback>,
    on_file: Option<OnFileCallback>,
}

impl MultipartHandler for MultipartFormHandler {
    fn on_part_begin(&mut self) -> crate::Result<()> {
        self.headers.clear();
        Ok(())
    }

    fn on_header_field(&mut self, data: &[u8]) -> crate::Result<()> {
        self.header_name.extend_from_slice(data);
        Ok(())
    }

    fn on_header_value(&mut self, data: &[u8]) -> crate::Result<()> {
        self.header_value.extend_from_slice(data);
        Ok(())
    }

    fn on_header_end(&mut self) -> crate::Result<()> {
        let name = HeaderName::from_bytes(&self.header_name).map_err(|err| {
            Error::MultipartParse {
                message: format!("invalid part header name: {err}"),
                offset: None,
            }
        })?;
        let value = HeaderValue::from_bytes(&self.header_value).map_err(|err| {
            Error::MultipartParse {
                message: format!("invalid part header value: {err}"),
                offset: None,
            }
        })?;
        self.headers.insert(name, value);
        self.header_name.clear();
        self.header_value.clear();
        Ok(())
    }

    fn on_headers_finished(&mut self) -> crate::Result<()> {
        let disposition = self
            .headers
            .get(header::CONTENT_DISPOSITION)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        let (_, params) = parse_options_header(disposition);

        let field_name = params.get(b"name".as_slice()).cloned().map(Bytes::from);
        let file_name = params.get(b"filename".as_slice()).cloned().map(Bytes::from);

        let target = match file_name {
            None => PartTarget::Field(Field::new(field_name)),
            Some(file_name) => {
                let content_type = self
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<mime::Mime>().ok());
                PartTarget::File(File::new(
                    Some(file_name),
                    field_name,
                    content_type,
                    params,
                    &self.config,
                ))
            }
        };

        let transfer_encoding = self
            .headers
            .get("content-transfer-encoding")
            .map(|value| value.as_bytes().to_ascii_lowercase())
            .unwrap_or_else(|| b"7bit".to_vec());

        self.writer = Some(match transfer_encoding.as_slice() {
            b"7bit" | b"8bit" | b"binary" => PartWriter::Plain(target),
            b"base64" => PartWriter::Base64(Base64Decoder::new(target)),
            b"quoted-printable" => {
                PartWriter::QuotedPrintable(QuotedPrintableDecoder::new(target))
            }
            other => {
                let encoding = String::from_utf8_lossy(other).into_owned();
                if self.config.upload_error_on_bad_cte {
                    return Err(Error::UnknownTransferEncoding { encoding });
                }
                log::warn!(
                    "unknown Content-Transfer-Encoding {:?}, passing part data through",
                    encoding
                );
                PartWriter::Plain(target)
            }
        });
        Ok(())
    }

    fn on_part_data(&mut self, data: &[u8]) -> crate::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write(data)?;
        }
        Ok(())
    }

    fn on_part_end(&mut self) -> crate::Result<()> {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        writer.finalize()?;

        match writer.into_target() {
            PartTarget::Field(field) => {
                if let Some(on_field) = self.on_field.as_mut() {
                    on_field(field);
                }
            }
            PartTarget::File(file) => {
                if let Some(on_file) = self.on_file.as_mut() {
                    on_file(file);
                }
            }
        }
        Ok(())
    }
}

struct QuerystringFormHandler {
    name: BytesMut,
    field: Option<Field>,
    on_field: Option<OnFieldCallback>,
}

impl QuerystringHandler for QuerystringFormHandler {
    fn on_field_name(&mut self, data: &[u8]) -> crate::Result<()> {
        self.name.extend_from_slice(data);
        Ok(())
    }

    fn on_field_data(&mut self, data: &[u8]) -> crate::Result<()> {
        let name = &mut self.name;
        let field = self
            .field
            .get_or_insert_with(|| Field::new(Some(name.split().freeze())));
        field.on_data(data);
        Ok(())
    }

    fn on_field_end(&mut self) -> crate::Result<()> {
        let field = match self.field.take() {
            Some(field) => field,
            None => {
                // No '=' was seen, so the value is absent rather than empty.
                let mut field = Field::new(Some(self.name.split().freeze()));
                field.set_none();
                field
            }
        };

        if let Some(on_field) = self.on_field.as_mut() {
            on_field(field);
        }
        Ok(())
    }
}

struct OctetFormHandler {
    config: FormParserConfig,
    file_name: Option<Bytes>,
    file: Option<File>,
    on_file: Option<OnFileCallback>,
}

impl OctetStreamHandler for OctetFormHandler {
    fn on_start(&mut self) -> crate::Result<()> {
        self.file = Some(File::new(
            self.file_name.take(),
            None,
            None,
            HashMap::new(),
            &self.config,
        ));
        Ok(())
    }

    fn on_data(&mut self, data: &[u8]) -> crate::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.on_data(data)?;
        }
        Ok(())
    }

    fn on_end(&mut self) -> crate::Result<()> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => return Ok(()),
        };
        file.on_end()?;

        if let Some(on_file) = self.on_file.as_mut() {
            on_file(file);
        }
        Ok(())
    }
}

/// Creates a [`FormParser`] from request headers.
///
/// Reads `Content-Type` (and its `boundary` parameter for multipart bodies);
/// an `X-File-Name` header seeds the filename of opaque uploads.
pub fn create_form_parser(
    headers: &HeaderMap,
    on_field: Option<OnFieldCallback>,
    on_file: Option<OnFileCallback>,
    config: FormParserConfig,
) -> crate::Result<FormParser> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .ok_or(Error::NoContentType)?;

    let (main_value, params) = parse_options_header(content_type.as_bytes());
    let boundary = params.get(b"boundary".as_slice()).cloned();
    let content_type = String::from_utf8_lossy(&main_value).into_owned();

    let file_name = headers
        .get("x-file-name")
        .map(|value| Bytes::copy_from_slice(value.as_bytes()));

    FormParser::new(
        &content_type,
        boundary.as_deref(),
        file_name,
        config,
        on_field,
        on_file,
    )
}

/// One-shot convenience: reads `input` in chunks of up to 1 MiB, drives a
/// [`FormParser`], and finalizes it. `Content-Length` bounds the read when
/// present.
pub fn parse_form<R: Read>(
    headers: &HeaderMap,
    input: &mut R,
    on_field: Option<OnFieldCallback>,
    on_file: Option<OnFileCallback>,
) -> crate::Result<()> {
    let mut parser = create_form_parser(headers, on_field, on_file, FormParserConfig::default())?;

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut bytes_read = 0u64;

    loop {
        let want = match content_length {
            Some(length) => (length - bytes_read).min(DEFAULT_CHUNK_SIZE as u64) as usize,
            None => DEFAULT_CHUNK_SIZE,
        };
        if want == 0 {
            break;
        }

        let read = input.read(&mut buf[..want])?;
        if read == 0 {
            break;
        }
        parser.write(&buf[..read])?;
        bytes_read += read as u64;
    }

    parser.finalize()
}
