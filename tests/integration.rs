use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use multiform::{
    create_form_parser, parse_form, Error, Field, File, FormParser, FormParserConfig,
    OnFieldCallback, OnFileCallback,
};
use std::cell::RefCell;
use std::rc::Rc;

type Collected = (Rc<RefCell<Vec<Field>>>, Rc<RefCell<Vec<File>>>);

fn callbacks() -> (Collected, Option<OnFieldCallback>, Option<OnFileCallback>) {
    let fields = Rc::new(RefCell::new(Vec::new()));
    let files = Rc::new(RefCell::new(Vec::new()));
    let field_sink = Rc::clone(&fields);
    let file_sink = Rc::clone(&files);
    (
        (fields, files),
        Some(Box::new(move |field| field_sink.borrow_mut().push(field))),
        Some(Box::new(move |file| file_sink.borrow_mut().push(file))),
    )
}

fn multipart_parser(boundary: &str, config: FormParserConfig) -> (Collected, FormParser) {
    let (collected, on_field, on_file) = callbacks();
    let parser = FormParser::new(
        "multipart/form-data",
        Some(boundary.as_bytes()),
        None,
        config,
        on_field,
        on_file,
    )
    .unwrap();
    (collected, parser)
}

const TWO_PART_BODY: &[u8] = b"--AaB03x\r\n\
    Content-Disposition: form-data; name=\"field1\"\r\n\
    \r\n\
    value1\r\n\
    --AaB03x\r\n\
    Content-Disposition: form-data; name=\"pics\"; filename=\"file1.txt\"\r\n\
    Content-Type: text/plain\r\n\
    \r\n\
    hello\r\n\
    --AaB03x--\r\n";

#[test]
fn test_multipart_two_parts() {
    let ((fields, files), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());

    // Feed one byte at a time; the callback stream must be identical to a
    // single whole-body write.
    for byte in TWO_PART_BODY {
        parser.write(std::slice::from_ref(byte)).unwrap();
    }
    parser.finalize().unwrap();

    let fields = fields.borrow();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0], Field::from_value("field1", Some(b"value1")));

    let mut files = files.borrow_mut();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].field_name(), Some(b"pics".as_slice()));
    assert_eq!(files[0].file_name(), Some(b"file1.txt".as_slice()));
    assert_eq!(files[0].content_type(), Some(&mime::TEXT_PLAIN));
    assert_eq!(files[0].bytes().unwrap().as_ref(), b"hello");
    assert!(files[0].in_memory());
}

#[test]
fn test_multipart_chunk_invariance() {
    let collect = |chunk: usize| {
        let ((fields, files), mut parser) =
            multipart_parser("AaB03x", FormParserConfig::default());
        for piece in TWO_PART_BODY.chunks(chunk) {
            parser.write(piece).unwrap();
        }
        parser.finalize().unwrap();
        let fields = fields.borrow().iter().map(|f| f.value().map(<[u8]>::to_vec)).collect::<Vec<_>>();
        let contents = files
            .borrow_mut()
            .iter_mut()
            .map(|f| f.bytes().unwrap().to_vec())
            .collect::<Vec<_>>();
        (fields, contents)
    };

    let whole = collect(TWO_PART_BODY.len());
    for chunk in 1..TWO_PART_BODY.len() {
        assert_eq!(collect(chunk), whole, "chunk size {chunk}");
    }
}

#[test]
fn test_urlencoded_form() {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );

    let ((fields, _), on_field, on_file) = callbacks();
    let mut input: &[u8] = b"foo=bar&baz=qux";
    parse_form(&headers, &mut input, on_field, on_file).unwrap();

    let fields = fields.borrow();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0], Field::from_value("foo", Some(b"bar")));
    assert_eq!(fields[1], Field::from_value("baz", Some(b"qux")));
}

#[test]
fn test_urlencoded_none_and_empty_values() {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );

    let ((fields, _), on_field, on_file) = callbacks();
    let mut input: &[u8] = b"foo&bar=&baz=asdf";
    parse_form(&headers, &mut input, on_field, on_file).unwrap();

    let fields = fields.borrow();
    assert_eq!(fields[0].value(), None);
    assert_eq!(fields[1].value(), Some(b"".as_slice()));
    assert_eq!(fields[2].value(), Some(b"asdf".as_slice()));
}

#[test]
fn test_rfc2231_filename() {
    let body = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"file\"; filename*=UTF-8''r%C3%A9sum%C3%A9.txt\r\n\
        \r\n\
        contents\r\n\
        --AaB03x--\r\n";

    let ((_, files), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    parser.write(body).unwrap();
    parser.finalize().unwrap();

    let files = files.borrow();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name(), Some("résumé.txt".as_bytes()));
}

#[test]
fn test_ie_filename_path_is_stripped() {
    let body = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"C:\\web\\upload.dat\"\r\n\
        \r\n\
        x\r\n\
        --AaB03x--\r\n";

    let ((_, files), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    parser.write(body).unwrap();
    parser.finalize().unwrap();

    assert_eq!(
        files.borrow()[0].file_name(),
        Some(b"upload.dat".as_slice())
    );
}

#[test]
fn test_base64_transfer_encoding() {
    // "hello world" -> aGVsbG8gd29ybGQ=
    let body = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"enc.txt\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        aGVsbG8gd29ybGQ=\r\n\
        --AaB03x--\r\n";

    for chunk in [body.len(), 1, 7] {
        let ((_, files), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
        for piece in body.chunks(chunk) {
            parser.write(piece).unwrap();
        }
        parser.finalize().unwrap();

        let mut files = files.borrow_mut();
        assert_eq!(
            files[0].bytes().unwrap().as_ref(),
            b"hello world",
            "chunk size {chunk}"
        );
    }
}

#[test]
fn test_quoted_printable_transfer_encoding() {
    let body = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"text\"\r\n\
        Content-Transfer-Encoding: quoted-printable\r\n\
        \r\n\
        foo=3Dbar=20and=20a=\r\nsoft break\r\n\
        --AaB03x--\r\n";

    let ((fields, _), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    parser.write(body).unwrap();
    parser.finalize().unwrap();

    assert_eq!(
        fields.borrow()[0].value(),
        Some(b"foo=bar and asoft break".as_slice())
    );
}

#[test]
fn test_unknown_transfer_encoding_passes_through() {
    let body = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"raw\"\r\n\
        Content-Transfer-Encoding: x-custom\r\n\
        \r\n\
        as-is\r\n\
        --AaB03x--\r\n";

    let ((fields, _), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    parser.write(body).unwrap();
    parser.finalize().unwrap();
    assert_eq!(fields.borrow()[0].value(), Some(b"as-is".as_slice()));

    // And with the strict option on, the same body is an error.
    let ((_, _), mut parser) = multipart_parser(
        "AaB03x",
        FormParserConfig::default().upload_error_on_bad_cte(true),
    );
    let err = parser.write(body).unwrap_err();
    assert!(matches!(err, Error::UnknownTransferEncoding { .. }));
}

#[test]
fn test_large_upload_spills_once() {
    let payload = vec![b'z'; 64 * 1024];
    let mut body = Vec::new();
    body.extend_from_slice(
        b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\
        Content-Type: application/octet-stream\r\n\
        \r\n",
    );
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\r\n--AaB03x--\r\n");

    let ((_, files), mut parser) = multipart_parser(
        "AaB03x",
        FormParserConfig::default().max_memory_file_size(1024),
    );
    for piece in body.chunks(513) {
        parser.write(piece).unwrap();
    }
    parser.finalize().unwrap();

    let mut files = files.borrow_mut();
    assert_eq!(files.len(), 1);
    assert!(!files[0].in_memory());
    assert_eq!(files[0].size(), payload.len() as u64);

    let path = files[0].actual_path().unwrap().to_path_buf();
    assert!(path.exists());
    assert_eq!(files[0].bytes().unwrap(), Bytes::from(payload));

    files.clear();
    assert!(!path.exists(), "spill file should be removed with the File");
}

#[test]
fn test_trailing_garbage_after_closing_boundary() {
    let ((_, _), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    let err = parser.write(b"--AaB03x--XYZ").unwrap_err();
    assert!(matches!(err, Error::MultipartParse { .. }));
    assert!(err.offset().is_some());

    // A lone CRLF is fine.
    let ((_, _), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    parser.write(b"--AaB03x--\r\n").unwrap();
    parser.finalize().unwrap();
}

#[test]
fn test_boundary_prefix_in_file_data() {
    let body = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"data.bin\"\r\n\
        \r\n\
        prefix \r\n--AaB03 not a boundary\r\n\
        --AaB03x--\r\n";

    let ((_, files), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    for byte in body.iter() {
        parser.write(std::slice::from_ref(byte)).unwrap();
    }
    parser.finalize().unwrap();

    let mut files = files.borrow_mut();
    assert_eq!(
        files[0].bytes().unwrap().as_ref(),
        b"prefix \r\n--AaB03 not a boundary"
    );
}

#[test]
fn test_max_body_size_is_fatal() {
    let ((_, _), mut parser) =
        multipart_parser("AaB03x", FormParserConfig::default().max_body_size(8));
    let err = parser.write(TWO_PART_BODY).unwrap_err();
    assert_eq!(err, Error::BodySizeExceeded { limit: 8 });

    // Terminal: the error repeats.
    assert_eq!(
        parser.write(b"x").unwrap_err(),
        Error::BodySizeExceeded { limit: 8 }
    );
}

#[test]
fn test_parse_form_honors_content_length() {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("7"));

    let ((fields, _), on_field, on_file) = callbacks();
    let mut input: &[u8] = b"foo=bar&this-is-not-read";
    parse_form(&headers, &mut input, on_field, on_file).unwrap();

    let fields = fields.borrow();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0], Field::from_value("foo", Some(b"bar")));
}

#[test]
fn test_parse_form_multipart_end_to_end() {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/form-data; boundary=AaB03x"),
    );

    let ((fields, files), on_field, on_file) = callbacks();
    let mut input = TWO_PART_BODY;
    parse_form(&headers, &mut input, on_field, on_file).unwrap();

    assert_eq!(fields.borrow().len(), 1);
    assert_eq!(files.borrow().len(), 1);
}

#[test]
fn test_create_form_parser_extracts_boundary() {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/form-data; boundary=\"AaB03x\""),
    );

    let ((fields, _), on_field, on_file) = callbacks();
    let mut parser =
        create_form_parser(&headers, on_field, on_file, FormParserConfig::default()).unwrap();
    parser.write(TWO_PART_BODY).unwrap();
    parser.finalize().unwrap();
    assert_eq!(fields.borrow().len(), 1);
}

#[test]
fn test_missing_boundary_is_an_error() {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/form-data"),
    );
    let result = create_form_parser(&headers, None, None, FormParserConfig::default());
    assert!(matches!(result, Err(Error::NoBoundary)));
}

#[test]
fn test_octet_stream_with_x_file_name() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert("x-file-name", HeaderValue::from_static("report.pdf"));

    let ((_, files), on_field, on_file) = callbacks();
    let mut input: &[u8] = b"%PDF-1.4 pretend";
    parse_form(&headers, &mut input, on_field, on_file).unwrap();

    let mut files = files.borrow_mut();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name(), Some(b"report.pdf".as_slice()));
    assert_eq!(files[0].bytes().unwrap().as_ref(), b"%PDF-1.4 pretend");
}

#[test]
fn test_empty_multipart_body_with_closing_boundary_only() {
    let ((fields, files), mut parser) = multipart_parser("AaB03x", FormParserConfig::default());
    parser.write(b"--AaB03x--\r\n").unwrap();
    parser.finalize().unwrap();
    assert!(fields.borrow().is_empty());
    assert!(files.borrow().is_empty());
}
