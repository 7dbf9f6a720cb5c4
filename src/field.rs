use crate::decoders::Sink;
use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::fmt::{self, Debug, Formatter};

/// A completed (or in-progress) form field.
///
/// The value is buffered in memory and handed over as one piece once the
/// field ends. A field's value can be *absent* rather than empty: in a
/// querystring, `foo&bar=&baz=qux` yields `foo` with no value, `bar` with an
/// empty one, and `baz` with `qux`.
pub struct Field {
    name: Option<Bytes>,
    value: BytesMut,
    is_none: bool,
}

impl Field {
    pub fn new(name: Option<Bytes>) -> Field {
        Field {
            name,
            value: BytesMut::new(),
            is_none: false,
        }
    }

    /// Creates an already-complete field, `None` marking an absent value.
    pub fn from_value(name: impl Into<Bytes>, value: Option<&[u8]>) -> Field {
        let mut field = Field::new(Some(name.into()));
        match value {
            Some(value) => {
                field.on_data(value);
            }
            None => field.set_none(),
        }
        field
    }

    /// Appends a chunk of value data.
    pub fn on_data(&mut self, data: &[u8]) -> usize {
        self.value.extend_from_slice(data);
        self.is_none = false;
        data.len()
    }

    /// Marks the value as absent (distinct from empty).
    pub fn set_none(&mut self) {
        self.is_none = true;
    }

    /// The field name, when one was seen.
    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    /// The field value, or `None` when the value is absent.
    pub fn value(&self) -> Option<&[u8]> {
        if self.is_none {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Consumes the field and returns its value.
    pub fn into_value(self) -> Option<Bytes> {
        if self.is_none {
            None
        } else {
            Some(self.value.freeze())
        }
    }

    /// The value decoded as UTF-8 text.
    pub fn text(&self) -> Option<String> {
        self.text_with_charset("utf-8")
    }

    /// The value decoded with the given charset label, falling back to UTF-8
    /// when the label is unknown.
    pub fn text_with_charset(&self, charset: &str) -> Option<String> {
        let bytes = self.value()?;
        let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(bytes);
        match text {
            Cow::Owned(s) => Some(s),
            Cow::Borrowed(s) => Some(String::from(s)),
        }
    }
}

impl Sink for Field {
    fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        Ok(self.on_data(data))
    }

    fn finalize(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Field) -> bool {
        self.name() == other.name() && self.value() == other.value()
    }
}

impl Eq for Field {}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_chunks() {
        let mut field = Field::new(Some(Bytes::from_static(b"username")));
        field.on_data(b"ad");
        field.on_data(b"min");
        assert_eq!(field.name(), Some(b"username".as_slice()));
        assert_eq!(field.value(), Some(b"admin".as_slice()));
    }

    #[test]
    fn test_none_vs_empty() {
        let mut field = Field::new(Some(Bytes::from_static(b"flag")));
        field.set_none();
        assert_eq!(field.value(), None);

        let empty = Field::from_value("flag", Some(b""));
        assert_eq!(empty.value(), Some(b"".as_slice()));
        assert_ne!(field, empty);
    }

    #[test]
    fn test_write_after_set_none_restores_value() {
        let mut field = Field::new(Some(Bytes::from_static(b"x")));
        field.set_none();
        field.on_data(b"data");
        assert_eq!(field.value(), Some(b"data".as_slice()));
    }

    #[test]
    fn test_from_value_equality() {
        let a = Field::from_value("name", Some(b"value"));
        let b = Field::from_value("name", Some(b"value"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_text_with_charset() {
        let field = Field::from_value("greeting", Some("héllo".as_bytes()));
        assert_eq!(field.text().as_deref(), Some("héllo"));

        let latin1 = Field::from_value("greeting", Some(&[0x68, 0xe9, 0x6c, 0x6c, 0x6f]));
        assert_eq!(
            latin1.text_with_charset("latin1").as_deref(),
            Some("héllo")
        );
    }
}
