use crate::bytestring::ByteString;

/// Growable scratch buffer; the only way to produce new byte content.
#[derive(Debug, Default, Clone)]
pub struct ByteStringBuilder {
    buf: Vec<u8>,
}

impl ByteStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) -> &mut Self {
        self.buf.clear();
        self
    }

    pub fn append_byte(&mut self, b: u8) -> &mut Self {
        self.buf.push(b);
        self
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn append(&mut self, s: &ByteString) -> &mut Self {
        self.append_bytes(s.as_bytes())
    }

    pub fn append_long(&mut self, value: i64) -> &mut Self {
        let mut fmt = itoa::Buffer::new();
        self.append_bytes(fmt.format(value).as_bytes())
    }

    /// Appends `parts` with `sep` between consecutive items.
    pub fn append_joined<'a, I>(&mut self, sep: &[u8], parts: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a ByteString>,
    {
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                self.append_bytes(sep);
            }
            self.append(part);
        }
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Copies the current content; the builder stays usable.
    pub fn to_byte_string(&self) -> ByteString {
        ByteString::copy_from_slice(&self.buf)
    }

    /// Moves the content into a byte string without copying.
    pub fn build(self) -> ByteString {
        ByteString::from(self.buf)
    }
}
