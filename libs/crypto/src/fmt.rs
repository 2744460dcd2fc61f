//! Traits for text (human readable) and byte encodings for crypto primitives.
use anyhow::Context as _;

/// Utility for parsing human-readable text representations via TextFmt::decode.
/// It keeps a reference to the initial text and a reference to the remaining unparsed text,
/// so that parsing errors can point at the offending position.
pub struct Text<'a> {
    context: &'a str,
    inner: &'a str,
}

impl<'a> Text<'a> {
    /// Constructs a new unparsed text.
    pub fn new(s: &'a str) -> Self {
        Self {
            context: s,
            inner: s,
        }
    }

    /// Prefix of this text, which has been already parsed.
    fn prefix(&self) -> &'a str {
        // `self.inner` is a suffix of `self.context`, so the range end is a char boundary.
        &self.context[..self.context.len() - self.inner.len()]
    }

    /// Strips a fixed prefix from the remaining text.
    pub fn strip(mut self, prefix: &str) -> anyhow::Result<Self> {
        let Some(inner) = self.inner.strip_prefix(prefix) else {
            anyhow::bail!("{}: expected {} got {}", self.prefix(), prefix, self.inner);
        };
        self.inner = inner;
        Ok(self)
    }

    /// Parses the remaining text as hex and converts the bytes to T via ByteFmt.
    pub fn decode_hex<T: ByteFmt>(self) -> anyhow::Result<T> {
        let raw = hex::decode(self.inner).context(self.prefix().to_owned())?;
        ByteFmt::decode(&raw).context(self.prefix().to_owned())
    }

    /// Syntax sugar for `TextFmt::decode`.
    pub fn decode<T: TextFmt>(self) -> anyhow::Result<T> {
        TextFmt::decode(self)
    }
}

/// Trait converting a type from/to a human-readable text format.
/// `x == decode(x.encode())` has to hold, and encodings of different
/// key types/roles must not parse as each other. Encoded strings end up
/// in config files, so the format has to stay backward compatible.
pub trait TextFmt: Sized {
    /// Decodes the object from a text representation.
    fn decode(text: Text) -> anyhow::Result<Self>;
    /// Encodes the object to a text representation.
    fn encode(&self) -> String;
}

/// Trait converting a type from/to a byte format.
/// Unlike serde, the binary encoding is well defined, which matters for
/// anything that ends up being hashed or signed.
pub trait ByteFmt: Sized {
    /// Decodes the object from the byte representation.
    fn decode(bytes: &[u8]) -> anyhow::Result<Self>;
    /// Encodes the object to the byte representation.
    fn encode(&self) -> Vec<u8>;
}

/// Serializes a value using its text representation.
/// Meant to back manual `serde::Serialize` impls.
pub fn serialize_text<T: TextFmt, S: serde::Serializer>(v: &T, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.encode())
}

/// Deserializes a value from its text representation.
/// Meant to back manual `serde::Deserialize` impls.
pub fn deserialize_text<'de, T: TextFmt, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<T, D::Error> {
    let s: String = serde::Deserialize::deserialize(d)?;
    Text::new(&s)
        .decode()
        .map_err(|err| serde::de::Error::custom(format!("{err:#}")))
}

impl TextFmt for std::net::SocketAddr {
    fn decode(text: Text) -> anyhow::Result<Self> {
        Ok(text.inner.parse()?)
    }
    fn encode(&self) -> String {
        self.to_string()
    }
}
