// Package model provides typed key/value serialization.

use std::io;

use super::sink::BytesSink;

/// Converts typed keys and values to and from cache bytes.
///
/// `serialized_size` must match exactly what `serialize` produces: the
/// value chain is allocated from the declared size before serialization
/// streams into it.
pub trait Serializer<T>: Send + Sync {
    /// Exact number of bytes `serialize` will produce for `value`.
    fn serialized_size(&self, value: &T) -> usize;

    /// Streams the serialized form into `sink`.
    fn serialize(&self, value: &T, sink: &mut dyn BytesSink) -> io::Result<()>;

    /// Rebuilds a value from its serialized form.
    fn deserialize(&self, bytes: &[u8]) -> io::Result<T>;
}

/// Identity serializer for raw byte vectors.
pub struct RawBytesSerializer;

impl Serializer<Vec<u8>> for RawBytesSerializer {
    fn serialized_size(&self, value: &Vec<u8>) -> usize {
        value.len()
    }

    fn serialize(&self, value: &Vec<u8>, sink: &mut dyn BytesSink) -> io::Result<()> {
        sink.put(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> io::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 serializer for strings.
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialized_size(&self, value: &String) -> usize {
        value.len()
    }

    fn serialize(&self, value: &String, sink: &mut dyn BytesSink) -> io::Result<()> {
        sink.put(value.as_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> io::Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
