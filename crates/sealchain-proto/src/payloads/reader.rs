//! Bounds-checked cursor over untrusted input.
//!
//! Every read names the field it is for, so truncation errors point at the
//! exact spot the input ran dry.

use crate::errors::{ProtocolError, Result};
use crate::varint::decode_varint;

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn byte(&mut self, field: &'static str) -> Result<u8> {
        let bytes = self.bytes(1, field)?;
        Ok(bytes[0])
    }

    pub(crate) fn bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated { field, needed: len - self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let slice = self.bytes(N, field)?;
        let Ok(array) = <[u8; N]>::try_from(slice) else {
            unreachable!("bytes() returned exactly N bytes");
        };
        Ok(array)
    }

    pub(crate) fn varint(&mut self, field: &'static str) -> Result<u64> {
        let (value, used) = decode_varint(&self.buf[self.pos..], field)?;
        self.pos += used;
        Ok(value)
    }

    /// Read a list length and bound it.
    pub(crate) fn list_len(&mut self, field: &'static str, limit: usize) -> Result<usize> {
        let len = self.varint(field)?;
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::FieldTooLarge { field, actual: usize::MAX, limit })?;
        if len > limit {
            return Err(ProtocolError::FieldTooLarge { field, actual: len, limit });
        }
        Ok(len)
    }

    /// Assert the input was fully consumed.
    pub(crate) fn finish(self, context: &'static str) -> Result<()> {
        if self.remaining() != 0 {
            return Err(ProtocolError::TrailingBytes { context, remaining: self.remaining() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_in_order() {
        let mut reader = Reader::new(&[1, 2, 3, 4, 5]);
        assert_eq!(reader.byte("a").unwrap(), 1);
        assert_eq!(reader.array::<2>("b").unwrap(), [2, 3]);
        assert_eq!(reader.bytes(2, "c").unwrap(), &[4, 5]);
        reader.finish("test").unwrap();
    }

    #[test]
    fn truncation_names_the_field() {
        let mut reader = Reader::new(&[1]);
        let err = reader.array::<4>("device_id").unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { field: "device_id", needed: 3 });
    }

    #[test]
    fn finish_rejects_leftovers() {
        let reader = Reader::new(&[1, 2]);
        assert_eq!(
            reader.finish("payload"),
            Err(ProtocolError::TrailingBytes { context: "payload", remaining: 2 })
        );
    }

    #[test]
    fn list_len_enforces_limit() {
        let mut encoded = Vec::new();
        crate::varint::encode_varint(5000, &mut encoded);
        let mut reader = Reader::new(&encoded);
        assert!(matches!(
            reader.list_len("members", 4096),
            Err(ProtocolError::FieldTooLarge { field: "members", actual: 5000, limit: 4096 })
        ));
    }
}
