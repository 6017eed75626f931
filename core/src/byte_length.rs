use bytes::{Bytes, BytesMut};
use std::any::Any;

/// Weight given to payloads that are not byte containers.
pub const DEFAULT_WEIGHT: usize = 1024;

/// A payload that knows how many bytes it occupies in a queue.
pub trait ByteLength {
    fn byte_length(&self) -> usize;
}

impl ByteLength for Bytes {
    fn byte_length(&self) -> usize {
        self.len()
    }
}

impl ByteLength for BytesMut {
    fn byte_length(&self) -> usize {
        self.len()
    }
}

impl ByteLength for Vec<u8> {
    fn byte_length(&self) -> usize {
        self.len()
    }
}

impl ByteLength for Box<[u8]> {
    fn byte_length(&self) -> usize {
        self.len()
    }
}

impl ByteLength for &'static [u8] {
    fn byte_length(&self) -> usize {
        self.len()
    }
}

impl ByteLength for Vec<u16> {
    fn byte_length(&self) -> usize {
        self.len() * 2
    }
}

impl ByteLength for Vec<u32> {
    fn byte_length(&self) -> usize {
        self.len() * 4
    }
}

fn measure<B: ByteLength + 'static>(data: &dyn Any) -> Option<usize> {
    data.downcast_ref::<B>().map(ByteLength::byte_length)
}

/// Byte containers report their length; everything else weighs [`DEFAULT_WEIGHT`].
pub fn default_byte_length<T: 'static>(data: &T) -> usize {
    let data = data as &dyn Any;
    measure::<Bytes>(data)
        .or_else(|| measure::<BytesMut>(data))
        .or_else(|| measure::<Vec<u8>>(data))
        .or_else(|| measure::<Box<[u8]>>(data))
        .or_else(|| measure::<&'static [u8]>(data))
        .or_else(|| measure::<Vec<u16>>(data))
        .or_else(|| measure::<Vec<u32>>(data))
        .unwrap_or(DEFAULT_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containers_report_length() {
        assert_eq!(default_byte_length(&Bytes::from_static(b"hello")), 5);
        assert_eq!(default_byte_length(&vec![0u8; 3]), 3);
        assert_eq!(default_byte_length(&vec![0u16; 3]), 6);
        assert_eq!(default_byte_length(&vec![0u32; 3]), 12);
        let slice: &'static [u8] = b"abcd";
        assert_eq!(default_byte_length(&slice), 4);
    }

    #[test]
    fn test_everything_else_is_weighted() {
        assert_eq!(default_byte_length(&"hello"), DEFAULT_WEIGHT);
        assert_eq!(default_byte_length(&String::from("hello")), DEFAULT_WEIGHT);
        assert_eq!(default_byte_length(&42u64), DEFAULT_WEIGHT);
        assert_eq!(default_byte_length(&Bytes::new()), 0);
    }
}
