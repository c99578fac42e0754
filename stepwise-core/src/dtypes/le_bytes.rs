/// Convert an element to and from little endian bytes.
pub trait LeBytes: Sized {
    fn extend_le_bytes(self, out: &mut Vec<u8>);
    /// Returns `None` when `bytes` has the wrong length.
    fn from_le_bytes(bytes: &[u8]) -> Option<Self>;
}

macro_rules! le_bytes {
    ($type:ty) => {
        impl LeBytes for $type {
            fn extend_le_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
            fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(Self::from_le_bytes)
            }
        }
    };
}

le_bytes!(f32);
le_bytes!(f64);
