//! Option numbers and the typed option values the session engine inspects.

use std::fmt;

/// Registered option number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    /// If-Match: conditional-update marker.
    pub const IF_MATCH: Self = Self(1);
    /// Uri-Host.
    pub const URI_HOST: Self = Self(3);
    /// ETag: cache validator tying fragments of one representation together.
    pub const ETAG: Self = Self(4);
    /// Observe: subscription directive / notification sequence.
    pub const OBSERVE: Self = Self(6);
    /// Uri-Path (repeatable).
    pub const URI_PATH: Self = Self(11);
    /// Content-Format.
    pub const CONTENT_FORMAT: Self = Self(12);
    /// Max-Age: freshness lifetime in seconds.
    pub const MAX_AGE: Self = Self(14);
    /// Uri-Query (repeatable).
    pub const URI_QUERY: Self = Self(15);
    /// Block2: response fragment descriptor.
    pub const BLOCK2: Self = Self(23);
    /// Block1: request fragment descriptor.
    pub const BLOCK1: Self = Self(27);
    /// Size2: total size of the fragmented representation.
    pub const SIZE2: Self = Self(28);
}

/// One option instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOption {
    /// Option number.
    pub number: OptionNumber,
    /// Raw option value.
    pub value: Vec<u8>,
}

/// Content-Format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    /// `text/plain; charset=utf-8`.
    pub const TEXT_PLAIN: Self = Self(0);
    /// `application/json`.
    pub const JSON: Self = Self(50);
    /// `application/cbor`.
    pub const CBOR: Self = Self(60);
}

/// Subscription directive carried in the Observe option of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observe {
    /// Start receiving notifications for the target resource.
    Register,
    /// Stop receiving notifications.
    Deregister,
}

impl Observe {
    /// Numeric option value.
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            Self::Register => 0,
            Self::Deregister => 1,
        }
    }

    /// Map a numeric option value to a directive. Values other than 0 and 1
    /// are not subscription directives.
    #[must_use]
    pub const fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Register),
            1 => Some(Self::Deregister),
            _ => None,
        }
    }
}

/// Block-wise transfer descriptor (`num`, `more`, size exponent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Fragment number.
    pub num: u32,
    /// `true` when further fragments follow.
    pub more: bool,
    /// Size exponent; the fragment size is `2^(szx + 4)`.
    pub szx: u8,
}

/// Largest legal size exponent (1024-byte fragments).
pub const MAX_SZX: u8 = 6;

impl Block {
    /// Build a descriptor, clamping `szx` to the legal range.
    #[must_use]
    pub fn new(num: u32, more: bool, szx: u8) -> Self {
        Self {
            num,
            more,
            szx: szx.min(MAX_SZX),
        }
    }

    /// Decode the option value.
    #[must_use]
    pub fn from_u32(raw: u32) -> Self {
        Self {
            num: raw >> 4,
            more: raw & 0x08 != 0,
            szx: u8::try_from(raw & 0x07).unwrap_or(MAX_SZX).min(MAX_SZX),
        }
    }

    /// Encode the option value.
    #[must_use]
    pub fn to_u32(self) -> u32 { (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx & 0x07) }

    /// Fragment size in bytes.
    #[must_use]
    pub const fn size(self) -> usize { 1 << (self.szx as usize + 4) }

    /// Byte offset of this fragment within the whole representation.
    #[must_use]
    pub fn offset(self) -> usize { usize::try_from(self.num).unwrap_or(usize::MAX).saturating_mul(self.size()) }

    /// Descriptor requesting the fragment after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            num: self.num.saturating_add(1),
            more: false,
            szx: self.szx,
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.num, u8::from(self.more), self.size())
    }
}

/// Longest ETag the option format allows.
pub const MAX_ETAG_LEN: usize = 8;

/// ETag cache validator: 1 to 8 opaque bytes, compared and echoed verbatim.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ETag(Vec<u8>);

impl ETag {
    /// Wrap an option value. Returns `None` for an empty or over-long value.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (1..=MAX_ETAG_LEN)
            .contains(&bytes.len())
            .then(|| Self(bytes.to_vec()))
    }

    /// Raw validator bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&hex::encode(&self.0)) }
}

impl fmt::Debug for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ETag({self})") }
}

/// Minimal big-endian encoding of an unsigned option value.
#[must_use]
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes.iter().skip(skip).copied().collect()
}

/// Decode an unsigned option value of at most four bytes.
#[must_use]
pub fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0_u32, |acc, b| (acc << 8) | u32::from(*b)))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, vec![])]
    #[case(5, vec![5])]
    #[case(0x0100, vec![1, 0])]
    #[case(0x0001_0000, vec![1, 0, 0])]
    fn uint_uses_minimal_length(#[case] value: u32, #[case] bytes: Vec<u8>) {
        assert_eq!(encode_uint(value), bytes);
        assert_eq!(decode_uint(&bytes), Some(value));
    }

    #[rstest]
    fn uint_longer_than_four_bytes_is_rejected() {
        assert_eq!(decode_uint(&[1, 2, 3, 4, 5]), None);
    }

    #[rstest]
    #[case(&[0x00, 0x2a])]
    #[case(&[1, 2, 3, 4, 5, 6, 7, 8])]
    fn etag_keeps_bytes_verbatim(#[case] bytes: &[u8]) {
        assert_eq!(ETag::from_bytes(bytes).map(|t| t.as_bytes().to_vec()), Some(bytes.to_vec()));
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0; 9])]
    fn etag_length_is_bounded(#[case] bytes: &[u8]) {
        assert_eq!(ETag::from_bytes(bytes), None);
    }

    #[rstest]
    fn block_descriptor_packs_fields() {
        let block = Block::new(3, true, 2);
        assert_eq!(block.to_u32(), (3 << 4) | 0x08 | 2);
        assert_eq!(Block::from_u32(block.to_u32()), block);
        assert_eq!(block.size(), 64);
        assert_eq!(block.offset(), 192);
    }

    #[rstest]
    fn next_block_clears_more_flag() {
        let next = Block::new(0, true, 6).next();
        assert_eq!(next, Block::new(1, false, 6));
    }

    #[rstest]
    #[case(0, Some(Observe::Register))]
    #[case(1, Some(Observe::Deregister))]
    #[case(7, None)]
    fn observe_values_map_to_directives(#[case] value: u32, #[case] expected: Option<Observe>) {
        assert_eq!(Observe::from_value(value), expected);
    }
}
