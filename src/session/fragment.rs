//! Reassembly of Block2-fragmented payloads.
//!
//! Fragments of one representation share a [`FragmentKey`]: the ETag cache
//! validator plus the token they arrived on. The first fragment is buffered
//! together with its message so options such as Observe and Max-Age survive
//! reassembly; later fragments must arrive at the offset matching the bytes
//! already buffered.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::message::{Block, ETag, Message, OptionNumber, Token};

/// Upper bound on a reassembled payload.
pub const MAX_REASSEMBLED_SIZE: usize = 1024 * 1024;

/// Identity of one fragmented representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    /// ETag of the representation, when the server supplied one.
    pub tag: Option<ETag>,
    /// Token the fragments arrive on.
    pub token: Token,
}

/// Bytes accumulated so far for one representation.
#[derive(Debug, Clone)]
pub struct PartialPayload {
    head: Message,
    data: Vec<u8>,
}

impl PartialPayload {
    fn new(head: &Message) -> Self {
        Self {
            data: head.payload.clone(),
            head: head.clone(),
        }
    }

    /// Number of bytes buffered.
    #[must_use]
    pub fn len(&self) -> usize { self.data.len() }

    /// `true` when nothing has been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Rebuild the full message: the first fragment's header and options
    /// with the concatenated payload.
    #[must_use]
    pub fn into_message(self) -> Message {
        let mut message = self.head;
        message.payload = self.data;
        message.remove_option(OptionNumber::BLOCK2);
        message
    }
}

/// Outcome of inspecting a message for fragmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// The message is complete on its own.
    Whole,
    /// More fragments follow; request `next`, echoing `tag`.
    More {
        /// Descriptor for the follow-up request.
        next: Block,
        /// ETag to send with the follow-up request.
        tag: Option<ETag>,
    },
    /// The final fragment was appended; take the payload stored at `key`.
    Last {
        /// Buffer entry holding the full payload.
        key: FragmentKey,
    },
}

/// Reasons a fragment chain is discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// A fragment did not continue where the buffer ends.
    #[error("fragment {block} at offset {offset} does not follow {buffered} buffered bytes")]
    OutOfOrder {
        /// Descriptor of the offending fragment.
        block: Block,
        /// Offset the fragment claims.
        offset: usize,
        /// Bytes buffered before it.
        buffered: usize,
    },
    /// The representation would exceed [`MAX_REASSEMBLED_SIZE`].
    #[error("reassembled payload would reach {0} bytes")]
    TooLarge(usize),
}

/// Fragment buffer keyed by [`FragmentKey`].
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    entries: HashMap<FragmentKey, PartialPayload>,
}

impl FragmentBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record `message` if it is a fragment and report what to do next.
    ///
    /// Continuation always wins: a message whose descriptor says more
    /// fragments follow is never reported complete.
    ///
    /// # Errors
    /// Returns a [`FragmentError`] when the fragment is out of order or the
    /// representation grows too large. The chain is dropped in both cases.
    pub fn check_block(&mut self, message: &Message) -> Result<BlockStatus, FragmentError> {
        let Some(block) = message.block2() else {
            return Ok(BlockStatus::Whole);
        };
        let key = FragmentKey {
            tag: message.etag(),
            token: message.token.clone(),
        };

        if block.more {
            if block.num == 0 {
                check_size(message.payload.len()).inspect_err(|_| {
                    self.entries.remove(&key);
                })?;
                self.entries.insert(key.clone(), PartialPayload::new(message));
            } else {
                self.append(&key, block, &message.payload)?;
            }
            return Ok(BlockStatus::More {
                next: block.next(),
                tag: key.tag.clone(),
            });
        }

        if block.num == 0 {
            return Ok(BlockStatus::Whole);
        }
        if !self.entries.contains_key(&key) {
            warn!(token = %key.token, block = %block, "final fragment has no buffered head; delivering as-is");
            return Ok(BlockStatus::Whole);
        }
        self.append(&key, block, &message.payload)?;
        Ok(BlockStatus::Last { key })
    }

    fn append(&mut self, key: &FragmentKey, block: Block, payload: &[u8]) -> Result<(), FragmentError> {
        let buffered = self.entries.get(key).map_or(0, PartialPayload::len);
        let offset = block.offset();
        if offset != buffered {
            self.entries.remove(key);
            return Err(FragmentError::OutOfOrder {
                block,
                offset,
                buffered,
            });
        }
        let total = buffered.saturating_add(payload.len());
        if let Err(e) = check_size(total) {
            self.entries.remove(key);
            return Err(e);
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.data.extend_from_slice(payload);
        }
        Ok(())
    }

    /// Remove and return the payload stored at `key`.
    pub fn take(&mut self, key: &FragmentKey) -> Option<PartialPayload> { self.entries.remove(key) }

    /// Move the entry at `key` so it is found under `token` instead.
    pub fn rekey(&mut self, key: &FragmentKey, token: Token) {
        if let Some(entry) = self.entries.remove(key) {
            self.entries.insert(
                FragmentKey {
                    tag: key.tag.clone(),
                    token,
                },
                entry,
            );
        }
    }

    /// Drop every entry received on `token`.
    pub fn remove_token(&mut self, token: &Token) { self.entries.retain(|key, _| key.token != *token); }

    /// Keys currently buffered.
    pub fn keys(&self) -> impl Iterator<Item = &FragmentKey> { self.entries.keys() }

    /// Number of representations being reassembled.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

const fn check_size(size: usize) -> Result<(), FragmentError> {
    if size > MAX_REASSEMBLED_SIZE {
        return Err(FragmentError::TooLarge(size));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::{fixture, rstest};

    use super::*;
    use crate::message::{Code, MessageType};

    const SZX: u8 = 0; // 16-byte fragments
    const TAG: [u8; 2] = [0x00, 0x2a];

    fn tag() -> Option<ETag> { ETag::from_bytes(&TAG) }

    #[fixture]
    fn token() -> Token { Token::from_bytes(b"frag0001").expect("token") }

    fn fragment(token: &Token, num: u32, more: bool, payload: &[u8]) -> Message {
        let mut msg = Message::new(MessageType::Acknowledgement, Code::CONTENT, 1, token.clone());
        msg.set_option(OptionNumber::ETAG, TAG.to_vec());
        msg.set_block2(Block::new(num, more, SZX));
        msg.payload = payload.to_vec();
        msg
    }

    #[rstest]
    fn fragments_concatenate_in_order(token: Token) {
        let parts: Vec<Vec<u8>> = (0_u8..3).map(|i| vec![b'a' + i; 16]).chain([b"tail".to_vec()]).collect();
        let mut buffer = FragmentBuffer::new();
        let last = u32::try_from(parts.len() - 1).expect("small");

        let mut status = BlockStatus::Whole;
        for (num, part) in (0_u32..).zip(&parts) {
            status = buffer
                .check_block(&fragment(&token, num, num < last, part))
                .expect("in order");
            if num < last {
                assert_eq!(
                    status,
                    BlockStatus::More {
                        next: Block::new(num + 1, false, SZX),
                        tag: tag()
                    }
                );
            }
        }

        let BlockStatus::Last { key } = status else {
            panic!("expected last fragment, got {status:?}");
        };
        let message = buffer.take(&key).expect("buffered").into_message();
        assert_eq!(message.payload, parts.concat());
        assert_eq!(message.block2(), None);
        assert!(buffer.is_empty());
    }

    #[rstest]
    fn unfragmented_message_is_whole(token: Token) {
        let mut buffer = FragmentBuffer::new();
        let msg = Message::new(MessageType::Acknowledgement, Code::CONTENT, 1, token);
        assert_eq!(buffer.check_block(&msg), Ok(BlockStatus::Whole));
        assert_eq!(buffer.check_block(&fragment(&Token::default(), 0, false, b"x")), Ok(BlockStatus::Whole));
    }

    #[rstest]
    fn fragments_with_different_tags_are_kept_apart(token: Token) {
        let mut buffer = FragmentBuffer::new();
        buffer
            .check_block(&fragment(&token, 0, true, &[1; 16]))
            .expect("head");
        let mut other = fragment(&token, 0, true, &[2; 16]);
        other.set_option(OptionNumber::ETAG, vec![0x2a]);
        buffer.check_block(&other).expect("second head");

        assert_eq!(buffer.len(), 2);
    }

    #[rstest]
    fn out_of_order_fragment_drops_chain(token: Token) {
        let mut buffer = FragmentBuffer::new();
        buffer
            .check_block(&fragment(&token, 0, true, &[0; 16]))
            .expect("head");

        let err = buffer
            .check_block(&fragment(&token, 2, true, &[0; 16]))
            .expect_err("skipped fragment 1");

        assert!(matches!(err, FragmentError::OutOfOrder { offset: 32, buffered: 16, .. }));
        assert!(buffer.is_empty());
    }

    #[rstest]
    fn final_fragment_without_head_is_whole(token: Token) {
        let mut buffer = FragmentBuffer::new();
        assert_eq!(
            buffer.check_block(&fragment(&token, 3, false, b"late")),
            Ok(BlockStatus::Whole)
        );
    }

    #[rstest]
    fn oversized_chain_is_rejected(token: Token) {
        let mut buffer = FragmentBuffer::new();
        let mut head = fragment(&token, 0, true, &[]);
        head.payload = vec![0; MAX_REASSEMBLED_SIZE + 1];
        assert_eq!(
            buffer.check_block(&head),
            Err(FragmentError::TooLarge(MAX_REASSEMBLED_SIZE + 1))
        );
        assert!(buffer.is_empty());
    }

    #[rstest]
    fn rekey_moves_entry_to_new_token(token: Token) {
        let mut buffer = FragmentBuffer::new();
        buffer
            .check_block(&fragment(&token, 0, true, &[1; 16]))
            .expect("head");
        let fresh = Token::random();

        buffer.rekey(
            &FragmentKey {
                tag: tag(),
                token: token.clone(),
            },
            fresh.clone(),
        );

        let status = buffer
            .check_block(&fragment(&fresh, 1, false, &[2; 4]))
            .expect("continues under new token");
        let BlockStatus::Last { key } = status else {
            panic!("expected last fragment");
        };
        assert_eq!(key.token, fresh);
        assert_eq!(buffer.take(&key).map(|p| p.len()), Some(20));
    }
}
