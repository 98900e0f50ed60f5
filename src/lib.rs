//! Core library for a DOTS signal-channel client.
//!
//! The crate implements the client side of a DDoS Open Threat Signaling
//! session over CoAP: the message model and datagram codec, CBOR payload
//! decoding, and a session engine that tracks observed queries, reassembles
//! block-wise responses, retransmits confirmable requests, runs the
//! heartbeat and refreshes the session configuration before it expires.

pub mod client;
pub mod message;
pub mod payload;
pub mod request_kind;
pub mod session;
pub mod transport;
