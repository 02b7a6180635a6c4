// Messaging layer
// RT-safe message queue, OSC codec, subscription hub and UDP transport

pub mod client;
pub mod codec;
pub mod hub;
pub mod message;
pub mod queue;
pub mod server;
pub mod trace;

pub use client::{ClientStats, OscClient};
pub use codec::{decode, decode_packet, encode, encode_bare, encode_into, ProtocolError, MAX_BUNDLE_DEPTH};
pub use hub::{AddressPattern, HubStats, OscHub, SubscriptionId};
pub use message::{addresses, Argument, Arguments, Message, INLINE_ARGS};
pub use queue::{Consumer, Producer, RtMessageQueue};
pub use server::{OscServer, ServerStats, TransportError};
pub use trace::{read_trace_file, trace_subscriber, TraceEntry, TraceError, TraceWriter};
