//! Open Sound Control messaging: a wire codec, address pattern matching and
//! a dispatcher that routes messages and time-tagged bundles to callbacks.

pub mod dispatch;
pub mod error;
pub mod osc;
pub mod server;
pub mod shared;
pub mod transport;

pub use dispatch::{BindingId, Dispatcher, Inbound, MethodResult};
pub use error::{OscError, Result, TransportError};
pub use osc::pattern::Pattern;
pub use osc::timetag::TimeTag;
pub use osc::types::{Arg, Blob, Bundle, Message, Packet, TypeTag};
pub use server::Server;
pub use transport::{ChannelTransport, Transport, UdpTransport};

/// Encodes a message with `address` and `args`. The address must start
/// with `/`.
pub fn encode_message(address: &str, args: &[Arg]) -> Result<Vec<u8>> {
    osc::codec::validate_address(address)?;
    let mut msg = Message::new(address);
    msg.args_mut().extend_from_slice(args);
    Ok(osc::codec::encode_message(&msg))
}

/// Encodes a `#bundle` carrying `timetag` and `elements` in order, after
/// checking it with [`osc::codec::validate`].
pub fn encode_bundle(timetag: TimeTag, elements: &[Packet]) -> Result<Vec<u8>> {
    let mut bundle = Bundle::new(timetag);
    for element in elements {
        bundle.push(element.clone());
    }
    let packet = Packet::Bundle(bundle);
    osc::codec::validate(&packet)?;
    Ok(osc::codec::encode(&packet))
}

pub fn decode(bytes: &[u8]) -> Result<Packet> {
    osc::codec::decode(bytes)
}

pub fn compile_pattern(pattern: &str) -> Pattern {
    Pattern::compile(pattern)
}

/// True when some concrete address matches both patterns.
pub fn patterns_intersect(a: &str, b: &str) -> bool {
    Pattern::compile(a).intersects(&Pattern::compile(b))
}
