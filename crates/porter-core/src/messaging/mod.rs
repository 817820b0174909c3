pub mod port;
pub mod types;

pub use port::{ChatPort, ProxyPort};
pub use types::{Destination, MessageLookup, MirrorPayload, ProxyIdentity};
