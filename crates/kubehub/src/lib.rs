//! esk kubehub: watch wiring against the platform's streaming endpoint.

#![forbid(unsafe_code)]

pub mod decode;
pub mod http;
#[cfg(feature = "testing")]
pub mod scripted;
pub mod watch;

pub use decode::{decode, decode_with_limit, DecodeError, MAX_FRAME_BYTES};
pub use http::HttpConnector;
pub use watch::{ByteStream, Connector, WatchError, WatchOptions, WatchSource};
