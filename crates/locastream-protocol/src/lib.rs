//! # locastream-protocol
//!
//! Wire payload definitions for the locastream location hub.
//!
//! Every message on the wire is a single WebSocket frame carrying a JSON
//! location sample. The hub never rewrites a payload: it checks that the
//! bytes parse as a [`Location`] and then forwards the original frame.
//!
//! ## Example
//!
//! ```rust
//! use locastream_protocol::{codec, Frame};
//!
//! let frame = Frame::text(r#"{"latitude":23.81,"longitude":90.41}"#);
//! let sample = codec::validate(&frame, 64 * 1024).unwrap();
//! assert_eq!(sample.latitude, 23.81);
//! ```

pub mod codec;
pub mod frame;
pub mod location;

pub use codec::{decode_sample, encode_sample, validate, ProtocolError};
pub use frame::Frame;
pub use location::Location;
