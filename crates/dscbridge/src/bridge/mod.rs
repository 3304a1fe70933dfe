//! Wire protocol between the OMI host and the bridge.
//!
//! # Architecture
//!
//! - **frame**: fixed-width integers and length-prefixed strings
//! - **value**: typed values and argument maps
//! - **request**: request decoding (and encoding, for the host side)
//! - **response**: response encoding (and decoding, for the host side)
//!
//! There is no outer frame length: a request is a sequence of fields read one
//! after another, so a malformed field leaves the stream position unknown.

pub mod error;
pub mod frame;
pub mod request;
pub mod response;
pub mod value;

pub use error::ProtocolError;
pub use frame::{ByteOrder, FrameReader, FrameWriter, MAX_FIELD_LEN};
pub use request::{OperationKind, Request, RequestEncoder, decode_request};
pub use response::{GENERIC_FAILURE, Response, ResponseEncoder, SUCCESS, decode_response};
pub use value::{ArgMap, MAX_NESTING, NULL_FLAG, Value, ValueType};
