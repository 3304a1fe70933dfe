//! Outbound responses.
//!
//! ```text
//! Success := code:i32(=0) [argc:i32 (name:String Value){argc}]
//! Failure := code:i32(!=0) message:String
//! ```
//!
//! Whether a success carries outputs is not marked on the wire; the host
//! knows from the operation it issued.

use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio_util::codec::Encoder;

use super::error::ProtocolError;
use super::frame::{ByteOrder, FrameReader, FrameWriter};
use super::value::{ArgMap, read_arg_map, write_arg_map};

pub const SUCCESS: i32 = 0;

/// Code for failures the bridge produces itself (unknown resource, handler
/// error or panic, timeout).
pub const GENERIC_FAILURE: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success { outputs: Option<ArgMap> },
    Failure { code: i32, message: String },
}

impl Response {
    pub fn success() -> Self {
        Self::Success { outputs: None }
    }

    pub fn with_outputs(outputs: ArgMap) -> Self {
        Self::Success {
            outputs: Some(outputs),
        }
    }

    /// Builds a failure. A zero code would read as success on the wire, so
    /// it is replaced with [`GENERIC_FAILURE`].
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        let code = if code == SUCCESS {
            GENERIC_FAILURE
        } else {
            code
        };
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Success { .. } => SUCCESS,
            Self::Failure { code, .. } => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn outputs(&self) -> Option<&ArgMap> {
        match self {
            Self::Success { outputs } => outputs.as_ref(),
            Self::Failure { .. } => None,
        }
    }
}

/// Encodes responses for the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEncoder {
    order: ByteOrder,
}

impl ResponseEncoder {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    fn write(&self, item: &Response, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut w = FrameWriter::new(dst, self.order);
        match item {
            Response::Success { outputs } => {
                w.put_i32(SUCCESS);
                if let Some(outputs) = outputs {
                    write_arg_map(&mut w, outputs)?;
                }
            }
            Response::Failure { code, message } => {
                w.put_i32(*code);
                w.put_string(message)?;
            }
        }
        Ok(())
    }
}

/// A response that does not fit the wire limits is replaced by a
/// [`GENERIC_FAILURE`] response, so the host still gets an answer for its
/// request.
impl Encoder<Response> for ResponseEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        if let Err(e) = self.write(&item, dst) {
            dst.truncate(start);
            tracing::warn!(error = %e, code = item.code(), "Response could not be encoded");
            let fallback =
                Response::failure(GENERIC_FAILURE, format!("Response could not be encoded: {e}"));
            self.write(&fallback, dst)?;
        }
        Ok(())
    }
}

/// Reads a response the way the host does.
///
/// `expect_outputs` says whether a success is followed by an output map.
pub async fn decode_response<R>(
    r: &mut FrameReader<R>,
    expect_outputs: bool,
) -> Result<Response, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    let code = r.read_i32().await?;
    if code != SUCCESS {
        let message = r.read_string().await?;
        return Ok(Response::Failure { code, message });
    }
    let outputs = if expect_outputs {
        Some(read_arg_map(r).await?)
    } else {
        None
    };
    Ok(Response::Success { outputs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::frame::{MAX_FIELD_LEN, hex};
    use crate::bridge::value::{Value, ValueType};

    fn encode(response: Response) -> BytesMut {
        let mut buf = BytesMut::new();
        ResponseEncoder::default()
            .encode(response, &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn bare_success_is_just_the_code() {
        insta::assert_snapshot!(hex(&encode(Response::success())), @"00 00 00 00");
    }

    #[test]
    fn success_outputs_skip_null_values() {
        let mut outputs = ArgMap::new();
        outputs.insert("Msg".into(), "hi".into());
        outputs.insert("Gone".into(), Value::Null(ValueType::String));
        let bytes = encode(Response::with_outputs(outputs));
        insta::assert_snapshot!(
            hex(&bytes),
            @"00 00 00 00 01 00 00 00 03 00 00 00 4d 73 67 0d 02 00 00 00 68 69"
        );
    }

    #[test]
    fn failure_carries_code_and_message() {
        let bytes = encode(Response::failure(-1, "no"));
        insta::assert_snapshot!(hex(&bytes), @"ff ff ff ff 02 00 00 00 6e 6f");
    }

    #[test]
    fn failure_with_empty_message_keeps_prefix() {
        let bytes = encode(Response::failure(3, ""));
        insta::assert_snapshot!(hex(&bytes), @"03 00 00 00 00 00 00 00");
    }

    #[test]
    fn zero_failure_code_is_replaced() {
        let response = Response::failure(0, "oops");
        assert_eq!(response.code(), GENERIC_FAILURE);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn oversized_outputs_become_a_failure() {
        let mut outputs = ArgMap::new();
        outputs.insert("Blob".into(), "x".repeat(MAX_FIELD_LEN + 1).into());

        let mut buf = BytesMut::from(&b"\xAA"[..]);
        ResponseEncoder::default()
            .encode(Response::with_outputs(outputs), &mut buf)
            .unwrap();
        assert_eq!(buf[0], 0xAA);

        let mut r = FrameReader::new(&buf[1..], ByteOrder::Little);
        let decoded = decode_response(&mut r, true).await.unwrap();
        assert_eq!(
            decoded,
            Response::failure(
                GENERIC_FAILURE,
                "Response could not be encoded: length 16777217 exceeds maximum of 16777216"
            )
        );
    }

    #[tokio::test]
    async fn decodes_what_was_encoded() {
        let mut outputs = ArgMap::new();
        outputs.insert("Names".into(), vec!["a"].into());
        let cases = [
            (Response::with_outputs(outputs), true),
            (Response::success(), false),
            (Response::failure(7, "bad"), true),
        ];
        for (response, expect_outputs) in cases {
            let bytes = encode(response.clone());
            let mut r = FrameReader::new(&bytes[..], ByteOrder::Little);
            let decoded = decode_response(&mut r, expect_outputs).await.unwrap();
            assert_eq!(decoded, response);
        }
    }
}
