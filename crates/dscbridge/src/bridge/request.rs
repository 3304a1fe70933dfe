//! Inbound requests.
//!
//! ```text
//! Request := opKind:u8 resource:String argc:i32 (name:String Value){argc}
//! ```

use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio_util::codec::Encoder;

use super::error::ProtocolError;
use super::frame::{ByteOrder, FrameReader, FrameWriter};
use super::value::{ArgMap, Value, read_arg_map, write_arg_map};

/// Operation selected by the leading request byte.
///
/// The numbering is positional and shared with the host; it is not derived
/// from the names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Wire value 0: check whether the system matches the desired state.
    Verify,
    /// Wire value 1: bring the system into the desired state.
    Apply,
    /// Wire value 2: report the current state.
    Query,
}

impl OperationKind {
    pub const ALL: [Self; 3] = [Self::Verify, Self::Apply, Self::Query];

    pub fn from_wire(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(Self::Verify),
            1 => Ok(Self::Apply),
            2 => Ok(Self::Query),
            other => Err(ProtocolError::UnknownOperation(other)),
        }
    }

    pub fn as_wire(self) -> u8 {
        match self {
            Self::Verify => 0,
            Self::Apply => 1,
            Self::Query => 2,
        }
    }

    /// Name the host's resource modules use for this operation.
    pub fn method_name(self) -> &'static str {
        match self {
            Self::Verify => "Test",
            Self::Apply => "Set",
            Self::Query => "Get",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One decoded call: which operation, on which resource, with which arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub operation: OperationKind,
    pub resource: String,
    pub arguments: ArgMap,
}

impl Request {
    pub fn new(operation: OperationKind, resource: impl Into<String>) -> Self {
        Self {
            operation,
            resource: resource.into(),
            arguments: ArgMap::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

/// `Query nxOMSSyslog(SyslogSource, WorkspaceID)`; used in logs and failure messages.
impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", self.operation, self.resource)?;
        for (i, name) in self.arguments.keys().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        f.write_str(")")
    }
}

/// Reads the next request.
///
/// Returns `Ok(None)` when the peer closed the stream before the first byte
/// of a request. Consumes exactly the bytes of one request.
pub async fn decode_request<R>(r: &mut FrameReader<R>) -> Result<Option<Request>, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    let Some(op) = r.read_u8_or_eof().await? else {
        return Ok(None);
    };
    let operation = OperationKind::from_wire(op)?;
    let resource = r.read_string().await?;
    let arguments = read_arg_map(r).await?;
    tracing::trace!(%operation, %resource, argc = arguments.len(), "Decoded request");
    Ok(Some(Request {
        operation,
        resource,
        arguments,
    }))
}

/// Encodes requests the way the host sends them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestEncoder {
    order: ByteOrder,
}

impl RequestEncoder {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }
}

impl<'a> Encoder<&'a Request> for RequestEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut w = FrameWriter::new(dst, self.order);
        w.put_u8(item.operation.as_wire());
        w.put_string(&item.resource)?;
        write_arg_map(&mut w, &item.arguments)
    }
}
