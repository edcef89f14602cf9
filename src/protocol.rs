//! Wire format shared by the server and the client.
//!
//! Every field travels as one bincode-encoded [`Frame`]. A request is an
//! [`Frame::Int`] opcode followed by the opcode's fields; a response starts
//! with a status frame (`Text("OK")` or a [`Frame::Fault`]) followed, on
//! success, by the payload.

use std::fmt;
use std::io::{self, Read, Write};

use bincode::config::{Configuration, LittleEndian, Limit, Varint};
use bincode::error::DecodeError;
use bincode::{Decode, Encode};
use thiserror::Error;

use crate::error::KMeansError;

/// Upper bound on the encoded size of a single frame.
pub const MAX_FRAME_BYTES: usize = 64 << 20;

pub const CONFIG: Configuration<LittleEndian, Varint, Limit<MAX_FRAME_BYTES>> =
    bincode::config::standard().with_limit::<MAX_FRAME_BYTES>();

/// Status text of a successful response.
pub const OK: &str = "OK";

/// Machine-readable category of a failure reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum ErrorCode {
    Connection,
    Source,
    EmptyTable,
    MissingValue,
    OutOfRange,
    InsufficientData,
    ModelNotFound,
    ModelFormat,
    ModelMismatch,
    InvalidRequest,
    Protocol,
    Io,
    Internal,
}

impl From<&KMeansError> for ErrorCode {
    fn from(err: &KMeansError) -> Self {
        match err {
            KMeansError::Connection(_) => ErrorCode::Connection,
            KMeansError::Source(_) => ErrorCode::Source,
            KMeansError::EmptySet(_) => ErrorCode::EmptyTable,
            KMeansError::NoValue(_) => ErrorCode::MissingValue,
            KMeansError::OutOfRange { .. } => ErrorCode::OutOfRange,
            KMeansError::InsufficientDistinctRows { .. } => ErrorCode::InsufficientData,
            KMeansError::ModelNotFound { .. } => ErrorCode::ModelNotFound,
            KMeansError::ModelFormat { .. } => ErrorCode::ModelFormat,
            KMeansError::ModelMismatch(_) => ErrorCode::ModelMismatch,
            KMeansError::NotFitted | KMeansError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            KMeansError::Io(_) => ErrorCode::Io,
            KMeansError::InvalidConfig(_) | KMeansError::Config(_) => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One field on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Frame {
    Int(i64),
    Text(String),
    Fault { code: ErrorCode, message: String },
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Text(OK.to_string())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    pub fn fault(code: ErrorCode, message: impl Into<String>) -> Self {
        Frame::Fault {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Frame::Int(_) => "int",
            Frame::Text(_) => "text",
            Frame::Fault { .. } => "fault",
        }
    }

    pub fn into_int(self) -> Result<i64, ProtocolError> {
        match self {
            Frame::Int(v) => Ok(v),
            other => Err(ProtocolError::UnexpectedFrame {
                expected: "int",
                got: other.kind(),
            }),
        }
    }

    pub fn into_text(self) -> Result<String, ProtocolError> {
        match self {
            Frame::Text(v) => Ok(v),
            other => Err(ProtocolError::UnexpectedFrame {
                expected: "text",
                got: other.kind(),
            }),
        }
    }
}

impl From<&KMeansError> for Frame {
    fn from(err: &KMeansError) -> Self {
        Frame::fault(err.into(), err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection closed by peer")]
    Disconnected,

    #[error("Unexpected frame: expected {expected}, got {got}")]
    UnexpectedFrame {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Unknown opcode {0}")]
    UnknownOpcode(i64),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode frame: {0}")]
    Decode(DecodeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<DecodeError> for ProtocolError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnexpectedEnd { .. } => ProtocolError::Disconnected,
            DecodeError::Io { inner, .. } => match inner.kind() {
                io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted => ProtocolError::Disconnected,
                _ => ProtocolError::Io(inner),
            },
            other => ProtocolError::Decode(other),
        }
    }
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, ProtocolError> {
    Ok(bincode::decode_from_std_read(reader, CONFIG)?)
}

pub fn read_int<R: Read>(reader: &mut R) -> Result<i64, ProtocolError> {
    read_frame(reader)?.into_int()
}

pub fn read_text<R: Read>(reader: &mut R) -> Result<String, ProtocolError> {
    read_frame(reader)?.into_text()
}

/// Encode `frame` into `writer`; the caller flushes.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError> {
    bincode::encode_into_std_write(frame, writer, CONFIG)?;
    Ok(())
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// 0: record the table to cluster
    SetTable { table: String },
    /// 1: cluster the recorded table into `k` groups
    Cluster { k: i64 },
    /// 2: persist the active model under a database-qualified name
    SaveModel {
        database: String,
        user: String,
        password: String,
    },
    /// 3: reload a persisted model
    LoadModel {
        database: String,
        table: String,
        k: i64,
    },
    /// 4: column names of the current table
    Schema,
    /// 5: replace the session's connection parameters
    SetCredentials {
        database: String,
        user: String,
        password: String,
    },
}

impl Request {
    pub fn opcode(&self) -> i64 {
        match self {
            Request::SetTable { .. } => 0,
            Request::Cluster { .. } => 1,
            Request::SaveModel { .. } => 2,
            Request::LoadModel { .. } => 3,
            Request::Schema => 4,
            Request::SetCredentials { .. } => 5,
        }
    }

    /// Whether the server answers this request at all.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Request::SetCredentials { .. })
    }

    /// Read one request: the opcode, then exactly the fields it defines.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let request = match read_int(reader)? {
            0 => Request::SetTable {
                table: read_text(reader)?,
            },
            1 => Request::Cluster {
                k: read_int(reader)?,
            },
            2 => Request::SaveModel {
                database: read_text(reader)?,
                user: read_text(reader)?,
                password: read_text(reader)?,
            },
            3 => Request::LoadModel {
                database: read_text(reader)?,
                table: read_text(reader)?,
                k: read_int(reader)?,
            },
            4 => Request::Schema,
            5 => Request::SetCredentials {
                database: read_text(reader)?,
                user: read_text(reader)?,
                password: read_text(reader)?,
            },
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        Ok(request)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let mut fields = vec![Frame::Int(self.opcode())];
        match self {
            Request::SetTable { table } => fields.push(Frame::text(table.as_str())),
            Request::Cluster { k } => fields.push(Frame::Int(*k)),
            Request::SaveModel {
                database,
                user,
                password,
            }
            | Request::SetCredentials {
                database,
                user,
                password,
            } => {
                fields.push(Frame::text(database.as_str()));
                fields.push(Frame::text(user.as_str()));
                fields.push(Frame::text(password.as_str()));
            }
            Request::LoadModel { database, table, k } => {
                fields.push(Frame::text(database.as_str()));
                fields.push(Frame::text(table.as_str()));
                fields.push(Frame::Int(*k));
            }
            Request::Schema => {}
        }

        for field in &fields {
            write_frame(writer, field)?;
        }
        Ok(())
    }
}
