use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};

use thiserror::Error;

use crate::protocol::{read_frame, read_text, ErrorCode, Frame, ProtocolError, Request, OK};

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a failure reply
    #[error("{message}")]
    Fault { code: ErrorCode, message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Blocking client for the clustering server.
///
/// One `Client` is one server session: the recorded table, the credentials
/// and the active model live on the server for as long as the connection
/// stays open.
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        request.write_to(&mut self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<(), ClientError> {
        match read_frame(&mut self.reader)? {
            Frame::Text(status) if status == OK => Ok(()),
            Frame::Fault { code, message } => Err(ClientError::Fault { code, message }),
            other => Err(ProtocolError::UnexpectedFrame {
                expected: "status",
                got: other.kind(),
            }
            .into()),
        }
    }

    /// Send `request` and return its text payload.
    fn call(&mut self, request: &Request) -> Result<String, ClientError> {
        self.send(request)?;
        self.read_status()?;
        Ok(read_text(&mut self.reader)?)
    }

    /// Opcode 0: record the table the next clustering runs on.
    pub fn set_table(&mut self, table: &str) -> Result<(), ClientError> {
        self.send(&Request::SetTable {
            table: table.to_string(),
        })?;
        self.read_status()
    }

    /// Opcode 1: cluster the recorded table and return the report.
    pub fn cluster(&mut self, k: i64) -> Result<String, ClientError> {
        self.call(&Request::Cluster { k })
    }

    /// Opcode 2: save the active model; returns the server's confirmation.
    pub fn save_model(
        &mut self,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<String, ClientError> {
        self.call(&Request::SaveModel {
            database: database.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Opcode 3: load a saved model and return its per-cluster report.
    pub fn load_model(
        &mut self,
        database: &str,
        table: &str,
        k: i64,
    ) -> Result<String, ClientError> {
        self.call(&Request::LoadModel {
            database: database.to_string(),
            table: table.to_string(),
            k,
        })
    }

    /// Opcode 4: column names of the current table.
    pub fn schema(&mut self) -> Result<String, ClientError> {
        self.send(&Request::Schema)?;
        Ok(read_text(&mut self.reader)?)
    }

    /// Opcode 5: replace this session's connection parameters. No reply.
    pub fn set_credentials(
        &mut self,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        self.send(&Request::SetCredentials {
            database: database.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}
