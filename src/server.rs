use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, info_span, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::{write_frame, ErrorCode, Frame, ProtocolError, Request};
use crate::session::Session;
use crate::source::TableSource;

/// Monotonic connection counter, used to tag session threads and log spans.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Blocking TCP acceptor running one [`Session`] thread per client.
pub struct KMeansServer {
    listener: TcpListener,
    source: Arc<dyn TableSource>,
    config: Arc<ServerConfig>,
}

impl KMeansServer {
    /// Bind the listening socket.
    ///
    /// `addr` takes precedence over the configured listen address so callers
    /// (and tests) can bind an ephemeral port.
    pub fn bind(
        addr: impl ToSocketAddrs,
        source: Arc<dyn TableSource>,
        config: Arc<ServerConfig>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            source,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    ///
    /// Accept failures are logged and the loop continues; only a failure to
    /// query the listener itself is returned.
    pub fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, "kmeans server listening");

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(connection) => connection,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let conn_id = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
            let conn_tag = format!("C{:03}", conn_id);
            let session = Session::new(Arc::clone(&self.source), Arc::clone(&self.config));

            let spawned = thread::Builder::new()
                .name(format!("session-{}", conn_tag))
                .spawn(move || {
                    let span = info_span!("session", conn = %conn_tag, peer = %peer);
                    let _guard = span.enter();
                    info!("client connected");

                    match serve_connection(stream, session) {
                        Ok(()) => info!("client disconnected"),
                        Err(e) => warn!(error = %e, "session terminated"),
                    }
                });
            if let Err(e) = spawned {
                error!(error = %e, "failed to spawn session thread");
            }
        }
    }
}

/// Read requests from `stream` and answer them until the peer disconnects.
///
/// A clean close between requests ends the session with `Ok`. An unknown
/// opcode gets a protocol fault before the session ends, because the fields
/// that follow it cannot be skipped.
pub fn serve_connection(
    stream: TcpStream,
    mut session: Session,
) -> std::result::Result<(), ProtocolError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let request = match Request::read_from(&mut reader) {
            Ok(request) => request,
            Err(ProtocolError::Disconnected) => return Ok(()),
            Err(err @ ProtocolError::UnknownOpcode(_)) => {
                write_frame(&mut writer, &Frame::fault(ErrorCode::Protocol, err.to_string()))?;
                writer.flush()?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        for frame in session.handle(request) {
            write_frame(&mut writer, &frame)?;
        }
        writer.flush()?;
    }
}
