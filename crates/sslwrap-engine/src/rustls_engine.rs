//! [`SslEngine`] over a rustls client or server session.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use tracing::debug;

use crate::ciphers::{suite_name, validate_cipher_list};
use crate::error::EngineError;
use crate::{CipherDescriptor, EngineResult, EngineStatus, EngineTask, Mode, SslEngine};

enum Session {
    Client(ClientConnection),
    Server(ServerConnection),
}

macro_rules! with_session {
    ($session:expr, $conn:ident => $body:expr) => {
        match $session {
            Session::Client($conn) => $body,
            Session::Server($conn) => $body,
        }
    };
}

impl Session {
    fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        with_session!(self, conn => conn.read_tls(rd))
    }

    fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        with_session!(self, conn => conn.write_tls(wr))
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        with_session!(self, conn => conn.process_new_packets())
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<()> {
        with_session!(self, conn => conn.reader().read_exact(buf))
    }

    fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize> {
        with_session!(self, conn => conn.writer().write(buf))
    }

    fn wants_write(&self) -> bool {
        with_session!(self, conn => conn.wants_write())
    }

    fn is_handshaking(&self) -> bool {
        with_session!(self, conn => conn.is_handshaking())
    }

    fn send_close_notify(&mut self) {
        with_session!(self, conn => conn.send_close_notify())
    }

    fn negotiated_cipher_suite(&self) -> Option<rustls::SupportedCipherSuite> {
        with_session!(self, conn => conn.negotiated_cipher_suite())
    }

    fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        with_session!(self, conn => conn.protocol_version())
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        with_session!(self, conn => conn.alpn_protocol())
    }
}

/// TLS engine backed by a rustls connection, driven through memory buffers.
///
/// `unwrap` stops feeding input once the session has protocol output
/// pending, so unconsumed bytes are reported through `remaining` and stay
/// with the caller.
pub struct RustlsEngine {
    session: Session,
    provider: Arc<CryptoProvider>,
    handshaked: bool,
    outbound_closed: bool,
    inbound_closed: bool,
    peer_closed: bool,
    close_reported: bool,
    failure: Option<EngineError>,
}

impl RustlsEngine {
    pub fn client(
        config: Arc<ClientConfig>,
        provider: Arc<CryptoProvider>,
        server_name: ServerName<'static>,
    ) -> Result<Self, EngineError> {
        let conn = ClientConnection::new(config, server_name)?;
        Ok(Self::with_session(Session::Client(conn), provider))
    }

    pub fn server(
        config: Arc<ServerConfig>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, EngineError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self::with_session(Session::Server(conn), provider))
    }

    fn with_session(session: Session, provider: Arc<CryptoProvider>) -> Self {
        Self {
            session,
            provider,
            handshaked: false,
            outbound_closed: false,
            inbound_closed: false,
            peer_closed: false,
            close_reported: false,
            failure: None,
        }
    }

    /// Protocol selected through ALPN, if any.
    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.session.alpn_protocol().map(<[u8]>::to_vec)
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshaked
    }

    /// Move every pending TLS record out of the session.
    fn drain_tls(&mut self) -> Result<Option<Bytes>, EngineError> {
        let mut out = Vec::new();
        while self.session.wants_write() {
            let n = self
                .session
                .write_tls(&mut out)
                .map_err(|e| EngineError::Buffer(e.to_string()))?;
            if n == 0 {
                break;
            }
        }
        Ok((!out.is_empty()).then(|| Bytes::from(out)))
    }

    fn check_handshake(&mut self) -> bool {
        if !self.handshaked && !self.session.is_handshaking() {
            self.handshaked = true;
            return true;
        }
        false
    }

    fn fail(&mut self, error: EngineError) {
        debug!(mode = %self.mode(), error = %error, "tls session failed");
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Feed `ciphertext` until it is used up, the peer closed, or the
    /// session has output to send. Returns bytes consumed and plaintext.
    fn feed(&mut self, ciphertext: &[u8]) -> (usize, Vec<u8>) {
        let mut consumed = 0;
        let mut plaintext = Vec::new();
        while consumed < ciphertext.len() {
            if consumed > 0 && self.session.wants_write() {
                break;
            }
            let mut rd = &ciphertext[consumed..];
            let n = match self.session.read_tls(&mut rd) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.fail(EngineError::Buffer(e.to_string()));
                    break;
                }
            };
            consumed += n;

            let state = match self.session.process_new_packets() {
                Ok(state) => state,
                Err(e) => {
                    self.fail(EngineError::Tls(e));
                    break;
                }
            };

            let pending = state.plaintext_bytes_to_read();
            if pending > 0 {
                let start = plaintext.len();
                plaintext.resize(start + pending, 0);
                if let Err(e) = self.session.read_plaintext(&mut plaintext[start..]) {
                    plaintext.truncate(start);
                    self.fail(EngineError::Buffer(e.to_string()));
                    break;
                }
            }

            if state.peer_has_closed() {
                self.peer_closed = true;
                break;
            }
        }
        (consumed, plaintext)
    }
}

impl SslEngine for RustlsEngine {
    fn mode(&self) -> Mode {
        match self.session {
            Session::Client(_) => Mode::Client,
            Session::Server(_) => Mode::Server,
        }
    }

    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        // The client hello is queued when the session is created.
        match self.session {
            Session::Client(_) => Ok(()),
            Session::Server(_) => Err(EngineError::NotClientMode),
        }
    }

    fn wrap(&mut self, plaintext: &[u8]) -> EngineResult {
        if let Some(error) = self.failure.clone() {
            // Flush the alert the session queued, then report the failure.
            let data = self.drain_tls().ok().flatten();
            return EngineResult {
                data,
                ..EngineResult::failed(error)
            };
        }

        let mut consumed = 0;
        if !self.outbound_closed && !plaintext.is_empty() {
            match self.session.write_plaintext(plaintext) {
                Ok(n) => consumed = n,
                Err(e) => return EngineResult::failed(EngineError::Buffer(e.to_string())),
            }
        }

        let data = match self.drain_tls() {
            Ok(data) => data,
            Err(e) => return EngineResult::failed(e),
        };
        let just_handshaked = self.check_handshake();

        let status = if self.peer_closed && !self.close_reported {
            EngineStatus::NeedUnwrap
        } else if self.outbound_closed && !self.session.wants_write() {
            EngineStatus::Closed
        } else if self.session.wants_write() {
            EngineStatus::NeedWrap
        } else {
            EngineStatus::Ok
        };

        EngineResult {
            status,
            consumed,
            data,
            just_handshaked,
            remaining: 0,
            error: None,
        }
    }

    fn unwrap(&mut self, ciphertext: &[u8]) -> EngineResult {
        if let Some(error) = self.failure.clone() {
            let status = if self.session.wants_write() {
                EngineStatus::NeedWrap
            } else {
                EngineStatus::Error
            };
            return EngineResult {
                status,
                remaining: ciphertext.len(),
                error: (status == EngineStatus::Error).then_some(error),
                ..EngineResult::new(status)
            };
        }

        let (consumed, plaintext) = if self.is_inbound_done() {
            (0, Vec::new())
        } else {
            self.feed(ciphertext)
        };
        let just_handshaked = self.check_handshake();
        let remaining = ciphertext.len() - consumed;
        let data = (!plaintext.is_empty()).then(|| Bytes::from(plaintext));

        let (status, error) = if self.session.wants_write() {
            (EngineStatus::NeedWrap, None)
        } else if let Some(error) = self.failure.clone() {
            (EngineStatus::Error, Some(error))
        } else if self.peer_closed || self.inbound_closed {
            self.close_reported = true;
            (EngineStatus::Closed, None)
        } else if remaining > 0 || data.is_some() {
            (EngineStatus::Ok, None)
        } else {
            (EngineStatus::Underflow, None)
        };

        EngineResult {
            status,
            consumed,
            data,
            just_handshaked,
            remaining,
            error,
        }
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.outbound_closed = true;
            self.session.send_close_notify();
        }
    }

    fn close_inbound(&mut self) {
        self.inbound_closed = true;
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_closed && !self.session.wants_write()
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_closed || self.peer_closed
    }

    fn take_task(&mut self) -> Option<EngineTask> {
        None
    }

    fn validate_ciphers(&self, ciphers: &str) -> bool {
        validate_cipher_list(&self.provider, ciphers)
    }

    fn cipher(&self) -> Option<CipherDescriptor> {
        let suite = self.session.negotiated_cipher_suite()?;
        let version = self
            .session
            .protocol_version()
            .map(|v| format!("{v:?}"))
            .unwrap_or_default();
        Some(CipherDescriptor {
            name: suite_name(&suite),
            version,
        })
    }
}
