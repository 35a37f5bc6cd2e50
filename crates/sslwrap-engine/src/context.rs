//! Engine contexts: credential loading, trust policy and cipher restriction.
//!
//! A context is built once per listener or connector and validated eagerly,
//! so configuration mistakes surface before any connection exists. Each
//! accepted or initiated connection then gets a fresh engine from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use sslwrap_core::defaults::{DEFAULT_TLS_MAX_VERSION, DEFAULT_TLS_MIN_VERSION};
use tracing::{debug, info};

use crate::ciphers::{default_provider, restrict_provider};
use crate::error::{EngineError, SetupError};
use crate::rustls_engine::RustlsEngine;

/// Server credentials as PEM files.
#[derive(Debug, Clone)]
pub struct KeyStore {
    /// Certificate chain, leaf first.
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// How a client decides whether to trust the server's certificate.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// Accept any certificate. Handshake signatures are still checked.
    TrustEverybody,
    /// Trust only the CA certificates in this PEM file.
    TrustStore(PathBuf),
    /// Trust the bundled web PKI roots.
    #[default]
    Default,
}

#[derive(Debug, Clone, Default)]
pub struct ServerContextOptions {
    pub keystore: Option<KeyStore>,
    /// CA certificates used to verify client certificates, when offered.
    pub truststore: Option<PathBuf>,
    pub ciphers: Option<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub alpn: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientContextOptions {
    pub trust: TrustPolicy,
    pub ciphers: Option<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub alpn: Vec<String>,
}

/// Server-side engine factory.
#[derive(Clone)]
pub struct ServerContext {
    config: Arc<rustls::ServerConfig>,
    provider: Arc<CryptoProvider>,
}

impl ServerContext {
    /// Build and validate a server context.
    ///
    /// Fails without keystore material or when the cipher list names a
    /// suite the provider does not support.
    pub fn new(options: &ServerContextOptions) -> Result<Self, SetupError> {
        let keystore = options.keystore.as_ref().ok_or(SetupError::MissingKeystore)?;
        let provider = restrict_provider(default_provider(), options.ciphers.as_deref())?;
        let versions = protocol_versions(
            options.min_version.as_deref(),
            options.max_version.as_deref(),
        )?;

        let certs = load_certs(&keystore.cert)?;
        let key = load_private_key(&keystore.key)?;

        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)?;

        let mut config = if let Some(ca_path) = &options.truststore {
            let roots = load_root_store(ca_path)?;
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| SetupError::Config(format!("client verifier error: {e}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        } else {
            builder.with_no_client_auth().with_single_cert(certs, key)?
        };
        config.alpn_protocols = options.alpn.iter().map(|s| s.as_bytes().to_vec()).collect();

        info!(
            cert = %keystore.cert.display(),
            client_auth = options.truststore.is_some(),
            ciphers = ?options.ciphers,
            "server context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            provider,
        })
    }

    /// Create a server-mode engine for one accepted connection.
    pub fn create_engine(&self) -> Result<RustlsEngine, EngineError> {
        RustlsEngine::server(self.config.clone(), self.provider.clone())
    }

    pub fn config(&self) -> Arc<rustls::ServerConfig> {
        self.config.clone()
    }
}

/// Client-side engine factory.
#[derive(Clone)]
pub struct ClientContext {
    config: Arc<rustls::ClientConfig>,
    provider: Arc<CryptoProvider>,
}

impl ClientContext {
    pub fn new(options: &ClientContextOptions) -> Result<Self, SetupError> {
        let provider = restrict_provider(default_provider(), options.ciphers.as_deref())?;
        let versions = protocol_versions(
            options.min_version.as_deref(),
            options.max_version.as_deref(),
        )?;
        let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)?;

        let mut config = match &options.trust {
            TrustPolicy::TrustEverybody => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(TrustEverybody {
                    provider: provider.clone(),
                }))
                .with_no_client_auth(),
            TrustPolicy::TrustStore(path) => builder
                .with_root_certificates(load_root_store(path)?)
                .with_no_client_auth(),
            TrustPolicy::Default => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots).with_no_client_auth()
            }
        };
        config.alpn_protocols = options.alpn.iter().map(|s| s.as_bytes().to_vec()).collect();

        debug!(trust = ?options.trust, ciphers = ?options.ciphers, "client context ready");

        Ok(Self {
            config: Arc::new(config),
            provider,
        })
    }

    /// Create a client-mode engine that will verify `server_name`.
    pub fn create_engine(&self, server_name: &str) -> Result<RustlsEngine, SetupError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| SetupError::Config(format!("invalid server name: {e}")))?;
        Ok(RustlsEngine::client(
            self.config.clone(),
            self.provider.clone(),
            name,
        )?)
    }

    pub fn config(&self) -> Arc<rustls::ClientConfig> {
        self.config.clone()
    }
}

static TLS12_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];
static TLS12_AND_13: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS12, &rustls::version::TLS13];

fn protocol_versions(
    min: Option<&str>,
    max: Option<&str>,
) -> Result<&'static [&'static rustls::SupportedProtocolVersion], SetupError> {
    let min = min.unwrap_or(DEFAULT_TLS_MIN_VERSION);
    let max = max.unwrap_or(DEFAULT_TLS_MAX_VERSION);
    match (min, max) {
        ("tls13", "tls13") => Ok(TLS13_ONLY),
        ("tls12", "tls12") => Ok(TLS12_ONLY),
        ("tls12", "tls13") => Ok(TLS12_AND_13),
        _ => Err(SetupError::Config(format!(
            "unsupported TLS version range {min}..={max}"
        ))),
    }
}

/// Load certificates from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SetupError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect();
    if certs.is_empty() {
        return Err(SetupError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load private key from a PEM file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, SetupError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            Some(_) => continue,
            None => break,
        }
    }
    Err(SetupError::Config(format!(
        "no private key found in {}",
        path.display()
    )))
}

fn load_root_store(path: &Path) -> Result<RootCertStore, SetupError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| SetupError::Config(format!("failed to add CA cert: {e}")))?;
    }
    Ok(roots)
}

/// Accepts any server certificate but still verifies handshake signatures.
#[derive(Debug)]
struct TrustEverybody {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TrustEverybody {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
