//! Certificate issuance.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256, SanType,
};
use sslwrap_core::{ERROR_IO, ERROR_SETUP};
use thiserror::Error;

use crate::cli::GenerateArgs;

/// Errors that can occur during certificate generation.
#[derive(Error, Debug)]
pub enum CertError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Certificate generation failed: {0}")]
    CertGeneration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

impl CertError {
    pub fn error_type(&self) -> &'static str {
        match self {
            CertError::Io(_) => ERROR_IO,
            _ => ERROR_SETUP,
        }
    }
}

/// PEM material for one server identity.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    /// Issuing CA, when the certificate is not self-signed.
    pub ca_pem: Option<String>,
}

/// Paths of the files written by [`IssuedCertificate::write`].
#[derive(Debug, Clone)]
pub struct WrittenFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: Option<PathBuf>,
}

impl IssuedCertificate {
    pub fn write(
        &self,
        dir: &Path,
        cert_name: &str,
        key_name: &str,
        ca_name: &str,
    ) -> Result<WrittenFiles, CertError> {
        fs::create_dir_all(dir)?;

        let cert = dir.join(format!("{cert_name}.pem"));
        let key = dir.join(format!("{key_name}.pem"));
        fs::write(&cert, &self.cert_pem)?;
        fs::write(&key, &self.key_pem)?;

        let ca = match &self.ca_pem {
            Some(pem) => {
                let path = dir.join(format!("{ca_name}.pem"));
                fs::write(&path, pem)?;
                Some(path)
            }
            None => None,
        };

        Ok(WrittenFiles { cert, key, ca })
    }
}

/// Issue a certificate for `domains` and `ips`, valid for `days`.
///
/// With `with_ca`, a CA is generated as well and signs the certificate;
/// otherwise the certificate is self-signed.
pub fn issue(
    domains: &[String],
    ips: &[IpAddr],
    days: u32,
    with_ca: bool,
) -> Result<IssuedCertificate, CertError> {
    // ECDSA P-256 is supported by every rustls crypto provider
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;

    let mut params = CertificateParams::default();
    for domain in domains {
        let san = SanType::DnsName(
            domain
                .clone()
                .try_into()
                .map_err(|_| CertError::InvalidDomain(domain.clone()))?,
        );
        params.subject_alt_names.push(san);
    }
    for ip in ips {
        params.subject_alt_names.push(SanType::IpAddress(*ip));
    }
    if let Some(first) = domains.first() {
        params.distinguished_name.push(DnType::CommonName, first.as_str());
    }
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    set_validity(&mut params, days);

    if !with_ca {
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::CertGeneration(e.to_string()))?;
        return Ok(IssuedCertificate {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            ca_pem: None,
        });
    }

    let (ca_cert, ca_key) = issue_ca(days)?;
    let cert = params
        .signed_by(&key_pair, &ca_cert, &ca_key)
        .map_err(|e| CertError::CertGeneration(e.to_string()))?;

    Ok(IssuedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        ca_pem: Some(ca_cert.pem()),
    })
}

fn issue_ca(days: u32) -> Result<(Certificate, KeyPair), CertError> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;

    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, "sslwrap local CA");
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    set_validity(&mut params, days);

    let cert = params
        .self_signed(&key)
        .map_err(|e| CertError::CertGeneration(e.to_string()))?;
    Ok((cert, key))
}

fn set_validity(params: &mut CertificateParams, days: u32) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(5);
    params.not_after = now + time::Duration::days(i64::from(days));
}

/// Generate a keystore according to the CLI arguments and write it out.
pub fn generate(args: &GenerateArgs) -> Result<WrittenFiles, CertError> {
    let issued = issue(&args.domain, &args.ip, args.days, args.with_ca)?;
    let files = issued.write(&args.output, &args.cert_name, &args.key_name, &args.ca_name)?;

    println!("Certificate generated successfully:");
    println!("  Certificate: {}", files.cert.display());
    println!("  Private key: {}", files.key.display());
    if let Some(ca) = &files.ca {
        println!("  CA:          {}", ca.display());
    }
    println!("  Valid for:   {} days", args.days);
    println!("  Domains:     {}", args.domain.join(", "));
    if !args.ip.is_empty() {
        println!(
            "  IPs:         {}",
            args.ip
                .iter()
                .map(|ip| ip.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(files)
}
