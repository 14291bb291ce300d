//! Credential material decoded from configuration onto local storage.
//!
//! Every file is a [`ScopedFile`]: it is removed when the guard drops, so
//! no return path (including `?` on an error) can leave key material behind.

use crate::error::{RunnerError, RunnerResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub struct ScopedFile {
    file: NamedTempFile,
}

impl ScopedFile {
    /// Decodes base64 `encoded` into a fresh temporary file.
    pub fn decode(label: &str, encoded: &str) -> RunnerResult<Self> {
        Self::decode_in(None, label, encoded)
    }

    /// Like [`ScopedFile::decode`], placing the file in `dir` when given.
    pub fn decode_in(dir: Option<&Path>, label: &str, encoded: &str) -> RunnerResult<Self> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            RunnerError::Configuration(format!("{} is not valid base64: {}", label, e))
        })?;
        let mut file = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn read(&self) -> RunnerResult<Vec<u8>> {
        Ok(std::fs::read(self.path())?)
    }
}

/// The optional TLS material of an HTTP runner.
#[derive(Default)]
pub struct CertificateSet {
    pub ca: Option<ScopedFile>,
    pub cert: Option<ScopedFile>,
    pub key: Option<ScopedFile>,
}

fn decode_opt(
    dir: Option<&Path>,
    label: &str,
    encoded: Option<&str>,
) -> RunnerResult<Option<ScopedFile>> {
    encoded
        .filter(|s| !s.trim().is_empty())
        .map(|s| ScopedFile::decode_in(dir, label, s))
        .transpose()
}

impl CertificateSet {
    pub fn decode(ca: Option<&str>, cert: Option<&str>, key: Option<&str>) -> RunnerResult<Self> {
        Self::decode_in(None, ca, cert, key)
    }

    pub fn decode_in(
        dir: Option<&Path>,
        ca: Option<&str>,
        cert: Option<&str>,
        key: Option<&str>,
    ) -> RunnerResult<Self> {
        Ok(Self {
            ca: decode_opt(dir, "CA certificate", ca)?,
            cert: decode_opt(dir, "client certificate", cert)?,
            key: decode_opt(dir, "client key", key)?,
        })
    }

    pub fn paths(&self) -> Vec<&Path> {
        [&self.ca, &self.cert, &self.key]
            .into_iter()
            .flatten()
            .map(ScopedFile::path)
            .collect()
    }

    /// HTTP client honoring this set. A CA certificate takes precedence over
    /// `verify_ssl`; a client identity needs both certificate and key.
    pub fn client(&self, verify_ssl: bool) -> RunnerResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder();

        match &self.ca {
            Some(ca) => {
                let ca = reqwest::Certificate::from_pem(&ca.read()?).map_err(|e| {
                    RunnerError::Configuration(format!("invalid CA certificate: {}", e))
                })?;
                builder = builder.add_root_certificate(ca);
            }
            None => builder = builder.danger_accept_invalid_certs(!verify_ssl),
        }

        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            let mut pem = cert.read()?;
            pem.push(b'\n');
            pem.extend(key.read()?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                RunnerError::Configuration(format!("invalid client certificate: {}", e))
            })?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| RunnerError::Configuration(e.to_string()))
    }
}
