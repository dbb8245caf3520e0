//! Certificate material for the mutually authenticated channel.

use std::{fs, io, path::PathBuf, sync::Arc};

use rustls::{
    ClientConfig, RootCertStore, ServerConfig,
    crypto::{CryptoProvider, ring},
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
};
use serde::{Deserialize, Serialize};

use crate::{CommsErr, Result};

/// Locations of the PEM files a node presents and trusts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

/// A node's certificate chain, private key and the authority it trusts for peers.
#[derive(Debug)]
pub struct TlsContext {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    roots: Arc<RootCertStore>,
}

impl TlsContext {
    /// Parses the context out of PEM encoded material.
    ///
    /// # Arguments
    /// * `cert_pem` - The node's certificate chain.
    /// * `key_pem` - The node's private key.
    /// * `ca_pem` - The certificates of the authorities peers must be signed by.
    ///
    /// # Errors
    /// Fails if any of the inputs is malformed or empty.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<Self> {
        let certs = rustls_pemfile::certs(&mut &cert_pem[..]).collect::<io::Result<Vec<_>>>()?;
        if certs.is_empty() {
            return Err(CommsErr::Protocol("no certificate found in the node's pem".into()));
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])?
            .ok_or_else(|| CommsErr::Protocol("no private key found in the node's pem".into()))?;

        let mut roots = RootCertStore::empty();
        for ca in rustls_pemfile::certs(&mut &ca_pem[..]) {
            roots.add(ca?)?;
        }

        if roots.is_empty() {
            return Err(CommsErr::Protocol("no certificate authority found".into()));
        }

        Ok(Self {
            certs,
            key,
            roots: Arc::new(roots),
        })
    }

    /// Reads and parses the PEM files at `paths`.
    pub fn from_files(paths: &TlsPaths) -> Result<Self> {
        let cert = fs::read(&paths.cert)?;
        let key = fs::read(&paths.key)?;
        let ca = fs::read(&paths.ca)?;
        Self::from_pem(&cert, &key, &ca)
    }

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(ring::default_provider())
    }

    /// Builds the configuration for the connecting side, presenting the node's certificate.
    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let config = ClientConfig::builder_with_provider(Self::provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(self.certs.clone(), self.key.clone_key())?;

        Ok(Arc::new(config))
    }

    /// Builds the configuration for the accepting side, requiring a peer certificate.
    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let verifier =
            WebPkiClientVerifier::builder_with_provider(self.roots.clone(), Self::provider())
                .build()
                .map_err(|e| CommsErr::Protocol(format!("invalid client verifier: {e}")))?;

        let config = ServerConfig::builder_with_provider(Self::provider())
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;

        Ok(Arc::new(config))
    }
}
