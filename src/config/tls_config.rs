//! TLS dial parameters

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// TLS parameters consumed by the dial step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Skip certificate and hostname verification (insecure).
    pub skip_verify: bool,
    /// CA certificate file.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate file.
    pub client_cert: Option<PathBuf>,
    /// Client private key file (PKCS#8).
    pub client_key: Option<PathBuf>,
    /// Server Name Indication override.
    pub sni: Option<String>,
}

impl TlsConfig {
    /// Whether client certificate authentication is configured.
    pub fn has_client_cert(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }
}
