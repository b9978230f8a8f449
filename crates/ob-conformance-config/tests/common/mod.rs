// crates/ob-conformance-config/tests/common/mod.rs
// ============================================================================
// Module: Config Test Helpers
// Description: Builds configuration directories for tests.
// ============================================================================

#![allow(
    dead_code,
    clippy::unwrap_used,
    reason = "Helpers are shared across test binaries and may panic."
)]

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use ob_conformance_config::PemSource;
use serde_json::Value;
use serde_json::json;

/// Returns a minimal valid configuration document.
pub fn minimal_document() -> Value {
    json!({
        "softwareStatementId": "5Bpe1pnLnMFQIdgkhzPNuk",
        "clientScopes": "openid accounts payments",
        "tokenUrl": "https://as.aspsp.example.com/token",
        "aud": "https://as.aspsp.example.com",
        "clientId": "dc3a363e-2cc3-4187-b6df-579f21bad6c8",
        "clientSecret": "e648104b-f52a-43e1-a2e0-fe3a047497cf",
        "authorizationEndpoint": "https://as.aspsp.example.com/authorize",
        "redirectUrl": "https://tpp.example.com/callback",
        "targetHost": "https://rs.aspsp.example.com/open-banking/v3.1/"
    })
}

/// Returns the crypto crate's PEM fixture directory.
pub fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../ob-conformance-crypto/tests/fixtures")
}

/// Returns the fixture text for a PEM source.
pub fn fixture_pem(source: PemSource) -> String {
    let name = match source {
        PemSource::SigningCertificate => "signing.pem",
        PemSource::SigningKey => "signing.key",
        PemSource::TransportCertificate => "transport.pem",
        PemSource::TransportKey => "transport.key",
    };
    fs::read_to_string(fixture_dir().join(name)).unwrap()
}

/// Writes a configuration directory with the given document and PEM files.
pub fn write_dir(dir: &Path, document: &Value, pems: &[PemSource]) {
    fs::write(dir.join("config.json"), serde_json::to_vec_pretty(document).unwrap()).unwrap();
    for source in pems {
        fs::write(dir.join(source.file_name()), fixture_pem(*source)).unwrap();
    }
}

/// Every PEM source.
pub const ALL_PEMS: [PemSource; 4] = [
    PemSource::SigningCertificate,
    PemSource::SigningKey,
    PemSource::TransportCertificate,
    PemSource::TransportKey,
];
