//! Software WebAuthn authenticator and the parsers that turn its output into
//! values an on-chain P-256 verifier accepts.

pub(crate) mod authenticator_data;
pub mod assertion;
pub mod attestation;
pub mod registry;
pub mod simulator;
pub mod types;

pub use assertion::{client_data_json, extract_client_data_fields, extract_signature, parse_der_signature};
pub use attestation::{extract_public_key, parse_attested_public_key};
pub use registry::CredentialRegistry;
pub use simulator::CredentialSimulator;
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum WebAuthnError {
    #[error("no matching credential")]          CredentialNotFound,
    #[error("unsupported algorithm")]           UnsupportedAlgorithm,
    #[error("malformed attestation: {0}")]      MalformedAttestation(String),
    #[error("invalid signature encoding: {0}")] InvalidSignatureEncoding(String),
    #[error("malformed client data: {0}")]      MalformedClientData(String),
    #[error("cbor: {0}")]                       Cbor(String),
    #[error("signing: {0}")]                    Signing(String),
}
