#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebAuthn: {0}")]
    WebAuthn(#[from] crate::webauthn::WebAuthnError),
    #[error("Signature: {0}")]
    Signature(#[from] crate::safe::SignatureError),
    #[error("Owners: {0}")]
    OwnerConfig(#[from] crate::safe::OwnerConfigError),
    #[error("Provider: {0}")]
    Provider(#[from] crate::provider::ProviderError),
    #[error("Lifecycle: {0}")]
    Lifecycle(#[from] crate::lifecycle::LifecycleError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
