//! UserOperation lifecycle: draft, estimate, sponsor, sign, submit, wait.
//!
//! Every stage takes the previous [`PendingUserOperation`] by reference and
//! returns a new one, so a stage that fails on a transport error can be rerun
//! with the same input.

mod inclusion;
mod operation;

use std::fmt;
use std::time::Duration;

use alloy_primitives::{Address, B256};

pub use inclusion::SubmittedUserOperation;
pub use operation::CreateOptions;

use crate::provider::ProviderError;
use crate::safe::{FormatOptions, OwnerConfigError, SignatureError, SignerIdentity, UserOperation};
use crate::webauthn::{WebAuthnError, WebAuthnPublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Draft,
    Estimate,
    Sponsor,
    Sign,
    Submit,
    Inclusion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Estimate => "estimate",
            Self::Sponsor => "sponsor",
            Self::Sign => "sign",
            Self::Submit => "submit",
            Self::Inclusion => "inclusion",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Draft,
    Estimated,
    Sponsored,
    Signed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A UserOperation on its way to the bundler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUserOperation {
    pub user_operation:   UserOperation,
    pub state:            OperationState,
    /// Owners whose signatures the operation will carry; shapes the gas estimate.
    pub expected_signers: Vec<SignerIdentity>,
    /// The operation deploys the account.
    pub is_init:          bool,
    /// Passkey owning the account through the shared WebAuthn signer, if any.
    pub shared_signer:    Option<WebAuthnPublicKey>,
    /// Signatures the account requires.
    pub threshold:        usize,
    pub valid_after:      u64,
    pub valid_until:      u64,
}

impl PendingUserOperation {
    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            is_init:       self.is_init,
            valid_after:   self.valid_after,
            valid_until:   self.valid_until,
            shared_signer: self.shared_signer,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("signers do not match the owner configuration: {0}")]
    SignerMismatch(String),
    #[error("paymaster rejected the operation ({code}): {message}")]
    PaymasterRejected { code: i64, message: String },
    #[error("user operation {user_op_hash} not included after {waited:?}")]
    OperationTimeout { user_op_hash: B256, waited: Duration },
    #[error("{stage} needs a different operation state, found {found}")]
    InvalidState { stage: Stage, found: OperationState },
    #[error("signature by {0} does not verify against the operation hash")]
    InvalidSignature(Address),
    #[error("account {0} is not deployed and has no deployment data")]
    NotDeployed(Address),
    #[error("no calls to execute")]
    EmptyBatch,
    #[error("{stage}: {source}")]
    Provider {
        stage:  Stage,
        #[source]
        source: ProviderError,
    },
    #[error("signer: {0}")]
    Signer(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    OwnerConfig(#[from] OwnerConfigError),
    #[error(transparent)]
    WebAuthn(#[from] WebAuthnError),
}

impl LifecycleError {
    /// Transport failures and timeouts; rerunning the failed stage with the same
    /// input is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::OperationTimeout { .. })
    }

    pub(crate) fn provider(stage: Stage) -> impl FnOnce(ProviderError) -> Self {
        move |source| Self::Provider { stage, source }
    }
}
