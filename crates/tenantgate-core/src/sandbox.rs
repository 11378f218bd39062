use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::TenantId;

pub const SANDBOX_PREFIX: &str = "sk-";
/// Hex characters kept from the digest (64 bits).
pub const SANDBOX_HEX_LEN: usize = 16;
/// Disambiguators are one digit, so every id fits in 20 chars.
pub const MAX_DISAMBIGUATOR: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxIdError {
    #[error("sandbox id must start with {SANDBOX_PREFIX:?}: {0:?}")]
    MissingPrefix(String),
    #[error("sandbox id digest must be {SANDBOX_HEX_LEN} lowercase hex chars: {0:?}")]
    BadDigest(String),
    #[error("sandbox id disambiguator must be 1..={MAX_DISAMBIGUATOR}: {0:?}")]
    BadDisambiguator(String),
    #[error("no free sandbox id left for tenant {0}")]
    Exhausted(TenantId),
}

/// Short, cross-service-safe name for a tenant's backing resources.
///
/// Canonical form is `sk-` followed by 16 lowercase hex chars. A disambiguated
/// form `sk-<hex><n>` with a single digit `n` in `1..=9` only exists when the
/// canonical one was already owned by another tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SandboxId(String);

impl SandboxId {
    /// Deterministically derives the canonical id for a tenant.
    pub fn derive(tenant_id: &TenantId) -> Self {
        let digest = Sha256::digest(tenant_id.canonical().as_bytes());
        let hex: String = digest
            .iter()
            .take(SANDBOX_HEX_LEN / 2)
            .map(|byte| format!("{byte:02x}"))
            .collect();
        Self(format!("{SANDBOX_PREFIX}{hex}"))
    }

    /// Validates an id received from outside (storage rows, resource bindings).
    /// Never coerces: anything off-format is rejected.
    pub fn parse(value: &str) -> Result<Self, SandboxIdError> {
        let rest = value
            .strip_prefix(SANDBOX_PREFIX)
            .ok_or_else(|| SandboxIdError::MissingPrefix(value.to_string()))?;
        let (digest, suffix) = match rest.len() {
            SANDBOX_HEX_LEN => (rest, None),
            len if len == SANDBOX_HEX_LEN + 1 && rest.is_char_boundary(SANDBOX_HEX_LEN) => {
                let (digest, suffix) = rest.split_at(SANDBOX_HEX_LEN);
                (digest, Some(suffix))
            }
            _ => return Err(SandboxIdError::BadDigest(value.to_string())),
        };
        if digest.len() != SANDBOX_HEX_LEN
            || !digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(SandboxIdError::BadDigest(value.to_string()));
        }
        if let Some(suffix) = suffix {
            parse_disambiguator(suffix)
                .ok_or_else(|| SandboxIdError::BadDisambiguator(value.to_string()))?;
        }
        Ok(Self(value.to_string()))
    }

    /// Disambiguated variant `n` of this id's canonical form.
    pub fn disambiguated(&self, n: u32) -> Result<Self, SandboxIdError> {
        if n == 0 || n > MAX_DISAMBIGUATOR {
            return Err(SandboxIdError::BadDisambiguator(format!("{}{n}", self.base())));
        }
        Ok(Self(format!("{}{n}", self.base())))
    }

    /// The canonical `sk-<hex>` part, without any disambiguator.
    pub fn base(&self) -> &str {
        let end = SANDBOX_PREFIX.len() + SANDBOX_HEX_LEN;
        &self.0[..end.min(self.0.len())]
    }

    pub fn is_disambiguated(&self) -> bool {
        self.0.len() > SANDBOX_PREFIX.len() + SANDBOX_HEX_LEN
    }

    /// Recomputes the canonical id offline and checks this id descends from it.
    pub fn verify_for(&self, tenant_id: &TenantId) -> bool {
        Self::derive(tenant_id).base() == self.base()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn parse_disambiguator(suffix: &str) -> Option<u32> {
    let n = suffix.parse::<u32>().ok()?;
    (1..=MAX_DISAMBIGUATOR).contains(&n).then_some(n)
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SandboxId {
    type Error = SandboxIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SandboxId> for String {
    fn from(value: SandboxId) -> Self {
        value.0
    }
}
