use tenantgate_core::normalize_host;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid base domain: {0:?}")]
    InvalidBaseDomain(String),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults. Read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Normalized platform base domain; tenants live at `<tenant_key>.<base_domain>`.
    pub base_domain: String,
    /// Enables the development-only tenant override header.
    pub dev_mode: bool,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub base_domain: Option<String>,
    pub dev_mode: Option<bool>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.base_domain.is_some() {
            self.base_domain = other.base_domain;
        }
        if other.dev_mode.is_some() {
            self.dev_mode = other.dev_mode;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let base_domain = self
            .base_domain
            .ok_or(GlobalConfigError::MissingField("base_domain"))?;
        let base_domain = normalize_host(&base_domain)
            .ok_or(GlobalConfigError::InvalidBaseDomain(base_domain))?;
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            base_domain,
            // Off unless explicitly enabled.
            dev_mode: self.dev_mode.unwrap_or(false),
        })
    }
}
