use clap::{Parser, Subcommand};
use tenantgate_common::GlobalConfigPatch;

#[derive(Parser)]
#[command(name = "tenantgate")]
pub(crate) struct Cli {
    #[arg(long, env = "TENANTGATE_DSN")]
    pub(crate) dsn: Option<String>,
    #[arg(long, env = "TENANTGATE_DATA_DIR", default_value = "")]
    pub(crate) data_dir: String,
    #[arg(long, env = "TENANTGATE_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "TENANTGATE_PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "TENANTGATE_BASE_DOMAIN")]
    pub(crate) base_domain: Option<String>,
    /// Honors the tenant override header. Development only.
    #[arg(long, env = "TENANTGATE_DEV_MODE")]
    pub(crate) dev_mode: Option<bool>,
    /// Seconds between registry snapshot reloads.
    #[arg(long, default_value_t = 30)]
    pub(crate) refresh_secs: u64,
    /// How long shutdown waits for queued usage rows to be written.
    #[arg(long, default_value_t = 5_000)]
    pub(crate) drain_grace_ms: u64,
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Registers a tenant at `<key>.<base domain>` and exits.
    AddTenant {
        #[arg(long)]
        key: String,
        #[arg(long = "custom-host")]
        custom_hosts: Vec<String>,
        #[arg(long, default_value = "free")]
        tier: String,
    },
    /// Marks a tenant deleted and exits.
    DeleteTenant {
        #[arg(long)]
        key: String,
    },
}

impl Cli {
    pub(crate) fn config_patch(&self, dsn: String) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            dsn: Some(dsn),
            base_domain: self.base_domain.clone(),
            dev_mode: self.dev_mode,
        }
    }
}
