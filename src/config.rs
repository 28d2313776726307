//! Runtime configuration for both binaries: CLI flags for the front tier
//! (`clap`, a genuine ambient-stack gap — the teacher has no CLI parser
//! at all, its only config path is `Config::from_env`), and a TOML file
//! for the back tier (`serde` + `toml`, pairing with a teacher dependency
//! already present), reimagining `original_source/mailstream/main.go`'s
//! `proto.UnmarshalText`-loaded config as the idiomatic Rust substitute.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Deserialize;

/// `smtp-front` — the SMTP-speaking front tier.
#[derive(Debug, Clone, Parser)]
#[command(name = "smtp-front", about = "Two-tier SMTP ingestion front end")]
pub struct FrontConfig {
    /// Accepted for CLI compatibility; only "tcp" is meaningful.
    #[arg(long = "network-type", default_value = "tcp")]
    pub network_type: String,

    #[arg(long, default_value = "[::]:2525")]
    pub bind: String,

    /// Bind address for the `/debug/vars` and `/health` endpoints.
    #[arg(long = "web-port", default_value = "[::]:8025")]
    pub web_port: String,

    /// Body size cap, in MiB. Minimum 1.
    #[arg(long = "max-length-mb", default_value_t = 10)]
    pub max_length_mb: u64,

    /// Client certificate presented to the back tier for mutual TLS.
    #[arg(long)]
    pub cert: Option<PathBuf>,
    #[arg(long)]
    pub key: Option<PathBuf>,
    #[arg(long = "ca-certificate")]
    pub ca_certificate: Option<PathBuf>,

    /// Address of the submission-service back tier.
    #[arg(long = "submission-uri")]
    pub submission_uri: String,

    /// Skip TLS entirely when talking to the back tier.
    #[arg(long = "insecure-backends", default_value_t = false)]
    pub insecure_backends: bool,

    /// Accepted but unused: service discovery is out of scope and no
    /// lock-service crate exists in the pack.
    #[arg(long = "doozer-uri")]
    pub doozer_uri: Option<String>,
    #[arg(long = "doozer-boot-uri")]
    pub doozer_boot_uri: Option<String>,
}

impl FrontConfig {
    pub fn parse_args() -> Result<Self> {
        let config = FrontConfig::parse();
        if config.max_length_mb < 1 {
            anyhow::bail!("--max-length-mb must be at least 1");
        }
        if config.doozer_uri.is_some() || config.doozer_boot_uri.is_some() {
            info!("doozer service discovery is configured but not implemented; using --submission-uri directly");
        }
        Ok(config)
    }

    pub fn max_body_bytes(&self) -> usize {
        (self.max_length_mb as usize) * 1024 * 1024
    }
}

/// `submission-service` — the content-scanning back tier, configured
/// from a TOML file whose path is the binary's sole CLI argument.
#[derive(Debug, Clone, Deserialize)]
pub struct BackConfig {
    #[serde(default)]
    pub insecure: bool,
    pub bind_to: String,
    pub x509_cert: Option<PathBuf>,
    pub x509_key: Option<PathBuf>,
    pub x509_ca_cert: Option<PathBuf>,
    pub spamd_host: String,

    /// Accepted but unused, same rationale as the front tier's flags.
    #[serde(default)]
    pub doozer_uri: Option<String>,
    #[serde(default)]
    pub doozer_boot_uri: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
}

impl BackConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        let config: BackConfig =
            toml::from_str(&text).with_context(|| format!("parsing config file {path:?}"))?;
        if !config.insecure && (config.x509_cert.is_none() || config.x509_key.is_none()) {
            anyhow::bail!("x509_cert and x509_key are required unless insecure = true");
        }
        if config.doozer_uri.is_some() || config.doozer_boot_uri.is_some() {
            info!("doozer service discovery is configured but not implemented; ignoring");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_config_requires_cert_material_unless_insecure() {
        let toml = r#"
            bind_to = "[::]:0"
            spamd_host = "localhost"
        "#;
        let parsed: BackConfig = toml::from_str(toml).unwrap();
        assert!(!parsed.insecure);
        assert!(parsed.x509_cert.is_none());
    }

    #[test]
    fn back_config_parses_full_example() {
        let toml = r#"
            insecure = true
            bind_to = "[::]:9025"
            spamd_host = "spamd.internal:783"
            service_name = "mail-submission"
        "#;
        let parsed: BackConfig = toml::from_str(toml).unwrap();
        assert!(parsed.insecure);
        assert_eq!(parsed.bind_to, "[::]:9025");
        assert_eq!(parsed.service_name.as_deref(), Some("mail-submission"));
    }
}
