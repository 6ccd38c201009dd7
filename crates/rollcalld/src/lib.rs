//! rollcalld — Identity verification daemon.
//!
//! Serves registration, face scan, QR lookup and scan logs over HTTP on
//! top of `rollcall-core` and `rollcall-store`.

pub mod config;
pub mod routes;
pub mod service;

pub use config::{Config, ConfigError};
pub use service::{ServiceError, VerificationService};

use anyhow::Context;
use rollcall_core::TokenCodec;
use rollcall_store::Store;

/// Open the store and build the service described by `config`.
pub async fn build_service(config: &Config) -> anyhow::Result<VerificationService> {
    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening record store at {}", config.db_path.display()))?;
    let codec = TokenCodec::new(&config.secret_key).context("building QR token codec")?;

    Ok(VerificationService::new(store, codec, config.match_threshold)
        .with_admins(config.admin_emails.clone())
        .with_log_limit(config.log_limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_service_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            listen_addr: "127.0.0.1:0".into(),
            db_path: dir.path().join("data").join("rollcall.db"),
            secret_key: "s3cret".into(),
            match_threshold: 0.6,
            admin_emails: vec!["staff@college.edu".into()],
            log_limit: 10,
        };

        let service = build_service(&config).await.unwrap();
        let status = service.status().await.unwrap();
        assert_eq!(status.registered, 0);
        assert_eq!(status.match_threshold, 0.6);
        assert!(config.db_path.exists());
        assert!(service.recent_logs(Some("staff@college.edu")).await.unwrap().is_empty());
    }
}
