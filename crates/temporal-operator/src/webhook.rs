//! Admission webhook server
//!
//! Serves the temporal-webhook router over TLS using the serving certificate
//! cert-manager writes into the webhook cert directory.

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;

use temporal_common::defaults::ImageDefaults;
use temporal_common::PlatformFeatures;
use temporal_webhook::{webhook_router, WebhookState};

use crate::config::OperatorConfig;

/// Run the webhook server until it fails
pub async fn serve_webhook(
    config: &OperatorConfig,
    features: Arc<PlatformFeatures>,
    images: ImageDefaults,
) -> anyhow::Result<()> {
    let cert = config.webhook_cert_path();
    let key = config.webhook_key_path();
    let tls_config = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "failed to load webhook certificate from {}: {}",
                config.webhook_cert_dir.display(),
                e
            )
        })?;

    let app = webhook_router(Arc::new(WebhookState::new(features, images)));
    let addr = config.webhook_addr();
    tracing::info!(addr = %addr, "Starting admission webhook server");

    axum_server::bind_rustls(addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("webhook server error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_reported_with_the_directory() {
        let config = OperatorConfig {
            webhook_cert_dir: "/nonexistent/serving-certs".into(),
            ..Default::default()
        };
        let err = serve_webhook(&config, PlatformFeatures::with(&[]), ImageDefaults::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/serving-certs"));
    }
}
