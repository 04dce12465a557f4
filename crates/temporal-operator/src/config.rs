//! Command-line configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use temporal_common::defaults::ImageDefaults;

/// Default port for the admission webhook server
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default directory holding the webhook serving certificate
pub const DEFAULT_WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Temporal operator - manages Temporal clusters on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "temporal-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Emit human-readable logs instead of JSON
    #[arg(long, env = "TEMPORAL_OPERATOR_PLAIN_LOGS")]
    pub plain_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Operator subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controllers and the admission webhook (default)
    Controller(OperatorConfig),
}

impl Cli {
    /// Controller configuration, falling back to defaults when no subcommand is given
    pub fn operator_config(&self) -> OperatorConfig {
        match &self.command {
            Some(Commands::Controller(config)) => config.clone(),
            None => OperatorConfig::default(),
        }
    }
}

/// Runtime configuration of the controller mode
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Port the admission webhook listens on
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    pub webhook_port: u16,

    /// Directory containing tls.crt and tls.key for the webhook
    #[arg(long, env = "WEBHOOK_CERT_DIR", default_value = DEFAULT_WEBHOOK_CERT_DIR)]
    pub webhook_cert_dir: PathBuf,

    /// Run without the admission webhook
    #[arg(long, env = "DISABLE_WEBHOOK")]
    pub disable_webhook: bool,

    /// Only watch resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Image for server services when spec.image is unset
    #[arg(long, env = "DEFAULT_SERVER_IMAGE")]
    pub default_server_image: Option<String>,

    /// Image for the web UI when spec.ui.image is unset
    #[arg(long, env = "DEFAULT_UI_IMAGE")]
    pub default_ui_image: Option<String>,

    /// Image for admin tools and schema jobs when spec.admintools.image is unset
    #[arg(long, env = "DEFAULT_ADMINTOOLS_IMAGE")]
    pub default_admintools_image: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_dir: PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR),
            disable_webhook: false,
            watch_namespace: None,
            default_server_image: None,
            default_ui_image: None,
            default_admintools_image: None,
        }
    }
}

impl OperatorConfig {
    /// Image defaults handed to the controllers and the mutating webhook
    pub fn image_defaults(&self) -> ImageDefaults {
        ImageDefaults {
            server: self.default_server_image.clone(),
            ui: self.default_ui_image.clone(),
            admintools: self.default_admintools_image.clone(),
        }
    }

    /// Address the webhook server binds to
    pub fn webhook_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.webhook_port))
    }

    /// Path of the serving certificate
    pub fn webhook_cert_path(&self) -> PathBuf {
        self.webhook_cert_dir.join("tls.crt")
    }

    /// Path of the serving key
    pub fn webhook_key_path(&self) -> PathBuf {
        self.webhook_cert_dir.join("tls.key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_runs_the_controller_with_defaults() {
        let cli = Cli::try_parse_from(["temporal-operator"]).unwrap();
        assert!(!cli.crd);
        assert_eq!(cli.operator_config(), OperatorConfig::default());
    }

    #[test]
    fn crd_flag_is_parsed() {
        let cli = Cli::try_parse_from(["temporal-operator", "--crd"]).unwrap();
        assert!(cli.crd);
    }

    #[test]
    fn controller_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "temporal-operator",
            "controller",
            "--webhook-port",
            "8443",
            "--webhook-cert-dir",
            "/certs",
            "--disable-webhook",
            "--watch-namespace",
            "temporal",
            "--default-admintools-image",
            "registry.local/admin-tools",
        ])
        .unwrap();
        let config = cli.operator_config();

        assert_eq!(config.webhook_port, 8443);
        assert!(config.disable_webhook);
        assert_eq!(config.watch_namespace.as_deref(), Some("temporal"));
        assert_eq!(config.webhook_cert_path(), PathBuf::from("/certs/tls.crt"));
        assert_eq!(config.webhook_key_path(), PathBuf::from("/certs/tls.key"));
        assert_eq!(config.webhook_addr().port(), 8443);
    }

    #[test]
    fn image_flags_become_image_defaults() {
        let config = OperatorConfig {
            default_server_image: Some("registry.local/server".to_string()),
            default_admintools_image: Some("registry.local/admin-tools".to_string()),
            ..Default::default()
        };
        let images = config.image_defaults();

        assert_eq!(images.server.as_deref(), Some("registry.local/server"));
        assert_eq!(images.ui, None);
        assert_eq!(images.admintools.as_deref(), Some("registry.local/admin-tools"));
    }
}
