//! Demo service settings, read from flags or the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "demo-service", about = "Blue/green demo HTTP service")]
pub struct DemoConfig {
    /// Address to bind.
    #[arg(long, env = "BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long = "app-name", env = "APP_NAME", default_value = "demo-app")]
    pub app_name: String,

    /// Version reported by every endpoint.
    #[arg(long = "app-version", env = "APP_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub version: String,

    /// Environment label reported by every endpoint.
    #[arg(long, env = "ENVIRONMENT", default_value = "blue")]
    pub environment: String,

    /// Reported hostname; the pod name on Kubernetes.
    #[arg(long, env = "HOSTNAME")]
    pub hostname: Option<String>,

    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl DemoConfig {
    /// Settings for an in-process instance, used by tests and tools that
    /// embed the router.
    pub fn for_environment(environment: &str, version: &str) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            app_name: "demo-app".to_string(),
            version: version.to_string(),
            environment: environment.to_string(),
            hostname: None,
            log_format: LogFormat::Text,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or("unknown")
    }
}
