use clap::Parser;

/// Command-line configuration for the proxy process: where to listen, which
/// upstream MySQL server to forward to, and the proxy's own static
/// credentials (or forward-auth mode, which skips local password checking).
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "my-proxy",
    version = "0.1.0",
    about = "A MySQL wire-protocol proxy with a pluggable hook layer."
)]
pub struct ProxyArgs {
    /// Host to listen on for incoming client connections.
    #[clap(long, value_name = "HOST", default_value = "0.0.0.0", env = "PROXY_LISTEN_HOST")]
    pub listen_host: String,

    /// Port to listen on for incoming client connections.
    #[clap(long, value_name = "PORT", default_value_t = 3310, env = "PROXY_LISTEN_PORT")]
    pub listen_port: u16,

    /// Upstream MySQL server host.
    #[clap(long, value_name = "HOST", default_value = "127.0.0.1", env = "PROXY_UPSTREAM_HOST")]
    pub upstream_host: String,

    /// Upstream MySQL server port.
    #[clap(long, value_name = "PORT", default_value_t = 3306, env = "PROXY_UPSTREAM_PORT")]
    pub upstream_port: u16,

    /// Static username accepted by the proxy's own authentication, when not
    /// running in forward-auth mode.
    #[clap(long, value_name = "USER", default_value = "root", env = "PROXY_USER")]
    pub proxy_user: String,

    /// Static password accepted by the proxy's own authentication.
    #[clap(long, value_name = "PASSWORD", default_value = "", env = "PROXY_PASSWORD")]
    pub proxy_password: String,

    /// The username and password used to authenticate to the upstream when
    /// this proxy performs its own local authentication of the client.
    #[clap(long, value_name = "USER", default_value = "root", env = "PROXY_UPSTREAM_USER")]
    pub upstream_user: String,

    #[clap(long, value_name = "PASSWORD", default_value = "", env = "PROXY_UPSTREAM_PASSWORD")]
    pub upstream_password: String,

    /// When set, the proxy does not verify the client's password itself: it
    /// relays the client's auth bytes to the upstream and trusts the
    /// upstream's verdict.
    #[clap(long, default_value_t = false, env = "PROXY_FORWARD_AUTH")]
    pub forward_auth: bool,

    /// Socket read timeout, in seconds. `0` disables the timeout.
    #[clap(long, value_name = "SECONDS", default_value_t = 30, env = "PROXY_READ_TIMEOUT")]
    pub read_timeout_secs: u64,

    /// Directory to scan for plugin manifests at startup. Unset disables
    /// plugin discovery.
    #[clap(long, value_name = "DIR", env = "PROXY_PLUGIN_DIR")]
    pub plugin_dir: Option<String>,

    /// Log level passed to the tracing subscriber's env filter.
    #[clap(long, value_name = "LEVEL", default_value = "info", env = "PROXY_LOG_LEVEL")]
    pub log_level: String,
}

impl ProxyArgs {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_with_no_args() {
        let args = ProxyArgs::parse_from(["my-proxy"]);
        assert_eq!(args.listen_addr(), "0.0.0.0:3310");
        assert_eq!(args.upstream_addr(), "127.0.0.1:3306");
        assert!(!args.forward_auth);
    }
}
