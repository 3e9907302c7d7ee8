use crate::error::ProxyResult;
use crate::plugin::PluginRegistry;
use crate::server::config::ProxyArgs;
use crate::server::session::{Session, SessionConfig};
use crate::upstream::{TcpUpstream, UpstreamAdapter};

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Per-connection coordinator (§4.6): dials the upstream, runs the session
/// state machine against it, and tears the upstream connection down when the
/// session ends. One `Proxy` is shared (via `Arc`) across every accepted
/// connection; it holds no per-connection state itself.
pub struct Proxy {
    config: Arc<ProxyArgs>,
    plugins: Arc<PluginRegistry>,
}

impl Proxy {
    pub fn new(config: Arc<ProxyArgs>, plugins: Arc<PluginRegistry>) -> Self {
        Proxy { config, plugins }
    }

    pub async fn serve_tcp(&self, stream: TcpStream) -> ProxyResult<()> {
        stream.set_nodelay(true).ok();
        let (reader, writer) = stream.into_split();
        self.serve(reader, writer).await
    }

    pub async fn serve<R, W>(&self, reader: R, writer: W) -> ProxyResult<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut upstream = TcpUpstream::new(self.config.upstream_addr());
        upstream.connect().await?;

        let session_config = SessionConfig {
            proxy_user: self.config.proxy_user.clone(),
            proxy_password: self.config.proxy_password.clone(),
            upstream_user: self.config.upstream_user.clone(),
            upstream_password: self.config.upstream_password.clone(),
            forward_auth: self.config.forward_auth,
            read_timeout_secs: self.config.read_timeout_secs,
        };

        let mut session = Session::new(reader, writer);
        let result = session.run(&session_config, &mut upstream, &self.plugins).await;

        if let Err(e) = upstream.close().await {
            warn!("error closing upstream connection: {e}");
        }

        match &result {
            Ok(()) => info!("session ended"),
            Err(e) => warn!("session ended with error: {e}"),
        }
        result
    }
}
