//! WebSocket connection setup shared by both sockets.

use std::sync::OnceLock;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::{NicoliveError, Result};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Open a WebSocket connection with the relay's user agent.
pub(crate) async fn connect(url: &str, user_agent: &str) -> Result<WsStream> {
    install_rustls_provider();

    let mut request = url.into_client_request()?;
    if !user_agent.is_empty() {
        let value = HeaderValue::from_str(user_agent)
            .map_err(|e| NicoliveError::connection(format!("Invalid user agent: {}", e)))?;
        request.headers_mut().insert(USER_AGENT, value);
    }

    let (stream, response) = connect_async(request).await?;
    debug!(url, status = %response.status(), "WebSocket connected");
    Ok(stream)
}
