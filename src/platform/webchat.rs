// Hive Platform Adapter: Webchat
//
// Reference adapter for local testing (§4.H worked example): a loopback TCP
// listener speaking the same newline-terminated JSON wire shape as the
// daemon's own IPC server (src/daemon/ipc.rs) rather than a literal HTTP
// server — the simplest transport that lets `hivectl chat` and an ad hoc
// `nc`/test client drive `platform::handle_inbound` end-to-end without this
// crate taking on an HTTP framework it has no other use for. Its port is
// written to `<home>/webchat.port`, mirroring how the daemon itself
// publishes `daemon.port`.

use super::{handle_inbound, ChannelStatus, InboundMessage, PlatformAdapter, PlatformContext};
use crate::atoms::error::HiveError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct WebchatAdapter {
    ctx: PlatformContext,
    port_path: PathBuf,
    status: RwLock<ChannelStatus>,
}

impl WebchatAdapter {
    pub fn new(ctx: PlatformContext, port_path: PathBuf) -> Self {
        WebchatAdapter {
            ctx,
            port_path,
            status: RwLock::new(ChannelStatus::NotConfigured),
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        let response = match serde_json::from_str::<Value>(line.trim_end()) {
            Ok(request) => self.reply_to(request).await,
            Err(_) => json!({ "error": "Invalid JSON" }),
        };

        let mut body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        body.push('\n');
        write_half.write_all(body.as_bytes()).await?;
        write_half.flush().await
    }

    async fn reply_to(&self, request: Value) -> Value {
        let Some(text) = request.get("text").and_then(Value::as_str) else {
            return json!({ "error": "missing \"text\"" });
        };
        let from = request
            .get("from")
            .and_then(Value::as_str)
            .unwrap_or("local")
            .to_string();
        let message_id = request
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let inbound = InboundMessage {
            platform: "webchat".to_string(),
            from,
            text: text.to_string(),
            message_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let outbound = handle_inbound(&self.ctx, inbound).await;
        json!({ "text": outbound.text, "reply_to": outbound.reply_to })
    }
}

#[async_trait]
impl PlatformAdapter for WebchatAdapter {
    fn platform(&self) -> &str {
        "webchat"
    }

    async fn start(self: Arc<Self>) -> Result<(), HiveError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| HiveError::Other(format!("webchat bind failed: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| HiveError::Other(format!("webchat local_addr failed: {e}")))?
            .port();
        std::fs::write(&self.port_path, port.to_string())
            .map_err(|e| HiveError::StoreIo(format!("write webchat.port: {e}")))?;
        *self.status.write() = ChannelStatus::Running;

        loop {
            let (stream, _addr) = listener
                .accept()
                .await
                .map_err(|e| HiveError::Other(format!("webchat accept failed: {e}")))?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream).await {
                    log::warn!(target: "webchat", "connection error: {err}");
                }
            });
        }
    }

    fn status(&self) -> ChannelStatus {
        *self.status.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::IntegrationAuth;
    use crate::platform::RateLimiter;
    use crate::provider::{AnyProvider, ProviderConfig, ProviderKind};
    use crate::store::Store;

    fn test_context(home: &std::path::Path) -> PlatformContext {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let provider = Arc::new(AnyProvider::from_config(&ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_key: "test".to_string(),
            base_url: None,
        }));
        PlatformContext {
            store,
            provider,
            integrations: Arc::new(IntegrationAuth::open(home)),
            rate_limiter: Arc::new(RateLimiter::new()),
            orchestrator: None,
            long_term_memory: None,
        }
    }

    #[tokio::test]
    async fn reply_to_requires_a_text_field() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = WebchatAdapter::new(test_context(dir.path()), dir.path().join("unused.port"));
        let response = adapter.reply_to(json!({"from": "tester"})).await;
        assert_eq!(response["error"], json!("missing \"text\""));
    }

    #[tokio::test]
    async fn reply_to_reports_agent_not_initialized_once_authorized() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        ctx.integrations.add_authorized("webchat", "tester").unwrap();
        let adapter = WebchatAdapter::new(ctx, dir.path().join("unused.port"));
        let response = adapter
            .reply_to(json!({"from": "tester", "text": "hello"}))
            .await;
        assert_eq!(response["text"], json!("daemon running but agent not initialized"));
    }

    #[tokio::test]
    async fn start_binds_a_loopback_port_and_writes_it_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let port_path = dir.path().join("webchat.port");
        let adapter = Arc::new(WebchatAdapter::new(test_context(dir.path()), port_path.clone()));
        assert_eq!(adapter.status(), ChannelStatus::NotConfigured);
        tokio::spawn(Arc::clone(&adapter).start());

        for _ in 0..50 {
            if port_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let port: u16 = std::fs::read_to_string(&port_path)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(port > 0);
        assert_eq!(adapter.status(), ChannelStatus::Running);
    }
}
