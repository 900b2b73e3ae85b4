use std::sync::Arc;

use base64::Engine;
use grammers_client::{session::storages::TlSession, Client};
use grammers_mtsender::SenderPool;
use tgdl_core::{errors::Error, Result};
use tokio::task::JoinHandle;

/// Reject obviously broken session strings before any network traffic.
///
/// The string is a base64 (standard or URL-safe, padding optional) encoding
/// of a serialized session, produced out of band.
pub fn decode_session_string(raw: &str) -> Result<Vec<u8>> {
    let s = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if s.is_empty() {
        return Err(Error::Config("SESSION_STRING is empty".to_string()));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '-' | '_' | '='))
    {
        return Err(Error::Config(
            "SESSION_STRING contains characters outside the base64 alphabet".to_string(),
        ));
    }

    let unpadded = s.trim_end_matches('=');
    let bytes = if s.contains(['-', '_']) {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(unpadded)
    } else {
        base64::engine::general_purpose::STANDARD_NO_PAD.decode(unpadded)
    }
    .map_err(|e| Error::Config(format!("SESSION_STRING is not valid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(Error::Config("SESSION_STRING decodes to nothing".to_string()));
    }
    Ok(bytes)
}

struct RunnerGuard {
    handle: JoinHandle<()>,
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Connected, authorized user session.
#[derive(Clone)]
pub struct UserSession {
    client: Client,
    _runner: Arc<RunnerGuard>,
}

impl UserSession {
    pub async fn connect(api_id: i32, session_string: &str) -> Result<Self> {
        let bytes = decode_session_string(session_string)?;
        let session = TlSession::load(&bytes)
            .map_err(|e| Error::Config(format!("SESSION_STRING could not be loaded: {e}")))?;

        let pool = SenderPool::new(Arc::new(session), api_id);
        let client = Client::new(&pool);
        let SenderPool { runner, .. } = pool;
        let handle = tokio::spawn(async move {
            runner.run().await;
            tracing::warn!("mtproto sender pool stopped");
        });
        let runner = Arc::new(RunnerGuard { handle });

        let authorized = client
            .is_authorized()
            .await
            .map_err(|e| Error::External(format!("authorization check failed: {e}")))?;
        if !authorized {
            return Err(Error::Config(
                "SESSION_STRING is not authorized; generate a new one".to_string(),
            ));
        }
        tracing::info!("user session connected");

        Ok(Self {
            client,
            _runner: runner,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}
