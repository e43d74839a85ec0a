use crate::transport::TransportError;
use url::Url;

pub const AUDIT_CHANNEL_PATH: &str = "/ws/audit";

/// Address of the audit channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    /// Host with or without a scheme, e.g. `wss://api.example.com` or `localhost:8000`.
    pub host: String,
    pub path: String,
    pub session_id: Option<String>,
    pub token: Option<String>,
    /// Whether to use TLS (wss:// vs ws://) when the host has no scheme.
    pub use_tls: bool,
}

impl ChannelAddress {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        let use_tls = host.starts_with("wss://")
            || host.starts_with("https://")
            || (!host.starts_with("ws://")
                && !host.starts_with("http://")
                && !host.contains("127.0.0.1")
                && !host.contains("localhost"));

        Self {
            host,
            path: AUDIT_CHANNEL_PATH.to_string(),
            session_id: None,
            token: None,
            use_tls,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn build_url(&self) -> Result<Url, TransportError> {
        let host = self.host.trim().trim_end_matches('/');
        let mut raw = if let Some(rest) = host.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = host.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if host.starts_with("ws://") || host.starts_with("wss://") {
            host.to_string()
        } else if self.use_tls {
            format!("wss://{host}")
        } else {
            format!("ws://{host}")
        };

        // Avoid resolving localhost to ::1 when the server only binds IPv4.
        if raw.contains("localhost") {
            raw = raw.replace("localhost", "127.0.0.1");
        }

        if !self.path.starts_with('/') {
            raw.push('/');
        }
        raw.push_str(&self.path);

        let mut url =
            Url::parse(&raw).map_err(|err| TransportError::Address(format!("{raw}: {err}")))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(session_id) = &self.session_id {
                query.append_pair("session_id", session_id);
            }
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}
