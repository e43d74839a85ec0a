use crate::api::error::GatewayError;
use crate::api::gateway::RequestGateway;
use coursegen_proto::SessionSnapshot;
use serde::{Deserialize, Serialize};

const RESET_CHAT_PATH: &str = "audit/reset-chat";
const SESSION_INFO_PATH: &str = "audit/session-info";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResetAck {
    #[serde(default)]
    pub status: Option<String>,
}

/// The audit endpoints the chat session relies on.
#[derive(Clone)]
pub struct CourseApi {
    gateway: RequestGateway,
}

impl CourseApi {
    pub fn new(gateway: RequestGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub async fn reset_chat(&self, session_id: &str) -> Result<ResetAck, GatewayError> {
        #[derive(Serialize)]
        struct ResetChatRequest<'a> {
            session_id: &'a str,
        }

        self.gateway
            .post_json(RESET_CHAT_PATH, &ResetChatRequest { session_id })
            .await
    }

    pub async fn session_info(&self, session_id: &str) -> Result<SessionSnapshot, GatewayError> {
        let mut snapshot: SessionSnapshot = self
            .gateway
            .get_json(SESSION_INFO_PATH, &[("session_id", session_id)])
            .await?;
        // The HTTP body does not echo the id back.
        if snapshot.session_id.is_none() {
            snapshot.session_id = Some(session_id.to_string());
        }
        Ok(snapshot)
    }
}
