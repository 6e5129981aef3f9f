//! Directory Service over JSON RPC (`POST {base}/rpc/{Method}`).

use async_trait::async_trait;
use relay_common::{RoomId, UserId};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use super::{DirectoryService, JoinDecision};
use crate::error::RelayError;

#[derive(Debug, Serialize)]
struct JoinRequest {
    user_id: UserId,
    room_id: RoomId,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    user_id: UserId,
    room_id: RoomId,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    success: bool,
}

/// HTTP client for the Directory Service.
#[derive(Clone)]
pub struct HttpDirectory {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn rpc_url(&self, method: &str) -> String {
        format!("{}/rpc/{}", self.base_url, method)
    }

    async fn rpc<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, RelayError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.rpc_url(method))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl DirectoryService for HttpDirectory {
    async fn validate_join(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<JoinDecision, RelayError> {
        self.rpc("ValidateJoin", &JoinRequest { user_id, room_id })
            .await
    }

    async fn user_joined(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError> {
        let _ack: IgnoredAny = self
            .rpc("UserJoined", &JoinRequest { user_id, room_id })
            .await?;
        Ok(())
    }

    async fn user_left(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError> {
        let _ack: IgnoredAny = self
            .rpc("UserLeft", &JoinRequest { user_id, room_id })
            .await?;
        Ok(())
    }

    async fn store_message(
        &self,
        user_id: UserId,
        room_id: RoomId,
        content: &str,
    ) -> Result<bool, RelayError> {
        let resp: MessageResponse = self
            .rpc(
                "StoreMessage",
                &MessageRequest {
                    user_id,
                    room_id,
                    content,
                },
            )
            .await?;
        Ok(resp.success)
    }
}
