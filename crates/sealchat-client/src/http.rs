//! `reqwest` implementation of [`RelayApi`].

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use sealchat_shared::constants::USER_ID_HEADER;
use sealchat_shared::deletion::DeleteRecord;
use sealchat_shared::error::{DeletionError, RelayError};
use sealchat_shared::protocol::{
    CreateChatRequest, CreateChatResponse, ErrorBody, ErrorCode, MessageEnvelope,
    PostDeleteRequest, PostDeleteResponse, PostMessageRequest, PostSignalRequest,
    PostSignalResponse, PublishKeyRequest, SigningKeyResponse,
};
use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{ChatId, MessageId, TimestampMillis, UserId};

use crate::api::RelayApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct HttpRelayClient {
    http: reqwest::Client,
    base_url: String,
    user_id: UserId,
}

impl HttpRelayClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sealchat-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            user_id: config.user_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.url(path))
            .header(USER_ID_HEADER, self.user_id.to_string())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.url(path))
            .header(USER_ID_HEADER, self.user_id.to_string())
    }
}

/// Turn a non-success response into a typed error, otherwise decode JSON.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body = resp.bytes().await?;
    Err(rejection(status, serde_json::from_slice(&body).ok()))
}

/// Map an error response to the error the relay raised. The `code` decides
/// when present; a bare 403 still means access denied.
pub(crate) fn rejection(status: StatusCode, body: Option<ErrorBody>) -> ClientError {
    let (message, code) = match body {
        Some(body) => (body.error, body.code),
        None => (
            status.canonical_reason().unwrap_or("unknown error").to_string(),
            None,
        ),
    };

    match code {
        Some(ErrorCode::AccessDenied) => RelayError::AccessDenied(message).into(),
        Some(ErrorCode::SignatureInvalid) => DeletionError::SignatureInvalid.into(),
        None if status == StatusCode::FORBIDDEN => RelayError::AccessDenied(message).into(),
        _ => ClientError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RelayApi for HttpRelayClient {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn create_chat(&self, name: &str, members: &[UserId]) -> Result<ChatId> {
        let req = CreateChatRequest {
            name: name.to_string(),
            members: members.to_vec(),
        };
        let resp: CreateChatResponse = decode(self.post("/chats").json(&req).send().await?).await?;
        Ok(resp.chat_id)
    }

    async fn publish_signing_key(&self, public_key_hex: &str) -> Result<()> {
        let req = PublishKeyRequest {
            public_key: public_key_hex.to_string(),
        };
        let resp = self
            .http
            .put(self.url("/users/me/signing-key"))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .json(&req)
            .send()
            .await?;
        let _: SigningKeyResponse = decode(resp).await?;
        Ok(())
    }

    async fn signing_key(&self, user_id: UserId) -> Result<Option<String>> {
        let resp = self.get(&format!("/users/{user_id}/signing-key")).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: SigningKeyResponse = decode(resp).await?;
        Ok(Some(body.public_key))
    }

    async fn post_message(
        &self,
        chat_id: ChatId,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<MessageEnvelope> {
        let req = PostMessageRequest {
            ciphertext: ciphertext.to_vec(),
            nonce: nonce.to_vec(),
        };
        decode(self.post(&format!("/chats/{chat_id}/messages")).json(&req).send().await?).await
    }

    async fn list_messages(
        &self,
        chat_id: ChatId,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageEnvelope>> {
        let mut req = self
            .get(&format!("/chats/{chat_id}/messages"))
            .query(&[("limit", limit.to_string())]);
        if let Some(after) = after {
            req = req.query(&[("after", after.to_string())]);
        }
        decode(req.send().await?).await
    }

    async fn post_delete(&self, record: &DeleteRecord) -> Result<PostDeleteResponse> {
        let req = PostDeleteRequest {
            message_id: record.message_id,
            timestamp: record.timestamp,
            signature: record.signature.clone(),
        };
        let path = format!("/chats/{}/deletes", record.chat_id);
        decode(self.post(&path).json(&req).send().await?).await
    }

    async fn fetch_deletes(&self, chat_id: ChatId) -> Result<Vec<DeleteRecord>> {
        decode(self.get(&format!("/chats/{chat_id}/deletes")).send().await?).await
    }

    async fn fetch_deletes_since(
        &self,
        chat_id: ChatId,
        since: TimestampMillis,
    ) -> Result<Vec<DeleteRecord>> {
        let req = self
            .get(&format!("/chats/{chat_id}/deletes"))
            .query(&[("since", since.to_string())]);
        decode(req.send().await?).await
    }

    async fn post_signal(
        &self,
        chat_id: ChatId,
        to: Option<UserId>,
        signal: SignalBody,
    ) -> Result<PostSignalResponse> {
        let req = PostSignalRequest { to, signal };
        decode(self.post(&format!("/chats/{chat_id}/signals")).json(&req).send().await?).await
    }

    async fn fetch_signals(&self, chat_id: ChatId) -> Result<Vec<SignalRecord>> {
        decode(self.get(&format!("/chats/{chat_id}/signals")).send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let config = ClientConfig::new("http://relay.local:8080/", UserId::new());
        let client = HttpRelayClient::new(&config).unwrap();
        assert_eq!(client.url("/health"), "http://relay.local:8080/health");
        assert_eq!(client.user_id(), config.user_id);
    }

    fn from_wire(status: StatusCode, body: &str) -> ClientError {
        rejection(status, serde_json::from_str(body).ok())
    }

    #[test]
    fn test_rejections_keep_their_type() {
        let denied = from_wire(
            StatusCode::FORBIDDEN,
            r#"{"error":"Access denied: Requester is not the original sender of the message","code":"access_denied"}"#,
        );
        assert!(matches!(denied, ClientError::Relay(RelayError::AccessDenied(m)) if m.contains("original sender")));

        let forged = from_wire(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"Delete request signature is invalid","code":"signature_invalid"}"#,
        );
        assert!(matches!(forged, ClientError::Deletion(DeletionError::SignatureInvalid)));

        let missing = from_wire(
            StatusCode::NOT_FOUND,
            r#"{"error":"Not found: message","code":"not_found"}"#,
        );
        assert!(matches!(
            missing,
            ClientError::Status { status: 404, ref message } if message == "Not found: message"
        ));
    }

    #[test]
    fn test_framework_rejections_stay_generic() {
        // axum's own JSON rejection: 422 with a plain text body.
        let err = from_wire(StatusCode::UNPROCESSABLE_ENTITY, "Failed to deserialize the JSON body");
        assert!(matches!(err, ClientError::Status { status: 422, .. }));

        let err = from_wire(StatusCode::FORBIDDEN, "");
        assert!(matches!(err, ClientError::Relay(RelayError::AccessDenied(_))));

        let err = from_wire(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(
            err,
            ClientError::Status { status: 503, ref message } if message == "Service Unavailable"
        ));
    }
}
