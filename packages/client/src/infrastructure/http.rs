//! Chat HTTP API client.
//!
//! Request/response collaborators of the realtime core: resolving the room
//! for a pair of users and moving attachments. Every request carries the
//! configured identity as `Authorization: Bearer {token}` and `UserId`
//! headers. Failures are returned to the caller.

use reqwest::{
    RequestBuilder, Response,
    header::AUTHORIZATION,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ChatConfig, Credentials, Settings},
    domain::{ChatId, UserId},
    error::ApiError,
};

const USER_ID_HEADER: &str = "UserId";

/// Chat room descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    #[serde(default)]
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRoomRequest<'a> {
    participant_ids: [&'a str; 2],
}

/// File to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Stored attachment reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_url: String,
    /// Last path segment of `file_url`
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_url: String,
}

impl From<UploadResponse> for UploadedFile {
    fn from(response: UploadResponse) -> Self {
        let file_name = response
            .file_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            file_url: response.file_url,
            file_name,
        }
    }
}

/// HTTP client for the chat backend
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: reqwest::Client,
    config: ChatConfig,
}

impl ChatApi {
    pub fn new(config: ChatConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: ChatConfig) -> Self {
        Self { http, config }
    }

    /// Resolve (or create) the room shared with `target_user_id`.
    pub async fn open_chat(&self, target_user_id: &UserId) -> Result<ChatRoom, ApiError> {
        let settings = self.config.snapshot().await;
        let credentials = settings.credentials()?;
        let url = settings.endpoints()?.api_url("/chat/getChatRoom")?;

        let request = ChatRoomRequest {
            participant_ids: [credentials.user_id.as_str(), target_user_id.as_str()],
        };
        let response = self
            .authorized(self.http.post(url), &settings)
            .json(&request)
            .send()
            .await;

        let room: ChatRoom = match ensure_success(response?).await {
            Ok(response) => response.json().await?,
            Err(e) => {
                tracing::error!("Failed to open chat with '{}': {}", target_user_id, e);
                return Err(e);
            }
        };
        tracing::info!("Chat room obtained: {}", room.id);
        Ok(room)
    }

    /// Upload attachments to a room. Each file is sent as a `files` part.
    pub async fn upload_files(
        &self,
        chat_id: &ChatId,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadedFile>, ApiError> {
        let settings = self.config.snapshot().await;
        let mut url = settings.endpoints()?.api_url("/chat/uploadFiles")?;
        url.query_pairs_mut().append_pair("chatId", chat_id.as_str());

        let form = files.into_iter().fold(Form::new(), |form, file| {
            form.part("files", Part::bytes(file.bytes).file_name(file.file_name))
        });

        let response = self
            .authorized(self.http.post(url), &settings)
            .multipart(form)
            .send()
            .await?;
        let uploaded: Vec<UploadResponse> = ensure_success(response).await?.json().await?;

        tracing::debug!("Uploaded {} file(s) to chat '{}'", uploaded.len(), chat_id);
        Ok(uploaded.into_iter().map(UploadedFile::from).collect())
    }

    /// Download an attachment of a room.
    ///
    /// `file_url` is the stored reference; a leading `uploads/` directory is
    /// stripped before it is encoded as a single path segment.
    pub async fn get_file(&self, chat_id: &ChatId, file_url: &str) -> Result<Vec<u8>, ApiError> {
        let settings = self.config.snapshot().await;
        let path = format!("/chat/file/{}", urlencoding::encode(strip_uploads_prefix(file_url)));
        let mut url = settings.endpoints()?.api_url(&path)?;
        url.query_pairs_mut().append_pair("chatId", chat_id.as_str());

        let response = self
            .authorized(self.http.get(url), &settings)
            .send()
            .await?;
        let bytes = ensure_success(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    fn authorized(&self, request: RequestBuilder, settings: &Settings) -> RequestBuilder {
        match settings.credentials.as_ref() {
            Some(credentials) => with_auth_headers(request, credentials),
            None => request,
        }
    }
}

fn with_auth_headers(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    let request = if credentials.token.is_empty() {
        request
    } else {
        request.header(AUTHORIZATION, format!("Bearer {}", credentials.token))
    };
    request.header(USER_ID_HEADER, credentials.user_id.as_str())
}

/// Strip a leading `uploads/` or `/uploads/` directory.
fn strip_uploads_prefix(file_url: &str) -> &str {
    let trimmed = file_url.strip_prefix('/').unwrap_or(file_url);
    trimmed.strip_prefix("uploads/").unwrap_or(file_url)
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_uploads_prefix() {
        // テスト項目: 先頭の uploads/ または /uploads/ のみが取り除かれる
        // given (前提条件):
        let cases = [
            ("uploads/room-1/a.png", "room-1/a.png"),
            ("/uploads/room-1/a.png", "room-1/a.png"),
            ("room-1/uploads/a.png", "room-1/uploads/a.png"),
            ("/static/a.png", "/static/a.png"),
        ];

        // when (操作) / then (期待する結果):
        for (input, expected) in cases {
            assert_eq!(strip_uploads_prefix(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_uploaded_file_name_is_last_segment() {
        // テスト項目: アップロード結果のファイル名は URL の最後のセグメントになる
        // given (前提条件):
        let response = UploadResponse {
            file_url: "uploads/room-1/photo.png".to_string(),
        };

        // when (操作):
        let uploaded = UploadedFile::from(response);

        // then (期待する結果):
        assert_eq!(uploaded.file_name, "photo.png");
        assert_eq!(uploaded.file_url, "uploads/room-1/photo.png");
    }

    #[test]
    fn test_chat_room_request_shape() {
        // テスト項目: チャットルーム取得リクエストは participantIds 配列で送られる
        // given (前提条件):
        let request = ChatRoomRequest {
            participant_ids: ["alice", "bob"],
        };

        // when (操作):
        let json = serde_json::to_value(&request).unwrap();

        // then (期待する結果):
        assert_eq!(json, serde_json::json!({"participantIds": ["alice", "bob"]}));
    }

    #[tokio::test]
    async fn test_calls_fail_without_configuration() {
        // テスト項目: 未設定の状態では HTTP 呼び出しが設定エラーになる
        // given (前提条件):
        let api = ChatApi::new(ChatConfig::new());
        let chat_id = ChatId::new("room-1").unwrap();

        // when (操作):
        let open = api.open_chat(&UserId::new("bob").unwrap()).await;
        let download = api.get_file(&chat_id, "uploads/a.png").await;

        // then (期待する結果):
        assert!(matches!(open, Err(ApiError::Config(_))));
        assert!(matches!(download, Err(ApiError::Config(_))));
    }
}
