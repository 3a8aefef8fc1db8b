//! Login / invite endpoints used by the recovery flows

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::chat::error::ChatError;

pub const LOGIN_QR_PATH: &str = "/api/ai/config/getLoginQrCode";
pub const LOGIN_STATUS_PATH: &str = "/api/ai/config/getLoginStatus";
pub const INVITE_QR_PATH: &str = "/api/ai/config/getInviteQrCode";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginQrCode {
    #[serde(rename = "wechatQrCodeUrl")]
    pub qr_image_url: String,
    pub token: String,
    #[serde(default)]
    pub tip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStatus {
    #[serde(default)]
    pub api_key: Option<String>,
}

impl LoginStatus {
    /// The issued credential, ignoring empty strings.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InviteQrCode {
    #[serde(rename = "wechatQrCodeUrl")]
    pub qr_image_url: String,
    #[serde(default)]
    pub tip: String,
}

/// Backend calls made by the login and invite flows.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn login_qr_code(&self) -> Result<LoginQrCode, ChatError>;

    async fn login_status(&self, token: &str) -> Result<LoginStatus, ChatError>;

    async fn invite_qr_code(&self) -> Result<InviteQrCode, ChatError>;
}

/// Responses come either bare or inside the server's result envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApiResponse<T> {
    Wrapped {
        data: T,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default, rename = "errorMessage")]
        error_message: Option<String>,
    },
    Bare(T),
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, ChatError> {
        match self {
            ApiResponse::Wrapped {
                success: Some(false),
                error_message,
                ..
            } => Err(ChatError::Rejected(
                error_message.unwrap_or_else(|| "request was not successful".to_string()),
            )),
            ApiResponse::Wrapped { data, .. } => Ok(data),
            ApiResponse::Bare(data) => Ok(data),
        }
    }
}

#[derive(Clone)]
pub struct HttpAiBackend {
    client: Client,
    base_url: String,
}

impl HttpAiBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status { status, body });
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&body)?;
        parsed.into_result()
    }
}

#[async_trait]
impl AiBackend for HttpAiBackend {
    async fn login_qr_code(&self) -> Result<LoginQrCode, ChatError> {
        self.get_json(LOGIN_QR_PATH, &[]).await
    }

    async fn login_status(&self, token: &str) -> Result<LoginStatus, ChatError> {
        self.get_json(LOGIN_STATUS_PATH, &[("token", token)]).await
    }

    async fn invite_qr_code(&self) -> Result<InviteQrCode, ChatError> {
        self.get_json(INVITE_QR_PATH, &[]).await
    }
}
