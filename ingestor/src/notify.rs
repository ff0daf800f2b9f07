use crate::errors::NotifyError;
use crate::gate::PushNotification;
use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com/v1/projects";
const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Outbound push delivery. Failures are reported, never retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &PushNotification) -> Result<(), NotifyError>;
}

/// Bearer tokens for the push service. Asked once per send; implementations
/// own caching and refresh.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, NotifyError>;
}

/// OAuth tokens minted from a Google service-account key. `gcp_auth` caches
/// the token and fetches a new one shortly before it expires.
pub struct ServiceAccountTokens {
    account: CustomServiceAccount,
}

impl ServiceAccountTokens {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NotifyError> {
        let path = path.as_ref();
        let account = CustomServiceAccount::from_file(path).map_err(|e| {
            NotifyError::Auth(format!("service account {}: {}", path.display(), e))
        })?;
        Ok(Self { account })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, NotifyError> {
        let token = self
            .account
            .token(FCM_SCOPES)
            .await
            .map_err(|e| NotifyError::Auth(e.to_string()))?;
        Ok(token.as_str().to_string())
    }
}

/// Firebase Cloud Messaging HTTP v1 sender
pub struct FcmNotifier {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FcmNotifier {
    pub fn new(project_id: &str, tokens: Arc<dyn AccessTokenSource>) -> Result<Self, NotifyError> {
        Self::with_endpoint(FCM_ENDPOINT, project_id, tokens)
    }

    fn with_endpoint(
        endpoint: &str,
        project_id: &str,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/{}/messages:send", endpoint, project_id),
            tokens,
        })
    }
}

#[async_trait]
impl Notifier for FcmNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<(), NotifyError> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(access_token)
            .json(&fcm_message(notification))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("FCM accepted notification");
        Ok(())
    }
}

fn fcm_message(notification: &PushNotification) -> serde_json::Value {
    json!({
        "message": {
            "token": notification.token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            }
        }
    })
}

/// Used when no push service is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<(), NotifyError> {
        info!(
            title = %notification.title,
            "Push delivery not configured, would have notified: {}",
            notification.body
        );
        Ok(())
    }
}
