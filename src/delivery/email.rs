use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DeliveryConfig;
use crate::errors::{NotifierError, NotifierResult};
use crate::model::{ReminderTier, User};

use super::{DeliveryChannel, DeliveryOutcome};

/// Email reminders through a Postmark-style templated send API.
///
/// Rendering happens on the provider side: the channel names a template alias
/// per tier and passes the values it needs.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    http_client: Client,
    base_url: String,
    sender: String,
    api_token: String,
    message_stream: String,
}

impl EmailChannel {
    pub fn new(
        base_url: String,
        sender: String,
        api_token: String,
        message_stream: String,
        timeout: Duration,
    ) -> NotifierResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sender,
            api_token,
            message_stream,
        })
    }

    pub fn from_config(config: &DeliveryConfig) -> NotifierResult<Self> {
        Self::new(
            config.base_url.clone(),
            config.sender.clone(),
            config.api_token.clone(),
            config.message_stream.clone(),
            config.timeout(),
        )
    }

    async fn post_template(
        &self,
        user: &User,
        tier: ReminderTier,
        remaining_days: i64,
    ) -> NotifierResult<SendTemplateResponse> {
        let url = format!("{}/email/withTemplate", self.base_url);
        let body = SendTemplateRequest {
            from: &self.sender,
            to: &user.email,
            template_alias: tier.template(),
            template_model: TemplateModel {
                name: &user.name,
                tier: tier.preference_key().unwrap_or_default(),
                remaining_days,
            },
            message_stream: &self.message_stream,
        };

        let response = self
            .http_client
            .post(&url)
            .header("X-Postmark-Server-Token", &self.api_token)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(provider_error)?;

        response
            .error_for_status()
            .map_err(provider_error)?
            .json::<SendTemplateResponse>()
            .await
            .map_err(provider_error)
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    async fn send(&self, user: &User, tier: ReminderTier, remaining_days: i64) -> DeliveryOutcome {
        if tier.is_none() {
            return DeliveryOutcome::failed("no reminder tier to deliver");
        }

        match self.post_template(user, tier, remaining_days).await {
            Ok(response) => {
                debug!(user_id = user.id, %tier, "Provider accepted reminder");
                DeliveryOutcome::Delivered {
                    message_id: response.message_id,
                }
            }
            Err(e) => {
                warn!(user_id = user.id, %tier, "{e}");
                DeliveryOutcome::failed(e.to_string())
            }
        }
    }
}

fn provider_error(e: reqwest::Error) -> NotifierError {
    if e.is_timeout() {
        NotifierError::DeliveryError(format!("timed out: {e}"))
    } else if let Some(status) = e.status() {
        NotifierError::DeliveryError(format!("provider returned {status}"))
    } else {
        NotifierError::DeliveryError(e.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendTemplateRequest<'a> {
    from: &'a str,
    to: &'a str,
    template_alias: &'a str,
    template_model: TemplateModel<'a>,
    message_stream: &'a str,
}

#[derive(Serialize)]
struct TemplateModel<'a> {
    name: &'a str,
    tier: &'a str,
    remaining_days: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendTemplateResponse {
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationPreferences, Subscription};
    use serde_json::{json, Value};
    use wiremock::matchers::{any, header, header_exists, method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    struct TemplateBodyMatcher;

    impl Match for TemplateBodyMatcher {
        fn matches(&self, request: &Request) -> bool {
            match serde_json::from_slice::<Value>(&request.body) {
                Ok(body) => {
                    ["From", "To", "TemplateAlias", "TemplateModel", "MessageStream"]
                        .iter()
                        .all(|key| body.get(key).is_some())
                        && body["TemplateAlias"] == "3day_reminder"
                        && body["TemplateModel"]["remaining_days"] == 3
                }
                Err(_) => false,
            }
        }
    }

    fn channel(base_url: String) -> EmailChannel {
        EmailChannel::new(
            base_url,
            "billing@example.com".to_string(),
            "server-token".to_string(),
            "outbound".to_string(),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    fn user() -> User {
        User {
            id: 11,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            subscription: Some(Subscription::default()),
            notification_preferences: NotificationPreferences::default(),
        }
    }

    #[tokio::test]
    async fn send_posts_the_template_request() {
        let server = MockServer::start().await;

        Mock::given(header_exists("X-Postmark-Server-Token"))
            .and(header("Content-Type", "application/json"))
            .and(path("/email/withTemplate"))
            .and(method("POST"))
            .and(TemplateBodyMatcher)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MessageID": "b7bc2f4a-e38e-4336-af7d-e6c392c2f817",
                "ErrorCode": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = channel(server.uri())
            .send(&user(), ReminderTier::ThreeDay, 3)
            .await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                message_id: Some("b7bc2f4a-e38e-4336-af7d-e6c392c2f817".to_string())
            }
        );
    }

    #[tokio::test]
    async fn server_error_is_a_failed_outcome() {
        let server = MockServer::start().await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = channel(server.uri())
            .send(&user(), ReminderTier::OneDay, 1)
            .await;

        match outcome {
            DeliveryOutcome::Failed { error } => {
                assert!(error.starts_with("delivery error:"));
                assert!(error.contains("500"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out_as_failure() {
        let server = MockServer::start().await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = channel(server.uri())
            .send(&user(), ReminderTier::Expired, -1)
            .await;

        match outcome {
            DeliveryOutcome::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn none_tier_is_never_sent() {
        let server = MockServer::start().await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = channel(server.uri())
            .send(&user(), ReminderTier::None, 30)
            .await;

        assert!(!outcome.is_delivered());
    }
}
