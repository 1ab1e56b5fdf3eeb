//! Push gateway dispatcher.
//!
//! One `dispatch` call per order: validate the order type, build the
//! type-specific message, POST it with the bearer token and turn the response
//! into a [`DispatchOutcome`]. Dispatch never returns an error; every failure
//! is an outcome carrying an [`ErrorClass`].

pub mod classify;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use orderpush_core::{DeviceToken, DispatchOutcome, ErrorClass, OrderId, OrderType};

use crate::credentials::AccessToken;

pub use classify::{FailureClassifier, GatewayErrorClassifier, GatewayFailure};

/// Sends one notification per order.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// `order_type` is the raw storage code. Unknown codes yield
    /// `InvalidInput` without contacting the gateway.
    async fn dispatch(
        &self,
        token: &AccessToken,
        device: &DeviceToken,
        order_id: OrderId,
        order_type: &str,
    ) -> DispatchOutcome;
}

/// Browser-specific presentation hints.
#[derive(Debug, Clone, Default)]
pub struct WebpushOptions {
    pub icon_url: Option<String>,
    pub badge_url: Option<String>,
    /// Click-through link; `?codvenda=<id>` is appended.
    pub link_base_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    token: &'a str,
    notification: Notification<'a>,
    webpush: Webpush<'a>,
    android: Android,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    title: String,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct Webpush<'a> {
    headers: WebpushHeaders,
    notification: WebpushNotification<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fcm_options: Option<WebpushFcmOptions>,
}

#[derive(Debug, Serialize)]
struct WebpushHeaders {
    #[serde(rename = "Urgency")]
    urgency: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebpushNotification<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<&'a str>,
    require_interaction: bool,
}

#[derive(Debug, Serialize)]
struct WebpushFcmOptions {
    link: String,
}

#[derive(Debug, Serialize)]
struct Android {
    priority: &'static str,
}

/// FCM HTTP v1 dispatcher.
pub struct FcmDispatcher {
    http: reqwest::Client,
    send_url: String,
    webpush: WebpushOptions,
    classifier: Arc<dyn FailureClassifier>,
}

impl FcmDispatcher {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        project_id: &str,
        webpush: WebpushOptions,
    ) -> Self {
        Self {
            http,
            send_url: format!(
                "{}/v1/projects/{project_id}/messages:send",
                base_url.trim_end_matches('/')
            ),
            webpush,
            classifier: Arc::new(GatewayErrorClassifier),
        }
    }

    /// Replace the default failure classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }

    fn build_request<'a>(
        &'a self,
        device: &'a DeviceToken,
        order_id: OrderId,
        order_type: OrderType,
    ) -> SendRequest<'a> {
        let link = self
            .webpush
            .link_base_url
            .as_deref()
            .map(|base| WebpushFcmOptions {
                link: format!("{base}?codvenda={order_id}"),
            });

        SendRequest {
            message: Message {
                token: device.as_str(),
                notification: Notification {
                    title: order_type.title(order_id),
                    body: order_type.body(),
                },
                webpush: Webpush {
                    headers: WebpushHeaders { urgency: "high" },
                    notification: WebpushNotification {
                        icon: self.webpush.icon_url.as_deref(),
                        badge: self.webpush.badge_url.as_deref(),
                        require_interaction: true,
                    },
                    fcm_options: link,
                },
                android: Android { priority: "high" },
            },
        }
    }

    fn failed(&self, failure: GatewayFailure) -> DispatchOutcome {
        let class = self.classifier.classify(&failure);
        DispatchOutcome::failed(class, failure.summary())
    }
}

#[async_trait]
impl NotificationDispatcher for FcmDispatcher {
    #[instrument(skip(self, token, device), fields(order_id = %order_id))]
    async fn dispatch(
        &self,
        token: &AccessToken,
        device: &DeviceToken,
        order_id: OrderId,
        order_type: &str,
    ) -> DispatchOutcome {
        let order_type = match OrderType::from_code(order_type) {
            Ok(parsed) => parsed,
            Err(err) => return DispatchOutcome::failed(ErrorClass::InvalidInput, err.to_string()),
        };

        let request = self.build_request(device, order_id, order_type);
        let response = match self
            .http
            .post(&self.send_url)
            .bearer_auth(token.secret())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return self.failed(GatewayFailure::transport(err.to_string())),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return self.failed(GatewayFailure::transport(err.to_string())),
        };

        if !status.is_success() {
            return self.failed(GatewayFailure::from_response(status.as_u16(), &body));
        }

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(_)) => {
                debug!(code = order_type.code(), "notification accepted");
                DispatchOutcome::Sent
            }
            _ => DispatchOutcome::failed(
                ErrorClass::TransientInfra,
                format!("malformed success response (HTTP {})", status.as_u16()),
            ),
        }
    }
}
