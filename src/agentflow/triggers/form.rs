//! Form webhooks.
//!
//! A specialization of the generic webhook that parses provider-specific
//! payload shapes into a canonical `{ form_data, metadata }` pair before
//! flow invocation. Four providers are recognized, plus a `generic`
//! fallback for anything that posts a flat JSON object.

use crate::agentflow::handler::{HandlerResult, ParamMap};
use crate::agentflow::triggers::webhook::{RespondMode, WebhookAuth, WebhookRoute, WebhookService};
use crate::agentflow::triggers::TriggerHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Recognized form providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormProvider {
    Typeform,
    GoogleForms,
    GravityForms,
    Jotform,
    Generic,
}

impl FormProvider {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "typeform" => Some(FormProvider::Typeform),
            "google_forms" => Some(FormProvider::GoogleForms),
            "gravity_forms" => Some(FormProvider::GravityForms),
            "jotform" => Some(FormProvider::Jotform),
            "generic" => Some(FormProvider::Generic),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FormProvider::Typeform => "typeform",
            FormProvider::GoogleForms => "google_forms",
            FormProvider::GravityForms => "gravity_forms",
            FormProvider::Jotform => "jotform",
            FormProvider::Generic => "generic",
        }
    }

    /// Header carrying the provider's own signature, when it has one.
    pub fn validation_header(&self) -> Option<&'static str> {
        match self {
            FormProvider::Typeform => Some("Typeform-Signature"),
            FormProvider::GoogleForms => None,
            FormProvider::GravityForms => Some("X-GF-Signature"),
            FormProvider::Jotform => Some("X-Jotform-Signature"),
            FormProvider::Generic => Some("X-Webhook-Signature"),
        }
    }

    /// Where the answers live inside the provider payload.
    fn fields_path(&self) -> &'static str {
        match self {
            FormProvider::Typeform => "form_response",
            FormProvider::GoogleForms => "responses",
            FormProvider::GravityForms => "form",
            FormProvider::Jotform => "rawRequest",
            FormProvider::Generic => "data",
        }
    }

    fn timestamp_field(&self) -> &'static str {
        match self {
            FormProvider::Typeform => "submitted_at",
            FormProvider::GoogleForms => "timestamp",
            FormProvider::GravityForms => "date_created",
            FormProvider::Jotform => "submitted_at",
            FormProvider::Generic => "timestamp",
        }
    }

    /// Parse a provider payload into the canonical
    /// `{ form_data, metadata }` pair. Unknown shapes degrade to passing
    /// the whole body through as `form_data`.
    pub fn canonicalize(&self, body: &serde_json::Value) -> serde_json::Value {
        let form_data = body
            .get(self.fields_path())
            .cloned()
            .unwrap_or_else(|| body.clone());
        let submitted_at = body
            .get(self.timestamp_field())
            .or_else(|| form_data.get(self.timestamp_field()))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        json!({
            "form_data": form_data,
            "metadata": {
                "provider": self.tag(),
                "submitted_at": submitted_at,
            },
        })
    }
}

/// Trigger handler arming form webhooks.
pub struct FormWebhookTriggerHandler {
    service: Arc<WebhookService>,
    signing_secret: String,
}

impl FormWebhookTriggerHandler {
    pub fn new(service: Arc<WebhookService>, signing_secret: impl Into<String>) -> Self {
        Self {
            service,
            signing_secret: signing_secret.into(),
        }
    }
}

#[async_trait]
impl TriggerHandler for FormWebhookTriggerHandler {
    async fn schedule(&self, params: &ParamMap) -> HandlerResult {
        let flow_id = match params
            .get("flow_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            Some(id) => id,
            None => return HandlerResult::failure("'flow_id' is required"),
        };
        let user_id = match params.get("user_id").and_then(|v| v.as_i64()) {
            Some(id) => id,
            None => return HandlerResult::failure("'user_id' is required"),
        };

        let provider_tag = params
            .get("form_provider")
            .and_then(|v| v.as_str())
            .unwrap_or("generic");
        let provider = match FormProvider::from_tag(provider_tag) {
            Some(provider) => provider,
            None => {
                return HandlerResult::failure(format!(
                    "unsupported form provider '{}'; options: typeform, google_forms, gravity_forms, jotform, generic",
                    provider_tag
                ))
            }
        };

        // Google Forms has no native signing; everything else gets HMAC.
        let auth = if provider == FormProvider::GoogleForms {
            WebhookAuth::None
        } else {
            WebhookAuth::Hmac {
                secret: params
                    .get("signing_secret")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&self.signing_secret)
                    .to_string(),
            }
        };

        let (token, production_path, test_path) = self.service.register(WebhookRoute {
            flow_id,
            user_id,
            methods: vec!["POST".to_string()],
            respond: RespondMode::Immediate,
            auth,
            allowed_origins: Vec::new(),
            form_provider: Some(provider),
        });

        HandlerResult::success(json!({
            "trigger_type": "form_webhook",
            "provider": provider.tag(),
            "token": token,
            "production_path": production_path,
            "test_path": test_path,
            "validation_header": provider.validation_header(),
        }))
    }

    async fn unschedule(&self, registration_id: &str) -> HandlerResult {
        if self.service.unregister(registration_id) {
            HandlerResult::success(json!({ "token": registration_id, "unregistered": true }))
        } else {
            HandlerResult::failure(format!("no form webhook registered for '{}'", registration_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typeform_payload_canonicalized() {
        let body = json!({
            "event_type": "form_response",
            "form_response": {
                "answers": [{ "field": { "id": "q1" }, "text": "yes" }],
                "submitted_at": "2025-06-12T10:00:00Z"
            }
        });
        let canonical = FormProvider::Typeform.canonicalize(&body);
        assert_eq!(canonical["metadata"]["provider"], "typeform");
        assert_eq!(
            canonical["metadata"]["submitted_at"],
            "2025-06-12T10:00:00Z"
        );
        assert!(canonical["form_data"]["answers"].is_array());
    }

    #[test]
    fn test_generic_fallback_passes_body_through() {
        let body = json!({ "name": "kyra", "email": "k@example.test" });
        let canonical = FormProvider::Generic.canonicalize(&body);
        assert_eq!(canonical["form_data"], body);
        assert_eq!(canonical["metadata"]["provider"], "generic");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(FormProvider::from_tag("wufoo").is_none());
        assert_eq!(
            FormProvider::from_tag("GOOGLE_FORMS"),
            Some(FormProvider::GoogleForms)
        );
    }
}
