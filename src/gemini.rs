use crate::context::MessageUnit;
use crate::error::{PopupError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;

pub const NO_RESPONSE_TEXT: &str = "No response text found";
pub const GENERATE_METHOD: &str = "generateContent";

const TOP_P: f32 = 1.0;
const TOP_K: u32 = 40;
const MAX_OUTPUT_TOKENS: u32 = 4096;
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [MessageUnit],
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl GenerationConfig {
    /// Fixed sampling parameters; only the temperature varies per call.
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            top_p: TOP_P,
            top_k: TOP_K,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            stop_sequences: Vec::new(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

fn safety_settings() -> Vec<SafetySetting> {
    SAFETY_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: SAFETY_THRESHOLD.to_string(),
        })
        .collect()
}

/// Decoded `generateContent` envelope.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ResponsePart {
    pub text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate, if present.
    pub fn text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    pub fn text_or_placeholder(&self) -> String {
        self.text().unwrap_or(NO_RESPONSE_TEXT).to_string()
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<Model>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Model {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Opaque handle used in API paths, e.g. `models/gemini-1.5-pro`.
    pub id: String,
    pub display_name: Option<String>,
}

impl ModelDescriptor {
    /// Human-friendly name: the display name, else the id without `models/`.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.id.strip_prefix("models/").unwrap_or(&self.id))
    }

    fn sort_key(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }
}

fn compare_models(a: &ModelDescriptor, b: &ModelDescriptor) -> Ordering {
    let (a_key, b_key) = (a.sort_key(), b.sort_key());
    a_key
        .to_lowercase()
        .cmp(&b_key.to_lowercase())
        .then_with(|| a_key.cmp(b_key))
}

/// Pick the model to use after a refresh: the stored id if still offered,
/// then `default_id`, then the first model.
pub fn choose_model<'a>(
    models: &'a [ModelDescriptor],
    stored: Option<&str>,
    default_id: &str,
) -> Option<&'a ModelDescriptor> {
    stored
        .and_then(|id| models.iter().find(|m| m.id == id))
        .or_else(|| models.iter().find(|m| m.id == default_id))
        .or_else(|| models.first())
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    message: Option<String>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

impl ErrorBody {
    fn is_auth(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED")
        ) || self
            .details
            .iter()
            .any(|d| d.get("reason").and_then(Value::as_str) == Some("API_KEY_INVALID"))
    }
}

/// Map a non-success response to the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> PopupError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let structured = envelope
        .error
        .as_ref()
        .and_then(|e| e.message.clone())
        .or(envelope.message)
        .filter(|m| !m.is_empty());
    let auth = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || envelope.error.as_ref().is_some_and(ErrorBody::is_auth);

    let message = structured.unwrap_or_else(|| format!("API error: {}", status));
    if auth {
        PopupError::Auth(message)
    } else {
        PopupError::Api(message)
    }
}

impl GeminiClient {
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(60))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_models(&self, api_key: &str) -> Result<Vec<ModelDescriptor>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", api_key)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let err = classify_failure(status, &body);
            tracing::warn!("listing models failed: {}", err);
            return Err(err);
        }

        let parsed: ModelsResponse = serde_json::from_str(&body)
            .map_err(|e| PopupError::Api(format!("Unexpected models response: {}", e)))?;

        let mut models: Vec<ModelDescriptor> = parsed
            .models
            .into_iter()
            .filter(|m| m.supported_generation_methods.iter().any(|g| g == GENERATE_METHOD))
            .map(|m| ModelDescriptor {
                id: m.name,
                display_name: m.display_name,
            })
            .collect();
        models.sort_by(compare_models);

        tracing::info!(count = models.len(), "models listed");
        Ok(models)
    }

    pub async fn generate(
        &self,
        api_key: &str,
        model_id: &str,
        messages: &[MessageUnit],
        temperature: f32,
    ) -> Result<GenerateResponse> {
        let request = GenerateRequest {
            contents: messages,
            generation_config: GenerationConfig::with_temperature(temperature),
            safety_settings: safety_settings(),
        };

        tracing::debug!(model = model_id, units = messages.len(), "sending generate request");
        let response = self
            .client
            .post(format!("{}/{}:{}", self.base_url, model_id, GENERATE_METHOD))
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let err = classify_failure(status, &body);
            tracing::warn!(status = %status, "generate failed: {}", err);
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| PopupError::Api(format!("Unexpected response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_client_creation_trims_slash() {
        let client = GeminiClient::new("http://localhost:9000/v1beta/".to_string());
        assert_eq!(client.base_url(), "http://localhost:9000/v1beta");
    }

    #[test]
    fn test_response_text_extraction() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "Hi!"}, {"text": "ignored"}]}}]
        }))
        .unwrap();
        assert_eq!(response.text(), Some("Hi!"));

        let empty: GenerateResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert_eq!(empty.text_or_placeholder(), NO_RESPONSE_TEXT);

        let blocked: GenerateResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(blocked.text(), None);
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, r#"{"error":{"message":"quota exceeded"}}"#),
            PopupError::Api("quota exceeded".to_string())
        );
        assert_eq!(
            classify_failure(StatusCode::BAD_REQUEST, r#"{"message":"top level"}"#),
            PopupError::Api("top level".to_string())
        );
        assert_eq!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>"),
            PopupError::Api("API error: 500 Internal Server Error".to_string())
        );
        assert_eq!(
            classify_failure(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"API key not valid.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#
            ),
            PopupError::Auth("API key not valid.".to_string())
        );
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, ""),
            PopupError::Auth(_)
        ));
    }

    #[test]
    fn test_choose_model_fallbacks() {
        let models = vec![
            ModelDescriptor { id: "models/a".into(), display_name: None },
            ModelDescriptor { id: "models/default".into(), display_name: None },
        ];
        assert_eq!(choose_model(&models, Some("models/a"), "models/default").unwrap().id, "models/a");
        assert_eq!(choose_model(&models, Some("models/gone"), "models/default").unwrap().id, "models/default");
        assert_eq!(choose_model(&models, None, "models/missing").unwrap().id, "models/a");
        assert!(choose_model(&[], None, "models/default").is_none());
    }

    #[tokio::test]
    async fn test_list_models_filters_and_sorts() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(mock_server.uri());

        let mock_response = json!({
            "models": [
                { "name": "models/zeta", "displayName": "zeta", "supportedGenerationMethods": ["generateContent"] },
                { "name": "models/embed", "displayName": "Embedding", "supportedGenerationMethods": ["embedContent"] },
                { "name": "models/alpha", "displayName": "Alpha", "supportedGenerationMethods": ["countTokens", "generateContent"] },
                { "name": "models/beta", "supportedGenerationMethods": ["generateContent"] }
            ]
        });

        Mock::given(method("GET"))
            .and(path("/models"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response))
            .mount(&mock_server)
            .await;

        let models = client.list_models("secret").await.expect("Failed to list models");
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["models/alpha", "models/beta", "models/zeta"]);
        assert_eq!(models[1].label(), "beta");
    }

    #[tokio::test]
    async fn test_list_models_bad_key() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Request had invalid authentication credentials.", "status": "UNAUTHENTICATED" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.list_models("bad").await;
        assert_eq!(
            result.unwrap_err(),
            PopupError::Auth("Request had invalid authentication credentials.".to_string())
        );
    }

    #[tokio::test]
    async fn test_generate_sends_fixed_config() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .and(query_param("key", "k"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "Say hi"}]}],
                "generationConfig": {"temperature": 0.5, "topP": 1.0, "topK": 40, "maxOutputTokens": 4096, "stopSequences": []},
                "safetySettings": [
                    {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                    {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                    {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                    {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hi there"}], "role": "model"}}]
            })))
            .mount(&mock_server)
            .await;

        let response = client
            .generate("k", "models/gemini-pro", &[MessageUnit::user("Say hi")], 0.5)
            .await
            .expect("generate failed");
        assert_eq!(response.text(), Some("Hi there"));
    }

    #[tokio::test]
    async fn test_generate_quota_error_message() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"error": {"message": "quota exceeded"}})),
            )
            .mount(&mock_server)
            .await;

        let result = client
            .generate("k", "models/gemini-pro", &[MessageUnit::user("x")], 0.7)
            .await;
        assert_eq!(result.unwrap_err(), PopupError::Api("quota exceeded".to_string()));
    }

    #[tokio::test]
    async fn test_generate_transport_error() {
        // Nothing listens on port 9 (discard) in the test environment.
        let client = GeminiClient::with_timeout("http://127.0.0.1:9".to_string(), Duration::from_secs(2));
        let result = client
            .generate("k", "models/gemini-pro", &[MessageUnit::user("x")], 0.7)
            .await;
        assert!(matches!(result, Err(PopupError::Transport(_))));
    }
}
