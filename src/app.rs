use crate::config::Config;
use crate::context::{augment_prompt, build_request_messages, Augmentation, MessageUnit};
use crate::error::{PopupError, Result};
use crate::gemini::{choose_model, GeminiClient, GenerateResponse, ModelDescriptor};
use crate::history::{ConversationHistory, HistoryEntry};
use crate::page::PageReader;
use crate::persistence::Persister;
use crate::render;
use crate::settings::{clamp_temperature, load_history_entries, Settings};
use crate::status::StatusBoard;
use crate::store::*;
use crate::theme::{SystemAppearance, ThemeController, ThemePreference};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A request that passed validation and is ready to send.
///
/// `token` orders submissions; only the most recent one may update the
/// displayed response and the history.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub token: u64,
    pub prompt: String,
    pub api_key: String,
    pub model_id: String,
    pub messages: Vec<MessageUnit>,
    pub temperature: f32,
}

impl PendingRequest {
    pub async fn send(&self, client: &GeminiClient) -> Result<GenerateResponse> {
        client
            .generate(&self.api_key, &self.model_id, &self.messages, self.temperature)
            .await
    }
}

/// The popup's state and every user action on it.
pub struct Popup {
    config: Config,
    persister: Persister,
    pub settings: Settings,
    history: ConversationHistory,
    theme: ThemeController,
    client: GeminiClient,
    page_reader: PageReader,
    pub status: StatusBoard,
    models: Vec<ModelDescriptor>,
    response: Option<String>,
    draft: String,
    last_token: u64,
}

impl Popup {
    /// Must be called inside a tokio runtime; persistence and status timers
    /// run as background tasks.
    pub fn new(
        config: Config,
        store: Arc<dyn SettingsStore>,
        appearance: Arc<dyn SystemAppearance>,
    ) -> Result<Self> {
        config.validate()?;
        let settings = Settings::load(store.as_ref(), config.default_temperature)?;
        let history =
            ConversationHistory::from_entries(load_history_entries(store.as_ref())?, config.max_history);
        let persister = Persister::new(store);
        let theme = ThemeController::new(settings.theme, appearance, Some(persister.clone()));
        let client = GeminiClient::with_timeout(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        );

        tracing::info!(
            history = history.len(),
            has_key = settings.api_key.is_some(),
            model = settings.selected_model.as_deref().unwrap_or("-"),
            "popup initialised"
        );

        Ok(Self {
            status: StatusBoard::new(Duration::from_millis(config.status_dismiss_ms)),
            config,
            persister,
            settings,
            history,
            theme,
            client,
            page_reader: PageReader::new(),
            models: Vec::new(),
            response: None,
            draft: String::new(),
            last_token: 0,
        })
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn theme(&self) -> &ThemeController {
        &self.theme
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Raw text of the response currently on display.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn rendered_response(&self) -> Option<String> {
        self.response.as_deref().map(render::render)
    }

    /// Prompt text kept in the input field (restored after failures).
    pub fn draft(&self) -> &str {
        &self.draft
    }

    // ---- API key and models -------------------------------------------

    /// Validate `api_key` by listing models, then store it.
    pub async fn save_key(&mut self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(self.fail(PopupError::Validation("Please enter an API key".to_string())));
        }

        let models = match self.client.list_models(api_key).await {
            Ok(models) => models,
            Err(e) => {
                self.status.error(format!("Error saving API key: {}", e));
                return Err(e);
            }
        };

        self.persister.set(KEY_API_KEY, Value::from(api_key));
        self.settings.api_key = Some(api_key.to_string());
        self.install_models(models);
        self.status.success("API key saved successfully!");
        Ok(())
    }

    pub fn clear_key(&mut self) {
        self.persister.remove(KEY_API_KEY);
        self.persister.remove(KEY_SELECTED_MODEL);
        self.settings.api_key = None;
        self.settings.selected_model = None;
        self.models.clear();
        self.status.info("API key cleared");
    }

    pub async fn refresh_models(&mut self) -> Result<&[ModelDescriptor]> {
        let api_key = self.require_key()?;
        match self.client.list_models(&api_key).await {
            Ok(models) => {
                self.install_models(models);
                Ok(&self.models)
            }
            Err(e) => {
                self.status.error(format!("Error fetching models: {}", e));
                Err(e)
            }
        }
    }

    fn install_models(&mut self, models: Vec<ModelDescriptor>) {
        let stored = self.settings.selected_model.clone();
        let chosen = choose_model(&models, stored.as_deref(), &self.config.default_model_id)
            .map(|m| m.id.clone());

        if chosen.is_some() && chosen != stored {
            if let Some(id) = &chosen {
                self.persister.set(KEY_SELECTED_MODEL, Value::from(id.as_str()));
            }
            self.settings.selected_model = chosen;
        }
        if models.is_empty() {
            self.status.error("No compatible models found");
        }
        self.models = models;
    }

    pub fn select_model(&mut self, model_id: &str) -> Result<()> {
        let label = if self.models.is_empty() {
            model_id.to_string()
        } else {
            match self.models.iter().find(|m| m.id == model_id) {
                Some(model) => model.label().to_string(),
                None => {
                    return Err(self.fail(PopupError::Validation(format!(
                        "Unknown model: {}",
                        model_id
                    ))))
                }
            }
        };

        self.persister.set(KEY_SELECTED_MODEL, Value::from(model_id));
        self.settings.selected_model = Some(model_id.to_string());
        self.status.info(format!("Model set to: {}", label));
        Ok(())
    }

    // ---- Preferences ---------------------------------------------------

    pub fn set_temperature(&mut self, temperature: f32) -> f32 {
        let temperature = clamp_temperature(temperature);
        self.settings.temperature = temperature;
        self.persister.set(KEY_TEMPERATURE, Value::from(temperature as f64));
        temperature
    }

    pub fn set_include_page_content(&mut self, enabled: bool) {
        self.settings.include_page_content = enabled;
        self.persister.set(KEY_INCLUDE_PAGE_CONTENT, Value::from(enabled));
        self.status.info(if enabled {
            "Page content included."
        } else {
            "Page content excluded."
        });
    }

    pub fn set_model_search(&mut self, enabled: bool) {
        self.settings.enable_model_search = enabled;
        self.persister.set(KEY_ENABLE_MODEL_SEARCH, Value::from(enabled));
        self.status.info(if enabled {
            "Model will use search."
        } else {
            "Model search disabled."
        });
    }

    pub fn cycle_theme(&mut self) -> ThemePreference {
        let theme = self.theme.cycle();
        self.settings.theme = theme;
        theme
    }

    // ---- Generation ----------------------------------------------------

    /// Validate input, assemble the context and take a new request token.
    ///
    /// Nothing is sent and nothing is recorded; page text that cannot be read
    /// is skipped with an info message rather than failing the request.
    pub async fn prepare(&mut self, prompt: &str, page_url: Option<&str>) -> Result<PendingRequest> {
        let prompt = prompt.trim().to_string();
        self.draft = prompt.clone();

        let api_key = self
            .require_key()
            .map_err(|_| self.fail(PopupError::Validation("API key required.".to_string())))?;
        if prompt.is_empty() {
            return Err(self.fail(PopupError::Validation("Please enter a prompt.".to_string())));
        }
        let model_id = self.settings.selected_model.clone().ok_or_else(|| {
            self.fail(PopupError::Validation(
                "Please select a model first.".to_string(),
            ))
        })?;

        let augmentation = Augmentation {
            search_assist: self.settings.enable_model_search,
            page_text: self.page_text(page_url).await,
            max_page_chars: self.config.max_page_content_length,
        };
        self.announce(&augmentation);

        let mut messages = build_request_messages(&self.history, &prompt, self.config.context_pairs);
        if let Some(last) = messages.last_mut() {
            *last = MessageUnit::user(augment_prompt(&prompt, &augmentation));
        }

        self.last_token += 1;
        Ok(PendingRequest {
            token: self.last_token,
            prompt,
            api_key,
            model_id,
            messages,
            temperature: self.settings.temperature,
        })
    }

    /// Apply the outcome of `request`.
    ///
    /// Returns `Ok(None)` when a newer request has been prepared since; that
    /// outcome is dropped without touching the display or the history.
    pub fn finish(
        &mut self,
        request: PendingRequest,
        outcome: Result<GenerateResponse>,
    ) -> Result<Option<String>> {
        if request.token != self.last_token {
            tracing::debug!(
                token = request.token,
                latest = self.last_token,
                "discarding stale response"
            );
            return Ok(None);
        }

        match outcome {
            Ok(response) => {
                let text = response.text_or_placeholder();
                self.history.append(request.prompt, text.clone());
                self.persist_history()?;
                self.response = Some(text.clone());
                self.draft.clear();
                Ok(Some(text))
            }
            Err(e) => {
                tracing::warn!(remote = e.is_remote(), "generation failed: {}", e);
                self.status.error(format!("Error: {}", e));
                Err(e)
            }
        }
    }

    pub async fn submit(&mut self, prompt: &str, page_url: Option<&str>) -> Result<Option<String>> {
        let request = self.prepare(prompt, page_url).await?;
        let outcome = request.send(&self.client).await;
        self.finish(request, outcome)
    }

    async fn page_text(&mut self, page_url: Option<&str>) -> Option<String> {
        if !self.settings.include_page_content {
            return None;
        }
        let Some(url) = page_url else {
            self.status.info("No page content.");
            return None;
        };
        match self.page_reader.read(url).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::info!("continuing without page content: {}", e);
                self.status.info(e.to_string());
                None
            }
        }
    }

    fn announce(&mut self, augmentation: &Augmentation) {
        match (augmentation.search_assist, augmentation.page_text.is_some()) {
            (true, true) => self.status.info("Including page content & model will attempt search."),
            (true, false) => self.status.info("Model will attempt to use Google Search."),
            (false, true) => self.status.info("Webpage content is being included in the prompt."),
            (false, false) => {}
        }
    }

    // ---- History -------------------------------------------------------

    /// Show a stored turn: its prompt goes back to the input, its response
    /// to the display.
    pub fn load_history(&mut self, index: usize) -> Option<HistoryEntry> {
        let entry = self.history.get(index)?.clone();
        self.draft = entry.prompt.clone();
        self.response = Some(entry.response.clone());
        self.status.info("Loaded chat from history.");
        Some(entry)
    }

    pub fn delete_history(&mut self, index: usize) -> Result<bool> {
        if self.history.delete_at(index).is_none() {
            return Ok(false);
        }
        self.persist_history()?;
        self.status.info("Chat deleted.");
        Ok(true)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.persister.remove(KEY_HISTORY);
        self.status.info("History cleared");
    }

    fn persist_history(&self) -> Result<()> {
        let entries = serde_json::to_value(self.history.to_vec())?;
        self.persister.set(KEY_HISTORY, entries);
        Ok(())
    }

    // ---- Misc ----------------------------------------------------------

    pub fn copy_response(&mut self) -> Result<()> {
        let text = match self.response.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => {
                self.status.info("Nothing to copy");
                return Ok(());
            }
        };

        match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text)) {
            Ok(()) => {
                self.status.success("Copied to clipboard!");
                Ok(())
            }
            Err(e) => {
                self.status.error("Failed to copy");
                Err(PopupError::Storage(format!("clipboard unavailable: {}", e)))
            }
        }
    }

    /// Copy the response of history entry `index`, or of the newest entry.
    pub fn copy_history(&mut self, index: Option<usize>) -> Result<()> {
        match index {
            Some(index) => {
                if self.load_history(index).is_none() {
                    return Err(self.fail(PopupError::Validation(format!(
                        "No history entry {}",
                        index
                    ))));
                }
            }
            None => {
                if let Some(latest) = self.history.len().checked_sub(1) {
                    self.load_history(latest);
                }
            }
        }
        self.copy_response()
    }

    /// Web search URL for the prompt text.
    pub fn search_url(&mut self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(self.fail(PopupError::Validation(
                "Please enter text in the prompt to search.".to_string(),
            )));
        }
        Ok(format!(
            "https://www.google.com/search?q={}",
            urlencoding::encode(text)
        ))
    }

    /// Wait for queued writes. A failed write is also shown as a status.
    pub async fn flush(&mut self) -> Result<()> {
        if let Err(e) = self.persister.flush().await {
            self.status.error(format!("Could not save settings: {}", e));
            return Err(e);
        }
        Ok(())
    }

    fn require_key(&self) -> Result<String> {
        self.settings
            .api_key
            .clone()
            .ok_or_else(|| PopupError::Validation("API key required.".to_string()))
    }

    fn fail(&mut self, err: PopupError) -> PopupError {
        self.status.error(err.to_string());
        err
    }
}
