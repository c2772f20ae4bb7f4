use crate::error::Result;
use crate::history::HistoryEntry;
use crate::store::*;
use crate::theme::ThemePreference;
use serde_json::{Map, Value};

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

/// User preferences as loaded from the settings store.
///
/// Every field is read and defaulted on its own; a malformed value for one
/// key never affects the others.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub temperature: f32,
    pub selected_model: Option<String>,
    pub include_page_content: bool,
    pub enable_model_search: bool,
    pub theme: ThemePreference,
}

impl Settings {
    pub fn defaults(default_temperature: f32) -> Self {
        Self {
            api_key: None,
            temperature: default_temperature,
            selected_model: None,
            include_page_content: false,
            enable_model_search: false,
            theme: ThemePreference::System,
        }
    }

    pub fn load(store: &dyn SettingsStore, default_temperature: f32) -> Result<Self> {
        let values = store.get(&[
            KEY_API_KEY,
            KEY_TEMPERATURE,
            KEY_SELECTED_MODEL,
            KEY_INCLUDE_PAGE_CONTENT,
            KEY_ENABLE_MODEL_SEARCH,
            KEY_THEME,
        ])?;
        Ok(Self::from_values(&values, default_temperature))
    }

    pub fn from_values(values: &Map<String, Value>, default_temperature: f32) -> Self {
        let string = |key: &str| {
            values
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let flag = |key: &str| values.get(key).and_then(Value::as_bool).unwrap_or(false);

        Self {
            api_key: string(KEY_API_KEY),
            temperature: values
                .get(KEY_TEMPERATURE)
                .and_then(Value::as_f64)
                .map(|t| t as f32)
                .unwrap_or(default_temperature),
            selected_model: string(KEY_SELECTED_MODEL),
            include_page_content: flag(KEY_INCLUDE_PAGE_CONTENT),
            enable_model_search: flag(KEY_ENABLE_MODEL_SEARCH),
            theme: string(KEY_THEME)
                .map(|t| ThemePreference::parse(&t))
                .unwrap_or_default(),
        }
    }
}

/// Clamp a temperature to the range accepted by the input control.
pub fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        return MIN_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// Read the persisted history. A corrupt value is logged and treated as empty.
pub fn load_history_entries(store: &dyn SettingsStore) -> Result<Vec<HistoryEntry>> {
    let Some(value) = store.get_one(KEY_HISTORY)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_value::<Vec<HistoryEntry>>(value) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            tracing::warn!("ignoring unreadable history: {}", e);
            Ok(Vec::new())
        }
    }
}
