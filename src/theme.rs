//! Tri-state theme preference and the terminal colours that go with it.
//!
//! `System` follows the OS (or terminal) light/dark signal for as long as it
//! is selected; the controller holds at most one subscription to that signal.

use crate::persistence::Persister;
use crate::store::KEY_THEME;
use crossterm::style::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    System,
    Light,
    Dark,
}

impl ThemePreference {
    pub fn next(self) -> Self {
        match self {
            ThemePreference::System => ThemePreference::Light,
            ThemePreference::Light => ThemePreference::Dark,
            ThemePreference::Dark => ThemePreference::System,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::System => "system",
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
        }
    }

    /// Unknown or missing values fall back to `System`.
    pub fn parse(value: &str) -> Self {
        match value {
            "light" => ThemePreference::Light,
            "dark" => ThemePreference::Dark,
            _ => ThemePreference::System,
        }
    }

    fn title(self) -> &'static str {
        match self {
            ThemePreference::System => "System",
            ThemePreference::Light => "Light",
            ThemePreference::Dark => "Dark",
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Listener = Box<dyn Fn(bool) + Send + Sync>;

/// Source of the OS-level "prefers dark" signal.
pub trait SystemAppearance: Send + Sync {
    fn is_dark(&self) -> bool;

    /// Register `listener` for future changes. Dropping the returned
    /// [`Subscription`] unregisters it.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Guard for a registered appearance listener.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// In-process appearance signal with a listener registry.
#[derive(Clone, Default)]
pub struct AppearanceSignal {
    dark: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    listeners: Arc<Mutex<HashMap<u64, Listener>>>,
}

impl AppearanceSignal {
    pub fn new(dark: bool) -> Self {
        let signal = Self::default();
        signal.dark.store(dark, Ordering::SeqCst);
        signal
    }

    /// Seed from the `COLORFGBG` hint most terminals export ("15;0" means
    /// light text on a dark background). Defaults to dark when absent.
    pub fn from_terminal() -> Self {
        let dark = std::env::var("COLORFGBG")
            .ok()
            .and_then(|value| value.rsplit(';').next().and_then(|bg| bg.parse::<u8>().ok()))
            .map(|bg| bg < 7 || bg == 8)
            .unwrap_or(true);
        Self::new(dark)
    }

    /// Change the signal and notify current listeners.
    pub fn set_dark(&self, dark: bool) {
        let previous = self.dark.swap(dark, Ordering::SeqCst);
        if previous == dark {
            return;
        }
        let listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        for listener in listeners.values() {
            listener(dark);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl SystemAppearance for AppearanceSignal {
    fn is_dark(&self) -> bool {
        self.dark.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, listener);

        let listeners = Arc::clone(&self.listeners);
        Subscription::new(move || {
            listeners.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
        })
    }
}

/// Document-level marker describing what is currently displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeMarker {
    pub preference: ThemePreference,
    pub dark: bool,
}

pub struct ThemeController {
    preference: ThemePreference,
    appearance: Arc<dyn SystemAppearance>,
    effective_dark: Arc<AtomicBool>,
    subscription: Option<Subscription>,
    persister: Option<Persister>,
}

impl ThemeController {
    pub fn new(
        preference: ThemePreference,
        appearance: Arc<dyn SystemAppearance>,
        persister: Option<Persister>,
    ) -> Self {
        let mut controller = Self {
            preference,
            appearance,
            effective_dark: Arc::new(AtomicBool::new(false)),
            subscription: None,
            persister,
        };
        controller.activate(preference);
        controller
    }

    pub fn current(&self) -> ThemePreference {
        self.preference
    }

    pub fn marker(&self) -> ThemeMarker {
        ThemeMarker {
            preference: self.preference,
            dark: self.effective_dark.load(Ordering::SeqCst),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Advance to the next preference, apply it and persist it.
    pub fn cycle(&mut self) -> ThemePreference {
        let next = self.preference.next();
        self.apply(next);
        next
    }

    pub fn apply(&mut self, preference: ThemePreference) {
        self.activate(preference);
        if let Some(persister) = &self.persister {
            persister.set(KEY_THEME, serde_json::Value::from(preference.as_str()));
        }
        tracing::debug!(theme = %preference, dark = self.marker().dark, "theme applied");
    }

    fn activate(&mut self, preference: ThemePreference) {
        self.preference = preference;
        // Drop any previous listener before installing a new one.
        self.subscription = None;

        match preference {
            ThemePreference::Light => self.effective_dark.store(false, Ordering::SeqCst),
            ThemePreference::Dark => self.effective_dark.store(true, Ordering::SeqCst),
            ThemePreference::System => {
                self.effective_dark
                    .store(self.appearance.is_dark(), Ordering::SeqCst);
                let effective = Arc::clone(&self.effective_dark);
                self.subscription = Some(self.appearance.subscribe(Box::new(move |dark| {
                    effective.store(dark, Ordering::SeqCst);
                })));
            }
        }
    }

    /// Tooltip text for the theme toggle, e.g.
    /// `Switch to Light Theme (Current: System (Dark))`.
    pub fn toggle_hint(&self) -> String {
        let current = match self.preference {
            ThemePreference::System => format!(
                "System ({})",
                if self.marker().dark { "Dark" } else { "Light" }
            ),
            other => other.title().to_string(),
        };
        format!(
            "Switch to {} Theme (Current: {})",
            self.preference.next().title(),
            current
        )
    }

    pub fn palette(&self) -> Palette {
        if self.marker().dark {
            Palette::dark()
        } else {
            Palette::light()
        }
    }
}

impl fmt::Debug for ThemeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThemeController")
            .field("preference", &self.preference)
            .field("marker", &self.marker())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub primary_fg: Color,
    pub secondary_fg: Color,
    pub heading_fg: Color,
    pub prompt_fg: Color,
    pub response_fg: Color,
    pub info_fg: Color,
    pub success_fg: Color,
    pub error_fg: Color,
}

impl Palette {
    pub fn dark() -> Self {
        Self {
            primary_fg: Color::White,
            secondary_fg: Color::DarkGrey,
            heading_fg: Color::Blue,
            prompt_fg: Color::Cyan,
            response_fg: Color::White,
            info_fg: Color::Cyan,
            success_fg: Color::Green,
            error_fg: Color::Red,
        }
    }

    pub fn light() -> Self {
        Self {
            primary_fg: Color::Black,
            secondary_fg: Color::Grey,
            heading_fg: Color::DarkBlue,
            prompt_fg: Color::DarkCyan,
            response_fg: Color::Black,
            info_fg: Color::DarkBlue,
            success_fg: Color::DarkGreen,
            error_fg: Color::DarkRed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(signal: &AppearanceSignal, preference: ThemePreference) -> ThemeController {
        ThemeController::new(preference, Arc::new(signal.clone()), None)
    }

    #[test]
    fn test_cycle_returns_to_system_after_three_steps() {
        let signal = AppearanceSignal::new(true);
        let mut theme = controller(&signal, ThemePreference::System);

        assert_eq!(theme.cycle(), ThemePreference::Light);
        assert!(signal.listener_count() <= 1);
        assert_eq!(theme.cycle(), ThemePreference::Dark);
        assert!(signal.listener_count() <= 1);
        assert_eq!(theme.cycle(), ThemePreference::System);
        assert_eq!(signal.listener_count(), 1);
    }

    #[test]
    fn test_subscription_only_while_system() {
        let signal = AppearanceSignal::new(false);
        let mut theme = controller(&signal, ThemePreference::System);
        assert!(theme.is_subscribed());

        theme.apply(ThemePreference::Dark);
        assert!(!theme.is_subscribed());
        assert_eq!(signal.listener_count(), 0);

        // Re-applying system repeatedly never stacks listeners.
        for _ in 0..5 {
            theme.apply(ThemePreference::System);
            assert_eq!(signal.listener_count(), 1);
        }
    }

    #[test]
    fn test_system_follows_signal_changes() {
        let signal = AppearanceSignal::new(false);
        let mut theme = controller(&signal, ThemePreference::System);
        assert!(!theme.marker().dark);

        signal.set_dark(true);
        assert!(theme.marker().dark);

        theme.apply(ThemePreference::Light);
        signal.set_dark(false);
        signal.set_dark(true);
        assert!(!theme.marker().dark, "light ignores the system signal");
    }

    #[test]
    fn test_dropping_controller_releases_listener() {
        let signal = AppearanceSignal::new(true);
        {
            let _theme = controller(&signal, ThemePreference::System);
            assert_eq!(signal.listener_count(), 1);
        }
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_toggle_hint() {
        let signal = AppearanceSignal::new(true);
        let mut theme = controller(&signal, ThemePreference::System);
        assert_eq!(
            theme.toggle_hint(),
            "Switch to Light Theme (Current: System (Dark))"
        );
        theme.cycle();
        assert_eq!(theme.toggle_hint(), "Switch to Dark Theme (Current: Light)");
    }

    #[test]
    fn test_parse_unknown_falls_back_to_system() {
        assert_eq!(ThemePreference::parse("dark"), ThemePreference::Dark);
        assert_eq!(ThemePreference::parse("sepia"), ThemePreference::System);
    }
}
