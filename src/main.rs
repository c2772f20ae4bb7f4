use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::eyre;
use crossterm::style::Stylize;
use std::path::PathBuf;
use std::sync::Arc;

use promptpad::app::Popup;
use promptpad::config::Config;
use promptpad::error::{PopupError, Result};
use promptpad::logging::init_logging;
use promptpad::render::render_terminal;
use promptpad::status::StatusKind;
use promptpad::store::{FileStore, SettingsStore};
use promptpad::theme::AppearanceSignal;

#[derive(Parser, Debug)]
#[command(name = "promptpad", version, about = "Ask Gemini from the terminal")]
struct Cli {
    /// Configuration file (defaults to the per-user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Settings/history file (defaults to the per-user config dir)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print responses as HTML instead of terminal text
    #[arg(long)]
    html: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt, replaying recent history as context
    Ask {
        prompt: Vec<String>,
        /// Page whose text is included when page content is on
        #[arg(long)]
        page: Option<String>,
    },
    /// Manage the API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// List models that support text generation
    Models,
    /// Select the model used for prompts
    Model { id: String },
    /// Set the sampling temperature (0 to 2)
    Temperature { value: f32 },
    /// Include page text with prompts
    PageContent { state: Toggle },
    /// Ask the model to consult web search
    ModelSearch { state: Toggle },
    /// Show the theme, or advance it with --cycle
    Theme {
        #[arg(long)]
        cycle: bool,
    },
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Copy a response (the latest by default) to the clipboard
    Copy { index: Option<usize> },
    /// Print a web search URL for the text
    Search { text: Vec<String> },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    Set { key: String },
    Clear,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    List,
    Show { index: usize },
    Delete { index: usize },
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!(
            "Warning: Failed to load config, using defaults. Error: {}",
            e
        );
        Config::default()
    });

    let store: Arc<dyn SettingsStore> = match cli.settings {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(
            FileStore::default_location()
                .ok_or_else(|| eyre!("cannot determine a configuration directory"))?,
        ),
    };

    let mut popup = Popup::new(config, store, Arc::new(AppearanceSignal::from_terminal()))?;

    let outcome = run(&mut popup, cli.command, cli.html).await;
    if let Err(e) = &outcome {
        if popup.status.current().is_none() {
            popup.status.error(e.to_string());
        }
    }
    let flushed = popup.flush().await;
    print_status(&popup);

    if outcome.is_err() || flushed.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(popup: &mut Popup, command: Command, html: bool) -> Result<()> {
    let palette = popup.theme().palette();

    match command {
        Command::Ask { prompt, page } => {
            if popup.settings.selected_model.is_none() && popup.settings.api_key.is_some() {
                // Best effort; a failure shows up as a validation error below.
                let _ = popup.refresh_models().await;
            }
            if let Some(text) = popup.submit(&prompt.join(" "), page.as_deref()).await? {
                println!("{}", display(&text, html).with(palette.response_fg));
            }
        }
        Command::Key { action: KeyAction::Set { key } } => {
            popup.save_key(&key).await?;
            if let Some(model) = &popup.settings.selected_model {
                println!("Using model {}", model.as_str().with(palette.heading_fg));
            }
        }
        Command::Key { action: KeyAction::Clear } => popup.clear_key(),
        Command::Models => {
            let selected = popup.settings.selected_model.clone();
            for model in popup.refresh_models().await? {
                let marker = if Some(&model.id) == selected.as_ref() { "*" } else { " " };
                println!(
                    "{} {}  {}",
                    marker,
                    model.label().with(palette.primary_fg),
                    model.id.as_str().with(palette.secondary_fg)
                );
            }
        }
        Command::Model { id } => popup.select_model(&id)?,
        Command::Temperature { value } => {
            let applied = popup.set_temperature(value);
            println!("Temperature: {}", applied);
        }
        Command::PageContent { state } => popup.set_include_page_content(state.enabled()),
        Command::ModelSearch { state } => popup.set_model_search(state.enabled()),
        Command::Theme { cycle } => {
            if cycle {
                popup.cycle_theme();
            }
            let theme = popup.theme();
            println!("{}", theme.current().to_string().with(theme.palette().heading_fg));
            println!("{}", theme.toggle_hint().with(theme.palette().secondary_fg));
        }
        Command::History { action: HistoryAction::List } => {
            let history = popup.history();
            if history.is_empty() {
                println!("{}", "No history yet.".with(palette.secondary_fg));
            }
            for (index, entry) in history.iter().enumerate().rev() {
                println!(
                    "[{}] {}  {}",
                    index,
                    entry.time_label().with(palette.secondary_fg),
                    entry.preview().with(palette.prompt_fg)
                );
            }
        }
        Command::History { action: HistoryAction::Show { index } } => {
            let entry = popup
                .load_history(index)
                .ok_or_else(|| PopupError::Validation(format!("No history entry {}", index)))?;
            println!("{}", entry.prompt.as_str().with(palette.prompt_fg));
            println!();
            println!("{}", display(&entry.response, html).with(palette.response_fg));
        }
        Command::History { action: HistoryAction::Delete { index } } => {
            if !popup.delete_history(index)? {
                return Err(PopupError::Validation(format!("No history entry {}", index)));
            }
        }
        Command::History { action: HistoryAction::Clear } => popup.clear_history(),
        Command::Copy { index } => popup.copy_history(index)?,
        Command::Search { text } => {
            println!("{}", popup.search_url(&text.join(" "))?);
        }
    }

    Ok(())
}

fn display(text: &str, html: bool) -> String {
    if html {
        return promptpad::render::render(text);
    }
    let width = crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(100);
    render_terminal(text, width)
}

fn print_status(popup: &Popup) {
    let Some(message) = popup.status.current() else {
        return;
    };
    let palette = popup.theme().palette();
    let color = match message.kind {
        StatusKind::Info => palette.info_fg,
        StatusKind::Success => palette.success_fg,
        StatusKind::Error => palette.error_fg,
    };
    eprintln!("{}", message.text.with(color));
}
