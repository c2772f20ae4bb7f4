use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, Registry};

use crate::config::config_dir;

/// Route `tracing` output to `<config dir>/logs/promptpad.log`.
///
/// The terminal belongs to the command output, so nothing is written to stderr.
pub fn init_logging() -> anyhow::Result<()> {
    if let Some(dir) = config_dir().map(|base| base.join("logs")) {
        std::fs::create_dir_all(&dir)?;
        let log_file = dir.join("promptpad.log");
        let file = File::create(log_file)?;

        let file_layer = fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false);

        Registry::default()
            .with(file_layer)
            .init();
    }

    Ok(())
}
