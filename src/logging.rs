use std::error::Error;
use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

/// Installs the process logger. With a log file, output goes to both the
/// terminal and the file; otherwise `env_logger` handles it and `RUST_LOG`
/// overrides `level`.
pub fn init(level: &str, file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter: LevelFilter = level
        .parse()
        .map_err(|_| format!("unknown log level '{level}'"))?;
    match file {
        Some(path) => {
            let out = File::create(path)?;
            CombinedLogger::init(vec![
                TermLogger::new(
                    filter,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(filter, Config::default(), out),
            ])?;
        }
        None => {
            env_logger::Builder::new()
                .filter_level(filter)
                .parse_default_env()
                .try_init()?;
        }
    }
    Ok(())
}
