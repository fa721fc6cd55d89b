//! `chatrelay config`: Print the effective configuration.

use chatrelay_config::AppConfig;
use std::path::Path;

pub fn run(config: &AppConfig, path: &Path) {
    if path.exists() {
        println!("# Loaded from {} (plus CHATRELAY_* overrides)\n", path.display());
    } else {
        println!("# No file at {}; defaults plus CHATRELAY_* overrides\n", path.display());
    }

    let mut shown = config.clone();
    if shown.backend.api_key.is_some() {
        shown.backend.api_key = Some("***".into());
    }
    print!("{}", shown.to_toml());
}
