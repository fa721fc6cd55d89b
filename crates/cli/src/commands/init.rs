//! `chatrelay init`: Write a default config file.

use chatrelay_config::AppConfig;
use std::path::Path;

pub fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("💬 ChatRelay Setup");
    println!("====================\n");

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run init.");
        return Ok(());
    }

    if let Some(dir) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(config_path, AppConfig::default_toml())?;
    println!("✅ Created config at: {}", config_path.display());

    let storage = AppConfig::default().storage;
    for dir in [&storage.history_dir, &storage.knowledge_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created directory: {}", dir.display());
        }
    }

    println!("\n📝 Next steps:");
    println!("   1. Set generation.model_name to a model your backend serves");
    println!("   2. Drop .txt files into {}", storage.knowledge_dir.display());
    println!("   3. Run: chatrelay serve");
    Ok(())
}
