//! `chatrelay knowledge`: Rank knowledge documents against a query.

use chatrelay_config::AppConfig;
use chatrelay_core::text::truncate_chars;
use chatrelay_memory::KnowledgeMatcher;

pub async fn run(
    config: &AppConfig,
    query: &str,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let limit = limit.unwrap_or(config.generation.knowledge_max_results);
    let matcher = KnowledgeMatcher::new(
        config.storage.knowledge_dir.clone(),
        config.generation.knowledge_threshold,
    );

    let matches = matcher.find(query, limit).await;
    if matches.is_empty() {
        println!(
            "No documents in {} score above {}",
            matcher.dir().display(),
            config.generation.knowledge_threshold
        );
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        println!("{:>2}. {} (score {})", i + 1, m.document_id, m.score);
        println!(
            "    {}",
            truncate_chars(&m.content, config.generation.knowledge_snippet_max_len)
        );
    }
    Ok(())
}
