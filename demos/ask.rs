use anyhow::Context;
use legalbot::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep pipeline logs out of the way of the answer
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("legalbot_core=info".parse()?),
        )
        .init();

    let config = Config::load_or_default();
    let engine = RagEngine::from_config(config)?;

    let summary = engine.build_index().await?;
    println!("Index ready with {} chunks\n", engine.index_len());
    for failure in &summary.failures {
        println!("Skipped {}: {}", failure.path.display(), failure.reason);
    }

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Can I divorce my husband under the Hindu Marriage Act?".to_string());

    let answer = engine
        .answer(&question, &[])
        .await
        .context("Failed to answer question")?;

    println!("Q: {}\n", question);
    println!("A: {}\n", answer.text);
    for source in &answer.sources {
        println!("  [{} p.{}] score {:.2}", source.document_id, source.page, source.score);
    }

    Ok(())
}
