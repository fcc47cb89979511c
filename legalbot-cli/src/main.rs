use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use legalbot_core::config::Config;
use legalbot_core::rag::{BuildOutcome, BuildSummary};
use legalbot_core::{Answer, ConversationTurn, RagEngine, RagError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "legalbot")]
#[command(about = "Ask questions about a corpus of legal documents", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log pipeline details (equivalent to RUST_LOG=legalbot_core=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Model management commands")]
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },

    #[command(about = "Load the persisted index, building it if missing or stale")]
    Index,

    #[command(about = "Rebuild the index from the corpus folder")]
    Rebuild,

    #[command(about = "Answer a single question")]
    Ask {
        #[arg(help = "The question, e.g. 'Can I divorce my husband under Hindu Marriage Act?'")]
        question: String,
    },

    #[command(about = "Interactive question answering with conversation history")]
    Chat,
}

#[derive(Subcommand)]
enum ModelCommands {
    #[command(about = "Show current generation and embedding models")]
    Show,

    #[command(about = "Set the generation model")]
    Set {
        #[arg(help = "Model name (e.g., 'gemma3:1b' or 'llama3.2:latest')")]
        model: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Show => show_config(&cli.config),
        Commands::Model { command } => match command {
            ModelCommands::Show => show_model(&cli.config),
            ModelCommands::Set { model } => set_model(&cli.config, &model),
        },
        Commands::Index => {
            let engine = engine(&cli.config)?;
            let summary = engine.build_index().await.context("Failed to prepare index")?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Rebuild => {
            let engine = engine(&cli.config)?;
            let summary = engine.rebuild_index().await.context("Failed to rebuild index")?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Ask { question } => {
            let engine = ready_engine(&cli.config).await?;
            match answer_interruptibly(&engine, &question, &[]).await {
                Ok(answer) => {
                    print_answer(&answer);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{} {}", "✗".red().bold(), e.user_message());
                    Err(e).context("Failed to answer question")
                }
            }
        }
        Commands::Chat => chat(&cli.config).await,
    }
}

fn init_logging(verbose: bool) {
    let directive = if verbose {
        "legalbot_core=debug"
    } else {
        "legalbot_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Uses defaults when no config file exists at the default location.
fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() && config_path == Path::new("config.yaml") {
        return Ok(Config::default());
    }
    Config::load(config_path).with_context(|| format!("Failed to load config from {}", config_path.display()))
}

fn engine(config_path: &Path) -> Result<RagEngine> {
    let config = load_config(config_path)?;
    RagEngine::from_config(config).context("Failed to create engine")
}

async fn ready_engine(config_path: &Path) -> Result<RagEngine> {
    let engine = engine(config_path)?;
    let summary = engine.build_index().await.context("Failed to prepare index")?;
    if !summary.is_ready() && engine.index_version().is_none() {
        print_summary(&summary);
        anyhow::bail!("No index available");
    }
    Ok(engine)
}

/// Answers a question; Ctrl-C cancels the pending model call.
async fn answer_interruptibly(
    engine: &RagEngine,
    question: &str,
    history: &[ConversationTurn],
) -> Result<Answer, RagError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = engine.answer_with_cancel(question, history, &cancel).await;
    watcher.abort();
    result
}

async fn chat(config_path: &Path) -> Result<()> {
    let engine = ready_engine(config_path).await?;
    let mut history: Vec<ConversationTurn> = Vec::new();

    println!(
        "{} {} chunks indexed. Type {} to leave.",
        "LegalBOT".bold().green(),
        engine.index_len(),
        "exit".bold()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!();
        println!("{}", "Your question:".bold());

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        match answer_interruptibly(&engine, question, &history).await {
            Ok(answer) => {
                print_answer(&answer);
                history.push(ConversationTurn::user(question));
                history.push(ConversationTurn::assistant(answer.text));
            }
            Err(RagError::EmptyQuestion) => continue,
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Question failed");
                eprintln!("{} {}", "✗".red().bold(), e.user_message());
            }
        }
    }

    Ok(())
}

fn print_answer(answer: &Answer) {
    println!();
    println!("{}", answer.text);

    if answer.is_grounded() {
        println!();
        println!("{}", "Sources:".bold());
        for source in &answer.sources {
            println!(
                "  {} {} (page {}, score {:.2})",
                "•".cyan(),
                source.document_id,
                source.page,
                source.score
            );
        }
    } else {
        println!();
        println!("{}", "No relevant passages were found in the corpus.".yellow());
    }
}

fn print_summary(summary: &BuildSummary) {
    if summary.from_persisted {
        println!(
            "{} Loaded persisted index with {} chunks",
            "✓".green().bold(),
            summary.chunks_indexed
        );
        return;
    }

    match &summary.outcome {
        BuildOutcome::Ready => println!(
            "{} Indexed {} of {} documents into {} chunks ({} reused) in {:.1}s",
            "✓".green().bold(),
            summary.documents_indexed,
            summary.documents_loaded,
            summary.chunks_indexed,
            summary.chunks_reused,
            summary.elapsed.as_secs_f64()
        ),
        BuildOutcome::Failed { stage, reason } => println!(
            "{} Build failed during {}: {}",
            "✗".red().bold(),
            stage,
            reason
        ),
    }

    for failure in &summary.failures {
        println!(
            "  {} skipped {}: {}",
            "!".yellow(),
            failure.path.display(),
            failure.reason
        );
    }
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "LLM:".bold());
    println!("  Model:          {}", config.llm.model.cyan());
    println!("  Base URL:       {}", config.llm.base_url);
    println!("  Temperature:    {}", config.llm.temperature);
    println!("  Max Tokens:     {}", config.llm.max_tokens);
    println!();
    println!("{}", "Embedding:".bold());
    println!("  Backend:        {:?}", config.embedding.backend);
    println!("  Model:          {}", config.embedding.model.cyan());
    println!("  Base URL:       {}", config.embedding_base_url());
    println!();
    println!("{}", "RAG:".bold());
    println!("  Chunk Size:     {}", config.rag.chunk_size);
    println!("  Chunk Overlap:  {}", config.rag.chunk_overlap);
    println!("  Top K:          {}", config.rag.top_k);
    println!("  Min Score:      {}", config.rag.min_score);
    println!("  Similarity:     {}", config.rag.similarity.name());
    println!();
    println!("{}", "Storage:".bold());
    println!("  Corpus:         {}", config.corpus.data_dir.display());
    println!("  Index:          {}", config.storage.index_dir.display());

    Ok(())
}

fn show_model(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}: {}", "Generation model".bold(), config.llm.model.cyan());
    println!("{}: {}", "Embedding model".bold(), config.embedding.model.cyan());
    Ok(())
}

fn set_model(config_path: &Path, model: &str) -> Result<()> {
    let content = std::fs::read_to_string(config_path)
        .context("Failed to read config file")?;

    let mut config: serde_yaml::Value = serde_yaml::from_str(&content)
        .context("Failed to parse config")?;

    let root = config
        .as_mapping_mut()
        .context("Config file is not a YAML mapping")?;
    let llm = root
        .entry(serde_yaml::Value::String("llm".to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    if let Some(llm_map) = llm.as_mapping_mut() {
        llm_map.insert(
            serde_yaml::Value::String("model".to_string()),
            serde_yaml::Value::String(model.to_string()),
        );
    }

    let updated_content = serde_yaml::to_string(&config)
        .context("Failed to serialize config")?;

    std::fs::write(config_path, updated_content)
        .context("Failed to write config file")?;

    println!(
        "{} Model updated to: {}",
        "✓".green().bold(),
        model.cyan()
    );

    Ok(())
}
