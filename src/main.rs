use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graph_rag::config::{Config, ExtractionMode};
use graph_rag::external::{
    convert_new_pdfs, list_models, CommandConverter, EmbeddingEngine, HeuristicExtractor,
    LLMEngine, OllamaExtractor,
};
use graph_rag::{
    answer_with_evidence, load_corpus, CancelFlag, Chunker, EvidenceContext, GraphBuilder,
    GraphRepository, QueryEngine, QueryResponse, Retriever,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the persisted graph (overrides GRAPH_DIR)
    #[arg(short = 'g', long)]
    graph_dir: Option<PathBuf>,

    /// Directory of course documents (PDF, markdown or text)
    #[arg(short = 'c', long)]
    corpus: Option<PathBuf>,

    /// Add the corpus to the existing graph
    #[arg(short = 'b', long)]
    build: bool,

    /// Discard the existing graph and build it again from the corpus
    #[arg(long)]
    rebuild: bool,

    /// Question to answer from the graph
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// Number of passages used as evidence
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Traversal depth around the seed passages
    #[arg(long)]
    hops: Option<usize>,

    /// Answer --query from every markdown file of the corpus instead of the graph
    #[arg(long)]
    md: bool,

    /// Only convert new PDFs of the corpus to markdown
    #[arg(long)]
    convert_only: bool,

    /// List the models available on the Ollama service
    #[arg(long)]
    list_models: bool,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn require_corpus(args: &Args) -> Result<&Path> {
    match &args.corpus {
        Some(dir) => Ok(dir.as_path()),
        None => anyhow::bail!("--corpus <DIR> is required for this operation"),
    }
}

async fn convert(config: &Config, corpus: &Path) -> Result<()> {
    let converter = CommandConverter::new(config.converter.clone());
    let report = convert_new_pdfs(corpus, &converter).await?;

    println!(
        "PDF conversion: {} converted, {} already converted, {} failed",
        report.converted.len(),
        report.existing.len(),
        report.failed.len()
    );
    for (pdf, reason) in &report.failed {
        println!("  failed {}: {}", pdf.display(), reason);
    }
    Ok(())
}

async fn build(config: &Config, corpus: &Path, rebuild: bool, cancel: &CancelFlag) -> Result<()> {
    convert(config, corpus).await?;
    let documents = load_corpus(corpus)?;
    println!("Loaded {} documents from {}", documents.len(), corpus.display());

    let embedder = Arc::new(EmbeddingEngine::new(config.embedding.clone()).await?);
    info!("Using embedding model {}", embedder.model());
    let mut builder = GraphBuilder::new(
        Chunker::from_config(&config.chunking),
        embedder,
        config.graph.clone(),
        config.processing.clone(),
    );
    builder = match config.graph.entity_extraction {
        ExtractionMode::Off => builder,
        ExtractionMode::Heuristic => builder.with_extractor(Arc::new(HeuristicExtractor::new()?)),
        ExtractionMode::Llm => builder.with_extractor(Arc::new(OllamaExtractor::new(&config.llm)?)),
    };

    let repository = if rebuild {
        GraphRepository::open_empty(&config.graph.graph_dir)
    } else {
        GraphRepository::open(&config.graph.graph_dir)?
    };
    let mut session = repository.begin_session().await;

    let report = builder.build(session.graph_mut(), &documents, cancel).await?;
    let graph = session.commit()?;

    println!(
        "Graph saved to {}: {} nodes, {} edges",
        repository.path().display(),
        graph.node_count(),
        graph.edge_count()
    );
    println!(
        "  {} passages added, {} unchanged, {} entities added, {} skipped",
        report.passages_added,
        report.unchanged,
        report.entities_added,
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!(
            "  skipped {}#{} after {} attempt(s): {}",
            skipped.document_id, skipped.position, skipped.attempts, skipped.reason
        );
    }
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    Ok(())
}

async fn answer(config: &Config, query: &str) -> Result<()> {
    let repository = GraphRepository::open(&config.graph.graph_dir)?;
    let graph = repository.snapshot();
    if graph.is_empty() {
        println!("The graph is empty. Build it first with --build --corpus <DIR>.");
        return Ok(());
    }

    let embedder = Arc::new(EmbeddingEngine::new(config.embedding.clone()).await?);
    let generator = Arc::new(LLMEngine::new(config.llm.clone()).await?);
    let retriever = Retriever::new(graph, embedder, config.retrieval.clone());
    let engine = QueryEngine::new(retriever, generator);

    let response = engine.answer(query).await?;
    print_response(&response);
    Ok(())
}

async fn answer_from_markdown(config: &Config, corpus: &Path, query: &str) -> Result<()> {
    let documents = load_corpus(corpus)?;
    let evidence = EvidenceContext::from_documents(query, &documents);
    if evidence.is_empty() {
        println!("No markdown documents found in {}.", corpus.display());
        return Ok(());
    }
    info!(documents = evidence.items.len(), "Answering from markdown files");

    let generator = LLMEngine::new(config.llm.clone()).await?;
    let response = answer_with_evidence(&generator, evidence).await?;
    print_response(&response);
    Ok(())
}

fn print_response(response: &QueryResponse) {
    match &response.answer {
        None => println!("No relevant information found in the graph for this question."),
        Some(answer) => {
            println!("{}\n", answer);
            println!("Sources:");
            for item in &response.evidence.items {
                println!(
                    "  {}#{} (score {:.3})",
                    item.document_id, item.position, item.score
                );
            }
            println!("\nContext used:\n{}", response.evidence.render());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    init_tracing(&config.processing.log_level);

    if let Some(dir) = &args.graph_dir {
        config.graph.graph_dir = dir.clone();
    }
    if let Some(k) = args.top_k {
        config.retrieval.top_k = k;
    }
    if let Some(hops) = args.hops {
        config.retrieval.hop_budget = hops;
    }

    if args.list_models {
        let models = list_models(&config.llm).await?;
        println!("Available models:");
        for model in models {
            println!("  {}", model.name);
        }
        return Ok(());
    }

    if args.convert_only {
        return convert(&config, require_corpus(&args)?).await;
    }

    let mut did_something = false;
    if args.build || args.rebuild {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling build");
                flag.cancel();
            }
        });

        build(&config, require_corpus(&args)?, args.rebuild, &cancel).await?;
        did_something = true;
    }

    match &args.query {
        Some(query) if args.md => {
            answer_from_markdown(&config, require_corpus(&args)?, query).await?;
            did_something = true;
        }
        Some(query) => {
            answer(&config, query).await?;
            did_something = true;
        }
        None if args.md => anyhow::bail!("--md needs a question: use --query <TEXT>"),
        None => {}
    }

    if !did_something {
        println!("Nothing to do. Use --build --corpus <DIR> to build the graph or --query <TEXT> to ask a question.");
    }
    Ok(())
}
