//! Page Tree Graph CLI
//!
//! Builds hierarchical summary trees for documents, stores them as graphs
//! and queries them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use page_tree_graph::{
    config::Config,
    document::{Document, DEFAULT_PAGE_DELIMITER},
    embeddings::create_embedder,
    indexer::TreeIndexer,
    llm::LlmClient,
    logging,
    navigator::Navigator,
    persistence::FileGraph,
    search::{SearchEngine, SearchOptions},
    splitter::SplitStrategy,
    store::TreeStore,
    summarizer::LlmSummarizer,
    tree::{NodeId, NodeStatus, TreeNode},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Page Tree Graph - hierarchical document summaries with graph storage
#[derive(Parser)]
#[command(name = "page-tree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the stored document graphs (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split, summarize, embed and store a document
    Index {
        /// Path to the document text file; pages are separated by form feeds
        document: PathBuf,

        /// Document id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,

        /// Document title (defaults to the file stem)
        #[arg(long)]
        title: Option<String>,

        /// Page delimiter in the text file
        #[arg(long, default_value = DEFAULT_PAGE_DELIMITER)]
        delimiter: String,

        /// Maximum pages per leaf
        #[arg(short = 'm', long)]
        max_chunk_size: Option<usize>,

        /// Split strategy: bisect, midpoint, fixed or fixed:N
        #[arg(long)]
        strategy: Option<SplitStrategy>,

        /// Maximum concurrent model calls
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Give up after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Similarity search over leaf summaries
    Search {
        /// The search query
        query: String,

        /// Restrict to one document
        #[arg(short, long)]
        document: Option<String>,

        /// Number of results to return
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,

        /// Minimum cosine similarity
        #[arg(short, long, default_value_t = 0.0)]
        threshold: f32,

        /// Skip leaves flagged as degraded
        #[arg(long)]
        exclude_degraded: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display the tree of a stored document
    Show {
        /// Document id
        document: String,

        /// Output as JSON instead of formatted tree
        #[arg(long)]
        json: bool,

        /// Print the nested outline with longer summaries
        #[arg(long)]
        outline: bool,
    },

    /// Show statistics for one document, or for every stored document
    Info {
        /// Document id
        document: Option<String>,
    },

    /// Show where a node sits: its ancestor chain and siblings
    Context {
        /// Node id
        node: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find sections related to a node
    Related {
        /// Node id
        node: String,

        /// Number of sections to return
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// List stored documents
    List,

    /// Delete a stored document
    Delete {
        /// Document id
        document: String,
    },

    /// Test LLM connection
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        logging::init_with_default("debug");
    } else {
        logging::init_tracing();
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }

    match cli.command {
        Commands::Index {
            document,
            id,
            title,
            delimiter,
            max_chunk_size,
            strategy,
            concurrency,
            deadline_secs,
        } => {
            if let Some(size) = max_chunk_size {
                config.ingest.max_chunk_size = size;
            }
            if let Some(strategy) = strategy {
                config.ingest.strategy = strategy;
            }
            if let Some(concurrency) = concurrency {
                config.ingest.concurrency = concurrency;
            }
            if deadline_secs.is_some() {
                config.ingest.deadline_secs = deadline_secs;
            }
            cmd_index(config, document, id, title, delimiter).await
        }
        Commands::Search {
            query,
            document,
            top_k,
            threshold,
            exclude_degraded,
            json,
        } => {
            let mut options = SearchOptions::new(top_k).with_threshold(threshold);
            if let Some(document) = document {
                options = options.in_document(document);
            }
            if exclude_degraded {
                options = options.excluding_degraded();
            }
            cmd_search(config, query, options, json).await
        }
        Commands::Show {
            document,
            json,
            outline,
        } => cmd_show(config, document, json, outline).await,
        Commands::Info { document } => cmd_info(config, document).await,
        Commands::Context { node, json } => cmd_context(config, NodeId::from(node), json).await,
        Commands::Related { node, top_k } => {
            cmd_related(config, NodeId::from(node), top_k).await
        }
        Commands::List => cmd_list(config).await,
        Commands::Delete { document } => cmd_delete(config, document).await,
        Commands::Test => cmd_test(config).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<TreeStore>> {
    let graph = FileGraph::open(&config.store.data_dir, config.store.format)
        .await
        .with_context(|| {
            format!(
                "Failed to open data directory '{}'",
                config.store.data_dir.display()
            )
        })?;
    Ok(Arc::new(TreeStore::new(Arc::new(graph))))
}

fn short_line(node: &TreeNode, max: usize) -> String {
    let summary: String = node.summary_text().chars().take(max).collect();
    let flag = if node.status == NodeStatus::Degraded {
        " [degraded]"
    } else {
        ""
    };
    format!("{} ({}){}: {}", node.range, node.id, flag, summary)
}

async fn cmd_index(
    config: Config,
    document_path: PathBuf,
    id: Option<String>,
    title: Option<String>,
    delimiter: String,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let document = Document::from_text_file_with_delimiter(&document_path, &delimiter)
        .context("Failed to load document")?;
    let id = id.unwrap_or_else(|| document.name.clone());
    let title = title.unwrap_or_else(|| document.name.clone());
    let total_pages = document.page_count();

    println!("Indexing document: {}", document_path.display());
    println!("  Id:          {}", id);
    println!("  Pages:       {}", total_pages);
    println!("  Chunk size:  {}", config.ingest.max_chunk_size);
    println!("  Model:       {}", config.llm.model);

    let store = open_store(&config).await?;
    let summarizer = Arc::new(LlmSummarizer::new(LlmClient::new(config.llm.clone())));
    let embedder = create_embedder(&config.embedding).context("Failed to create embedder")?;
    let indexer = TreeIndexer::new(summarizer, embedder, store);

    let report = indexer
        .ingest(&id, &title, total_pages, Arc::new(document), &config.ingest)
        .await
        .context("Failed to build document tree")?;

    println!("\nTree Built:");
    println!("  Nodes:       {}", report.stats.total_nodes);
    println!("  Leaves:      {}", report.stats.leaf_nodes);
    println!("  Depth:       {}", report.stats.max_depth);
    println!("  Degraded:    {}", report.stats.degraded_nodes);
    println!("  Embedded:    {}", report.stats.leaves_with_embeddings);
    println!("  Build time:  {:.2?}", report.elapsed);
    println!("  Root node:   {}", report.document.root);

    Ok(())
}

async fn cmd_search(config: Config, query: String, options: SearchOptions, json: bool) -> Result<()> {
    config
        .validate_embedding()
        .context("Invalid embedding configuration")?;

    let store = open_store(&config).await?;
    let embedder = create_embedder(&config.embedding).context("Failed to create embedder")?;
    let engine = SearchEngine::new(store);

    let start = Instant::now();
    let hits = engine
        .search_text(&query, embedder.as_ref(), &options)
        .await
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    println!("Searching for: \"{}\"\n", query);
    if hits.is_empty() {
        println!("No matching sections found.");
        return Ok(());
    }

    println!("Results:");
    println!("{}", "─".repeat(60));
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. [{}] {} score {:.3}",
            i + 1,
            hit.document_id,
            hit.range,
            hit.score
        );
        println!("    Node: {}", hit.node_id);
        println!("    {}", hit.preview(200));
        println!();
    }
    println!("{}", "─".repeat(60));
    println!("Found {} results in {:.2?}", hits.len(), start.elapsed());

    Ok(())
}

async fn cmd_show(config: Config, document_id: String, json: bool, outline: bool) -> Result<()> {
    let store = open_store(&config).await?;

    if outline {
        let outline = Navigator::new(store)
            .outline(&document_id)
            .await
            .context("Failed to load document tree")?;
        if json {
            println!("{}", serde_json::to_string_pretty(&outline)?);
        } else {
            print!("{}", outline.render(120));
        }
        return Ok(());
    }

    let tree = store
        .load(&document_id)
        .await
        .context("Failed to load document tree")?;
    if json {
        println!("{}", tree.to_json().context("Failed to serialize tree")?);
    } else {
        println!("{}", tree.format());
    }

    Ok(())
}

async fn cmd_info(config: Config, document_id: Option<String>) -> Result<()> {
    let store = open_store(&config).await?;

    let ids = match document_id {
        Some(id) => vec![id],
        None => store
            .list_documents()
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect(),
    };

    println!("Data directory: {}", config.store.data_dir.display());
    if ids.is_empty() {
        println!("No documents stored.");
    }
    for id in ids {
        let stats = store
            .stats(&id)
            .await
            .with_context(|| format!("Failed to load '{}'", id))?;
        println!();
        println!("{}", "─".repeat(40));
        println!("  Document:     {} [{}]", stats.title, stats.document_id);
        println!("  Total pages:  {}", stats.total_pages);
        println!("  Nodes:        {}", stats.tree.total_nodes);
        println!("  Leaves:       {}", stats.tree.leaf_nodes);
        println!("  Max depth:    {}", stats.tree.max_depth);
        println!(
            "  Summarized:   {}/{}",
            stats.tree.summarized_nodes, stats.tree.total_nodes
        );
        println!(
            "  Embedded:     {}/{}",
            stats.tree.leaves_with_embeddings, stats.tree.leaf_nodes
        );
        println!("  Degraded:     {}", stats.tree.degraded_nodes);
    }

    Ok(())
}

async fn cmd_context(config: Config, node_id: NodeId, json: bool) -> Result<()> {
    let navigator = Navigator::new(open_store(&config).await?);
    let context = navigator
        .context(&node_id)
        .await
        .with_context(|| format!("Failed to resolve node '{}'", node_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&context)?);
        return Ok(());
    }

    println!("Document: {} [{}]", context.title, context.document_id);
    println!("\nPath:");
    for node in &context.breadcrumb {
        println!("{}{}", "  ".repeat(node.level + 1), short_line(node, 80));
    }
    println!("\nSiblings:");
    if context.siblings.is_empty() {
        println!("  (none)");
    }
    for node in &context.siblings {
        println!("  {}", short_line(node, 80));
    }

    Ok(())
}

async fn cmd_related(config: Config, node_id: NodeId, top_k: usize) -> Result<()> {
    let navigator = Navigator::new(open_store(&config).await?);
    let related = navigator
        .related_sections(&node_id, top_k)
        .await
        .with_context(|| format!("Failed to find sections related to '{}'", node_id))?;

    if related.is_empty() {
        println!("No related sections found.");
    }
    for (i, section) in related.iter().enumerate() {
        let score = section
            .score
            .map(|s| format!(" score {:.3}", s))
            .unwrap_or_default();
        println!("{:>2}. {}{}", i + 1, short_line(&section.node, 100), score);
    }

    Ok(())
}

async fn cmd_list(config: Config) -> Result<()> {
    let store = open_store(&config).await?;
    let documents = store.list_documents().await?;

    if documents.is_empty() {
        println!("No documents stored in {}", config.store.data_dir.display());
        return Ok(());
    }
    for document in documents {
        println!(
            "{:<24} {:>6} pages  {}",
            document.id, document.total_pages, document.title
        );
    }

    Ok(())
}

async fn cmd_delete(config: Config, document_id: String) -> Result<()> {
    let store = open_store(&config).await?;
    if store.delete(&document_id).await? {
        println!("Deleted '{}'", document_id);
    } else {
        anyhow::bail!("Document '{}' not found", document_id);
    }
    Ok(())
}

async fn cmd_test(config: Config) -> Result<()> {
    println!("Testing LLM connection...\n");

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => {
            println!("Connection successful!");
        }
        Err(e) => {
            println!("Connection failed: {}", e);
        }
    }

    Ok(())
}
