//! munje command-line tool.
//!
//! Usage:
//!   # Load detected blocks for page 0
//!   munje import-blocks --db labels.db --doc algebra-2 --page 0 blocks-p0.json
//!
//!   # Replay an editing session, then inspect the result
//!   munje run --db labels.db --doc algebra-2 session.json
//!   munje groups --db labels.db --doc algebra-2 --page 0
//!   munje validate --db labels.db --doc algebra-2
//!
//! Logging goes to stderr; set `RUST_LOG` to override the `munje=info` default.

mod script;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use munje_kernel::{
    EditorConfig, EditorHandle, EditorView, PageChangeListener, Services, SessionCollaborator,
    SqliteStore, spawn_editor,
};
use munje_types::{Block, DocumentId, GroupId, ProblemGroup, ProblemInfo, validate_page};

use script::Step;

#[derive(Parser, Debug)]
#[command(name = "munje")]
#[command(about = "Inspect group databases and run scripted labeling sessions")]
struct Args {
    /// Editor config (RON). Defaults to <config dir>/munje/editor.ron when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a page's stored group list as JSON
    Groups {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        doc: String,
        #[arg(long)]
        page: u32,
    },
    /// Check every stored page for broken group invariants
    Validate {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        doc: String,
    },
    /// Load detected blocks for one page from a JSON array
    ImportBlocks {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        doc: String,
        #[arg(long)]
        page: u32,
        file: PathBuf,
    },
    /// Replay a JSON script of editor commands
    Run {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        doc: String,
        /// Page to open first
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Stop at the first failing step
        #[arg(long)]
        strict: bool,
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("munje=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Groups { db, doc, page } => print_groups(&db, &DocumentId::new(doc), page),
        Command::Validate { db, doc } => validate(&db, &DocumentId::new(doc)),
        Command::ImportBlocks {
            db,
            doc,
            page,
            file,
        } => import_blocks(&db, &DocumentId::new(doc), page, &file),
        Command::Run {
            db,
            doc,
            page,
            strict,
            script,
        } => {
            let config = load_config(args.config.as_deref())?;
            run_script(&db, DocumentId::new(doc), page, config, &script, strict).await
        }
    }
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("opening {}", path.display()))
}

fn load_config(explicit: Option<&Path>) -> Result<EditorConfig> {
    if let Some(path) = explicit {
        return EditorConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    match dirs::config_dir().map(|d| d.join("munje").join("editor.ron")) {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "using editor config");
            EditorConfig::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        _ => Ok(EditorConfig::default()),
    }
}

fn print_groups(db: &Path, doc: &DocumentId, page: u32) -> Result<()> {
    let store = open_store(db)?;
    let groups = store.with_db(|g| g.groups(doc, page))?;
    println!("{}", serde_json::to_string_pretty(&groups)?);
    Ok(())
}

fn validate(db: &Path, doc: &DocumentId) -> Result<()> {
    let store = open_store(db)?;
    let pages = store.with_db(|g| g.pages(doc))?;
    let mut broken = 0usize;
    for page in &pages {
        let groups = store.with_db(|g| g.groups(doc, *page))?;
        for violation in validate_page(&groups) {
            println!("page {page}: {violation}");
            broken += 1;
        }
    }
    if broken > 0 {
        bail!("{broken} violation(s) across {} page(s)", pages.len());
    }
    println!("{} page(s) ok", pages.len());
    Ok(())
}

fn import_blocks(db: &Path, doc: &DocumentId, page: u32, file: &Path) -> Result<()> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let blocks: Vec<Block> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
    let store = open_store(db)?;
    store.with_db(|g| g.put_blocks(doc, page, &blocks))?;
    info!(%doc, page, blocks = blocks.len(), "imported blocks");
    Ok(())
}

async fn run_script(
    db: &Path,
    doc: DocumentId,
    page: u32,
    config: EditorConfig,
    path: &Path,
    strict: bool,
) -> Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let steps = script::parse(&text).with_context(|| format!("parsing {}", path.display()))?;

    let store = open_store(db)?;
    let (editor, task) = spawn_editor(doc, services_for(store), config, page)
        .await
        .context("opening editor")?;
    let view = replay(editor, task, steps, strict).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn services_for(store: SqliteStore) -> Services {
    let log = Arc::new(LogSession);
    Services {
        blocks: Arc::new(store.clone()),
        store: Arc::new(store.clone()),
        exporter: Arc::new(store.clone()),
        session: log.clone(),
        settings: Arc::new(store),
        pages: log,
    }
}

/// Apply `steps` in order, then close the editor. With `strict` the first
/// failing step ends the run, still after the editor has flushed and closed.
async fn replay(
    editor: EditorHandle,
    task: JoinHandle<()>,
    steps: Vec<Step>,
    strict: bool,
) -> Result<EditorView> {
    let mut failed = 0usize;
    let mut aborted = None;
    for (i, step) in steps.into_iter().enumerate() {
        match script::apply(&editor, step).await {
            Ok(serde_json::Value::Null) => {}
            Ok(out) => println!("step {i}: {out}"),
            Err(e) if strict => {
                aborted = Some(format!("step {i} failed: {e}"));
                break;
            }
            Err(e) => {
                warn!(step = i, error = %e, "step failed");
                failed += 1;
            }
        }
    }

    let view = editor.view().await;
    let closed = editor.close().await;
    task.await.context("editor task panicked")?;
    if let Some(reason) = aborted {
        if let Err(e) = closed {
            warn!(error = %e, "closing editor after failed step");
        }
        bail!(reason);
    }
    closed?;
    if failed > 0 {
        warn!(failed, "script finished with failures");
    }
    Ok(view?)
}

/// Session sink that logs what the editor reports.
struct LogSession;

impl SessionCollaborator for LogSession {
    fn on_group_created(&self, group: &ProblemGroup, page: u32) {
        info!(group = %group.id, page, "session: group created");
    }

    fn on_group_deleted(&self, group_id: &GroupId, page: u32) {
        info!(group = %group_id, page, "session: group deleted");
    }

    fn on_group_updated(&self, group_id: &GroupId, info: &ProblemInfo, page: u32) {
        info!(group = %group_id, page, label = %info.display_name, "session: group updated");
    }
}

impl PageChangeListener for LogSession {
    fn on_page_changed(&self, doc: &DocumentId, from: u32, to: u32) {
        info!(%doc, from, to, "page changed");
    }
}
