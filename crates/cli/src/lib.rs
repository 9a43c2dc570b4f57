use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_model::{DocumentId, NormalizedPoint, PageKey, PixelPoint, Rgb, SessionAction, Tool};
use pdf_engine::{default_engine, OpenSource, PdfEngine};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use stitch_core::{
    preview_position, EditOutcome, PointerEvent, PointerPhase, StitchConfig, SurfaceId,
    TextInputEvent, Workspace,
};
use stitch_render::FontBook;
use stitch_storage::Storage;

/// Environment variable naming the workspace directory when `--workspace` is absent.
pub const WORKSPACE_VAR: &str = "PAGESTITCH_WORKSPACE";

const DEFAULT_LOG_FILTER: &str = "warn,stitch_core=info,stitch_cli=info";

#[derive(Debug, Parser)]
#[command(name = "pagestitch")]
#[command(about = "Stitch annotated pages from several PDFs into one document")]
pub struct Cli {
    /// Directory holding the persisted session.
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Add PDF files to the session.
    Import {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
    /// List open documents.
    Docs,
    /// Close a document, dropping its selected pages and annotations.
    Close {
        #[arg(value_name = "DOC")]
        document: u64,
    },
    /// Append a page to the export list.
    AddPage {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(value_name = "PAGE")]
        page: u32,
    },
    /// Select a page, or unselect it if it is already selected.
    TogglePage {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(value_name = "PAGE")]
        page: u32,
    },
    /// Remove an entry of the export list (1-based position).
    RemovePage {
        #[arg(value_name = "INDEX")]
        index: usize,
    },
    /// Move an entry of the export list (1-based positions).
    MovePage {
        #[arg(value_name = "FROM")]
        from: usize,
        #[arg(value_name = "TO")]
        to: usize,
    },
    /// Print the export list.
    List,
    /// Set the ink colour used for new annotations.
    Color {
        #[arg(value_name = "HEX", value_parser = parse_color)]
        color: Rgb,
    },
    /// Draw a freehand stroke through page-fraction points such as `0.1,0.2`.
    Draw {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(value_name = "PAGE")]
        page: u32,
        #[arg(value_name = "X,Y", required = true, value_parser = parse_point)]
        points: Vec<NormalizedPoint>,
    },
    /// Erase annotations near a page-fraction position.
    Erase {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(value_name = "PAGE")]
        page: u32,
        #[arg(value_name = "X,Y", value_parser = parse_point)]
        at: NormalizedPoint,
    },
    /// Place a text label with its top-left corner at page fractions X, Y.
    AnnotateText {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(value_name = "PAGE")]
        page: u32,
        #[arg(value_name = "X", value_parser = parse_fraction)]
        x: f64,
        #[arg(value_name = "Y", value_parser = parse_fraction)]
        y: f64,
        #[arg(value_name = "TEXT")]
        text: String,
    },
    /// Remove the annotations of a document, or of one of its pages.
    ClearAnnotations {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Write a page's annotation layer as a transparent PNG.
    RenderLayer {
        #[arg(value_name = "DOC")]
        document: u64,
        #[arg(value_name = "PAGE")]
        page: u32,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        scale: Option<f32>,
    },
    /// Place the hover preview of an export-list entry (1-based position).
    Preview {
        #[arg(value_name = "INDEX")]
        index: usize,
        /// Pointer position in viewport pixels.
        #[arg(long, value_name = "X,Y", value_parser = parse_pixel_point)]
        pointer: PixelPoint,
        #[arg(long, value_name = "PX")]
        viewport_height: f64,
        /// Also write the preview's annotation layer as a PNG.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Build the stitched PDF from the export list.
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Forget every document and annotation.
    Reset,
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    page_sizes_pt: Vec<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct DocOutput<'a> {
    id: u64,
    name: &'a str,
    page_count: u32,
    current: bool,
}

#[derive(Debug, Serialize)]
struct PreviewOutput {
    x: f64,
    y: f64,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct SelectionOutput<'a> {
    position: usize,
    document: u64,
    page: u32,
    name: &'a str,
    annotations: usize,
}

/// Installs the stderr log subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry().with(filter).with(stderr_layer).try_init();
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut workspace = open_workspace(cli.workspace)?;
            let outcome = run_session_command(&mut workspace, command);
            let flushed = workspace.flush().context("failed to persist session");
            outcome.and(flushed)
        }
    }
}

fn open_workspace(dir: Option<PathBuf>) -> Result<Workspace> {
    let storage = match dir.or_else(|| std::env::var_os(WORKSPACE_VAR).map(PathBuf::from)) {
        Some(dir) => Storage::with_root(dir),
        None => Storage::from_default_project().context("failed to locate workspace directory")?,
    };
    let config = StitchConfig::from_env().context("invalid configuration")?;
    tracing::debug!(root = %storage.root().display(), "opening workspace");

    Ok(Workspace::open(storage, config, FontBook::system()))
}

fn run_session_command(ws: &mut Workspace, command: Commands) -> Result<()> {
    match command {
        Commands::Import { files } => run_import(ws, &files),
        Commands::Docs => print_docs(ws),
        Commands::Close { document } => {
            ensure_document(ws, document)?;
            ws.apply(SessionAction::CloseDocument { document_id: DocumentId(document) });
            println!("closed {document}");
            Ok(())
        }
        Commands::AddPage { document, page } => {
            ensure_page(ws, document, page)?;
            ws.apply(SessionAction::AddPage {
                document_id: DocumentId(document),
                page_number: page,
            });
            println!("selected {}", ws.state().selected_pages.len());
            Ok(())
        }
        Commands::TogglePage { document, page } => {
            ensure_page(ws, document, page)?;
            ws.apply(SessionAction::TogglePage {
                document_id: DocumentId(document),
                page_number: page,
            });
            let selected = ws.state().is_page_selected(DocumentId(document), page);
            println!("{}", if selected { "added" } else { "removed" });
            Ok(())
        }
        Commands::RemovePage { index } => {
            let index = selection_index(ws, index)?;
            ws.apply(SessionAction::RemoveSelection { index });
            Ok(())
        }
        Commands::MovePage { from, to } => {
            let from = selection_index(ws, from)?;
            let to = selection_index(ws, to)?;
            ws.apply(SessionAction::MoveSelection { from, to });
            Ok(())
        }
        Commands::List => print_selection(ws),
        Commands::Color { color } => {
            ws.set_color(color);
            Ok(())
        }
        Commands::Draw { document, page, points } => run_draw(ws, document, page, &points),
        Commands::Erase { document, page, at } => run_erase(ws, document, page, at),
        Commands::AnnotateText { document, page, x, y, text } => {
            run_annotate_text(ws, document, page, NormalizedPoint::new(x, y), &text)
        }
        Commands::ClearAnnotations { document, page } => {
            ensure_document(ws, document)?;
            let document_id = DocumentId(document);
            let action = match page {
                Some(page) => {
                    ensure_page(ws, document, page)?;
                    SessionAction::ClearPageAnnotations { key: PageKey::new(document_id, page) }
                }
                None => SessionAction::ClearDocumentAnnotations { document_id },
            };
            let removed = ws.apply(action);
            println!("{}", if removed { "cleared" } else { "nothing to clear" });
            Ok(())
        }
        Commands::RenderLayer { document, page, output, scale } => {
            let scale = scale.unwrap_or(ws.config().export_scale);
            let image = ws
                .render_layer(PageKey::new(DocumentId(document), page), scale)
                .context("failed to render annotation layer")?;
            write_parent_dirs(&output)?;
            image
                .save(&output)
                .with_context(|| format!("failed to write image to {}", output.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Commands::Preview { index, pointer, viewport_height, output } => {
            run_preview(ws, index, pointer, viewport_height, output.as_deref())
        }
        Commands::Export { output } => {
            let exported = ws.export().context("export failed")?;
            let output = output.unwrap_or_else(|| PathBuf::from(&exported.file_name));
            write_parent_dirs(&output)?;
            fs::write(&output, &exported.bytes)
                .with_context(|| format!("failed to write {}", output.display()))?;
            tracing::info!(pages = exported.page_count, path = %output.display(), "exported");
            println!("{}", output.display());
            Ok(())
        }
        Commands::Reset => {
            ws.reset().context("failed to reset session")?;
            println!("reset");
            Ok(())
        }
        Commands::Info { .. } | Commands::Version => Ok(()),
    }
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_sizes_pt = engine
        .page_sizes(handle)?
        .iter()
        .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt })
        .collect();
    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: engine.page_count(handle)?,
        page_sizes_pt,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close(handle)?;

    Ok(())
}

fn run_import(ws: &mut Workspace, files: &[PathBuf]) -> Result<()> {
    let mut batch = Vec::with_capacity(files.len());
    for file in files {
        ensure_pdf_exists(file)?;
        let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        batch.push((name, bytes));
    }

    let report = ws.ingest(batch);
    for (name, id) in report.added() {
        println!("added {} {name}", id.0);
    }

    let failed: Vec<String> =
        report.failed().map(|(name, err)| format!("{name}: {err}")).collect();
    if !failed.is_empty() {
        anyhow::bail!("failed to import {}", failed.join("; "));
    }

    Ok(())
}

fn print_docs(ws: &Workspace) -> Result<()> {
    let state = ws.state();
    let docs: Vec<DocOutput<'_>> = state
        .docs
        .iter()
        .map(|doc| DocOutput {
            id: doc.id.0,
            name: &doc.name,
            page_count: doc.page_count,
            current: state.current_doc_id == Some(doc.id),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&docs)?);
    Ok(())
}

fn print_selection(ws: &Workspace) -> Result<()> {
    let state = ws.state();
    let pages: Vec<SelectionOutput<'_>> = state
        .selected_pages
        .iter()
        .enumerate()
        .map(|(index, page)| SelectionOutput {
            position: index + 1,
            document: page.document_id.0,
            page: page.page_number,
            name: &page.display_name,
            annotations: state.drawings.page(page.page_key()).len(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&pages)?);
    Ok(())
}

fn run_draw(
    ws: &mut Workspace,
    document: u64,
    page: u32,
    points: &[NormalizedPoint],
) -> Result<()> {
    let (first, rest) = points.split_first().context("a stroke needs at least one point")?;
    let surface = ws.open_canvas(DocumentId(document), page)?;

    let outcome = with_tool(ws, Tool::Draw, |ws| {
        let last = rest.last().unwrap_or(first);
        let phases = std::iter::once((PointerPhase::Down, first))
            .chain(rest.iter().map(|point| (PointerPhase::Move, point)))
            .chain(std::iter::once((PointerPhase::Up, last)));

        let mut outcome = EditOutcome::Ignored;
        for (phase, point) in phases {
            let event = canvas_event(ws, surface, phase, *point)?;
            outcome = ws.handle_pointer(surface, event)?;
        }
        Ok(outcome)
    })?;

    ws.close_canvas(surface);
    anyhow::ensure!(outcome == EditOutcome::Committed, "stroke was not committed");
    println!("committed");
    Ok(())
}

fn run_erase(ws: &mut Workspace, document: u64, page: u32, at: NormalizedPoint) -> Result<()> {
    let surface = ws.open_canvas(DocumentId(document), page)?;

    let outcome = with_tool(ws, Tool::Erase, |ws| {
        let down = canvas_event(ws, surface, PointerPhase::Down, at)?;
        let outcome = ws.handle_pointer(surface, down)?;
        let up = canvas_event(ws, surface, PointerPhase::Up, at)?;
        ws.handle_pointer(surface, up)?;
        Ok(outcome)
    })?;

    ws.close_canvas(surface);
    println!("{}", if outcome == EditOutcome::Erased { "erased" } else { "nothing to erase" });
    Ok(())
}

fn run_annotate_text(
    ws: &mut Workspace,
    document: u64,
    page: u32,
    at: NormalizedPoint,
    text: &str,
) -> Result<()> {
    let surface = ws.open_canvas(DocumentId(document), page)?;

    let outcome = with_tool(ws, Tool::Text, |ws| {
        let down = canvas_event(ws, surface, PointerPhase::Down, at)?;
        ws.handle_pointer(surface, down)?;
        Ok(ws.text_event(surface, TextInputEvent::Enter { shift: false }, text)?)
    })?;

    ws.close_canvas(surface);
    anyhow::ensure!(outcome == EditOutcome::Committed, "text is empty, nothing was placed");
    println!("committed");
    Ok(())
}

fn run_preview(
    ws: &Workspace,
    position: usize,
    pointer: PixelPoint,
    viewport_height: f64,
    output: Option<&Path>,
) -> Result<()> {
    let index = selection_index(ws, position)?;
    let layer = ws.preview_layer(index).context("failed to render preview layer")?;
    if let Some(output) = output {
        write_parent_dirs(output)?;
        layer
            .save(output)
            .with_context(|| format!("failed to write image to {}", output.display()))?;
    }

    let at = preview_position(pointer, viewport_height);
    let payload =
        PreviewOutput { x: at.x, y: at.y, width: layer.width(), height: layer.height() };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Runs `f` with `tool` active, restoring the session's tool afterwards.
fn with_tool<T>(
    ws: &mut Workspace,
    tool: Tool,
    f: impl FnOnce(&mut Workspace) -> Result<T>,
) -> Result<T> {
    let previous = ws.state().tool;
    if previous != Some(tool) {
        ws.set_tool(Some(tool));
    }

    let result = f(ws);

    if ws.state().tool != previous {
        ws.set_tool(previous);
    }
    result
}

fn canvas_event(
    ws: &Workspace,
    surface: SurfaceId,
    phase: PointerPhase,
    point: NormalizedPoint,
) -> Result<PointerEvent> {
    let canvas = ws.canvas(surface).context("canvas was closed")?;
    let position = point.to_pixels(canvas.size());
    Ok(PointerEvent::new(phase, position.x, position.y))
}

fn ensure_document(ws: &Workspace, document: u64) -> Result<()> {
    if ws.state().document(DocumentId(document)).is_none() {
        anyhow::bail!("document {document} is not open");
    }
    Ok(())
}

fn ensure_page(ws: &Workspace, document: u64, page: u32) -> Result<()> {
    ensure_document(ws, document)?;
    let page_count = ws.state().document(DocumentId(document)).map_or(0, |doc| doc.page_count);
    if page == 0 || page > page_count {
        anyhow::bail!("page {page} out of range for document {document} (page_count={page_count})");
    }
    Ok(())
}

fn selection_index(ws: &Workspace, position: usize) -> Result<usize> {
    let len = ws.state().selected_pages.len();
    if position == 0 || position > len {
        anyhow::bail!("position {position} out of range (selected={len})");
    }
    Ok(position - 1)
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn write_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn parse_color(value: &str) -> Result<Rgb, String> {
    value.parse().map_err(|err: doc_model::ColorParseError| err.to_string())
}

fn parse_fraction(value: &str) -> Result<f64, String> {
    let parsed: f64 = value.trim().parse().map_err(|_| format!("{value:?} is not a number"))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(format!("{value} is not a page fraction between 0 and 1"));
    }
    Ok(parsed)
}

fn parse_point(value: &str) -> Result<NormalizedPoint, String> {
    let (x, y) = value.split_once(',').ok_or_else(|| format!("{value:?} is not an X,Y pair"))?;
    Ok(NormalizedPoint::new(parse_fraction(x)?, parse_fraction(y)?))
}

fn parse_pixel_point(value: &str) -> Result<PixelPoint, String> {
    let (x, y) = value.split_once(',').ok_or_else(|| format!("{value:?} is not an X,Y pair"))?;
    let coordinate = |part: &str| {
        part.trim().parse::<f64>().map_err(|_| format!("{part:?} is not a number"))
    };
    Ok(PixelPoint::new(coordinate(x)?, coordinate(y)?))
}
