//! The explicit session context.
//!
//! A [`Workspace`] owns the session state, the parsed source documents, the
//! live canvases and the persistence writer. Hosts drive it with commands and
//! pointer events; every mutation is followed by a snapshot to storage.

use crate::compositor::{ExportCompositor, ExportError, ExportedPdf, SourceDocuments};
use crate::config::StitchConfig;
use crate::editor::{
    AnnotationEditor, EditOutcome, LiveCanvas, PointerEvent, SurfaceId, TextInputEvent,
};
use crate::preview::preview_size;
use crate::writer::{SessionSnapshot, SessionWriter, WriterError};
use doc_model::{
    apply_session_action, DocumentId, PageKey, PageSize, RasterSize, Rgb, SessionAction,
    SessionState, Tool,
};
use pdf_engine::lopdf::Document;
use pdf_engine::{DocumentHandle, LopdfEngine, OpenSource, PdfEngine, PdfEngineError};
use std::collections::HashMap;
use stitch_render::{to_rgba_image, AnnotationRenderer, FontBook, RenderError};
use stitch_storage::{FilesRecord, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("document {0} is not open")]
    UnknownDocument(u64),
    #[error("page {page} out of range for document {document} (page_count={page_count})")]
    PageOutOfRange { document: u64, page: u32, page_count: u32 },
    #[error("selection index {index} out of range (selected={len})")]
    SelectionOutOfRange { index: usize, len: usize },
    #[error("no canvas with id {0}")]
    UnknownSurface(u64),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Result of ingesting one file.
#[derive(Debug)]
pub struct IngestOutcome {
    pub name: String,
    pub result: Result<DocumentId, PdfEngineError>,
}

/// Per-file results of one ingestion batch, in input order.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestReport {
    pub fn added(&self) -> impl Iterator<Item = (&str, DocumentId)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|outcome| {
                outcome.result.as_ref().ok().map(|id| (outcome.name.as_str(), *id))
            })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &PdfEngineError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|outcome| {
                outcome.result.as_ref().err().map(|err| (outcome.name.as_str(), err))
            })
    }
}

struct OpenDocuments<'a> {
    engine: &'a LopdfEngine,
    handles: &'a HashMap<DocumentId, DocumentHandle>,
}

impl SourceDocuments for OpenDocuments<'_> {
    fn source(&self, id: DocumentId) -> Option<&Document> {
        let handle = self.handles.get(&id)?;
        self.engine.document(*handle).ok()
    }
}

pub struct Workspace {
    config: StitchConfig,
    storage: Storage,
    writer: SessionWriter,
    state: SessionState,
    files: FilesRecord,
    engine: LopdfEngine,
    handles: HashMap<DocumentId, DocumentHandle>,
    renderer: AnnotationRenderer,
    editor: AnnotationEditor,
    compositor: ExportCompositor,
    canvases: HashMap<SurfaceId, LiveCanvas>,
    next_surface: u64,
}

impl Workspace {
    /// Restores the session persisted in `storage`.
    ///
    /// A session that cannot be fully restored is discarded and the workspace
    /// starts empty.
    pub fn open(storage: Storage, config: StitchConfig, fonts: FontBook) -> Self {
        let renderer = AnnotationRenderer::new(fonts).with_stroke_width(config.stroke_width);
        let compositor = ExportCompositor::new(
            renderer.clone(),
            config.export_scale,
            config.output_file_name.clone(),
        );
        let editor = AnnotationEditor::new(config.erase_threshold, config.text_size);

        let mut workspace = Self {
            writer: SessionWriter::spawn(storage.clone()),
            storage,
            config,
            state: SessionState::default(),
            files: FilesRecord::new(),
            engine: LopdfEngine::new(),
            handles: HashMap::new(),
            renderer,
            editor,
            compositor,
            canvases: HashMap::new(),
            next_surface: 0,
        };

        workspace.state = workspace.fresh_state();
        if let Err(reason) = workspace.restore() {
            tracing::warn!(%reason, "discarding unrestorable session");
            workspace.engine = LopdfEngine::new();
            workspace.handles.clear();
            workspace.state = workspace.fresh_state();
            workspace.files = FilesRecord::new();
        }
        workspace.sync_editor();
        workspace
    }

    fn restore(&mut self) -> Result<(), String> {
        let Some(state) = self.storage.load_state().map_err(|err| err.to_string())? else {
            return Ok(());
        };
        let mut files =
            self.storage.load_files().map_err(|err| err.to_string())?.unwrap_or_default();

        for doc in &state.docs {
            let bytes = files
                .get(doc.id)
                .ok_or_else(|| format!("bytes of document {} are missing", doc.id.0))?;
            let handle = self
                .engine
                .open(OpenSource::Bytes(bytes.to_vec()))
                .map_err(|err| format!("document {} no longer parses: {err}", doc.id.0))?;
            self.handles.insert(doc.id, handle);
        }

        let stray: Vec<DocumentId> =
            files.ids().filter(|id| state.document(*id).is_none()).collect();
        for id in stray {
            files.remove(id);
        }

        tracing::info!(
            docs = state.docs.len(),
            pages = state.selected_pages.len(),
            "session restored"
        );
        self.state = state;
        self.files = files;
        Ok(())
    }

    fn fresh_state(&self) -> SessionState {
        let mut state = SessionState::default();
        state.color = self.config.stroke_color;
        state
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    pub fn editor(&self) -> &AnnotationEditor {
        &self.editor
    }

    pub fn renderer(&self) -> &AnnotationRenderer {
        &self.renderer
    }

    pub fn document_bytes(&self, id: DocumentId) -> Option<&[u8]> {
        self.files.get(id)
    }

    /// Decodes each file and adds every readable one as a document. Failures
    /// are reported per file and never affect the rest of the batch.
    pub fn ingest(&mut self, files: Vec<(String, Vec<u8>)>) -> IngestReport {
        let mut report = IngestReport::default();

        for (name, bytes) in files {
            let result = self.add_document(&name, bytes);
            match &result {
                Ok(id) => tracing::info!(name = %name, id = id.0, "document added"),
                Err(err) => tracing::warn!(name = %name, %err, "document rejected"),
            }
            report.outcomes.push(IngestOutcome { name, result });
        }

        if report.added().next().is_some() {
            self.persist(true);
        }
        report
    }

    fn add_document(&mut self, name: &str, bytes: Vec<u8>) -> Result<DocumentId, PdfEngineError> {
        let handle = self.engine.open(OpenSource::Bytes(bytes.clone()))?;
        let page_sizes: Vec<PageSize> = self
            .engine
            .page_sizes(handle)?
            .iter()
            .map(|size| PageSize { width_pt: size.width_pt, height_pt: size.height_pt })
            .collect();

        let id = self.state.new_document_id();
        apply_session_action(
            &mut self.state,
            SessionAction::AddDocument { id, name: name.to_owned(), page_sizes },
        );
        self.handles.insert(id, handle);
        self.files.insert(id, bytes);
        Ok(id)
    }

    /// Applies a command, keeps canvases and the editor in step, and persists
    /// when the session changed.
    pub fn apply(&mut self, action: SessionAction) -> bool {
        let closed = match &action {
            SessionAction::CloseDocument { document_id } => Some(*document_id),
            _ => None,
        };
        let reshapes_canvases = matches!(
            action,
            SessionAction::CloseDocument { .. }
                | SessionAction::ChangeZoom { .. }
                | SessionAction::ClearPageAnnotations { .. }
                | SessionAction::ClearDocumentAnnotations { .. }
        );

        let changed = apply_session_action(&mut self.state, action);
        if !changed {
            return false;
        }

        if let Some(id) = closed {
            self.files.remove(id);
            if let Some(handle) = self.handles.remove(&id) {
                if let Err(err) = self.engine.close(handle) {
                    tracing::debug!(%err, "engine did not know the closed document");
                }
            }
        }

        self.sync_editor();
        if reshapes_canvases {
            self.sync_canvases();
        }
        self.persist(closed.is_some());
        true
    }

    pub fn set_tool(&mut self, tool: Option<Tool>) -> bool {
        self.apply(SessionAction::SetTool { tool })
    }

    pub fn set_color(&mut self, color: Rgb) -> bool {
        self.apply(SessionAction::SetColor { color })
    }

    /// Opens a live canvas for a page at the current zoom, painted with the
    /// page's annotations.
    pub fn open_canvas(
        &mut self,
        document_id: DocumentId,
        page_number: u32,
    ) -> WorkspaceResult<SurfaceId> {
        let key = self.checked_page(document_id, page_number)?;
        self.next_surface += 1;
        let id = SurfaceId(self.next_surface);

        let mut canvas = LiveCanvas::new(id, key, self.canvas_size(key))?;
        self.renderer.repaint(canvas.pixmap_mut(), self.state.drawings.page(key));
        self.canvases.insert(id, canvas);
        Ok(id)
    }

    pub fn canvas(&self, id: SurfaceId) -> Option<&LiveCanvas> {
        self.canvases.get(&id)
    }

    pub fn close_canvas(&mut self, id: SurfaceId) -> bool {
        self.editor.cancel_gesture(id);
        self.canvases.remove(&id).is_some()
    }

    /// Routes a pointer event to the editor and persists committed edits.
    pub fn handle_pointer(
        &mut self,
        surface: SurfaceId,
        event: PointerEvent,
    ) -> WorkspaceResult<EditOutcome> {
        let canvas =
            self.canvases.get_mut(&surface).ok_or(WorkspaceError::UnknownSurface(surface.0))?;
        let outcome =
            self.editor.handle_pointer(canvas, &mut self.state.drawings, &self.renderer, event);
        self.after_edit(surface, outcome);
        Ok(outcome)
    }

    /// Routes an event of the inline text prompt to the editor.
    pub fn text_event(
        &mut self,
        surface: SurfaceId,
        event: TextInputEvent,
        content: &str,
    ) -> WorkspaceResult<EditOutcome> {
        let canvas =
            self.canvases.get_mut(&surface).ok_or(WorkspaceError::UnknownSurface(surface.0))?;
        let outcome = self.editor.text_event(
            canvas,
            &mut self.state.drawings,
            &self.renderer,
            event,
            content,
        );
        self.after_edit(surface, outcome);
        Ok(outcome)
    }

    fn after_edit(&mut self, surface: SurfaceId, outcome: EditOutcome) {
        if !outcome.mutated() {
            return;
        }
        if let Some(key) = self.canvases.get(&surface).map(LiveCanvas::key) {
            self.repaint_page(key, Some(surface));
        }
        self.persist(false);
    }

    /// Renders one page's annotations as an RGBA layer of `page × scale` pixels.
    pub fn render_layer(&self, key: PageKey, scale: f32) -> WorkspaceResult<image::RgbaImage> {
        let key = self.checked_page(key.document_id, key.page_number)?;
        let layer = self.renderer.render_layer(
            self.state.drawings.page(key),
            self.page_raster(key),
            scale,
        )?;
        Ok(to_rgba_image(&layer))
    }

    /// Annotation layer of a selected page at hover-preview size.
    pub fn preview_layer(&self, index: usize) -> WorkspaceResult<image::RgbaImage> {
        let len = self.state.selected_pages.len();
        let selected = self
            .state
            .selected_pages
            .get(index)
            .ok_or(WorkspaceError::SelectionOutOfRange { index, len })?;
        let key = selected.page_key();
        let size = self
            .state
            .document(key.document_id)
            .map(|doc| preview_size(doc.page_size(key.page_number)))
            .ok_or(WorkspaceError::UnknownDocument(key.document_id.0))?;

        let layer = self.renderer.render_layer(self.state.drawings.page(key), size, 1.0)?;
        Ok(to_rgba_image(&layer))
    }

    /// Builds the output PDF from the current selection.
    pub fn export(&self) -> WorkspaceResult<ExportedPdf> {
        let sources = OpenDocuments { engine: &self.engine, handles: &self.handles };
        Ok(self.compositor.export(&self.state.selected_pages, &self.state.drawings, &sources)?)
    }

    /// Forgets every document and annotation and removes the persisted records.
    pub fn reset(&mut self) -> WorkspaceResult<()> {
        self.writer.flush()?;
        for handle in self.handles.drain().map(|(_, handle)| handle) {
            let _ = self.engine.close(handle);
        }
        self.state = self.fresh_state();
        self.files = FilesRecord::new();
        self.canvases.clear();
        self.sync_editor();
        self.storage.clear()?;
        tracing::info!("session reset");
        Ok(())
    }

    /// Blocks until every submitted snapshot is on disk.
    pub fn flush(&self) -> WorkspaceResult<()> {
        Ok(self.writer.flush()?)
    }

    fn persist(&self, include_files: bool) {
        self.writer.submit(SessionSnapshot {
            state: self.state.clone(),
            files: include_files.then(|| self.files.clone()),
        });
    }

    fn checked_page(&self, document_id: DocumentId, page_number: u32) -> WorkspaceResult<PageKey> {
        let doc = self
            .state
            .document(document_id)
            .ok_or(WorkspaceError::UnknownDocument(document_id.0))?;
        if page_number == 0 || page_number > doc.page_count {
            return Err(WorkspaceError::PageOutOfRange {
                document: document_id.0,
                page: page_number,
                page_count: doc.page_count,
            });
        }
        Ok(PageKey::new(document_id, page_number))
    }

    fn page_raster(&self, key: PageKey) -> RasterSize {
        let size = self
            .state
            .document(key.document_id)
            .map(|doc| doc.page_size(key.page_number))
            .unwrap_or_default();
        RasterSize::new(f64::from(size.width_pt), f64::from(size.height_pt))
    }

    fn canvas_size(&self, key: PageKey) -> RasterSize {
        let page = self.page_raster(key);
        RasterSize::new(page.width * self.state.zoom, page.height * self.state.zoom)
    }

    fn sync_editor(&mut self) {
        self.editor.set_tool(self.state.tool);
        self.editor.set_color(self.state.color);
    }

    /// Drops canvases of closed documents and rebuilds the rest at the
    /// current zoom from the store.
    ///
    /// Gestures on dropped or resized canvases are cancelled.
    fn sync_canvases(&mut self) {
        let state = &self.state;
        let closed: Vec<SurfaceId> = self
            .canvases
            .values()
            .filter(|canvas| state.document(canvas.key().document_id).is_none())
            .map(LiveCanvas::id)
            .collect();
        for id in closed {
            self.close_canvas(id);
        }

        let ids: Vec<SurfaceId> = self.canvases.keys().copied().collect();
        for id in ids {
            let Some((key, old_size)) =
                self.canvases.get(&id).map(|canvas| (canvas.key(), canvas.size()))
            else {
                continue;
            };
            match LiveCanvas::new(id, key, self.canvas_size(key)) {
                Ok(mut canvas) => {
                    if canvas.size() != old_size {
                        self.editor.cancel_gesture(id);
                    }
                    self.renderer.repaint(canvas.pixmap_mut(), self.state.drawings.page(key));
                    self.canvases.insert(id, canvas);
                }
                Err(err) => {
                    tracing::warn!(%err, "dropping canvas that cannot be resized");
                    self.close_canvas(id);
                }
            }
        }
    }

    /// Repaints every other canvas showing `key`.
    fn repaint_page(&mut self, key: PageKey, except: Option<SurfaceId>) {
        let drawings = self.state.drawings.page(key);
        for (id, canvas) in &mut self.canvases {
            if canvas.key() == key && Some(*id) != except {
                self.renderer.repaint(canvas.pixmap_mut(), drawings);
            }
        }
    }
}
