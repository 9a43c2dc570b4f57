//! Session model for stitching annotated pages out of several source PDFs.
//!
//! Everything here is plain data plus pure state transitions; rendering,
//! PDF access and persistence live in the other workspace crates.

pub mod annotation;
pub mod geometry;
pub mod store;

pub use annotation::{Annotation, ColorParseError, Rgb, StrokeAnnotation, TextAnnotation};
pub use geometry::{distance_point_to_segment, NormalizedPoint, PixelPoint, RasterSize};
pub use store::{AnnotationSet, ApproxTextMeasure, PageKey, TextMeasure, LINE_HEIGHT_FACTOR};

use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f64 = 0.5;
pub const MAX_ZOOM: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SelectionId(pub u64);

/// Unrotated page dimensions in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width_pt: 612.0, height_pt: 792.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub id: DocumentId,
    pub name: String,
    pub page_count: u32,
    #[serde(default)]
    pub page_sizes: Vec<PageSize>,
}

impl DocumentState {
    /// Size of a 1-based page, falling back to US Letter when unknown.
    pub fn page_size(&self, page_number: u32) -> PageSize {
        page_number
            .checked_sub(1)
            .and_then(|index| self.page_sizes.get(index as usize))
            .copied()
            .unwrap_or_default()
    }
}

/// One entry of the export list. Several entries may point at the same page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPage {
    pub id: SelectionId,
    #[serde(rename = "docId")]
    pub document_id: DocumentId,
    #[serde(rename = "pageNum")]
    pub page_number: u32,
    #[serde(rename = "name")]
    pub display_name: String,
}

impl SelectedPage {
    pub fn page_key(&self) -> PageKey {
        PageKey::new(self.document_id, self.page_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Draw,
    Erase,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    pub docs: Vec<DocumentState>,
    pub selected_pages: Vec<SelectedPage>,
    pub drawings: AnnotationSet,
    pub current_doc_id: Option<DocumentId>,
    pub zoom: f64,
    /// `None` leaves the page canvases inert.
    pub tool: Option<Tool>,
    pub color: Rgb,
    pub scroll_top: f64,
    next_document_id: u64,
    next_selection_id: u64,
    #[serde(rename = "drawMode", skip_serializing)]
    legacy_draw_mode: Option<bool>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            docs: Vec::new(),
            selected_pages: Vec::new(),
            drawings: AnnotationSet::new(),
            current_doc_id: None,
            zoom: 1.0,
            tool: None,
            color: Rgb::STROKE_RED,
            scroll_top: 0.0,
            next_document_id: 0,
            next_selection_id: 0,
            legacy_draw_mode: None,
        }
    }
}

impl SessionState {
    /// Normalizes a freshly deserialized state.
    ///
    /// Folds the old boolean draw mode into [`Tool::Draw`] and moves the id
    /// counters past every id already in use.
    pub fn migrate(&mut self) {
        if self.legacy_draw_mode.take() == Some(true) {
            self.tool = Some(Tool::Draw);
        }

        let max_document = self.docs.iter().map(|doc| doc.id.0).max().unwrap_or(0);
        self.next_document_id = self.next_document_id.max(max_document);

        let max_selection = self.selected_pages.iter().map(|page| page.id.0).max().unwrap_or(0);
        self.next_selection_id = self.next_selection_id.max(max_selection);

        self.zoom = clamp_zoom(self.zoom);
    }

    pub fn document(&self, id: DocumentId) -> Option<&DocumentState> {
        self.docs.iter().find(|doc| doc.id == id)
    }

    pub fn current_document(&self) -> Option<&DocumentState> {
        self.document(self.current_doc_id?)
    }

    pub fn is_page_selected(&self, document_id: DocumentId, page_number: u32) -> bool {
        self.selected_pages
            .iter()
            .any(|page| page.document_id == document_id && page.page_number == page_number)
    }

    pub fn new_document_id(&mut self) -> DocumentId {
        self.next_document_id += 1;
        DocumentId(self.next_document_id)
    }

    pub fn new_selection_id(&mut self) -> SelectionId {
        self.next_selection_id += 1;
        SelectionId(self.next_selection_id)
    }

    fn push_selection(&mut self, document_id: DocumentId, page_number: u32) -> bool {
        let Some(name) = self.document(document_id).map(|doc| doc.name.clone()) else {
            return false;
        };
        let id = self.new_selection_id();
        self.selected_pages.push(SelectedPage { id, document_id, page_number, display_name: name });
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    AddDocument { id: DocumentId, name: String, page_sizes: Vec<PageSize> },
    CloseDocument { document_id: DocumentId },
    ActivateDocument { document_id: DocumentId },
    ReorderDocuments { from: usize, to: usize },
    AddPage { document_id: DocumentId, page_number: u32 },
    TogglePage { document_id: DocumentId, page_number: u32 },
    RemoveSelection { index: usize },
    MoveSelection { from: usize, to: usize },
    SetTool { tool: Option<Tool> },
    SetColor { color: Rgb },
    ChangeZoom { delta: f64 },
    SetScrollTop { scroll_top: f64 },
    ClearPageAnnotations { key: PageKey },
    ClearDocumentAnnotations { document_id: DocumentId },
}

pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        1.0
    }
}

/// Applies one command to the session. Returns whether the state changed.
pub fn apply_session_action(state: &mut SessionState, action: SessionAction) -> bool {
    match action {
        SessionAction::AddDocument { id, name, page_sizes } => {
            if state.document(id).is_some() {
                return false;
            }
            state.next_document_id = state.next_document_id.max(id.0);
            state.docs.push(DocumentState {
                id,
                name,
                page_count: page_sizes.len() as u32,
                page_sizes,
            });
            state.current_doc_id = Some(id);
            true
        }
        SessionAction::CloseDocument { document_id } => {
            let Some(index) = state.docs.iter().position(|doc| doc.id == document_id) else {
                return false;
            };

            state.docs.remove(index);
            state.selected_pages.retain(|page| page.document_id != document_id);
            state.drawings.clear_document(document_id);

            if state.current_doc_id == Some(document_id) {
                state.current_doc_id = state.docs.first().map(|doc| doc.id);
                state.scroll_top = 0.0;
            }
            true
        }
        SessionAction::ActivateDocument { document_id } => {
            if state.document(document_id).is_none() {
                return false;
            }
            state.current_doc_id = Some(document_id);
            state.scroll_top = 0.0;
            true
        }
        SessionAction::ReorderDocuments { from, to } => move_entry(&mut state.docs, from, to),
        SessionAction::AddPage { document_id, page_number } => {
            if !page_in_range(state, document_id, page_number) {
                return false;
            }
            state.push_selection(document_id, page_number)
        }
        SessionAction::TogglePage { document_id, page_number } => {
            let existing = state
                .selected_pages
                .iter()
                .position(|page| {
                    page.document_id == document_id && page.page_number == page_number
                });

            match existing {
                Some(index) => {
                    state.selected_pages.remove(index);
                    true
                }
                None if page_in_range(state, document_id, page_number) => {
                    state.push_selection(document_id, page_number)
                }
                None => false,
            }
        }
        SessionAction::RemoveSelection { index } => {
            if index >= state.selected_pages.len() {
                return false;
            }
            state.selected_pages.remove(index);
            true
        }
        SessionAction::MoveSelection { from, to } => {
            move_entry(&mut state.selected_pages, from, to)
        }
        SessionAction::SetTool { tool } => {
            state.tool = if state.tool == tool { None } else { tool };
            true
        }
        SessionAction::SetColor { color } => {
            state.color = color;
            true
        }
        SessionAction::ChangeZoom { delta } => {
            let zoom = clamp_zoom(state.zoom + delta);
            let changed = zoom != state.zoom;
            state.zoom = zoom;
            changed
        }
        SessionAction::SetScrollTop { scroll_top } => {
            state.scroll_top = scroll_top.max(0.0);
            true
        }
        SessionAction::ClearPageAnnotations { key } => state.drawings.clear_page(key),
        SessionAction::ClearDocumentAnnotations { document_id } => {
            state.drawings.clear_document(document_id)
        }
    }
}

fn page_in_range(state: &SessionState, document_id: DocumentId, page_number: u32) -> bool {
    state
        .document(document_id)
        .is_some_and(|doc| page_number >= 1 && page_number <= doc.page_count)
}

fn move_entry<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() || to >= items.len() {
        return false;
    }
    if from == to {
        return true;
    }

    let item = items.remove(from);
    items.insert(to, item);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_documents(names: &[(&str, u32)]) -> SessionState {
        let mut state = SessionState::default();
        for (name, pages) in names {
            let id = state.new_document_id();
            apply_session_action(
                &mut state,
                SessionAction::AddDocument {
                    id,
                    name: (*name).to_owned(),
                    page_sizes: vec![PageSize::default(); *pages as usize],
                },
            );
        }
        state
    }

    fn add_page(state: &mut SessionState, document_id: DocumentId, page_number: u32) -> bool {
        apply_session_action(state, SessionAction::AddPage { document_id, page_number })
    }

    fn order(state: &SessionState) -> Vec<(u64, u32)> {
        state.selected_pages.iter().map(|p| (p.document_id.0, p.page_number)).collect()
    }

    #[test]
    fn adding_document_makes_it_current() {
        let state = with_documents(&[("a.pdf", 2), ("b.pdf", 1)]);
        assert_eq!(state.docs.len(), 2);
        assert_eq!(state.current_doc_id, Some(DocumentId(2)));
        assert_eq!(state.current_document().map(|d| d.name.as_str()), Some("b.pdf"));
    }

    #[test]
    fn duplicate_selections_get_distinct_ids() {
        let mut state = with_documents(&[("a.pdf", 2), ("b.pdf", 1)]);
        let (a, b) = (DocumentId(1), DocumentId(2));

        for (document_id, page_number) in [(a, 1), (b, 1), (a, 1)] {
            assert!(add_page(&mut state, document_id, page_number));
        }

        assert_eq!(order(&state), vec![(1, 1), (2, 1), (1, 1)]);
        let ids: Vec<u64> = state.selected_pages.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(state.selected_pages[1].display_name, "b.pdf");
    }

    #[test]
    fn add_page_rejects_unknown_pages() {
        let mut state = with_documents(&[("a.pdf", 2)]);
        let document_id = DocumentId(1);
        assert!(!add_page(&mut state, document_id, 0));
        assert!(!add_page(&mut state, document_id, 3));
        assert!(!add_page(&mut state, DocumentId(9), 1));
        assert!(state.selected_pages.is_empty());
    }

    #[test]
    fn toggle_page_adds_then_removes() {
        let mut state = with_documents(&[("a.pdf", 3)]);
        let action = SessionAction::TogglePage { document_id: DocumentId(1), page_number: 2 };

        apply_session_action(&mut state, action.clone());
        assert!(state.is_page_selected(DocumentId(1), 2));

        apply_session_action(&mut state, action);
        assert!(!state.is_page_selected(DocumentId(1), 2));
    }

    #[test]
    fn moving_selection_reorders_without_losing_entries() {
        let mut state = with_documents(&[("a.pdf", 3)]);
        for page_number in 1..=3 {
            add_page(&mut state, DocumentId(1), page_number);
        }

        assert!(apply_session_action(&mut state, SessionAction::MoveSelection { from: 0, to: 2 }));
        assert_eq!(order(&state), vec![(1, 2), (1, 3), (1, 1)]);

        assert!(!apply_session_action(&mut state, SessionAction::MoveSelection { from: 5, to: 0 }));
        assert_eq!(state.selected_pages.len(), 3);
    }

    #[test]
    fn closing_document_cascades_to_selection_and_annotations() {
        let mut state = with_documents(&[("a.pdf", 2), ("b.pdf", 2)]);
        let (a, b) = (DocumentId(1), DocumentId(2));
        add_page(&mut state, a, 1);
        add_page(&mut state, b, 2);
        let dot = vec![NormalizedPoint::new(0.1, 0.1)];
        state.drawings.append_stroke(PageKey::new(b, 2), dot.clone(), Rgb::BLACK);
        state.drawings.append_stroke(PageKey::new(a, 1), dot, Rgb::BLACK);

        assert!(apply_session_action(&mut state, SessionAction::CloseDocument { document_id: b }));

        assert_eq!(order(&state), vec![(1, 1)]);
        assert!(!state.drawings.has_annotations(PageKey::new(b, 2)));
        assert!(state.drawings.has_annotations(PageKey::new(a, 1)));
        assert_eq!(state.current_doc_id, Some(a));
    }

    #[test]
    fn closing_last_document_clears_current() {
        let mut state = with_documents(&[("a.pdf", 1)]);
        let close = SessionAction::CloseDocument { document_id: DocumentId(1) };
        apply_session_action(&mut state, close);
        assert_eq!(state.current_doc_id, None);
        assert!(state.docs.is_empty());
    }

    #[test]
    fn selecting_active_tool_toggles_it_off() {
        let mut state = SessionState::default();
        apply_session_action(&mut state, SessionAction::SetTool { tool: Some(Tool::Draw) });
        assert_eq!(state.tool, Some(Tool::Draw));

        apply_session_action(&mut state, SessionAction::SetTool { tool: Some(Tool::Erase) });
        assert_eq!(state.tool, Some(Tool::Erase));

        apply_session_action(&mut state, SessionAction::SetTool { tool: Some(Tool::Erase) });
        assert_eq!(state.tool, None);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut state = SessionState::default();
        for _ in 0..10 {
            apply_session_action(&mut state, SessionAction::ChangeZoom { delta: 0.25 });
        }
        assert_eq!(state.zoom, MAX_ZOOM);

        apply_session_action(&mut state, SessionAction::ChangeZoom { delta: -10.0 });
        assert_eq!(state.zoom, MIN_ZOOM);
    }

    #[test]
    fn activating_document_resets_scroll() {
        let mut state = with_documents(&[("a.pdf", 1), ("b.pdf", 1)]);
        apply_session_action(&mut state, SessionAction::SetScrollTop { scroll_top: 480.0 });
        let activate = SessionAction::ActivateDocument { document_id: DocumentId(1) };
        apply_session_action(&mut state, activate);
        assert_eq!(state.scroll_top, 0.0);
        assert_eq!(state.current_doc_id, Some(DocumentId(1)));
    }

    #[test]
    fn legacy_draw_mode_migrates_to_draw_tool() {
        let mut state: SessionState =
            serde_json::from_str(r#"{"drawMode":true,"zoom":1.5}"#).expect("legacy state parses");
        state.migrate();

        assert_eq!(state.tool, Some(Tool::Draw));
        assert_eq!(state.zoom, 1.5);
        assert_eq!(state.color, Rgb::STROKE_RED);

        let json = serde_json::to_value(&state).expect("serialize");
        assert!(json.get("drawMode").is_none());
    }

    #[test]
    fn migrate_advances_counters_past_existing_ids() {
        let mut state = with_documents(&[("a.pdf", 1)]);
        add_page(&mut state, DocumentId(1), 1);

        let json = serde_json::to_value(&state).expect("serialize");
        let mut restored: SessionState = serde_json::from_value(json).expect("parse");
        restored.migrate();

        assert_eq!(restored, state);
        assert_eq!(restored.new_document_id(), DocumentId(2));
        assert_eq!(restored.new_selection_id(), SelectionId(2));
    }

    #[test]
    fn page_size_lookup_is_one_based() {
        let doc = DocumentState {
            id: DocumentId(1),
            name: "a.pdf".to_owned(),
            page_count: 2,
            page_sizes: vec![
                PageSize { width_pt: 100.0, height_pt: 200.0 },
                PageSize { width_pt: 300.0, height_pt: 400.0 },
            ],
        };
        assert_eq!(doc.page_size(2).width_pt, 300.0);
        assert_eq!(doc.page_size(0), PageSize::default());
        assert_eq!(doc.page_size(3), PageSize::default());
    }
}
