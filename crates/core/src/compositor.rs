//! Flattens annotated page selections into one output PDF.

use doc_model::{AnnotationSet, DocumentId, RasterSize, SelectedPage};
use pdf_engine::lopdf::Document;
use pdf_engine::{OutputDocument, PdfEngineError};
use std::collections::HashMap;
use stitch_render::{to_rgba_image, AnnotationRenderer, RenderError};

/// Parsed source documents, looked up by session document id.
pub trait SourceDocuments {
    fn source(&self, id: DocumentId) -> Option<&Document>;
}

impl SourceDocuments for HashMap<DocumentId, Document> {
    fn source(&self, id: DocumentId) -> Option<&Document> {
        self.get(&id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no pages selected for export")]
    EmptySelection,
    #[error("selection {selection} refers to document {document} which is not open")]
    MissingDocument { selection: usize, document: u64 },
    #[error("failed to copy the page of selection {selection}")]
    Copy {
        selection: usize,
        #[source]
        source: PdfEngineError,
    },
    #[error("failed to rasterize annotations of selection {selection}")]
    Render {
        selection: usize,
        #[source]
        source: RenderError,
    },
    #[error("failed to embed the annotation layer of selection {selection}")]
    Embed {
        selection: usize,
        #[source]
        source: PdfEngineError,
    },
    #[error("failed to save the output document")]
    Save(#[source] PdfEngineError),
}

/// A finished export, ready to be written out under `file_name`.
#[derive(Debug, Clone)]
pub struct ExportedPdf {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Builds output documents from a selection list.
#[derive(Debug, Clone)]
pub struct ExportCompositor {
    renderer: AnnotationRenderer,
    export_scale: f32,
    file_name: String,
}

impl ExportCompositor {
    pub fn new(
        renderer: AnnotationRenderer,
        export_scale: f32,
        file_name: impl Into<String>,
    ) -> Self {
        Self { renderer, export_scale, file_name: file_name.into() }
    }

    pub fn export_scale(&self) -> f32 {
        self.export_scale
    }

    /// Copies every selected page, in order, into a new document and burns
    /// its annotations in as a full-page image overlay.
    ///
    /// Any failure aborts the whole export and no bytes are returned.
    pub fn export(
        &self,
        selection: &[SelectedPage],
        drawings: &AnnotationSet,
        sources: &dyn SourceDocuments,
    ) -> Result<ExportedPdf, ExportError> {
        if selection.is_empty() {
            return Err(ExportError::EmptySelection);
        }

        let mut output = OutputDocument::new();
        for (index, selected) in selection.iter().enumerate() {
            let source = sources.source(selected.document_id).ok_or(ExportError::MissingDocument {
                selection: index,
                document: selected.document_id.0,
            })?;

            let page = output
                .import_page(source, selected.page_number)
                .map_err(|source| ExportError::Copy { selection: index, source })?;

            let annotations = drawings.page(selected.page_key());
            if annotations.is_empty() {
                tracing::debug!(selection = index, "copied page without annotations");
                continue;
            }

            let size = output.page_size(page);
            let layer = self
                .renderer
                .render_layer(
                    annotations,
                    RasterSize::new(f64::from(size.width_pt), f64::from(size.height_pt)),
                    self.export_scale,
                )
                .map_err(|source| ExportError::Render { selection: index, source })?;

            output
                .overlay_image(page, &to_rgba_image(&layer))
                .map_err(|source| ExportError::Embed { selection: index, source })?;
            tracing::debug!(
                selection = index,
                annotations = annotations.len(),
                width = layer.width(),
                height = layer.height(),
                "burned in annotation layer"
            );
        }

        let page_count = output.page_count();
        let bytes = output.save().map_err(ExportError::Save)?;
        tracing::info!(pages = page_count, bytes = bytes.len(), "export finished");

        Ok(ExportedPdf { file_name: self.file_name.clone(), bytes, page_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{document_with_pages, page_content};
    use doc_model::{NormalizedPoint, PageKey, Rgb, SelectionId};
    use stitch_render::FontBook;

    const A: DocumentId = DocumentId(1);
    const B: DocumentId = DocumentId(2);

    fn sources() -> HashMap<DocumentId, Document> {
        let load = |bytes: Vec<u8>| Document::load_mem(&bytes).expect("fixture parses");
        HashMap::from([
            (A, load(document_with_pages("A", &[(612.0, 792.0), (612.0, 792.0)]))),
            (B, load(document_with_pages("B", &[(300.0, 400.0)]))),
        ])
    }

    fn select(entries: &[(DocumentId, u32)]) -> Vec<SelectedPage> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (document_id, page_number))| SelectedPage {
                id: SelectionId(i as u64 + 1),
                document_id: *document_id,
                page_number: *page_number,
                display_name: format!("doc {}", document_id.0),
            })
            .collect()
    }

    fn compositor() -> ExportCompositor {
        ExportCompositor::new(AnnotationRenderer::new(FontBook::empty()), 2.0, "stitched_pro.pdf")
    }

    fn annotated_a1() -> AnnotationSet {
        let mut drawings = AnnotationSet::new();
        drawings.append_stroke(
            PageKey::new(A, 1),
            vec![NormalizedPoint::new(0.1, 0.1), NormalizedPoint::new(0.9, 0.9)],
            Rgb::STROKE_RED,
        );
        drawings
    }

    fn exported_pages(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).expect("output parses");
        (1..=doc.get_pages().len() as u32).map(|page| page_content(&doc, page)).collect()
    }

    #[test]
    fn duplicates_are_exported_in_selection_order() {
        let exported = compositor()
            .export(&select(&[(A, 1), (B, 1), (A, 1)]), &annotated_a1(), &sources())
            .expect("export");

        assert_eq!(exported.file_name, "stitched_pro.pdf");
        assert_eq!(exported.page_count, 3);

        let pages = exported_pages(&exported.bytes);
        assert_eq!(pages.len(), 3);
        assert!(pages[0].contains("(A page 1)"));
        assert!(pages[1].contains("(B page 1)"));
        assert!(pages[2].contains("(A page 1)"));

        assert!(pages[0].contains(" Do"));
        assert!(!pages[1].contains(" Do"));
        assert!(pages[2].contains(" Do"));
        assert!(pages[0].contains("612 0 0 792 0 0 cm"));
    }

    #[test]
    fn reordering_changes_output_order_only() {
        let mut selection = select(&[(A, 1), (B, 1), (A, 2)]);
        let first = selection.remove(0);
        selection.insert(2, first);

        let drawings = annotated_a1();
        let exported = compositor().export(&selection, &drawings, &sources()).expect("export");
        let pages = exported_pages(&exported.bytes);

        assert!(pages[0].contains("(B page 1)"));
        assert!(pages[1].contains("(A page 2)"));
        assert!(pages[2].contains("(A page 1)"));
        assert!(pages[2].contains(" Do"));
        assert_eq!(drawings.page(PageKey::new(A, 1)).len(), 1);
    }

    #[test]
    fn empty_selection_is_rejected() {
        let err = compositor()
            .export(&[], &AnnotationSet::new(), &sources())
            .expect_err("nothing to export");
        assert!(matches!(err, ExportError::EmptySelection));
    }

    #[test]
    fn missing_page_aborts_the_whole_export() {
        let err = compositor()
            .export(&select(&[(A, 1), (B, 5)]), &AnnotationSet::new(), &sources())
            .expect_err("page 5 does not exist");
        assert!(matches!(err, ExportError::Copy { selection: 1, .. }));
    }

    #[test]
    fn unknown_document_is_reported() {
        let err = compositor()
            .export(&select(&[(DocumentId(9), 1)]), &AnnotationSet::new(), &sources())
            .expect_err("document 9 is not open");
        assert!(matches!(err, ExportError::MissingDocument { selection: 0, document: 9 }));
    }
}
