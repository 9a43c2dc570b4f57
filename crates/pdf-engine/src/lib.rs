//! PDF ingestion and output composition on top of `lopdf`.

mod compose;
mod objects;

pub use compose::{ImportedPage, OutputDocument};
pub use lopdf;

use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width_pt: 612.0, height_pt: 792.0 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("failed to encode overlay image: {0}")]
    Encode(String),
    #[error("failed to write PDF: {0}")]
    Save(String),
}

pub type PdfResult<T> = Result<T, PdfEngineError>;

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> PdfResult<DocumentHandle>;
    fn page_count(&self, handle: DocumentHandle) -> PdfResult<u32>;
    /// Size of the page at the zero-based `page_index`.
    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> PdfResult<PageSize>;
    fn page_sizes(&self, handle: DocumentHandle) -> PdfResult<&[PageSize]>;
    /// The parsed document, for importing its pages into an output file.
    fn document(&self, handle: DocumentHandle) -> PdfResult<&Document>;
    fn close(&mut self, handle: DocumentHandle) -> PdfResult<()>;
}

#[derive(Debug)]
struct DocumentRecord {
    document: Document,
    page_sizes: Vec<PageSize>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: &[u8]) -> PdfResult<DocumentRecord> {
        let document = Document::load_mem(bytes)?;
        if document.is_encrypted() {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let page_sizes: Vec<PageSize> = document
            .get_pages()
            .into_values()
            .map(|page_id| objects::page_size(&document, page_id))
            .collect();

        if page_sizes.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        Ok(DocumentRecord { document, page_sizes })
    }

    fn record(&self, handle: DocumentHandle) -> PdfResult<&DocumentRecord> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> PdfResult<DocumentHandle> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let record = Self::parse(&bytes)?;
        tracing::debug!(pages = record.page_sizes.len(), "parsed PDF");

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, record);

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> PdfResult<u32> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> PdfResult<PageSize> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    fn page_sizes(&self, handle: DocumentHandle) -> PdfResult<&[PageSize]> {
        Ok(self.record(handle)?.page_sizes.as_slice())
    }

    fn document(&self, handle: DocumentHandle) -> PdfResult<&Document> {
        Ok(&self.record(handle)?.document)
    }

    fn close(&mut self, handle: DocumentHandle) -> PdfResult<()> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{dictionary, Dictionary, Document, Object, Stream};

    /// A minimal document with one labelled page per size. Resources and the
    /// media box of the first size live on the `Pages` node so pages inherit them.
    pub(crate) fn document_with_pages(sizes: &[(f32, f32)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for (index, (width, height)) in sizes.iter().enumerate() {
            let content = format!("BT /F1 24 Tf 72 72 Td (Page {}) Tj ET", index + 1);
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if index > 0 {
                page.set("MediaBox", media_box(*width, *height));
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let (width, height) = sizes.first().copied().unwrap_or((612.0, 792.0));
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => sizes.len() as i64,
                "Resources" => resources_id,
                "MediaBox" => media_box(width, height),
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("fixture PDF should serialize");
        bytes
    }

    /// Marks a serialized document as encrypted with a standard security handler.
    pub(crate) fn with_encryption(bytes: &[u8]) -> Vec<u8> {
        let mut doc = Document::load_mem(bytes).expect("fixture PDF should parse");
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1_i64,
            "R" => 2_i64,
            "O" => Object::string_literal(vec![0_u8; 32]),
            "U" => Object::string_literal(vec![0_u8; 32]),
            "P" => -4_i64,
        });
        doc.trailer.set("Encrypt", encrypt_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("fixture PDF should serialize");
        bytes
    }

    fn media_box(width: f32, height: f32) -> Vec<Object> {
        vec![Object::Integer(0), Object::Integer(0), Object::Real(width), Object::Real(height)]
    }
}
