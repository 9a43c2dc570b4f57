//! Page stitching core.
//!
//! Interactive annotation editing, export composition and the session
//! context that ties them to persistence.

pub mod compositor;
pub mod config;
pub mod editor;
pub mod preview;
pub mod workspace;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use compositor::{ExportCompositor, ExportError, ExportedPdf, SourceDocuments};
pub use config::{ConfigError, StitchConfig};
pub use editor::{
    AnnotationEditor, EditOutcome, LiveCanvas, MouseButton, PointerEvent, PointerKind,
    PointerPhase, SurfaceId, TextInputEvent,
};
pub use preview::{preview_position, preview_size, PREVIEW_SCALE};
pub use workspace::{IngestOutcome, IngestReport, Workspace, WorkspaceError, WorkspaceResult};
pub use writer::{SessionSnapshot, SessionWriter, WriterError};
