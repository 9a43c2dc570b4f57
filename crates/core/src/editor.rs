//! Pointer-driven annotation editing on live page canvases.
//!
//! The editor turns pointer and text-input events into [`AnnotationSet`]
//! mutations. Canvases are painted incrementally while drawing and repainted
//! from the store whenever entries are removed.

use doc_model::{AnnotationSet, PageKey, PixelPoint, RasterSize, Rgb, Tool};
use stitch_render::{transparent_surface, AnnotationRenderer, Pixmap, RenderResult};

/// Identifies one live canvas. Hosts allocate ids; the editor only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// A page canvas at the current display scale.
#[derive(Debug, Clone)]
pub struct LiveCanvas {
    id: SurfaceId,
    key: PageKey,
    pixmap: Pixmap,
}

impl LiveCanvas {
    /// Creates a transparent canvas of `size` pixels, rounded to whole pixels.
    pub fn new(id: SurfaceId, key: PageKey, size: RasterSize) -> RenderResult<Self> {
        let width = size.width.round().max(1.0) as u32;
        let height = size.height.round().max(1.0) as u32;
        Ok(Self { id, key, pixmap: transparent_surface(width, height)? })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn key(&self) -> PageKey {
        self.key
    }

    /// Current pixel dimensions, the scale every normalization uses.
    pub fn size(&self) -> RasterSize {
        RasterSize::new(f64::from(self.pixmap.width()), f64::from(self.pixmap.height()))
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse { button: MouseButton },
    Touch,
    Pen,
}

/// One pointer sample in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub position: PixelPoint,
    pub phase: PointerPhase,
    pub kind: PointerKind,
}

impl PointerEvent {
    pub fn new(phase: PointerPhase, x: f64, y: f64) -> Self {
        Self {
            position: PixelPoint::new(x, y),
            phase,
            kind: PointerKind::Mouse { button: MouseButton::Primary },
        }
    }

    pub fn with_kind(mut self, kind: PointerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Touch and pen contacts count as primary input.
    pub fn is_primary(&self) -> bool {
        !matches!(self.kind, PointerKind::Mouse { button } if button != MouseButton::Primary)
    }
}

/// Keyboard and focus events of the inline text prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInputEvent {
    Blur,
    Enter { shift: bool },
    Escape,
}

/// What an event did, so hosts know whether to present or persist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditOutcome {
    Ignored,
    /// Live ink was painted; the store is unchanged.
    Painted,
    /// A new annotation was appended.
    Committed,
    /// Annotations were removed and the canvas repainted.
    Erased,
    /// The host should open a text prompt at this canvas position.
    TextPrompt { at: PixelPoint },
    TextDiscarded,
}

impl EditOutcome {
    /// Whether the store changed and the session should be persisted.
    pub fn mutated(&self) -> bool {
        matches!(self, EditOutcome::Committed | EditOutcome::Erased)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Gesture {
    Idle,
    Dragging { surface: SurfaceId, path: Vec<PixelPoint> },
    Erasing { surface: SurfaceId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TextPrompt {
    surface: SurfaceId,
    at: PixelPoint,
}

/// Pointer state machine shared by every live canvas.
#[derive(Debug, Clone)]
pub struct AnnotationEditor {
    tool: Option<Tool>,
    color: Rgb,
    erase_threshold: f64,
    text_size: f64,
    gesture: Gesture,
    prompt: Option<TextPrompt>,
}

impl AnnotationEditor {
    pub fn new(erase_threshold: f64, text_size: f64) -> Self {
        Self {
            tool: None,
            color: Rgb::STROKE_RED,
            erase_threshold,
            text_size,
            gesture: Gesture::Idle,
            prompt: None,
        }
    }

    pub fn tool(&self) -> Option<Tool> {
        self.tool
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    /// Switches tools. An unfinished stroke is dropped.
    pub fn set_tool(&mut self, tool: Option<Tool>) {
        if self.tool != tool && self.gesture != Gesture::Idle {
            tracing::debug!("tool changed mid-gesture, dropping it");
            self.gesture = Gesture::Idle;
        }
        self.tool = tool;
    }

    /// Sets the colour given to annotations committed from now on.
    pub fn set_color(&mut self, color: Rgb) {
        self.color = color;
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.gesture, Gesture::Dragging { .. })
    }

    pub fn pending_text(&self) -> Option<(SurfaceId, PixelPoint)> {
        self.prompt.map(|prompt| (prompt.surface, prompt.at))
    }

    /// Abandons any gesture or text prompt bound to `surface`.
    ///
    /// Hosts call this when a canvas is closed or rebuilt, since its pixel
    /// coordinates no longer mean anything.
    pub fn cancel_gesture(&mut self, surface: SurfaceId) -> bool {
        let mut cancelled = false;
        match &self.gesture {
            Gesture::Dragging { surface: active, .. } | Gesture::Erasing { surface: active }
                if *active == surface =>
            {
                self.gesture = Gesture::Idle;
                cancelled = true;
            }
            _ => {}
        }
        if self.prompt.is_some_and(|prompt| prompt.surface == surface) {
            self.prompt = None;
            cancelled = true;
        }
        if cancelled {
            tracing::debug!(surface = surface.0, "cancelled gesture on a retired canvas");
        }
        cancelled
    }

    /// Feeds one pointer event for `canvas` through the state machine.
    pub fn handle_pointer(
        &mut self,
        canvas: &mut LiveCanvas,
        drawings: &mut AnnotationSet,
        renderer: &AnnotationRenderer,
        event: PointerEvent,
    ) -> EditOutcome {
        match event.phase {
            PointerPhase::Down => self.pointer_down(canvas, drawings, renderer, event),
            PointerPhase::Move => self.pointer_move(canvas, drawings, renderer, event.position),
            PointerPhase::Up | PointerPhase::Leave => self.pointer_up(canvas, drawings),
        }
    }

    fn pointer_down(
        &mut self,
        canvas: &mut LiveCanvas,
        drawings: &mut AnnotationSet,
        renderer: &AnnotationRenderer,
        event: PointerEvent,
    ) -> EditOutcome {
        let Some(tool) = self.tool else {
            return EditOutcome::Ignored;
        };
        if !event.is_primary() || self.gesture != Gesture::Idle {
            return EditOutcome::Ignored;
        }

        let at = event.position;
        match tool {
            Tool::Draw => {
                renderer.paint_dot(canvas.pixmap_mut(), at, self.color);
                self.gesture = Gesture::Dragging { surface: canvas.id(), path: vec![at] };
                EditOutcome::Painted
            }
            Tool::Erase => {
                self.gesture = Gesture::Erasing { surface: canvas.id() };
                self.erase_at(canvas, drawings, renderer, at)
            }
            Tool::Text => {
                let prompt = TextPrompt { surface: canvas.id(), at };
                if let Some(previous) = self.prompt.replace(prompt) {
                    tracing::debug!(?previous, "replacing an unanswered text prompt");
                }
                EditOutcome::TextPrompt { at }
            }
        }
    }

    fn pointer_move(
        &mut self,
        canvas: &mut LiveCanvas,
        drawings: &mut AnnotationSet,
        renderer: &AnnotationRenderer,
        at: PixelPoint,
    ) -> EditOutcome {
        let id = canvas.id();
        match &mut self.gesture {
            Gesture::Dragging { surface, path } if *surface == id => {
                if let Some(last) = path.last().copied() {
                    renderer.paint_segment(canvas.pixmap_mut(), last, at, self.color);
                }
                path.push(at);
                return EditOutcome::Painted;
            }
            Gesture::Erasing { surface } if *surface == id => {}
            _ => return EditOutcome::Ignored,
        }

        self.erase_at(canvas, drawings, renderer, at)
    }

    fn pointer_up(&mut self, canvas: &mut LiveCanvas, drawings: &mut AnnotationSet) -> EditOutcome {
        let surface = match &self.gesture {
            Gesture::Dragging { surface, .. } | Gesture::Erasing { surface } => *surface,
            Gesture::Idle => return EditOutcome::Ignored,
        };
        if surface != canvas.id() {
            return EditOutcome::Ignored;
        }

        let Gesture::Dragging { path, .. } = std::mem::replace(&mut self.gesture, Gesture::Idle)
        else {
            return EditOutcome::Ignored;
        };

        let size = canvas.size();
        let points = path.into_iter().map(|point| point.normalize(size)).collect();
        if drawings.append_stroke(canvas.key(), points, self.color) {
            EditOutcome::Committed
        } else {
            EditOutcome::Ignored
        }
    }

    fn erase_at(
        &self,
        canvas: &mut LiveCanvas,
        drawings: &mut AnnotationSet,
        renderer: &AnnotationRenderer,
        at: PixelPoint,
    ) -> EditOutcome {
        let key = canvas.key();
        let removed =
            drawings.erase_near(key, at, canvas.size(), self.erase_threshold, renderer.fonts());
        if !removed {
            return EditOutcome::Ignored;
        }

        renderer.repaint(canvas.pixmap_mut(), drawings.page(key));
        EditOutcome::Erased
    }

    /// Resolves the open text prompt of `canvas`.
    ///
    /// Blur and a plain Enter commit `content`; Shift+Enter keeps editing;
    /// Escape discards. Font size and position are normalized against the
    /// canvas as it is now.
    pub fn text_event(
        &mut self,
        canvas: &mut LiveCanvas,
        drawings: &mut AnnotationSet,
        renderer: &AnnotationRenderer,
        event: TextInputEvent,
        content: &str,
    ) -> EditOutcome {
        let Some(prompt) = self.prompt.filter(|prompt| prompt.surface == canvas.id()) else {
            return EditOutcome::Ignored;
        };

        match event {
            TextInputEvent::Enter { shift: true } => return EditOutcome::Ignored,
            TextInputEvent::Escape => {
                self.prompt = None;
                return EditOutcome::TextDiscarded;
            }
            TextInputEvent::Blur | TextInputEvent::Enter { shift: false } => {}
        }

        self.prompt = None;
        let size = canvas.size();
        let font_size_fraction = if size.height > 0.0 { self.text_size / size.height } else { 0.0 };
        let key = canvas.key();
        let at = prompt.at.normalize(size);

        if !drawings.append_text(key, at, content, font_size_fraction, self.color) {
            return EditOutcome::TextDiscarded;
        }

        renderer.repaint(canvas.pixmap_mut(), drawings.page(key));
        EditOutcome::Committed
    }
}
