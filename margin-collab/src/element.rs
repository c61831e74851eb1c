//! Annotation element model: geometry, payload variants, validation.
//!
//! Elements are the unit of collaborative editing — text boxes, freehand
//! strokes, shapes, and embedded images pinned to a page of the underlying
//! document. The engine owns their lifecycle; it never renders them.
//!
//! Payloads form a closed variant set ([`ElementBody`]) so that adding a
//! variant is a compile-time-checked change at every consumption site.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// Geometry
// ───────────────────────────────────────────────────────────────────

/// 2D position in document (page) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned rectangle in document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }
}

/// RGBA color, components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Convert to [f32; 4] array for consumers that want raw components.
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

// ───────────────────────────────────────────────────────────────────
// Payload variants
// ───────────────────────────────────────────────────────────────────

/// Shape geometry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
    Line,
    Arrow,
}

/// Variant-specific element payload.
///
/// Closed set: every consumer matches exhaustively. There is no "empty"
/// payload state — an element always carries exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementBody {
    /// A text run.
    Text {
        text: String,
        font_size: f32,
        color: Color,
    },
    /// A freehand stroke as an ordered list of points.
    Stroke {
        points: Vec<Point>,
        width: f32,
        color: Color,
    },
    /// A geometric shape with fill/stroke styling.
    Shape {
        kind: ShapeKind,
        fill: Option<Color>,
        stroke_color: Color,
        stroke_width: f32,
    },
    /// An embedded image, referenced by an opaque source string.
    Image { source: String, opacity: f32 },
}

impl ElementBody {
    /// Short name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ElementBody::Text { .. } => "text",
            ElementBody::Stroke { .. } => "stroke",
            ElementBody::Shape { .. } => "shape",
            ElementBody::Image { .. } => "image",
        }
    }

    /// The text run, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementBody::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    fn check(&self) -> Result<(), ValidationError> {
        match self {
            ElementBody::Text { font_size, .. } => {
                if !font_size.is_finite() || *font_size <= 0.0 {
                    return Err(ValidationError::NonFiniteDimension);
                }
            }
            ElementBody::Stroke { points, width, .. } => {
                if points.is_empty() {
                    return Err(ValidationError::EmptyStroke);
                }
                if points.iter().any(|p| !p.is_finite()) {
                    return Err(ValidationError::NonFiniteBounds);
                }
                if !width.is_finite() || *width <= 0.0 {
                    return Err(ValidationError::NonFiniteDimension);
                }
            }
            ElementBody::Shape { stroke_width, .. } => {
                if !stroke_width.is_finite() || *stroke_width < 0.0 {
                    return Err(ValidationError::NonFiniteDimension);
                }
            }
            ElementBody::Image { source, opacity } => {
                if source.is_empty() {
                    return Err(ValidationError::EmptyImageSource);
                }
                if !opacity.is_finite() {
                    return Err(ValidationError::NonFiniteDimension);
                }
            }
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────
// Element
// ───────────────────────────────────────────────────────────────────

/// A single annotation element.
///
/// The id is immutable for the lifetime of the element; page index, bounds
/// and body mutate only through operations applied by the merge engine.
/// Timestamps are advisory wall-clock milliseconds — they are never used
/// for conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: Uuid,
    pub page_index: u32,
    pub bounds: Bounds,
    pub body: ElementBody,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// Replica that last touched this element (advisory; the authoritative
    /// last-writer stamp lives in the merge engine).
    pub updated_by: Uuid,
}

impl Element {
    pub fn new(
        id: Uuid,
        page_index: u32,
        bounds: Bounds,
        body: ElementBody,
        now_ms: u64,
        author: Uuid,
    ) -> Self {
        Self {
            id,
            page_index,
            bounds,
            body,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            updated_by: author,
        }
    }

    /// Validate against the document supplied by the external collaborator.
    ///
    /// Pure: no side effects, no mutation.
    pub fn validate(&self, pages: &PageMetrics) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId);
        }
        if !self.bounds.is_finite() {
            return Err(ValidationError::NonFiniteBounds);
        }
        if self.bounds.width < 0.0 || self.bounds.height < 0.0 {
            return Err(ValidationError::NegativeSize);
        }
        if self.page_index as usize >= pages.page_count() {
            return Err(ValidationError::PageOutOfRange {
                page: self.page_index,
                page_count: pages.page_count(),
            });
        }
        self.body.check()
    }

    /// Apply a partial patch in place, restamping the advisory metadata.
    pub fn apply_patch(&mut self, patch: &ElementPatch, now_ms: u64, author: Uuid) {
        if let Some(page_index) = patch.page_index {
            self.page_index = page_index;
        }
        if let Some(bounds) = patch.bounds {
            self.bounds = bounds;
        }
        if let Some(ref body) = patch.body {
            self.body = body.clone();
        }
        self.updated_at_ms = now_ms;
        self.updated_by = author;
    }
}

/// Partial-field patch carried by Update operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementPatch {
    pub page_index: Option<u32>,
    pub bounds: Option<Bounds>,
    pub body: Option<ElementBody>,
}

impl ElementPatch {
    pub fn is_empty(&self) -> bool {
        self.page_index.is_none() && self.bounds.is_none() && self.body.is_none()
    }

    pub fn with_bounds(bounds: Bounds) -> Self {
        Self { bounds: Some(bounds), ..Self::default() }
    }

    pub fn with_body(body: ElementBody) -> Self {
        Self { body: Some(body), ..Self::default() }
    }

    /// Patch that restores the complete mutable state of `element`.
    pub fn restoring(element: &Element) -> Self {
        Self {
            page_index: Some(element.page_index),
            bounds: Some(element.bounds),
            body: Some(element.body.clone()),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Document extents (supplied by the document collaborator)
// ───────────────────────────────────────────────────────────────────

/// Page count and per-page bounds of the underlying paginated document.
///
/// The engine only validates against this — it never mutates document
/// content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetrics {
    pages: Vec<Bounds>,
}

impl PageMetrics {
    pub fn new(pages: Vec<Bounds>) -> Self {
        Self { pages }
    }

    /// `count` uniform pages of the given size, origin at (0, 0).
    pub fn uniform(count: usize, width: f32, height: f32) -> Self {
        Self {
            pages: vec![Bounds::new(0.0, 0.0, width, height); count],
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_bounds(&self, page_index: u32) -> Option<&Bounds> {
        self.pages.get(page_index as usize)
    }
}

/// Element/operation shape violations, detected before anything reaches the
/// merge engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NilId,
    NonFiniteBounds,
    NegativeSize,
    PageOutOfRange { page: u32, page_count: usize },
    EmptyStroke,
    EmptyImageSource,
    NonFiniteDimension,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NilId => write!(f, "element id is nil"),
            ValidationError::NonFiniteBounds => write!(f, "bounds contain non-finite values"),
            ValidationError::NegativeSize => write!(f, "bounds have negative size"),
            ValidationError::PageOutOfRange { page, page_count } => {
                write!(f, "page index {page} out of range (document has {page_count} pages)")
            }
            ValidationError::EmptyStroke => write!(f, "stroke has no points"),
            ValidationError::EmptyImageSource => write!(f, "image source reference is empty"),
            ValidationError::NonFiniteDimension => write!(f, "dimension is non-finite or non-positive"),
        }
    }
}

impl std::error::Error for ValidationError {}
