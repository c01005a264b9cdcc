//! Bounding-box annotation over an uploaded image.
//!
//! Coordinates are percentages of the image bounds, so the model is
//! independent of how large the preview is drawn.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::locale::Locale;
use crate::message::{IdSource, MessageId};

/// Default minimum width and height a committed box must exceed.
pub const DEFAULT_MIN_BOX_SIZE: f64 = 2.0;

/// A point on the annotation surface, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position, 0 at the left edge.
    pub x: f64,
    /// Vertical position, 0 at the top edge.
    pub y: f64,
}

impl Point {
    /// Creates a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn on_surface(self) -> bool {
        (0.0..=100.0).contains(&self.x) && (0.0..=100.0).contains(&self.y)
    }
}

/// A rectangle drawn by the learner, normalized to a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Identity shared with the parallel [`MistakeMark`].
    pub id: MessageId,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

/// The entry sent to detection for every committed box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeMark {
    /// Same id as the box.
    pub id: MessageId,
    /// The marked region.
    #[serde(rename = "box")]
    pub region: BoundingBox,
    /// Display label, e.g. `错题1`.
    pub question_no: String,
}

/// A rectangle in progress. Not yet identified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragRect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl DragRect {
    fn between(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    start: Point,
    current: DragRect,
}

/// Drag-to-draw box editor with a parallel list of marks.
///
/// `boxes` and `marks` always hold the same ids in the same order.
#[derive(Debug, Clone)]
pub struct AnnotationEngine {
    ids: IdSource,
    locale: Locale,
    min_size: f64,
    boxes: Vec<BoundingBox>,
    marks: Vec<MistakeMark>,
    drag: Option<Drag>,
}

impl AnnotationEngine {
    /// Creates an engine drawing ids from `ids`.
    #[must_use]
    pub fn new(ids: IdSource, locale: &Locale, min_size: f64) -> Self {
        Self {
            ids,
            locale: locale.clone(),
            min_size,
            boxes: Vec::new(),
            marks: Vec::new(),
            drag: None,
        }
    }

    /// Starts a drag at `point`. A point off the surface starts nothing and
    /// cancels any drag already in progress.
    pub fn begin_drag(&mut self, point: Point) {
        if !point.on_surface() {
            debug!(x = point.x, y = point.y, "Ignoring drag start off the surface");
            self.cancel_drag();
            return;
        }
        self.drag = Some(Drag {
            start: point,
            current: DragRect::between(point, point),
        });
    }

    /// Moves the drag to `point`. A point off the surface cancels the drag.
    pub fn update_drag(&mut self, point: Point) {
        if !point.on_surface() {
            self.cancel_drag();
            return;
        }
        if let Some(drag) = self.drag.as_mut() {
            drag.current = DragRect::between(drag.start, point);
        }
    }

    /// Ends the drag, committing the box if both sides exceed the minimum
    /// size. Drag state is cleared either way.
    pub fn end_drag(&mut self) -> Option<BoundingBox> {
        let drag = self.drag.take()?;
        let rect = drag.current;
        if rect.width <= self.min_size || rect.height <= self.min_size {
            debug!(
                width = rect.width,
                height = rect.height,
                min = self.min_size,
                "Discarding box below minimum size"
            );
            return None;
        }

        let id = self.ids.next_id();
        let region = BoundingBox {
            id,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        };
        let mark = MistakeMark {
            id,
            region,
            question_no: self.locale.mark_label(self.marks.len() + 1),
        };
        self.boxes.push(region);
        self.marks.push(mark);
        debug!(id = %id, count = self.boxes.len(), "Committed box");
        Some(region)
    }

    /// Abandons the drag in progress, if any.
    pub fn cancel_drag(&mut self) {
        if self.drag.take().is_some() {
            debug!("Drag cancelled");
        }
    }

    /// Draws a box from one corner to the other in a single call.
    pub fn draw(&mut self, from: Point, to: Point) -> Option<BoundingBox> {
        self.begin_drag(from);
        self.update_drag(to);
        self.end_drag()
    }

    /// Removes the box (and its mark) with `id`. Returns `false` if absent.
    pub fn remove_box(&mut self, id: MessageId) -> bool {
        let before = self.boxes.len();
        self.boxes.retain(|b| b.id != id);
        self.marks.retain(|m| m.id != id);
        before != self.boxes.len()
    }

    /// Removes the most recently committed box and its mark.
    pub fn undo_last(&mut self) -> Option<BoundingBox> {
        self.marks.pop();
        self.boxes.pop()
    }

    /// Removes every box and mark.
    pub fn clear_all(&mut self) {
        self.boxes.clear();
        self.marks.clear();
        self.drag = None;
    }

    /// Hands the marks over to a detection request, clearing the engine.
    pub fn take_marks(&mut self) -> Vec<MistakeMark> {
        self.boxes.clear();
        self.drag = None;
        std::mem::take(&mut self.marks)
    }

    /// Committed boxes in order.
    #[must_use]
    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    /// Marks parallel to [`Self::boxes`].
    #[must_use]
    pub fn marks(&self) -> &[MistakeMark] {
        &self.marks
    }

    /// The rectangle being dragged, if a drag is in progress.
    #[must_use]
    pub fn current_box(&self) -> Option<DragRect> {
        self.drag.map(|d| d.current)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::locale::Language;

    fn engine() -> AnnotationEngine {
        AnnotationEngine::new(
            IdSource::new(),
            &Locale::new(Language::Chinese),
            DEFAULT_MIN_BOX_SIZE,
        )
    }

    #[test]
    fn test_reverse_drag_is_normalized() {
        let mut engine = engine();
        engine.begin_drag(Point::new(10.0, 10.0));
        engine.update_drag(Point::new(5.0, 5.0));
        let committed = engine.end_drag().unwrap();

        assert!((committed.x - 5.0).abs() < f64::EPSILON);
        assert!((committed.y - 5.0).abs() < f64::EPSILON);
        assert!((committed.width - 5.0).abs() < f64::EPSILON);
        assert!((committed.height - 5.0).abs() < f64::EPSILON);
        assert!(engine.current_box().is_none());
    }

    #[test]
    fn test_small_box_is_discarded() {
        let mut engine = engine();
        assert!(engine
            .draw(Point::new(10.0, 10.0), Point::new(12.0, 30.0))
            .is_none());
        assert!(engine.boxes().is_empty());
        assert!(engine.current_box().is_none());
    }

    #[test]
    fn test_boxes_and_marks_stay_parallel() {
        let mut engine = engine();
        let a = engine.draw(Point::new(0.0, 0.0), Point::new(10.0, 10.0)).unwrap();
        let b = engine.draw(Point::new(20.0, 20.0), Point::new(40.0, 40.0)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(engine.marks()[0].question_no, "错题1");
        assert_eq!(engine.marks()[1].question_no, "错题2");

        assert!(engine.remove_box(a.id));
        assert!(!engine.remove_box(a.id));
        assert_eq!(engine.boxes().len(), 1);
        assert_eq!(engine.marks().len(), 1);
        assert_eq!(engine.marks()[0].id, b.id);

        assert_eq!(engine.undo_last().unwrap().id, b.id);
        assert!(engine.marks().is_empty());
    }

    #[test]
    fn test_leaving_surface_cancels_drag() {
        let mut engine = engine();
        engine.begin_drag(Point::new(50.0, 50.0));
        engine.update_drag(Point::new(101.0, 60.0));
        assert!(engine.current_box().is_none());
        assert!(engine.end_drag().is_none());

        engine.begin_drag(Point::new(-1.0, 50.0));
        assert!(engine.current_box().is_none());
    }

    #[test]
    fn test_restart_off_surface_drops_previous_drag() {
        let mut engine = engine();
        engine.begin_drag(Point::new(10.0, 10.0));
        engine.update_drag(Point::new(40.0, 40.0));
        assert!(engine.current_box().is_some());

        engine.begin_drag(Point::new(150.0, 10.0));
        assert!(engine.current_box().is_none());
        assert!(engine.end_drag().is_none());
        assert!(engine.boxes().is_empty());
        assert!(engine.marks().is_empty());
    }

    #[test]
    fn test_take_marks_clears_engine() {
        let mut engine = engine();
        engine.draw(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let marks = engine.take_marks();
        assert_eq!(marks.len(), 1);
        assert!(engine.boxes().is_empty());
        assert!(engine.marks().is_empty());
    }

    #[test]
    fn test_mark_wire_shape() {
        let mut engine = engine();
        engine.draw(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let json = serde_json::to_value(&engine.marks()[0]).unwrap();
        assert_eq!(json["questionNo"], "错题1");
        assert!(json["box"]["width"].is_number());
        assert_eq!(json["id"], json["box"]["id"]);
    }

    #[test]
    fn test_ids_shared_with_session_source() {
        let ids = IdSource::new();
        let mut engine =
            AnnotationEngine::new(ids.clone(), &Locale::default(), DEFAULT_MIN_BOX_SIZE);
        let before = ids.next_id();
        let committed = engine
            .draw(Point::new(0.0, 0.0), Point::new(10.0, 10.0))
            .unwrap();
        assert!(committed.id > before);
    }
}
