/// Detected object in normalized (0..1) frame coordinates.
///
/// Coordinates are independent of frame size; pixel mapping happens only
/// in the overlay renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_name: String,
    pub confidence: f32,
}

impl BoundingBox {
    /// Build a box, clamping coordinates and confidence into [0, 1].
    ///
    /// Returns `None` when the clamped box has no area or a coordinate is NaN.
    pub fn new(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        class_name: impl Into<String>,
        confidence: f32,
    ) -> Option<Self> {
        let unit = |v: f32| v.clamp(0.0, 1.0);
        if [x1, y1, x2, y2, confidence].iter().any(|v| v.is_nan()) {
            return None;
        }
        let bbox = Self {
            x1: unit(x1),
            y1: unit(y1),
            x2: unit(x2),
            y2: unit(y2),
            class_name: class_name.into(),
            confidence: unit(confidence),
        };
        bbox.is_valid().then_some(bbox)
    }

    pub fn is_valid(&self) -> bool {
        let unit = |v: f32| (0.0..=1.0).contains(&v);
        unit(self.x1)
            && unit(self.y1)
            && unit(self.x2)
            && unit(self.y2)
            && unit(self.confidence)
            && self.x1 < self.x2
            && self.y1 < self.y2
    }
}

/// Outcome of a successful detection.
///
/// `Empty` is a normal result and distinct from a failed detection, which
/// is reported as a `DetectionError` instead.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DetectionResult {
    /// Ordered, non-empty list of boxes.
    Boxes(Vec<BoundingBox>),
    #[default]
    Empty,
}

impl DetectionResult {
    /// Wrap a list of boxes, mapping an empty list to `Empty`.
    pub fn from_boxes(boxes: Vec<BoundingBox>) -> Self {
        if boxes.is_empty() {
            Self::Empty
        } else {
            Self::Boxes(boxes)
        }
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        match self {
            Self::Boxes(boxes) => boxes,
            Self::Empty => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Drop invalid boxes and boxes below `min_confidence`, keeping order.
    pub fn filter_confidence(self, min_confidence: f32) -> Self {
        match self {
            Self::Boxes(boxes) => Self::from_boxes(
                boxes
                    .into_iter()
                    .filter(|b| b.is_valid() && b.confidence >= min_confidence)
                    .collect(),
            ),
            Self::Empty => Self::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_into_unit_range() {
        let bbox = BoundingBox::new(-0.2, 0.1, 1.4, 0.9, "car", 1.5).unwrap();
        assert_eq!((bbox.x1, bbox.x2, bbox.confidence), (0.0, 1.0, 1.0));
    }

    #[test]
    fn new_rejects_degenerate_boxes() {
        assert!(BoundingBox::new(0.5, 0.1, 0.5, 0.9, "car", 0.9).is_none());
        assert!(BoundingBox::new(0.6, 0.1, 0.2, 0.9, "car", 0.9).is_none());
        assert!(BoundingBox::new(f32::NAN, 0.1, 0.2, 0.9, "car", 0.9).is_none());
    }

    #[test]
    fn empty_box_list_is_empty_result() {
        assert_eq!(DetectionResult::from_boxes(vec![]), DetectionResult::Empty);
    }

    #[test]
    fn confidence_filter_keeps_order_and_empties() {
        let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5, "a", 0.9).unwrap();
        let b = BoundingBox::new(0.1, 0.1, 0.6, 0.6, "b", 0.1).unwrap();
        let c = BoundingBox::new(0.2, 0.2, 0.7, 0.7, "c", 0.5).unwrap();
        let result = DetectionResult::from_boxes(vec![a.clone(), b.clone(), c.clone()]);

        let filtered = result.filter_confidence(0.4);
        assert_eq!(filtered.boxes(), &[a, c][..]);

        let none = DetectionResult::from_boxes(vec![b]).filter_confidence(0.4);
        assert!(none.is_empty());
    }
}
