use serde::Serialize;

/// A detected face region in image coordinates, with optional landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point landmarks: left eye, right eye, nose, left and right mouth corners.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union; 0 when the boxes are disjoint or degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap_w = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let overlap_h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let intersection = overlap_w * overlap_h;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle clamped to a `width` × `height` image.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> PixelRect {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let clamp_x = |v: f32| v.round().clamp(0.0, max_x) as u32;
        let clamp_y = |v: f32| v.round().clamp(0.0, max_y) as u32;
        PixelRect {
            left: clamp_x(self.x),
            top: clamp_y(self.y),
            right: clamp_x(self.right()),
            bottom: clamp_y(self.bottom()),
        }
    }
}

/// Inclusive pixel rectangle of a face inside the uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left) + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top) + 1
    }
}

/// Face encoding (512 values for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]; 0 if either vector is all zeros.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (dot, norm_a, norm_b) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (a, b)| {
                (dot + a * b, na + a * a, nb + b * b)
            });

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// One face found in an image: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}
