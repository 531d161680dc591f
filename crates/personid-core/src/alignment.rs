//! Face alignment for ArcFace.
//!
//! A four-parameter similarity (uniform scale, rotation, translation) is
//! fitted from the five detected landmarks onto the InsightFace template, and
//! the photo is resampled through it into a 112×112 crop.

use image::{Rgb, RgbImage};

pub const ALIGNED_SIZE: usize = 112;

/// InsightFace landmark template for a 112×112 crop.
const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares fit mapping `from` onto `to`.
    ///
    /// Centring both point sets removes the translation, leaving closed forms
    /// for `a` and `b`. Coincident source points give the identity.
    fn fit(from: &[(f32, f32); 5], to: &[(f32, f32); 5]) -> Self {
        let (fx, fy) = centroid(from);
        let (tx, ty) = centroid(to);

        let (mut spread, mut dot, mut cross) = (0.0f32, 0.0f32, 0.0f32);
        for (&(x, y), &(u, v)) in from.iter().zip(to) {
            let (x, y, u, v) = (x - fx, y - fy, u - tx, v - ty);
            spread += x * x + y * y;
            dot += x * u + y * v;
            cross += x * v - y * u;
        }
        if spread < 1e-12 {
            return Self::IDENTITY;
        }

        let (a, b) = (dot / spread, cross / spread);
        Similarity {
            a,
            b,
            tx: tx - (a * fx - b * fy),
            ty: ty - (b * fx + a * fy),
        }
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// The reverse mapping, or `None` when the scale is zero.
    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Similarity {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

fn centroid(points: &[(f32, f32); 5]) -> (f32, f32) {
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    let n = points.len() as f32;
    (sx / n, sy / n)
}

/// Resample `image` through `transform` into a `size` × `size` crop.
///
/// Bilinear per channel; samples outside the photo are black.
fn warp(image: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    let Some(back) = transform.inverse() else {
        return RgbImage::new(size, size);
    };

    let (w, h) = (image.width() as i64, image.height() as i64);
    let texel = |x: i64, y: i64| -> [f32; 3] {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            image.get_pixel(x as u32, y as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let (sx, sy) = back.apply((ox as f32, oy as f32));
        let (x0, y0) = (sx.floor(), sy.floor());
        let (fx, fy) = (sx - x0, sy - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let corners = [
            (texel(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (texel(x0 + 1, y0), fx * (1.0 - fy)),
            (texel(x0, y0 + 1), (1.0 - fx) * fy),
            (texel(x0 + 1, y0 + 1), fx * fy),
        ];
        Rgb(std::array::from_fn(|c| {
            let value: f32 = corners.iter().map(|(px, weight)| px[c] * weight).sum();
            value.round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Warp the face with these landmarks into the canonical 112×112 ArcFace crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::fit(landmarks, &TEMPLATE_112);
    warp(image, &transform, ALIGNED_SIZE as u32)
}
