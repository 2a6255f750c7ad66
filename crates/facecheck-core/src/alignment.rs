//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto a 150×150 face chip laid out like dlib's
//! `get_face_chip_details(det, 150, 0.25)`, which is what the ResNet
//! recognizer was trained on.

use image::{Rgb, RgbImage};

/// Chip edge length in pixels.
pub const ALIGNED_SIZE: u32 = 150;

/// Fraction of the face box added on each side of the chip.
const CHIP_PADDING: f32 = 0.25;

/// dlib mean face shape at the five SCRFD landmark positions, in unit
/// face-box coordinates: eye centres (mean of the six eye contour points),
/// nose tip, mouth corners.
const MEAN_FACE_LANDMARKS: [(f32, f32); 5] = [
    (0.225492, 0.215990), // left eye
    (0.754761, 0.215990), // right eye
    (0.490127, 0.515625), // nose
    (0.254149, 0.780233), // left mouth
    (0.726104, 0.780233), // right mouth
];

/// Mean face landmarks mapped into chip pixels.
pub(crate) fn reference_landmarks() -> [(f32, f32); 5] {
    let scale = ALIGNED_SIZE as f32 / (1.0 + 2.0 * CHIP_PADDING);
    MEAN_FACE_LANDMARKS.map(|(x, y)| ((x + CHIP_PADDING) * scale, (y + CHIP_PADDING) * scale))
}

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Centering both point sets decouples translation; scale·cos and scale·sin
    /// then fall out of two dot products over the centered coordinates.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut var = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (u, v) = (sx - msx, sy - msy);
            let (p, q) = (dx - mdx, dy - mdy);
            var += u * u + v * v;
            dot += u * p + v * q;
            cross += u * q - v * p;
        }

        if var < 1e-12 {
            // Degenerate landmarks: fall back to a pure translation.
            return Self { a: 1.0, b: 0.0, tx: mdx - msx, ty: mdy - msy };
        }

        let a = dot / var;
        let b = cross / var;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        // inverse rotation-scale applied to -t
        let tx = -(ia * self.tx - ib * self.ty);
        let ty = -(ib * self.tx + ia * self.ty);
        Some(Self { a: ia, b: ib, tx, ty })
    }
}

/// Bilinear sample with black outside the image.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (w, h) = (image.width() as i64, image.height() as i64);

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let Rgb(c) = *image.get_pixel(px as u32, py as u32);
            [c[0] as f32, c[1] as f32, c[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = texel(x0, y0);
    let tr = texel(x0 + 1, y0);
    let bl = texel(x0, y0 + 1);
    let br = texel(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] + (tr[c] - tl[c]) * fx;
        let bottom = bl[c] + (br[c] - bl[c]) * fx;
        out[c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Align a detected face to a 150×150 RGB chip for the recognizer.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let forward = Similarity::estimate(landmarks, &reference_landmarks());
    let Some(backward) = forward.inverse() else {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = backward.apply((ox as f32, oy as f32));
        sample_bilinear(image, sx, sy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() < tol, "{a} vs {b}");
    }

    #[test]
    fn test_reference_landmarks_in_chip_pixels() {
        let r = reference_landmarks();
        assert_close(r[0].0, 47.549, 1e-2);
        assert_close(r[0].1, 46.599, 1e-2);
        assert_close(r[2].0, 74.013, 1e-2);
        assert_close(r[4].1, 103.023, 1e-2);
        assert!(r.iter().all(|&(x, y)| x > 0.0 && y > 0.0 && x < 150.0 && y < 150.0));
    }

    #[test]
    fn test_identity_estimate() {
        let t = Similarity::estimate(&reference_landmarks(), &reference_landmarks());
        assert_close(t.a, 1.0, 1e-4);
        assert_close(t.b, 0.0, 1e-4);
        assert_close(t.tx, 0.0, 1e-3);
        assert_close(t.ty, 0.0, 1e-3);
    }

    #[test]
    fn test_scaled_estimate() {
        let src = reference_landmarks().map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &reference_landmarks());
        assert_close(t.a, 0.5, 1e-4);
        assert_close(t.b, 0.0, 1e-4);
    }

    #[test]
    fn test_rotated_estimate() {
        // 90° rotation about the origin: (x, y) -> (-y, x), i.e. a = 0, b = 1.
        let src = reference_landmarks();
        let dst = src.map(|(x, y)| (-y, x));
        let t = Similarity::estimate(&src, &dst);
        assert_close(t.a, 0.0, 1e-4);
        assert_close(t.b, 1.0, 1e-4);
        let (px, py) = t.apply(src[2]);
        assert_close(px, dst[2].0, 1e-2);
        assert_close(py, dst[2].1, 1e-2);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -7.0 };
        let inv = t.inverse().unwrap();
        let p = (33.0, 71.0);
        let (x, y) = inv.apply(t.apply(p));
        assert_close(x, p.0, 1e-3);
        assert_close(y, p.1, 1e-3);
    }

    #[test]
    fn test_degenerate_landmarks_translate_only() {
        let src = [(10.0, 10.0); 5];
        let t = Similarity::estimate(&src, &reference_landmarks());
        assert_eq!(t.a, 1.0);
        assert_eq!(t.b, 0.0);
    }

    #[test]
    fn test_align_output_size() {
        let img = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&img, &reference_landmarks());
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.get_pixel(75, 75), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut img = RgbImage::new(240, 240);
        // Same face, 1.2× larger and shifted inside the source image.
        let landmarks = reference_landmarks().map(|(x, y)| (x * 1.2 + 20.0, y * 1.2 + 10.0));
        let (ex, ey) = (landmarks[0].0.round() as u32, landmarks[0].1.round() as u32);
        // Bright red patch around the left eye.
        for y in ey - 2..=ey + 2 {
            for x in ex - 2..=ex + 2 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&img, &landmarks);
        let (rx, ry) = reference_landmarks()[0];
        let (rx, ry) = (rx.round() as u32, ry.round() as u32);

        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "expected red near ({rx}, {ry}), max={brightest}");
        // Green channel stays dark: channels are warped independently.
        assert!(aligned.get_pixel(rx, ry)[1] < 10);
    }
}
