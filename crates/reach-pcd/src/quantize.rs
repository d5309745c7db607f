//! Per-stream 16-bit quantization.

use nalgebra::Point3;

/// Largest quantized value.
pub const QUANT_MAX: f64 = 65535.0;

/// Extent floor for an axis with zero spread.
pub const MIN_EXTENT: f64 = 1e-9;

/// Largest f32 not above `v`.
fn f32_floor(v: f64) -> f32 {
    let f = v as f32;
    if f as f64 <= v {
        f
    } else if f > 0.0 {
        f32::from_bits(f.to_bits() - 1)
    } else if f == 0.0 {
        -f32::from_bits(1)
    } else {
        f32::from_bits(f.to_bits() + 1)
    }
}

/// Smallest positive f32 not below `v`, for `v > 0`.
fn f32_ceil(v: f64) -> f32 {
    let f = v as f32;
    if f as f64 >= v {
        f
    } else {
        f32::from_bits(f.to_bits() + 1)
    }
}

/// Bounding box origin and per-axis step shared by every frame of a stream.
///
/// Values are stored as f32, exactly as they travel in the frame header.
/// `min` is rounded down and `scale` up when narrowing from f64, so every
/// input point lies inside `[min, min + 65535 * scale]` and dequantizes to
/// within half a step of its original value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    /// Bounding box minimum.
    pub min: [f32; 3],
    /// Axis step, always strictly positive.
    pub scale: [f32; 3],
}

impl Default for Quantization {
    fn default() -> Self {
        let step = f32_ceil(MIN_EXTENT / QUANT_MAX);
        Self {
            min: [0.0; 3],
            scale: [step; 3],
        }
    }
}

impl Quantization {
    /// Quantization covering the axis-aligned bounding box of `points`.
    ///
    /// An empty slice yields the default (origin, minimum step).
    pub fn from_points(points: &[Point3<f64>]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        let mut lo = first.coords;
        let mut hi = first.coords;
        for p in &points[1..] {
            lo = lo.inf(&p.coords);
            hi = hi.sup(&p.coords);
        }

        let mut min = [0.0f32; 3];
        let mut scale = [0.0f32; 3];
        for axis in 0..3 {
            min[axis] = f32_floor(lo[axis]);
            let extent = (hi[axis] - min[axis] as f64).max(MIN_EXTENT);
            scale[axis] = f32_ceil(extent / QUANT_MAX);
        }
        Self { min, scale }
    }

    /// Quantize one point: `round((coord - min) / scale)` clamped to u16.
    pub fn quantize(&self, point: &Point3<f64>) -> [u16; 3] {
        let mut q = [0u16; 3];
        for axis in 0..3 {
            let v = (point[axis] - self.min[axis] as f64) / self.scale[axis] as f64;
            q[axis] = v.round().clamp(0.0, QUANT_MAX) as u16;
        }
        q
    }

    /// Reconstruct a point from its quantized coordinates.
    pub fn dequantize(&self, q: [u16; 3]) -> Point3<f64> {
        Point3::new(
            self.min[0] as f64 + q[0] as f64 * self.scale[0] as f64,
            self.min[1] as f64 + q[1] as f64 * self.scale[1] as f64,
            self.min[2] as f64 + q[2] as f64 * self.scale[2] as f64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_spans_extent() {
        let points = [Point3::new(-1.0, 0.0, 2.0), Point3::new(1.0, 0.5, 2.0)];
        let quant = Quantization::from_points(&points);
        assert_eq!(quant.min, [-1.0, 0.0, 2.0]);
        assert!((quant.scale[0] as f64 * QUANT_MAX - 2.0).abs() < 1e-6);
        assert!((quant.scale[1] as f64 * QUANT_MAX - 0.5).abs() < 1e-6);
        assert_eq!(quant.quantize(&points[0]), [0, 0, 0]);
        assert_eq!(quant.quantize(&points[1])[0], 65535);
        assert_eq!(quant.quantize(&points[1])[1], 65535);
    }

    #[test]
    fn zero_extent_axis_keeps_positive_scale() {
        let points = [Point3::new(2.0, 3.0, -4.0); 5];
        let quant = Quantization::from_points(&points);
        for axis in 0..3 {
            assert!(quant.scale[axis] > 0.0);
        }
        let q = quant.quantize(&points[0]);
        assert_eq!(q, [0, 0, 0]);
        assert_eq!(quant.dequantize(q), points[0]);
        assert!(Quantization::default().scale.iter().all(|s| *s > 0.0));
    }

    #[test]
    fn narrowing_never_excludes_input() {
        // 0.1 is not representable in f32; its nearest f32 is above it.
        let points = [Point3::new(0.1, 1000.0, -0.3), Point3::new(0.1001, 1000.001, -0.2999)];
        let quant = Quantization::from_points(&points);
        for p in &points {
            for axis in 0..3 {
                let offset = p[axis] - quant.min[axis] as f64;
                assert!(offset >= 0.0);
                assert!(offset <= quant.scale[axis] as f64 * QUANT_MAX);
            }
            let back = quant.dequantize(quant.quantize(p));
            for axis in 0..3 {
                assert!((back[axis] - p[axis]).abs() <= quant.scale[axis] as f64 / 2.0 + 1e-12);
            }
        }
    }

    #[test]
    fn floor_and_ceil_bracket_value() {
        for v in [0.1, -0.1, 1e-20, -1e-20, 0.0, 123.456, -98765.4321] {
            assert!(f32_floor(v) as f64 <= v);
            if v > 0.0 {
                assert!(f32_ceil(v) as f64 >= v);
            }
        }
    }
}
