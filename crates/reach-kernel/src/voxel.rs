//! Spatial hash downsampling.

use std::collections::HashSet;

use nalgebra::Point3;

use crate::error::{KernelError, Result};

/// Integer voxel coordinates of `point` for a grid of edge `voxel_size`.
pub fn voxel_key(point: &Point3<f64>, voxel_size: f64) -> (i64, i64, i64) {
    (
        (point.x / voxel_size).round() as i64,
        (point.y / voxel_size).round() as i64,
        (point.z / voxel_size).round() as i64,
    )
}

/// Keep one point per occupied voxel.
///
/// The first point seen in a voxel wins and output order follows input
/// order, so the result is reproducible for a given input sequence.
pub fn voxel_downsample(points: &[Point3<f64>], voxel_size: f64) -> Result<Vec<Point3<f64>>> {
    if !(voxel_size.is_finite() && voxel_size > 0.0) {
        return Err(KernelError::InvalidVoxelSize(voxel_size));
    }

    let mut seen = HashSet::with_capacity(points.len() / 4);
    Ok(points
        .iter()
        .filter(|p| seen.insert(voxel_key(p, voxel_size)))
        .copied()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn first_point_in_voxel_wins() {
        let points = vec![
            Point3::new(0.01, 0.0, 0.0),
            Point3::new(-0.02, 0.03, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ];
        let out = voxel_downsample(&points, 0.1).unwrap();
        assert_eq!(out, vec![points[0], points[2]]);
    }

    #[test]
    fn rounding_puts_half_cells_on_either_side() {
        assert_eq!(voxel_key(&Point3::new(0.04, -0.06, 0.16), 0.1), (0, -1, 2));
    }

    #[test]
    fn dedup_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(11);
        let points: Vec<_> = (0..5000)
            .map(|_| Point3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()))
            .collect();
        let once = voxel_downsample(&points, 0.05).unwrap();
        let twice = voxel_downsample(&once, 0.05).unwrap();
        assert!(once.len() < points.len());
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_positive_voxel_size() {
        for size in [0.0, -1.0, f64::NAN] {
            assert!(voxel_downsample(&[Point3::origin()], size).is_err());
        }
    }
}
