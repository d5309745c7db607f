//! Directional shell extraction.
//!
//! Samples are binned by their direction from a reference origin on a
//! `theta_bins x phi_bins` grid over the sphere. Per bin the farthest sample
//! is the outer boundary. The inner (cavity) boundary is found by looking for
//! a radial gap that is large compared to the typical spacing of radii in
//! that bin; a bin whose radii are evenly spread from the origin outwards is
//! solid and reports no inner boundary.

use std::f64::consts::{PI, TAU};

use nalgebra::{Point3, Unit, Vector3};
use reach_ir::ShellConfig;
use tracing::debug;

use crate::error::{KernelError, Result};

/// Radii below this are treated as coincident with the origin.
const DEGENERATE_RADIUS: f64 = 1e-12;

/// Boundary sample with a surface normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShellPoint {
    /// Position in world space.
    pub position: Point3<f64>,
    /// Unit normal pointing away from the reachable volume.
    pub normal: Vector3<f64>,
}

/// Per-direction summary.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionBin {
    /// Linear bin index, `phi_index * theta_bins + theta_index`.
    pub index: usize,
    /// Samples that fell into the bin.
    pub samples: usize,
    /// Largest radius seen.
    pub outer_radius: f64,
    /// Radius of the cavity-facing boundary, if a cavity was detected.
    pub inner_radius: Option<f64>,
}

/// Output of [`extract_shell`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shell {
    /// One point per occupied bin, normal = bin-outward direction.
    pub outer: Vec<ShellPoint>,
    /// One point per bin with a detected cavity, normal toward the origin.
    pub inner: Vec<ShellPoint>,
    /// Occupied bins in ascending index order.
    pub bins: Vec<DirectionBin>,
}

/// Equal-angle partition of the direction sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionGrid {
    theta_bins: usize,
    phi_bins: usize,
}

impl DirectionGrid {
    /// Create a grid; both counts must be non-zero.
    pub fn new(theta_bins: usize, phi_bins: usize) -> Result<Self> {
        if theta_bins == 0 || phi_bins == 0 {
            return Err(KernelError::InvalidGrid {
                theta: theta_bins,
                phi: phi_bins,
            });
        }
        Ok(Self {
            theta_bins,
            phi_bins,
        })
    }

    /// Total number of bins.
    pub fn len(&self) -> usize {
        self.theta_bins * self.phi_bins
    }

    /// Always false; a grid has at least one bin.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Spherical angles of a unit direction: `theta = atan2(z, x)` and
    /// `phi = acos(y)`.
    pub fn angles(direction: &Vector3<f64>) -> (f64, f64) {
        let theta = direction.z.atan2(direction.x);
        let phi = direction.y.clamp(-1.0, 1.0).acos();
        (theta, phi)
    }

    /// `(theta_index, phi_index)` of a unit direction.
    pub fn cell(&self, direction: &Vector3<f64>) -> (usize, usize) {
        let (theta, phi) = Self::angles(direction);
        let t = ((theta + PI) / TAU * self.theta_bins as f64).floor();
        let p = (phi / PI * self.phi_bins as f64).floor();
        let t = (t.max(0.0) as usize).min(self.theta_bins - 1);
        let p = (p.max(0.0) as usize).min(self.phi_bins - 1);
        (t, p)
    }

    /// Linear bin index of a unit direction.
    pub fn bin_of(&self, direction: &Vector3<f64>) -> usize {
        let (t, p) = self.cell(direction);
        p * self.theta_bins + t
    }

    /// Unit direction through the center of bin `index`.
    pub fn bin_direction(&self, index: usize) -> Unit<Vector3<f64>> {
        let t = index % self.theta_bins;
        let p = index / self.theta_bins;
        let theta = -PI + (t as f64 + 0.5) * TAU / self.theta_bins as f64;
        let phi = (p as f64 + 0.5) * PI / self.phi_bins as f64;
        Unit::new_normalize(Vector3::new(
            phi.sin() * theta.cos(),
            phi.cos(),
            phi.sin() * theta.sin(),
        ))
    }
}

/// Radius of the cavity-facing boundary among one bin's radii.
///
/// Radii at or below `inner_min_radius` are discarded. With fewer than
/// `inner_min_samples` remaining, or no positive spacing between sorted
/// radii, nothing is reported. Otherwise the first step larger than
/// `inner_gap_factor` times the median positive step marks the gap, and the
/// radius just below it is returned. With an even number of steps the median
/// is the mean of the two middle ones.
pub fn detect_inner_radius(radii: &[f64], config: &ShellConfig) -> Option<f64> {
    let mut kept: Vec<f64> = radii
        .iter()
        .copied()
        .filter(|r| *r > config.inner_min_radius)
        .collect();
    if kept.len() < config.inner_min_samples as usize || kept.len() < 2 {
        return None;
    }
    kept.sort_by(f64::total_cmp);

    let mut deltas: Vec<f64> = kept
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .collect();
    if deltas.is_empty() {
        return None;
    }
    deltas.sort_by(f64::total_cmp);
    let mid = deltas.len() / 2;
    let median = if deltas.len() % 2 == 0 {
        (deltas[mid - 1] + deltas[mid]) / 2.0
    } else {
        deltas[mid]
    };
    if median <= 0.0 {
        return None;
    }

    let threshold = config.inner_gap_factor * median;
    (1..kept.len())
        .find(|&i| kept[i] - kept[i - 1] > threshold)
        .map(|i| kept[i - 1])
}

#[derive(Debug)]
struct BinAccum {
    radii: Vec<f64>,
    outer_radius: f64,
    outer_point: Point3<f64>,
    outer_normal: Vector3<f64>,
}

/// Reduce a sample cloud to its outer and inner boundary around `origin`.
///
/// The result depends only on the points and the configuration.
pub fn extract_shell(
    points: &[Point3<f64>],
    origin: &Point3<f64>,
    config: &ShellConfig,
) -> Result<Shell> {
    let grid = DirectionGrid::new(config.theta_bins as usize, config.phi_bins as usize)?;
    let mut bins: Vec<Option<BinAccum>> = (0..grid.len()).map(|_| None).collect();

    for point in points {
        let offset = point - origin;
        let radius = offset.norm();
        let direction = if radius > DEGENERATE_RADIUS {
            offset / radius
        } else {
            Vector3::y()
        };
        let slot = &mut bins[grid.bin_of(&direction)];
        let acc = slot.get_or_insert_with(|| BinAccum {
            radii: Vec::new(),
            outer_radius: f64::NEG_INFINITY,
            outer_point: *point,
            outer_normal: direction,
        });
        acc.radii.push(radius);
        if radius > acc.outer_radius {
            acc.outer_radius = radius;
            acc.outer_point = *point;
            acc.outer_normal = direction;
        }
    }

    let mut shell = Shell::default();
    for (index, acc) in bins.into_iter().enumerate() {
        let Some(acc) = acc else { continue };
        let inner_radius = detect_inner_radius(&acc.radii, config);

        shell.outer.push(ShellPoint {
            position: acc.outer_point,
            normal: acc.outer_normal,
        });
        if let Some(r) = inner_radius {
            let dir = grid.bin_direction(index);
            shell.inner.push(ShellPoint {
                position: origin + dir.into_inner() * r,
                normal: -dir.into_inner(),
            });
        }
        shell.bins.push(DirectionBin {
            index,
            samples: acc.radii.len(),
            outer_radius: acc.outer_radius,
            inner_radius,
        });
    }

    debug!(
        points = points.len(),
        bins = shell.bins.len(),
        cavities = shell.inner.len(),
        "shell extracted"
    );
    Ok(shell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(gap_factor: f64, min_samples: u32) -> ShellConfig {
        ShellConfig {
            theta_bins: 8,
            phi_bins: 4,
            inner_min_radius: 0.5,
            inner_gap_factor: gap_factor,
            inner_min_samples: min_samples,
        }
    }

    fn random_direction(rng: &mut StdRng) -> Vector3<f64> {
        loop {
            let v = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let n = v.norm();
            if n > 1e-3 && n <= 1.0 {
                return v / n;
            }
        }
    }

    #[test]
    fn binning_is_exhaustive_and_in_range() {
        let grid = DirectionGrid::new(13, 7).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let mut probes: Vec<Vector3<f64>> = (0..20_000).map(|_| random_direction(&mut rng)).collect();
        probes.extend([
            Vector3::x(),
            -Vector3::x(),
            Vector3::y(),
            -Vector3::y(),
            Vector3::z(),
            -Vector3::z(),
        ]);
        for dir in &probes {
            let (t, p) = grid.cell(dir);
            assert!(t < 13 && p < 7);
            assert_eq!(grid.bin_of(dir), p * 13 + t);
            assert!(grid.bin_of(dir) < grid.len());
        }
    }

    #[test]
    fn bin_direction_maps_back_to_its_bin() {
        let grid = DirectionGrid::new(12, 6).unwrap();
        for index in 0..grid.len() {
            assert_eq!(grid.bin_of(&grid.bin_direction(index)), index);
        }
    }

    #[test]
    fn gap_marks_edge_of_close_cluster() {
        let radii = [1.0, 1.02, 1.01, 5.0, 5.03];
        let inner = detect_inner_radius(&radii, &config(2.0, 3)).unwrap();
        assert_eq!(inner, 1.02);
    }

    #[test]
    fn even_step_count_uses_mean_of_middle_steps() {
        // Steps 0.01, 0.01, 0.03, 0.05: median 0.02, so 0.05 clears 2x.
        let radii = [1.0, 1.01, 1.02, 1.05, 1.10];
        assert_eq!(detect_inner_radius(&radii, &config(2.0, 3)), Some(1.05));
    }

    #[test]
    fn evenly_spread_radii_have_no_cavity() {
        let radii: Vec<f64> = (0..200).map(|i| 0.6 + i as f64 * 0.01).collect();
        assert_eq!(detect_inner_radius(&radii, &config(2.0, 3)), None);
    }

    #[test]
    fn too_few_or_identical_radii_have_no_cavity() {
        assert_eq!(detect_inner_radius(&[1.0, 1.01, 5.0], &config(2.0, 4)), None);
        assert_eq!(detect_inner_radius(&[2.0; 10], &config(2.0, 3)), None);
        // Radii under the threshold do not count toward the minimum.
        assert_eq!(
            detect_inner_radius(&[0.1, 0.2, 0.3, 1.0, 1.01, 5.0], &config(2.0, 4)),
            None
        );
    }

    #[test]
    fn single_direction_shell() {
        let origin = Point3::new(0.5, 0.0, 0.0);
        let dir = Vector3::new(1.0, 0.2, 0.3).normalize();
        let points: Vec<_> = [1.0, 1.02, 1.01, 5.0, 5.03]
            .iter()
            .map(|r| origin + dir * *r)
            .collect();
        let shell = extract_shell(&points, &origin, &config(2.0, 3)).unwrap();

        assert_eq!(shell.bins.len(), 1);
        let bin = &shell.bins[0];
        assert_eq!(bin.samples, 5);
        assert_relative_eq!(bin.outer_radius, 5.03, epsilon = 1e-9);
        assert_relative_eq!(bin.inner_radius.unwrap(), 1.02, epsilon = 1e-9);

        assert_eq!(shell.outer.len(), 1);
        assert_eq!(shell.outer[0].position, points[4]);
        assert_relative_eq!(shell.outer[0].normal, dir, epsilon = 1e-12);

        let grid = DirectionGrid::new(8, 4).unwrap();
        let center = grid.bin_direction(bin.index).into_inner();
        assert_eq!(shell.inner.len(), 1);
        assert_relative_eq!(
            (shell.inner[0].position - origin).norm(),
            1.02,
            epsilon = 1e-9
        );
        assert_relative_eq!(shell.inner[0].normal, -center, epsilon = 1e-12);
    }

    #[test]
    fn hollow_ball_reports_cavity_and_solid_ball_does_not() {
        let mut rng = StdRng::seed_from_u64(77);
        let origin = Point3::origin();
        let cfg = ShellConfig {
            theta_bins: 6,
            phi_bins: 3,
            inner_min_radius: 0.05,
            inner_gap_factor: 25.0,
            inner_min_samples: 20,
        };

        let mut hollow: Vec<_> = (0..30_000)
            .map(|_| origin + random_direction(&mut rng) * rng.gen_range(0.8..1.0))
            .collect();
        for _ in 0..3_000 {
            hollow.push(origin + random_direction(&mut rng) * rng.gen_range(0.1..0.12));
        }
        let shell = extract_shell(&hollow, &origin, &cfg).unwrap();
        assert_eq!(shell.outer.len(), 18);
        assert!(shell.inner.len() >= 15);
        for bin in &shell.bins {
            if let Some(r) = bin.inner_radius {
                assert!(r <= bin.outer_radius);
                assert!(r < 0.2);
            }
        }

        let solid: Vec<_> = (0..30_000)
            .map(|_| origin + random_direction(&mut rng) * rng.gen_range(0.06..1.0))
            .collect();
        let shell = extract_shell(&solid, &origin, &cfg).unwrap();
        assert_eq!(shell.outer.len(), 18);
        assert!(shell.inner.is_empty());
    }

    #[test]
    fn point_at_origin_is_binned() {
        let shell = extract_shell(&[Point3::origin()], &Point3::origin(), &config(2.0, 3)).unwrap();
        assert_eq!(shell.bins.len(), 1);
        assert_eq!(shell.bins[0].outer_radius, 0.0);
    }

    #[test]
    fn zero_bins_are_rejected() {
        let mut cfg = config(2.0, 3);
        cfg.phi_bins = 0;
        assert!(extract_shell(&[], &Point3::origin(), &cfg).is_err());
    }
}
