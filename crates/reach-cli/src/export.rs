//! ASCII point cloud writers.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Point3;
use reach_kernel::ShellPoint;

/// Write one `x y z` line per point.
pub fn write_xyz<W: Write>(out: &mut W, points: &[Point3<f64>]) -> std::io::Result<()> {
    for p in points {
        writeln!(out, "{:.6} {:.6} {:.6}", p.x, p.y, p.z)?;
    }
    Ok(())
}

/// Write one `x y z nx ny nz` line per shell point.
pub fn write_xyzn<W: Write>(out: &mut W, points: &[ShellPoint]) -> std::io::Result<()> {
    for sp in points {
        let (p, n) = (sp.position, sp.normal);
        writeln!(
            out,
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            p.x, p.y, p.z, n.x, n.y, n.z
        )?;
    }
    Ok(())
}

/// Write points to `path` as `x y z`.
pub fn save_xyz(path: &Path, points: &[Point3<f64>]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_xyz(&mut out, points)?;
    out.flush()?;
    Ok(())
}

/// Write shell points to `path` as `x y z nx ny nz`.
pub fn save_xyzn(path: &Path, points: &[ShellPoint]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_xyzn(&mut out, points)?;
    out.flush()?;
    Ok(())
}
