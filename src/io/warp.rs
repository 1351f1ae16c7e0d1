//! Resampling, resizing and reprojection of rasters onto another grid.
//!
//! Source pixels are located for each target pixel centre through one of
//! three transforms: the inverse of an affine geotransform, a least-squares
//! polynomial fitted to the geolocation grid, or a thin plate spline through
//! a subset of the geolocation grid used as ground control points.

use crate::io::raster::{bilinear_f64, Band, Geolocation, RasterHandle};
use crate::types::{BoundingBox, GeoTransform, RasterArray, WindError, WindResult};
use ndarray::Array2;
use num_traits::Float;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Control points per axis for the thin plate spline fit
const TPS_POINTS_PER_AXIS: usize = 12;

/// Control points per axis for the polynomial fit
const POLY_POINTS_PER_AXIS: usize = 40;

/// Resampling algorithm for reprojection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleAlg {
    /// Nearest neighbour (preserves exact values)
    Nearest,
    #[default]
    Bilinear,
    /// Catmull-Rom bicubic
    Cubic,
    /// Block average when resizing, bilinear when reprojecting
    Average,
}

impl ResampleAlg {
    /// GDAL-style numeric codes: 0 nearest, 1 bilinear, 2 cubic, 5 average
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Nearest),
            1 => Some(Self::Bilinear),
            2 | 3 => Some(Self::Cubic),
            5 | -1 => Some(Self::Average),
            _ => None,
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nearest" | "near" => Some(Self::Nearest),
            "bilinear" => Some(Self::Bilinear),
            "cubic" | "bicubic" => Some(Self::Cubic),
            "average" => Some(Self::Average),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResampleAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
            Self::Cubic => write!(f, "cubic"),
            Self::Average => write!(f, "average"),
        }
    }
}

/// Sample `data` at a fractional pixel-centre index.
///
/// Positions further than half a pixel outside the grid give NaN.
pub fn sample(data: &RasterArray, row: f64, col: f64, alg: ResampleAlg) -> f32 {
    let (rows, cols) = data.dim();
    if !row.is_finite()
        || !col.is_finite()
        || row < -0.5
        || col < -0.5
        || row > rows as f64 - 0.5
        || col > cols as f64 - 0.5
    {
        return f32::NAN;
    }
    let row = row.clamp(0.0, (rows - 1) as f64);
    let col = col.clamp(0.0, (cols - 1) as f64);

    match alg {
        ResampleAlg::Nearest => nearest_interpolate(data, row, col),
        ResampleAlg::Bilinear | ResampleAlg::Average => bilinear_interpolate(data, row, col),
        ResampleAlg::Cubic => cubic_interpolate(data, row, col),
    }
}

fn nearest_interpolate(data: &RasterArray, row: f64, col: f64) -> f32 {
    data[[row.round() as usize, col.round() as usize]]
}

fn bilinear_interpolate(data: &RasterArray, row: f64, col: f64) -> f32 {
    let (rows, cols) = data.dim();
    let r0 = row.floor() as usize;
    let c0 = col.floor() as usize;
    let r1 = (r0 + 1).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);

    let fr = (row - r0 as f64) as f32;
    let fc = (col - c0 as f64) as f32;

    let v00 = data[[r0, c0]];
    let v01 = data[[r0, c1]];
    let v10 = data[[r1, c0]];
    let v11 = data[[r1, c1]];

    // Any NaN corner makes the result undefined
    if v00.is_nan() || v01.is_nan() || v10.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 * (1.0 - fc) + v01 * fc;
    let bottom = v10 * (1.0 - fc) + v11 * fc;
    top * (1.0 - fr) + bottom * fr
}

fn cubic_interpolate(data: &RasterArray, row: f64, col: f64) -> f32 {
    let (rows, cols) = data.dim();
    let ri = row.floor() as i64;
    let ci = col.floor() as i64;
    let fr = (row - ri as f64) as f32;
    let fc = (col - ci as f64) as f32;

    let mut values = [[0.0f32; 4]; 4];
    for j in 0..4 {
        for i in 0..4 {
            let r = (ri + j as i64 - 1).clamp(0, rows as i64 - 1) as usize;
            let c = (ci + i as i64 - 1).clamp(0, cols as i64 - 1) as usize;
            values[j][i] = data[[r, c]];
            if values[j][i].is_nan() {
                return bilinear_interpolate(data, row, col);
            }
        }
    }

    let mut row_values = [0.0f32; 4];
    for j in 0..4 {
        row_values[j] = cubic_1d(values[j][0], values[j][1], values[j][2], values[j][3], fc);
    }
    cubic_1d(row_values[0], row_values[1], row_values[2], row_values[3], fr)
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

/// Mean of the non-NaN values; NaN when there are none
fn nan_mean<T: Float>(values: impl Iterator<Item = T>) -> T {
    let mut sum = T::zero();
    let mut count = 0usize;
    for v in values.filter(|v| !v.is_nan()) {
        sum = sum + v;
        count += 1;
    }
    if count == 0 {
        T::nan()
    } else {
        sum / T::from(count).unwrap_or_else(T::one)
    }
}

/// Solve the dense system `a x = b` for several right hand sides
/// (Gaussian elimination with partial pivoting).
fn solve_dense(mut a: Vec<f64>, n: usize, mut rhs: Vec<Vec<f64>>) -> WindResult<Vec<Vec<f64>>> {
    for k in 0..n {
        let pivot = (k..n)
            .max_by(|&i, &j| a[i * n + k].abs().total_cmp(&a[j * n + k].abs()))
            .unwrap_or(k);
        if a[pivot * n + k].abs() < 1e-12 {
            return Err(WindError::Processing(
                "singular system while fitting geolocation transform".to_string(),
            ));
        }
        if pivot != k {
            for col in 0..n {
                a.swap(k * n + col, pivot * n + col);
            }
            for b in rhs.iter_mut() {
                b.swap(k, pivot);
            }
        }
        for i in (k + 1)..n {
            let factor = a[i * n + k] / a[k * n + k];
            if factor == 0.0 {
                continue;
            }
            for col in k..n {
                a[i * n + col] -= factor * a[k * n + col];
            }
            for b in rhs.iter_mut() {
                b[i] -= factor * b[k];
            }
        }
    }
    for b in rhs.iter_mut() {
        for i in (0..n).rev() {
            let mut acc = b[i];
            for col in (i + 1)..n {
                acc -= a[i * n + col] * b[col];
            }
            b[i] = acc / a[i * n + i];
        }
    }
    Ok(rhs)
}

/// Centring and scaling of lon/lat for well-conditioned fits
#[derive(Debug, Clone, Copy)]
struct Normalization {
    lon0: f64,
    lat0: f64,
    scale: f64,
}

impl Normalization {
    fn from_points(points: &[(f64, f64)]) -> Self {
        let n = points.len().max(1) as f64;
        let lon0 = points.iter().map(|p| p.0).sum::<f64>() / n;
        let lat0 = points.iter().map(|p| p.1).sum::<f64>() / n;
        let scale = points
            .iter()
            .map(|p| (p.0 - lon0).abs().max((p.1 - lat0).abs()))
            .fold(0.0, f64::max)
            .max(1e-9);
        Self { lon0, lat0, scale }
    }

    fn apply(&self, lon: f64, lat: f64) -> (f64, f64) {
        ((lon - self.lon0) / self.scale, (lat - self.lat0) / self.scale)
    }
}

fn poly_terms(x: f64, y: f64, order2: bool) -> Vec<f64> {
    if order2 {
        vec![1.0, x, y, x * x, x * y, y * y]
    } else {
        vec![1.0, x, y]
    }
}

/// Thin plate spline radial basis, r² ln r written in terms of r²
fn tps_kernel(r2: f64) -> f64 {
    if r2 <= 0.0 {
        0.0
    } else {
        0.5 * r2 * r2.ln()
    }
}

#[derive(Debug, Clone)]
struct ThinPlateSpline {
    norm: Normalization,
    points: Vec<(f64, f64)>,
    /// Per output: n kernel weights followed by 3 affine coefficients
    coefficients: [Vec<f64>; 2],
}

impl ThinPlateSpline {
    fn fit(points: &[(f64, f64)], rows: &[f64], cols: &[f64]) -> WindResult<Self> {
        let norm = Normalization::from_points(points);
        let pts: Vec<(f64, f64)> = points.iter().map(|p| norm.apply(p.0, p.1)).collect();
        let n = pts.len();
        let m = n + 3;

        let mut a = vec![0.0; m * m];
        for i in 0..n {
            for j in 0..n {
                let dx = pts[i].0 - pts[j].0;
                let dy = pts[i].1 - pts[j].1;
                a[i * m + j] = tps_kernel(dx * dx + dy * dy);
            }
            let p = [1.0, pts[i].0, pts[i].1];
            for (k, v) in p.iter().enumerate() {
                a[i * m + n + k] = *v;
                a[(n + k) * m + i] = *v;
            }
        }

        let mut b_row = rows.to_vec();
        b_row.extend([0.0; 3]);
        let mut b_col = cols.to_vec();
        b_col.extend([0.0; 3]);

        let mut solved = solve_dense(a, m, vec![b_row, b_col])?;
        let col_coef = solved.pop().unwrap_or_default();
        let row_coef = solved.pop().unwrap_or_default();
        Ok(Self {
            norm,
            points: pts,
            coefficients: [row_coef, col_coef],
        })
    }

    fn evaluate(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = self.norm.apply(lon, lat);
        let n = self.points.len();
        let mut out = [0.0f64; 2];
        for (k, coef) in self.coefficients.iter().enumerate() {
            let mut v = coef[n] + coef[n + 1] * x + coef[n + 2] * y;
            for (i, p) in self.points.iter().enumerate() {
                let dx = x - p.0;
                let dy = y - p.1;
                v += coef[i] * tps_kernel(dx * dx + dy * dy);
            }
            out[k] = v;
        }
        (out[0], out[1])
    }
}

/// Maps geographic positions onto fractional source pixel-centre indices
#[derive(Debug, Clone)]
enum PixelLocator {
    Affine(GeoTransform),
    Polynomial {
        norm: Normalization,
        order2: bool,
        row: Vec<f64>,
        col: Vec<f64>,
    },
    Spline(ThinPlateSpline),
}

impl PixelLocator {
    fn for_geolocation(
        geolocation: &Geolocation,
        shape: (usize, usize),
        use_thin_plate_spline: bool,
    ) -> WindResult<Self> {
        let (longitude, latitude) = match geolocation {
            Geolocation::Affine(gt) => return Ok(Self::Affine(*gt)),
            Geolocation::Grids { longitude, latitude } => (longitude, latitude),
        };

        let per_axis = if use_thin_plate_spline {
            TPS_POINTS_PER_AXIS
        } else {
            POLY_POINTS_PER_AXIS
        };
        let row_idx = control_indices(shape.0, per_axis);
        let col_idx = control_indices(shape.1, per_axis);

        let mut points = Vec::new();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for &r in &row_idx {
            for &c in &col_idx {
                let (lon, lat) = (longitude[[r, c]], latitude[[r, c]]);
                if lon.is_finite() && lat.is_finite() {
                    points.push((lon, lat));
                    rows.push(r as f64);
                    cols.push(c as f64);
                }
            }
        }
        if points.len() < 3 {
            return Err(WindError::Processing(
                "too few valid geolocation points to build a transform".to_string(),
            ));
        }

        if use_thin_plate_spline {
            log::debug!("Fitting thin plate spline through {} control points", points.len());
            return Ok(Self::Spline(ThinPlateSpline::fit(&points, &rows, &cols)?));
        }

        let norm = Normalization::from_points(&points);
        let order2 = points.len() >= 6;
        let terms = if order2 { 6 } else { 3 };
        let mut ata = vec![0.0; terms * terms];
        let mut atb_row = vec![0.0; terms];
        let mut atb_col = vec![0.0; terms];
        for (i, p) in points.iter().enumerate() {
            let (x, y) = norm.apply(p.0, p.1);
            let t = poly_terms(x, y, order2);
            for a in 0..terms {
                for b in 0..terms {
                    ata[a * terms + b] += t[a] * t[b];
                }
                atb_row[a] += t[a] * rows[i];
                atb_col[a] += t[a] * cols[i];
            }
        }
        let mut solved = solve_dense(ata, terms, vec![atb_row, atb_col])?;
        let col = solved.pop().unwrap_or_default();
        let row = solved.pop().unwrap_or_default();
        Ok(Self::Polynomial { norm, order2, row, col })
    }

    fn locate(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        match self {
            Self::Affine(gt) => gt.invert(lon, lat).map(|(c, r)| (r - 0.5, c - 0.5)),
            Self::Polynomial { norm, order2, row, col } => {
                let (x, y) = norm.apply(lon, lat);
                let t = poly_terms(x, y, *order2);
                let r: f64 = t.iter().zip(row).map(|(a, b)| a * b).sum();
                let c: f64 = t.iter().zip(col).map(|(a, b)| a * b).sum();
                Some((r, c))
            }
            Self::Spline(tps) => Some(tps.evaluate(lon, lat)),
        }
    }
}

/// Evenly spaced indices over `0..len`, always including both ends
fn control_indices(len: usize, count: usize) -> Vec<usize> {
    if len <= count {
        return (0..len).collect();
    }
    let mut idx: Vec<usize> = (0..count)
        .map(|i| ((i as f64) * (len - 1) as f64 / (count - 1) as f64).round() as usize)
        .collect();
    idx.dedup();
    idx
}

impl RasterHandle {
    /// Reproject every band onto the grid of `target`, in place.
    pub fn reproject(
        &mut self,
        target: &RasterHandle,
        alg: ResampleAlg,
        use_thin_plate_spline: bool,
    ) -> WindResult<()> {
        log::info!(
            "Reprojecting {} ({}x{}) onto {} ({}x{}) with {} resampling",
            self.name(),
            self.shape().0,
            self.shape().1,
            target.name(),
            target.shape().0,
            target.shape().1,
            alg
        );

        let locator =
            PixelLocator::for_geolocation(self.geolocation(), self.shape(), use_thin_plate_spline)?;
        let (rows, cols) = target.shape();
        let target_geo = target.geolocation();
        let extent = self.footprint();
        let locate = |i: usize| {
            let (lon, lat) = target_geo.lonlat(i / cols, i % cols);
            locator.locate(extent.wrap_lon(lon), lat)
        };

        #[cfg(feature = "parallel")]
        let coords: Vec<Option<(f64, f64)>> = (0..rows * cols).into_par_iter().map(locate).collect();
        #[cfg(not(feature = "parallel"))]
        let coords: Vec<Option<(f64, f64)>> = (0..rows * cols).map(locate).collect();

        let bands = self
            .bands()
            .iter()
            .map(|band| {
                let data = Array2::from_shape_fn((rows, cols), |(r, c)| match coords[r * cols + c] {
                    Some((sr, sc)) => sample(&band.data, sr, sc, alg),
                    None => f32::NAN,
                });
                Band::new(band.descriptor.clone(), data)
            })
            .collect();

        self.set_grid(target.shape(), target_geo.clone(), bands);
        Ok(())
    }

    /// Copy of this raster reprojected onto `target`
    pub fn reprojected(
        &self,
        target: &RasterHandle,
        alg: ResampleAlg,
        use_thin_plate_spline: bool,
    ) -> WindResult<RasterHandle> {
        let mut copy = self.clone();
        copy.reproject(target, alg, use_thin_plate_spline)?;
        Ok(copy)
    }

    /// Resample to an isotropic pixel size in meters by block averaging.
    ///
    /// `0` keeps the native resolution and the grid is never refined.
    /// Returns the applied (row, col) reduction factors.
    pub fn resize(&mut self, pixel_size_m: f64) -> WindResult<(f64, f64)> {
        if pixel_size_m < 0.0 || !pixel_size_m.is_finite() {
            return Err(WindError::Processing(format!(
                "invalid pixel size {} m",
                pixel_size_m
            )));
        }
        if pixel_size_m == 0.0 {
            return Ok((1.0, 1.0));
        }

        let native = self.pixel_spacing_m();
        if !native.is_finite() {
            return Err(WindError::Processing(format!(
                "cannot determine the native pixel spacing of {}",
                self.name()
            )));
        }
        if native <= 0.0 || pixel_size_m <= native {
            log::warn!(
                "Requested pixel size {} m is not coarser than native {:.1} m for {}, keeping native grid",
                pixel_size_m,
                native,
                self.name()
            );
            return Ok((1.0, 1.0));
        }

        let factor = pixel_size_m / native;
        let (rows, cols) = self.shape();
        let new_rows = ((rows as f64 / factor).round() as usize).max(1);
        let new_cols = ((cols as f64 / factor).round() as usize).max(1);
        let fr = rows as f64 / new_rows as f64;
        let fc = cols as f64 / new_cols as f64;

        log::info!(
            "Resizing {} from {}x{} to {}x{} ({:.1} m -> {} m)",
            self.name(),
            rows,
            cols,
            new_rows,
            new_cols,
            native,
            pixel_size_m
        );

        let bands = self
            .bands()
            .iter()
            .map(|band| {
                let data = Array2::from_shape_fn((new_rows, new_cols), |(r, c)| {
                    let r0 = (r as f64 * fr).floor() as usize;
                    let r1 = (((r + 1) as f64 * fr).ceil() as usize).min(rows).max(r0 + 1);
                    let c0 = (c as f64 * fc).floor() as usize;
                    let c1 = (((c + 1) as f64 * fc).ceil() as usize).min(cols).max(c0 + 1);
                    let window = band.data.slice(ndarray::s![r0..r1, c0..c1]);
                    nan_mean(window.iter().copied())
                });
                Band::new(band.descriptor.clone(), data)
            })
            .collect();

        let geolocation = match self.geolocation() {
            Geolocation::Affine(gt) => Geolocation::Affine(GeoTransform {
                top_left_x: gt.top_left_x,
                pixel_width: gt.pixel_width * fc,
                rotation_x: gt.rotation_x * fr,
                top_left_y: gt.top_left_y,
                rotation_y: gt.rotation_y * fc,
                pixel_height: gt.pixel_height * fr,
            }),
            Geolocation::Grids { longitude, latitude } => {
                let centre = |grid: &Array2<f64>| {
                    Array2::from_shape_fn((new_rows, new_cols), |(r, c)| {
                        let sr = (r as f64 + 0.5) * fr - 0.5;
                        let sc = (c as f64 + 0.5) * fc - 0.5;
                        bilinear_f64(grid, sr, sc)
                    })
                };
                Geolocation::Grids {
                    longitude: centre(longitude),
                    latitude: centre(latitude),
                }
            }
        };

        self.set_grid((new_rows, new_cols), geolocation, bands);
        Ok((fr, fc))
    }

    /// Crop to the pixel window whose centres fall inside `bbox`, widened by `margin` pixels.
    ///
    /// Returns `false` and leaves the raster untouched when no pixel centre is inside.
    pub fn crop(&mut self, bbox: &BoundingBox, margin: usize) -> WindResult<bool> {
        let (rows, cols) = self.shape();
        let (mut r0, mut r1, mut c0, mut c1) = (usize::MAX, 0, usize::MAX, 0);
        for r in 0..rows {
            for c in 0..cols {
                let (lon, lat) = self.geolocation().lonlat(r, c);
                if bbox.contains(lon, lat) {
                    r0 = r0.min(r);
                    r1 = r1.max(r);
                    c0 = c0.min(c);
                    c1 = c1.max(c);
                }
            }
        }
        if r0 == usize::MAX {
            return Ok(false);
        }

        let r0 = r0.saturating_sub(margin);
        let c0 = c0.saturating_sub(margin);
        let r1 = (r1 + margin + 1).min(rows);
        let c1 = (c1 + margin + 1).min(cols);
        if (r0, c0, r1, c1) == (0, 0, rows, cols) {
            return Ok(true);
        }
        log::debug!(
            "Cropping {} to rows {}..{}, cols {}..{}",
            self.name(),
            r0,
            r1,
            c0,
            c1
        );

        let window = ndarray::s![r0..r1, c0..c1];
        let bands = self
            .bands()
            .iter()
            .map(|band| Band::new(band.descriptor.clone(), band.data.slice(&window).to_owned()))
            .collect();
        let geolocation = match self.geolocation() {
            Geolocation::Affine(gt) => {
                let (x, y) = gt.apply(c0 as f64, r0 as f64);
                Geolocation::Affine(GeoTransform {
                    top_left_x: x,
                    top_left_y: y,
                    ..*gt
                })
            }
            Geolocation::Grids { longitude, latitude } => Geolocation::Grids {
                longitude: longitude.slice(&window).to_owned(),
                latitude: latitude.slice(&window).to_owned(),
            },
        };

        self.set_grid((r1 - r0, c1 - c0), geolocation, bands);
        Ok(true)
    }
}
