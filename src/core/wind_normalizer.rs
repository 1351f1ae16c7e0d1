//! Normalization of model wind fields onto a SAR grid.
//!
//! NWP providers publish wind either as a (direction, speed) pair, as true
//! eastward/northward components or as components relative to a rotated
//! model grid. Whatever the convention, the output is a meteorological
//! "from" direction in [0, 360), an optional speed and the model valid time,
//! all on the target grid. Only vector components are ever interpolated.

use crate::io::raster::{bearing_deg, Band, BandDescriptor, BandQuery, RasterHandle};
use crate::io::warp::ResampleAlg;
use crate::types::{RasterArray, WindError, WindResult};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};

pub const WIND_FROM_DIRECTION: &str = "wind_from_direction";
pub const WIND_SPEED: &str = "wind_speed";
pub const EASTWARD_WIND: &str = "eastward_wind";
pub const NORTHWARD_WIND: &str = "northward_wind";
pub const X_WIND: &str = "x_wind";
pub const Y_WIND: &str = "y_wind";

/// Model pixels kept around the target footprint
const CROP_MARGIN: usize = 2;

// Working band names on the intermediate grid
const COMPONENT_U: &str = "u";
const COMPONENT_V: &str = "v";
const COMPONENT_SPEED: &str = "speed";

/// Wind representation found in an auxiliary dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindConvention {
    /// `wind_from_direction` with an optional `wind_speed`
    Direct,
    /// `eastward_wind` / `northward_wind`
    EastNorth,
    /// `x_wind` / `y_wind` relative to the model grid
    GridRelative {
        /// The long names declare true zonal/meridional components
        components_are_true: bool,
    },
}

impl std::fmt::Display for WindConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindConvention::Direct => write!(f, "wind_from_direction/wind_speed"),
            WindConvention::EastNorth => write!(f, "eastward_wind/northward_wind"),
            WindConvention::GridRelative { components_are_true: false } => {
                write!(f, "x_wind/y_wind (grid relative)")
            }
            WindConvention::GridRelative { components_are_true: true } => {
                write!(f, "x_wind/y_wind (zonal/meridional)")
            }
        }
    }
}

/// Model wind on the SAR grid
#[derive(Debug, Clone)]
pub struct WindField {
    /// Degrees clockwise from north the wind blows from, in [0, 360)
    pub direction: Band,
    pub speed: Option<Band>,
    /// Nominal valid time of the model field
    pub time: DateTime<Utc>,
}

/// Detect the wind convention, in priority order
pub fn detect(aux: &RasterHandle) -> WindResult<WindConvention> {
    let has = |standard_name: &str| aux.has_band(&BandQuery::standard_name(standard_name));

    if has(WIND_FROM_DIRECTION) && has(WIND_SPEED) {
        return Ok(WindConvention::Direct);
    }
    if has(EASTWARD_WIND) && has(NORTHWARD_WIND) {
        return Ok(WindConvention::EastNorth);
    }
    if has(X_WIND) && has(Y_WIND) {
        let long_name = |standard_name: &str| {
            aux.find_band(&BandQuery::standard_name(standard_name))
                .and_then(|b| b.descriptor.long_name.clone())
                .unwrap_or_default()
                .to_lowercase()
        };
        let components_are_true =
            long_name(X_WIND).contains("zonal") && long_name(Y_WIND).contains("meridional");
        return Ok(WindConvention::GridRelative { components_are_true });
    }
    // Direction without speed only when no components are available
    if has(WIND_FROM_DIRECTION) {
        return Ok(WindConvention::Direct);
    }
    Err(WindError::UnsupportedWindConvention {
        dataset: aux.name().to_string(),
    })
}

/// Reprojects auxiliary wind onto a target grid
#[derive(Debug, Clone)]
pub struct WindNormalizer {
    resample_alg: ResampleAlg,
    use_thin_plate_spline: bool,
    reference_time: Option<DateTime<Utc>>,
}

impl Default for WindNormalizer {
    fn default() -> Self {
        Self::new(ResampleAlg::default())
    }
}

impl WindNormalizer {
    pub fn new(resample_alg: ResampleAlg) -> Self {
        Self {
            resample_alg,
            use_thin_plate_spline: true,
            reference_time: None,
        }
    }

    pub fn with_thin_plate_spline(mut self, use_thin_plate_spline: bool) -> Self {
        self.use_thin_plate_spline = use_thin_plate_spline;
        self
    }

    /// Prefer the model time step closest to `time` when several are present
    pub fn with_reference_time(mut self, time: DateTime<Utc>) -> Self {
        self.reference_time = Some(time);
        self
    }

    pub fn normalize(&self, aux: &RasterHandle, target: &RasterHandle) -> WindResult<WindField> {
        let mut aux = aux.clone();
        aux.replace_fill_values();
        aux.crop(&target.footprint(), CROP_MARGIN)?;

        let convention = detect(&aux)?;
        log::info!("Wind convention of {}: {}", aux.name(), convention);

        let mut work = RasterHandle::new(aux.name(), aux.shape(), aux.geolocation().clone())?;
        let time = match convention {
            WindConvention::Direct => {
                let direction = self.select(&aux, WIND_FROM_DIRECTION)?;
                let (u, v) = unit_components(&direction.data);
                work.add_band(working_band(COMPONENT_U, u))?;
                work.add_band(working_band(COMPONENT_V, v))?;
                if let Some(speed) = self.select_optional(&aux, WIND_SPEED) {
                    work.add_band(working_band(COMPONENT_SPEED, speed.data.clone()))?;
                }
                self.time_of(&aux, direction)?
            }
            WindConvention::EastNorth => {
                let u = self.select(&aux, EASTWARD_WIND)?;
                let v = self.select(&aux, NORTHWARD_WIND)?;
                work.add_band(working_band(COMPONENT_U, u.data.clone()))?;
                work.add_band(working_band(COMPONENT_V, v.data.clone()))?;
                self.time_of(&aux, u)?
            }
            WindConvention::GridRelative { components_are_true } => {
                let x = self.select(&aux, X_WIND)?;
                let y = self.select(&aux, Y_WIND)?;
                let (u, v) = if components_are_true {
                    log::warn!(
                        "{} labels zonal/meridional wind as x_wind/y_wind, not rotating",
                        aux.name()
                    );
                    (x.data.clone(), y.data.clone())
                } else {
                    rotate_to_east_north(&x.data, &y.data, &y_axis_azimuth(&aux))
                };
                work.add_band(working_band(COMPONENT_U, u))?;
                work.add_band(working_band(COMPONENT_V, v))?;
                self.time_of(&aux, x)?
            }
        };

        work.reproject(target, self.resample_alg, self.use_thin_plate_spline)?;

        let u = &work.get_band(&BandQuery::named(COMPONENT_U))?.data;
        let v = &work.get_band(&BandQuery::named(COMPONENT_V))?.data;
        if u.iter().zip(v.iter()).all(|(a, b)| a.is_nan() || b.is_nan()) {
            return Err(WindError::NoOverlap {
                sar: target.name().to_string(),
                aux: aux.name().to_string(),
            });
        }

        let direction = Zip::from(u)
            .and(v)
            .map_collect(|&u, &v| direction_from_components(u as f64, v as f64));

        let speed = match convention {
            WindConvention::Direct => work
                .find_band(&BandQuery::named(COMPONENT_SPEED))
                .map(|b| b.data.clone()),
            _ => Some(Zip::from(u).and(v).map_collect(|&u, &v| u.hypot(v))),
        };

        log::info!(
            "Model wind from {} valid at {} normalized onto {}",
            aux.name(),
            time.to_rfc3339(),
            target.name()
        );

        Ok(WindField {
            direction: Band::new(
                BandDescriptor::new(WIND_FROM_DIRECTION)
                    .named("model_wind_direction")
                    .with_units("degrees")
                    .with_time(time),
                direction,
            ),
            speed: speed.map(|data| {
                Band::new(
                    BandDescriptor::new(WIND_SPEED)
                        .named("model_windspeed")
                        .with_units("m s-1")
                        .with_time(time),
                    data,
                )
            }),
            time,
        })
    }

    fn select<'a>(&self, aux: &'a RasterHandle, standard_name: &str) -> WindResult<&'a Band> {
        self.select_optional(aux, standard_name)
            .ok_or_else(|| WindError::BandNotFound {
                dataset: aux.name().to_string(),
                query: BandQuery::standard_name(standard_name).to_string(),
            })
    }

    /// First matching band, or the one closest to the reference time
    fn select_optional<'a>(&self, aux: &'a RasterHandle, standard_name: &str) -> Option<&'a Band> {
        let query = BandQuery::standard_name(standard_name);
        let mut matches = aux.bands().iter().filter(|b| query.matches(&b.descriptor));
        match self.reference_time {
            None => matches.next(),
            Some(reference) => {
                let first = matches.next()?;
                let distance = |b: &Band| {
                    b.descriptor
                        .time
                        .map(|t| (t - reference).num_milliseconds().unsigned_abs())
                        .unwrap_or(u64::MAX)
                };
                Some(matches.fold(first, |best, b| {
                    if distance(b) < distance(best) {
                        b
                    } else {
                        best
                    }
                }))
            }
        }
    }

    fn time_of(&self, aux: &RasterHandle, band: &Band) -> WindResult<DateTime<Utc>> {
        if let Some(time) = band.descriptor.time {
            return Ok(time);
        }
        wind_time(aux)
    }
}

/// Nominal valid time of a model dataset from its metadata
pub fn wind_time(aux: &RasterHandle) -> WindResult<DateTime<Utc>> {
    for key in ["time_coverage_start", "time"] {
        if aux.metadata.contains(key) {
            return aux.metadata.get_time(key);
        }
    }
    Err(WindError::Metadata(format!(
        "no valid time in {}",
        aux.name()
    )))
}

/// Normalize with default settings and the given resampling
pub fn normalize(aux: &RasterHandle, target: &RasterHandle, resample_alg: ResampleAlg) -> WindResult<WindField> {
    WindNormalizer::new(resample_alg).normalize(aux, target)
}

/// Meteorological "from" direction of an (eastward, northward) vector, in [0, 360)
pub fn direction_from_components(u: f64, v: f64) -> f32 {
    if u.is_nan() || v.is_nan() {
        return f32::NAN;
    }
    wrap_degrees((-u).atan2(-v).to_degrees())
}

/// Reduce an angle to [0, 360) after rounding to f32
pub fn wrap_degrees(angle: f64) -> f32 {
    let wrapped = angle.rem_euclid(360.0) as f32;
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Azimuth of each pixel's y axis (decreasing row), degrees clockwise from north
pub fn y_axis_azimuth(raster: &RasterHandle) -> Array2<f64> {
    let (rows, cols) = raster.shape();
    let geo = raster.geolocation();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        if rows < 2 {
            return 0.0;
        }
        let below = (r + 1).min(rows - 1);
        let above = r.saturating_sub(1);
        let (lon0, lat0) = geo.lonlat(below, c);
        let (lon1, lat1) = geo.lonlat(above, c);
        bearing_deg(lon0, lat0, lon1, lat1)
    })
}

/// Rotate grid-relative (x, y) components into true (eastward, northward)
pub fn rotate_to_east_north(x: &RasterArray, y: &RasterArray, azimuth: &Array2<f64>) -> (RasterArray, RasterArray) {
    let u = Zip::from(x).and(y).and(azimuth).map_collect(|&x, &y, &az| {
        let (s, c) = az.to_radians().sin_cos();
        (y as f64 * s + x as f64 * c) as f32
    });
    let v = Zip::from(x).and(y).and(azimuth).map_collect(|&x, &y, &az| {
        let (s, c) = az.to_radians().sin_cos();
        (y as f64 * c - x as f64 * s) as f32
    });
    (u, v)
}

/// Unit vector pointing downwind for a "from" direction in degrees
fn unit_components(direction: &RasterArray) -> (RasterArray, RasterArray) {
    let u = direction.mapv(|d| -(d as f64).to_radians().sin() as f32);
    let v = direction.mapv(|d| -(d as f64).to_radians().cos() as f32);
    (u, v)
}

fn working_band(name: &str, data: RasterArray) -> Band {
    Band::new(BandDescriptor::default().named(name), data)
}
