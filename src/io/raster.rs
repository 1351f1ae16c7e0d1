use crate::types::{
    BoundingBox, GeoTransform, Polarization, RasterArray, SampleType, WindError, WindResult,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mean earth radius used for pixel spacing estimates (meters)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// String-keyed dataset metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataSet {
    entries: HashMap<String, String>,
}

impl MetadataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    /// Parse an ISO-8601 timestamp stored under `key`
    pub fn get_time(&self, key: &str) -> WindResult<DateTime<Utc>> {
        let value = self
            .get(key)
            .ok_or_else(|| WindError::Metadata(format!("missing metadata key {}", key)))?;
        parse_timestamp(value)
    }
}

/// Parse ISO-8601 timestamps as found in CF/ACDD attributes.
///
/// Values without a timezone designator are taken as UTC.
pub fn parse_timestamp(value: &str) -> WindResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    let naive = value.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(Utc.from_utc_datetime(&t));
        }
    }
    Err(WindError::Metadata(format!("unparseable timestamp '{}'", value)))
}

/// Semantic tags attached to a band
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandDescriptor {
    /// Band (variable) name, e.g. `windspeed`
    pub name: Option<String>,
    pub standard_name: Option<String>,
    pub polarization: Option<Polarization>,
    pub data_type: Option<SampleType>,
    pub long_name: Option<String>,
    pub units: Option<String>,
    /// Nominal valid time of the band
    pub time: Option<DateTime<Utc>>,
    /// Sentinel marking missing samples
    pub fill_value: Option<f32>,
}

impl BandDescriptor {
    pub fn new(standard_name: &str) -> Self {
        Self {
            standard_name: Some(standard_name.to_string()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_polarization(mut self, pol: Polarization) -> Self {
        self.polarization = Some(pol);
        self
    }

    pub fn with_data_type(mut self, data_type: SampleType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_long_name(mut self, long_name: &str) -> Self {
        self.long_name = Some(long_name.to_string());
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = Some(fill_value);
        self
    }
}

/// A 2-D grid of samples with its descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub descriptor: BandDescriptor,
    pub data: RasterArray,
}

impl Band {
    pub fn new(descriptor: BandDescriptor, data: RasterArray) -> Self {
        Self { descriptor, data }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Replace the documented fill value with NaN, returning the replaced count
    pub fn fill_to_nan(&mut self) -> usize {
        let fill = match self.descriptor.fill_value {
            Some(fill) if !fill.is_nan() => fill,
            _ => return 0,
        };
        let mut replaced = 0;
        self.data.mapv_inplace(|v| {
            if v == fill {
                replaced += 1;
                f32::NAN
            } else {
                v
            }
        });
        self.descriptor.fill_value = None;
        replaced
    }

    pub fn is_all_nan(&self) -> bool {
        self.data.iter().all(|v| v.is_nan())
    }

    pub fn finite_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }
}

/// Typed predicate over band descriptors.
///
/// Unset fields match anything; set fields must be present and equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandQuery {
    pub name: Option<String>,
    pub standard_name: Option<String>,
    pub polarization: Option<Polarization>,
    pub data_type: Option<SampleType>,
    pub long_name: Option<String>,
}

impl BandQuery {
    pub fn standard_name(standard_name: &str) -> Self {
        Self {
            standard_name: Some(standard_name.to_string()),
            ..Default::default()
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_polarization(mut self, pol: Polarization) -> Self {
        self.polarization = Some(pol);
        self
    }

    pub fn with_data_type(mut self, data_type: SampleType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn matches(&self, descriptor: &BandDescriptor) -> bool {
        fn field<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            match want {
                Some(w) => have.as_ref() == Some(w),
                None => true,
            }
        }
        field(&self.name, &descriptor.name)
            && field(&self.standard_name, &descriptor.standard_name)
            && field(&self.polarization, &descriptor.polarization)
            && field(&self.data_type, &descriptor.data_type)
            && field(&self.long_name, &descriptor.long_name)
    }
}

impl std::fmt::Display for BandQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(v) = &self.name {
            parts.push(format!("name={}", v));
        }
        if let Some(v) = &self.standard_name {
            parts.push(format!("standard_name={}", v));
        }
        if let Some(v) = &self.polarization {
            parts.push(format!("polarization={}", v));
        }
        if let Some(v) = &self.data_type {
            parts.push(format!("data_type={:?}", v));
        }
        if let Some(v) = &self.long_name {
            parts.push(format!("long_name={}", v));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Pixel to geographic mapping of a grid
#[derive(Debug, Clone, PartialEq)]
pub enum Geolocation {
    /// Affine transform in lon/lat degrees
    Affine(GeoTransform),
    /// Per-pixel longitude/latitude of the pixel centres
    Grids {
        longitude: Array2<f64>,
        latitude: Array2<f64>,
    },
}

impl Geolocation {
    /// Longitude/latitude of the centre of pixel (row, col)
    pub fn lonlat(&self, row: usize, col: usize) -> (f64, f64) {
        match self {
            Geolocation::Affine(gt) => gt.apply(col as f64 + 0.5, row as f64 + 0.5),
            Geolocation::Grids { longitude, latitude } => {
                (longitude[[row, col]], latitude[[row, col]])
            }
        }
    }

    /// Full longitude and latitude grids for a raster of `shape`
    pub fn grids(&self, shape: (usize, usize)) -> (Array2<f64>, Array2<f64>) {
        match self {
            Geolocation::Grids { longitude, latitude } => (longitude.clone(), latitude.clone()),
            Geolocation::Affine(_) => {
                let mut lon = Array2::<f64>::zeros(shape);
                let mut lat = Array2::<f64>::zeros(shape);
                for row in 0..shape.0 {
                    for col in 0..shape.1 {
                        let (x, y) = self.lonlat(row, col);
                        lon[[row, col]] = x;
                        lat[[row, col]] = y;
                    }
                }
                (lon, lat)
            }
        }
    }
}

/// Bilinear lookup in a f64 grid at a fractional index, clamped to the grid
pub(crate) fn bilinear_f64(grid: &Array2<f64>, row: f64, col: f64) -> f64 {
    let (rows, cols) = grid.dim();
    let row = row.clamp(0.0, (rows - 1) as f64);
    let col = col.clamp(0.0, (cols - 1) as f64);
    let r0 = row.floor() as usize;
    let c0 = col.floor() as usize;
    let r1 = (r0 + 1).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);
    let fr = row - r0 as f64;
    let fc = col - c0 as f64;
    let top = grid[[r0, c0]] * (1.0 - fc) + grid[[r0, c1]] * fc;
    let bottom = grid[[r1, c0]] * (1.0 - fc) + grid[[r1, c1]] * fc;
    top * (1.0 - fr) + bottom * fr
}

/// Great-circle distance in meters
pub(crate) fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = phi2 - phi1;
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Initial bearing from point 1 to point 2, degrees clockwise from north in [0, 360)
pub(crate) fn bearing_deg(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlambda = (lon2 - lon1).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// In-memory gridded dataset: bands on a common grid plus geolocation and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHandle {
    name: String,
    shape: (usize, usize),
    geolocation: Geolocation,
    bands: Vec<Band>,
    pub metadata: MetadataSet,
}

impl RasterHandle {
    /// Create an empty raster of `shape` (rows, cols)
    pub fn new(name: &str, shape: (usize, usize), geolocation: Geolocation) -> WindResult<Self> {
        if shape.0 == 0 || shape.1 == 0 {
            return Err(WindError::Processing(format!(
                "raster {} has an empty grid {:?}",
                name, shape
            )));
        }
        if let Geolocation::Grids { longitude, latitude } = &geolocation {
            for (what, grid) in [("longitude", longitude), ("latitude", latitude)] {
                if grid.dim() != shape {
                    return Err(WindError::Shape {
                        what: format!("{} grid of {}", what, name),
                        expected: shape,
                        actual: grid.dim(),
                    });
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            shape,
            geolocation,
            bands: Vec::new(),
            metadata: MetadataSet::new(),
        })
    }

    /// Dataset identifier (path or URL)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn geolocation(&self) -> &Geolocation {
        &self.geolocation
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Register a band; its grid must match the raster grid
    pub fn add_band(&mut self, band: Band) -> WindResult<()> {
        if band.shape() != self.shape {
            return Err(WindError::Shape {
                what: format!("band {:?} of {}", band.descriptor.name, self.name),
                expected: self.shape,
                actual: band.shape(),
            });
        }
        self.bands.push(band);
        Ok(())
    }

    /// First registered band matching `query`
    pub fn find_band(&self, query: &BandQuery) -> Option<&Band> {
        self.bands.iter().find(|b| query.matches(&b.descriptor))
    }

    pub fn get_band(&self, query: &BandQuery) -> WindResult<&Band> {
        self.find_band(query).ok_or_else(|| WindError::BandNotFound {
            dataset: self.name.clone(),
            query: query.to_string(),
        })
    }

    pub fn has_band(&self, query: &BandQuery) -> bool {
        self.find_band(query).is_some()
    }

    /// Replace fill-value sentinels with NaN in every band
    pub fn replace_fill_values(&mut self) -> usize {
        let replaced: usize = self.bands.iter_mut().map(|b| b.fill_to_nan()).sum();
        if replaced > 0 {
            log::debug!("Replaced {} fill values with NaN in {}", replaced, self.name);
        }
        replaced
    }

    /// Geographic extent of the grid
    pub fn footprint(&self) -> BoundingBox {
        let (rows, cols) = self.shape;
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        let mut extend = |lon: f64, lat: f64| {
            if lon.is_finite() && lat.is_finite() {
                bbox.min_lon = bbox.min_lon.min(lon);
                bbox.max_lon = bbox.max_lon.max(lon);
                bbox.min_lat = bbox.min_lat.min(lat);
                bbox.max_lat = bbox.max_lat.max(lat);
            }
        };
        match &self.geolocation {
            Geolocation::Affine(gt) => {
                for (col, row) in [(0, 0), (cols, 0), (0, rows), (cols, rows)] {
                    let (lon, lat) = gt.apply(col as f64, row as f64);
                    extend(lon, lat);
                }
            }
            Geolocation::Grids { longitude, latitude } => {
                for (lon, lat) in longitude.iter().zip(latitude.iter()) {
                    extend(*lon, *lat);
                }
            }
        }
        bbox
    }

    /// Acquisition start and end from `time_coverage_start`/`time_coverage_end`
    pub fn time_coverage(&self) -> WindResult<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.metadata.get_time("time_coverage_start")?;
        let end = match self.metadata.get("time_coverage_end") {
            Some(_) => self.metadata.get_time("time_coverage_end")?,
            None => start,
        };
        Ok((start, end))
    }

    /// Midpoint of the acquisition
    pub fn mean_time(&self) -> WindResult<DateTime<Utc>> {
        let (start, end) = self.time_coverage()?;
        Ok(start + (end - start) / 2)
    }

    /// Approximate native pixel spacing from the geolocation at the grid centre (meters)
    pub fn pixel_spacing_m(&self) -> f64 {
        let (rows, cols) = self.shape;
        let r = rows / 2;
        let c = cols / 2;
        let (lon0, lat0) = self.geolocation.lonlat(r, c);

        let mut spacings = Vec::with_capacity(2);
        if cols > 1 {
            let c1 = if c + 1 < cols { c + 1 } else { c - 1 };
            let (lon1, lat1) = self.geolocation.lonlat(r, c1);
            spacings.push(haversine_m(lon0, lat0, lon1, lat1));
        }
        if rows > 1 {
            let r1 = if r + 1 < rows { r + 1 } else { r - 1 };
            let (lon1, lat1) = self.geolocation.lonlat(r1, c);
            spacings.push(haversine_m(lon0, lat0, lon1, lat1));
        }
        if spacings.is_empty() {
            return 0.0;
        }
        spacings.iter().sum::<f64>() / spacings.len() as f64
    }

    pub(crate) fn set_grid(&mut self, shape: (usize, usize), geolocation: Geolocation, bands: Vec<Band>) {
        self.shape = shape;
        self.geolocation = geolocation;
        self.bands = bands;
    }
}
