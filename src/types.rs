use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued sample grid (rows x columns)
pub type RasterArray = Array2<f32>;

/// Per-pixel validity flags
pub type MaskArray = Array2<u8>;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    /// Parse a polarization tag as written in product metadata
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "VV" => Some(Polarization::VV),
            "VH" => Some(Polarization::VH),
            "HV" => Some(Polarization::HV),
            "HH" => Some(Polarization::HH),
            _ => None,
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Storage type of a band in its source product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    Byte,
    Int16,
    UInt16,
    Int32,
    Float32,
    Float64,
    Other,
}

impl SampleType {
    /// Map a GDAL data type name (or its numeric code) onto a sample type
    pub fn from_gdal_name(name: &str) -> Self {
        match name.trim() {
            "Byte" | "UInt8" | "1" => SampleType::Byte,
            "UInt16" | "2" => SampleType::UInt16,
            "Int16" | "3" => SampleType::Int16,
            "Int32" | "5" => SampleType::Int32,
            "Float32" | "6" => SampleType::Float32,
            "Float64" | "7" => SampleType::Float64,
            _ => SampleType::Other,
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Closed-interval overlap test; touching edges count as overlap.
    ///
    /// Longitudes are compared modulo 360, so a 0..360 model grid overlaps
    /// a scene given in -180..180.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let lat_overlap = self.min_lat <= other.max_lat && other.min_lat <= self.max_lat;
        if !lat_overlap {
            return false;
        }
        if self.spans_all_longitudes() || other.spans_all_longitudes() {
            return true;
        }
        [-360.0, 0.0, 360.0]
            .iter()
            .any(|shift| self.min_lon <= other.max_lon + shift && other.min_lon + shift <= self.max_lon)
    }

    /// Closed-interval containment, longitude modulo 360
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let lon = self.wrap_lon(lon);
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// `lon` shifted by a whole turn into the box's longitude range when that
    /// brings it inside; unchanged otherwise
    pub fn wrap_lon(&self, lon: f64) -> f64 {
        if (lon >= self.min_lon && lon <= self.max_lon) || !lon.is_finite() {
            return lon;
        }
        let wrapped = self.min_lon + (lon - self.min_lon).rem_euclid(360.0);
        if wrapped <= self.max_lon {
            wrapped
        } else {
            lon
        }
    }

    fn spans_all_longitudes(&self) -> bool {
        self.max_lon - self.min_lon >= 360.0
    }
}

/// Geospatial transformation parameters (GDAL ordering, lon/lat degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Geographic position of a (fractional) pixel corner coordinate
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Inverse of [`GeoTransform::apply`]; `None` for a degenerate transform
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((col, row))
    }
}

/// Why an NRCS band was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrcsDefect {
    AllNan,
    NanAndZeroOnly,
}

impl std::fmt::Display for NrcsDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NrcsDefect::AllNan => write!(f, "all NRCS values are NaN"),
            NrcsDefect::NanAndZeroOnly => write!(f, "NRCS values are NaN and 0 only"),
        }
    }
}

/// Error types for wind retrieval
#[derive(Debug, thiserror::Error)]
pub enum WindError {
    #[error("Cannot open dataset {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("No band matching {query} in {dataset}")]
    BandNotFound { dataset: String, query: String },

    #[error("The SAR and wind datasets do not intersect ({sar} / {aux})")]
    NoOverlap { sar: String, aux: String },

    #[error("Erroneous SAR product {dataset} - {defect}")]
    InvalidNrcs { dataset: String, defect: NrcsDefect },

    #[error("No recognised wind representation in {dataset}")]
    UnsupportedWindConvention { dataset: String },

    #[error(
        "Time difference between model and SAR wind field is greater than \
         {max_diff_minutes} minutes: {offset_minutes:.1} minutes ({sar} / {aux})"
    )]
    CollocationTime {
        sar: String,
        aux: String,
        offset_minutes: f64,
        max_diff_minutes: f64,
    },

    #[error(
        "Wind retrieval failed for {dataset}: {reason} \
         ({inverted_pixels} pixels inverted, {land_pixels} land pixels)"
    )]
    RetrievalFailed {
        dataset: String,
        reason: String,
        inverted_pixels: usize,
        land_pixels: usize,
    },

    #[error("Wind speed already calculated in {dataset}")]
    AlreadyRetrieved { dataset: String },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Grid shape mismatch: expected {expected:?}, got {actual:?} ({what})")]
    Shape {
        what: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for wind retrieval operations
pub type WindResult<T> = Result<T, WindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_intersection() {
        let a = BoundingBox { min_lon: 0.0, max_lon: 2.0, min_lat: 60.0, max_lat: 62.0 };
        let b = BoundingBox { min_lon: 1.5, max_lon: 4.0, min_lat: 61.0, max_lat: 65.0 };
        let c = BoundingBox { min_lon: 10.0, max_lon: 12.0, min_lat: 60.0, max_lat: 62.0 };
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_bbox_longitudes_modulo_360() {
        let scene = BoundingBox { min_lon: -5.5, max_lon: -4.5, min_lat: 50.0, max_lat: 51.0 };
        let model = BoundingBox { min_lon: 300.0, max_lon: 359.0, min_lat: 40.0, max_lat: 60.0 };
        let east = BoundingBox { min_lon: 10.0, max_lon: 20.0, min_lat: 40.0, max_lat: 60.0 };
        assert!(scene.intersects(&model));
        assert!(model.intersects(&scene));
        assert!(!scene.intersects(&east));

        assert!(model.contains(-5.0, 50.5));
        assert!(!model.contains(5.0, 50.5));
        assert!((model.wrap_lon(-5.0) - 355.0).abs() < 1e-12);
        assert_eq!(model.wrap_lon(330.0), 330.0);
        assert_eq!(model.wrap_lon(5.0), 5.0);
    }

    #[test]
    fn test_geotransform_roundtrip() {
        let gt = GeoTransform::from_gdal([5.0, 0.1, 0.0, 70.0, 0.0, -0.05]);
        let (lon, lat) = gt.apply(12.5, 40.0);
        assert!((lon - 6.25).abs() < 1e-12);
        assert!((lat - 68.0).abs() < 1e-12);

        let (col, row) = gt.invert(lon, lat).unwrap();
        assert!((col - 12.5).abs() < 1e-9);
        assert!((row - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_type_codes() {
        assert_eq!(SampleType::from_gdal_name("6"), SampleType::Float32);
        assert_eq!(SampleType::from_gdal_name("Float32"), SampleType::Float32);
        assert_eq!(SampleType::from_gdal_name("CFloat32"), SampleType::Other);
    }

    #[test]
    fn test_collocation_error_message_carries_offset() {
        let err = WindError::CollocationTime {
            sar: "s1a.nc".to_string(),
            aux: "arome.nc".to_string(),
            offset_minutes: 95.0,
            max_diff_minutes: 30.0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Time difference between model and SAR wind field is greater"));
        assert!(msg.contains("95.0"));
    }
}
