//! Grid engine: in-memory rasters, resampling and dataset readers

pub mod raster;
pub mod warp;

#[cfg(feature = "gdal")]
pub mod gdal_reader;

pub use raster::{Band, BandDescriptor, BandQuery, Geolocation, MetadataSet, RasterHandle};
pub use warp::ResampleAlg;

#[cfg(feature = "gdal")]
pub use gdal_reader::GdalGridEngine;

use crate::types::WindResult;

/// Opens datasets into [`RasterHandle`]s
pub trait GridEngine {
    /// Open a dataset by path or URL, failing with `WindError::Open` when unreadable
    fn open(&self, location: &str) -> WindResult<RasterHandle>;
}
