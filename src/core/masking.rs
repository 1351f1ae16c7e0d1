use crate::io::raster::{BandQuery, RasterHandle};
use crate::io::warp::ResampleAlg;
use crate::types::{MaskArray, RasterArray, WindError, WindResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Validity mask bit flags; zero marks a valid retrieval
pub mod flags {
    pub const LAND: u8 = 1;
    pub const NO_NRCS: u8 = 2;
    pub const NO_MODEL_WIND: u8 = 4;
    pub const INVERSION_FAILED: u8 = 8;
    pub const OUTSIDE_SWATH: u8 = 16;
}

/// Land masking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandMaskParams {
    /// Elevation band; the first band of the topography when unset
    pub elevation_query: Option<BandQuery>,
    /// Pixels strictly above this elevation (meters) are land
    pub elevation_threshold_m: f32,
    pub resample_alg: ResampleAlg,
    pub use_thin_plate_spline: bool,
}

impl Default for LandMaskParams {
    fn default() -> Self {
        Self {
            elevation_query: None,
            elevation_threshold_m: 0.0,
            resample_alg: ResampleAlg::Bilinear,
            use_thin_plate_spline: true,
        }
    }
}

/// Land pixels of `target` from a topography dataset
pub fn land_mask(
    topography: &RasterHandle,
    target: &RasterHandle,
    params: &LandMaskParams,
) -> WindResult<Array2<bool>> {
    let elevation = match &params.elevation_query {
        Some(query) => topography.get_band(query)?,
        None => topography.bands().first().ok_or_else(|| WindError::BandNotFound {
            dataset: topography.name().to_string(),
            query: "{elevation}".to_string(),
        })?,
    };

    let mut topo = RasterHandle::new(topography.name(), topography.shape(), topography.geolocation().clone())?;
    let mut band = elevation.clone();
    band.fill_to_nan();
    topo.add_band(band)?;
    topo.crop(&target.footprint(), 2)?;
    topo.reproject(target, params.resample_alg, params.use_thin_plate_spline)?;

    let threshold = params.elevation_threshold_m;
    // NaN elevation (outside the topography) is not land
    let mask = topo.bands()[0].data.mapv(|h| h > threshold);
    log::info!(
        "Land mask from {}: {} of {} pixels are land",
        topography.name(),
        mask.iter().filter(|&&m| m).count(),
        mask.len()
    );
    Ok(mask)
}

/// Set land pixels to NaN, returning the number of land pixels
pub fn apply_land_mask(data: &mut RasterArray, land: &Array2<bool>) -> usize {
    let mut count = 0;
    Zip::from(data).and(land).for_each(|v, &is_land| {
        if is_land {
            *v = f32::NAN;
            count += 1;
        }
    });
    count
}

/// Combine the exclusion reasons of each pixel into a byte mask.
///
/// `speed` is the inverted wind speed before land masking.
pub fn validity_mask(
    land: &Array2<bool>,
    nrcs: &RasterArray,
    model_direction: &RasterArray,
    speed: &RasterArray,
    swath: Option<&RasterArray>,
) -> MaskArray {
    let mut mask = Zip::from(land)
        .and(nrcs)
        .and(model_direction)
        .and(speed)
        .map_collect(|&is_land, &s0, &dir, &ws| {
            let mut m = 0u8;
            if is_land {
                m |= flags::LAND;
            }
            if !s0.is_finite() || s0 <= 0.0 {
                m |= flags::NO_NRCS;
            }
            if dir.is_nan() {
                m |= flags::NO_MODEL_WIND;
            }
            if !ws.is_finite() {
                m |= flags::INVERSION_FAILED;
            }
            m
        });

    if let Some(swath) = swath {
        Zip::from(&mut mask).and(swath).for_each(|m, &inside| {
            if !(inside.is_finite() && inside != 0.0) {
                *m |= flags::OUTSIDE_SWATH;
            }
        });
    }
    mask
}
