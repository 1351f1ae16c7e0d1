use crate::core::band_resolver::{BandResolver, INCIDENCE_STANDARD_NAME};
use crate::core::cmod::Cmod5n;
use crate::core::collocation::{CollocationResult, CollocationValidator};
use crate::core::inversion::{InversionInputs, WindInverter};
use crate::core::masking::{land_mask, LandMaskParams};
use crate::core::provenance::RetrievalProvenance;
use crate::core::wind_normalizer::WindNormalizer;
use crate::io::raster::{Band, BandQuery, Geolocation, MetadataSet, RasterHandle};
use crate::io::warp::ResampleAlg;
use crate::io::GridEngine;
use crate::types::{MaskArray, WindError, WindResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// CF standard name of the radar look direction band
pub const LOOK_DIRECTION_STANDARD_NAME: &str = "sensor_azimuth_angle";

/// Name of the retrieved wind speed band; its presence marks a processed product
pub const WINDSPEED_BAND: &str = "windspeed";

/// Wind retrieval parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Output pixel size in meters, 0 keeps the native grid
    pub pixel_size_m: f64,
    pub resample_alg: ResampleAlg,
    pub use_thin_plate_spline: bool,
    pub max_time_diff_minutes: f64,
    pub incidence_query: BandQuery,
    pub look_direction_query: BandQuery,
    /// Band that is non-zero inside the valid swath
    pub swath_mask_query: Option<BandQuery>,
    pub produce_validity_mask: bool,
    pub cmod_iterations: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            pixel_size_m: 500.0,
            resample_alg: ResampleAlg::Bilinear,
            use_thin_plate_spline: true,
            max_time_diff_minutes: 180.0,
            incidence_query: BandQuery::standard_name(INCIDENCE_STANDARD_NAME),
            look_direction_query: BandQuery::standard_name(LOOK_DIRECTION_STANDARD_NAME),
            swath_mask_query: None,
            produce_validity_mask: true,
            cmod_iterations: 10,
        }
    }
}

/// Wind products on the (resized) SAR grid
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    pub windspeed: Band,
    pub wind_from_direction: Band,
    pub look_relative_wind_direction: Band,
    pub eastward_wind: Band,
    pub northward_wind: Band,
    /// Model wind speed reprojected onto the SAR grid
    pub model_windspeed: Option<Band>,
    pub validity_mask: Option<MaskArray>,
    pub collocation: CollocationResult,
    pub geolocation: Geolocation,
    pub metadata: MetadataSet,
}

impl RetrievalOutput {
    pub fn shape(&self) -> (usize, usize) {
        self.windspeed.shape()
    }

    /// Every output band, in export order
    pub fn bands(&self) -> Vec<&Band> {
        let mut bands = vec![
            &self.windspeed,
            &self.wind_from_direction,
            &self.look_relative_wind_direction,
            &self.eastward_wind,
            &self.northward_wind,
        ];
        if let Some(model) = &self.model_windspeed {
            bands.push(model);
        }
        bands
    }
}

/// SAR wind retrieval pipeline
pub struct WindRetriever {
    params: RetrievalParams,
}

impl WindRetriever {
    pub fn new(params: RetrievalParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve wind from a SAR scene, a model wind field and a topography.
    ///
    /// The inputs are not modified.
    pub fn retrieve(
        &self,
        sar: &RasterHandle,
        aux: &RasterHandle,
        topography: &RasterHandle,
    ) -> WindResult<RetrievalOutput> {
        let params = &self.params;
        log::info!("Retrieving wind from {} with model wind {}", sar.name(), aux.name());

        if sar.has_band(&BandQuery::named(WINDSPEED_BAND)) {
            return Err(WindError::AlreadyRetrieved {
                dataset: sar.name().to_string(),
            });
        }

        let mut sar = sar.clone();
        sar.replace_fill_values();
        sar.resize(params.pixel_size_m)?;

        let nrcs = BandResolver::new(params.incidence_query.clone()).resolve(&sar)?;

        let validator = CollocationValidator::new(params.max_time_diff_minutes);
        validator.check_intersection(&sar, aux)?;

        let mut normalizer = WindNormalizer::new(params.resample_alg)
            .with_thin_plate_spline(params.use_thin_plate_spline);
        if let Ok(sar_time) = sar.mean_time() {
            normalizer = normalizer.with_reference_time(sar_time);
        }
        let wind = normalizer.normalize(aux, &sar)?;

        let collocation = validator.check_time_difference(&sar, aux.name(), wind.time)?;
        validator.check_nrcs(sar.name(), &nrcs.band)?;

        let incidence = sar.get_band(&params.incidence_query)?;
        let look_direction = sar.get_band(&params.look_direction_query)?;
        let swath = match &params.swath_mask_query {
            Some(query) => Some(&sar.get_band(query)?.data),
            None => None,
        };

        let land = land_mask(
            topography,
            &sar,
            &LandMaskParams {
                resample_alg: params.resample_alg,
                use_thin_plate_spline: params.use_thin_plate_spline,
                ..Default::default()
            },
        )?;

        let inputs = InversionInputs {
            nrcs: &nrcs.band,
            wind_from: &wind.direction,
            incidence,
            look_direction,
            land: Some(&land),
            swath,
        };
        let inverted = WindInverter::new(Cmod5n::new(params.cmod_iterations))
            .with_validity_mask(params.produce_validity_mask)
            .invert(sar.name(), &inputs)?;

        let (time_coverage_start, time_coverage_end) = sar.time_coverage()?;
        let provenance = RetrievalProvenance {
            sar_filename: sar.name().to_string(),
            wind_filename: aux.name().to_string(),
            polarization: nrcs.polarization,
            time_coverage_start,
            time_coverage_end,
            aux_time: wind.time,
            time_offset_minutes: collocation.time_offset_minutes,
            processing_time: Utc::now(),
        };
        let metadata = provenance.to_metadata(&sar.metadata, &aux.metadata);

        log::info!(
            "Wind retrieved for {}: {} valid pixels, {} land pixels",
            sar.name(),
            inverted.windspeed.finite_count(),
            inverted.land_pixels
        );

        Ok(RetrievalOutput {
            windspeed: inverted.windspeed,
            wind_from_direction: inverted.wind_from_direction,
            look_relative_wind_direction: inverted.look_relative_wind_direction,
            eastward_wind: inverted.eastward_wind,
            northward_wind: inverted.northward_wind,
            model_windspeed: wind.speed,
            validity_mask: inverted.validity_mask,
            collocation,
            geolocation: sar.geolocation().clone(),
            metadata,
        })
    }

    /// Open the three datasets with `engine` and retrieve wind
    pub fn retrieve_from(
        &self,
        engine: &dyn GridEngine,
        sar_path: &str,
        wind_path: &str,
        topography_path: &str,
    ) -> WindResult<RetrievalOutput> {
        let sar = engine.open(sar_path)?;
        let aux = engine.open(wind_path)?;
        let topography = engine.open(topography_path)?;
        self.retrieve(&sar, &aux, &topography)
    }
}

/// Run the retrieval pipeline with `params`
pub fn retrieve_wind(
    sar: &RasterHandle,
    aux: &RasterHandle,
    topography: &RasterHandle,
    params: &RetrievalParams,
) -> WindResult<RetrievalOutput> {
    WindRetriever::new(params.clone()).retrieve(sar, aux, topography)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::band_resolver::NRCS_STANDARD_NAME;
    use crate::io::raster::BandDescriptor;
    use crate::types::{GeoTransform, Polarization, SampleType};
    use ndarray::Array2;
    use std::collections::HashMap;

    fn grid(name: &str, shape: (usize, usize)) -> RasterHandle {
        let gt = GeoTransform::from_gdal([5.0, 0.01, 0.0, 61.0, 0.0, -0.01]);
        RasterHandle::new(name, shape, Geolocation::Affine(gt)).unwrap()
    }

    fn add(raster: &mut RasterHandle, descriptor: BandDescriptor, value: f32) {
        let shape = raster.shape();
        raster.add_band(Band::new(descriptor, Array2::from_elem(shape, value))).unwrap();
    }

    fn scene() -> (RasterHandle, RasterHandle, RasterHandle) {
        let mut sar = grid("s1a.nc", (10, 10));
        sar.metadata.set("time_coverage_start", "2024-04-04T12:00:00Z");
        sar.metadata.set("time_coverage_end", "2024-04-04T12:00:00Z");
        add(
            &mut sar,
            BandDescriptor::new(NRCS_STANDARD_NAME)
                .with_polarization(Polarization::VV)
                .with_data_type(SampleType::Float32),
            0.05,
        );
        add(&mut sar, BandDescriptor::new(INCIDENCE_STANDARD_NAME), 30.0);
        add(&mut sar, BandDescriptor::new(LOOK_DIRECTION_STANDARD_NAME), 0.0);

        let mut aux = grid("model.nc", (10, 10));
        aux.metadata.set("time", "2024-04-04T12:00:00Z");
        add(&mut aux, BandDescriptor::new("wind_from_direction"), 90.0);

        let mut topo = grid("topo.tif", (10, 10));
        add(&mut topo, BandDescriptor::default(), -100.0);
        (sar, aux, topo)
    }

    fn native() -> RetrievalParams {
        RetrievalParams {
            pixel_size_m: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_params() {
        let params = RetrievalParams::default();
        assert_eq!(params.pixel_size_m, 500.0);
        assert_eq!(params.max_time_diff_minutes, 180.0);
        assert_eq!(params.resample_alg, ResampleAlg::Bilinear);
        assert!(params.use_thin_plate_spline && params.produce_validity_mask);
    }

    #[test]
    fn test_vv_scene_retrieval() {
        let (sar, aux, topo) = scene();
        let out = retrieve_wind(&sar, &aux, &topo, &native()).unwrap();
        assert_eq!(out.shape(), (10, 10));
        assert!(out.windspeed.data.iter().all(|v| v.is_finite()));
        assert!(out.model_windspeed.is_none());
        assert_eq!(out.metadata.get("polarization"), Some("VV"));
        assert_eq!(out.collocation.time_offset_minutes, 0.0);
        assert!(out.validity_mask.unwrap().iter().all(|&m| m == 0));
    }

    #[test]
    fn test_processed_product_is_refused() {
        let (mut sar, aux, topo) = scene();
        add(&mut sar, BandDescriptor::new("wind_speed").named(WINDSPEED_BAND), 5.0);
        assert!(matches!(
            retrieve_wind(&sar, &aux, &topo, &native()),
            Err(WindError::AlreadyRetrieved { .. })
        ));
    }

    #[test]
    fn test_missing_look_direction() {
        let (sar, aux, topo) = scene();
        let params = RetrievalParams {
            look_direction_query: BandQuery::named("look_direction"),
            ..native()
        };
        assert!(matches!(
            retrieve_wind(&sar, &aux, &topo, &params),
            Err(WindError::BandNotFound { .. })
        ));
    }

    struct MemoryEngine(HashMap<String, RasterHandle>);

    impl GridEngine for MemoryEngine {
        fn open(&self, location: &str) -> WindResult<RasterHandle> {
            self.0.get(location).cloned().ok_or_else(|| WindError::Open {
                path: location.to_string(),
                reason: "not found".to_string(),
            })
        }
    }

    #[test]
    fn test_retrieve_from_engine() {
        let (sar, aux, topo) = scene();
        let engine = MemoryEngine(
            [("sar", sar), ("aux", aux), ("topo", topo)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        let retriever = WindRetriever::new(native());
        assert!(retriever.retrieve_from(&engine, "sar", "aux", "topo").is_ok());
        assert!(matches!(
            retriever.retrieve_from(&engine, "sar", "missing", "topo"),
            Err(WindError::Open { .. })
        ));
    }
}
