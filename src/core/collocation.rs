use crate::io::raster::{Band, RasterHandle};
use crate::types::{NrcsDefect, WindError, WindResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of pairing a SAR scene with an auxiliary wind field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollocationResult {
    pub sar_name: String,
    pub aux_name: String,
    /// Auxiliary valid time minus SAR mean time
    pub time_offset_minutes: f64,
    pub intersects: bool,
}

/// Spatial, temporal and radiometric checks on a SAR/model pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollocationValidator {
    pub max_time_diff_minutes: f64,
}

impl Default for CollocationValidator {
    fn default() -> Self {
        Self {
            max_time_diff_minutes: 180.0,
        }
    }
}

impl CollocationValidator {
    pub fn new(max_time_diff_minutes: f64) -> Self {
        Self { max_time_diff_minutes }
    }

    /// Footprints must overlap; touching edges count
    pub fn check_intersection(&self, sar: &RasterHandle, aux: &RasterHandle) -> WindResult<()> {
        let sar_box = sar.footprint();
        let aux_box = aux.footprint();
        log::debug!("SAR footprint {:?}, auxiliary footprint {:?}", sar_box, aux_box);
        if !sar_box.intersects(&aux_box) {
            return Err(WindError::NoOverlap {
                sar: sar.name().to_string(),
                aux: aux.name().to_string(),
            });
        }
        Ok(())
    }

    /// `|sar_mean_time - aux_time| <= max_time_diff_minutes`
    pub fn check_time_difference(
        &self,
        sar: &RasterHandle,
        aux_name: &str,
        aux_time: DateTime<Utc>,
    ) -> WindResult<CollocationResult> {
        let sar_time = sar.mean_time()?;
        let offset = time_offset_minutes(sar_time, aux_time);
        log::info!(
            "Time offset between {} and {}: {:.1} minutes",
            sar.name(),
            aux_name,
            offset
        );

        if offset.abs() > self.max_time_diff_minutes {
            return Err(WindError::CollocationTime {
                sar: sar.name().to_string(),
                aux: aux_name.to_string(),
                offset_minutes: offset,
                max_diff_minutes: self.max_time_diff_minutes,
            });
        }

        Ok(CollocationResult {
            sar_name: sar.name().to_string(),
            aux_name: aux_name.to_string(),
            time_offset_minutes: offset,
            intersects: true,
        })
    }

    /// Reject NRCS that is all NaN, or NaN and zero only
    pub fn check_nrcs(&self, dataset: &str, nrcs: &Band) -> WindResult<()> {
        if let Some(defect) = nrcs_defect(nrcs) {
            return Err(WindError::InvalidNrcs {
                dataset: dataset.to_string(),
                defect,
            });
        }
        Ok(())
    }
}

pub fn nrcs_defect(nrcs: &Band) -> Option<NrcsDefect> {
    if nrcs.is_all_nan() {
        Some(NrcsDefect::AllNan)
    } else if nrcs.data.iter().all(|v| v.is_nan() || *v == 0.0) {
        Some(NrcsDefect::NanAndZeroOnly)
    } else {
        None
    }
}

/// Signed offset in minutes, positive when the model is later
pub fn time_offset_minutes(sar_time: DateTime<Utc>, aux_time: DateTime<Utc>) -> f64 {
    (aux_time - sar_time).num_milliseconds() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::{BandDescriptor, Geolocation};
    use crate::types::GeoTransform;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn raster(name: &str, lon0: f64) -> RasterHandle {
        let gt = GeoTransform::from_gdal([lon0, 0.1, 0.0, 62.0, 0.0, -0.1]);
        let mut r = RasterHandle::new(name, (10, 10), Geolocation::Affine(gt)).unwrap();
        r.metadata.set("time_coverage_start", "2024-04-04T12:00:00Z");
        r.metadata.set("time_coverage_end", "2024-04-04T12:00:20Z");
        r
    }

    #[test]
    fn test_intersection() {
        let validator = CollocationValidator::default();
        assert!(validator.check_intersection(&raster("s1.nc", 5.0), &raster("m.nc", 5.5)).is_ok());
        // shared edge at 6.0 E
        assert!(validator.check_intersection(&raster("s1.nc", 5.0), &raster("m.nc", 6.0)).is_ok());
        assert!(matches!(
            validator.check_intersection(&raster("s1.nc", 5.0), &raster("m.nc", 20.0)),
            Err(WindError::NoOverlap { .. })
        ));
    }

    #[test]
    fn test_time_boundary_passes() {
        let validator = CollocationValidator::new(30.0);
        let sar = raster("s1.nc", 5.0);
        let aux_time = Utc.with_ymd_and_hms(2024, 4, 4, 12, 30, 10).unwrap();
        let result = validator.check_time_difference(&sar, "m.nc", aux_time).unwrap();
        assert_eq!(result.time_offset_minutes, 30.0);
        assert!(result.intersects);
    }

    #[test]
    fn test_time_beyond_bound_fails_with_offset() {
        let validator = CollocationValidator::new(30.0);
        let sar = raster("s1.nc", 5.0);
        let aux_time = Utc.with_ymd_and_hms(2024, 4, 4, 11, 0, 10).unwrap();
        match validator.check_time_difference(&sar, "m.nc", aux_time) {
            Err(WindError::CollocationTime { offset_minutes, .. }) => {
                assert_eq!(offset_minutes, -60.0)
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_missing_time_coverage() {
        let mut sar = raster("s1.nc", 5.0);
        sar.metadata.remove("time_coverage_start");
        let aux_time = Utc.with_ymd_and_hms(2024, 4, 4, 12, 0, 0).unwrap();
        assert!(matches!(
            CollocationValidator::default().check_time_difference(&sar, "m.nc", aux_time),
            Err(WindError::Metadata(_))
        ));
    }

    #[test]
    fn test_nrcs_defects() {
        let mut data = Array2::from_elem((3, 3), f32::NAN);
        let band = |d: &Array2<f32>| Band::new(BandDescriptor::default(), d.clone());
        assert_eq!(nrcs_defect(&band(&data)), Some(NrcsDefect::AllNan));
        data[[1, 1]] = 0.0;
        assert_eq!(nrcs_defect(&band(&data)), Some(NrcsDefect::NanAndZeroOnly));
        data[[2, 2]] = 0.03;
        assert_eq!(nrcs_defect(&band(&data)), None);

        let validator = CollocationValidator::default();
        assert!(matches!(
            validator.check_nrcs("s1.nc", &band(&Array2::from_elem((3, 3), f32::NAN))),
            Err(WindError::InvalidNrcs { defect: NrcsDefect::AllNan, .. })
        ));
    }
}
