use crate::core::cmod::GeophysicalModelFunction;
use crate::core::masking::{apply_land_mask, validity_mask};
use crate::core::wind_normalizer::wrap_degrees;
use crate::io::raster::{Band, BandDescriptor};
use crate::types::{MaskArray, RasterArray, WindError, WindResult};
use ndarray::{Array2, Zip};
use std::time::Instant;

/// Wind products on the SAR grid
#[derive(Debug, Clone)]
pub struct InvertedWind {
    pub windspeed: Band,
    pub wind_from_direction: Band,
    pub look_relative_wind_direction: Band,
    pub eastward_wind: Band,
    pub northward_wind: Band,
    pub validity_mask: Option<MaskArray>,
    /// Finite wind speeds before land masking
    pub inverted_pixels: usize,
    pub land_pixels: usize,
}

/// Per-pixel inputs to the inversion, all on one grid
#[derive(Debug, Clone, Copy)]
pub struct InversionInputs<'a> {
    /// VV or VV-equivalent linear NRCS
    pub nrcs: &'a Band,
    pub wind_from: &'a Band,
    pub incidence: &'a Band,
    pub look_direction: &'a Band,
    pub land: Option<&'a Array2<bool>>,
    pub swath: Option<&'a RasterArray>,
}

/// Inverts backscatter into wind speed with a geophysical model function
#[derive(Debug, Clone)]
pub struct WindInverter<G: GeophysicalModelFunction> {
    gmf: G,
    produce_validity_mask: bool,
}

impl<G: GeophysicalModelFunction> WindInverter<G> {
    pub fn new(gmf: G) -> Self {
        Self {
            gmf,
            produce_validity_mask: true,
        }
    }

    pub fn with_validity_mask(mut self, produce: bool) -> Self {
        self.produce_validity_mask = produce;
        self
    }

    pub fn invert(&self, dataset: &str, inputs: &InversionInputs<'_>) -> WindResult<InvertedWind> {
        let shape = inputs.nrcs.shape();
        for (what, actual) in [
            ("wind_from_direction", inputs.wind_from.shape()),
            ("incidence angle", inputs.incidence.shape()),
            ("look direction", inputs.look_direction.shape()),
        ] {
            if actual != shape {
                return Err(WindError::Shape {
                    what: what.to_string(),
                    expected: shape,
                    actual,
                });
            }
        }

        let wind_from = &inputs.wind_from.data;
        let look = Zip::from(&inputs.look_direction.data)
            .and(wind_from)
            .map_collect(|&look, &dir| if dir.is_nan() { f32::NAN } else { look });
        let relative = Zip::from(wind_from)
            .and(&look)
            .map_collect(|&dir, &look| relative_direction(dir, look));

        let start = Instant::now();
        let mut speed = self
            .gmf
            .invert_grid(&inputs.nrcs.data, &relative, &inputs.incidence.data)
            .map_err(|e| WindError::RetrievalFailed {
                dataset: dataset.to_string(),
                reason: e.to_string(),
                inverted_pixels: 0,
                land_pixels: 0,
            })?;
        speed.mapv_inplace(|v| if v.is_infinite() { f32::NAN } else { v });
        let inverted_pixels = speed.iter().filter(|v| v.is_finite()).count();
        log::info!(
            "Inverted {} of {} pixels in {:.2?}",
            inverted_pixels,
            speed.len(),
            start.elapsed()
        );

        let unmasked = speed.clone();
        let land_pixels = match inputs.land {
            Some(land) => {
                if land.dim() != shape {
                    return Err(WindError::Shape {
                        what: "land mask".to_string(),
                        expected: shape,
                        actual: land.dim(),
                    });
                }
                apply_land_mask(&mut speed, land)
            }
            None => 0,
        };
        log::info!("Masked {} land pixels", land_pixels);

        if speed.iter().all(|v| v.is_nan()) {
            return Err(WindError::RetrievalFailed {
                dataset: dataset.to_string(),
                reason: "no valid wind speed over open water".to_string(),
                inverted_pixels,
                land_pixels,
            });
        }

        let (u, v) = wind_components(&speed, wind_from);

        let validity_mask = if self.produce_validity_mask {
            let no_land = Array2::from_elem(shape, false);
            Some(validity_mask(
                inputs.land.unwrap_or(&no_land),
                &inputs.nrcs.data,
                wind_from,
                &unmasked,
                inputs.swath,
            ))
        } else {
            None
        };

        Ok(InvertedWind {
            windspeed: Band::new(
                BandDescriptor::new("wind_speed")
                    .named("windspeed")
                    .with_long_name("Surface wind speed")
                    .with_units("m s-1"),
                speed,
            ),
            wind_from_direction: Band::new(
                BandDescriptor::new("wind_from_direction")
                    .named("winddirection")
                    .with_long_name("Surface wind from direction")
                    .with_units("degrees"),
                wind_from.clone(),
            ),
            look_relative_wind_direction: Band::new(
                BandDescriptor::default()
                    .named("look_relative_wind_direction")
                    .with_long_name("Wind direction relative to the radar look direction")
                    .with_units("degrees"),
                relative,
            ),
            eastward_wind: Band::new(
                BandDescriptor::new("eastward_wind")
                    .named("eastward_wind")
                    .with_units("m s-1"),
                u,
            ),
            northward_wind: Band::new(
                BandDescriptor::new("northward_wind")
                    .named("northward_wind")
                    .with_units("m s-1"),
                v,
            ),
            validity_mask,
            inverted_pixels,
            land_pixels,
        })
    }
}

/// `(wind_from - look) mod 360`; NaN when either is undefined
pub fn relative_direction(wind_from: f32, look: f32) -> f32 {
    if wind_from.is_nan() || look.is_nan() {
        return f32::NAN;
    }
    wrap_degrees(wind_from as f64 - look as f64)
}

/// Eastward and northward components of a wind blowing from `direction`
pub fn wind_components(speed: &RasterArray, direction: &RasterArray) -> (RasterArray, RasterArray) {
    let u = Zip::from(speed)
        .and(direction)
        .map_collect(|&s, &d| (-(s as f64) * (d as f64).to_radians().sin()) as f32);
    let v = Zip::from(speed)
        .and(direction)
        .map_collect(|&s, &d| (-(s as f64) * (d as f64).to_radians().cos()) as f32);
    (u, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cmod::Cmod5n;
    use crate::core::masking::flags;
    use approx::assert_abs_diff_eq;

    fn band(shape: (usize, usize), value: f32) -> Band {
        Band::new(BandDescriptor::default(), Array2::from_elem(shape, value))
    }

    /// Overflows to +Inf above 0.1 NRCS and -Inf below 0.001
    struct OverflowingGmf;

    impl GeophysicalModelFunction for OverflowingGmf {
        fn forward(&self, windspeed: f64, _phi: f64, _incidence: f64) -> f64 {
            windspeed / 1000.0
        }

        fn inverse(&self, sigma0: f64, _phi: f64, _incidence: f64) -> f64 {
            if sigma0 > 0.1 {
                f64::INFINITY
            } else if sigma0 < 0.001 {
                f64::NEG_INFINITY
            } else {
                sigma0 * 1000.0
            }
        }
    }

    #[test]
    fn test_infinite_speeds_become_nan() {
        let shape = (2, 2);
        let mut nrcs = band(shape, 0.01);
        nrcs.data[[0, 0]] = 0.5;
        nrcs.data[[1, 1]] = 0.0005;
        let wind_from = band(shape, 45.0);
        let incidence = band(shape, 30.0);
        let look = band(shape, 0.0);
        let inputs = InversionInputs {
            nrcs: &nrcs,
            wind_from: &wind_from,
            incidence: &incidence,
            look_direction: &look,
            land: None,
            swath: None,
        };
        let out = WindInverter::new(OverflowingGmf).invert("s1.nc", &inputs).unwrap();
        let mask = out.validity_mask.unwrap();

        for idx in [[0usize, 0], [1, 1]] {
            assert!(out.windspeed.data[idx].is_nan());
            assert!(out.eastward_wind.data[idx].is_nan());
            assert!(out.northward_wind.data[idx].is_nan());
            assert_eq!(mask[idx], flags::INVERSION_FAILED);
        }
        assert_abs_diff_eq!(out.windspeed.data[[0, 1]], 10.0, epsilon = 1e-4);
        assert_eq!(mask[[0, 1]], 0);
        assert_eq!(out.inverted_pixels, 2);
        assert!(out.windspeed.data.iter().all(|v| !v.is_infinite()));
    }

    #[test]
    fn test_relative_direction_wraps() {
        assert_eq!(relative_direction(180.0, 90.0), 90.0);
        assert_eq!(relative_direction(10.0, 350.0), 20.0);
        assert_eq!(relative_direction(90.0, 90.0), 0.0);
        assert!(relative_direction(f32::NAN, 90.0).is_nan());
    }

    #[test]
    fn test_components_match_speed() {
        let speed = Array2::from_shape_fn((4, 4), |(r, c)| 2.0 + (r * 4 + c) as f32);
        let dir = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32 * 22.5);
        let (u, v) = wind_components(&speed, &dir);
        for ((r, c), s) in speed.indexed_iter() {
            let norm = (u[[r, c]].powi(2) + v[[r, c]].powi(2)).sqrt();
            assert_abs_diff_eq!(norm, *s, epsilon = 1e-4);
        }
        // wind from the west blows towards the east
        let (u, v) = wind_components(&Array2::from_elem((1, 1), 5.0), &Array2::from_elem((1, 1), 270.0));
        assert_abs_diff_eq!(u[[0, 0]], 5.0, epsilon = 1e-5);
        assert_abs_diff_eq!(v[[0, 0]], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_inversion_masks_look_direction_and_land() {
        let shape = (3, 3);
        let nrcs = band(shape, 0.05);
        let mut wind_from = band(shape, 200.0);
        wind_from.data[[0, 0]] = f32::NAN;
        let incidence = band(shape, 30.0);
        let look = band(shape, 80.0);
        let mut land = Array2::from_elem(shape, false);
        land[[2, 2]] = true;

        let inputs = InversionInputs {
            nrcs: &nrcs,
            wind_from: &wind_from,
            incidence: &incidence,
            look_direction: &look,
            land: Some(&land),
            swath: None,
        };
        let out = WindInverter::new(Cmod5n::default()).invert("s1.nc", &inputs).unwrap();

        assert!(out.look_relative_wind_direction.data[[0, 0]].is_nan());
        assert_eq!(out.look_relative_wind_direction.data[[1, 1]], 120.0);
        assert!(out.windspeed.data[[0, 0]].is_nan());
        assert!(out.windspeed.data[[2, 2]].is_nan());
        assert!(out.eastward_wind.data[[2, 2]].is_nan());
        assert!(out.windspeed.data[[1, 1]].is_finite());
        assert_eq!(out.inverted_pixels, 8);
        assert_eq!(out.land_pixels, 1);

        let mask = out.validity_mask.unwrap();
        assert_eq!(mask[[1, 1]], 0);
        assert_eq!(mask[[2, 2]], flags::LAND);
        assert_eq!(mask[[0, 0]], flags::NO_MODEL_WIND | flags::INVERSION_FAILED);
    }

    #[test]
    fn test_all_land_fails_after_inversion() {
        let shape = (5, 5);
        let nrcs = band(shape, 0.05);
        let wind_from = band(shape, 0.0);
        let incidence = band(shape, 30.0);
        let look = band(shape, 0.0);
        let land = Array2::from_elem(shape, true);
        let inputs = InversionInputs {
            nrcs: &nrcs,
            wind_from: &wind_from,
            incidence: &incidence,
            look_direction: &look,
            land: Some(&land),
            swath: None,
        };
        match WindInverter::new(Cmod5n::default()).invert("s1.nc", &inputs) {
            Err(WindError::RetrievalFailed {
                inverted_pixels,
                land_pixels,
                ..
            }) => {
                assert_eq!(inverted_pixels, 25);
                assert_eq!(land_pixels, 25);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let nrcs = band((3, 3), 0.05);
        let other = band((3, 4), 0.0);
        let inputs = InversionInputs {
            nrcs: &nrcs,
            wind_from: &other,
            incidence: &nrcs,
            look_direction: &nrcs,
            land: None,
            swath: None,
        };
        assert!(matches!(
            WindInverter::new(Cmod5n::default()).invert("s1.nc", &inputs),
            Err(WindError::Shape { .. })
        ));
    }
}
