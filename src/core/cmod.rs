//! CMOD5.N geophysical model function for C-band VV backscatter.
//!
//! Relates neutral 10 m wind speed, wind direction relative to the radar
//! look direction and incidence angle to the normalized radar cross section.
//! Valid for incidence angles of roughly 18-58 degrees.

use crate::types::{RasterArray, WindError, WindResult};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// CMOD5.N coefficients, 1-based like the published table
const C: [f64; 29] = [
    0.0, -0.6878, -0.7957, 0.3380, -0.1728, 0.0000, 0.0040, 0.1103, 0.0159, 6.7329, 2.7713,
    -2.2885, 0.4971, -0.7250, 0.0450, 0.0066, 0.3222, 0.0120, 22.7000, 2.0813, 3.0000, 8.3659,
    -3.3428, 1.3236, 6.2437, 2.3893, 0.3249, 4.1590, 1.6930,
];

const THETM: f64 = 40.0;
const THETHR: f64 = 25.0;
const ZPOW: f64 = 1.6;

/// First guess and step of the bisection in m/s
const INITIAL_SPEED: f64 = 10.0;
const INITIAL_STEP: f64 = 10.0;

/// Maps backscatter to wind speed and back
pub trait GeophysicalModelFunction: Send + Sync {
    /// Linear NRCS for `windspeed` (m/s), relative direction `phi` and incidence (degrees)
    fn forward(&self, windspeed: f64, phi: f64, incidence: f64) -> f64;

    /// Wind speed (m/s) for a linear NRCS; NaN where undefined
    fn inverse(&self, sigma0: f64, phi: f64, incidence: f64) -> f64;

    /// Pixel-wise inversion over co-registered grids
    fn invert_grid(
        &self,
        sigma0: &RasterArray,
        phi: &RasterArray,
        incidence: &RasterArray,
    ) -> WindResult<RasterArray> {
        for (what, grid) in [("relative direction", phi), ("incidence angle", incidence)] {
            if grid.dim() != sigma0.dim() {
                return Err(WindError::Shape {
                    what: what.to_string(),
                    expected: sigma0.dim(),
                    actual: grid.dim(),
                });
            }
        }

        let zip = Zip::from(sigma0).and(phi).and(incidence);
        let invert = |&s: &f32, &p: &f32, &i: &f32| self.inverse(s as f64, p as f64, i as f64) as f32;

        #[cfg(feature = "parallel")]
        let speed = zip.par_map_collect(invert);
        #[cfg(not(feature = "parallel"))]
        let speed = zip.map_collect(invert);

        Ok(speed)
    }
}

/// CMOD5.N with a fixed-iteration bisection inverse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cmod5n {
    /// Bisection iterations; the last step halves to 10 / 2^(iterations - 1) m/s
    pub iterations: usize,
}

impl Default for Cmod5n {
    fn default() -> Self {
        Self { iterations: 10 }
    }
}

impl Cmod5n {
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }
}

impl GeophysicalModelFunction for Cmod5n {
    fn forward(&self, windspeed: f64, phi: f64, incidence: f64) -> f64 {
        let y0 = C[19];
        let pn = C[20];
        let a = C[19] - (C[19] - 1.0) / C[20];
        let b = 1.0 / (C[20] * (C[19] - 1.0).powf(pn - 1.0));

        let fi = phi.to_radians();
        let csfi = fi.cos();
        let cs2fi = 2.0 * csfi * csfi - 1.0;

        let x = (incidence - THETM) / THETHR;
        let xx = x * x;

        // B0: upwind/downwind mean
        let a0 = C[1] + C[2] * x + C[3] * xx + C[4] * x * xx;
        let a1 = C[5] + C[6] * x;
        let a2 = C[7] + C[8] * x;
        let gam = C[9] + C[10] * x + C[11] * xx;
        let s0 = C[12] + C[13] * x;

        let v = windspeed;
        let s = a2 * v;
        let mut a3 = 1.0 / (1.0 + (-s.max(s0)).exp());
        if s < s0 {
            a3 *= (s / s0).powf(s0 * (1.0 - a3));
        }
        let b0 = a3.powf(gam) * 10f64.powf(a0 + a1 * v);

        // B1: upwind/downwind asymmetry
        let b1 = (C[14] * (1.0 + x) - C[15] * v * (0.5 + x - (4.0 * (x + C[16] + C[17] * v)).tanh()))
            / ((0.34 * (v - C[18])).exp() + 1.0);

        // B2: upwind/crosswind modulation
        let v0 = C[21] + C[22] * x + C[23] * xx;
        let d1 = C[24] + C[25] * x + C[26] * xx;
        let d2 = C[27] + C[28] * x;

        let mut v2 = v / v0 + 1.0;
        if v2 < y0 {
            v2 = a + b * (v2 - 1.0).powf(pn);
        }
        let b2 = (-d1 + d2 * v2) * (-v2).exp();

        b0 * (1.0 + b1 * csfi + b2 * cs2fi).powf(ZPOW)
    }

    fn inverse(&self, sigma0: f64, phi: f64, incidence: f64) -> f64 {
        if !sigma0.is_finite() || sigma0 <= 0.0 || !phi.is_finite() || !incidence.is_finite() {
            return f64::NAN;
        }

        let mut speed = INITIAL_SPEED;
        let mut step = INITIAL_STEP;
        for _ in 1..self.iterations {
            let modelled = self.forward(speed, phi, incidence);
            if !modelled.is_finite() {
                return f64::NAN;
            }
            speed += if modelled > sigma0 { -step } else { step };
            step /= 2.0;
        }
        speed
    }
}

/// HH to VV polarization ratio at an incidence angle in degrees
pub fn polarization_ratio(incidence: f64) -> f64 {
    let t2 = incidence.to_radians().tan().powi(2);
    (1.0 + 2.0 * t2).powi(2) / (1.0 + 1.3 * t2).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_forward_reference_values() {
        let cmod = Cmod5n::default();
        assert_abs_diff_eq!(cmod.forward(10.0, 0.0, 30.0), 0.139768, epsilon = 1e-5);
        assert_abs_diff_eq!(cmod.forward(10.0, 90.0, 30.0), 0.064975, epsilon = 1e-5);
    }

    #[test]
    fn test_forward_increases_with_speed() {
        let cmod = Cmod5n::default();
        let s5 = cmod.forward(5.0, 0.0, 30.0);
        let s10 = cmod.forward(10.0, 0.0, 30.0);
        let s15 = cmod.forward(15.0, 0.0, 30.0);
        assert!(s5 < s10 && s10 < s15);
    }

    #[test]
    fn test_upwind_exceeds_crosswind_and_downwind() {
        let cmod = Cmod5n::default();
        let up = cmod.forward(10.0, 0.0, 30.0);
        assert!(up > cmod.forward(10.0, 90.0, 30.0));
        assert!(up > cmod.forward(10.0, 180.0, 30.0));
    }

    #[test]
    fn test_inverse_recovers_forward_speed() {
        let cmod = Cmod5n::default();
        let sigma0 = cmod.forward(8.0, 45.0, 30.0);
        assert_abs_diff_eq!(cmod.inverse(sigma0, 45.0, 30.0), 8.0, epsilon = 0.05);
    }

    #[test]
    fn test_inverse_of_vv_equivalent_crosswind() {
        let cmod = Cmod5n::default();
        let sigma0 = 0.01 * polarization_ratio(35.0);
        assert_abs_diff_eq!(cmod.inverse(sigma0, 90.0, 35.0), 5.3516, epsilon = 1e-3);
    }

    #[test]
    fn test_inverse_undefined_inputs() {
        let cmod = Cmod5n::default();
        assert!(cmod.inverse(f64::NAN, 0.0, 30.0).is_nan());
        assert!(cmod.inverse(0.0, 0.0, 30.0).is_nan());
        assert!(cmod.inverse(-0.01, 0.0, 30.0).is_nan());
        assert!(cmod.inverse(0.05, f64::NAN, 30.0).is_nan());
    }

    #[test]
    fn test_polarization_ratio() {
        assert_abs_diff_eq!(polarization_ratio(0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(polarization_ratio(35.0), 1.463146, epsilon = 1e-5);
    }

    #[test]
    fn test_invert_grid_matches_scalar_inverse() {
        let cmod = Cmod5n::default();
        let sigma0 = Array2::from_shape_fn((3, 4), |(r, c)| 0.02 + 0.01 * (r * 4 + c) as f32);
        let phi = Array2::from_elem((3, 4), 60.0f32);
        let inc = Array2::from_elem((3, 4), 32.0f32);
        let speed = cmod.invert_grid(&sigma0, &phi, &inc).unwrap();
        for ((r, c), v) in speed.indexed_iter() {
            let expected = cmod.inverse(sigma0[[r, c]] as f64, 60.0, 32.0) as f32;
            assert_eq!(*v, expected);
        }
    }

    #[test]
    fn test_invert_grid_shape_mismatch() {
        let cmod = Cmod5n::default();
        let sigma0 = Array2::from_elem((3, 4), 0.05f32);
        let phi = Array2::from_elem((3, 3), 0.0f32);
        let inc = Array2::from_elem((3, 4), 30.0f32);
        assert!(matches!(
            cmod.invert_grid(&sigma0, &phi, &inc),
            Err(WindError::Shape { .. })
        ));
    }
}
