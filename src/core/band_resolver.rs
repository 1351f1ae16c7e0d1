use crate::core::cmod::polarization_ratio;
use crate::io::raster::{Band, BandQuery, RasterHandle};
use crate::types::{Polarization, SampleType, WindError, WindResult};
use ndarray::Zip;

/// CF standard name of calibrated backscatter
pub const NRCS_STANDARD_NAME: &str = "surface_backwards_scattering_coefficient_of_radar_wave";

/// CF standard name of the incidence angle band
pub const INCIDENCE_STANDARD_NAME: &str = "angle_of_incidence";

/// Backscatter band selected for inversion
#[derive(Debug, Clone)]
pub struct ResolvedNrcs {
    /// VV or VV-equivalent linear NRCS
    pub band: Band,
    /// Polarization of the source band
    pub polarization: Polarization,
}

/// Selects the backscatter band of a SAR product by polarization preference
#[derive(Debug, Clone)]
pub struct BandResolver {
    preference: Vec<Polarization>,
    incidence_query: BandQuery,
}

impl Default for BandResolver {
    fn default() -> Self {
        Self::new(BandQuery::standard_name(INCIDENCE_STANDARD_NAME))
    }
}

impl BandResolver {
    /// HH first, then VV
    pub fn new(incidence_query: BandQuery) -> Self {
        Self {
            preference: vec![Polarization::HH, Polarization::VV],
            incidence_query,
        }
    }

    pub fn with_preference(mut self, preference: Vec<Polarization>) -> Self {
        self.preference = preference;
        self
    }

    /// Candidate queries in the order they are tried
    pub fn candidates(&self) -> Vec<BandQuery> {
        self.preference.iter().map(|&pol| nrcs_query(pol)).collect()
    }

    pub fn resolve(&self, sar: &RasterHandle) -> WindResult<ResolvedNrcs> {
        let (query, band) = self
            .candidates()
            .into_iter()
            .find_map(|q| sar.find_band(&q).map(|b| (q, b)))
            .ok_or_else(|| WindError::BandNotFound {
                dataset: sar.name().to_string(),
                query: self
                    .candidates()
                    .iter()
                    .map(|q| q.to_string())
                    .collect::<Vec<_>>()
                    .join(" or "),
            })?;

        let polarization = query.polarization.unwrap_or(Polarization::VV);
        log::info!("Selected {} NRCS band from {}", polarization, sar.name());

        let band = match polarization {
            Polarization::HH => {
                let incidence = sar.get_band(&self.incidence_query)?;
                let corrected = Zip::from(&band.data)
                    .and(&incidence.data)
                    .map_collect(|&s0, &inc| (s0 as f64 * polarization_ratio(inc as f64)) as f32);
                log::debug!("Applied HH to VV polarization ratio correction");
                Band::new(band.descriptor.clone(), corrected)
            }
            _ => band.clone(),
        };

        Ok(ResolvedNrcs { band, polarization })
    }
}

/// Float32 NRCS band of one polarization
pub fn nrcs_query(polarization: Polarization) -> BandQuery {
    BandQuery::standard_name(NRCS_STANDARD_NAME)
        .with_polarization(polarization)
        .with_data_type(SampleType::Float32)
}

/// Resolve the NRCS with the default HH-then-VV preference
pub fn resolve_nrcs(sar: &RasterHandle, incidence_query: &BandQuery) -> WindResult<ResolvedNrcs> {
    BandResolver::new(incidence_query.clone()).resolve(sar)
}
