//! Wind retrieval and collocation modules

pub mod band_resolver;
pub mod cmod;
pub mod collocation;
pub mod inversion;
pub mod masking;
pub mod provenance;
pub mod retrieval;
pub mod wind_normalizer;

// Re-export main types
pub use band_resolver::{resolve_nrcs, BandResolver, ResolvedNrcs};
pub use cmod::{polarization_ratio, Cmod5n, GeophysicalModelFunction};
pub use collocation::{CollocationResult, CollocationValidator};
pub use inversion::{InversionInputs, InvertedWind, WindInverter};
pub use masking::{land_mask, validity_mask, LandMaskParams};
pub use provenance::RetrievalProvenance;
pub use retrieval::{retrieve_wind, RetrievalOutput, RetrievalParams, WindRetriever};
pub use wind_normalizer::{normalize, WindConvention, WindField, WindNormalizer};
