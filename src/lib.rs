//! SARWind: ocean surface wind retrieval from SAR backscatter
//!
//! Collocates a calibrated SAR scene with a numerical weather prediction wind
//! field, inverts the backscatter into wind speed with CMOD5.N using the model
//! wind direction, masks land and derives eastward/northward components.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, GeoTransform, MaskArray, NrcsDefect, Polarization, RasterArray, SampleType,
    WindError, WindResult,
};

pub use io::{Band, BandDescriptor, BandQuery, Geolocation, GridEngine, MetadataSet, RasterHandle, ResampleAlg};

#[cfg(feature = "gdal")]
pub use io::GdalGridEngine;

pub use crate::core::{
    retrieve_wind, Cmod5n, CollocationResult, GeophysicalModelFunction, RetrievalOutput,
    RetrievalParams, WindField, WindRetriever,
};

#[cfg(feature = "python")]
mod python {
    use crate::core::{Cmod5n, GeophysicalModelFunction, RetrievalParams, WindRetriever};
    use crate::io::{GdalGridEngine, ResampleAlg};
    use crate::types::WindError;
    use numpy::{PyReadonlyArray2, ToPyArray};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    fn to_py_err(e: WindError) -> PyErr {
        PyErr::new::<PyRuntimeError, _>(format!("{}", e))
    }

    /// Wind speed (m/s) from linear VV NRCS, relative direction and incidence (degrees)
    #[pyfunction]
    #[pyo3(signature = (sigma0, phi, incidence, iterations=10))]
    fn cmod5n_inverse(
        py: Python,
        sigma0: PyReadonlyArray2<f32>,
        phi: PyReadonlyArray2<f32>,
        incidence: PyReadonlyArray2<f32>,
        iterations: usize,
    ) -> PyResult<PyObject> {
        let sigma0 = sigma0.as_array().to_owned();
        let phi = phi.as_array().to_owned();
        let incidence = incidence.as_array().to_owned();
        let speed = Cmod5n::new(iterations)
            .invert_grid(&sigma0, &phi, &incidence)
            .map_err(to_py_err)?;
        Ok(speed.to_pyarray(py).into())
    }

    /// Linear VV NRCS from wind speed (m/s), relative direction and incidence (degrees)
    #[pyfunction]
    fn cmod5n_forward(
        py: Python,
        windspeed: PyReadonlyArray2<f32>,
        phi: PyReadonlyArray2<f32>,
        incidence: PyReadonlyArray2<f32>,
    ) -> PyResult<PyObject> {
        let windspeed = windspeed.as_array();
        let phi = phi.as_array();
        let incidence = incidence.as_array();
        if phi.dim() != windspeed.dim() || incidence.dim() != windspeed.dim() {
            return Err(PyValueError::new_err("Input arrays must have the same shape"));
        }
        let cmod = Cmod5n::default();
        let sigma0 = ndarray::Zip::from(&windspeed)
            .and(&phi)
            .and(&incidence)
            .map_collect(|&v, &p, &i| cmod.forward(v as f64, p as f64, i as f64) as f32);
        Ok(sigma0.to_pyarray(py).into())
    }

    /// Retrieve wind from SAR, model wind and topography files
    #[pyfunction]
    #[pyo3(signature = (sar_path, wind_path, topography_path, pixel_size=500.0, resample_alg="bilinear", max_diff_minutes=180.0))]
    fn retrieve_wind(
        py: Python,
        sar_path: &str,
        wind_path: &str,
        topography_path: &str,
        pixel_size: f64,
        resample_alg: &str,
        max_diff_minutes: f64,
    ) -> PyResult<PyObject> {
        let resample_alg = ResampleAlg::parse(resample_alg).ok_or_else(|| {
            PyValueError::new_err(format!("Invalid resampling algorithm: {}", resample_alg))
        })?;
        let params = RetrievalParams {
            pixel_size_m: pixel_size,
            resample_alg,
            max_time_diff_minutes: max_diff_minutes,
            ..Default::default()
        };

        let output = WindRetriever::new(params)
            .retrieve_from(&GdalGridEngine::new(), sar_path, wind_path, topography_path)
            .map_err(to_py_err)?;

        let result = PyDict::new(py);
        for band in output.bands() {
            if let Some(name) = &band.descriptor.name {
                result.set_item(name.as_str(), band.data.to_pyarray(py))?;
            }
        }
        if let Some(mask) = &output.validity_mask {
            result.set_item("validity_mask", mask.to_pyarray(py))?;
        }
        let (longitude, latitude) = output.geolocation.grids(output.shape());
        result.set_item("longitude", longitude.to_pyarray(py))?;
        result.set_item("latitude", latitude.to_pyarray(py))?;

        let metadata = PyDict::new(py);
        for (key, value) in output.metadata.iter() {
            metadata.set_item(key.as_str(), value.as_str())?;
        }
        result.set_item("metadata", metadata)?;

        Ok(result.into())
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(cmod5n_inverse, m)?)?;
        m.add_function(wrap_pyfunction!(cmod5n_forward, m)?)?;
        m.add_function(wrap_pyfunction!(retrieve_wind, m)?)?;
        Ok(())
    }
}
