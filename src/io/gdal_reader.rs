use crate::io::raster::{bilinear_f64, parse_timestamp, Band, BandDescriptor, Geolocation, RasterHandle};
use crate::io::GridEngine;
use crate::types::{GeoTransform, Polarization, SampleType, WindError, WindResult};
use gdal::{Dataset, Metadata};
use ndarray::Array2;

/// Global attribute prefix added by the GDAL netCDF driver
const NC_GLOBAL_PREFIX: &str = "NC_GLOBAL#";

/// Grid engine backed by GDAL; every band is read into memory
#[derive(Debug, Clone, Default)]
pub struct GdalGridEngine;

impl GdalGridEngine {
    pub fn new() -> Self {
        Self
    }
}

impl GridEngine for GdalGridEngine {
    fn open(&self, location: &str) -> WindResult<RasterHandle> {
        log::info!("Opening dataset: {}", location);

        let dataset = Dataset::open(location).map_err(|e| WindError::Open {
            path: location.to_string(),
            reason: e.to_string(),
        })?;

        // netCDF files expose their variables as subdatasets
        let subdatasets = subdataset_names(&dataset);
        let sources: Vec<Dataset> = if dataset.raster_count() == 0 && !subdatasets.is_empty() {
            let mut opened = Vec::with_capacity(subdatasets.len());
            for name in &subdatasets {
                match Dataset::open(name.as_str()) {
                    Ok(ds) => opened.push(ds),
                    Err(e) => log::warn!("Skipping subdataset {}: {}", name, e),
                }
            }
            opened
        } else {
            vec![dataset]
        };

        // All variables sharing the grid of the largest raster are kept
        let shape = sources
            .iter()
            .map(|ds| {
                let (w, h) = ds.raster_size();
                (h, w)
            })
            .max_by_key(|(h, w)| h * w)
            .filter(|(h, w)| h * w > 0)
            .ok_or_else(|| WindError::Open {
                path: location.to_string(),
                reason: "no raster bands".to_string(),
            })?;

        let geolocation = read_geolocation(&sources, shape)?;
        let mut raster = RasterHandle::new(location, shape, geolocation)?;

        for ds in &sources {
            for (key, value) in metadata_pairs(ds, "") {
                let key = key.trim_start_matches(NC_GLOBAL_PREFIX).to_string();
                if !raster.metadata.contains(&key) {
                    raster.metadata.set(key, value);
                }
            }

            let (w, h) = ds.raster_size();
            if (h, w) != shape {
                log::debug!("Skipping {}x{} variable on another grid", h, w);
                continue;
            }
            for index in 1..=ds.raster_count() {
                let band = ds.rasterband(index)?;
                let buffer = band.read_as::<f32>((0, 0), (w, h), (w, h), None)?;
                let data = Array2::from_shape_vec((h, w), buffer.data)
                    .map_err(|e| WindError::Processing(format!("Failed to reshape band data: {}", e)))?;

                let mut descriptor = BandDescriptor::default()
                    .with_data_type(SampleType::from_gdal_name(&format!("{:?}", band.band_type())));
                for (key, value) in metadata_pairs(&band, "") {
                    apply_band_attribute(&mut descriptor, &key, &value);
                }
                if descriptor.fill_value.is_none() {
                    descriptor.fill_value = band.no_data_value().map(|v| v as f32);
                }
                if descriptor.name.is_none() {
                    descriptor.name = band.description().ok().filter(|d| !d.is_empty());
                }
                raster.add_band(Band::new(descriptor, data))?;
            }
        }

        log::info!(
            "Opened {} with {} bands on a {}x{} grid",
            location,
            raster.bands().len(),
            shape.0,
            shape.1
        );
        Ok(raster)
    }
}

fn metadata_pairs<M: Metadata>(item: &M, domain: &str) -> Vec<(String, String)> {
    item.metadata_domain(domain)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

fn subdataset_names(dataset: &Dataset) -> Vec<String> {
    metadata_pairs(dataset, "SUBDATASETS")
        .into_iter()
        .filter(|(k, _)| k.ends_with("_NAME"))
        .map(|(_, v)| v)
        .collect()
}

fn apply_band_attribute(descriptor: &mut BandDescriptor, key: &str, value: &str) {
    // netCDF variables report attributes as `<var>#<attr>`
    let attr = key.rsplit('#').next().unwrap_or(key);
    match attr {
        "standard_name" => descriptor.standard_name = Some(value.to_string()),
        "long_name" => descriptor.long_name = Some(value.to_string()),
        "units" => descriptor.units = Some(value.to_string()),
        "polarization" => descriptor.polarization = Polarization::parse(value),
        "NETCDF_VARNAME" | "name" => descriptor.name = Some(value.to_string()),
        "_FillValue" => descriptor.fill_value = value.trim().parse::<f32>().ok(),
        "time" => descriptor.time = parse_timestamp(value).ok(),
        _ => {}
    }
}

fn read_geolocation(sources: &[Dataset], shape: (usize, usize)) -> WindResult<Geolocation> {
    for ds in sources {
        if let Some(geo) = read_geolocation_arrays(ds, shape)? {
            return Ok(geo);
        }
    }

    // Fall back to longitude/latitude variables on the raster grid
    let mut lon = None;
    let mut lat = None;
    for ds in sources {
        let (w, h) = ds.raster_size();
        if (h, w) != shape || ds.raster_count() < 1 {
            continue;
        }
        let band = ds.rasterband(1)?;
        let standard_name = metadata_pairs(&band, "")
            .into_iter()
            .find(|(k, _)| k.rsplit('#').next() == Some("standard_name"))
            .map(|(_, v)| v);
        match standard_name.as_deref() {
            Some("longitude") => lon = Some(read_f64(ds, 1)?),
            Some("latitude") => lat = Some(read_f64(ds, 1)?),
            _ => {}
        }
    }
    if let (Some(longitude), Some(latitude)) = (lon, lat) {
        return Ok(Geolocation::Grids { longitude, latitude });
    }

    let ds = sources
        .iter()
        .find(|ds| {
            let (w, h) = ds.raster_size();
            (h, w) == shape
        })
        .ok_or_else(|| WindError::Metadata("no dataset on the raster grid".to_string()))?;
    Ok(Geolocation::Affine(GeoTransform::from_gdal(ds.geo_transform()?)))
}

/// Geolocation arrays from the GDAL `GEOLOCATION` metadata domain
fn read_geolocation_arrays(ds: &Dataset, shape: (usize, usize)) -> WindResult<Option<Geolocation>> {
    let items: std::collections::HashMap<String, String> =
        metadata_pairs(ds, "GEOLOCATION").into_iter().collect();
    let (x_ds, y_ds) = match (items.get("X_DATASET"), items.get("Y_DATASET")) {
        (Some(x), Some(y)) => (x, y),
        _ => return Ok(None),
    };
    let number = |key: &str, default: f64| {
        items
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(default)
    };
    let x_band = number("X_BAND", 1.0) as isize;
    let y_band = number("Y_BAND", 1.0) as isize;
    let pixel_offset = number("PIXEL_OFFSET", 0.0);
    let pixel_step = number("PIXEL_STEP", 1.0).max(f64::EPSILON);
    let line_offset = number("LINE_OFFSET", 0.0);
    let line_step = number("LINE_STEP", 1.0).max(f64::EPSILON);

    let lon = read_f64(&Dataset::open(x_ds.as_str())?, x_band)?;
    let lat = read_f64(&Dataset::open(y_ds.as_str())?, y_band)?;

    let expand = |grid: &Array2<f64>| {
        if grid.dim() == shape {
            return grid.clone();
        }
        Array2::from_shape_fn(shape, |(r, c)| {
            let gr = (r as f64 - line_offset) / line_step;
            let gc = (c as f64 - pixel_offset) / pixel_step;
            bilinear_f64(grid, gr, gc)
        })
    };

    Ok(Some(Geolocation::Grids {
        longitude: expand(&lon),
        latitude: expand(&lat),
    }))
}

fn read_f64(ds: &Dataset, index: isize) -> WindResult<Array2<f64>> {
    let (w, h) = ds.raster_size();
    let band = ds.rasterband(index)?;
    let buffer = band.read_as::<f64>((0, 0), (w, h), (w, h), None)?;
    Array2::from_shape_vec((h, w), buffer.data)
        .map_err(|e| WindError::Processing(format!("Failed to reshape geolocation array: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_attributes_from_netcdf_keys() {
        let mut descriptor = BandDescriptor::default();
        apply_band_attribute(&mut descriptor, "sigma0_HH#standard_name", "surface_backwards_scattering_coefficient_of_radar_wave");
        apply_band_attribute(&mut descriptor, "polarization", "HH");
        apply_band_attribute(&mut descriptor, "_FillValue", "-10000");
        apply_band_attribute(&mut descriptor, "NETCDF_VARNAME", "sigma0_HH");
        assert_eq!(
            descriptor.standard_name.as_deref(),
            Some("surface_backwards_scattering_coefficient_of_radar_wave")
        );
        assert_eq!(descriptor.polarization, Some(Polarization::HH));
        assert_eq!(descriptor.fill_value, Some(-10000.0));
        assert_eq!(descriptor.name.as_deref(), Some("sigma0_HH"));
    }

    #[test]
    fn test_open_missing_file_is_open_error() {
        let engine = GdalGridEngine::new();
        let result = engine.open("/nonexistent/S1A_EW_GRDM_1SDH.nc");
        assert!(matches!(result, Err(WindError::Open { .. })));
    }

    #[test]
    fn test_open_geotiff_topography() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topo.tif");
        {
            let driver = gdal::DriverManager::get_driver_by_name("GTiff").unwrap();
            let mut ds = driver
                .create_with_band_type::<f32, _>(&path, 4, 3, 1)
                .unwrap();
            ds.set_geo_transform(&[5.0, 0.5, 0.0, 62.0, 0.0, -0.5]).unwrap();
            let mut band = ds.rasterband(1).unwrap();
            let buffer = gdal::raster::Buffer::new((4, 3), vec![10.0f32; 12]);
            band.write((0, 0), (4, 3), &buffer).unwrap();
        }

        let raster = GdalGridEngine::new().open(path.to_str().unwrap()).unwrap();
        assert_eq!(raster.shape(), (3, 4));
        assert_eq!(raster.bands().len(), 1);
        assert_eq!(raster.bands()[0].descriptor.data_type, Some(SampleType::Float32));
        let bbox = raster.footprint();
        assert!((bbox.min_lon - 5.0).abs() < 1e-9);
        assert!((bbox.max_lat - 62.0).abs() < 1e-9);
    }
}
