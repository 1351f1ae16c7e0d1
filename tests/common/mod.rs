#![allow(dead_code)]

use ndarray::Array2;
use sarwind::core::band_resolver::{INCIDENCE_STANDARD_NAME, NRCS_STANDARD_NAME};
use sarwind::core::retrieval::LOOK_DIRECTION_STANDARD_NAME;
use sarwind::{
    Band, BandDescriptor, GeoTransform, Geolocation, Polarization, RasterHandle, RetrievalParams,
    SampleType,
};

pub const SAR_SHAPE: (usize, usize) = (100, 100);
pub const SAR_START: &str = "2024-04-04T12:00:00Z";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn affine(name: &str, shape: (usize, usize), gt: [f64; 6]) -> RasterHandle {
    RasterHandle::new(name, shape, Geolocation::Affine(GeoTransform::from_gdal(gt))).unwrap()
}

pub fn constant(raster: &mut RasterHandle, descriptor: BandDescriptor, value: f32) {
    let shape = raster.shape();
    raster
        .add_band(Band::new(descriptor, Array2::from_elem(shape, value)))
        .unwrap();
}

/// 100x100 SAR scene over 5-6 E, 60-61 N with a zero-length acquisition at `SAR_START`
pub fn sar_scene(polarization: Polarization, nrcs: f32, incidence: f32, look: f32) -> RasterHandle {
    sar_scene_at(5.0, polarization, nrcs, incidence, look)
}

/// Same scene with its western edge at `west_lon`
pub fn sar_scene_at(
    west_lon: f64,
    polarization: Polarization,
    nrcs: f32,
    incidence: f32,
    look: f32,
) -> RasterHandle {
    let mut sar = affine(
        "S1A_EW_GRDM_1SDH_20240404T120000.nc",
        SAR_SHAPE,
        [west_lon, 0.01, 0.0, 61.0, 0.0, -0.01],
    );
    sar.metadata.set("time_coverage_start", SAR_START);
    sar.metadata.set("time_coverage_end", SAR_START);
    sar.metadata.set("naming_authority", "no.met");
    sar.metadata.set("id", "0b6fca1e-2c39-4a0e-8f7e-5a1d2e3c4b5a");
    constant(
        &mut sar,
        BandDescriptor::new(NRCS_STANDARD_NAME)
            .named(&format!("sigma0_{}", polarization))
            .with_polarization(polarization)
            .with_data_type(SampleType::Float32),
        nrcs,
    );
    constant(&mut sar, BandDescriptor::new(INCIDENCE_STANDARD_NAME).named("incidence_angle"), incidence);
    constant(&mut sar, BandDescriptor::new(LOOK_DIRECTION_STANDARD_NAME).named("sensor_azimuth"), look);
    sar
}

/// Coarse model grid covering the SAR scene
pub fn model_grid(name: &str, time: &str) -> RasterHandle {
    let mut aux = affine(name, (20, 20), [4.5, 0.1, 0.0, 61.5, 0.0, -0.1]);
    aux.metadata.set("time_coverage_start", time);
    aux
}

pub fn model_direct(direction: f32, speed: f32, time: &str) -> RasterHandle {
    let mut aux = model_grid("arome_arctic_det_2_5km_20240404T12Z.nc", time);
    constant(&mut aux, BandDescriptor::new("wind_from_direction"), direction);
    constant(&mut aux, BandDescriptor::new("wind_speed"), speed);
    aux
}

pub fn model_components(eastward: f32, northward: f32, time: &str) -> RasterHandle {
    let mut aux = model_grid("meps_det_2_5km_20240404T12Z.nc", time);
    constant(&mut aux, BandDescriptor::new("eastward_wind"), eastward);
    constant(&mut aux, BandDescriptor::new("northward_wind"), northward);
    aux
}

/// GFS-style 0.25 degree model with longitudes 0..360, rows 70-50 N
pub fn global_model_direct(direction: f32, speed: f32, time: &str) -> RasterHandle {
    let mut aux = affine("gfs_0p25_20240404T12Z.nc", (81, 1440), [-0.125, 0.25, 0.0, 70.125, 0.0, -0.25]);
    aux.metadata.set("time_coverage_start", time);
    constant(&mut aux, BandDescriptor::new("wind_from_direction"), direction);
    constant(&mut aux, BandDescriptor::new("wind_speed"), speed);
    aux
}

/// 0.5 degree topography on 0..360 longitudes, land west of 355.5 E (4.5 W)
pub fn global_coastline() -> RasterHandle {
    let mut topo = affine("etopo_0p5.tif", (40, 720), [0.0, 0.5, 0.0, 70.0, 0.0, -0.5]);
    let elevation = Array2::from_shape_fn((40, 720), |(_, c)| if c < 711 { 120.0 } else { -80.0 });
    topo.add_band(Band::new(BandDescriptor::default().named("elevation"), elevation))
        .unwrap();
    topo
}

pub fn topography(elevation: f32) -> RasterHandle {
    let mut topo = affine("gtopo30.tif", (60, 60), [4.0, 0.05, 0.0, 62.0, 0.0, -0.05]);
    constant(&mut topo, BandDescriptor::default().named("elevation"), elevation);
    topo
}

/// Land west of 5.5 E, sea east of it
pub fn coastline() -> RasterHandle {
    let mut topo = affine("gtopo30.tif", (60, 60), [4.0, 0.05, 0.0, 62.0, 0.0, -0.05]);
    let elevation = Array2::from_shape_fn((60, 60), |(_, c)| if c < 30 { 120.0 } else { -80.0 });
    topo.add_band(Band::new(BandDescriptor::default().named("elevation"), elevation))
        .unwrap();
    topo
}

pub fn native_params() -> RetrievalParams {
    RetrievalParams {
        pixel_size_m: 0.0,
        ..Default::default()
    }
}
