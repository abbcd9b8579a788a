//! Single-band GeoTIFF reading/writing with the `tiff` crate.
//!
//! Georeferencing is carried in ModelPixelScale (33550) and ModelTiepoint
//! (33922); the CRS is read from and written to the GeoKeyDirectory (34735)
//! as an EPSG code; the sentinel lives in GDAL_NODATA (42113) as ASCII.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tiff::ColorType;

use super::SampleFormat;
use crate::error::{Error, Result};
use crate::grid::{Extent, RasterGrid};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn backend(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Backend(format!("{context}: {e}"))
}

pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<(RasterGrid, SampleFormat)> {
    let path = path.as_ref();
    let file = File::open(path)?;
    decode_geotiff(file).map_err(|e| match e {
        Error::Backend(msg) => Error::Backend(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn read_geotiff_from_buffer(data: &[u8]) -> Result<(RasterGrid, SampleFormat)> {
    decode_geotiff(Cursor::new(data))
}

fn decode_geotiff<R: Read + Seek>(reader: R) -> Result<(RasterGrid, SampleFormat)> {
    let mut decoder = Decoder::new(reader).map_err(backend("TIFF decode error"))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(backend("cannot read dimensions"))?;
    match decoder.colortype().map_err(backend("cannot read color type"))? {
        ColorType::Gray(_) => {}
        other => {
            return Err(Error::Backend(format!(
                "expected a single-band raster, found {other:?}"
            )))
        }
    }

    let image = decoder.read_image().map_err(backend("cannot read image data"))?;
    #[allow(unreachable_patterns)]
    let (data, format): (Vec<f32>, SampleFormat) = match image {
        DecodingResult::U8(buf) => (buf.into_iter().map(f32::from).collect(), SampleFormat::Byte),
        DecodingResult::U16(buf) => (buf.into_iter().map(f32::from).collect(), SampleFormat::UInt16),
        DecodingResult::U32(buf) => (buf.into_iter().map(|v| v as f32).collect(), SampleFormat::UInt32),
        DecodingResult::U64(buf) => (buf.into_iter().map(|v| v as f32).collect(), SampleFormat::UInt64),
        DecodingResult::I8(buf) => (buf.into_iter().map(f32::from).collect(), SampleFormat::Int8),
        DecodingResult::I16(buf) => (buf.into_iter().map(f32::from).collect(), SampleFormat::Int16),
        DecodingResult::I32(buf) => (buf.into_iter().map(|v| v as f32).collect(), SampleFormat::Int32),
        DecodingResult::I64(buf) => (buf.into_iter().map(|v| v as f32).collect(), SampleFormat::Int64),
        DecodingResult::F32(buf) => (buf, SampleFormat::Float32),
        DecodingResult::F64(buf) => (buf.into_iter().map(|v| v as f32).collect(), SampleFormat::Float64),
        _ => return Err(Error::Backend("unsupported TIFF sample format".into())),
    };

    let (w, h) = (width as usize, height as usize);
    let extent = read_extent(&mut decoder, w, h)
        .unwrap_or_else(|| Extent::new(0.0, w as f64, 0.0, h as f64));

    let mut grid = RasterGrid::from_vec(data, w, h, extent)?;
    grid.crs = read_crs(&mut decoder);
    grid.nodata = decoder
        .get_tag_ascii_string(tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok());

    Ok((grid, format))
}

fn read_extent<R: Read + Seek>(decoder: &mut Decoder<R>, w: usize, h: usize) -> Option<Extent> {
    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z]
    let sx = scale[0].abs();
    let sy = scale[1].abs();
    let origin_x = tiepoint[3] - tiepoint[0] * sx;
    let origin_y = tiepoint[4] + tiepoint[1] * sy;
    Some(Extent::new(
        origin_x,
        origin_x + w as f64 * sx,
        origin_y - h as f64 * sy,
        origin_y,
    ))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<String> {
    let keys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY)).ok()?;
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let entries: Vec<&[u16]> = keys[4..].chunks_exact(4).take(count).collect();
    let code_for = |key: u16| {
        entries
            .iter()
            .find(|e| e[0] == key && e[1] == 0)
            .map(|e| e[3])
            .filter(|&v| v != 0 && v != USER_DEFINED)
    };
    code_for(PROJECTED_CS_TYPE)
        .or_else(|| code_for(GEOGRAPHIC_TYPE))
        .map(|code| format!("EPSG:{code}"))
}

fn epsg_code(crs: &str) -> Option<u16> {
    let (authority, code) = crs.split_once(':')?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    code.trim().parse().ok()
}

fn geo_keys(crs: Option<&str>) -> Vec<u16> {
    let code = crs.and_then(epsg_code);
    // EPSG 4000-4999 are geographic systems.
    let geographic = code.is_some_and(|c| (4000..5000).contains(&c));

    let mut entries = vec![
        [GT_MODEL_TYPE, 0, 1, if geographic { 2 } else { 1 }],
        [GT_RASTER_TYPE, 0, 1, 1],
    ];
    if let Some(c) = code {
        let key = if geographic { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
        entries.push([key, 0, 1, c]);
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

pub fn write_geotiff<P: AsRef<Path>>(grid: &RasterGrid, path: P) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(grid, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_geotiff_to_buffer(grid: &RasterGrid) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(grid, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_geotiff<W: Write + Seek>(grid: &RasterGrid, writer: W) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer).map_err(backend("TIFF encoder error"))?;
    let mut image = encoder
        .new_image::<Gray32Float>(grid.width as u32, grid.height as u32)
        .map_err(backend("cannot create TIFF image"))?;

    let scale = [grid.cell_size_x, grid.cell_size_y, 0.0];
    image
        .encoder()
        .write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(backend("cannot write pixel scale"))?;

    let tiepoint = [0.0, 0.0, 0.0, grid.extent.min_x, grid.extent.max_y, 0.0];
    image
        .encoder()
        .write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(backend("cannot write tiepoint"))?;

    let keys = geo_keys(grid.crs.as_deref());
    image
        .encoder()
        .write_tag(tag(GEO_KEY_DIRECTORY), &keys[..])
        .map_err(backend("cannot write geokey directory"))?;

    if let Some(nd) = grid.nodata {
        let text = nd.to_string();
        image
            .encoder()
            .write_tag(tag(GDAL_NODATA), text.as_str())
            .map_err(backend("cannot write nodata"))?;
    }

    image
        .write_data(&grid.data)
        .map_err(backend("cannot write image data"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn georeferencing_survives_a_write_read_cycle() {
        let mut grid = RasterGrid::new(3, 2, Extent::new(1000.0, 1300.0, 5000.0, 5200.0), 0.25)
            .with_crs("EPSG:3035")
            .with_nodata(-9999.0);
        grid.set(1, 2, -9999.0);

        let bytes = write_geotiff_to_buffer(&grid).unwrap();
        let (back, format) = read_geotiff_from_buffer(&bytes).unwrap();

        assert_eq!(format, SampleFormat::Float32);
        assert_eq!((back.width, back.height), (3, 2));
        assert_eq!(back.data, grid.data);
        assert_eq!(back.extent, grid.extent);
        assert!((back.cell_size_x - 100.0).abs() < 1e-9);
        assert_eq!(back.crs.as_deref(), Some("EPSG:3035"));
        assert_eq!(back.nodata, Some(-9999.0));
        assert!(!back.is_valid(5));
    }

    #[test]
    fn geographic_codes_use_the_geographic_key() {
        let keys = geo_keys(Some("EPSG:4326"));
        assert_eq!(&keys[..4], &[1, 1, 0, 3]);
        assert_eq!(&keys[4..8], &[GT_MODEL_TYPE, 0, 1, 2]);
        assert_eq!(&keys[12..16], &[GEOGRAPHIC_TYPE, 0, 1, 4326]);
    }

    #[test]
    fn unknown_crs_writes_model_keys_only() {
        let keys = geo_keys(Some("LOCAL_CS[\"x\"]"));
        assert_eq!(keys[3], 2);
        assert_eq!(geo_keys(None).len(), 12);
    }

    #[test]
    fn garbage_input_is_a_backend_error() {
        let r = read_geotiff_from_buffer(b"not a tiff");
        assert!(matches!(r, Err(Error::Backend(_))));
    }
}
