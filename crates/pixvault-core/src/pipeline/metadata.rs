//! EXIF metadata extraction from image bytes.

use exif::{In, Reader, Tag, Value};
use std::io::Cursor;

use crate::types::ExifData;

/// Extracts EXIF metadata from in-memory images.
pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Extract EXIF data from image bytes.
    ///
    /// Returns `None` if the image has no EXIF data or if parsing fails.
    /// Partial data is returned when only some fields are present.
    pub fn extract(bytes: &[u8]) -> Option<ExifData> {
        let mut reader = Cursor::new(bytes);
        let exif = Reader::new().read_from_container(&mut reader).ok()?;

        let data = ExifData {
            captured_at: Self::get_datetime(&exif),
            camera_make: Self::get_string(&exif, Tag::Make),
            camera_model: Self::get_string(&exif, Tag::Model),
            gps_latitude: Self::get_gps_coord(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
            gps_longitude: Self::get_gps_coord(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
            orientation: Self::get_u32(&exif, Tag::Orientation),
        };

        if data == ExifData::default() {
            None
        } else {
            Some(data)
        }
    }

    fn get_string(exif: &exif::Exif, tag: Tag) -> Option<String> {
        exif.get_field(tag, In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').to_string())
    }

    fn get_u32(exif: &exif::Exif, tag: Tag) -> Option<u32> {
        exif.get_field(tag, In::PRIMARY)
            .and_then(|f| match &f.value {
                Value::Short(v) => v.first().map(|&x| x as u32),
                Value::Long(v) => v.first().copied(),
                _ => None,
            })
    }

    /// Capture time, preferring DateTimeOriginal over DateTime.
    fn get_datetime(exif: &exif::Exif) -> Option<String> {
        exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)
            .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))
            .map(|f| f.display_value().to_string().trim_matches('"').to_string())
    }

    /// GPS coordinate in decimal degrees, negative for S and W.
    fn get_gps_coord(exif: &exif::Exif, coord_tag: Tag, ref_tag: Tag) -> Option<f64> {
        let coord = exif.get_field(coord_tag, In::PRIMARY)?;
        let reference = exif.get_field(ref_tag, In::PRIMARY)?;

        let degrees = Self::parse_gps_rationals(&coord.value)?;
        let ref_str = reference.display_value().to_string();
        let sign = if ref_str.contains('S') || ref_str.contains('W') {
            -1.0
        } else {
            1.0
        };

        Some(sign * degrees)
    }

    fn parse_gps_rationals(value: &Value) -> Option<f64> {
        match value {
            Value::Rational(rationals) if rationals.len() >= 3 => {
                let degrees = rationals[0].to_f64();
                let minutes = rationals[1].to_f64();
                let seconds = rationals[2].to_f64();
                Some(degrees + minutes / 60.0 + seconds / 3600.0)
            }
            _ => None,
        }
    }
}
