//! Output format table: format id -> file extension, movie vs. sequence.
//!
//! The extension is looked up here and nowhere else, so a path never ends up
//! with two extension suffixes.

use crate::error::ResolutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub id: &'static str,
    pub extension: &'static str,
    /// Single-file container; ignores frame numbers.
    pub movie: bool,
}

const fn sequence(id: &'static str, extension: &'static str) -> FormatInfo {
    FormatInfo {
        id,
        extension,
        movie: false,
    }
}

const fn movie(id: &'static str, extension: &'static str) -> FormatInfo {
    FormatInfo {
        id,
        extension,
        movie: true,
    }
}

pub const FORMATS: &[FormatInfo] = &[
    movie("QuickTimeMovies", "mov"),
    movie("MXFFormat", "mxf"),
    movie("AVIFormat", "avi"),
    sequence("OpenEXRFormat", "exr"),
    sequence("TiffFormat", "tif"),
    sequence("DPXFormat", "dpx"),
    sequence("JpegFormat", "jpg"),
    sequence("PngFormat", "png"),
    sequence("TargaFormat", "tga"),
    sequence("CineonFormat", "cin"),
    sequence("SGIFormat", "sgi"),
    sequence("BMPFormat", "bmp"),
    sequence("PhotoshopFormat", "psd"),
    sequence("SoftimageFormat", "pic"),
    sequence("MayaFormat", "iff"),
    sequence("Jpeg2000Format", "jp2"),
];

pub fn lookup(id: &str) -> Option<&'static FormatInfo> {
    let id = id.trim();
    FORMATS.iter().find(|info| info.id == id)
}

pub fn require(id: &str) -> Result<&'static FormatInfo, ResolutionError> {
    lookup(id).ok_or_else(|| ResolutionError::UnknownFormat {
        format: id.to_string(),
    })
}

/// Extension for `id`, without a leading dot.
pub fn extension_for(id: &str) -> Option<&'static str> {
    lookup(id).map(|info| sanitize_extension(info.extension))
}

/// Image sequences produce one file per frame; unknown ids are treated as sequences.
pub fn is_sequence(id: &str) -> bool {
    lookup(id).map_or(true, |info| !info.movie)
}

pub fn sanitize_extension(ext: &str) -> &str {
    ext.trim().trim_start_matches('.')
}
