//! GGA extraction from raw NMEA sentences. Only GGA carries the geoid separation the altitude
//! calibration needs; every other sentence type is skipped before parsing.

use nmea0183::{ParseResult, Parser};

use crate::error::{Result, TrackerError};

#[derive(Clone, Debug, PartialEq)]
pub struct GgaSentence {
    pub satellites: u8,
    pub hdop: f64,
    /// Antenna altitude above mean sea level, meters
    pub altitude_msl: Option<f64>,
    /// Height of the geoid above the WGS84 ellipsoid, meters
    pub geoid_separation: Option<f64>,
}

fn sentence_type(sentence: &str) -> Option<&str> {
    let body = sentence.strip_prefix('$')?;
    let tag = body.split(',').next()?;
    tag.get(2..)
}

/// Parse one `$xxGGA` sentence.
///
/// Returns `Ok(None)` for other sentence types and for GGA sentences reporting no fix.
/// A bad checksum or malformed field is an error.
pub fn parse_gga(sentence: &str) -> Result<Option<GgaSentence>> {
    let sentence = sentence.trim();
    if !sentence.starts_with('$') {
        return Err(TrackerError::InvalidNmea(format!("missing '$': {}", sentence)));
    }
    if sentence_type(sentence) != Some("GGA") {
        return Ok(None);
    }

    let line = format!("{}\r\n", sentence);
    let mut parser = Parser::new();
    let mut parsed = None;
    for result in parser.parse_from_bytes(line.as_bytes()) {
        match result {
            Ok(ParseResult::GGA(Some(gga))) => {
                parsed = Some(GgaSentence {
                    satellites: gga.sat_in_use,
                    hdop: f64::from(gga.hdop),
                    altitude_msl: Some(f64::from(gga.altitude.meters)),
                    geoid_separation: gga.geoidal_separation.map(f64::from),
                });
            }
            Ok(_) => {}
            Err(e) => return Err(TrackerError::InvalidNmea(format!("{}: {}", e, sentence))),
        }
    }
    Ok(parsed)
}
