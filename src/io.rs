use std::fmt::Display;
use std::path::Path;

use fitrs::{Fits, Hdu, HeaderValue};

use crate::{PipelineError, Result, Vec2D, Wcs};

/// What the pipeline needs to know about one header data unit.
#[derive(Clone, Debug, PartialEq)]
pub struct HduSummary {
    pub extname: Option<String>,
    pub shape: Vec<usize>,
}

impl HduSummary {
    /// true when the HDU carries a non-empty data array
    pub fn has_data(&self) -> bool {
        !self.shape.is_empty() && self.shape.iter().all(|&n| n > 0)
    }

    /// true for a science extension (or an unnamed one)
    pub fn is_science(&self) -> bool {
        match &self.extname {
            Some(name) => name.eq_ignore_ascii_case("SCI"),
            None => true,
        }
    }
}

fn hdus(fits: &Fits) -> impl Iterator<Item = Hdu> + '_ {
    (0..).map_while(move |index| fits.get(index))
}

fn header_string(hdu: &Hdu, key: &str) -> Option<String> {
    match hdu.value(key) {
        Some(HeaderValue::CharacterString(s)) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn header_f64(hdu: &Hdu, key: &str) -> Option<f64> {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(a)) => Some(*a as f64),
        Some(HeaderValue::RealFloatingNumber(a)) => Some(*a),
        _ => None,
    }
}

fn header_shape(hdu: &Hdu) -> Vec<usize> {
    let naxis = match hdu.value("NAXIS") {
        Some(HeaderValue::IntegerNumber(n)) if *n > 0 => *n as usize,
        _ => return vec![],
    };
    (1..=naxis)
        .map(|axis| match hdu.value(&format!("NAXIS{}", axis)) {
            Some(HeaderValue::IntegerNumber(n)) if *n > 0 => *n as usize,
            _ => 0,
        })
        .collect()
}

/// list every HDU in the file, primary first
pub fn hdu_summaries(filename: &Path) -> Result<Vec<HduSummary>> {
    let fits = Fits::open(filename)?;
    let summaries: Vec<HduSummary> = hdus(&fits)
        .map(|hdu| HduSummary {
            extname: header_string(&hdu, "EXTNAME"),
            shape: header_shape(&hdu),
        })
        .collect();
    if summaries.is_empty() {
        return Err(PipelineError::InvalidFITS(format!(
            "no primary hdu in {}",
            filename.display()
        )));
    }
    Ok(summaries)
}

/// Instrument, detector and filter of an HST exposure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instrument {
    pub name: String,
    pub detector: String,
    pub filter: String,
}

impl Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.detector, self.filter)
    }
}

impl Instrument {
    /// read INSTRUME, DETECTOR and the filter keywords, searching every HDU
    pub fn from_fits(filename: &Path) -> Result<Instrument> {
        let fits = Fits::open(filename)?;
        let find = |key: &str| hdus(&fits).find_map(|hdu| header_string(&hdu, key));

        let name = find("INSTRUME")
            .ok_or_else(|| PipelineError::missing_key("INSTRUME", filename))?
            .to_lowercase();
        let detector = if name == "wfpc2" {
            // WFPC2 stores the chip number in DETECTOR
            "wfpc2".to_string()
        } else {
            find("DETECTOR")
                .ok_or_else(|| PipelineError::missing_key("DETECTOR", filename))?
                .to_lowercase()
        };
        let filter = ["FILTER", "FILTER1", "FILTER2", "FILTNAM1"]
            .iter()
            .filter_map(|key| find(*key))
            .find(|f| !f.is_empty() && !f.to_uppercase().starts_with("CLEAR"))
            .ok_or_else(|| PipelineError::missing_key("FILTER", filename))?
            .to_lowercase();

        Ok(Instrument {
            name,
            detector,
            filter,
        })
    }

    /// instrument and detector, e.g. `acs_wfc`; keys the parameter tables
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.detector)
    }
}

/// Pixel grid and celestial WCS of a single-chip image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageGeometry {
    pub shape: [usize; 2], // numpy style
    pub wcs: Wcs,
}

impl ImageGeometry {
    /// read the first two dimensional HDU of the file
    pub fn from_fits(filename: &Path) -> Result<ImageGeometry> {
        let fits = Fits::open(filename)?;
        let hdu = hdus(&fits)
            .find(|hdu| {
                let shape = header_shape(hdu);
                shape.len() == 2 && shape.iter().all(|&n| n > 0)
            })
            .ok_or_else(|| {
                PipelineError::InvalidFITS(format!(
                    "no two dimensional image in {}",
                    filename.display()
                ))
            })?;
        let naxis = header_shape(&hdu);

        for key in ["CTYPE1", "CTYPE2"] {
            let ctype =
                header_string(&hdu, key).ok_or_else(|| PipelineError::missing_key(key, filename))?;
            if !ctype.contains("-TAN") {
                return Err(PipelineError::Reprojection {
                    path: filename.to_path_buf(),
                    reason: format!("unsupported projection {} = {}", key, ctype),
                });
            }
        }

        let number = |key: &str| {
            header_f64(&hdu, key).ok_or_else(|| PipelineError::missing_key(key, filename))
        };
        let crpix = Vec2D {
            x: number("CRPIX1")?,
            y: number("CRPIX2")?,
        };
        let crval = Vec2D {
            x: number("CRVAL1")?,
            y: number("CRVAL2")?,
        };
        let cd = if hdu.value("CD1_1").is_some() {
            [
                [number("CD1_1")?, header_f64(&hdu, "CD1_2").unwrap_or(0.0)],
                [header_f64(&hdu, "CD2_1").unwrap_or(0.0), number("CD2_2")?],
            ]
        } else {
            let cdelt = [number("CDELT1")?, number("CDELT2")?];
            let pc = |i: usize, j: usize| {
                let identity = if i == j { 1.0 } else { 0.0 };
                header_f64(&hdu, &format!("PC{}_{}", i, j)).unwrap_or(identity)
            };
            [
                [cdelt[0] * pc(1, 1), cdelt[0] * pc(1, 2)],
                [cdelt[1] * pc(2, 1), cdelt[1] * pc(2, 2)],
            ]
        };
        let wcs = Wcs::new(crpix, crval, cd).ok_or_else(|| PipelineError::Reprojection {
            path: filename.to_path_buf(),
            reason: "singular CD matrix".to_string(),
        })?;

        Ok(ImageGeometry {
            shape: [naxis[1], naxis[0]],
            wcs,
        })
    }
}
