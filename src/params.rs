//! DOLPHOT parameter sets, their default tables and the `dp.params` writer.

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{PipelineError, Result};

/// Scalar value of a single parameter.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{}", v),
            // Debug keeps the decimal point on whole numbers
            ParamValue::Float(v) => write!(f, "{:?}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(value as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

/// Parameters in insertion order. Inserting an existing key replaces its
/// value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, ParamValue)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// builder form of [`ParameterSet::insert`]
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// fill keys missing from `self` with the entries of `defaults`; explicit
    /// values are kept
    pub fn merge_defaults(&mut self, defaults: &ParameterSet) {
        for (key, value) in defaults.iter() {
            if !self.contains_key(key) {
                self.entries.push((key.to_string(), value.clone()));
            }
        }
    }

    /// overwrite with every entry of `overrides`
    pub fn apply(&mut self, overrides: &ParameterSet) {
        for (key, value) in overrides.iter() {
            self.insert(key, value.clone());
        }
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct ParameterSetVisitor;

impl<'de> Visitor<'de> for ParameterSetVisitor {
    type Value = ParameterSet;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a map of parameter names to scalar values")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut access: A,
    ) -> std::result::Result<ParameterSet, A::Error> {
        let mut params = ParameterSet::new();
        while let Some((key, value)) = access.next_entry::<String, ParamValue>()? {
            params.insert(&key, value);
        }
        Ok(params)
    }

    fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<ParameterSet, E> {
        Ok(ParameterSet::new())
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(ParameterSetVisitor)
    }
}

/// DOLPHOT global parameters used when the configuration does not set them.
pub fn dolphot_defaults() -> ParameterSet {
    ParameterSet::new()
        .with("SkipSky", 2)
        .with("SkySig", 2.25)
        .with("SecondPass", 5)
        .with("SearchMode", 1)
        .with("SigFind", 2.5)
        .with("SigFindMult", 0.85)
        .with("SigFinal", 3.5)
        .with("MaxIT", 25)
        .with("NoiseMult", 0.1)
        .with("FSat", 0.999)
        .with("ApCor", 1)
        .with("Force1", 0)
        .with("Align", 2)
        .with("Rotate", 1)
        .with("RCentroid", 2)
        .with("PosStep", 0.25)
        .with("dPosMax", 2.5)
        .with("RCombine", 1.5)
        .with("SigPSF", 5.0)
        .with("PSFres", 1)
        .with("PSFPhot", 1)
        .with("FitSky", 1)
        .with("FlagMask", 4)
        .with("CombineChi", 0)
        .with("InterpPSFlib", 1)
        .with("UseWCS", 1)
        .with("ACSuseCTE", 0)
        .with("WFC3useCTE", 0)
        .with("WFPC2useCTE", 1)
}

/// Recommended per-image DOLPHOT parameters for an instrument/detector key
/// such as `acs_wfc`.
pub fn image_defaults(detector_key: &str) -> Result<ParameterSet> {
    let (raper, rchi, rsky0, rsky1, rpsf, apsky) = match detector_key {
        "acs_wfc" | "acs_hrc" | "wfc3_uvis" => (3, 2.0, 15, 35, 10, "15 25"),
        "wfc3_ir" => (2, 1.5, 8, 20, 10, "8 20"),
        "wfpc2_wfpc2" => (2, 1.5, 4, 10, 10, "15 25"),
        _ => return Err(PipelineError::UnsupportedInstrument(detector_key.to_string())),
    };
    Ok(ParameterSet::new()
        .with("shift", "0 0")
        .with("xform", "1 0 0")
        .with("RAper", raper)
        .with("RChi", rchi)
        .with("RSky0", rsky0)
        .with("RSky1", rsky1)
        .with("RPSF", rpsf)
        .with("apsky", apsky))
}

/// Arguments of the `calcsky` background estimator.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct CalcSkyParams {
    pub r_in: i64,
    pub r_out: i64,
    pub step: i64,
    pub sigma_low: f64,
    pub sigma_high: f64,
}

impl CalcSkyParams {
    pub fn for_detector(detector_key: &str) -> Result<CalcSkyParams> {
        let (r_in, r_out, step) = match detector_key {
            "acs_wfc" | "wfc3_uvis" => (15, 35, 4),
            "acs_hrc" | "wfc3_ir" | "wfpc2_wfpc2" => (10, 25, 2),
            _ => return Err(PipelineError::UnsupportedInstrument(detector_key.to_string())),
        };
        Ok(CalcSkyParams {
            r_in,
            r_out,
            step,
            sigma_low: 2.25,
            sigma_high: 2.00,
        })
    }

    /// positional arguments after the image stem
    pub fn args(&self) -> Vec<String> {
        vec![
            self.r_in.to_string(),
            self.r_out.to_string(),
            self.step.to_string(),
            self.sigma_low.to_string(),
            self.sigma_high.to_string(),
        ]
    }
}

fn without_extension(path: &Path) -> PathBuf {
    path.with_extension("")
}

/// Render the DOLPHOT parameter file: master parameters, image count,
/// template as image 0, then each image with its own parameters.
///
/// `master` is written as given; merge defaults into it beforehand.
pub fn build_parameter_file<F>(
    master: &ParameterSet,
    mut per_image: F,
    images: &[PathBuf],
    template: &Path,
) -> Result<String>
where
    F: FnMut(&Path) -> Result<ParameterSet>,
{
    let mut text = String::new();
    for (key, value) in master.iter() {
        text.push_str(&format!("{} = {}\n", key, value));
    }
    text.push_str(&format!("Nimg = {}\n", images.len()));
    text.push_str(&format!(
        "img0_file = {}\n",
        without_extension(template).display()
    ));
    for (i, image) in images.iter().enumerate() {
        let index = i + 1;
        text.push_str(&format!(
            "img{}_file = {}\n",
            index,
            without_extension(image).display()
        ));
        for (option, value) in per_image(image)?.iter() {
            text.push_str(&format!("img{}_{} = {}\n", index, option, value));
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_file_layout() {
        let master = ParameterSet::new().with("A", 1).with("B", 2);
        let images = vec![PathBuf::from("im1.fits"), PathBuf::from("im2.fits")];
        let text = build_parameter_file(
            &master,
            |image| {
                let x = if image == Path::new("im1.fits") { 10 } else { 20 };
                Ok(ParameterSet::new().with("X", x))
            },
            &images,
            Path::new("t.fits"),
        )
        .unwrap();

        assert_eq!(
            text,
            "A = 1\n\
             B = 2\n\
             Nimg = 2\n\
             img0_file = t\n\
             img1_file = im1\n\
             img1_X = 10\n\
             img2_file = im2\n\
             img2_X = 20\n"
        );
    }

    #[test]
    fn chip_names_keep_their_inner_dots() {
        let text = build_parameter_file(
            &ParameterSet::new(),
            |_| Ok(ParameterSet::new()),
            &[PathBuf::from("j8xi01_flt.chip2.fits")],
            Path::new("drz.chip1.fits"),
        )
        .unwrap();
        assert_eq!(
            text,
            "Nimg = 1\nimg0_file = drz.chip1\nimg1_file = j8xi01_flt.chip2\n"
        );
    }

    #[test]
    fn per_image_errors_propagate() {
        let result = build_parameter_file(
            &ParameterSet::new(),
            |_| Err(PipelineError::UnsupportedInstrument("nicmos_nic2".to_string())),
            &[PathBuf::from("n.fits")],
            Path::new("t.fits"),
        );
        assert!(matches!(result, Err(PipelineError::UnsupportedInstrument(_))));
    }

    #[test]
    fn defaults_never_override_explicit_values() {
        let mut master = ParameterSet::new().with("SigFinal", 5.0).with("Custom", "x");
        master.merge_defaults(&dolphot_defaults());

        assert_eq!(master.get("SigFinal"), Some(&ParamValue::Float(5.0)));
        assert_eq!(master.get("SkipSky"), Some(&ParamValue::Integer(2)));
        assert_eq!(master.len(), dolphot_defaults().len() + 1);

        let keys: Vec<&str> = master.iter().map(|(k, _)| k).take(3).collect();
        assert_eq!(keys, vec!["SigFinal", "Custom", "SkipSky"]);
    }

    #[test]
    fn insert_keeps_position() {
        let mut params = ParameterSet::new().with("a", 1).with("b", 2);
        params.insert("a", 3);
        let entries: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        assert_eq!(entries, vec!["a=3", "b=2"]);
    }

    #[test]
    fn values_render_like_dolphot_expects() {
        assert_eq!(ParamValue::Integer(25).to_string(), "25");
        assert_eq!(ParamValue::Float(2.0).to_string(), "2.0");
        assert_eq!(ParamValue::Float(2.25).to_string(), "2.25");
        assert_eq!(ParamValue::from("15 25").to_string(), "15 25");
    }

    #[test]
    fn yaml_preserves_order() {
        let params: ParameterSet =
            serde_yaml::from_str("SigFinal: 3.5\nApCor: 0\napsky: 15 25\n").unwrap();
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["SigFinal", "ApCor", "apsky"]);
        assert_eq!(params.get("ApCor"), Some(&ParamValue::Integer(0)));
        assert_eq!(params.get("apsky"), Some(&ParamValue::from("15 25")));
    }

    #[test]
    fn unknown_detector_has_no_defaults() {
        assert!(image_defaults("nicmos_nic2").is_err());
        assert!(CalcSkyParams::for_detector("nicmos_nic2").is_err());
        assert_eq!(image_defaults("acs_wfc").unwrap().get("RAper"), Some(&ParamValue::Integer(3)));
    }

    #[test]
    fn calcsky_arguments() {
        let params = CalcSkyParams::for_detector("wfc3_ir").unwrap();
        assert_eq!(params.args(), vec!["10", "25", "2", "2.25", "2"]);
    }
}
