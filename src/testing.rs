//! Minimal FITS writer for tests: 8-bit zero-filled images with hand-built
//! headers, enough for fitrs to read back the keywords the pipeline uses.

use std::path::Path;

const BLOCK: usize = 2880;
const CARD: usize = 80;

#[derive(Clone, Debug)]
pub(crate) struct TestHdu {
    /// NAXIS1, NAXIS2, ...
    pub shape: Vec<usize>,
    /// keyword and already formatted value
    pub cards: Vec<(&'static str, String)>,
}

pub(crate) fn fits_string(s: &str) -> String {
    format!("'{:<8}'", s)
}

fn fits_real(v: f64) -> String {
    format!("{:.15}", v)
}

impl TestHdu {
    pub fn empty() -> Self {
        TestHdu {
            shape: vec![],
            cards: vec![],
        }
    }

    pub fn image(nx: usize, ny: usize) -> Self {
        TestHdu {
            shape: vec![nx, ny],
            cards: vec![],
        }
    }

    pub fn set(&mut self, key: &'static str, value: &str) {
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some(card) => card.1 = value.to_string(),
            None => self.cards.push((key, value.to_string())),
        }
    }

    pub fn with(mut self, key: &'static str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_extname(self, name: &str) -> Self {
        self.with("EXTNAME", &fits_string(name))
    }

    /// north up, east left, `scale` degrees per pixel
    pub fn with_tan_wcs(self, crpix: (f64, f64), crval: (f64, f64), scale: f64) -> Self {
        self.with("CTYPE1", &fits_string("RA---TAN"))
            .with("CTYPE2", &fits_string("DEC--TAN"))
            .with("CRPIX1", &fits_real(crpix.0))
            .with("CRPIX2", &fits_real(crpix.1))
            .with("CRVAL1", &fits_real(crval.0))
            .with("CRVAL2", &fits_real(crval.1))
            .with("CD1_1", &fits_real(-scale))
            .with("CD1_2", &fits_real(0.0))
            .with("CD2_1", &fits_real(0.0))
            .with("CD2_2", &fits_real(scale))
    }

    pub fn with_instrument(self, instrument: &str, detector: Option<&str>, filter: &str) -> Self {
        let hdu = self.with("INSTRUME", &fits_string(instrument));
        let hdu = match detector {
            Some(detector) => hdu.with("DETECTOR", &fits_string(detector)),
            None => hdu,
        };
        match instrument {
            "ACS" => hdu
                .with("FILTER1", &fits_string("CLEAR1L"))
                .with("FILTER2", &fits_string(filter)),
            "WFPC2" => hdu.with("FILTNAM1", &fits_string(filter)),
            _ => hdu.with("FILTER", &fits_string(filter)),
        }
    }

    /// unmasked calibrated exposure: empty primary, SCI, ERR and DQ
    pub fn flt_exposure(instrument: &str, detector: Option<&str>, filter: &str) -> Vec<TestHdu> {
        vec![
            TestHdu::empty().with_instrument(instrument, detector, filter),
            TestHdu::image(8, 8).with_extname("SCI"),
            TestHdu::image(8, 8).with_extname("ERR"),
            TestHdu::image(8, 8).with_extname("DQ"),
        ]
    }

    /// single chip as written by splitgroups
    pub fn chip(
        instrument: &str,
        detector: &str,
        filter: &str,
        size: usize,
        crval: (f64, f64),
    ) -> Vec<TestHdu> {
        let centre = (size as f64 + 1.0) / 2.0;
        vec![TestHdu::image(size, size)
            .with_instrument(instrument, Some(detector), filter)
            .with_tan_wcs((centre, centre), crval, 0.05 / 3600.0)]
    }
}

fn push_card(header: &mut Vec<u8>, key: &str, value: &str) {
    let card = if key == "END" {
        "END".to_string()
    } else if value.starts_with('\'') {
        format!("{:<8}= {}", key, value)
    } else {
        format!("{:<8}= {:>20}", key, value)
    };
    assert!(card.len() <= CARD, "card too long: {}", card);
    header.extend(format!("{:<80}", card).bytes());
}

fn pad(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % BLOCK;
    if rem != 0 {
        bytes.resize(bytes.len() + BLOCK - rem, fill);
    }
}

pub(crate) fn write_fits(path: &Path, hdus: &[TestHdu]) {
    let mut bytes: Vec<u8> = vec![];
    for (index, hdu) in hdus.iter().enumerate() {
        let mut header = vec![];
        if index == 0 {
            push_card(&mut header, "SIMPLE", "T");
        } else {
            push_card(&mut header, "XTENSION", "'IMAGE   '");
        }
        push_card(&mut header, "BITPIX", "8");
        push_card(&mut header, "NAXIS", &hdu.shape.len().to_string());
        for (axis, n) in hdu.shape.iter().enumerate() {
            let key = format!("NAXIS{}", axis + 1);
            push_card(&mut header, &key, &n.to_string());
        }
        if index == 0 {
            if hdus.len() > 1 {
                push_card(&mut header, "EXTEND", "T");
            }
        } else {
            push_card(&mut header, "PCOUNT", "0");
            push_card(&mut header, "GCOUNT", "1");
        }
        for (key, value) in &hdu.cards {
            push_card(&mut header, key, value);
        }
        push_card(&mut header, "END", "");
        pad(&mut header, b' ');
        bytes.extend(header);

        if !hdu.shape.is_empty() {
            let mut data = vec![0u8; hdu.shape.iter().product()];
            pad(&mut data, 0);
            bytes.extend(data);
        }
    }
    std::fs::write(path, bytes).unwrap();
}
