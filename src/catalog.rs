use std::fmt::Display;
use std::path::Path;

use log::info;

use crate::{PipelineError, Result};

/// 1-based DOLPHOT output columns used by the quality cuts
const SHARPNESS: usize = 7;
const CROWDING: usize = 10;
const OBJECT_TYPE: usize = 11;

/// One photometry row of a DOLPHOT output catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogRow {
    pub values: Vec<f64>,
}

impl CatalogRow {
    /// value of 1-based column `column`
    pub fn column(&self, column: usize) -> f64 {
        self.values[column - 1]
    }

    /// point-like, not too sharp and not too crowded
    pub fn is_good_star(&self) -> bool {
        self.column(OBJECT_TYPE) == 1.0
            && self.column(SHARPNESS).abs() < 0.3
            && self.column(CROWDING) < 0.5
    }
}

impl TryFrom<&str> for CatalogRow {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self> {
        let values = s
            .split_whitespace()
            .map(|field| {
                field.parse::<f64>().map_err(|_| {
                    PipelineError::InvalidCatalog(format!("failed to parse value: {}", field))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if values.len() < OBJECT_TYPE {
            return Err(PipelineError::InvalidCatalog(format!(
                "expected at least {} columns, got {}",
                OBJECT_TYPE,
                values.len()
            )));
        }
        Ok(CatalogRow { values })
    }
}

impl Display for CatalogRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", fields.join(" "))
    }
}

pub fn read_catalog(filename: &Path) -> Result<Vec<CatalogRow>> {
    std::fs::read_to_string(filename)?
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            CatalogRow::try_from(line).map_err(|e| {
                PipelineError::InvalidCatalog(format!(
                    "{} line {}: {}",
                    filename.display(),
                    number + 1,
                    e
                ))
            })
        })
        .collect()
}

/// drop rows failing the object type, sharpness and crowding cuts
pub fn cut_bad_sources(rows: Vec<CatalogRow>) -> Vec<CatalogRow> {
    let total = rows.len();
    let kept: Vec<CatalogRow> = rows.into_iter().filter(CatalogRow::is_good_star).collect();
    info!("kept {} of {} sources", kept.len(), total);
    kept
}

pub fn write_catalog(filename: &Path, rows: &[CatalogRow]) -> Result<()> {
    let mut text = String::new();
    for row in rows {
        text.push_str(&format!("{}\n", row));
    }
    std::fs::write(filename, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sharp: f64, crowd: f64, kind: f64) -> String {
        format!("1 2 3 4 5 6 {} 8 9 {} {} 12.5", sharp, crowd, kind)
    }

    #[test]
    fn cuts_follow_type_sharpness_and_crowding() {
        let rows: Vec<CatalogRow> = [
            row(0.1, 0.2, 1.0),
            row(-0.29, 0.49, 1.0),
            row(0.3, 0.1, 1.0),
            row(-0.5, 0.1, 1.0),
            row(0.0, 0.5, 1.0),
            row(0.0, 0.1, 2.0),
        ]
        .iter()
        .map(|line| CatalogRow::try_from(line.as_str()).unwrap())
        .collect();

        let kept = cut_bad_sources(rows);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].column(SHARPNESS), 0.1);
        assert_eq!(kept[1].column(SHARPNESS), -0.29);
    }

    #[test]
    fn short_or_garbled_rows_are_rejected() {
        assert!(matches!(
            CatalogRow::try_from("1 2 3"),
            Err(PipelineError::InvalidCatalog(_))
        ));
        assert!(matches!(
            CatalogRow::try_from("1 2 3 4 5 6 x 8 9 10 11"),
            Err(PipelineError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn reads_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dp.out");
        let output = dir.path().join("dp.cut");
        std::fs::write(
            &input,
            format!("{}\n\n{}\n", row(0.1, 0.2, 1.0), row(0.9, 0.2, 1.0)),
        )
        .unwrap();

        let rows = cut_bad_sources(read_catalog(&input).unwrap());
        write_catalog(&output, &rows).unwrap();
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "1 2 3 4 5 6 0.1 8 9 0.2 1 12.5\n"
        );
    }

    #[test]
    fn bad_line_is_reported_with_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dp.out");
        std::fs::write(&input, format!("{}\n1 2\n", row(0.1, 0.2, 1.0))).unwrap();
        let err = read_catalog(&input).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
