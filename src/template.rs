//! Read-only access to the template workbook.
//!
//! Reports are built from an in-memory copy of the file's bytes, so the
//! template on disk is never modified.

use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Range, Reader, Xlsx};

use crate::error::{ReportError, Result};

/// Location of the canonical template workbook.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
}

impl Template {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(ReportError::ReferenceData(format!(
                "template file not found: {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Xlsx<std::io::BufReader<std::fs::File>>> {
        open_workbook(&self.path).map_err(|e| {
            ReportError::ReferenceData(format!(
                "failed to open template '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Reads one sheet's cached values.
    pub fn sheet_range(&self, sheet: &str) -> Result<Range<Data>> {
        self.open()?.worksheet_range(sheet).map_err(|e| {
            ReportError::ReferenceData(format!("failed to read '{}' sheet: {}", sheet, e))
        })
    }

    /// The whole template package.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| {
            ReportError::ReferenceData(format!(
                "failed to read template '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Text of a reference-data cell. Whole numbers lose their decimal point,
/// so a numeric serial `12345` reads as "12345".
pub fn cell_text(data: &Data) -> Option<String> {
    let text = match data {
        Data::String(s) => s.trim().to_string(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Text at an absolute position of a range.
pub fn text_at(range: &Range<Data>, row: u32, col: u32) -> Option<String> {
    range.get_value((row, col)).and_then(cell_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_template;

    #[test]
    fn missing_template_is_reference_fault() {
        let err = Template::new("/nonexistent/IT Tipo.xlsx").unwrap_err();
        assert!(matches!(err, ReportError::ReferenceData(_)));
    }

    #[test]
    fn reads_sheets_and_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path());
        let template = Template::new(&path).unwrap();

        let it = template.sheet_range("IT").unwrap();
        assert_eq!(text_at(&it, 1, 1).as_deref(), Some("INFORME TÉCNICO"));
        assert_eq!(text_at(&it, 2, 1).as_deref(), Some("2.5"));

        assert_eq!(template.read_bytes().unwrap(), std::fs::read(&path).unwrap());
        assert!(matches!(
            template.sheet_range("Informe"),
            Err(ReportError::ReferenceData(_))
        ));
    }

    #[test]
    fn whole_floats_read_as_integers() {
        assert_eq!(cell_text(&Data::Float(12345.0)), Some("12345".to_string()));
        assert_eq!(cell_text(&Data::Float(1.5)), Some("1.5".to_string()));
        assert_eq!(cell_text(&Data::String("  ".to_string())), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }
}
