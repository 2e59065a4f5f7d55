//! A1-style cell references and the fixed layout of the `IT` sheet.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ReportError, Result};

static A1_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([1-9][0-9]*)$").unwrap());

/// Zero-based row/column position of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u16,
}

impl CellRef {
    pub fn new(row: u32, col: u16) -> Self {
        Self { row, col }
    }

    /// Same column, `offset` rows further down.
    pub fn down(self, offset: u32) -> Self {
        Self {
            row: self.row + offset,
            col: self.col,
        }
    }
}

impl FromStr for CellRef {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ReportError::Config(format!("invalid cell reference '{}'", s));
        let caps = A1_REF.captures(s.trim()).ok_or_else(invalid)?;

        let col = caps[1]
            .bytes()
            .map(|b| u32::from(b.to_ascii_uppercase() - b'A') + 1)
            .fold(0u32, |acc, d| acc * 26 + d);
        let row: u32 = caps[2].parse().map_err(|_| invalid())?;

        let col = u16::try_from(col - 1).map_err(|_| invalid())?;
        Ok(CellRef::new(row - 1, col))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut letters = Vec::new();
        let mut n = u32::from(self.col) + 1;
        while n > 0 {
            let rem = ((n - 1) % 26) as u8;
            letters.push((b'A' + rem) as char);
            n = (n - 1) / 26;
        }
        let col: String = letters.iter().rev().collect();
        write!(f, "{}{}", col, self.row + 1)
    }
}

/// Scalar fields written to single cells of the report sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    ReportNumber,
    Quotation,
    PurchaseOrder,
    Invoice,
    ServiceType,
    Date,
    Serial,
    Ppm,
    Model,
    CompanyName,
    TaxId,
    Location,
    Current,
    Voltage,
    PressureIn,
    PressureOut,
    Observations,
    Technician,
    SignOffName,
    SignOffRole,
    SignOffEmail,
    SignOffPhone,
    NozzleCount,
    RackSerial,
    WaterOrigin,
}

/// Where each scalar field lands on the report sheet.
pub const FIELD_CELLS: [(ScalarField, &str); 25] = [
    (ScalarField::ReportNumber, "S4"),
    (ScalarField::Quotation, "O7"),
    (ScalarField::PurchaseOrder, "P7"),
    (ScalarField::Invoice, "Q7"),
    (ScalarField::ServiceType, "R7"),
    (ScalarField::Date, "S7"),
    (ScalarField::Serial, "S10"),
    (ScalarField::Ppm, "P12"),
    (ScalarField::Model, "S9"),
    (ScalarField::CompanyName, "P9"),
    (ScalarField::TaxId, "P10"),
    (ScalarField::Location, "P11"),
    (ScalarField::Current, "P14"),
    (ScalarField::Voltage, "P13"),
    (ScalarField::PressureIn, "S13"),
    (ScalarField::PressureOut, "S14"),
    (ScalarField::Observations, "O49"),
    (ScalarField::Technician, "P62"),
    (ScalarField::SignOffName, "P58"),
    (ScalarField::SignOffRole, "S58"),
    (ScalarField::SignOffEmail, "P59"),
    (ScalarField::SignOffPhone, "P60"),
    (ScalarField::NozzleCount, "P15"),
    (ScalarField::RackSerial, "S11"),
    (ScalarField::WaterOrigin, "S12"),
];

pub const REPORT_SHEET: &str = "IT";

/// First trainee row; name and role columns.
pub const TRAINEE_NAME_CELL: &str = "P51";
pub const TRAINEE_ROLE_CELL: &str = "S51";

/// First parts row: code, name, quantity, warranty.
pub const PART_CELLS: [&str; 4] = ["O18", "P18", "R18", "S18"];
pub const PART_ROWS: usize = 7;

pub const PHOTO_BEFORE_ANCHOR: &str = "O37";
pub const PHOTO_AFTER_ANCHOR: &str = "Q37";
pub const SIGNATURE_ANCHOR: &str = "P61";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_double_letter_columns() {
        assert_eq!("A1".parse::<CellRef>().unwrap(), CellRef::new(0, 0));
        assert_eq!("S4".parse::<CellRef>().unwrap(), CellRef::new(3, 18));
        assert_eq!("o37".parse::<CellRef>().unwrap(), CellRef::new(36, 14));
        assert_eq!("AA10".parse::<CellRef>().unwrap(), CellRef::new(9, 26));
        assert_eq!("$B$2".parse::<CellRef>().unwrap(), CellRef::new(1, 1));
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "A0", "12", "S", "A1B", "ABCD1"] {
            assert!(bad.parse::<CellRef>().is_err(), "{}", bad);
        }
    }

    #[test]
    fn display_is_inverse_of_parse() {
        for addr in ["A1", "P62", "Z9", "AA1", "AZ300", "XFD1048576"] {
            assert_eq!(addr.parse::<CellRef>().unwrap().to_string(), addr);
        }
    }

    #[test]
    fn layout_cells_are_valid_and_distinct() {
        let mut cells: Vec<CellRef> = FIELD_CELLS
            .iter()
            .map(|(_, addr)| addr.parse().unwrap())
            .collect();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), FIELD_CELLS.len());

        let last_part = PART_CELLS[0]
            .parse::<CellRef>()
            .unwrap()
            .down(PART_ROWS as u32 - 1);
        assert_eq!(last_part.to_string(), "O24");
    }
}
