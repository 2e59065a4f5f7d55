//! Writes a validated report into a fresh copy of the template.

use log::warn;

use crate::cell::{
    CellRef, ScalarField, FIELD_CELLS, PART_CELLS, PART_ROWS, PHOTO_AFTER_ANCHOR,
    PHOTO_BEFORE_ANCHOR, REPORT_SHEET, SIGNATURE_ANCHOR, TRAINEE_NAME_CELL, TRAINEE_ROLE_CELL,
};
use crate::error::Result;
use crate::imaging::{prepare_photo, prepare_signature};
use crate::model::{ReportRecord, MAX_TRAINEES};
use crate::package::{fill_sheet, CellEdits, SheetImage};
use crate::rules::RequiredFieldRules;
use crate::template::Template;

const DATE_FORMAT: &str = "%d/%m/%Y";

/// A finished report, ready to be handed to the user.
#[derive(Debug)]
pub struct AssembledReport {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Parts that did not fit in the template's parts rows.
    pub dropped_parts: usize,
}

pub struct ReportAssembler<'a> {
    template: &'a Template,
    rules: &'a RequiredFieldRules,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(template: &'a Template, rules: &'a RequiredFieldRules) -> Self {
        Self { template, rules }
    }

    /// Validates the record and produces the populated workbook. The
    /// template file itself is only read.
    pub fn assemble(&self, record: &ReportRecord) -> Result<AssembledReport> {
        self.rules.check(record)?;

        let images = prepare_images(record)?;

        let mut cells = CellEdits::new();
        let dropped_parts = fill_report_cells(&mut cells, record)?;
        if dropped_parts > 0 {
            warn!(
                "Report {} lists {} parts; only the first {} fit in the template, {} not written",
                record.output_file_name(),
                record.parts.len(),
                PART_ROWS,
                dropped_parts
            );
        }

        let template = self.template.read_bytes()?;
        let bytes = fill_sheet(&template, REPORT_SHEET, &cells, &images)?;
        Ok(AssembledReport {
            file_name: record.output_file_name(),
            bytes,
            dropped_parts,
        })
    }
}

fn scalar_value(record: &ReportRecord, field: ScalarField) -> String {
    match field {
        ScalarField::ReportNumber => record.report_number.clone(),
        ScalarField::Quotation => record.quotation.clone(),
        ScalarField::PurchaseOrder => record.purchase_order.clone(),
        ScalarField::Invoice => record.invoice.clone(),
        ScalarField::ServiceType => record.service_type.label().to_string(),
        ScalarField::Date => record.date.format(DATE_FORMAT).to_string(),
        ScalarField::Serial => record.serial().to_string(),
        ScalarField::Ppm => record.measurements.ppm.clone(),
        ScalarField::Model => record.model().to_string(),
        ScalarField::CompanyName => record.company_name().to_string(),
        ScalarField::TaxId => record.tax_id().to_string(),
        ScalarField::Location => record.location().to_string(),
        ScalarField::Current => record.measurements.current.clone(),
        ScalarField::Voltage => record.measurements.voltage.clone(),
        ScalarField::PressureIn => record.measurements.pressure_in.clone(),
        ScalarField::PressureOut => record.measurements.pressure_out.clone(),
        ScalarField::Observations => record.observations.clone(),
        ScalarField::Technician => record.technician.to_uppercase(),
        ScalarField::SignOffName => record.sign_off.name.clone(),
        ScalarField::SignOffRole => record.sign_off.role.clone(),
        ScalarField::SignOffEmail => record.sign_off.email.clone(),
        ScalarField::SignOffPhone => record.sign_off.phone.clone(),
        ScalarField::NozzleCount => record.nozzles_installed.to_string(),
        ScalarField::RackSerial => record.rack_serial.clone(),
        ScalarField::WaterOrigin => record.water_origin.clone(),
    }
}

/// Collects every record value for the report sheet and returns how many
/// parts were left out. Empty values blank the template's cell.
fn fill_report_cells(cells: &mut CellEdits, record: &ReportRecord) -> Result<usize> {
    for (field, address) in FIELD_CELLS {
        cells.insert(address.parse()?, scalar_value(record, field));
    }

    let name_cell: CellRef = TRAINEE_NAME_CELL.parse()?;
    let role_cell: CellRef = TRAINEE_ROLE_CELL.parse()?;
    for (i, trainee) in record.trainees.as_slice().iter().take(MAX_TRAINEES).enumerate() {
        cells.insert(name_cell.down(i as u32), trainee.name.clone());
        cells.insert(role_cell.down(i as u32), trainee.role.clone());
    }

    let first_part_row = PART_CELLS
        .iter()
        .map(|address| address.parse::<CellRef>())
        .collect::<Result<Vec<_>>>()?;
    let parts = record.parts.as_slice();
    for (i, part) in parts.iter().take(PART_ROWS).enumerate() {
        let values = [
            part.code.clone(),
            part.name.clone(),
            part.quantity.to_string(),
            part.warranty.label().to_string(),
        ];
        for (cell, value) in first_part_row.iter().zip(values) {
            cells.insert(cell.down(i as u32), value);
        }
    }

    Ok(parts.len().saturating_sub(PART_ROWS))
}

fn prepare_images(record: &ReportRecord) -> Result<Vec<SheetImage>> {
    let mut images = Vec::new();
    if let Some(photo) = &record.photo_before {
        images.push(SheetImage {
            anchor: PHOTO_BEFORE_ANCHOR.parse()?,
            image: prepare_photo(photo, "foto antes")?,
            name: "foto antes",
        });
    }
    if let Some(photo) = &record.photo_after {
        images.push(SheetImage {
            anchor: PHOTO_AFTER_ANCHOR.parse()?,
            image: prepare_photo(photo, "foto después")?,
            name: "foto después",
        });
    }
    if let Some(signature) = &record.signature {
        images.push(SheetImage {
            anchor: SIGNATURE_ANCHOR.parse()?,
            image: prepare_signature(signature)?,
            name: "firma",
        });
    }
    Ok(images)
}
