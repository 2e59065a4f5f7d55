//! Report form files: the values a technician entered, as YAML.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::warn;
use serde::Deserialize;

use crate::error::{ReportError, Result};
use crate::model::{
    Answer, Measurements, Photo, ReportRecord, ServiceType, SignOff, Signature, Trainee,
};
use crate::reference::ReferenceData;

#[derive(Debug, Deserialize)]
pub struct PartEntry {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default = "default_warranty")]
    pub warranty: Answer,
}

fn default_quantity() -> u32 {
    1
}

fn default_warranty() -> Answer {
    Answer::Yes
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PhotoPaths {
    pub before: Option<PathBuf>,
    pub after: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportForm {
    #[serde(default)]
    pub report_number: String,
    #[serde(default)]
    pub quotation: String,
    #[serde(default)]
    pub purchase_order: String,
    #[serde(default)]
    pub invoice: String,
    pub service_type: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub rack_serial: String,
    #[serde(default)]
    pub water_origin: String,
    #[serde(default)]
    pub technician: String,
    #[serde(default)]
    pub observations: String,
    #[serde(default)]
    pub measurements: Measurements,
    #[serde(default)]
    pub nozzles_installed: u32,
    #[serde(default)]
    pub parts: Vec<PartEntry>,
    #[serde(default)]
    pub training: Answer,
    #[serde(default)]
    pub trainees: Vec<Trainee>,
    #[serde(default)]
    pub sign_off: SignOff,
    #[serde(default)]
    pub photos: PhotoPaths,
    #[serde(default)]
    pub signature: Option<PathBuf>,
}

impl ReportForm {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Form(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yml::from_str(contents).map_err(|e| ReportError::Form(e.to_string()))
    }

    /// Builds the record through the same operations an interactive form
    /// uses. `base_dir` resolves relative image paths; `today` fills in a
    /// missing date.
    pub fn into_record(
        self,
        reference: &ReferenceData,
        base_dir: &Path,
        today: NaiveDate,
    ) -> Result<ReportRecord> {
        let service_type: ServiceType = self.service_type.parse()?;
        if !reference.service_types.is_empty()
            && !reference
                .service_types
                .iter()
                .any(|t| t == service_type.label())
        {
            warn!("Service type '{}' is not listed in the template", service_type);
        }

        let mut record = ReportRecord::new(service_type, self.date.unwrap_or(today));
        record.report_number = self.report_number;
        record.quotation = self.quotation;
        record.purchase_order = self.purchase_order;
        record.invoice = self.invoice;

        let serial = self.serial.trim();
        if !serial.is_empty() && reference.clients.get(serial).is_none() {
            return Err(ReportError::Form(format!(
                "equipment serial '{}' is not in the client directory",
                serial
            )));
        }
        record.select_serial(serial, &reference.clients);

        record.rack_serial = self.rack_serial;
        record.water_origin = self.water_origin;
        if !self.technician.is_empty() && !reference.is_technician(&self.technician) {
            warn!(
                "Technician '{}' is not in the template's technician list",
                self.technician
            );
        }
        record.technician = self.technician;
        record.observations = self.observations;
        record.measurements = self.measurements;
        record.nozzles_installed = self.nozzles_installed;

        for part in &self.parts {
            record
                .parts
                .add(&part.name, part.quantity, part.warranty, &reference.parts)?;
        }

        record.training = self.training;
        for trainee in &self.trainees {
            if !record.trainees.add(&trainee.name, &trainee.role) {
                warn!(
                    "Trainee '{}' ignored: list is full or incomplete",
                    trainee.name
                );
            }
        }

        record.sign_off = self.sign_off;

        if let Some(path) = &self.photos.before {
            record.photo_before = Some(read_photo(&base_dir.join(path), "foto antes")?);
        }
        if let Some(path) = &self.photos.after {
            record.photo_after = Some(read_photo(&base_dir.join(path), "foto después")?);
        }
        if let Some(path) = &self.signature {
            record.signature = Some(read_signature(&base_dir.join(path))?);
        }

        Ok(record)
    }
}

fn read_photo(path: &Path, slot: &'static str) -> Result<Photo> {
    let bytes = std::fs::read(path).map_err(|e| ReportError::Asset {
        slot,
        reason: format!("failed to read '{}': {}", path.display(), e),
    })?;
    Ok(Photo { bytes })
}

/// Loads a signature image and flattens it into an RGBA buffer.
fn read_signature(path: &Path) -> Result<Signature> {
    let image = image::open(path).map_err(|e| ReportError::Asset {
        slot: "firma",
        reason: format!("failed to read '{}': {}", path.display(), e),
    })?;
    let rgba = image.to_rgba8();
    Ok(Signature {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}
