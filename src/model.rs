use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

/// Most trainees a report can list (rows 51-53 of the template).
pub const MAX_TRAINEES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "Mantención")]
    Maintenance,
    #[serde(rename = "Instalación")]
    Installation,
    #[serde(rename = "Urgencias")]
    Emergency,
    #[serde(rename = "Post Ventas")]
    AfterSales,
    #[serde(rename = "Venta Repuestos")]
    SpareParts,
}

impl ServiceType {
    pub const ALL: [ServiceType; 5] = [
        ServiceType::Maintenance,
        ServiceType::Installation,
        ServiceType::Emergency,
        ServiceType::AfterSales,
        ServiceType::SpareParts,
    ];

    /// Label as it appears in the template and in the written report.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::Maintenance => "Mantención",
            ServiceType::Installation => "Instalación",
            ServiceType::Emergency => "Urgencias",
            ServiceType::AfterSales => "Post Ventas",
            ServiceType::SpareParts => "Venta Repuestos",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceType {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        ServiceType::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or_else(|| ReportError::Form(format!("unknown service type '{}'", s)))
    }
}

/// Yes/no answer as used by the template ("Sí" / "No").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Answer {
    #[serde(rename = "Sí", alias = "Si")]
    Yes,
    #[default]
    #[serde(rename = "No")]
    No,
}

impl Answer {
    pub fn label(&self) -> &'static str {
        match self {
            Answer::Yes => "Sí",
            Answer::No => "No",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDirectoryEntry {
    pub company_name: String,
    pub tax_id: String,
    pub location: String,
    pub model: String,
}

/// Clients keyed by equipment serial.
#[derive(Debug, Clone, Default)]
pub struct ClientDirectory {
    entries: BTreeMap<String, ClientDirectoryEntry>,
}

impl ClientDirectory {
    pub fn insert(&mut self, serial: String, entry: ClientDirectoryEntry) {
        self.entries.insert(serial, entry);
    }

    pub fn get(&self, serial: &str) -> Option<&ClientDirectoryEntry> {
        self.entries.get(serial)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClientDirectoryEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Part codes keyed by part name.
#[derive(Debug, Clone, Default)]
pub struct PartsCatalog {
    codes: BTreeMap<String, String>,
}

impl PartsCatalog {
    pub fn insert(&mut self, name: String, code: String) {
        self.codes.insert(name, code);
    }

    pub fn code_for(&self, name: &str) -> Option<&str> {
        self.codes.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.codes.iter()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    pub code: String,
    pub name: String,
    pub quantity: u32,
    pub warranty: Answer,
}

/// Parts used during the service, in entry order.
#[derive(Debug, Clone, Default)]
pub struct PartList {
    entries: Vec<Part>,
}

impl PartList {
    /// Adds a part by catalog name. The code is always taken from the catalog.
    pub fn add(
        &mut self,
        name: &str,
        quantity: u32,
        warranty: Answer,
        catalog: &PartsCatalog,
    ) -> Result<()> {
        let code = catalog
            .code_for(name)
            .ok_or_else(|| ReportError::Form(format!("part '{}' is not in the catalog", name)))?;
        check_quantity(name, quantity)?;
        self.entries.push(Part {
            code: code.to_string(),
            name: name.to_string(),
            quantity,
            warranty,
        });
        Ok(())
    }

    pub fn remove_last(&mut self) -> Option<Part> {
        self.entries.pop()
    }

    pub fn remove(&mut self, index: usize) -> Option<Part> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn set_quantity(&mut self, index: usize, quantity: u32) -> Result<()> {
        let part = self.entry_mut(index)?;
        check_quantity(&part.name, quantity)?;
        part.quantity = quantity;
        Ok(())
    }

    pub fn set_warranty(&mut self, index: usize, warranty: Answer) -> Result<()> {
        self.entry_mut(index)?.warranty = warranty;
        Ok(())
    }

    pub fn as_slice(&self) -> &[Part] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, index: usize) -> Result<&mut Part> {
        self.entries
            .get_mut(index)
            .ok_or_else(|| ReportError::Form(format!("no part at position {}", index + 1)))
    }
}

fn check_quantity(name: &str, quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(ReportError::Form(format!(
            "quantity for part '{}' must be at least 1",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trainee {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default)]
pub struct TraineeList {
    entries: Vec<Trainee>,
}

impl TraineeList {
    /// Returns false and leaves the list untouched when it is full or
    /// either value is blank.
    pub fn add(&mut self, name: &str, role: &str) -> bool {
        if self.entries.len() >= MAX_TRAINEES || name.trim().is_empty() || role.trim().is_empty()
        {
            return false;
        }
        self.entries.push(Trainee {
            name: name.to_string(),
            role: role.to_string(),
        });
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Trainee> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_TRAINEES
    }

    pub fn as_slice(&self) -> &[Trainee] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Measurements {
    pub ppm: String,
    pub current: String,
    pub voltage: String,
    pub pressure_in: String,
    pub pressure_out: String,
}

/// Person receiving the work on the client side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignOff {
    pub name: String,
    pub email: String,
    pub role: String,
    pub phone: String,
}

/// Uploaded photo, still in its original encoding.
#[derive(Debug, Clone)]
pub struct Photo {
    pub bytes: Vec<u8>,
}

/// Captured signature as raw RGBA pixels, row-major.
#[derive(Debug, Clone)]
pub struct Signature {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub report_number: String,
    pub quotation: String,
    pub purchase_order: String,
    pub invoice: String,
    pub service_type: ServiceType,
    pub date: NaiveDate,
    serial: String,
    client: Option<ClientDirectoryEntry>,
    pub rack_serial: String,
    pub water_origin: String,
    pub technician: String,
    pub observations: String,
    pub measurements: Measurements,
    pub nozzles_installed: u32,
    pub parts: PartList,
    pub training: Answer,
    pub trainees: TraineeList,
    pub sign_off: SignOff,
    pub photo_before: Option<Photo>,
    pub photo_after: Option<Photo>,
    pub signature: Option<Signature>,
}

impl ReportRecord {
    pub fn new(service_type: ServiceType, date: NaiveDate) -> Self {
        Self {
            report_number: String::new(),
            quotation: String::new(),
            purchase_order: String::new(),
            invoice: String::new(),
            service_type,
            date,
            serial: String::new(),
            client: None,
            rack_serial: String::new(),
            water_origin: String::new(),
            technician: String::new(),
            observations: String::new(),
            measurements: Measurements::default(),
            nozzles_installed: 0,
            parts: PartList::default(),
            training: Answer::No,
            trainees: TraineeList::default(),
            sign_off: SignOff::default(),
            photo_before: None,
            photo_after: None,
            signature: None,
        }
    }

    /// Selects the equipment serial and refreshes the client fields from the
    /// directory. An unknown serial leaves the client fields blank.
    pub fn select_serial(&mut self, serial: &str, directory: &ClientDirectory) {
        self.serial = serial.trim().to_string();
        self.client = directory.get(&self.serial).cloned();
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn client(&self) -> Option<&ClientDirectoryEntry> {
        self.client.as_ref()
    }

    pub fn model(&self) -> &str {
        self.client.as_ref().map_or("", |c| c.model.as_str())
    }

    pub fn company_name(&self) -> &str {
        self.client.as_ref().map_or("", |c| c.company_name.as_str())
    }

    pub fn tax_id(&self) -> &str {
        self.client.as_ref().map_or("", |c| c.tax_id.as_str())
    }

    pub fn location(&self) -> &str {
        self.client.as_ref().map_or("", |c| c.location.as_str())
    }

    pub fn output_file_name(&self) -> String {
        let serial = if self.serial.is_empty() {
            "sin_serie"
        } else {
            self.serial.as_str()
        };
        format!("Informe_Tecnico_{}.xlsx", serial)
    }
}
