//! Required-field rules per service type.
//!
//! The mapping from service type to required fields is configuration
//! (`config/required_fields.yaml`); the presence check for each field is a
//! fixed table in code.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};
use crate::model::{Answer, ReportRecord, ServiceType};

const DEFAULT_RULES: &str = include_str!("../config/required_fields.yaml");

/// Identifiers of the fields a service type can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    Tecnico,
    Cotizacion,
    OrdenCompra,
    Factura,
    Ppm,
    Corriente,
    Voltaje,
    PresionEntrada,
    PresionSalida,
    Observaciones,
    ListaPiezas,
    BoquillasInstaladas,
    FotosAntes,
    FotosDespues,
    CapacitacionSi,
    RecibeNombre,
    RecibeEmail,
    RecibeCargo,
    RecibeTelefono,
}

type PresenceCheck = fn(&ReportRecord) -> bool;

struct FieldRule {
    label: &'static str,
    is_present: PresenceCheck,
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

fn field_rule(label: &'static str, is_present: PresenceCheck) -> FieldRule {
    FieldRule { label, is_present }
}

impl FieldId {
    fn rule(self) -> FieldRule {
        match self {
            FieldId::Tecnico => field_rule("Técnico Responsable", |r| filled(&r.technician)),
            FieldId::Cotizacion => field_rule("Cotización", |r| filled(&r.quotation)),
            FieldId::OrdenCompra => field_rule("Orden de Compra", |r| filled(&r.purchase_order)),
            FieldId::Factura => field_rule("Número de Factura", |r| filled(&r.invoice)),
            FieldId::Ppm => field_rule("PPM Agua", |r| filled(&r.measurements.ppm)),
            FieldId::Corriente => field_rule("Corriente de Trabajo", |r| {
                filled(&r.measurements.current)
            }),
            FieldId::Voltaje => field_rule("Voltaje de Trabajo", |r| filled(&r.measurements.voltage)),
            FieldId::PresionEntrada => field_rule("Presión de Entrada", |r| {
                filled(&r.measurements.pressure_in)
            }),
            FieldId::PresionSalida => field_rule("Presión de Salida", |r| {
                filled(&r.measurements.pressure_out)
            }),
            FieldId::Observaciones => field_rule("Observaciones Generales", |r| filled(&r.observations)),
            FieldId::ListaPiezas => field_rule("Piezas y Partes", |r| !r.parts.is_empty()),
            FieldId::BoquillasInstaladas => {
                field_rule("Boquillas Instaladas", |r| r.nozzles_installed > 0)
            }
            FieldId::FotosAntes => field_rule("Foto ANTES de la mantención", |r| {
                r.photo_before.is_some()
            }),
            FieldId::FotosDespues => field_rule("Foto DESPUÉS de la mantención", |r| {
                r.photo_after.is_some()
            }),
            FieldId::CapacitacionSi => field_rule("Capacitación", |r| r.training == Answer::Yes),
            FieldId::RecibeNombre => field_rule("Nombre Cliente", |r| filled(&r.sign_off.name)),
            FieldId::RecibeEmail => field_rule("Email", |r| filled(&r.sign_off.email)),
            FieldId::RecibeCargo => field_rule("Cargo", |r| filled(&r.sign_off.role)),
            FieldId::RecibeTelefono => field_rule("Teléfono", |r| filled(&r.sign_off.phone)),
        }
    }

    /// Human-readable label shown when the field is missing.
    pub fn label(self) -> &'static str {
        self.rule().label
    }

    pub fn is_present(self, record: &ReportRecord) -> bool {
        (self.rule().is_present)(record)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequiredFieldRules {
    required_fields: BTreeMap<ServiceType, Vec<FieldId>>,
}

impl RequiredFieldRules {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(DEFAULT_RULES)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Config(format!(
                "failed to read rules file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let rules: RequiredFieldRules = serde_yml::from_str(contents)
            .map_err(|e| ReportError::Config(format!("failed to parse rules: {}", e)))?;

        if let Some(missing) = ServiceType::ALL
            .iter()
            .find(|t| !rules.required_fields.contains_key(*t))
        {
            return Err(ReportError::Config(format!(
                "no required fields configured for '{}'",
                missing
            )));
        }
        Ok(rules)
    }

    pub fn required(&self, service_type: ServiceType) -> &[FieldId] {
        self.required_fields
            .get(&service_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Labels of the required fields the record leaves empty, in the order
    /// the rules list them.
    pub fn validate(&self, record: &ReportRecord, service_type: ServiceType) -> Vec<&'static str> {
        self.required(service_type)
            .iter()
            .filter(|field| !field.is_present(record))
            .map(|field| field.label())
            .collect()
    }

    /// Validates against the record's own service type, turning missing
    /// fields into an error.
    pub fn check(&self, record: &ReportRecord) -> Result<()> {
        let missing = self.validate(record, record.service_type);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReportError::Validation {
                service_type: record.service_type.to_string(),
                missing,
            })
        }
    }
}
