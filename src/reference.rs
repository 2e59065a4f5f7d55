use calamine::{Data, Range};
use log::info;

use crate::error::Result;
use crate::model::{ClientDirectory, ClientDirectoryEntry, PartsCatalog};
use crate::template::{text_at, Template};

const SERVICE_LIST_SHEET: &str = "Lista Servicio";
const CLIENTS_SHEET: &str = "Clientes";
const PARTS_SHEET: &str = "Piezas y Partes";

/// Lookup tables read from the template at session start.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub service_types: Vec<String>,
    pub technicians: Vec<String>,
    pub clients: ClientDirectory,
    pub parts: PartsCatalog,
}

impl ReferenceData {
    pub fn load(template: &Template) -> Result<Self> {
        let service_list = template.sheet_range(SERVICE_LIST_SHEET)?;
        let service_types = Self::load_service_types(&service_list);
        let technicians = Self::load_technicians(&service_list);
        let clients = Self::load_clients(&template.sheet_range(CLIENTS_SHEET)?);
        let parts = Self::load_parts(&template.sheet_range(PARTS_SHEET)?);

        info!(
            "Loaded reference data from {}: {} service types, {} technicians, {} clients, {} parts",
            template.path().display(),
            service_types.len(),
            technicians.len(),
            clients.len(),
            parts.len()
        );

        Ok(ReferenceData {
            service_types,
            technicians,
            clients,
            parts,
        })
    }

    /// A2:A6
    fn load_service_types(range: &Range<Data>) -> Vec<String> {
        (1..=5).filter_map(|row| text_at(range, row, 0)).collect()
    }

    /// G2:G10, blanks skipped.
    fn load_technicians(range: &Range<Data>) -> Vec<String> {
        (1..=9).filter_map(|row| text_at(range, row, 6)).collect()
    }

    /// Serial in A; company, tax id and location in B-D; model in G.
    fn load_clients(range: &Range<Data>) -> ClientDirectory {
        let mut clients = ClientDirectory::default();
        for row in data_rows(range) {
            let Some(serial) = text_at(range, row, 0) else {
                continue;
            };
            let field = |col| text_at(range, row, col).unwrap_or_default();
            clients.insert(
                serial,
                ClientDirectoryEntry {
                    company_name: field(1),
                    tax_id: field(2),
                    location: field(3),
                    model: field(6),
                },
            );
        }
        clients
    }

    /// Code in A, name in B; rows missing either are skipped.
    fn load_parts(range: &Range<Data>) -> PartsCatalog {
        let mut parts = PartsCatalog::default();
        for row in data_rows(range) {
            if let (Some(code), Some(name)) = (text_at(range, row, 0), text_at(range, row, 1)) {
                parts.insert(name, code);
            }
        }
        parts
    }

    pub fn is_technician(&self, name: &str) -> bool {
        self.technicians.iter().any(|t| t == name)
    }
}

/// Absolute row indices below the header row.
fn data_rows(range: &Range<Data>) -> std::ops::RangeInclusive<u32> {
    let end_row = range.end().map_or(0, |(row, _)| row);
    1..=end_row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::test_support::{write_template, write_workbook};

    #[test]
    fn loads_lists_from_service_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template::new(write_template(dir.path())).unwrap();
        let data = ReferenceData::load(&template).unwrap();

        assert_eq!(
            data.service_types,
            vec![
                "Mantención",
                "Instalación",
                "Urgencias",
                "Post Ventas",
                "Venta Repuestos"
            ]
        );
        assert_eq!(data.technicians, vec!["Juan Pérez", "Camila Rojas", "Diego Muñoz"]);
        assert!(data.is_technician("Camila Rojas"));
        assert!(!data.is_technician("Nadie"));
    }

    #[test]
    fn clients_keyed_by_serial_skip_blank_rows() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template::new(write_template(dir.path())).unwrap();
        let data = ReferenceData::load(&template).unwrap();

        assert_eq!(data.clients.len(), 2);
        let client = data.clients.get("SN-100").unwrap();
        assert_eq!(client.company_name, "Agrícola Sur SpA");
        assert_eq!(client.tax_id, "76.123.456-7");
        assert_eq!(client.location, "Osorno");
        assert_eq!(client.model, "NX-40");

        // numeric serial cell
        assert_eq!(data.clients.get("20731").unwrap().model, "NX-80");
    }

    #[test]
    fn parts_need_code_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template::new(write_template(dir.path())).unwrap();
        let data = ReferenceData::load(&template).unwrap();

        assert_eq!(data.parts.code_for("Boquilla 0.3"), Some("BQ-03"));
        assert_eq!(data.parts.code_for("Filtro 5 micras"), Some("FL-05"));
        assert_eq!(data.parts.code_for("Sin código"), None);
        assert_eq!(data.parts.len(), 9);
    }

    #[test]
    fn missing_sheet_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incompleto.xlsx");
        write_workbook(&path, &["IT", "Lista Servicio"]);
        let template = Template::new(&path).unwrap();

        let err = ReferenceData::load(&template).unwrap_err();
        assert!(matches!(err, ReportError::ReferenceData(_)));
        assert!(err.to_string().contains("Clientes"));
    }
}
