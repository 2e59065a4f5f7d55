//! Fixture workbooks and images for tests.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};
use rust_xlsxwriter::{Format, FormatBorder, Image, Workbook};
use zip::ZipArchive;

/// Writes a template with the same sheets and layout as the production
/// one, filled with a handful of clients and parts.
pub fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("IT Tipo.xlsx");
    let mut workbook = Workbook::new();

    let it = workbook.add_worksheet().set_name("IT").unwrap();
    it.write_string(1, 1, "INFORME TÉCNICO").unwrap();
    it.write_number(2, 1, 2.5).unwrap();
    // placeholder that the report overwrites (S4)
    it.write_string_with_format(3, 18, "N° IT", &Format::new().set_bold())
        .unwrap();
    it.write_formula(4, 1, "=1+1").unwrap();
    // observations box (O49:T49)
    it.merge_range(48, 14, 48, 19, "", &Format::new().set_border(FormatBorder::Thin))
        .unwrap();
    it.set_column_width(15, 30).unwrap();
    it.insert_image(0, 0, &Image::new_from_buffer(&png_bytes(60, 30)).unwrap())
        .unwrap();

    let list = workbook.add_worksheet().set_name("Lista Servicio").unwrap();
    list.write_string(0, 0, "Tipo").unwrap();
    for (i, t) in [
        "Mantención",
        "Instalación",
        "Urgencias",
        "Post Ventas",
        "Venta Repuestos",
    ]
    .iter()
    .enumerate()
    {
        list.write_string(i as u32 + 1, 0, *t).unwrap();
    }
    list.write_string(0, 6, "Técnicos").unwrap();
    list.write_string(1, 6, "Juan Pérez").unwrap();
    list.write_string(2, 6, "Camila Rojas").unwrap();
    list.write_string(4, 6, "Diego Muñoz").unwrap();

    let clients = workbook.add_worksheet().set_name("Clientes").unwrap();
    for (col, header) in ["Serie", "Razón Social", "RUT", "Ubicación", "", "", "Modelo"]
        .iter()
        .enumerate()
    {
        clients.write_string(0, col as u16, *header).unwrap();
    }
    clients.write_string(1, 0, "SN-100").unwrap();
    clients.write_string(1, 1, "Agrícola Sur SpA").unwrap();
    clients.write_string(1, 2, "76.123.456-7").unwrap();
    clients.write_string(1, 3, "Osorno").unwrap();
    clients.write_string(1, 6, "NX-40").unwrap();
    // row without serial
    clients.write_string(2, 1, "Sin serie Ltda").unwrap();
    clients.write_number(3, 0, 20731.0).unwrap();
    clients.write_string(3, 1, "Viña Central").unwrap();
    clients.write_string(3, 2, "77.555.000-1").unwrap();
    clients.write_string(3, 3, "Talca").unwrap();
    clients.write_string(3, 6, "NX-80").unwrap();

    let parts = workbook.add_worksheet().set_name("Piezas y Partes").unwrap();
    parts.write_string(0, 0, "Código").unwrap();
    parts.write_string(0, 1, "Nombre").unwrap();
    let catalog = [
        ("BQ-03", "Boquilla 0.3"),
        ("BQ-05", "Boquilla 0.5"),
        ("FL-05", "Filtro 5 micras"),
        ("FL-10", "Filtro 10 micras"),
        ("VL-01", "Válvula solenoide"),
        ("MG-02", "Manguera alta presión"),
        ("BB-01", "Bomba"),
        ("SN-01", "Sensor de presión"),
        ("", "Sin código"),
        ("EM-01", "Empaquetadura"),
    ];
    for (i, (code, name)) in catalog.iter().enumerate() {
        let row = i as u32 + 1;
        if !code.is_empty() {
            parts.write_string(row, 0, *code).unwrap();
        }
        parts.write_string(row, 1, *name).unwrap();
    }

    workbook.save(&path).unwrap();
    path
}

/// Writes a workbook with the given (empty) sheets.
pub fn write_workbook(path: &Path, sheets: &[&str]) {
    let mut workbook = Workbook::new();
    for name in sheets {
        workbook.add_worksheet().set_name(*name).unwrap();
    }
    workbook.save(path).unwrap();
}

/// PNG-encoded solid image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([30, 120, 200]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Text of one part of an xlsx package, if present.
pub fn part_text(package: &[u8], name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(package)).unwrap();
    let mut entry = archive.by_name(name).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    Some(text)
}
