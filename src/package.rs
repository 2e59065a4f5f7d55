//! Edits a copy of an xlsx package.
//!
//! Every part of the template is carried over byte for byte except the
//! report sheet, its drawing and the relationship and content-type entries
//! that have to point at new pictures. Styles, merged ranges, column
//! widths, print setup, formulas and pictures already in the template are
//! left as they are.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read, Write};

use log::debug;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::cell::CellRef;
use crate::error::{ReportError, Result};
use crate::imaging::PreparedImage;

const CONTENT_TYPES: &str = "[Content_Types].xml";
const WORKBOOK: &str = "xl/workbook.xml";
const CALC_CHAIN: &str = "xl/calcChain.xml";

const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const XDR_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
const DRAWINGML_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const DRAWING_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
const IMAGE_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const DRAWING_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";

const EMPTY_RELATIONSHIPS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    "\n",
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#
);

const EMPTY_DRAWING: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    "\n",
    r#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" "#,
    r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"></xdr:wsDr>"#
);

/// EMUs per pixel at 96 dpi.
const EMU_PER_PIXEL: u64 = 9525;

/// Worksheet children that come after `<drawing>`.
const AFTER_DRAWING: [&[u8]; 9] = [
    b"legacyDrawing",
    b"legacyDrawingHF",
    b"drawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

type XmlWriter = Writer<Vec<u8>>;

/// Text to write per cell. An empty value blanks the cell and keeps its
/// style.
pub type CellEdits = BTreeMap<CellRef, String>;

/// A picture anchored by its top-left corner.
pub struct SheetImage {
    pub anchor: CellRef,
    pub image: PreparedImage,
    pub name: &'static str,
}

/// Returns a copy of `template` with `cells` written into `sheet` and
/// `images` added to the sheet's drawing.
pub fn fill_sheet(
    template: &[u8],
    sheet: &str,
    cells: &CellEdits,
    images: &[SheetImage],
) -> Result<Vec<u8>> {
    let mut package = Package::read(template)?;
    let (tab, sheet_part) = package.sheet_part(sheet)?;
    let sheet_rels_part = rels_part_for(&sheet_part);

    let mut new_parts = Vec::new();
    let mut new_drawing_rid = None;
    if !images.is_empty() {
        let sheet_rels = package.relationships(&sheet_rels_part)?;
        let drawing_part = match find_drawing_rid(package.required(&sheet_part)?, &sheet_part)? {
            Some(rid) => sheet_rels
                .iter()
                .find(|rel| rel.id == rid)
                .map(|rel| resolve_target(&sheet_part, &rel.target))
                .ok_or_else(|| {
                    template_fault(format!("drawing '{}' of '{}' not found", rid, sheet))
                })?,
            None => {
                let drawing_part = package.free_part_name("xl/drawings/drawing", "xml");
                package.put(&drawing_part, EMPTY_DRAWING.as_bytes().to_vec());

                let rid = next_rid(&sheet_rels);
                let link = Relationship {
                    id: rid.clone(),
                    kind: DRAWING_REL.to_string(),
                    target: format!("/{}", drawing_part),
                };
                let rels = edit_relationships(
                    package.get(&sheet_rels_part),
                    &sheet_rels_part,
                    None,
                    &[link],
                )?;
                package.put(&sheet_rels_part, rels);
                new_drawing_rid = Some(rid);
                new_parts.push(drawing_part.clone());
                drawing_part
            }
        };
        place_images(&mut package, &drawing_part, images)?;
    }

    let sheet_xml = patch_sheet(
        package.required(&sheet_part)?,
        &sheet_part,
        cells,
        new_drawing_rid.as_deref(),
    )?;
    package.put(&sheet_part, sheet_xml);
    select_sheet(&mut package, &sheet_part, tab)?;

    // Excel rebuilds the calc chain on open.
    if package.remove(CALC_CHAIN) {
        let rels_part = rels_part_for(WORKBOOK);
        let rels = edit_relationships(
            Some(package.required(&rels_part)?),
            &rels_part,
            Some("/calcChain"),
            &[],
        )?;
        package.put(&rels_part, rels);
    }

    let content_types =
        edit_content_types(package.required(CONTENT_TYPES)?, &new_parts, !images.is_empty())?;
    package.put(CONTENT_TYPES, content_types);

    package.write()
}

/// The parts of a zip package, in archive order.
struct Package {
    parts: Vec<(String, Vec<u8>)>,
}

impl Package {
    fn read(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| template_fault(format!("template is not an xlsx package: {}", e)))?;

        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| {
                template_fault(format!("failed to read template entry {}: {}", i, e))
            })?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| template_fault(format!("failed to read '{}': {}", name, e)))?;
            parts.push((name, data));
        }
        Ok(Self { parts })
    }

    fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .map(|(_, data)| data.as_slice())
    }

    fn required(&self, name: &str) -> Result<&[u8]> {
        self.get(name)
            .ok_or_else(|| template_fault(format!("template has no '{}' part", name)))
    }

    fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|(part, _)| part == name) {
            Some((_, existing)) => *existing = data,
            None => self.parts.push((name.to_string(), data)),
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        let before = self.parts.len();
        self.parts.retain(|(part, _)| part != name);
        self.parts.len() != before
    }

    /// First `{stem}{n}.{extension}` not already in the package.
    fn free_part_name(&self, stem: &str, extension: &str) -> String {
        let mut n = 1;
        loop {
            let name = format!("{}{}.{}", stem, n, extension);
            if self.get(&name).is_none() {
                return name;
            }
            n += 1;
        }
    }

    /// Relationships of a rels part; none when the part does not exist.
    fn relationships(&self, rels_part: &str) -> Result<Vec<Relationship>> {
        match self.get(rels_part) {
            Some(xml) => parse_relationships(xml, rels_part),
            None => Ok(Vec::new()),
        }
    }

    /// Tab position and worksheet part of a sheet.
    fn sheet_part(&self, sheet: &str) -> Result<(usize, String)> {
        let (tab, rid) = sheet_rid(self.required(WORKBOOK)?, sheet)?
            .ok_or_else(|| template_fault(format!("template has no '{}' sheet", sheet)))?;
        let rels_part = rels_part_for(WORKBOOK);
        self.relationships(&rels_part)?
            .into_iter()
            .find(|rel| rel.id == rid)
            .map(|rel| (tab, resolve_target(WORKBOOK, &rel.target)))
            .ok_or_else(|| template_fault(format!("sheet '{}' has no worksheet part", sheet)))
    }

    fn write(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in &self.parts {
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file(name.as_str(), options)
                .map_err(|e| output_fault(name, e))?;
            zip.write_all(data).map_err(|e| output_fault(name, e))?;
        }
        let cursor = zip.finish().map_err(|e| output_fault("package", e))?;
        Ok(cursor.into_inner())
    }
}

fn template_fault(reason: String) -> ReportError {
    ReportError::ReferenceData(reason)
}

fn malformed(part: &str, e: impl fmt::Display) -> ReportError {
    template_fault(format!("malformed template part '{}': {}", part, e))
}

fn output_fault(part: &str, e: impl fmt::Display) -> ReportError {
    ReportError::Output(format!("{}: {}", part, e))
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
}

fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Part name a relationship target points at, relative to `source_part`.
fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = source_part.split('/').collect();
    segments.pop();
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            name => segments.push(name),
        }
    }
    segments.join("/")
}

fn last_rid(rels: &[Relationship]) -> u32 {
    rels.iter()
        .filter_map(|rel| rel.id.strip_prefix("rId")?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

fn next_rid(rels: &[Relationship]) -> String {
    format!("rId{}", last_rid(rels) + 1)
}

fn attr(e: &BytesStart, local: &[u8]) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| {
            let decoded = std::str::from_utf8(&a.value).ok()?;
            quick_xml::escape::unescape(decoded).ok().map(|v| v.into_owned())
        })
}

/// Copy of `e` without the attribute named `local`.
fn without_attr(e: &BytesStart, local: &[u8]) -> BytesStart<'static> {
    let mut out = e.clone().into_owned();
    out.clear_attributes();
    for a in e.attributes().with_checks(false).flatten() {
        if a.key.local_name().as_ref() != local {
            out.push_attribute(a);
        }
    }
    out
}

/// Copy of `e` with `local` set to `value`.
fn set_attr(e: &BytesStart, local: &[u8], value: &str) -> BytesStart<'static> {
    let mut out = without_attr(e, local);
    out.push_attribute((local, value.as_bytes()));
    out
}

fn emit(w: &mut XmlWriter, event: Event<'_>) -> Result<()> {
    w.write_event(event)
        .map_err(|e| ReportError::Output(format!("failed to write XML: {}", e)))
}

/// Calls `visit` on every start or empty element.
fn scan<'x, F>(xml: &'x [u8], part: &str, mut visit: F) -> Result<()>
where
    F: FnMut(&BytesStart<'x>),
{
    let mut reader = Reader::from_reader(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => visit(&e),
            Ok(Event::Eof) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(malformed(part, e)),
        }
    }
}

/// Streams `xml` through `on_event`, which writes whatever should remain.
fn rewrite<'x, F>(xml: &'x [u8], part: &str, mut on_event: F) -> Result<Vec<u8>>
where
    F: FnMut(Event<'x>, &mut XmlWriter) -> Result<()>,
{
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => on_event(event, &mut writer)?,
            Err(e) => return Err(malformed(part, e)),
        }
    }
    Ok(writer.into_inner())
}

/// Copies `xml`, dropping events `keep` rejects and calling `append` just
/// before the root element closes.
fn append_to_root<'x, K, A>(
    xml: &'x [u8],
    part: &str,
    mut keep: K,
    mut append: A,
) -> Result<Vec<u8>>
where
    K: FnMut(&Event<'x>) -> bool,
    A: FnMut(&mut XmlWriter) -> Result<()>,
{
    let mut depth = 0usize;
    rewrite(xml, part, |event, w| {
        if !keep(&event) {
            return Ok(());
        }
        match event {
            Event::Start(e) => {
                depth += 1;
                emit(w, Event::Start(e))
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    append(w)?;
                }
                emit(w, Event::End(e))
            }
            Event::Empty(e) if depth == 0 => {
                let end = e.to_end().into_owned();
                emit(w, Event::Start(e))?;
                append(w)?;
                emit(w, Event::End(end))
            }
            other => emit(w, other),
        }
    })
}

fn sheet_rid(workbook: &[u8], sheet: &str) -> Result<Option<(usize, String)>> {
    let mut tab = 0;
    let mut found = None;
    scan(workbook, WORKBOOK, |e| {
        if found.is_some() || e.local_name().as_ref() != b"sheet" {
            return;
        }
        if attr(e, b"name").as_deref() == Some(sheet) {
            found = attr(e, b"id").map(|rid| (tab, rid));
        }
        tab += 1;
    })?;
    Ok(found)
}

/// Makes the sheet at `tab` the active one and unselects the other tabs.
fn select_sheet(package: &mut Package, sheet_part: &str, tab: usize) -> Result<()> {
    let workbook = rewrite(package.required(WORKBOOK)?, WORKBOOK, |event, w| match event {
        Event::Empty(e) if e.local_name().as_ref() == b"workbookView" => {
            emit(w, Event::Empty(set_attr(&e, b"activeTab", &tab.to_string())))
        }
        Event::Start(e) if e.local_name().as_ref() == b"workbookView" => {
            emit(w, Event::Start(set_attr(&e, b"activeTab", &tab.to_string())))
        }
        other => emit(w, other),
    })?;
    package.put(WORKBOOK, workbook);

    let others: Vec<String> = package
        .relationships(&rels_part_for(WORKBOOK))?
        .into_iter()
        .filter(|rel| rel.kind.ends_with("/worksheet"))
        .map(|rel| resolve_target(WORKBOOK, &rel.target))
        .filter(|part| part != sheet_part)
        .collect();
    for part in others {
        let Some(xml) = package.get(&part) else {
            continue;
        };
        if !xml.windows(11).any(|w| w == b"tabSelected") {
            continue;
        }
        let unselected = rewrite(xml, &part, |event, w| match event {
            Event::Empty(e) if e.local_name().as_ref() == b"sheetView" => {
                emit(w, Event::Empty(without_attr(&e, b"tabSelected")))
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheetView" => {
                emit(w, Event::Start(without_attr(&e, b"tabSelected")))
            }
            other => emit(w, other),
        })?;
        package.put(&part, unselected);
    }
    Ok(())
}

fn find_drawing_rid(sheet: &[u8], part: &str) -> Result<Option<String>> {
    let mut rid = None;
    scan(sheet, part, |e| {
        if e.local_name().as_ref() == b"drawing" {
            rid = attr(e, b"id");
        }
    })?;
    Ok(rid)
}

fn parse_relationships(xml: &[u8], part: &str) -> Result<Vec<Relationship>> {
    let mut rels = Vec::new();
    scan(xml, part, |e| {
        if e.local_name().as_ref() != b"Relationship" {
            return;
        }
        if let (Some(id), Some(target)) = (attr(e, b"Id"), attr(e, b"Target")) {
            rels.push(Relationship {
                id,
                kind: attr(e, b"Type").unwrap_or_default(),
                target,
            });
        }
    })?;
    Ok(rels)
}

/// Adds `additions` to a rels part (created when missing) and drops the
/// relationships whose type ends with `drop_kind`.
fn edit_relationships(
    xml: Option<&[u8]>,
    part: &str,
    drop_kind: Option<&str>,
    additions: &[Relationship],
) -> Result<Vec<u8>> {
    let xml = xml.unwrap_or(EMPTY_RELATIONSHIPS.as_bytes());
    append_to_root(
        xml,
        part,
        |event| match (event, drop_kind) {
            (Event::Empty(e), Some(kind)) if e.local_name().as_ref() == b"Relationship" => {
                !attr(e, b"Type").is_some_and(|t| t.ends_with(kind))
            }
            _ => true,
        },
        |w| {
            for rel in additions {
                let mut element = BytesStart::new("Relationship");
                element.push_attribute(("Id", rel.id.as_str()));
                element.push_attribute(("Type", rel.kind.as_str()));
                element.push_attribute(("Target", rel.target.as_str()));
                emit(w, Event::Empty(element))?;
            }
            Ok(())
        },
    )
}

fn edit_content_types(xml: &[u8], new_drawings: &[String], needs_png: bool) -> Result<Vec<u8>> {
    let calc_chain = format!("/{}", CALC_CHAIN);
    let mut has_png = false;
    scan(xml, CONTENT_TYPES, |e| {
        if e.local_name().as_ref() == b"Default"
            && attr(e, b"Extension").is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        {
            has_png = true;
        }
    })?;

    append_to_root(
        xml,
        CONTENT_TYPES,
        |event| match event {
            Event::Empty(e) if e.local_name().as_ref() == b"Override" => {
                attr(e, b"PartName").as_deref() != Some(calc_chain.as_str())
            }
            _ => true,
        },
        |w| {
            if needs_png && !has_png {
                let mut element = BytesStart::new("Default");
                element.push_attribute(("Extension", "png"));
                element.push_attribute(("ContentType", "image/png"));
                emit(w, Event::Empty(element))?;
            }
            for part in new_drawings {
                let mut element = BytesStart::new("Override");
                element.push_attribute(("PartName", format!("/{}", part).as_str()));
                element.push_attribute(("ContentType", DRAWING_CONTENT_TYPE));
                emit(w, Event::Empty(element))?;
            }
            Ok(())
        },
    )
}

/// Stores each image as a media part and anchors it in `drawing_part`.
fn place_images(package: &mut Package, drawing_part: &str, images: &[SheetImage]) -> Result<()> {
    let rels_part = rels_part_for(drawing_part);
    let mut next = last_rid(&package.relationships(&rels_part)?);

    let mut additions = Vec::new();
    let mut anchors = Vec::new();
    for image in images {
        let media = package.free_part_name("xl/media/image", "png");
        package.put(&media, image.image.png.clone());
        next += 1;
        let rid = format!("rId{}", next);
        additions.push(Relationship {
            id: rid.clone(),
            kind: IMAGE_REL.to_string(),
            target: format!("/{}", media),
        });
        debug!("Placed {} at {} as {}", image.name, image.anchor, media);
        anchors.push((image, rid));
    }

    let rels = edit_relationships(package.get(&rels_part), &rels_part, None, &additions)?;
    package.put(&rels_part, rels);

    let drawing = append_anchors(package.required(drawing_part)?, drawing_part, &anchors)?;
    package.put(drawing_part, drawing);
    Ok(())
}

fn append_anchors(xml: &[u8], part: &str, anchors: &[(&SheetImage, String)]) -> Result<Vec<u8>> {
    let mut last_id = 0u32;
    scan(xml, part, |e| {
        if e.local_name().as_ref() == b"cNvPr" {
            if let Some(id) = attr(e, b"id").and_then(|id| id.parse::<u32>().ok()) {
                last_id = last_id.max(id);
            }
        }
    })?;

    append_to_root(
        xml,
        part,
        |_| true,
        |w| {
            for (image, rid) in anchors {
                last_id += 1;
                w.get_mut()
                    .extend_from_slice(anchor_xml(image, rid, last_id).as_bytes());
            }
            Ok(())
        },
    )
}

fn anchor_xml(image: &SheetImage, rid: &str, id: u32) -> String {
    let cx = u64::from(image.image.width) * EMU_PER_PIXEL;
    let cy = u64::from(image.image.height) * EMU_PER_PIXEL;
    format!(
        concat!(
            r#"<xdr:oneCellAnchor xmlns:xdr="{xdr}" xmlns:a="{a}" xmlns:r="{r}">"#,
            "<xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff>",
            "<xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>",
            r#"<xdr:ext cx="{cx}" cy="{cy}"/>"#,
            r#"<xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{id}" name="{name}"/>"#,
            r#"<xdr:cNvPicPr><a:picLocks noChangeAspect="1"/></xdr:cNvPicPr></xdr:nvPicPr>"#,
            r#"<xdr:blipFill><a:blip r:embed="{rid}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill>"#,
            r#"<xdr:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></xdr:spPr></xdr:pic>"#,
            "<xdr:clientData/></xdr:oneCellAnchor>"
        ),
        xdr = XDR_NS,
        a = DRAWINGML_NS,
        r = REL_NS,
        col = image.anchor.col,
        row = image.anchor.row,
        cx = cx,
        cy = cy,
        id = id,
        name = image.name,
        rid = rid,
    )
}

fn patch_sheet(
    xml: &[u8],
    part: &str,
    cells: &CellEdits,
    drawing_rid: Option<&str>,
) -> Result<Vec<u8>> {
    let mut pending: BTreeMap<u32, BTreeMap<u16, &str>> = BTreeMap::new();
    for (at, value) in cells {
        pending
            .entry(at.row)
            .or_default()
            .insert(at.col, value.as_str());
    }

    let mut patch = SheetPatch {
        pending,
        row_cells: BTreeMap::new(),
        row: None,
        col: None,
        in_row: false,
        prefix: String::new(),
        depth: 0,
        skip_depth: 0,
        drawing_rid,
        drawing_written: false,
    };
    let out = rewrite(xml, part, |event, w| patch.handle(event, w))?;

    if !patch.pending.is_empty() {
        return Err(template_fault(format!("'{}' has no cell data", part)));
    }
    Ok(out)
}

/// Streaming state while the report sheet is copied.
struct SheetPatch<'c> {
    /// Edits for rows not reached yet.
    pending: BTreeMap<u32, BTreeMap<u16, &'c str>>,
    /// Edits left in the current row.
    row_cells: BTreeMap<u16, &'c str>,
    row: Option<u32>,
    col: Option<u16>,
    in_row: bool,
    /// Namespace prefix of the worksheet elements, with its colon.
    prefix: String,
    depth: usize,
    skip_depth: usize,
    drawing_rid: Option<&'c str>,
    drawing_written: bool,
}

impl<'c> SheetPatch<'c> {
    fn handle(&mut self, event: Event<'_>, w: &mut XmlWriter) -> Result<()> {
        if self.skip_depth > 0 {
            match event {
                Event::Start(_) => self.skip_depth += 1,
                Event::End(_) => self.skip_depth -= 1,
                _ => {}
            }
            return Ok(());
        }
        match event {
            Event::Start(e) => {
                let depth = self.depth;
                if self.open(e, depth, false, w)? {
                    self.skip_depth = 1;
                } else {
                    self.depth += 1;
                }
                Ok(())
            }
            Event::Empty(e) => {
                let depth = self.depth;
                self.open(e, depth, true, w).map(|_| ())
            }
            Event::End(e) => {
                self.depth = self.depth.saturating_sub(1);
                self.close(e, w)
            }
            other => emit(w, other),
        }
    }

    fn name(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    /// Handles a start or empty element. Returns true when the element's
    /// content has been replaced and must be skipped.
    fn open(
        &mut self,
        e: BytesStart<'_>,
        depth: usize,
        empty: bool,
        w: &mut XmlWriter,
    ) -> Result<bool> {
        let local = e.local_name().as_ref().to_vec();
        if depth == 0 {
            if let Some(prefix) = e.name().prefix() {
                self.prefix = format!("{}:", String::from_utf8_lossy(prefix.as_ref()));
            }
        }
        if depth == 1 && AFTER_DRAWING.contains(&local.as_slice()) {
            self.write_drawing(w)?;
        }

        match local.as_slice() {
            b"dimension" if empty => {
                self.write_dimension(&e, w)?;
                Ok(false)
            }
            b"sheetData" if empty => {
                let end = e.to_end().into_owned();
                emit(w, Event::Start(e))?;
                self.flush_rows(None, w)?;
                emit(w, Event::End(end))?;
                Ok(false)
            }
            b"sheetView" => {
                let selected = set_attr(&e, b"tabSelected", "1");
                emit(w, if empty { Event::Empty(selected) } else { Event::Start(selected) })?;
                Ok(false)
            }
            b"row" => {
                self.open_row(e, empty, w)?;
                Ok(false)
            }
            b"c" if self.in_row => self.open_cell(e, empty, w),
            _ => {
                emit(w, if empty { Event::Empty(e) } else { Event::Start(e) })?;
                Ok(false)
            }
        }
    }

    fn close(&mut self, e: BytesEnd<'_>, w: &mut XmlWriter) -> Result<()> {
        match e.local_name().as_ref() {
            b"row" => {
                self.flush_row_cells(None, w)?;
                self.in_row = false;
            }
            b"sheetData" => self.flush_rows(None, w)?,
            b"worksheet" => self.write_drawing(w)?,
            _ => {}
        }
        emit(w, Event::End(e))
    }

    fn open_row(&mut self, e: BytesStart<'_>, empty: bool, w: &mut XmlWriter) -> Result<()> {
        let row = attr(&e, b"r")
            .and_then(|r| r.parse::<u32>().ok())
            .and_then(|r| r.checked_sub(1))
            .unwrap_or_else(|| self.row.map_or(0, |r| r + 1));
        self.row = Some(row);
        self.col = None;
        self.flush_rows(Some(row), w)?;
        self.row_cells = self.pending.remove(&row).unwrap_or_default();

        if self.row_cells.is_empty() {
            self.in_row = !empty;
            return emit(w, if empty { Event::Empty(e) } else { Event::Start(e) });
        }

        // spans is only a hint and new cells may fall outside it
        let start = without_attr(&e, b"spans");
        if empty {
            let end = start.to_end().into_owned();
            emit(w, Event::Start(start))?;
            self.flush_row_cells(None, w)?;
            emit(w, Event::End(end))
        } else {
            self.in_row = true;
            emit(w, Event::Start(start))
        }
    }

    fn open_cell(&mut self, e: BytesStart<'_>, empty: bool, w: &mut XmlWriter) -> Result<bool> {
        let col = attr(&e, b"r")
            .and_then(|r| r.parse::<CellRef>().ok())
            .map(|at| at.col)
            .unwrap_or_else(|| self.col.map_or(0, |c| c + 1));
        self.col = Some(col);
        self.flush_row_cells(Some(col), w)?;

        let Some(value) = self.row_cells.remove(&col) else {
            emit(w, if empty { Event::Empty(e) } else { Event::Start(e) })?;
            return Ok(false);
        };
        let row = self.row.unwrap_or(0);
        self.write_cell(w, CellRef::new(row, col), attr(&e, b"s").as_deref(), value)?;
        Ok(!empty)
    }

    /// Writes the pending rows that come before `before` (all when `None`).
    fn flush_rows(&mut self, before: Option<u32>, w: &mut XmlWriter) -> Result<()> {
        let rows: Vec<u32> = self
            .pending
            .keys()
            .copied()
            .take_while(|row| before.map_or(true, |b| *row < b))
            .collect();
        for row in rows {
            let cells = self.pending.remove(&row).unwrap_or_default();
            if cells.values().all(|value| value.is_empty()) {
                continue;
            }
            let mut start = BytesStart::new(self.name("row"));
            start.push_attribute(("r", (row + 1).to_string().as_str()));
            emit(w, Event::Start(start))?;
            for (col, value) in cells {
                if !value.is_empty() {
                    self.write_cell(w, CellRef::new(row, col), None, value)?;
                }
            }
            emit(w, Event::End(BytesEnd::new(self.name("row"))))?;
        }
        Ok(())
    }

    /// Writes the current row's new cells left of `before` (all when `None`).
    fn flush_row_cells(&mut self, before: Option<u16>, w: &mut XmlWriter) -> Result<()> {
        let row = self.row.unwrap_or(0);
        let cols: Vec<u16> = self
            .row_cells
            .keys()
            .copied()
            .take_while(|col| before.map_or(true, |b| *col < b))
            .collect();
        for col in cols {
            if let Some(value) = self.row_cells.remove(&col) {
                if !value.is_empty() {
                    self.write_cell(w, CellRef::new(row, col), None, value)?;
                }
            }
        }
        Ok(())
    }

    fn write_cell(
        &self,
        w: &mut XmlWriter,
        at: CellRef,
        style: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let mut cell = BytesStart::new(self.name("c"));
        cell.push_attribute(("r", at.to_string().as_str()));
        if let Some(style) = style {
            cell.push_attribute(("s", style));
        }
        if value.is_empty() {
            return emit(w, Event::Empty(cell));
        }
        cell.push_attribute(("t", "inlineStr"));
        emit(w, Event::Start(cell))?;
        emit(w, Event::Start(BytesStart::new(self.name("is"))))?;
        let mut text = BytesStart::new(self.name("t"));
        text.push_attribute(("xml:space", "preserve"));
        emit(w, Event::Start(text))?;
        emit(w, Event::Text(BytesText::new(value)))?;
        emit(w, Event::End(BytesEnd::new(self.name("t"))))?;
        emit(w, Event::End(BytesEnd::new(self.name("is"))))?;
        emit(w, Event::End(BytesEnd::new(self.name("c"))))
    }

    /// Widens the used-range hint to cover the written cells.
    fn write_dimension(&self, e: &BytesStart<'_>, w: &mut XmlWriter) -> Result<()> {
        let mut corners: Vec<CellRef> = attr(e, b"ref")
            .map(|r| r.split(':').filter_map(|c| c.parse().ok()).collect())
            .unwrap_or_default();
        for (row, cells) in &self.pending {
            for (col, value) in cells {
                if !value.is_empty() {
                    corners.push(CellRef::new(*row, *col));
                }
            }
        }

        let (Some(top), Some(bottom)) = (
            corners.iter().map(|c| c.row).min(),
            corners.iter().map(|c| c.row).max(),
        ) else {
            return emit(w, Event::Empty(e.clone().into_owned()));
        };
        let left = corners.iter().map(|c| c.col).min().unwrap_or(0);
        let right = corners.iter().map(|c| c.col).max().unwrap_or(0);

        let mut dimension = without_attr(e, b"ref");
        let range = format!("{}:{}", CellRef::new(top, left), CellRef::new(bottom, right));
        dimension.push_attribute(("ref", range.as_str()));
        emit(w, Event::Empty(dimension))
    }

    fn write_drawing(&mut self, w: &mut XmlWriter) -> Result<()> {
        let Some(rid) = self.drawing_rid.filter(|_| !self.drawing_written) else {
            return Ok(());
        };
        let mut drawing = BytesStart::new(self.name("drawing"));
        drawing.push_attribute(("xmlns:r", REL_NS));
        drawing.push_attribute(("r:id", rid));
        self.drawing_written = true;
        emit(w, Event::Empty(drawing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{part_text, png_bytes, write_workbook};
    use calamine::{Reader as _, Xlsx};

    fn picture(anchor: &str, width: u32, height: u32) -> SheetImage {
        SheetImage {
            anchor: anchor.parse().unwrap(),
            image: PreparedImage {
                png: png_bytes(width, height),
                width,
                height,
            },
            name: "foto antes",
        }
    }

    fn edits(pairs: &[(&str, &str)]) -> CellEdits {
        pairs
            .iter()
            .map(|(at, value)| (at.parse().unwrap(), value.to_string()))
            .collect()
    }

    fn blank_workbook() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IT.xlsx");
        write_workbook(&path, &["IT", "Otra"]);
        std::fs::read(path).unwrap()
    }

    #[test]
    fn resolves_relationship_targets() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../drawings/drawing1.xml"),
            "xl/drawings/drawing1.xml"
        );
        assert_eq!(
            resolve_target("xl/drawings/drawing1.xml", "/xl/media/image2.png"),
            "xl/media/image2.png"
        );
        assert_eq!(
            rels_part_for("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
    }

    #[test]
    fn writes_cells_into_empty_sheet_in_order() {
        let template = blank_workbook();
        let cells = edits(&[
            ("S7", "04/03/2025"),
            ("B2", "Agua & <sales>"),
            ("A2", "primero"),
            ("P62", ""),
        ]);
        let out = fill_sheet(&template, "IT", &cells, &[]).unwrap();

        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(out)).unwrap();
        let it = workbook.worksheet_range("IT").unwrap();
        let text = |row, col| it.get_value((row, col)).map(|v| v.to_string());
        assert_eq!(text(1, 0).as_deref(), Some("primero"));
        assert_eq!(text(1, 1).as_deref(), Some("Agua & <sales>"));
        assert_eq!(text(6, 18).as_deref(), Some("04/03/2025"));
        assert_eq!(text(61, 15), None);
    }

    #[test]
    fn adds_a_drawing_to_a_sheet_without_pictures() {
        let template = blank_workbook();
        let images = [picture("O37", 40, 30)];
        let out = fill_sheet(&template, "IT", &CellEdits::new(), &images).unwrap();

        let sheet = part_text(&out, "xl/worksheets/sheet1.xml").unwrap();
        assert!(sheet.contains("<drawing "));
        let rels = part_text(&out, "xl/worksheets/_rels/sheet1.xml.rels").unwrap();
        assert!(rels.contains("/xl/drawings/drawing1.xml"));
        let drawing = part_text(&out, "xl/drawings/drawing1.xml").unwrap();
        assert!(drawing.contains("<xdr:col>14</xdr:col>"));
        assert!(drawing.contains("<xdr:row>36</xdr:row>"));
        assert!(drawing.contains(r#"cx="381000" cy="285750""#));
        let types = part_text(&out, CONTENT_TYPES).unwrap();
        assert!(types.contains("/xl/drawings/drawing1.xml"));
        assert!(types.contains(r#"Extension="png""#));
        assert!(part_text(&out, "xl/media/image1.png").is_some());

        // the other sheet is untouched
        assert_eq!(
            part_text(&out, "xl/worksheets/sheet2.xml"),
            part_text(&template, "xl/worksheets/sheet2.xml")
        );
    }

    #[test]
    fn filled_sheet_becomes_the_active_tab() {
        let template = blank_workbook();
        assert!(part_text(&template, "xl/worksheets/sheet1.xml")
            .unwrap()
            .contains("tabSelected"));

        let out = fill_sheet(&template, "Otra", &edits(&[("A1", "x")]), &[]).unwrap();
        assert!(part_text(&out, WORKBOOK).unwrap().contains(r#"activeTab="1""#));
        assert!(part_text(&out, "xl/worksheets/sheet2.xml")
            .unwrap()
            .contains(r#"tabSelected="1""#));
        assert!(!part_text(&out, "xl/worksheets/sheet1.xml")
            .unwrap()
            .contains("tabSelected"));
    }

    #[test]
    fn calc_chain_is_dropped() {
        let template = blank_workbook();
        let mut package = Package::read(&template).unwrap();
        package.put(
            CALC_CHAIN,
            br#"<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="B2" i="1"/></calcChain>"#.to_vec(),
        );
        let rels_part = rels_part_for(WORKBOOK);
        let rels = edit_relationships(
            package.get(&rels_part),
            &rels_part,
            None,
            &[Relationship {
                id: "rId99".to_string(),
                kind: format!("{}/calcChain", REL_NS),
                target: "calcChain.xml".to_string(),
            }],
        )
        .unwrap();
        package.put(&rels_part, rels);
        let types = String::from_utf8(package.required(CONTENT_TYPES).unwrap().to_vec())
            .unwrap()
            .replace(
                "</Types>",
                r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/></Types>"#,
            );
        package.put(CONTENT_TYPES, types.into_bytes());
        let template = package.write().unwrap();

        let out = fill_sheet(&template, "IT", &edits(&[("B2", "x")]), &[]).unwrap();
        assert!(part_text(&out, CALC_CHAIN).is_none());
        assert!(!part_text(&out, "xl/_rels/workbook.xml.rels")
            .unwrap()
            .contains("calcChain"));
        assert!(!part_text(&out, CONTENT_TYPES).unwrap().contains("calcChain"));
    }

    #[test]
    fn unknown_sheet_is_reference_fault() {
        let err = fill_sheet(&blank_workbook(), "Informe", &CellEdits::new(), &[]).unwrap_err();
        assert!(matches!(err, ReportError::ReferenceData(_)));
    }

    #[test]
    fn garbage_template_is_reference_fault() {
        let err = fill_sheet(b"not a zip", "IT", &CellEdits::new(), &[]).unwrap_err();
        assert!(matches!(err, ReportError::ReferenceData(_)));
    }
}
