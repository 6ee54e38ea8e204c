use std::{
    collections::HashSet,
    io::Cursor,
};

use ply_rs::{
    parser::Parser,
    ply::{
        DefaultElement,
        Encoding,
        ScalarType,
    },
};

use crate::io::{
    error::IngestError,
    schema::{
        SchemaMode,
        OFFSET_TABLE_SLOTS,
        SH_CHANNELS,
        STRIDE_SLOT,
    },
};


pub const VERTEX_ELEMENT: &str = "vertex";


#[derive(Clone, Debug)]
pub struct PlyProperty {
    pub name: String,
    pub scalar: ScalarType,
    pub byte_offset: u32,
}

/// Vertex record layout declared by a binary little-endian PLY header.
#[derive(Clone, Debug)]
pub struct PlyLayout {
    pub point_count: usize,
    pub record_size: u32,
    pub properties: Vec<PlyProperty>,
    /// byte offset of the first vertex record in the file
    pub data_offset: usize,
}

impl PlyLayout {
    pub fn payload_size(&self) -> usize {
        self.point_count * self.record_size as usize
    }
}


pub fn scalar_size(scalar: &ScalarType) -> u32 {
    match scalar {
        ScalarType::Char | ScalarType::UChar => 1,
        ScalarType::Short | ScalarType::UShort => 2,
        ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
        ScalarType::Double => 8,
    }
}

fn scalar_type(name: &str) -> Option<ScalarType> {
    match name {
        "char" | "int8" => Some(ScalarType::Char),
        "uchar" | "uint8" => Some(ScalarType::UChar),
        "short" | "int16" => Some(ScalarType::Short),
        "ushort" | "uint16" => Some(ScalarType::UShort),
        "int" | "int32" => Some(ScalarType::Int),
        "uint" | "uint32" => Some(ScalarType::UInt),
        "float" | "float32" => Some(ScalarType::Float),
        "double" | "float64" => Some(ScalarType::Double),
        _ => None,
    }
}


/// One `element` block as declared, repeated property names included.
struct HeaderElement {
    name: String,
    count: usize,
    properties: Vec<PlyProperty>,
    list_property: Option<String>,
}

impl HeaderElement {
    fn record_size(&self) -> u32 {
        self.properties
            .iter()
            .map(|property| scalar_size(&property.scalar))
            .sum()
    }
}

// ply-rs folds repeated property names into one entry, offsets come from the raw lines
fn header_elements(header: &str) -> Result<Vec<HeaderElement>, IngestError> {
    let mut elements: Vec<HeaderElement> = Vec::new();

    for line in header.lines() {
        let mut words = line.split_whitespace();

        match words.next() {
            Some("element") => {
                let name = words.next().unwrap_or_default();
                let count = words.next()
                    .and_then(|count| count.parse::<usize>().ok())
                    .ok_or_else(|| IngestError::format(format!("invalid element line `{line}`")))?;

                elements.push(HeaderElement {
                    name: name.to_string(),
                    count,
                    properties: vec![],
                    list_property: None,
                });
            }
            Some("property") => {
                let Some(element) = elements.last_mut() else {
                    return Err(IngestError::format("property declared before any element"));
                };

                let data_type = words.next().unwrap_or_default();
                if data_type == "list" {
                    let name = words.last().unwrap_or_default();
                    element.list_property.get_or_insert_with(|| name.to_string());
                    continue;
                }

                let (Some(scalar), Some(name)) = (scalar_type(data_type), words.next()) else {
                    return Err(IngestError::format(format!("invalid property line `{line}`")));
                };

                let byte_offset = element.record_size();
                element.properties.push(PlyProperty {
                    name: name.to_string(),
                    scalar,
                    byte_offset,
                });
            }
            _ => {}
        }
    }

    Ok(elements)
}


pub fn parse_layout(bytes: &[u8]) -> Result<PlyLayout, IngestError> {
    let mut cursor = Cursor::new(bytes);
    let header = Parser::<DefaultElement>::new()
        .read_header(&mut cursor)
        .map_err(|err| IngestError::format(format!("invalid ply header: {err}")))?;

    if !matches!(header.encoding, Encoding::BinaryLittleEndian) {
        return Err(IngestError::format(format!(
            "expected binary_little_endian, found {:?}",
            header.encoding,
        )));
    }

    let header_end = cursor.position() as usize;
    let header_text = std::str::from_utf8(&bytes[..header_end])
        .map_err(|err| IngestError::format(format!("invalid ply header: {err}")))?;

    // elements before the vertex block are skipped, which requires a fixed record size
    let mut data_offset = header_end;
    for element in header_elements(header_text)? {
        if let Some(list) = &element.list_property {
            return Err(IngestError::format(format!(
                "list property `{list}` in element `{}`",
                element.name,
            )));
        }

        let record_size = element.record_size();

        if element.name == VERTEX_ELEMENT {
            return Ok(PlyLayout {
                point_count: element.count,
                record_size,
                properties: element.properties,
                data_offset,
            });
        }

        data_offset = element.count
            .checked_mul(record_size as usize)
            .and_then(|size| data_offset.checked_add(size))
            .ok_or_else(|| IngestError::format(format!(
                "element `{}` of {} records overflows the file offset",
                element.name,
                element.count,
            )))?;
    }

    Err(IngestError::format("missing vertex element"))
}


/// A validated scene: header-derived offsets plus the raw vertex records.
#[derive(Clone, Debug)]
pub struct ParsedScene {
    pub schema_mode: SchemaMode,
    pub point_count: u32,
    pub record_size: u32,
    /// offset-table writes for the fields this scene declares
    pub assignments: Vec<(usize, u32)>,
    pub sh_rest_per_channel: u32,
    pub payload: Vec<u8>,
}

impl ParsedScene {
    /// Rejects a scene that was not parsed for this session's mode and capacity.
    pub fn check(&self, mode: SchemaMode, max_splat_count: u32) -> Result<(), IngestError> {
        if self.point_count == 0 || self.point_count > max_splat_count {
            return Err(IngestError::Size {
                count: self.point_count as usize,
                max: max_splat_count,
            });
        }

        if self.schema_mode != mode {
            return Err(IngestError::format(format!(
                "scene was parsed for {:?}, the stream expects {:?}",
                self.schema_mode,
                mode,
            )));
        }

        let stride = self.record_size / 4;
        let expected = self.point_count as u64 * self.record_size as u64;
        if stride == 0 || self.record_size % 4 != 0 || self.payload.len() as u64 != expected {
            return Err(IngestError::format(format!(
                "{} payload bytes do not hold {} records of {} bytes",
                self.payload.len(),
                self.point_count,
                self.record_size,
            )));
        }

        let in_record = self.assignments.iter().all(|&(slot, offset)| match slot {
            STRIDE_SLOT => offset == stride,
            slot => slot < OFFSET_TABLE_SLOTS && offset < stride,
        });
        if !in_record {
            return Err(IngestError::format("offset assignment outside the vertex record"));
        }

        Ok(())
    }
}


pub fn derive_assignments(
    layout: &PlyLayout,
    mode: SchemaMode,
) -> Result<Vec<(usize, u32)>, IngestError> {
    let mut assignments: Vec<(usize, u32)> = Vec::new();

    for property in &layout.properties {
        let Some(slot) = mode.slot_for(&property.name) else {
            continue;
        };

        if assignments.iter().any(|&(assigned, _)| assigned == slot) {
            continue;
        }

        if !matches!(property.scalar, ScalarType::Float) {
            return Err(IngestError::format(format!(
                "property `{}` must be float, found {:?}",
                property.name,
                property.scalar,
            )));
        }

        assignments.push((slot, property.byte_offset / 4));
    }

    assignments.push((STRIDE_SLOT, layout.record_size / 4));

    Ok(assignments)
}

fn sh_rest_per_channel(layout: &PlyLayout, mode: SchemaMode) -> u32 {
    if mode.is_spacetime() {
        return 0;
    }

    let declared = layout.properties
        .iter()
        .filter(|property| property.name.starts_with("f_rest_"))
        .filter(|property| mode.slot_for(&property.name).is_some())
        .map(|property| property.name.as_str())
        .collect::<HashSet<_>>()
        .len();

    (declared / SH_CHANNELS) as u32
}


pub fn parse_scene(
    bytes: &[u8],
    mode: SchemaMode,
    max_splat_count: u32,
) -> Result<ParsedScene, IngestError> {
    let layout = parse_layout(bytes)?;

    if layout.point_count == 0 || layout.point_count > max_splat_count as usize {
        return Err(IngestError::Size {
            count: layout.point_count,
            max: max_splat_count,
        });
    }

    if layout.record_size == 0 || layout.record_size % 4 != 0 {
        return Err(IngestError::format(format!(
            "vertex record size {} is not a whole number of floats",
            layout.record_size,
        )));
    }

    let assignments = derive_assignments(&layout, mode)?;

    let payload_end = layout.data_offset + layout.payload_size();
    if bytes.len() < payload_end {
        return Err(IngestError::format(format!(
            "truncated payload: expected {} bytes of vertex data, found {}",
            layout.payload_size(),
            bytes.len().saturating_sub(layout.data_offset),
        )));
    }

    Ok(ParsedScene {
        schema_mode: mode,
        point_count: layout.point_count as u32,
        record_size: layout.record_size,
        assignments,
        sh_rest_per_channel: sh_rest_per_channel(&layout, mode),
        payload: bytes[layout.data_offset..payload_end].to_vec(),
    })
}
