//! Binary PLY import into importance-ordered splat rows.

use crate::common::{
    quantize_rotation, sigmoid, truncate_u8, DEFAULT_ROTATION, DEFAULT_SCALE, SH_C0,
};
use crate::error::SplatError;
use crate::row::{encode_row, SplatRow, ROW_LENGTH};
use foldhash::HashMap;
use foldhash::HashMapExt;
use memchr::memmem;

pub const MAX_HEADER_BYTES: usize = 10 * 1024;
const HEADER_END: &[u8] = b"end_header\n";
const PLY_MAGIC: &[u8] = b"ply\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Float,
    Double,
}

impl PropertyType {
    /// Unknown type names (including `list`) are read as one unsigned byte.
    pub fn parse(s: &str) -> Self {
        match s {
            "char" | "int8" => PropertyType::Char,
            "short" | "int16" => PropertyType::Short,
            "ushort" | "uint16" => PropertyType::Ushort,
            "int" | "int32" => PropertyType::Int,
            "uint" | "uint32" => PropertyType::Uint,
            "float" | "float32" => PropertyType::Float,
            "double" | "float64" => PropertyType::Double,
            _ => PropertyType::Uchar,
        }
    }

    pub const fn size(self) -> usize {
        match self {
            PropertyType::Char | PropertyType::Uchar => 1,
            PropertyType::Short | PropertyType::Ushort => 2,
            PropertyType::Int | PropertyType::Uint | PropertyType::Float => 4,
            PropertyType::Double => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub offset: usize,
    pub ty: PropertyType,
}

impl Property {
    /// Reads this property out of the record starting at `base`.
    #[inline]
    fn read(&self, data: &[u8], base: usize) -> f32 {
        let at = base + self.offset;
        match self.ty {
            PropertyType::Char => data[at] as i8 as f32,
            PropertyType::Uchar => data[at] as f32,
            PropertyType::Short => i16::from_le_bytes([data[at], data[at + 1]]) as f32,
            PropertyType::Ushort => u16::from_le_bytes([data[at], data[at + 1]]) as f32,
            PropertyType::Int => i32::from_le_bytes(le4(data, at)) as f32,
            PropertyType::Uint => u32::from_le_bytes(le4(data, at)) as f32,
            PropertyType::Float => f32::from_le_bytes(le4(data, at)),
            PropertyType::Double => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&data[at..at + 8]);
                f64::from_le_bytes(b) as f32
            }
        }
    }
}

#[inline(always)]
fn le4(data: &[u8], at: usize) -> [u8; 4] {
    [data[at], data[at + 1], data[at + 2], data[at + 3]]
}

#[derive(Debug, Clone)]
pub struct PlyHeader {
    pub vertex_count: usize,
    /// Sum of all declared property widths.
    pub stride: usize,
    /// Byte offset of the first record.
    pub data_offset: usize,
    properties: HashMap<String, Property>,
}

impl PlyHeader {
    pub fn property(&self, name: &str) -> Option<Property> {
        self.properties.get(name).copied()
    }

    fn group<const N: usize>(&self, names: [&str; N]) -> Option<[Property; N]> {
        let mut out = [Property {
            offset: 0,
            ty: PropertyType::Uchar,
        }; N];
        for (slot, name) in out.iter_mut().zip(names) {
            *slot = self.property(name)?;
        }
        Some(out)
    }
}

/// True when `data` starts with the `ply` magic line.
pub fn is_ply(data: &[u8]) -> bool {
    data.starts_with(PLY_MAGIC)
}

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

pub fn parse_header(raw_data: &[u8]) -> Result<PlyHeader, SplatError> {
    let window = &raw_data[..raw_data.len().min(MAX_HEADER_BYTES)];
    let header_end = memmem::find(window, HEADER_END).ok_or_else(|| {
        SplatError::Format(format!(
            "No 'end_header' found in the first {} bytes",
            MAX_HEADER_BYTES
        ))
    })?;
    let header = &raw_data[..header_end];

    let mut vertex_count: Option<usize> = None;
    let mut properties: HashMap<String, Property> = HashMap::new();
    let mut stride = 0;
    let mut offset = 0;

    while let Some(raw_line) = next_line(header, &mut offset) {
        let line = std::str::from_utf8(raw_line)
            .map_err(|e| SplatError::Format(format!("UTF-8 error in header: {}", e)))?;
        let fields: Vec<&str> = line.split_whitespace().collect();

        match fields.as_slice() {
            ["format", kind, ..] if *kind != "binary_little_endian" => {
                return Err(SplatError::Format(format!(
                    "Unsupported .ply format '{}' (only binary_little_endian is supported)",
                    kind
                )));
            }
            ["element", "vertex", count] => {
                let count = count
                    .parse::<usize>()
                    .map_err(|e| SplatError::Format(format!("Bad vertex count: {}", e)))?;
                vertex_count = Some(count);
            }
            ["property", ty, .., name] => {
                let ty = PropertyType::parse(ty);
                properties.insert((*name).to_string(), Property { offset: stride, ty });
                stride += ty.size();
            }
            _ => {}
        }
    }

    let vertex_count = vertex_count
        .ok_or_else(|| SplatError::Format("Missing 'element vertex' definition".to_string()))?;

    log::debug!(
        "PLY header: {} vertices, {} bytes per row, {} properties",
        vertex_count,
        stride,
        properties.len()
    );

    Ok(PlyHeader {
        vertex_count,
        stride,
        data_offset: header_end + HEADER_END.len(),
        properties,
    })
}

/// Typed view over the named vertex properties the importer understands.
struct VertexLayout {
    xyz: [Property; 3],
    scale: Option<[Property; 3]>,
    rot: Option<[Property; 4]>,
    opacity: Option<Property>,
    f_dc: Option<[Property; 3]>,
    rgb: Option<[Property; 3]>,
}

impl VertexLayout {
    fn new(header: &PlyHeader) -> Result<Self, SplatError> {
        let xyz = header.group(["x", "y", "z"]).ok_or_else(|| {
            SplatError::Format("Missing required position fields x, y, z".to_string())
        })?;
        Ok(Self {
            xyz,
            scale: header.group(["scale_0", "scale_1", "scale_2"]),
            rot: header.group(["rot_0", "rot_1", "rot_2", "rot_3"]),
            opacity: header.property("opacity"),
            f_dc: header.group(["f_dc_0", "f_dc_1", "f_dc_2"]),
            rgb: header.group(["red", "green", "blue"]),
        })
    }

    /// Approximate visual footprint: scale volume times opacity. Zero when the
    /// vertex has no scale.
    fn importance(&self, data: &[u8], base: usize) -> f32 {
        let Some(scale) = self.scale else {
            return 0.0;
        };
        let size: f32 = scale.iter().map(|p| p.read(data, base).exp()).product();
        let opacity = self.opacity.map_or(1.0, |p| sigmoid(p.read(data, base)));
        size * opacity
    }

    fn row(&self, data: &[u8], base: usize) -> SplatRow {
        let center = self.xyz.map(|p| p.read(data, base));

        let scale = match self.scale {
            Some(s) => s.map(|p| p.read(data, base).exp()),
            None => [DEFAULT_SCALE; 3],
        };

        let rotation = match self.rot {
            Some(r) => quantize_rotation(r.map(|p| p.read(data, base))),
            None => DEFAULT_ROTATION,
        };

        let rgb = match (self.f_dc, self.rgb) {
            (Some(dc), _) => dc.map(|p| truncate_u8((0.5 + SH_C0 * p.read(data, base)) * 255.0)),
            (None, Some(rgb)) => rgb.map(|p| truncate_u8(p.read(data, base))),
            (None, None) => [255; 3],
        };
        let alpha = self
            .opacity
            .map_or(255, |p| truncate_u8(sigmoid(p.read(data, base)) * 255.0));

        SplatRow {
            center,
            scale,
            color: [rgb[0], rgb[1], rgb[2], alpha],
            rotation,
        }
    }
}

/// Converts a binary PLY file into raw splat rows, most important first.
///
/// The ordering is a load-time heuristic so that truncated or progressively
/// rendered data shows the largest, most opaque splats; it is unrelated to
/// the per-frame depth sort.
pub fn import_ply(raw_data: &[u8]) -> Result<Vec<u8>, SplatError> {
    let header = parse_header(raw_data)?;
    let layout = VertexLayout::new(&header)?;
    let count = header.vertex_count;
    if count == 0 {
        return Ok(Vec::new());
    }

    let data = header
        .data_offset
        .checked_add(count.checked_mul(header.stride).ok_or_else(|| {
            SplatError::Format("Overflow in byte calculation".to_string())
        })?)
        .and_then(|end| raw_data.get(header.data_offset..end))
        .ok_or_else(|| {
            SplatError::Format(format!(
                "Binary data is too short for {} vertices of {} bytes, have {} bytes",
                count,
                header.stride,
                raw_data.len() - header.data_offset
            ))
        })?;

    let importance: Vec<f32> = (0..count)
        .map(|i| layout.importance(data, i * header.stride))
        .collect();
    let mut order: Vec<usize> = (0..count).collect();
    // Stable, so equal scores keep file order.
    order.sort_by(|&a, &b| importance[b].total_cmp(&importance[a]));

    let mut output = vec![0u8; count * ROW_LENGTH];
    for (j, &i) in order.iter().enumerate() {
        let row = layout.row(data, i * header.stride);
        encode_row(&mut output, j * ROW_LENGTH, &row);
    }

    log::debug!("Imported {} PLY vertices", count);
    Ok(output)
}
