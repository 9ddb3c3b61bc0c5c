/// Material uniform block layout (std140) and property values

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::{engine_bail_warn, engine_error};

// ===== FIELD TYPE =====

/// Type of a material block field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Int,
    UInt,
}

impl FieldType {
    /// Size in bytes (std140 layout rules)
    pub fn size_bytes(&self) -> u64 {
        match self {
            FieldType::Float => 4,
            FieldType::Vec2  => 8,
            FieldType::Vec3  => 16, // padded to a vec4
            FieldType::Vec4  => 16,
            FieldType::Mat3  => 48, // 3 x vec4 columns
            FieldType::Mat4  => 64,
            FieldType::Int   => 4,
            FieldType::UInt  => 4,
        }
    }

    /// Alignment in bytes (std140 layout rules)
    pub fn alignment(&self) -> u64 {
        match self {
            FieldType::Float | FieldType::Int | FieldType::UInt => 4,
            FieldType::Vec2 => 8,
            FieldType::Vec3 | FieldType::Vec4 | FieldType::Mat3 | FieldType::Mat4 => 16,
        }
    }
}

/// A named field of a shader's material block
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialFieldDesc {
    pub name: String,
    pub field_type: FieldType,
}

impl MaterialFieldDesc {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self { name: name.to_string(), field_type }
    }
}

// ===== VALUES =====

/// A material property value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Int(i32),
    UInt(u32),
}

impl MaterialValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            MaterialValue::Float(_) => FieldType::Float,
            MaterialValue::Vec2(_) => FieldType::Vec2,
            MaterialValue::Vec3(_) => FieldType::Vec3,
            MaterialValue::Vec4(_) => FieldType::Vec4,
            MaterialValue::Mat3(_) => FieldType::Mat3,
            MaterialValue::Mat4(_) => FieldType::Mat4,
            MaterialValue::Int(_) => FieldType::Int,
            MaterialValue::UInt(_) => FieldType::UInt,
        }
    }

    /// std140 bytes of this value (`field_type().size_bytes()` long)
    pub fn to_std140(&self) -> Vec<u8> {
        match self {
            MaterialValue::Float(v) => v.to_ne_bytes().to_vec(),
            MaterialValue::Vec2(v) => bytemuck::bytes_of(&v.to_array()).to_vec(),
            MaterialValue::Vec3(v) => bytemuck::bytes_of(&v.extend(0.0).to_array()).to_vec(),
            MaterialValue::Vec4(v) => bytemuck::bytes_of(&v.to_array()).to_vec(),
            MaterialValue::Mat3(m) => {
                let columns: [[f32; 4]; 3] = [
                    m.x_axis.extend(0.0).to_array(),
                    m.y_axis.extend(0.0).to_array(),
                    m.z_axis.extend(0.0).to_array(),
                ];
                bytemuck::bytes_of(&columns).to_vec()
            }
            MaterialValue::Mat4(m) => bytemuck::bytes_of(&m.to_cols_array()).to_vec(),
            MaterialValue::Int(v) => v.to_ne_bytes().to_vec(),
            MaterialValue::UInt(v) => v.to_ne_bytes().to_vec(),
        }
    }
}

// ===== BLOCK LAYOUT =====

/// Placement of one field inside the block
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub field_type: FieldType,
    pub offset: u64,
}

/// std140 layout of a material block
#[derive(Debug, Clone)]
pub struct MaterialBlockLayout {
    fields: Vec<FieldLayout>,
    field_names: FxHashMap<String, usize>,
    size: u64,
}

impl MaterialBlockLayout {
    /// Lay out `fields` in declaration order
    ///
    /// # Panics
    ///
    /// Panics on a duplicate field name.
    pub fn new(fields: &[MaterialFieldDesc]) -> Self {
        let mut layouts = Vec::with_capacity(fields.len());
        let mut field_names = FxHashMap::default();
        let mut offset: u64 = 0;

        for (index, field) in fields.iter().enumerate() {
            if field_names.insert(field.name.clone(), index).is_some() {
                engine_error!("nova3d::MaterialBlockLayout", "Duplicate material field '{}'", field.name);
                panic!("duplicate material field '{}'", field.name);
            }
            let align = field.field_type.alignment();
            offset = (offset + align - 1) & !(align - 1);
            layouts.push(FieldLayout {
                name: field.name.clone(),
                field_type: field.field_type,
                offset,
            });
            offset += field.field_type.size_bytes();
        }

        // std140 struct alignment is 16; an empty block still binds 16 bytes
        let size = ((offset + 15) & !15).max(16);

        Self { fields: layouts, field_names, size }
    }

    /// Block size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.field_names.get(name).map(|&i| &self.fields[i])
    }

    /// Encode `value` into `block` at the offset of field `name`
    pub fn write(&self, block: &mut [u8], name: &str, value: &MaterialValue) -> Result<()> {
        let Some(field) = self.field(name) else {
            engine_bail_warn!("nova3d::MaterialBlockLayout", "Unknown material field '{}'", name);
        };
        if field.field_type != value.field_type() {
            engine_bail_warn!(
                "nova3d::MaterialBlockLayout",
                "Material field '{}' is {:?}, got {:?}",
                name,
                field.field_type,
                value.field_type()
            );
        }
        let bytes = value.to_std140();
        let start = field.offset as usize;
        block[start..start + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
#[path = "material_layout_tests.rs"]
mod tests;
