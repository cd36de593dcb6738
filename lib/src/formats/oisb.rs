//! oiSB: struct/variable/array catalogue over a fixed buffer size (§4.E,
//! §3, §6). Grounded directly in `original_source/src/formats/oiSB/
//! {variable,combine,read,write}.c` — the packing math, hash folding, and
//! combine-merge rules are line-for-line translations of that file's
//! intent, not a reinterpretation.

use crate::error::{OxcError, Result};
use crate::hash;
use crate::macros::bitflags_like;

pub const MAGIC: u32 = 0x4253_696F; // "oiSB"
const VERSION: u8 = 12; // 1.2

bitflags_like! {
    pub struct SbFlags: u8 {
        const IS_TIGHTLY_PACKED = 0x1;
        const IS_UTF8 = 0x2;
        const HIDE_MAGIC_NUMBER = 0x4;
    }
}

bitflags_like! {
    pub struct SbVarFlags: u8 {
        const USED_SPIRV = 0x1;
        const USED_DXIL = 0x2;
    }
}

/// `ESBType`: `(mat_rows-1)<<6 | stride_log<<4 | primitive<<2 | (vec-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbType(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbPrimitive {
    Float = 0,
    Int = 1,
    Uint = 2,
}

impl SbType {
    pub fn new(primitive: SbPrimitive, stride_log: u8, vec: u8, mat_rows: u8) -> Result<Self> {
        if !(1..=4).contains(&vec) || !(1..=4).contains(&mat_rows) {
            return Err(OxcError::InvalidParameter(
                "ESBType vector/matrix dimension must be 1..=4".to_string(),
            ));
        }
        if stride_log > 3 {
            return Err(OxcError::InvalidParameter(
                "ESBType stride log must be 0..=3".to_string(),
            ));
        }
        if matches!(primitive, SbPrimitive::Float) && stride_log == 0 {
            return Err(OxcError::InvalidParameter(
                "ESBType float has no 8-bit stride".to_string(),
            ));
        }
        let byte = ((mat_rows - 1) << 6) | (stride_log << 4) | ((primitive as u8) << 2) | (vec - 1);
        Ok(SbType(byte))
    }

    pub fn vector(self) -> u8 {
        (self.0 & 0x3) + 1
    }

    pub fn primitive_bits(self) -> u8 {
        (self.0 >> 2) & 0x3
    }

    pub fn stride_log(self) -> u8 {
        (self.0 >> 4) & 0x3
    }

    pub fn matrix_rows(self) -> u8 {
        ((self.0 >> 6) & 0x3) + 1
    }

    pub fn is_valid(self) -> bool {
        let primitive = self.primitive_bits();
        if primitive == 3 {
            return false;
        }
        if self.0 >> 8 != 0 {
            return false;
        }
        // floats have no 8-bit ("F8") stride class.
        !(primitive == 0 && self.stride_log() == 0)
    }

    /// `ESBType_getSize`: byte size of one scalar/vector/matrix value,
    /// tightly packed or std140-rounded per-row.
    pub fn size(self, is_packed: bool) -> u32 {
        let primitive_size = 1u32 << self.stride_log();
        let w = self.vector() as u32;
        let h = self.matrix_rows() as u32;

        if is_packed {
            return primitive_size * w * h;
        }

        let real_stride = w * primitive_size;
        let stride = (real_stride + 15) & !15;
        stride * (h - 1) + real_stride
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbStruct {
    pub stride: u32,
}

pub const NO_PARENT: u16 = 0xFFFF;
const NO_ARRAY: u16 = 0xFFFF;
const NO_STRUCT: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbVar {
    pub struct_id: u16,
    pub array_index: u16,
    pub offset: u32,
    pub r#type: u8,
    pub flags: u8,
    pub parent_id: u16,
}

impl SbVar {
    pub fn is_struct(&self) -> bool {
        self.r#type == 0
    }
}

/// A parsed or in-construction oiSB layout.
#[derive(Debug, Clone)]
pub struct SbFile {
    pub buffer_size: u32,
    pub flags: SbFlags,
    pub structs: Vec<SbStruct>,
    pub struct_names: Vec<String>,
    pub vars: Vec<SbVar>,
    pub var_names: Vec<String>,
    pub arrays: Vec<Vec<u32>>,
    pub hash: u64,
}

impl SbFile {
    pub fn new(buffer_size: u32, flags: SbFlags) -> Self {
        SbFile {
            buffer_size,
            flags,
            structs: Vec::new(),
            struct_names: Vec::new(),
            vars: Vec::new(),
            var_names: Vec::new(),
            arrays: Vec::new(),
            hash: hash::fnv1a64_start(),
        }
    }

    fn is_tightly_packed(&self) -> bool {
        self.flags.contains(SbFlags::IS_TIGHTLY_PACKED)
    }

    /// `SBFile_addStruct`.
    pub fn add_struct(&mut self, name: impl Into<String>, stride: u32) -> Result<u16> {
        if stride == 0 {
            return Err(OxcError::InvalidParameter(
                "SbFile::add_struct stride must be non-zero".to_string(),
            ));
        }
        if self.structs.len() >= (u16::MAX - 1) as usize {
            return Err(OxcError::out_of_bounds(
                "SbFile::add_struct",
                self.structs.len() as u64,
                u16::MAX as u64,
            ));
        }
        let name = name.into();
        if name.len() as u64 >= u32::MAX as u64 {
            return Err(OxcError::InvalidParameter(
                "SbFile::add_struct name too long".to_string(),
            ));
        }

        self.hash = hash::fnv1a64_single(stride as u64 | ((name.len() as u64) << 32), self.hash);
        self.hash = hash::fnv1a64(name.as_bytes(), self.hash);

        if !crate::buffer::is_ascii(name.as_bytes(), 0.0) {
            self.flags |= SbFlags::IS_UTF8;
        }

        let id = self.structs.len() as u16;
        self.structs.push(SbStruct { stride });
        self.struct_names.push(name);
        Ok(id)
    }

    fn apply_var_hash(&mut self, var: &SbVar, name: &str) {
        let struct_id_u64 = (var.struct_id as u64) | ((var.array_index as u64) << 16) | ((var.offset as u64) << 32);
        self.hash = hash::fnv1a64_single(struct_id_u64, self.hash);
        let packed = (var.r#type as u32) | ((var.flags as u32) << 8) | ((var.parent_id as u32) << 16);
        self.hash = hash::fnv1a64_single(packed as u64 | ((name.len() as u64) << 32), self.hash);
        self.hash = hash::fnv1a64(name.as_bytes(), self.hash);
    }

    fn apply_array_hash(&mut self, arr: &[u32]) {
        self.hash = hash::fnv1a64_single(arr.len() as u64, self.hash);
        for chunk in arr.chunks(2) {
            let word = if chunk.len() == 2 {
                (chunk[0] as u64) | ((chunk[1] as u64) << 32)
            } else {
                chunk[0] as u64
            };
            self.hash = hash::fnv1a64_single(word, self.hash);
        }
    }

    fn validate_and_resolve_array(&mut self, arrays: Option<Vec<u32>>) -> Result<u16> {
        let Some(arrays) = arrays else {
            return Ok(NO_ARRAY);
        };
        if arrays.is_empty() {
            return Err(OxcError::InvalidState(
                "SbFile: arrays should be None if empty".to_string(),
            ));
        }
        if arrays.len() > 32 {
            return Err(OxcError::out_of_bounds(
                "SbFile: arrays.len()",
                arrays.len() as u64,
                32,
            ));
        }
        if arrays.iter().any(|&d| d == 0) {
            return Err(OxcError::InvalidParameter(
                "SbFile: array dimension is 0".to_string(),
            ));
        }
        if self.arrays.len() >= (u16::MAX - 1) as usize {
            return Err(OxcError::out_of_bounds(
                "SbFile: arrays.len()",
                self.arrays.len() as u64,
                u16::MAX as u64,
            ));
        }

        if let Some(existing) = self.arrays.iter().position(|a| a == &arrays) {
            return Ok(existing as u16);
        }

        let id = self.arrays.len() as u16;
        self.arrays.push(arrays);
        Ok(id)
    }

    fn check_sibling_name_free(&self, parent_id: u16, name: &str) -> Result<()> {
        let clash = self
            .vars
            .iter()
            .zip(self.var_names.iter())
            .any(|(v, n)| v.parent_id == parent_id && n == name);
        if clash {
            return Err(OxcError::AlreadyDefined(format!(
                "sibling variable named {name:?} already exists under this parent"
            )));
        }
        Ok(())
    }

    /// Computes the total array-multiplied byte footprint per §4.E step 4.
    fn total_array_bytes(&self, elem_size: u32, is_packed: bool, arrays: &[u32]) -> Result<u32> {
        let mut total: u64 = if is_packed {
            elem_size as u64
        } else {
            ((elem_size + 15) & !15) as u64
        };
        for &dim in arrays {
            total = total.saturating_mul(dim as u64);
            if total > u32::MAX as u64 {
                return Err(OxcError::out_of_bounds("SbFile array size", total, u32::MAX as u64));
            }
        }
        if !is_packed && (elem_size & 15) != 0 {
            total -= (16 - (elem_size & 15)) as u64;
        }
        Ok(total as u32)
    }

    /// The straddle test is evaluated against the size of the type's last
    /// scalar component (`type_size`), not its full vector footprint: a
    /// `vecN` is allowed to continue past a 16-byte boundary component by
    /// component as long as no single scalar read crosses it uninvited,
    /// matching Testable Property 10 (`f32x3` at offset 12 accepted, at
    /// offset 13 rejected).
    fn check_packing(&self, offset: u32, type_size: u32) -> Result<()> {
        let is_packed = self.is_tightly_packed();
        if !is_packed
            && (((offset as u64 + type_size as u64 - 1) >> 4) != (offset as u64 >> 4))
            && (offset & 15) != 0
        {
            return Err(OxcError::InvalidParameter(
                "variable offset straddles a 16-byte boundary in non-tightly-packed mode".to_string(),
            ));
        }
        if is_packed && (offset % type_size) != 0 {
            return Err(OxcError::InvalidParameter(
                "variable offset does not follow required type alignment".to_string(),
            ));
        }
        Ok(())
    }

    fn check_parent_bounds(&self, parent_id: u16, offset: u32, size: u32) -> Result<()> {
        if parent_id == NO_PARENT {
            if offset as u64 + size as u64 > self.buffer_size as u64 {
                return Err(OxcError::out_of_bounds(
                    "SbFile variable offset+size vs bufferSize",
                    offset as u64 + size as u64,
                    self.buffer_size as u64,
                ));
            }
            return Ok(());
        }
        if parent_id as usize >= self.vars.len() {
            return Err(OxcError::out_of_bounds(
                "SbFile variable parentId",
                parent_id as u64,
                self.vars.len() as u64,
            ));
        }
        if !self.vars[parent_id as usize].is_struct() {
            return Err(OxcError::InvalidState(
                "SbFile variable parentId does not refer to a struct".to_string(),
            ));
        }
        Ok(())
    }

    /// `SBFile_addVariableAsType`.
    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        offset: u32,
        parent_id: u16,
        r#type: SbType,
        flags: SbVarFlags,
        arrays: Option<Vec<u32>>,
    ) -> Result<u16> {
        let name = name.into();
        if !r#type.is_valid() {
            return Err(OxcError::InvalidParameter("invalid ESBType".to_string()));
        }
        if self.vars.len() >= (u16::MAX - 1) as usize {
            return Err(OxcError::out_of_bounds("SbFile::add_variable vars", self.vars.len() as u64, u16::MAX as u64));
        }

        let is_packed = self.is_tightly_packed();
        let elem_size = r#type.size(is_packed);
        let type_size = 1u32 << r#type.stride_log();

        self.check_packing(offset, type_size)?;
        let total_size = self.total_array_bytes(elem_size, is_packed, arrays.as_deref().unwrap_or(&[]))?;
        self.check_parent_bounds(parent_id, offset, total_size)?;
        self.check_sibling_name_free(parent_id, &name)?;

        let prev_array_count = self.arrays.len();
        let array_id = self.validate_and_resolve_array(arrays)?;
        let array_is_new = array_id as usize >= prev_array_count;

        let var = SbVar {
            struct_id: NO_STRUCT,
            array_index: array_id,
            offset,
            r#type: r#type.0,
            flags: flags.bits(),
            parent_id,
        };

        // §4.E step 7: fold the var's own fields first, and only then (and
        // only the first time this array shows up) fold its dims, matching
        // `recompute_hash`'s order on read.
        self.apply_var_hash(&var, &name);
        if array_is_new {
            let arr = self.arrays[array_id as usize].clone();
            self.apply_array_hash(&arr);
        }

        if !crate::buffer::is_ascii(name.as_bytes(), 0.0) {
            self.flags |= SbFlags::IS_UTF8;
        }

        let id = self.vars.len() as u16;
        self.vars.push(var);
        self.var_names.push(name);
        Ok(id)
    }

    /// `SBFile_addVariableAsStruct`.
    pub fn add_variable_as_struct(
        &mut self,
        name: impl Into<String>,
        offset: u32,
        parent_id: u16,
        struct_id: u16,
        flags: SbVarFlags,
        arrays: Option<Vec<u32>>,
    ) -> Result<u16> {
        let name = name.into();
        if struct_id as usize >= self.structs.len() {
            return Err(OxcError::out_of_bounds("SbFile::add_variable_as_struct structId", struct_id as u64, self.structs.len() as u64));
        }

        let is_packed = self.is_tightly_packed();
        if !is_packed && (offset & 15) != 0 {
            return Err(OxcError::InvalidParameter(
                "struct-typed variable offset needs 16-byte alignment".to_string(),
            ));
        }

        let stride = self.structs[struct_id as usize].stride;
        let mut size: u64 = stride as u64;
        for &dim in arrays.as_deref().unwrap_or(&[]) {
            if dim == 0 {
                return Err(OxcError::InvalidParameter("array dimension is 0".to_string()));
            }
            size = size.saturating_mul(dim as u64);
            if size > u32::MAX as u64 {
                return Err(OxcError::out_of_bounds("SbFile struct array size", size, u32::MAX as u64));
            }
        }

        self.check_parent_bounds(parent_id, offset, size as u32)?;
        self.check_sibling_name_free(parent_id, &name)?;

        let prev_array_count = self.arrays.len();
        let array_id = self.validate_and_resolve_array(arrays)?;
        let array_is_new = array_id as usize >= prev_array_count;

        let var = SbVar {
            struct_id,
            array_index: array_id,
            offset,
            r#type: 0,
            flags: flags.bits(),
            parent_id,
        };

        self.apply_var_hash(&var, &name);
        if array_is_new {
            let arr = self.arrays[array_id as usize].clone();
            self.apply_array_hash(&arr);
        }

        if !crate::buffer::is_ascii(name.as_bytes(), 0.0) {
            self.flags |= SbFlags::IS_UTF8;
        }

        let id = self.vars.len() as u16;
        self.vars.push(var);
        self.var_names.push(name);
        Ok(id)
    }

    /// `SBFile_combine`: merges two backend views of the same layout.
    pub fn combine(a: &SbFile, b: &SbFile) -> Result<SbFile> {
        if a.buffer_size != b.buffer_size
            || (a.flags.bits() & !SbFlags::IS_UTF8.bits()) != (b.flags.bits() & !SbFlags::IS_UTF8.bits())
        {
            return Err(OxcError::InvalidState(
                "SbFile::combine bufferSize or flags mismatch".to_string(),
            ));
        }
        if a.vars.len() != b.vars.len() || a.structs.len() != b.structs.len() {
            return Err(OxcError::InvalidState(
                "SbFile::combine unrelated buffer layouts can't be merged".to_string(),
            ));
        }

        let mut combined = SbFile::new(a.buffer_size, SbFlags(a.flags.bits() | b.flags.bits()));
        combined.structs = a.structs.clone();
        combined.struct_names = a.struct_names.clone();
        combined.vars = a.vars.clone();
        combined.var_names = a.var_names.clone();
        combined.arrays = a.arrays.clone();
        combined.hash = a.hash;

        for bi in 0..b.structs.len() {
            let found = combined
                .structs
                .iter()
                .zip(combined.struct_names.iter())
                .any(|(s, n)| s.stride == b.structs[bi].stride && n == &b.struct_names[bi]);
            if !found {
                return Err(OxcError::InvalidState(
                    "SbFile::combine unrelated buffer layouts can't be combined".to_string(),
                ));
            }
        }

        let mut remap_vars = vec![NO_PARENT; b.vars.len()];

        for i in 0..b.vars.len() {
            let var = &b.vars[i];
            let name = &b.var_names[i];

            let parent = if var.parent_id == NO_PARENT {
                NO_PARENT
            } else {
                remap_vars[var.parent_id as usize]
            };

            let new_id = a
                .vars
                .iter()
                .enumerate()
                .find(|(idx, v)| v.parent_id == parent && a.var_names[*idx] == *name)
                .map(|(idx, _)| idx as u16);

            let new_id = new_id.ok_or_else(|| {
                OxcError::InvalidState("SbFile::combine variable not found, mismatching buffer layout".to_string())
            })?;

            let original = &a.vars[new_id as usize];

            if var.offset != original.offset || var.r#type != original.r#type {
                return Err(OxcError::InvalidState(
                    "SbFile::combine variable has mismatching type or offset".to_string(),
                ));
            }
            if (var.array_index != NO_ARRAY) != (original.array_index != NO_ARRAY) {
                return Err(OxcError::InvalidState(
                    "SbFile::combine variable array presence mismatch".to_string(),
                ));
            }
            if (var.struct_id != NO_STRUCT) != (original.struct_id != NO_STRUCT) {
                return Err(OxcError::InvalidState(
                    "SbFile::combine variable struct presence mismatch".to_string(),
                ));
            }
            if var.struct_id != NO_STRUCT {
                let bs = &b.structs[var.struct_id as usize];
                let as_ = &a.structs[original.struct_id as usize];
                if bs.stride != as_.stride
                    || b.struct_names[var.struct_id as usize] != a.struct_names[original.struct_id as usize]
                {
                    return Err(OxcError::InvalidState(
                        "SbFile::combine variable struct name/stride mismatch".to_string(),
                    ));
                }
            }

            remap_vars[i] = new_id;
            combined.vars[new_id as usize].flags |= var.flags;

            if var.array_index != NO_ARRAY {
                let array_a = &a.arrays[original.array_index as usize];
                let array_b = &b.arrays[var.array_index as usize];

                if array_a.len() == 1 || array_b.len() == 1 {
                    let dims_a: u64 = array_a.iter().map(|&x| x as u64).product();
                    let dims_b: u64 = array_b.iter().map(|&x| x as u64).product();
                    if dims_a != dims_b {
                        return Err(OxcError::InvalidState(
                            "SbFile::combine array flattened size mismatch".to_string(),
                        ));
                    }
                    if array_b.len() != 1 {
                        if combined.arrays.len() + 1 >= u16::MAX as usize {
                            return Err(OxcError::InvalidState(
                                "SbFile::combine combined arrays exceeded 65535".to_string(),
                            ));
                        }
                        combined.vars[new_id as usize].array_index = combined.arrays.len() as u16;
                        combined.arrays.push(array_b.clone());
                    }
                } else {
                    if array_a.len() != array_b.len() || array_a != array_b {
                        return Err(OxcError::InvalidState(
                            "SbFile::combine array dimension mismatch".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(combined)
    }

    /// Encodes the fixed 12-byte header plus body per §6.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if !self.flags.contains(SbFlags::HIDE_MAGIC_NUMBER) {
            out.extend_from_slice(&MAGIC.to_le_bytes());
        }
        out.push(VERSION);
        out.push(self.flags.bits() & 0x1);
        out.extend_from_slice(&(self.arrays.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.structs.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.vars.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.buffer_size.to_le_bytes());

        for arr in &self.arrays {
            out.push(arr.len() as u8);
            for &dim in arr {
                out.extend_from_slice(&dim.to_le_bytes());
            }
        }

        for s in &self.structs {
            out.extend_from_slice(&s.stride.to_le_bytes());
        }
        for name in &self.struct_names {
            write_length_prefixed(&mut out, name.as_bytes());
        }

        for v in &self.vars {
            out.extend_from_slice(&v.struct_id.to_le_bytes());
            out.extend_from_slice(&v.array_index.to_le_bytes());
            out.extend_from_slice(&v.offset.to_le_bytes());
            out.push(v.r#type);
            out.push(v.flags);
            out.extend_from_slice(&v.parent_id.to_le_bytes());
        }
        for name in &self.var_names {
            write_length_prefixed(&mut out, name.as_bytes());
        }

        Ok(out)
    }

    pub fn read(buf: &[u8], expect_magic: bool) -> Result<Self> {
        let mut cursor = buf;
        if expect_magic {
            if cursor.len() < 4 {
                return Err(OxcError::out_of_bounds("SbFile::read magic", 4, cursor.len() as u64));
            }
            let (m, rest) = cursor.split_at(4);
            if u32::from_le_bytes(m.try_into().unwrap()) != MAGIC {
                return Err(OxcError::InvalidParameter("oiSB magic mismatch".to_string()));
            }
            cursor = rest;
        }

        if cursor.len() < 12 {
            return Err(OxcError::out_of_bounds("SbFile::read header", 12, cursor.len() as u64));
        }
        let version = cursor[0];
        if version != VERSION {
            return Err(OxcError::InvalidParameter(format!("unsupported oiSB version {version}")));
        }
        let flags = SbFlags(cursor[1] & 0x1);
        let arrays_count = u16::from_le_bytes([cursor[2], cursor[3]]);
        let structs_count = u16::from_le_bytes([cursor[4], cursor[5]]);
        let vars_count = u16::from_le_bytes([cursor[6], cursor[7]]);
        let buffer_size = u32::from_le_bytes(cursor[8..12].try_into().unwrap());
        cursor = &cursor[12..];

        let mut arrays = Vec::with_capacity(arrays_count as usize);
        for _ in 0..arrays_count {
            if cursor.is_empty() {
                return Err(OxcError::out_of_bounds("SbFile::read array len", 1, 0));
            }
            let len = cursor[0] as usize;
            cursor = &cursor[1..];
            if cursor.len() < len * 4 {
                return Err(OxcError::out_of_bounds("SbFile::read array body", (len * 4) as u64, cursor.len() as u64));
            }
            let mut dims = Vec::with_capacity(len);
            for i in 0..len {
                dims.push(u32::from_le_bytes(cursor[i * 4..i * 4 + 4].try_into().unwrap()));
            }
            cursor = &cursor[len * 4..];
            arrays.push(dims);
        }

        let mut structs = Vec::with_capacity(structs_count as usize);
        for _ in 0..structs_count {
            if cursor.len() < 4 {
                return Err(OxcError::out_of_bounds("SbFile::read struct", 4, cursor.len() as u64));
            }
            structs.push(SbStruct {
                stride: u32::from_le_bytes(cursor[0..4].try_into().unwrap()),
            });
            cursor = &cursor[4..];
        }
        let mut struct_names = Vec::with_capacity(structs_count as usize);
        for _ in 0..structs_count {
            let (s, rest) = read_length_prefixed(cursor)?;
            struct_names.push(s);
            cursor = rest;
        }

        let (vars, rest) = read_vars(cursor, vars_count)?;
        cursor = rest;

        let mut var_names = Vec::with_capacity(vars_count as usize);
        for _ in 0..vars_count {
            let (s, rest) = read_length_prefixed(cursor)?;
            var_names.push(s);
            cursor = rest;
        }

        if !cursor.is_empty() {
            return Err(OxcError::InvalidState("leftover bytes after oiSB vars".to_string()));
        }

        let mut file = SbFile {
            buffer_size,
            flags,
            structs,
            struct_names,
            vars,
            var_names,
            arrays,
            hash: hash::fnv1a64_start(),
        };
        file.recompute_hash();
        Ok(file)
    }

    fn recompute_hash(&mut self) {
        self.hash = hash::fnv1a64_start();
        for i in 0..self.structs.len() {
            let stride = self.structs[i].stride;
            let name = self.struct_names[i].clone();
            self.hash = hash::fnv1a64_single(stride as u64 | ((name.len() as u64) << 32), self.hash);
            self.hash = hash::fnv1a64(name.as_bytes(), self.hash);
        }
        let mut array_hash_done = vec![false; self.arrays.len()];
        for i in 0..self.vars.len() {
            let var = self.vars[i];
            let name = self.var_names[i].clone();
            self.apply_var_hash(&var, &name);
            if var.array_index != NO_ARRAY && !array_hash_done[var.array_index as usize] {
                array_hash_done[var.array_index as usize] = true;
                let arr = self.arrays[var.array_index as usize].clone();
                self.apply_array_hash(&arr);
            }
        }
    }
}

impl std::fmt::Display for SbFile {
    /// `SBFile_print`-style diagnostic dump: one line per struct and
    /// variable. Not part of the wire format; `combine` calls this (via
    /// callers catching its `Err`) to let a human see why two layouts
    /// didn't line up.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SBFile(bufferSize={}, hash={:#018x})", self.buffer_size, self.hash)?;
        for (i, (s, name)) in self.structs.iter().zip(self.struct_names.iter()).enumerate() {
            writeln!(f, "  struct[{i}] {name} (stride={})", s.stride)?;
        }
        for (i, (v, name)) in self.vars.iter().zip(self.var_names.iter()).enumerate() {
            if v.is_struct() {
                writeln!(
                    f,
                    "  var[{i}] {name}: struct#{} @ offset {} (parent={})",
                    v.struct_id, v.offset, v.parent_id
                )?;
            } else {
                writeln!(
                    f,
                    "  var[{i}] {name}: type={:#04x} @ offset {} (parent={})",
                    v.r#type, v.offset, v.parent_id
                )?;
            }
        }
        Ok(())
    }
}

fn write_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_length_prefixed(buf: &[u8]) -> Result<(String, &[u8])> {
    if buf.len() < 4 {
        return Err(OxcError::out_of_bounds("SbFile::read name length", 4, buf.len() as u64));
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(OxcError::out_of_bounds("SbFile::read name body", len as u64, rest.len() as u64));
    }
    let (body, tail) = rest.split_at(len);
    let s = std::str::from_utf8(body)
        .map_err(|_| OxcError::InvalidParameter("oiSB name is not valid UTF-8".to_string()))?
        .to_string();
    Ok((s, tail))
}

fn read_vars(buf: &[u8], count: u16) -> Result<(Vec<SbVar>, &[u8])> {
    let mut cursor = buf;
    let mut vars = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor.len() < 12 {
            return Err(OxcError::out_of_bounds("SbFile::read var", 12, cursor.len() as u64));
        }
        vars.push(SbVar {
            struct_id: u16::from_le_bytes([cursor[0], cursor[1]]),
            array_index: u16::from_le_bytes([cursor[2], cursor[3]]),
            offset: u32::from_le_bytes(cursor[4..8].try_into().unwrap()),
            r#type: cursor[8],
            flags: cursor[9],
            parent_id: u16::from_le_bytes([cursor[10], cursor[11]]),
        });
        cursor = &cursor[12..];
    }
    Ok((vars, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_two_floats_round_trip_with_stable_hash() {
        let mut sb = SbFile::new(16, SbFlags::IS_TIGHTLY_PACKED);
        let s_id = sb.add_struct("S", 16).unwrap();
        let v_id = sb
            .add_variable_as_struct("v", 0, NO_PARENT, s_id, SbVarFlags::empty(), None)
            .unwrap();
        let f32_type = SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap();
        sb.add_variable("a", 0, v_id, f32_type, SbVarFlags::empty(), None).unwrap();
        sb.add_variable("b", 4, v_id, f32_type, SbVarFlags::empty(), None).unwrap();

        let hash_before = sb.hash;
        let encoded = sb.write().unwrap();
        let decoded = SbFile::read(&encoded, true).unwrap();

        assert_eq!(decoded.vars.len(), 3);
        assert_eq!(decoded.hash, hash_before);
    }

    #[test]
    fn arrayed_variable_hash_is_stable_across_round_trip() {
        let mut sb = SbFile::new(64, SbFlags::IS_TIGHTLY_PACKED);
        let f32_type = SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap();
        sb.add_variable("arr", 0, NO_PARENT, f32_type, SbVarFlags::empty(), Some(vec![4]))
            .unwrap();

        let hash_before = sb.hash;
        let encoded = sb.write().unwrap();
        let decoded = SbFile::read(&encoded, true).unwrap();

        assert_eq!(decoded.hash, hash_before);
    }

    #[test]
    fn tightly_packed_boundary_offset_is_accepted_and_overflow_rejected() {
        let mut sb = SbFile::new(16, SbFlags::IS_TIGHTLY_PACKED);
        let f32_type = SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap();
        assert!(sb.add_variable("ok", 12, NO_PARENT, f32_type, SbVarFlags::empty(), None).is_ok());

        let mut sb2 = SbFile::new(16, SbFlags::IS_TIGHTLY_PACKED);
        assert!(sb2
            .add_variable("ok", 13, NO_PARENT, f32_type, SbVarFlags::empty(), None)
            .is_err());
    }

    #[test]
    fn non_tight_f32x3_boundary_cases() {
        let f32x3 = SbType::new(SbPrimitive::Float, 2, 3, 1).unwrap();

        let mut sb_ok_12 = SbFile::new(32, SbFlags::empty());
        assert!(sb_ok_12.add_variable("a", 12, NO_PARENT, f32x3, SbVarFlags::empty(), None).is_ok());

        let mut sb_ok_16 = SbFile::new(32, SbFlags::empty());
        assert!(sb_ok_16.add_variable("a", 16, NO_PARENT, f32x3, SbVarFlags::empty(), None).is_ok());

        let mut sb_bad_13 = SbFile::new(32, SbFlags::empty());
        assert!(sb_bad_13.add_variable("a", 13, NO_PARENT, f32x3, SbVarFlags::empty(), None).is_err());
    }

    #[test]
    fn s3_combine_merges_used_flags_and_unflattens_array() {
        let mut a = SbFile::new(64, SbFlags::empty());
        a.add_variable(
            "v",
            0,
            NO_PARENT,
            SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap(),
            SbVarFlags::USED_SPIRV,
            Some(vec![3, 3]),
        )
        .unwrap();

        let mut b = SbFile::new(64, SbFlags::empty());
        b.add_variable(
            "v",
            0,
            NO_PARENT,
            SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap(),
            SbVarFlags::USED_DXIL,
            Some(vec![9]),
        )
        .unwrap();

        let combined = SbFile::combine(&a, &b).unwrap();
        assert_eq!(combined.vars.len(), 1);
        let merged_flags = SbVarFlags(combined.vars[0].flags);
        assert!(merged_flags.contains(SbVarFlags::USED_SPIRV));
        assert!(merged_flags.contains(SbVarFlags::USED_DXIL));
        assert_eq!(combined.arrays[combined.vars[0].array_index as usize], vec![3, 3]);
    }

    #[test]
    fn combine_is_commutative_up_to_flag_or() {
        let mut a = SbFile::new(32, SbFlags::empty());
        a.add_variable(
            "v",
            0,
            NO_PARENT,
            SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap(),
            SbVarFlags::USED_SPIRV,
            None,
        )
        .unwrap();

        let mut b = SbFile::new(32, SbFlags::empty());
        b.add_variable(
            "v",
            0,
            NO_PARENT,
            SbType::new(SbPrimitive::Float, 2, 1, 1).unwrap(),
            SbVarFlags::USED_DXIL,
            None,
        )
        .unwrap();

        let ab = SbFile::combine(&a, &b).unwrap();
        let ba = SbFile::combine(&b, &a).unwrap();

        assert_eq!(ab.write().unwrap(), ba.write().unwrap());
    }

    #[test]
    fn display_impl_lists_structs_and_vars() {
        let mut sb = SbFile::new(16, SbFlags::IS_TIGHTLY_PACKED);
        let s_id = sb.add_struct("S", 16).unwrap();
        sb.add_variable_as_struct("v", 0, NO_PARENT, s_id, SbVarFlags::empty(), None).unwrap();
        let printed = sb.to_string();
        assert!(printed.contains("struct[0] S"));
        assert!(printed.contains("var[0] v"));
    }
}
