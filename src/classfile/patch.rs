//! In-place class-file editing.
//!
//! The editor parses the constant pool into a model and walks the rest of the
//! file once, recording the byte offsets of every index that may need to
//! change. Existing pool entries keep their indices; renamed strings are
//! appended and the referring sites repointed. Attribute bodies and bytecode
//! therefore keep their length and layout, which makes whole-class remapping
//! a pool rewrite plus a set of two-byte body patches.

use std::ops::Range;

use crate::classfile::{
    ConstantPool, CpEntry, Cursor, MAGIC, OPCODE_INVOKESPECIAL, OPCODE_INVOKEVIRTUAL,
    REF_INVOKE_SPECIAL, REF_INVOKE_VIRTUAL,
};
use crate::error::{Error, Result};

/// Kind of a declared member site.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum MemberKind {
    Field,
    Method,
    RecordComponent,
}

/// Declared member with the body offsets of its patchable indices.
#[derive(Clone, Debug)]
pub(crate) struct MemberSite {
    pub(crate) kind: MemberKind,
    pub(crate) access: u16,
    pub(crate) name: String,
    pub(crate) desc: String,
    access_offset: Option<usize>,
    name_offset: usize,
    desc_offset: usize,
}

/// Field, method, or interface-method reference in the pool.
#[derive(Clone, Debug)]
pub(crate) struct RefInfo {
    pub(crate) index: u16,
    pub(crate) is_field: bool,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) desc: String,
}

/// Invoke-dynamic callsite entry.
#[derive(Clone, Debug)]
pub(crate) struct IndyInfo {
    pub(crate) index: u16,
    pub(crate) bootstrap: u16,
    pub(crate) name: String,
    pub(crate) desc: String,
}

/// Resolved method handle.
#[derive(Clone, Debug)]
pub(crate) struct HandleInfo {
    pub(crate) index: u16,
    pub(crate) kind: u8,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) desc: String,
}

/// `invokespecial` site inside a method body.
#[derive(Clone, Debug)]
pub(crate) struct InvokeSpecialSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) desc: String,
    opcode_offset: usize,
}

#[derive(Clone, Debug)]
struct InnerEntry {
    inner_class: u16,
    name_offset: Option<usize>,
    access_offset: usize,
}

#[derive(Clone, Debug)]
struct ClassAttr {
    name: String,
    range: Range<usize>,
}

/// Parsed class file with recorded patch sites.
pub struct ClassEditor {
    minor: u16,
    major: u16,
    pool: ConstantPool,
    body: Vec<u8>,
    this_class: u16,
    u16_patches: Vec<(usize, u16)>,
    u8_patches: Vec<(usize, u8)>,
    removed_attrs: Vec<Range<usize>>,
    members: Vec<MemberSite>,
    signature_sites: Vec<usize>,
    annotation_type_sites: Vec<usize>,
    enum_const_sites: Vec<(usize, usize)>,
    lvt_desc_sites: Vec<usize>,
    lvtt_sig_sites: Vec<usize>,
    inner_entries: Vec<InnerEntry>,
    enclosing_method: Option<(usize, u16, u16)>,
    class_attrs: Vec<ClassAttr>,
    class_attr_count_offset: usize,
    class_attr_count: u16,
    invokespecial_sites: Vec<(usize, u16)>,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
}

impl ClassEditor {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        if cursor.u32()? != MAGIC {
            return Err(Error::ClassFile("bad magic".to_string()));
        }
        let minor = cursor.u16()?;
        let major = cursor.u16()?;
        let pool = ConstantPool::parse(&mut cursor)?;
        let body = cursor.remaining().to_vec();

        let mut editor = ClassEditor {
            minor,
            major,
            pool,
            body,
            this_class: 0,
            u16_patches: Vec::new(),
            u8_patches: Vec::new(),
            removed_attrs: Vec::new(),
            members: Vec::new(),
            signature_sites: Vec::new(),
            annotation_type_sites: Vec::new(),
            enum_const_sites: Vec::new(),
            lvt_desc_sites: Vec::new(),
            lvtt_sig_sites: Vec::new(),
            inner_entries: Vec::new(),
            enclosing_method: None,
            class_attrs: Vec::new(),
            class_attr_count_offset: 0,
            class_attr_count: 0,
            invokespecial_sites: Vec::new(),
            bootstrap_methods: Vec::new(),
        };
        editor.index_body()?;
        Ok(editor)
    }

    fn index_body(&mut self) -> Result<()> {
        let body = self.body.clone();
        let mut cursor = Cursor::new(&body);
        cursor.skip(2)?;
        self.this_class = cursor.u16()?;
        cursor.skip(2)?;
        let interface_count = cursor.u16()? as usize;
        cursor.skip(interface_count * 2)?;

        for pass in 0..2 {
            let count = cursor.u16()? as usize;
            for _ in 0..count {
                let access_offset = cursor.pos();
                let access = cursor.u16()?;
                let name_offset = cursor.pos();
                let name = self.pool.utf8(cursor.u16()?)?.into_owned();
                let desc_offset = cursor.pos();
                let desc = self.pool.utf8(cursor.u16()?)?.into_owned();
                self.members.push(MemberSite {
                    kind: if pass == 0 {
                        MemberKind::Field
                    } else {
                        MemberKind::Method
                    },
                    access,
                    name,
                    desc,
                    access_offset: Some(access_offset),
                    name_offset,
                    desc_offset,
                });
                self.walk_attributes(&mut cursor)?;
            }
        }

        self.class_attr_count_offset = cursor.pos();
        self.class_attr_count = cursor.u16()?;
        for _ in 0..self.class_attr_count {
            let start = cursor.pos();
            let name = self.pool.utf8(cursor.u16()?)?.into_owned();
            let len = cursor.u32()? as usize;
            let body_start = cursor.pos();
            self.walk_attribute_body(&name, &mut Cursor::new(cursor.bytes(len)?), body_start)?;
            self.class_attrs.push(ClassAttr {
                name,
                range: start..cursor.pos(),
            });
        }
        Ok(())
    }

    fn walk_attributes(&mut self, cursor: &mut Cursor<'_>) -> Result<()> {
        let count = cursor.u16()? as usize;
        for _ in 0..count {
            let name = self.pool.utf8(cursor.u16()?)?.into_owned();
            let len = cursor.u32()? as usize;
            let body_start = cursor.pos();
            self.walk_attribute_body(&name, &mut Cursor::new(cursor.bytes(len)?), body_start)?;
        }
        Ok(())
    }

    /// `base` is the offset of the attribute body within the class body;
    /// `cursor` positions are relative to it.
    fn walk_attribute_body(
        &mut self,
        name: &str,
        cursor: &mut Cursor<'_>,
        base: usize,
    ) -> Result<()> {
        match name {
            "Signature" => self.signature_sites.push(base),
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    self.walk_annotation(cursor, base)?;
                }
            }
            "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
                let params = cursor.u8()? as usize;
                for _ in 0..params {
                    let count = cursor.u16()? as usize;
                    for _ in 0..count {
                        self.walk_annotation(cursor, base)?;
                    }
                }
            }
            "AnnotationDefault" => {
                self.walk_element_value(cursor, base)?;
            }
            "LocalVariableTable" => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    cursor.skip(6)?;
                    self.lvt_desc_sites.push(base + cursor.pos());
                    cursor.skip(4)?;
                }
            }
            "LocalVariableTypeTable" => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    cursor.skip(6)?;
                    self.lvtt_sig_sites.push(base + cursor.pos());
                    cursor.skip(4)?;
                }
            }
            "InnerClasses" => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    let inner_class = cursor.u16()?;
                    cursor.skip(2)?;
                    let name_offset = base + cursor.pos();
                    let inner_name = cursor.u16()?;
                    let access_offset = base + cursor.pos();
                    cursor.skip(2)?;
                    self.inner_entries.push(InnerEntry {
                        inner_class,
                        name_offset: (inner_name != 0).then_some(name_offset),
                        access_offset,
                    });
                }
            }
            "EnclosingMethod" => {
                let class = cursor.u16()?;
                let nat_offset = base + cursor.pos();
                let nat = cursor.u16()?;
                if nat != 0 {
                    self.enclosing_method = Some((nat_offset, nat, class));
                }
            }
            "Record" => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    let name_offset = base + cursor.pos();
                    let name = self.pool.utf8(cursor.u16()?)?.into_owned();
                    let desc_offset = base + cursor.pos();
                    let desc = self.pool.utf8(cursor.u16()?)?.into_owned();
                    self.members.push(MemberSite {
                        kind: MemberKind::RecordComponent,
                        access: 0,
                        name,
                        desc,
                        access_offset: None,
                        name_offset,
                        desc_offset,
                    });
                    self.walk_nested_attributes(cursor, base)?;
                }
            }
            "Code" => {
                cursor.skip(4)?;
                let code_len = cursor.u32()? as usize;
                let code_base = base + cursor.pos();
                let code = cursor.bytes(code_len)?;
                self.walk_bytecode(code, code_base)?;
                let exception_count = cursor.u16()? as usize;
                cursor.skip(exception_count * 8)?;
                self.walk_nested_attributes(cursor, base)?;
            }
            "BootstrapMethods" => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    let handle = cursor.u16()?;
                    let arg_count = cursor.u16()? as usize;
                    let mut args = Vec::with_capacity(arg_count);
                    for _ in 0..arg_count {
                        args.push(cursor.u16()?);
                    }
                    self.bootstrap_methods.push((handle, args));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn walk_nested_attributes(&mut self, cursor: &mut Cursor<'_>, base: usize) -> Result<()> {
        let count = cursor.u16()? as usize;
        for _ in 0..count {
            let name = self.pool.utf8(cursor.u16()?)?.into_owned();
            let len = cursor.u32()? as usize;
            let body_start = base + cursor.pos();
            self.walk_attribute_body(&name, &mut Cursor::new(cursor.bytes(len)?), body_start)?;
        }
        Ok(())
    }

    fn walk_annotation(&mut self, cursor: &mut Cursor<'_>, base: usize) -> Result<()> {
        self.annotation_type_sites.push(base + cursor.pos());
        cursor.skip(2)?;
        let pairs = cursor.u16()? as usize;
        for _ in 0..pairs {
            cursor.skip(2)?;
            self.walk_element_value(cursor, base)?;
        }
        Ok(())
    }

    fn walk_element_value(&mut self, cursor: &mut Cursor<'_>, base: usize) -> Result<()> {
        let tag = cursor.u8()?;
        match tag {
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => cursor.skip(2)?,
            b'e' => {
                let type_offset = base + cursor.pos();
                cursor.skip(2)?;
                let name_offset = base + cursor.pos();
                cursor.skip(2)?;
                self.enum_const_sites.push((type_offset, name_offset));
            }
            b'c' => {
                self.annotation_type_sites.push(base + cursor.pos());
                cursor.skip(2)?;
            }
            b'@' => self.walk_annotation(cursor, base)?,
            b'[' => {
                let count = cursor.u16()? as usize;
                for _ in 0..count {
                    self.walk_element_value(cursor, base)?;
                }
            }
            _ => {
                return Err(Error::ClassFile(format!(
                    "unknown element value tag {tag:#x}"
                )))
            }
        }
        Ok(())
    }

    fn walk_bytecode(&mut self, code: &[u8], code_base: usize) -> Result<()> {
        let mut offset = 0usize;
        while offset < code.len() {
            let opcode = code[offset];
            let length = opcode_length(code, offset)?;
            if length == 0 || offset + length > code.len() {
                return Err(Error::ClassFile(format!(
                    "invalid bytecode length at offset {offset}"
                )));
            }
            if opcode == OPCODE_INVOKESPECIAL {
                let index = u16::from_be_bytes([code[offset + 1], code[offset + 2]]);
                self.invokespecial_sites.push((code_base + offset, index));
            }
            offset += length;
        }
        Ok(())
    }

    fn body_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.body[offset], self.body[offset + 1]])
    }

    fn utf8_at(&self, offset: usize) -> Result<String> {
        Ok(self.pool.utf8(self.body_u16(offset))?.into_owned())
    }

    fn patch_utf8(&mut self, offset: usize, value: &str) -> Result<()> {
        let index = self.pool.intern_utf8(value)?;
        self.u16_patches.push((offset, index));
        Ok(())
    }

    // --- header ---

    pub fn class_name(&self) -> Result<String> {
        Ok(self.pool.class_name(self.this_class)?.into_owned())
    }

    pub(crate) fn class_access(&self) -> u16 {
        self.body_u16(0)
    }

    pub(crate) fn set_class_access(&mut self, access: u16) {
        self.u16_patches.push((0, access));
    }

    // --- pool-level sites ---

    pub(crate) fn class_entries(&self) -> Vec<(u16, String)> {
        let mut entries = Vec::new();
        for index in 1..self.pool.len() as u16 {
            if let Ok(CpEntry::Class { name }) = self.pool.entry(index) {
                if let Ok(name) = self.pool.utf8(*name) {
                    entries.push((index, name.into_owned()));
                }
            }
        }
        entries
    }

    pub(crate) fn set_class_entry_name(&mut self, index: u16, new_name: &str) -> Result<()> {
        let utf8 = self.pool.intern_utf8(new_name)?;
        if let CpEntry::Class { name } = self.pool.entry_mut(index)? {
            *name = utf8;
        }
        Ok(())
    }

    pub(crate) fn ref_entries(&self) -> Result<Vec<RefInfo>> {
        let mut refs = Vec::new();
        for index in 1..self.pool.len() as u16 {
            let (is_field, class, name_and_type) = match self.pool.entry(index)? {
                CpEntry::FieldRef {
                    class,
                    name_and_type,
                } => (true, *class, *name_and_type),
                CpEntry::MethodRef {
                    class,
                    name_and_type,
                }
                | CpEntry::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => (false, *class, *name_and_type),
                _ => continue,
            };
            let owner = self.pool.class_name(class)?.into_owned();
            let (name, desc) = self.pool.name_and_type(name_and_type)?;
            refs.push(RefInfo {
                index,
                is_field,
                owner,
                name,
                desc,
            });
        }
        Ok(refs)
    }

    pub(crate) fn set_ref_name_and_type(&mut self, index: u16, name: &str, desc: &str) -> Result<()> {
        let nat = self.pool.intern_name_and_type(name, desc)?;
        match self.pool.entry_mut(index)? {
            CpEntry::FieldRef { name_and_type, .. }
            | CpEntry::MethodRef { name_and_type, .. }
            | CpEntry::InterfaceMethodRef { name_and_type, .. } => *name_and_type = nat,
            other => {
                return Err(Error::ClassFile(format!(
                    "expected member reference at index {index}, found {other:?}"
                )))
            }
        }
        Ok(())
    }

    pub(crate) fn invoke_dynamic_entries(&self) -> Result<Vec<IndyInfo>> {
        let mut entries = Vec::new();
        for index in 1..self.pool.len() as u16 {
            if let CpEntry::InvokeDynamic {
                bootstrap,
                name_and_type,
            } = self.pool.entry(index)?
            {
                let (name, desc) = self.pool.name_and_type(*name_and_type)?;
                entries.push(IndyInfo {
                    index,
                    bootstrap: *bootstrap,
                    name,
                    desc,
                });
            }
        }
        Ok(entries)
    }

    pub(crate) fn set_invoke_dynamic(&mut self, index: u16, name: &str, desc: &str) -> Result<()> {
        let nat = self.pool.intern_name_and_type(name, desc)?;
        if let CpEntry::InvokeDynamic { name_and_type, .. } = self.pool.entry_mut(index)? {
            *name_and_type = nat;
        }
        Ok(())
    }

    /// Constant-dynamic entries; their names are not member names, so only
    /// descriptors are remapped.
    pub(crate) fn dynamic_entries(&self) -> Result<Vec<IndyInfo>> {
        let mut entries = Vec::new();
        for index in 1..self.pool.len() as u16 {
            if let CpEntry::Dynamic {
                bootstrap,
                name_and_type,
            } = self.pool.entry(index)?
            {
                let (name, desc) = self.pool.name_and_type(*name_and_type)?;
                entries.push(IndyInfo {
                    index,
                    bootstrap: *bootstrap,
                    name,
                    desc,
                });
            }
        }
        Ok(entries)
    }

    pub(crate) fn set_dynamic(&mut self, index: u16, name: &str, desc: &str) -> Result<()> {
        let nat = self.pool.intern_name_and_type(name, desc)?;
        if let CpEntry::Dynamic { name_and_type, .. } = self.pool.entry_mut(index)? {
            *name_and_type = nat;
        }
        Ok(())
    }

    pub(crate) fn method_type_entries(&self) -> Result<Vec<(u16, String)>> {
        let mut entries = Vec::new();
        for index in 1..self.pool.len() as u16 {
            if let CpEntry::MethodType { desc } = self.pool.entry(index)? {
                entries.push((index, self.pool.utf8(*desc)?.into_owned()));
            }
        }
        Ok(entries)
    }

    pub(crate) fn set_method_type(&mut self, index: u16, desc: &str) -> Result<()> {
        let utf8 = self.pool.intern_utf8(desc)?;
        if let CpEntry::MethodType { desc } = self.pool.entry_mut(index)? {
            *desc = utf8;
        }
        Ok(())
    }

    /// The bootstrap handle of bootstrap method `bootstrap_index`.
    pub(crate) fn bootstrap_handle(&self, bootstrap_index: u16) -> Result<Option<HandleInfo>> {
        let Some((handle, _)) = self.bootstrap_methods.get(bootstrap_index as usize) else {
            return Ok(None);
        };
        self.resolve_handle(*handle)
    }

    fn resolve_handle(&self, index: u16) -> Result<Option<HandleInfo>> {
        let CpEntry::MethodHandle { kind, reference } = self.pool.entry(index)? else {
            return Ok(None);
        };
        let (owner, name, desc) = match self.pool.entry(*reference)? {
            CpEntry::FieldRef {
                class,
                name_and_type,
            }
            | CpEntry::MethodRef {
                class,
                name_and_type,
            }
            | CpEntry::InterfaceMethodRef {
                class,
                name_and_type,
            } => {
                let owner = self.pool.class_name(*class)?.into_owned();
                let (name, desc) = self.pool.name_and_type(*name_and_type)?;
                (owner, name, desc)
            }
            _ => return Ok(None),
        };
        Ok(Some(HandleInfo {
            index,
            kind: *kind,
            owner,
            name,
            desc,
        }))
    }

    /// First `MethodType` argument of bootstrap method `bootstrap_index`,
    /// i.e. the erased descriptor of a lambda body.
    pub(crate) fn bootstrap_method_type_arg(&self, bootstrap_index: u16) -> Result<Option<String>> {
        let Some((_, args)) = self.bootstrap_methods.get(bootstrap_index as usize) else {
            return Ok(None);
        };
        for arg in args {
            if let CpEntry::MethodType { desc } = self.pool.entry(*arg)? {
                return Ok(Some(self.pool.utf8(*desc)?.into_owned()));
            }
        }
        Ok(None)
    }

    /// Every method handle appearing as a bootstrap-method argument.
    pub(crate) fn bootstrap_arg_handles(&self) -> Result<Vec<HandleInfo>> {
        let mut handles = Vec::new();
        for (_, args) in &self.bootstrap_methods {
            for arg in args {
                if let Some(handle) = self.resolve_handle(*arg)? {
                    handles.push(handle);
                }
            }
        }
        Ok(handles)
    }

    pub(crate) fn promote_handle(&mut self, index: u16) -> Result<()> {
        if let CpEntry::MethodHandle { kind, .. } = self.pool.entry_mut(index)? {
            if *kind == REF_INVOKE_SPECIAL {
                *kind = REF_INVOKE_VIRTUAL;
            }
        }
        Ok(())
    }

    // --- body-level sites ---

    pub(crate) fn members(&self) -> Vec<MemberSite> {
        self.members.clone()
    }

    pub(crate) fn set_member_name(&mut self, member: &MemberSite, name: &str) -> Result<()> {
        self.patch_utf8(member.name_offset, name)
    }

    pub(crate) fn set_member_desc(&mut self, member: &MemberSite, desc: &str) -> Result<()> {
        self.patch_utf8(member.desc_offset, desc)
    }

    pub(crate) fn set_member_access(&mut self, member: &MemberSite, access: u16) -> Result<()> {
        let offset = member.access_offset.ok_or_else(|| {
            Error::ClassFile("record components carry no access flags".to_string())
        })?;
        self.u16_patches.push((offset, access));
        Ok(())
    }

    pub(crate) fn signatures(&self) -> Result<Vec<(usize, String)>> {
        self.resolve_sites(&self.signature_sites)
    }

    pub(crate) fn annotation_types(&self) -> Result<Vec<(usize, String)>> {
        self.resolve_sites(&self.annotation_type_sites)
    }

    pub(crate) fn lvt_descs(&self) -> Result<Vec<(usize, String)>> {
        self.resolve_sites(&self.lvt_desc_sites)
    }

    pub(crate) fn lvtt_signatures(&self) -> Result<Vec<(usize, String)>> {
        self.resolve_sites(&self.lvtt_sig_sites)
    }

    fn resolve_sites(&self, sites: &[usize]) -> Result<Vec<(usize, String)>> {
        sites
            .iter()
            .map(|&offset| Ok((offset, self.utf8_at(offset)?)))
            .collect()
    }

    pub(crate) fn set_site(&mut self, offset: usize, value: &str) -> Result<()> {
        self.patch_utf8(offset, value)
    }

    /// `(type_descriptor, constant_name)` pairs of enum element values.
    pub(crate) fn enum_consts(&self) -> Result<Vec<(usize, usize, String, String)>> {
        self.enum_const_sites
            .iter()
            .map(|&(type_offset, name_offset)| {
                Ok((
                    type_offset,
                    name_offset,
                    self.utf8_at(type_offset)?,
                    self.utf8_at(name_offset)?,
                ))
            })
            .collect()
    }

    /// `(entry_id, inner_class_name, simple_name, access)` of inner-class
    /// table entries; `simple_name` is `None` for anonymous classes.
    pub(crate) fn inner_classes(&self) -> Result<Vec<(usize, String, Option<String>, u16)>> {
        self.inner_entries
            .iter()
            .enumerate()
            .map(|(id, entry)| {
                let name = self.pool.class_name(entry.inner_class)?.into_owned();
                let simple = match entry.name_offset {
                    Some(offset) => Some(self.utf8_at(offset)?),
                    None => None,
                };
                Ok((id, name, simple, self.body_u16(entry.access_offset)))
            })
            .collect()
    }

    pub(crate) fn set_inner_simple_name(&mut self, entry_id: usize, name: &str) -> Result<()> {
        if let Some(offset) = self.inner_entries[entry_id].name_offset {
            self.patch_utf8(offset, name)?;
        }
        Ok(())
    }

    pub(crate) fn set_inner_access(&mut self, entry_id: usize, access: u16) {
        let offset = self.inner_entries[entry_id].access_offset;
        self.u16_patches.push((offset, access));
    }

    /// `(owner, name, desc)` of the enclosing method, when recorded.
    pub(crate) fn enclosing_method(&self) -> Result<Option<(String, String, String)>> {
        match self.enclosing_method {
            Some((_, nat, class)) => {
                let owner = self.pool.class_name(class)?.into_owned();
                let (name, desc) = self.pool.name_and_type(nat)?;
                Ok(Some((owner, name, desc)))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn set_enclosing_method(&mut self, name: &str, desc: &str) -> Result<()> {
        if let Some((offset, _, _)) = self.enclosing_method {
            let nat = self.pool.intern_name_and_type(name, desc)?;
            self.u16_patches.push((offset, nat));
        }
        Ok(())
    }

    pub(crate) fn invokespecial_sites(&self) -> Result<Vec<InvokeSpecialSite>> {
        self.invokespecial_sites
            .iter()
            .map(|&(opcode_offset, index)| {
                let entry = self.pool.entry(index)?;
                let (class, name_and_type) = match entry {
                    CpEntry::MethodRef {
                        class,
                        name_and_type,
                    }
                    | CpEntry::InterfaceMethodRef {
                        class,
                        name_and_type,
                    } => (*class, *name_and_type),
                    other => {
                        return Err(Error::ClassFile(format!(
                            "invokespecial target is {other:?}"
                        )))
                    }
                };
                let owner = self.pool.class_name(class)?.into_owned();
                let (name, desc) = self.pool.name_and_type(name_and_type)?;
                Ok(InvokeSpecialSite {
                    owner,
                    name,
                    desc,
                    opcode_offset,
                })
            })
            .collect()
    }

    pub(crate) fn promote_invokespecial(&mut self, site: &InvokeSpecialSite) {
        self.u8_patches.push((site.opcode_offset, OPCODE_INVOKEVIRTUAL));
    }

    /// Drop every class-level attribute called `name`.
    pub(crate) fn remove_class_attributes(&mut self, name: &str) {
        for attr in &self.class_attrs {
            if attr.name == name {
                self.removed_attrs.push(attr.range.clone());
            }
        }
    }

    // --- output ---

    pub fn finish(mut self) -> Vec<u8> {
        let mut body = std::mem::take(&mut self.body);
        for (offset, value) in &self.u16_patches {
            body[*offset..*offset + 2].copy_from_slice(&value.to_be_bytes());
        }
        for (offset, value) in &self.u8_patches {
            body[*offset] = *value;
        }
        if !self.removed_attrs.is_empty() {
            let new_count = self.class_attr_count - self.removed_attrs.len() as u16;
            body[self.class_attr_count_offset..self.class_attr_count_offset + 2]
                .copy_from_slice(&new_count.to_be_bytes());
            let mut ranges = std::mem::take(&mut self.removed_attrs);
            ranges.sort_by_key(|range| range.start);
            let mut spliced = Vec::with_capacity(body.len());
            let mut cursor = 0usize;
            for range in ranges {
                spliced.extend_from_slice(&body[cursor..range.start]);
                cursor = range.end;
            }
            spliced.extend_from_slice(&body[cursor..]);
            body = spliced;
        }

        let mut out = Vec::with_capacity(body.len() + 1024);
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.minor.to_be_bytes());
        out.extend_from_slice(&self.major.to_be_bytes());
        self.pool.write(&mut out);
        out.extend_from_slice(&body);
        out
    }
}

/// Length of the instruction at `offset`, including operands.
fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x56 => 1,
        0x57..=0x5f => 1,
        0x60..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        0xa7 | 0xa8 => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        0xb6..=0xb8 => 3,
        0xb9 | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => {
            return Err(Error::ClassFile(format!(
                "unsupported opcode 0x{opcode:02x}"
            )))
        }
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = switch_padding(offset);
    let base = offset + 1 + padding;
    let low = read_u32(code, base + 4)?;
    let high = read_u32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|value| value.checked_add(1))
        .ok_or_else(|| Error::ClassFile("invalid tableswitch range".to_string()))?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = switch_padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_u32(code, base + 4)?;
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .ok_or_else(|| Error::ClassFile("missing wide opcode".to_string()))?;
    if opcode == 0x84 {
        Ok(6)
    } else {
        Ok(4)
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let slice = code
        .get(offset..offset + 4)
        .ok_or_else(|| Error::ClassFile("bytecode u32 out of bounds".to_string()))?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::info::ClassInfo;
    use crate::classfile::testutil::{high, low, ClassFileBuilder};

    fn sample_class() -> Vec<u8> {
        let mut builder = ClassFileBuilder::new("a", "java/lang/Object");
        let object_init = builder.add_method_ref("java/lang/Object", "<init>", "()V");
        builder.add_field(0x0002, "b", "Ld;");
        let init_code = vec![0x2a, 0xb7, high(object_init), low(object_init), 0xb1];
        builder.add_method(0x0001, "<init>", "()V", init_code);
        builder.add_method(0x0002, "c", "()Le;", vec![0xb1]);
        builder.finish()
    }

    #[test]
    fn parse_finish_round_trips_untouched_classes() {
        let data = sample_class();
        let editor = ClassEditor::parse(&data).expect("parse");
        assert_eq!(editor.finish(), data);
    }

    #[test]
    fn member_sites_are_recorded() {
        let data = sample_class();
        let editor = ClassEditor::parse(&data).expect("parse");
        let members = editor.members();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].kind, MemberKind::Field);
        assert_eq!(members[0].name, "b");
        assert_eq!(members[2].desc, "()Le;");
    }

    #[test]
    fn renames_survive_reparse() {
        let data = sample_class();
        let mut editor = ClassEditor::parse(&data).expect("parse");
        for (index, name) in editor.class_entries() {
            if name == "a" {
                editor.set_class_entry_name(index, "Main").expect("rename");
            }
        }
        let members = editor.members();
        editor.set_member_name(&members[0], "state").expect("field");
        editor.set_member_desc(&members[0], "LSomeState;").expect("desc");
        let out = editor.finish();

        let info = ClassInfo::parse(&out).expect("reparse");
        assert_eq!(info.name, "Main");
        assert_eq!(info.fields[0].name, "state");
        assert_eq!(info.fields[0].desc, "LSomeState;");
        assert_eq!(info.methods[0].name, "<init>");
    }

    #[test]
    fn invokespecial_sites_resolve_and_promote() {
        let data = sample_class();
        let mut editor = ClassEditor::parse(&data).expect("parse");
        let sites = editor.invokespecial_sites().expect("sites");
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].owner, "java/lang/Object");
        assert_eq!(sites[0].name, "<init>");
        editor.promote_invokespecial(&sites[0]);
        let out = editor.finish();
        let reparsed = ClassEditor::parse(&out).expect("reparse");
        assert!(reparsed.invokespecial_sites().expect("sites").is_empty());
    }

    #[test]
    fn removing_class_attributes_splices_the_tail() {
        let mut builder = ClassFileBuilder::new("sealed", "java/lang/Object");
        builder.add_permitted_subclass("child");
        let data = builder.finish();
        let mut editor = ClassEditor::parse(&data).expect("parse");
        editor.remove_class_attributes("PermittedSubclasses");
        let out = editor.finish();
        let reparsed = ClassEditor::parse(&out).expect("reparse");
        assert!(reparsed
            .class_attrs
            .iter()
            .all(|attr| attr.name != "PermittedSubclasses"));
        assert!(ClassInfo::parse(&out).is_ok());
    }

    #[test]
    fn bootstrap_tables_resolve_handles_and_method_types() {
        let mut builder = ClassFileBuilder::new("a", "java/lang/Object");
        let metafactory = builder.add_method_ref(
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        );
        let bootstrap_handle = builder.add_method_handle(6, metafactory);
        let erased = builder.add_method_type("()V");
        let implementation = builder.add_method_ref("a", "lambda$run$0", "()V");
        let implementation_handle = builder.add_method_handle(REF_INVOKE_SPECIAL, implementation);
        let indy = builder.add_invoke_dynamic(
            bootstrap_handle,
            vec![erased, implementation_handle],
            "run",
            "()Ljava/lang/Runnable;",
        );
        builder.add_method(0x0001, "test", "()V", vec![0xba, high(indy), low(indy), 0, 0, 0xb1]);
        let data = builder.finish();

        let editor = ClassEditor::parse(&data).expect("parse");
        let indys = editor.invoke_dynamic_entries().expect("indys");
        assert_eq!(indys.len(), 1);
        assert_eq!(indys[0].name, "run");
        let handle = editor
            .bootstrap_handle(indys[0].bootstrap)
            .expect("handle")
            .expect("present");
        assert_eq!(handle.owner, "java/lang/invoke/LambdaMetafactory");
        assert_eq!(
            editor
                .bootstrap_method_type_arg(indys[0].bootstrap)
                .expect("arg"),
            Some("()V".to_string())
        );
        let arg_handles = editor.bootstrap_arg_handles().expect("args");
        assert_eq!(arg_handles.len(), 1);
        assert_eq!(arg_handles[0].kind, REF_INVOKE_SPECIAL);
    }
}
