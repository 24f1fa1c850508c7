use std::collections::HashMap;
use std::sync::Arc;

use crate::classfile::patch::{ClassEditor, MemberKind};
use crate::descriptor::{map_method_desc, map_type, return_type_internal_name, ClassNameLookup};
use crate::error::Result;
use crate::inheritance::{parents, InheritanceProvider};
use crate::mappings::Mappings;

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";

/// Flat rename table keyed the way class files reference things:
/// `owner` for classes, `owner.name` for fields, `owner.name(args)ret` for
/// methods. Identity entries are omitted to keep the map small.
#[derive(Clone, Debug, Default)]
pub struct NameMap {
    entries: HashMap<String, String>,
}

impl NameMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl ClassNameLookup for NameMap {
    fn lookup_class(&self, internal_name: &str) -> Option<String> {
        self.get(internal_name).map(str::to_string)
    }
}

impl Mappings {
    /// Rename table for remapping from namespace `from` to `to`. Method-key
    /// descriptors are normalized from the first namespace into `from`.
    pub fn as_asm_mapping(
        &self,
        from: &str,
        to: &str,
        include_methods: bool,
        include_fields: bool,
    ) -> Result<NameMap> {
        if from == to {
            return Ok(NameMap::default());
        }
        let from_index = self.namespace_index(from)?;
        let to_index = self.namespace_index(to)?;
        let first_to_from = self.class_name_map(0, from_index);

        let mut entries = HashMap::new();
        for class in &self.classes {
            let owner_from = &class.names[from_index];
            let owner_to = &class.names[to_index];
            if owner_from.is_empty() || owner_to.is_empty() {
                continue;
            }
            if owner_from != owner_to {
                entries.insert(owner_from.clone(), owner_to.clone());
            }
            if include_fields {
                for field in &class.fields {
                    let (name_from, name_to) = (&field.names[from_index], &field.names[to_index]);
                    if name_from.is_empty() || name_to.is_empty() || name_from == name_to {
                        continue;
                    }
                    entries.insert(format!("{owner_from}.{name_from}"), name_to.clone());
                }
            }
            if include_methods {
                for method in &class.methods {
                    let (name_from, name_to) = (&method.names[from_index], &method.names[to_index]);
                    if name_from.is_empty() || name_to.is_empty() || name_from == name_to {
                        continue;
                    }
                    let desc_from = map_method_desc(&method.desc, &first_to_from)?;
                    entries.insert(format!("{owner_from}.{name_from}{desc_from}"), name_to.clone());
                }
            }
        }
        Ok(NameMap { entries })
    }
}

/// Lookup-map remapper resolving member names across the owner hierarchy.
pub struct SimpleRemapper {
    map: NameMap,
    inheritance: Arc<dyn InheritanceProvider>,
}

impl SimpleRemapper {
    pub fn new(map: NameMap, inheritance: Arc<dyn InheritanceProvider>) -> Self {
        SimpleRemapper { map, inheritance }
    }

    /// Map an internal class name; unknown inner classes fall back to their
    /// outermost mapped prefix. Array descriptors map element-wise.
    pub fn map_class(&self, internal_name: &str) -> String {
        if internal_name.starts_with('[') {
            return match map_type(internal_name, self) {
                Ok(mapped) => mapped.into_owned(),
                Err(_) => internal_name.to_string(),
            };
        }
        map_inner_aware(&self.map, internal_name)
    }

    pub fn map_method_name(&self, owner: &str, name: &str, desc: &str) -> String {
        if name == "<init>" || name == "<clinit>" {
            return name.to_string();
        }
        if !desc.starts_with('(') {
            return self.map_field_name(owner, name, desc);
        }
        if let Some(mapped) = self.map.get(&format!("{owner}.{name}{desc}")) {
            return mapped.to_string();
        }
        for ancestor in parents(self.inheritance.as_ref(), owner) {
            if let Some(mapped) = self.map.get(&format!("{ancestor}.{name}{desc}")) {
                return mapped.to_string();
            }
        }
        name.to_string()
    }

    pub fn map_field_name(&self, owner: &str, name: &str, _desc: &str) -> String {
        if let Some(mapped) = self.map.get(&format!("{owner}.{name}")) {
            return mapped.to_string();
        }
        for ancestor in parents(self.inheritance.as_ref(), owner) {
            if let Some(mapped) = self.map.get(&format!("{ancestor}.{name}")) {
                return mapped.to_string();
            }
        }
        name.to_string()
    }

    pub fn map_record_component_name(&self, owner: &str, name: &str, desc: &str) -> String {
        self.map_field_name(owner, name, desc)
    }

    pub fn map_desc(&self, desc: &str) -> Result<String> {
        Ok(map_type(desc, self)?.into_owned())
    }

    pub fn map_method_descriptor(&self, desc: &str) -> Result<String> {
        Ok(map_method_desc(desc, self)?.into_owned())
    }

    /// Rewrite a generic signature; empty input yields `None`, and inputs the
    /// signature grammar rejects are returned unchanged.
    pub fn map_signature(&self, signature: &str) -> Option<String> {
        if signature.is_empty() {
            return None;
        }
        let mut writer = SignatureWriter {
            input: signature.as_bytes(),
            pos: 0,
            out: String::with_capacity(signature.len()),
            remapper: self,
        };
        match writer.rewrite() {
            Ok(()) => Some(writer.out),
            Err(_) => Some(signature.to_string()),
        }
    }
}

impl ClassNameLookup for SimpleRemapper {
    fn lookup_class(&self, internal_name: &str) -> Option<String> {
        let mapped = map_inner_aware(&self.map, internal_name);
        (mapped != internal_name).then_some(mapped)
    }
}

fn map_inner_aware(map: &NameMap, internal_name: &str) -> String {
    if let Some(mapped) = map.get(internal_name) {
        return mapped.to_string();
    }
    if let Some((outer, inner)) = internal_name.rsplit_once('$') {
        if !outer.is_empty() {
            let mapped_outer = map_inner_aware(map, outer);
            if mapped_outer != outer {
                return format!("{mapped_outer}${inner}");
            }
        }
    }
    internal_name.to_string()
}

/// Simple name of an inner class as stored in the InnerClasses table.
fn simple_name_of(internal_name: &str) -> &str {
    let after_dollar = internal_name
        .rsplit_once('$')
        .map(|(_, inner)| inner)
        .unwrap_or(internal_name);
    after_dollar
        .rsplit_once('/')
        .map(|(_, simple)| simple)
        .unwrap_or(after_dollar)
}

/// Apply `remapper` to a whole class file: types, descriptors, signatures,
/// member declarations and references, invoke-dynamic callsites, inner-class
/// and enclosing-method metadata. The class's own rename happens last.
pub fn remap_class_bytes(data: &[u8], remapper: &SimpleRemapper) -> Result<Vec<u8>> {
    let mut editor = ClassEditor::parse(data)?;
    let this_name = editor.class_name()?;

    for reference in editor.ref_entries()? {
        let name = if reference.is_field {
            remapper.map_field_name(&reference.owner, &reference.name, &reference.desc)
        } else {
            remapper.map_method_name(&reference.owner, &reference.name, &reference.desc)
        };
        let desc = if reference.is_field {
            remapper.map_desc(&reference.desc)?
        } else {
            remapper.map_method_descriptor(&reference.desc)?
        };
        if name != reference.name || desc != reference.desc {
            editor.set_ref_name_and_type(reference.index, &name, &desc)?;
        }
    }

    for indy in editor.invoke_dynamic_entries()? {
        let name = match editor.bootstrap_handle(indy.bootstrap)? {
            Some(handle)
                if handle.owner == LAMBDA_METAFACTORY
                    && (handle.name == "metafactory" || handle.name == "altMetafactory") =>
            {
                // The synthetic name only exists on the functional interface,
                // which is the return type of the callsite descriptor; the
                // lookup descriptor is the erased lambda body type.
                match (
                    return_type_internal_name(&indy.desc),
                    editor.bootstrap_method_type_arg(indy.bootstrap)?,
                ) {
                    (Some(interface), Some(body_desc)) => {
                        remapper.map_method_name(interface, &indy.name, &body_desc)
                    }
                    _ => indy.name.clone(),
                }
            }
            _ => indy.name.clone(),
        };
        let desc = remapper.map_method_descriptor(&indy.desc)?;
        if name != indy.name || desc != indy.desc {
            editor.set_invoke_dynamic(indy.index, &name, &desc)?;
        }
    }

    for dynamic in editor.dynamic_entries()? {
        let desc = remapper.map_desc(&dynamic.desc)?;
        if desc != dynamic.desc {
            editor.set_dynamic(dynamic.index, &dynamic.name, &desc)?;
        }
    }

    for (index, desc) in editor.method_type_entries()? {
        let mapped = remapper.map_method_descriptor(&desc)?;
        if mapped != desc {
            editor.set_method_type(index, &mapped)?;
        }
    }

    for member in editor.members() {
        let (name, desc) = match member.kind {
            MemberKind::Field => (
                remapper.map_field_name(&this_name, &member.name, &member.desc),
                remapper.map_desc(&member.desc)?,
            ),
            MemberKind::Method => (
                remapper.map_method_name(&this_name, &member.name, &member.desc),
                remapper.map_method_descriptor(&member.desc)?,
            ),
            MemberKind::RecordComponent => (
                remapper.map_record_component_name(&this_name, &member.name, &member.desc),
                remapper.map_desc(&member.desc)?,
            ),
        };
        if name != member.name {
            editor.set_member_name(&member, &name)?;
        }
        if desc != member.desc {
            editor.set_member_desc(&member, &desc)?;
        }
    }

    for (site, signature) in editor.signatures()? {
        if let Some(mapped) = remapper.map_signature(&signature) {
            if mapped != signature {
                editor.set_site(site, &mapped)?;
            }
        }
    }
    for (site, signature) in editor.lvtt_signatures()? {
        if let Some(mapped) = remapper.map_signature(&signature) {
            if mapped != signature {
                editor.set_site(site, &mapped)?;
            }
        }
    }
    for (site, desc) in editor.annotation_types()? {
        let mapped = remapper.map_desc(&desc)?;
        if mapped != desc {
            editor.set_site(site, &mapped)?;
        }
    }
    for (site, desc) in editor.lvt_descs()? {
        let mapped = remapper.map_desc(&desc)?;
        if mapped != desc {
            editor.set_site(site, &mapped)?;
        }
    }

    // Enum-style annotation values are field references on the enum type.
    for (type_site, name_site, type_desc, const_name) in editor.enum_consts()? {
        let mapped_desc = remapper.map_desc(&type_desc)?;
        if mapped_desc != type_desc {
            editor.set_site(type_site, &mapped_desc)?;
        }
        if let Some(enum_owner) = type_desc.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            let mapped_name = remapper.map_field_name(enum_owner, &const_name, &type_desc);
            if mapped_name != const_name {
                editor.set_site(name_site, &mapped_name)?;
            }
        }
    }

    for (entry, inner_name, simple, _access) in editor.inner_classes()? {
        if simple.is_none() {
            continue;
        }
        let mapped = remapper.map_class(&inner_name);
        if mapped != inner_name {
            editor.set_inner_simple_name(entry, simple_name_of(&mapped))?;
        }
    }

    if let Some((owner, name, desc)) = editor.enclosing_method()? {
        let mapped_name = remapper.map_method_name(&owner, &name, &desc);
        let mapped_desc = remapper.map_method_descriptor(&desc)?;
        if mapped_name != name || mapped_desc != desc {
            editor.set_enclosing_method(&mapped_name, &mapped_desc)?;
        }
    }

    for (index, name) in editor.class_entries() {
        let mapped = remapper.map_class(&name);
        if mapped != name {
            editor.set_class_entry_name(index, &mapped)?;
        }
    }

    Ok(editor.finish())
}

/// Rewrite only class references, leaving member names alone.
pub fn remap_class_names(data: &[u8], lookup: &HashMap<String, String>) -> Result<Vec<u8>> {
    let map = NameMap {
        entries: lookup.clone(),
    };
    let mut editor = ClassEditor::parse(data)?;
    for (index, name) in editor.class_entries() {
        let mapped = if name.starts_with('[') {
            map_type(&name, &map)?.into_owned()
        } else {
            map_inner_aware(&map, &name)
        };
        if mapped != name {
            editor.set_class_entry_name(index, &mapped)?;
        }
    }
    Ok(editor.finish())
}

/// Rewriting recursive-descent walk over the JVM generic-signature grammar.
struct SignatureWriter<'a> {
    input: &'a [u8],
    pos: usize,
    out: String,
    remapper: &'a SimpleRemapper,
}

impl SignatureWriter<'_> {
    fn rewrite(&mut self) -> Result<()> {
        if self.peek() == Some(b'<') {
            self.formal_type_parameters()?;
        }
        if self.peek() == Some(b'(') {
            self.copy()?;
            while self.peek() != Some(b')') {
                self.type_signature()?;
            }
            self.copy()?;
            if self.peek() == Some(b'V') {
                self.copy()?;
            } else {
                self.type_signature()?;
            }
            while self.peek() == Some(b'^') {
                self.copy()?;
                if self.peek() == Some(b'T') {
                    self.type_variable()?;
                } else {
                    self.class_type_signature()?;
                }
            }
        } else {
            while self.pos < self.input.len() {
                self.field_type_signature()?;
            }
        }
        if self.pos != self.input.len() {
            return Err(malformed());
        }
        Ok(())
    }

    fn formal_type_parameters(&mut self) -> Result<()> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            while let Some(byte) = self.peek() {
                if byte == b':' {
                    break;
                }
                self.copy()?;
            }
            self.expect(b':')?;
            if self.peeks_type() {
                self.field_type_signature()?;
            }
            while self.peek() == Some(b':') {
                self.copy()?;
                self.field_type_signature()?;
            }
        }
        self.expect(b'>')
    }

    fn type_signature(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => self.copy(),
            _ => self.field_type_signature(),
        }
    }

    fn field_type_signature(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'[') => {
                self.copy()?;
                self.type_signature()
            }
            Some(b'T') => self.type_variable(),
            Some(b'L') => self.class_type_signature(),
            _ => Err(malformed()),
        }
    }

    fn type_variable(&mut self) -> Result<()> {
        self.expect(b'T')?;
        while let Some(byte) = self.peek() {
            self.copy()?;
            if byte == b';' {
                return Ok(());
            }
        }
        Err(malformed())
    }

    fn class_type_signature(&mut self) -> Result<()> {
        self.expect_silent(b'L')?;
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if matches!(byte, b'<' | b';' | b'.') {
                break;
            }
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.input[start..self.pos]).map_err(|_| malformed())?;
        self.out.push('L');
        self.out.push_str(&self.remapper.map_class(name));
        loop {
            match self.peek() {
                Some(b'<') => {
                    self.copy()?;
                    while self.peek() != Some(b'>') {
                        self.type_argument()?;
                    }
                    self.copy()?;
                }
                Some(b'.') => {
                    // Inner-class suffix; simple names are left as written.
                    self.copy()?;
                    while let Some(byte) = self.peek() {
                        if matches!(byte, b'<' | b';' | b'.') {
                            break;
                        }
                        self.copy()?;
                    }
                }
                Some(b';') => {
                    self.copy()?;
                    return Ok(());
                }
                _ => return Err(malformed()),
            }
        }
    }

    fn type_argument(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'*') => self.copy(),
            Some(b'+' | b'-') => {
                self.copy()?;
                self.field_type_signature()
            }
            _ => self.field_type_signature(),
        }
    }

    fn peeks_type(&self) -> bool {
        matches!(self.peek(), Some(b'[' | b'T' | b'L'))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn copy(&mut self) -> Result<()> {
        let byte = self.peek().ok_or_else(malformed)?;
        self.out.push(byte as char);
        self.pos += 1;
        Ok(())
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() != Some(byte) {
            return Err(malformed());
        }
        self.copy()
    }

    fn expect_silent(&mut self, byte: u8) -> Result<()> {
        if self.peek() != Some(byte) {
            return Err(malformed());
        }
        self.pos += 1;
        Ok(())
    }
}

fn malformed() -> crate::error::Error {
    crate::error::Error::Descriptor("malformed signature".to_string())
}
