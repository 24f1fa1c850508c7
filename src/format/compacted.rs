//! The compacted binary mapping format.
//!
//! Layout: `ACMF` magic, version byte (1 or 2), namespace list, in v2 a
//! prefix dictionary of up to 31 entries, a class count, then classes. Names
//! use the column-elision shorthand and may begin with a one-byte dictionary
//! index (0..=31) standing for a package prefix. Member descriptors are
//! stored without a length; they end where the descriptor grammar completes,
//! and three one-byte tokens stand for the most common object types.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::format::{elide_names, materialize_names};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

pub const MAGIC: &[u8] = b"ACMF";

const MAX_DICT_ENTRIES: usize = 31;

const SHORTCUTS: [(u8, &str); 3] = [
    (b'A', "Ljava/lang/Object;"),
    (b'G', "Ljava/lang/String;"),
    (b'R', "Ljava/util/List;"),
];

fn corrupt(at: usize, message: &str) -> Error {
    Error::parse(1, format!("compacted data at byte {at}: {message}"))
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| corrupt(self.pos, "unexpected end of data"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| corrupt(self.pos, "unexpected end of data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32> {
        let slice = self.bytes(4)?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    /// Little-endian base-128 varint with continuation bit.
    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(corrupt(self.pos, "varint overflow"));
            }
        }
    }

    fn string(&mut self, dictionary: &[String]) -> Result<String> {
        let len = self.u8()? as usize;
        let start = self.pos;
        let bytes = self.bytes(len)?;
        if let Some(&first) = bytes.first() {
            if first as usize <= MAX_DICT_ENTRIES {
                let prefix = dictionary.get(first as usize).ok_or_else(|| {
                    corrupt(start, "prefix index outside the dictionary")
                })?;
                let rest = std::str::from_utf8(&bytes[1..])
                    .map_err(|_| corrupt(start, "name is not UTF-8"))?;
                return Ok(format!("{prefix}{rest}"));
            }
        }
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| corrupt(start, "name is not UTF-8"))
    }

    fn names(&mut self, count: usize, dictionary: &[String]) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.string(dictionary)?);
        }
        materialize_names(&mut names);
        Ok(names)
    }

    fn type_desc(&mut self, out: &mut String) -> Result<()> {
        loop {
            let at = self.pos;
            let byte = self.u8()?;
            match byte {
                b'[' => out.push('['),
                b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
                    out.push(byte as char);
                    return Ok(());
                }
                b'L' => {
                    out.push('L');
                    loop {
                        let ch = self.u8()?;
                        out.push(ch as char);
                        if ch == b';' {
                            return Ok(());
                        }
                    }
                }
                shortcut => {
                    if let Some((_, expansion)) =
                        SHORTCUTS.iter().find(|(token, _)| *token == shortcut)
                    {
                        out.push_str(expansion);
                        return Ok(());
                    }
                    return Err(corrupt(at, "unknown descriptor byte"));
                }
            }
        }
    }

    fn descriptor(&mut self) -> Result<String> {
        let mut out = String::new();
        if self.peek() == Some(b'(') {
            self.u8()?;
            out.push('(');
            while self.peek() != Some(b')') {
                self.type_desc(&mut out)?;
            }
            self.u8()?;
            out.push(')');
            if self.peek() == Some(b'V') {
                self.u8()?;
                out.push('V');
            } else {
                self.type_desc(&mut out)?;
            }
        } else {
            self.type_desc(&mut out)?;
        }
        Ok(out)
    }
}

pub fn parse(data: &[u8]) -> Result<Mappings> {
    let mut reader = ByteReader { data, pos: 0 };
    if reader.bytes(MAGIC.len())? != MAGIC {
        return Err(corrupt(0, "missing ACMF magic"));
    }
    let version = reader.u8()?;
    if !matches!(version, 1 | 2) {
        return Err(corrupt(4, "unsupported version"));
    }
    let namespace_count = reader.u8()? as usize;
    let mut namespaces = Vec::with_capacity(namespace_count);
    for _ in 0..namespace_count {
        namespaces.push(reader.string(&[])?);
    }
    let dictionary = if version >= 2 {
        let count = reader.u8()? as usize;
        if count > MAX_DICT_ENTRIES {
            return Err(corrupt(reader.pos, "oversized prefix dictionary"));
        }
        let mut dictionary = Vec::with_capacity(count);
        for _ in 0..count {
            dictionary.push(reader.string(&[])?);
        }
        dictionary
    } else {
        Vec::new()
    };

    let class_count = reader.u32_le()? as usize;
    let mut classes = Vec::with_capacity(class_count);
    for _ in 0..class_count {
        let mut class = MappedClass::new(reader.names(namespace_count, &dictionary)?);
        let member_count = reader.varint()? as usize;
        for _ in 0..member_count {
            let names = reader.names(namespace_count, &dictionary)?;
            let desc = reader.descriptor()?;
            if desc.starts_with('(') {
                class.methods.push(MappedMethod {
                    names,
                    comments: Vec::new(),
                    desc,
                    parameters: Vec::new(),
                    variables: Vec::new(),
                });
            } else {
                class.fields.push(MappedField {
                    names,
                    comments: Vec::new(),
                    desc: Some(desc),
                });
            }
        }
        classes.push(class);
    }
    let mappings = Mappings {
        namespaces,
        classes,
        metadata: FormatMetadata::Compacted { version },
    };
    mappings.validate(true)?;
    Ok(mappings)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_plain_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.len() > u8::MAX as usize {
        return Err(Error::Invariant(format!("name too long: {value:?}")));
    }
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_string(out: &mut Vec<u8>, value: &str, dictionary: &[String]) -> Result<()> {
    for (index, prefix) in dictionary.iter().enumerate() {
        if let Some(rest) = value.strip_prefix(prefix.as_str()) {
            let encoded_len = 1 + rest.len();
            if encoded_len > u8::MAX as usize {
                break;
            }
            out.push(encoded_len as u8);
            out.push(index as u8);
            out.extend_from_slice(rest.as_bytes());
            return Ok(());
        }
    }
    write_plain_string(out, value)
}

fn write_names(out: &mut Vec<u8>, names: &[String], dictionary: &[String]) -> Result<()> {
    for name in elide_names(names) {
        write_string(out, &name, dictionary)?;
    }
    Ok(())
}

fn write_type(out: &mut Vec<u8>, desc: &str) {
    if let Some((token, _)) = SHORTCUTS.iter().find(|(_, expansion)| *expansion == desc) {
        out.push(*token);
        return;
    }
    out.extend_from_slice(desc.as_bytes());
}

fn write_descriptor(out: &mut Vec<u8>, desc: &str) -> Result<()> {
    if let Some(inner) = desc.strip_prefix('(') {
        let (args, ret) = inner
            .split_once(')')
            .ok_or_else(|| Error::Descriptor(desc.to_string()))?;
        out.push(b'(');
        let bytes = args.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            let len = crate::descriptor::type_descriptor_len(&bytes[pos..])?;
            write_type(out, &args[pos..pos + len]);
            pos += len;
        }
        out.push(b')');
        if ret == "V" {
            out.push(b'V');
        } else {
            crate::descriptor::validate_field_desc(ret)?;
            write_type(out, ret);
        }
    } else {
        crate::descriptor::validate_field_desc(desc)?;
        write_type(out, desc);
    }
    Ok(())
}

/// Score package prefixes of the first namespace by frequency and keep the
/// most frequent, longest first.
fn build_dictionary(mappings: &Mappings) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for class in &mappings.classes {
        let name = class.names[0].as_str();
        if let Some(slash) = name.rfind('/') {
            *counts.entry(&name[..=slash]).or_default() += 1;
        }
    }
    let mut scored: Vec<(&str, usize)> = counts.into_iter().collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.truncate(MAX_DICT_ENTRIES);
    let mut dictionary: Vec<String> = scored.into_iter().map(|(prefix, _)| prefix.to_string()).collect();
    dictionary.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    dictionary
}

pub fn write(mappings: &Mappings) -> Result<Vec<u8>> {
    let version = match mappings.metadata {
        FormatMetadata::Compacted { version } => version,
        _ => 2,
    };
    if mappings.namespaces.len() > u8::MAX as usize {
        return Err(Error::Invariant("too many namespaces".to_string()));
    }
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(version);
    out.push(mappings.namespaces.len() as u8);
    for namespace in &mappings.namespaces {
        write_plain_string(&mut out, namespace)?;
    }
    let dictionary = if version >= 2 {
        let dictionary = build_dictionary(mappings);
        out.push(dictionary.len() as u8);
        for entry in &dictionary {
            write_plain_string(&mut out, entry)?;
        }
        dictionary
    } else {
        Vec::new()
    };

    out.extend_from_slice(&(mappings.classes.len() as u32).to_le_bytes());
    for class in &mappings.classes {
        write_names(&mut out, &class.names, &dictionary)?;
        write_varint(&mut out, (class.fields.len() + class.methods.len()) as u64);
        for field in &class.fields {
            write_names(&mut out, &field.names, &dictionary)?;
            let desc = field.desc.as_deref().ok_or_else(|| {
                Error::Invariant(format!(
                    "field {}.{} has no descriptor for compacted output",
                    class.names[0], field.names[0]
                ))
            })?;
            write_descriptor(&mut out, desc)?;
        }
        for method in &class.methods {
            write_names(&mut out, &method.names, &dictionary)?;
            write_descriptor(&mut out, &method.desc)?;
        }
    }
    Ok(out)
}
