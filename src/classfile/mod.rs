pub mod info;
pub mod patch;
#[cfg(test)]
pub(crate) mod testutil;

use std::borrow::Cow;

use bitflags::bitflags;

use crate::error::{Error, Result};

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Method handle reference kinds used by invoke-dynamic bootstrap arguments.
pub const REF_INVOKE_VIRTUAL: u8 = 5;
pub const REF_INVOKE_SPECIAL: u8 = 7;

pub const OPCODE_INVOKESPECIAL: u8 = 0xb7;
pub const OPCODE_INVOKEVIRTUAL: u8 = 0xb6;

bitflags! {
    /// JVM access flags shared by classes, fields, and methods.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

/// Byte cursor over class-file data.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::ClassFile("unexpected end of data".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let slice = self.bytes(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let slice = self.bytes(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::ClassFile("unexpected end of data".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }
}

/// Constant pool entry. Utf8 payloads keep their raw (modified UTF-8) bytes
/// so untouched entries round-trip exactly.
#[derive(Clone, Debug)]
pub(crate) enum CpEntry {
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class { name: u16 },
    Str { utf8: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, desc: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { desc: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
    /// Index 0 and the trailing slot of 8-byte constants.
    Placeholder,
}

/// Parsed constant pool. Existing entries keep their indices; new entries
/// are appended, so indices embedded in attribute bodies and bytecode stay
/// valid without rewriting.
#[derive(Clone, Debug)]
pub(crate) struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub(crate) fn parse(cursor: &mut Cursor<'_>) -> Result<Self> {
        let count = cursor.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(CpEntry::Placeholder);
        while entries.len() < count {
            let tag = cursor.u8()?;
            let entry = match tag {
                1 => {
                    let len = cursor.u16()? as usize;
                    CpEntry::Utf8(cursor.bytes(len)?.to_vec())
                }
                3 => CpEntry::Integer(cursor.u32()?),
                4 => CpEntry::Float(cursor.u32()?),
                5 => CpEntry::Long((cursor.u32()? as u64) << 32 | cursor.u32()? as u64),
                6 => CpEntry::Double((cursor.u32()? as u64) << 32 | cursor.u32()? as u64),
                7 => CpEntry::Class { name: cursor.u16()? },
                8 => CpEntry::Str { utf8: cursor.u16()? },
                9 => CpEntry::FieldRef {
                    class: cursor.u16()?,
                    name_and_type: cursor.u16()?,
                },
                10 => CpEntry::MethodRef {
                    class: cursor.u16()?,
                    name_and_type: cursor.u16()?,
                },
                11 => CpEntry::InterfaceMethodRef {
                    class: cursor.u16()?,
                    name_and_type: cursor.u16()?,
                },
                12 => CpEntry::NameAndType {
                    name: cursor.u16()?,
                    desc: cursor.u16()?,
                },
                15 => CpEntry::MethodHandle {
                    kind: cursor.u8()?,
                    reference: cursor.u16()?,
                },
                16 => CpEntry::MethodType { desc: cursor.u16()? },
                17 => CpEntry::Dynamic {
                    bootstrap: cursor.u16()?,
                    name_and_type: cursor.u16()?,
                },
                18 => CpEntry::InvokeDynamic {
                    bootstrap: cursor.u16()?,
                    name_and_type: cursor.u16()?,
                },
                19 => CpEntry::Module { name: cursor.u16()? },
                20 => CpEntry::Package { name: cursor.u16()? },
                _ => {
                    return Err(Error::ClassFile(format!(
                        "unsupported constant pool tag {tag}"
                    )))
                }
            };
            let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
            entries.push(entry);
            if wide {
                entries.push(CpEntry::Placeholder);
            }
        }
        Ok(ConstantPool { entries })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in &self.entries[1..] {
            match entry {
                CpEntry::Utf8(bytes) => {
                    out.push(1);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                CpEntry::Integer(value) => {
                    out.push(3);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                CpEntry::Float(value) => {
                    out.push(4);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                CpEntry::Long(value) => {
                    out.push(5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                CpEntry::Double(value) => {
                    out.push(6);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                CpEntry::Class { name } => {
                    out.push(7);
                    out.extend_from_slice(&name.to_be_bytes());
                }
                CpEntry::Str { utf8 } => {
                    out.push(8);
                    out.extend_from_slice(&utf8.to_be_bytes());
                }
                CpEntry::FieldRef {
                    class,
                    name_and_type,
                } => {
                    out.push(9);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                CpEntry::MethodRef {
                    class,
                    name_and_type,
                } => {
                    out.push(10);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                CpEntry::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    out.push(11);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                CpEntry::NameAndType { name, desc } => {
                    out.push(12);
                    out.extend_from_slice(&name.to_be_bytes());
                    out.extend_from_slice(&desc.to_be_bytes());
                }
                CpEntry::MethodHandle { kind, reference } => {
                    out.push(15);
                    out.push(*kind);
                    out.extend_from_slice(&reference.to_be_bytes());
                }
                CpEntry::MethodType { desc } => {
                    out.push(16);
                    out.extend_from_slice(&desc.to_be_bytes());
                }
                CpEntry::Dynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    out.push(17);
                    out.extend_from_slice(&bootstrap.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                CpEntry::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    out.push(18);
                    out.extend_from_slice(&bootstrap.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                CpEntry::Module { name } => {
                    out.push(19);
                    out.extend_from_slice(&name.to_be_bytes());
                }
                CpEntry::Package { name } => {
                    out.push(20);
                    out.extend_from_slice(&name.to_be_bytes());
                }
                CpEntry::Placeholder => {}
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entry(&self, index: u16) -> Result<&CpEntry> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| Error::ClassFile(format!("constant pool index {index} out of range")))
    }

    pub(crate) fn entry_mut(&mut self, index: u16) -> Result<&mut CpEntry> {
        self.entries
            .get_mut(index as usize)
            .ok_or_else(|| Error::ClassFile(format!("constant pool index {index} out of range")))
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.entry(index)? {
            CpEntry::Utf8(bytes) => Ok(String::from_utf8_lossy(bytes)),
            other => Err(Error::ClassFile(format!(
                "expected Utf8 at index {index}, found {other:?}"
            ))),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.entry(index)? {
            CpEntry::Class { name } => self.utf8(*name),
            other => Err(Error::ClassFile(format!(
                "expected Class at index {index}, found {other:?}"
            ))),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            CpEntry::NameAndType { name, desc } => {
                Ok((self.utf8(*name)?.into_owned(), self.utf8(*desc)?.into_owned()))
            }
            other => Err(Error::ClassFile(format!(
                "expected NameAndType at index {index}, found {other:?}"
            ))),
        }
    }

    /// Index of a Utf8 entry with `value`, appending one if absent. Existing
    /// entries are never mutated, so sharing an equal entry is safe.
    pub(crate) fn intern_utf8(&mut self, value: &str) -> Result<u16> {
        for (index, entry) in self.entries.iter().enumerate() {
            if let CpEntry::Utf8(bytes) = entry {
                if bytes.as_slice() == value.as_bytes() {
                    return Ok(index as u16);
                }
            }
        }
        self.append(CpEntry::Utf8(value.as_bytes().to_vec()))
    }

    /// Index of a NameAndType entry with the given content, appending the
    /// entry (and its Utf8 strings) if absent.
    pub(crate) fn intern_name_and_type(&mut self, name: &str, desc: &str) -> Result<u16> {
        for index in 1..self.entries.len() {
            if let CpEntry::NameAndType {
                name: name_index,
                desc: desc_index,
            } = self.entries[index]
            {
                if self.utf8(name_index)? == name && self.utf8(desc_index)? == desc {
                    return Ok(index as u16);
                }
            }
        }
        let name = self.intern_utf8(name)?;
        let desc = self.intern_utf8(desc)?;
        self.append(CpEntry::NameAndType { name, desc })
    }

    fn append(&mut self, entry: CpEntry) -> Result<u16> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(Error::ClassFile("constant pool overflow".to_string()));
        }
        self.entries.push(entry);
        Ok((self.entries.len() - 1) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> Vec<u8> {
        // count=6: Utf8 "a", Class -> 1, Utf8 "desc", Long, placeholder
        let mut data = Vec::new();
        data.extend_from_slice(&6u16.to_be_bytes());
        data.push(1);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.push(b'a');
        data.push(7);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.push(1);
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(b"desc");
        data.push(5);
        data.extend_from_slice(&42u64.to_be_bytes());
        data
    }

    #[test]
    fn pool_round_trips() {
        let data = sample_pool();
        let mut cursor = Cursor::new(&data);
        let pool = ConstantPool::parse(&mut cursor).expect("parse pool");
        assert_eq!(cursor.pos(), data.len());
        assert_eq!(pool.class_name(2).expect("class"), "a");
        let mut out = Vec::new();
        pool.write(&mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn intern_utf8_reuses_existing_entries() {
        let data = sample_pool();
        let mut cursor = Cursor::new(&data);
        let mut pool = ConstantPool::parse(&mut cursor).expect("parse pool");
        assert_eq!(pool.intern_utf8("a").expect("intern"), 1);
        let appended = pool.intern_utf8("fresh").expect("intern");
        assert_eq!(appended as usize, pool.len() - 1);
        assert_eq!(pool.utf8(appended).expect("utf8"), "fresh");
    }

    #[test]
    fn intern_name_and_type_appends_once() {
        let data = sample_pool();
        let mut cursor = Cursor::new(&data);
        let mut pool = ConstantPool::parse(&mut cursor).expect("parse pool");
        let first = pool.intern_name_and_type("run", "()V").expect("intern");
        let second = pool.intern_name_and_type("run", "()V").expect("intern");
        assert_eq!(first, second);
        assert_eq!(pool.name_and_type(first).expect("nat").0, "run");
    }

    #[test]
    fn cursor_rejects_truncated_input() {
        let mut cursor = Cursor::new(&[0, 9]);
        assert!(cursor.u32().is_err());
    }
}
