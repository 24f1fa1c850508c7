use crate::classfile::{AccessFlags, ConstantPool, Cursor, MAGIC};
use crate::error::{Error, Result};

/// Declared field or method.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
}

/// Header-level view of a class file: hierarchy and declared members, with
/// attribute bodies skipped.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub access: AccessFlags,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
}

impl ClassInfo {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        if cursor.u32()? != MAGIC {
            return Err(Error::ClassFile("bad magic".to_string()));
        }
        cursor.skip(4)?;
        let pool = ConstantPool::parse(&mut cursor)?;
        let access = AccessFlags::from_bits_retain(cursor.u16()?);
        let this_class = cursor.u16()?;
        let super_class = cursor.u16()?;
        let name = pool.class_name(this_class)?.into_owned();
        let super_name = if super_class == 0 {
            None
        } else {
            Some(pool.class_name(super_class)?.into_owned())
        };
        let interface_count = cursor.u16()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(pool.class_name(cursor.u16()?)?.into_owned());
        }
        let fields = parse_members(&mut cursor, &pool)?;
        let methods = parse_members(&mut cursor, &pool)?;
        Ok(ClassInfo {
            access,
            name,
            super_name,
            interfaces,
            fields,
            methods,
        })
    }

    /// Super class first if present, then interfaces in declared order.
    pub fn direct_parents(&self) -> Vec<String> {
        let mut parents = Vec::with_capacity(1 + self.interfaces.len());
        parents.extend(self.super_name.clone());
        parents.extend(self.interfaces.iter().cloned());
        parents
    }

    pub fn field_desc(&self, field_name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == field_name)
            .map(|field| field.desc.as_str())
    }
}

fn parse_members(cursor: &mut Cursor<'_>, pool: &ConstantPool) -> Result<Vec<MemberInfo>> {
    let count = cursor.u16()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access = AccessFlags::from_bits_retain(cursor.u16()?);
        let name = pool.utf8(cursor.u16()?)?.into_owned();
        let desc = pool.utf8(cursor.u16()?)?.into_owned();
        skip_attributes(cursor)?;
        members.push(MemberInfo { access, name, desc });
    }
    Ok(members)
}

fn skip_attributes(cursor: &mut Cursor<'_>) -> Result<()> {
    let count = cursor.u16()? as usize;
    for _ in 0..count {
        cursor.skip(2)?;
        let len = cursor.u32()? as usize;
        cursor.skip(len)?;
    }
    Ok(())
}
