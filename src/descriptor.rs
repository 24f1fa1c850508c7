use std::borrow::Cow;
use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result as AnyResult};
use jdescriptor::MethodDescriptor;

use crate::error::{Error, Result};

/// Class-name substitution source for descriptor rewriting. A `None` result
/// leaves the reference unchanged.
pub trait ClassNameLookup {
    fn lookup_class(&self, internal_name: &str) -> Option<String>;
}

impl ClassNameLookup for HashMap<String, String> {
    fn lookup_class(&self, internal_name: &str) -> Option<String> {
        self.get(internal_name).cloned()
    }
}

impl<L: ClassNameLookup + ?Sized> ClassNameLookup for &L {
    fn lookup_class(&self, internal_name: &str) -> Option<String> {
        (**self).lookup_class(internal_name)
    }
}

/// Rewrite every `L<owner>;` reference of a field/type descriptor through
/// `lookup`. Primitives and array brackets pass through; input without any
/// mapped reference is returned borrowed.
pub fn map_type<'a, L: ClassNameLookup>(desc: &'a str, lookup: L) -> Result<Cow<'a, str>> {
    rewrite_references(desc, &lookup)
}

/// Rewrite the argument list and return type of a method descriptor.
pub fn map_method_desc<'a, L: ClassNameLookup>(desc: &'a str, lookup: L) -> Result<Cow<'a, str>> {
    if !desc.starts_with('(') {
        return Err(Error::Descriptor(desc.to_string()));
    }
    rewrite_references(desc, &lookup)
}

fn rewrite_references<'a, L: ClassNameLookup + ?Sized>(
    desc: &'a str,
    lookup: &L,
) -> Result<Cow<'a, str>> {
    let bytes = desc.as_bytes();
    let mut out: Option<String> = None;
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] != b'L' {
            if let Some(out) = out.as_mut() {
                out.push(bytes[index] as char);
            }
            index += 1;
            continue;
        }
        let end = desc[index..]
            .find(';')
            .map(|offset| index + offset)
            .ok_or_else(|| Error::Descriptor(desc.to_string()))?;
        let name = &desc[index + 1..end];
        match lookup.lookup_class(name) {
            Some(mapped) if mapped != name => {
                let out = out.get_or_insert_with(|| desc[..index].to_string());
                out.push('L');
                out.push_str(&mapped);
                out.push(';');
            }
            _ => {
                if let Some(out) = out.as_mut() {
                    out.push_str(&desc[index..=end]);
                }
            }
        }
        index = end + 1;
    }
    Ok(match out {
        Some(rewritten) => Cow::Owned(rewritten),
        None => Cow::Borrowed(desc),
    })
}

/// Internal name of an object return type, e.g. `()Lfoo/Bar;` -> `foo/Bar`.
/// Primitive, `void`, and array return types yield `None`.
pub fn return_type_internal_name(method_desc: &str) -> Option<&str> {
    let ret = &method_desc[method_desc.find(')')? + 1..];
    ret.strip_prefix('L')?.strip_suffix(';')
}

/// Length in bytes of the single JVM type descriptor at the start of `input`,
/// or an error when no valid descriptor begins there.
pub fn type_descriptor_len(input: &[u8]) -> Result<usize> {
    let mut index = 0;
    while index < input.len() && input[index] == b'[' {
        index += 1;
    }
    match input.get(index) {
        Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => Ok(index + 1),
        Some(b'L') => {
            let mut end = index + 1;
            while let Some(&byte) = input.get(end) {
                if byte == b';' {
                    return Ok(end + 1);
                }
                end += 1;
            }
            Err(Error::Descriptor(
                String::from_utf8_lossy(input).into_owned(),
            ))
        }
        _ => Err(Error::Descriptor(
            String::from_utf8_lossy(input).into_owned(),
        )),
    }
}

/// Validate a field descriptor, rejecting trailing garbage.
pub fn validate_field_desc(desc: &str) -> Result<()> {
    if type_descriptor_len(desc.as_bytes())? != desc.len() {
        return Err(Error::Descriptor(desc.to_string()));
    }
    Ok(())
}

/// Validate a method descriptor.
pub fn validate_method_desc(desc: &str) -> Result<()> {
    MethodDescriptor::from_str(desc).map_err(|_| Error::Descriptor(desc.to_string()))?;
    Ok(())
}

/// Count the parameters of a method descriptor.
pub fn method_param_count(desc: &str) -> AnyResult<usize> {
    let parsed = MethodDescriptor::from_str(desc)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("parse method descriptor")?;
    Ok(parsed.parameter_types().len())
}
