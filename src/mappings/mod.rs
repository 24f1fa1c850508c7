pub mod transform;

pub use transform::{join_all, FieldDescSource};

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Mapped method parameter, one name per namespace.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MappedParameter {
    pub index: u16,
    pub names: Vec<String>,
}

/// Mapped local variable. `lvt_index < 0` means unset.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MappedLocal {
    pub index: u16,
    pub start_offset: u16,
    pub lvt_index: i32,
    pub names: Vec<String>,
}

/// Mapped field. The descriptor, when present, refers to names in the first
/// namespace of the enclosing mappings.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MappedField {
    pub names: Vec<String>,
    pub comments: Vec<String>,
    pub desc: Option<String>,
}

/// Mapped method with parameter and local-variable mappings.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MappedMethod {
    pub names: Vec<String>,
    pub comments: Vec<String>,
    pub desc: String,
    pub parameters: Vec<MappedParameter>,
    pub variables: Vec<MappedLocal>,
}

/// Mapped class with its member mappings.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MappedClass {
    pub names: Vec<String>,
    pub comments: Vec<String>,
    pub fields: Vec<MappedField>,
    pub methods: Vec<MappedMethod>,
}

/// Per-format flags and header data carried through parse/write.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub enum FormatMetadata {
    #[default]
    Generic,
    Srg {
        extended: bool,
    },
    Csrg,
    Tsrg {
        v2: bool,
    },
    TinyV1,
    TinyV2 {
        properties: Vec<(String, String)>,
    },
    Proguard,
    Enigma,
    Recaf,
    Compacted {
        version: u8,
    },
}

/// Immutable snapshot of name mappings across namespaces.
///
/// Equality and hashing are structural over namespaces and classes; format
/// metadata is carried for writing but does not participate, so the same
/// program parsed from two formats compares equal.
#[derive(Clone, Debug, Default)]
pub struct Mappings {
    pub namespaces: Vec<String>,
    pub classes: Vec<MappedClass>,
    pub metadata: FormatMetadata,
}

impl PartialEq for Mappings {
    fn eq(&self, other: &Self) -> bool {
        self.namespaces == other.namespaces && self.classes == other.classes
    }
}

impl Eq for Mappings {}

impl std::hash::Hash for Mappings {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.namespaces.hash(state);
        self.classes.hash(state);
    }
}

impl MappedClass {
    pub fn new(names: Vec<String>) -> Self {
        MappedClass {
            names,
            comments: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

impl Mappings {
    /// Generic mappings factory; validates structural invariants.
    pub fn new(namespaces: Vec<String>, classes: Vec<MappedClass>) -> Result<Self> {
        let mappings = Mappings {
            namespaces,
            classes,
            metadata: FormatMetadata::Generic,
        };
        mappings.validate(false)?;
        Ok(mappings)
    }

    /// Mappings with no namespaces and no classes; identity of the join fold.
    pub fn empty() -> Self {
        Mappings::default()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.classes.is_empty()
    }

    /// Index of `namespace` in this mappings value.
    pub fn namespace_index(&self, namespace: &str) -> Result<usize> {
        self.namespaces
            .iter()
            .position(|candidate| candidate == namespace)
            .ok_or_else(|| Error::NamespaceMissing(namespace.to_string()))
    }

    /// Validate the §3 invariants. When `require_field_desc` is set (formats
    /// that forbid null field descriptors), every field must carry one.
    pub fn validate(&self, require_field_desc: bool) -> Result<()> {
        let width = self.namespaces.len();
        for class in &self.classes {
            check_names("class", &class.names, width)?;
            for field in &class.fields {
                check_names("field", &field.names, width)?;
                if require_field_desc && field.desc.is_none() {
                    return Err(Error::Invariant(format!(
                        "field {} of class {} is missing its descriptor",
                        field.names[0], class.names[0]
                    )));
                }
            }
            for method in &class.methods {
                check_names("method", &method.names, width)?;
                for parameter in &method.parameters {
                    if parameter.names.len() != width {
                        return Err(Error::Invariant(format!(
                            "parameter of method {} has {} names for {} namespaces",
                            method.names[0],
                            parameter.names.len(),
                            width
                        )));
                    }
                }
                for variable in &method.variables {
                    if variable.names.len() != width {
                        return Err(Error::Invariant(format!(
                            "local of method {} has {} names for {} namespaces",
                            method.names[0],
                            variable.names.len(),
                            width
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Class-name translation map between two namespace columns. Identity
    /// pairs are skipped.
    pub fn class_name_map(&self, from: usize, to: usize) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(self.classes.len());
        for class in &self.classes {
            let (name_from, name_to) = (&class.names[from], &class.names[to]);
            if !name_from.is_empty() && !name_to.is_empty() && name_from != name_to {
                map.insert(name_from.clone(), name_to.clone());
            }
        }
        map
    }
}

fn check_names(kind: &str, names: &[String], width: usize) -> Result<()> {
    if names.len() != width {
        return Err(Error::Invariant(format!(
            "{kind} has {} names for {width} namespaces",
            names.len()
        )));
    }
    if names.first().is_some_and(String::is_empty) {
        return Err(Error::Invariant(format!(
            "{kind} name is empty in the first namespace"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    pub(crate) fn field(name_pairs: &[&str], desc: Option<&str>) -> MappedField {
        MappedField {
            names: names(name_pairs),
            comments: Vec::new(),
            desc: desc.map(str::to_string),
        }
    }

    pub(crate) fn method(name_pairs: &[&str], desc: &str) -> MappedMethod {
        MappedMethod {
            names: names(name_pairs),
            comments: Vec::new(),
            desc: desc.to_string(),
            parameters: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub(crate) fn class(name_pairs: &[&str]) -> MappedClass {
        MappedClass::new(names(name_pairs))
    }

    /// The S1/S2 sample program: `a`/`Main` with field `b`/`state` and
    /// methods `c`/`action`, `d`/`anotherAction`.
    pub(crate) fn sample() -> Mappings {
        let mut main = class(&["a", "Main"]);
        main.fields.push(field(&["b", "state"], Some("Ld;")));
        main.methods.push(method(&["c", "action"], "()Le;"));
        main.methods.push(method(&["d", "anotherAction"], "()Le;"));
        Mappings::new(
            names(&["official", "named"]),
            vec![main, class(&["d", "SomeState"]), class(&["e", "SomeOtherState"])],
        )
        .expect("sample mappings")
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn validate_rejects_mismatched_name_width() {
        let bad = Mappings {
            namespaces: names(&["official", "named"]),
            classes: vec![class(&["a"])],
            metadata: FormatMetadata::Generic,
        };
        assert!(bad.validate(false).is_err());
    }

    #[test]
    fn validate_rejects_empty_first_name() {
        let bad = Mappings {
            namespaces: names(&["official", "named"]),
            classes: vec![class(&["", "Main"])],
            metadata: FormatMetadata::Generic,
        };
        assert!(bad.validate(false).is_err());
    }

    #[test]
    fn validate_requires_field_descriptors_on_demand() {
        let mut with_holes = sample();
        with_holes.classes[0].fields[0].desc = None;
        assert!(with_holes.validate(false).is_ok());
        assert!(with_holes.validate(true).is_err());
    }

    #[test]
    fn namespace_index_reports_missing_namespaces() {
        let mappings = sample();
        assert_eq!(mappings.namespace_index("named").expect("index"), 1);
        assert!(mappings.namespace_index("intermediary").is_err());
    }

    #[test]
    fn equality_ignores_format_metadata() {
        let mut a = sample();
        let mut b = sample();
        a.metadata = FormatMetadata::TinyV2 {
            properties: Vec::new(),
        };
        b.metadata = FormatMetadata::Proguard;
        assert_eq!(a, b);
    }

    #[test]
    fn class_name_map_skips_identity_pairs() {
        let mut mappings = sample();
        mappings.classes.push(class(&["same", "same"]));
        let map = mappings.class_name_map(0, 1);
        assert_eq!(map.get("a").map(String::as_str), Some("Main"));
        assert!(!map.contains_key("same"));
    }
}
