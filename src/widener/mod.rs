//! Access wideners: parsing, the merge algebra, remapping, and class-file
//! application.

pub mod apply;
pub mod tree;

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::inheritance::InheritanceProvider;
use crate::mappings::Mappings;
use crate::remapper::SimpleRemapper;

bitflags! {
    /// Requested access relaxations.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct AccessMask: u8 {
        const ACCESSIBLE = 1;
        const EXTENDABLE = 2;
        const MUTABLE = 4;
    }
}

/// A field or method targeted by a widener rule.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AccessedMember {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

/// Parsed access-widener file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessWidener {
    pub version: u8,
    pub namespace: String,
    pub classes: BTreeMap<String, AccessMask>,
    pub methods: BTreeMap<AccessedMember, AccessMask>,
    pub fields: BTreeMap<AccessedMember, AccessMask>,
}

fn access_mask(line_no: usize, token: &str, version: u8) -> Result<AccessMask> {
    let access = match token.strip_prefix("transitive-") {
        Some(rest) => {
            if version < 2 {
                return Err(Error::parse(
                    line_no,
                    "transitive access requires version 2 or later",
                ));
            }
            rest
        }
        None => token,
    };
    match access {
        "accessible" => Ok(AccessMask::ACCESSIBLE),
        "extendable" => Ok(AccessMask::EXTENDABLE),
        "mutable" => Ok(AccessMask::MUTABLE),
        other => Err(Error::parse(line_no, format!("unknown access {other:?}"))),
    }
}

impl AccessWidener {
    pub fn new(version: u8, namespace: impl Into<String>) -> Self {
        AccessWidener {
            version,
            namespace: namespace.into(),
            classes: BTreeMap::new(),
            methods: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate();
        let header = loop {
            let Some((index, line)) = lines.next() else {
                return Err(Error::parse(1, "missing accessWidener header"));
            };
            if !line.trim().is_empty() {
                break (index + 1, line);
            }
        };
        let (header_line_no, header) = header;
        let tokens: Vec<&str> = header.split_whitespace().collect();
        if tokens.len() != 3 || tokens[0] != "accessWidener" {
            return Err(Error::parse(header_line_no, "malformed accessWidener header"));
        }
        let version = match tokens[1] {
            "v1" => 1,
            "v2" => 2,
            other => {
                return Err(Error::parse(
                    header_line_no,
                    format!("unsupported version {other:?}"),
                ))
            }
        };
        let mut widener = AccessWidener::new(version, tokens[2]);

        for (index, raw) in lines {
            let line_no = index + 1;
            let line = raw.split('#').next().unwrap_or("").trim_end();
            if line.trim().is_empty() {
                continue;
            }
            if version >= 2 && line.starts_with(char::is_whitespace) {
                return Err(Error::parse(line_no, "leading whitespace is not allowed"));
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return Err(Error::parse(line_no, format!("malformed record {raw:?}")));
            }
            let mask = access_mask(line_no, tokens[0], version)?;
            match tokens[1] {
                "class" => {
                    if tokens.len() != 3 {
                        return Err(Error::parse(line_no, "class records take one argument"));
                    }
                    if mask == AccessMask::MUTABLE {
                        return Err(Error::parse(line_no, "classes cannot be mutable"));
                    }
                    *widener.classes.entry(tokens[2].to_string()).or_default() |= mask;
                }
                "method" => {
                    if tokens.len() != 5 {
                        return Err(Error::parse(line_no, "method records take three arguments"));
                    }
                    if mask == AccessMask::MUTABLE {
                        return Err(Error::parse(line_no, "methods cannot be mutable"));
                    }
                    let member = AccessedMember {
                        owner: tokens[2].to_string(),
                        name: tokens[3].to_string(),
                        desc: tokens[4].to_string(),
                    };
                    *widener.methods.entry(member).or_default() |= mask;
                }
                "field" => {
                    if tokens.len() != 5 {
                        return Err(Error::parse(line_no, "field records take three arguments"));
                    }
                    if mask == AccessMask::EXTENDABLE {
                        return Err(Error::parse(line_no, "fields cannot be extendable"));
                    }
                    let member = AccessedMember {
                        owner: tokens[2].to_string(),
                        name: tokens[3].to_string(),
                        desc: tokens[4].to_string(),
                    };
                    *widener.fields.entry(member).or_default() |= mask;
                }
                other => {
                    return Err(Error::parse(line_no, format!("unknown target {other:?}")))
                }
            }
        }
        Ok(widener)
    }

    /// Deterministic serialization: classes, then fields, then methods, one
    /// line per set mask bit.
    pub fn write(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!(
            "accessWidener\tv{}\t{}",
            self.version, self.namespace
        ));
        let bits = [
            (AccessMask::ACCESSIBLE, "accessible"),
            (AccessMask::EXTENDABLE, "extendable"),
            (AccessMask::MUTABLE, "mutable"),
        ];
        for (name, mask) in &self.classes {
            for (bit, label) in bits {
                if mask.contains(bit) {
                    lines.push(format!("{label}\tclass\t{name}"));
                }
            }
        }
        for (member, mask) in &self.fields {
            for (bit, label) in bits {
                if mask.contains(bit) {
                    lines.push(format!(
                        "{label}\tfield\t{}\t{}\t{}",
                        member.owner, member.name, member.desc
                    ));
                }
            }
        }
        for (member, mask) in &self.methods {
            for (bit, label) in bits {
                if mask.contains(bit) {
                    lines.push(format!(
                        "{label}\tmethod\t{}\t{}\t{}",
                        member.owner, member.name, member.desc
                    ));
                }
            }
        }
        lines
    }

    /// Pointwise union with `other`; namespaces must agree and the resulting
    /// version is the older of the two.
    pub fn merge(&self, other: &AccessWidener) -> Result<AccessWidener> {
        if self.namespace != other.namespace {
            return Err(Error::Invariant(format!(
                "cannot combine wideners across namespaces {:?} and {:?}",
                self.namespace, other.namespace
            )));
        }
        let mut merged = self.clone();
        merged.version = self.version.min(other.version);
        for (name, mask) in &other.classes {
            *merged.classes.entry(name.clone()).or_default() |= *mask;
        }
        for (member, mask) in &other.methods {
            *merged.methods.entry(member.clone()).or_default() |= *mask;
        }
        for (member, mask) in &other.fields {
            *merged.fields.entry(member.clone()).or_default() |= *mask;
        }
        Ok(merged)
    }

    /// Translate every owner, member name, and descriptor into `to_namespace`.
    /// Member names resolve through the inheritance walk.
    pub fn remap(
        &self,
        mappings: &Mappings,
        to_namespace: &str,
        inheritance: Arc<dyn InheritanceProvider>,
    ) -> Result<AccessWidener> {
        if to_namespace == self.namespace {
            return Ok(self.clone());
        }
        let map = mappings.as_asm_mapping(&self.namespace, to_namespace, true, true)?;
        let remapper = SimpleRemapper::new(map, inheritance);

        let mut remapped = AccessWidener::new(self.version, to_namespace);
        for (name, mask) in &self.classes {
            remapped.classes.insert(remapper.map_class(name), *mask);
        }
        for (member, mask) in &self.methods {
            let name = remapper.map_method_name(&member.owner, &member.name, &member.desc);
            remapped.methods.insert(
                AccessedMember {
                    owner: remapper.map_class(&member.owner),
                    name,
                    desc: remapper.map_method_descriptor(&member.desc)?,
                },
                *mask,
            );
        }
        for (member, mask) in &self.fields {
            let name = remapper.map_method_name(&member.owner, &member.name, &member.desc);
            remapped.fields.insert(
                AccessedMember {
                    owner: remapper.map_class(&member.owner),
                    name,
                    desc: remapper.map_desc(&member.desc)?,
                },
                *mask,
            );
        }
        Ok(remapped)
    }
}

/// Fold [AccessWidener::merge] over the inputs; an empty input set is an
/// error since there is no identity namespace.
pub fn join_all<I>(wideners: I) -> Result<AccessWidener>
where
    I: IntoIterator<Item = AccessWidener>,
{
    let mut inputs = wideners.into_iter();
    let Some(first) = inputs.next() else {
        return Err(Error::Invariant("no access wideners to combine".to_string()));
    };
    inputs.try_fold(first, |merged, next| merged.merge(&next))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::inheritance::TableProvider;
    use crate::mappings::testutil::sample;

    const SAMPLE: &str = "accessWidener\tv2\tofficial\n\
                          accessible\tclass\ta\n\
                          accessible\tmethod\ta\tc\t()Le;\n\
                          extendable\tmethod\ta\tc\t()Le;\n\
                          extendable\tmethod\ta\td\t()Le;\n\
                          mutable\tfield\ta\tb\tLd;\n";

    fn member(owner: &str, name: &str, desc: &str) -> AccessedMember {
        AccessedMember {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }

    #[test]
    fn parse_builds_the_expected_model() {
        let widener = AccessWidener::parse(SAMPLE).expect("parse");
        assert_eq!(widener.version, 2);
        assert_eq!(widener.namespace, "official");
        assert_eq!(widener.classes[&"a".to_string()], AccessMask::ACCESSIBLE);
        assert_eq!(
            widener.methods[&member("a", "c", "()Le;")],
            AccessMask::ACCESSIBLE | AccessMask::EXTENDABLE
        );
        assert_eq!(
            widener.methods[&member("a", "d", "()Le;")],
            AccessMask::EXTENDABLE
        );
        assert_eq!(widener.fields[&member("a", "b", "Ld;")], AccessMask::MUTABLE);
    }

    #[test]
    fn parse_accepts_v1_whitespace_but_not_v2_indentation() {
        let v1 = "accessWidener   v1   official\n   accessible   class   a\n";
        let widener = AccessWidener::parse(v1).expect("v1 parse");
        assert_eq!(widener.version, 1);
        assert!(widener.classes.contains_key("a"));

        let v2 = "accessWidener\tv2\tofficial\n\taccessible\tclass\ta\n";
        let err = AccessWidener::parse(v2).expect_err("v2 indent");
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn parse_rejects_invalid_access_kind_pairs() {
        for record in [
            "mutable\tclass\ta",
            "mutable\tmethod\ta\tc\t()V",
            "extendable\tfield\ta\tb\tI",
        ] {
            let text = format!("accessWidener\tv2\tofficial\n{record}\n");
            assert!(AccessWidener::parse(&text).is_err(), "accepted {record:?}");
        }
    }

    #[test]
    fn transitive_prefix_requires_v2() {
        let v2 = "accessWidener\tv2\tofficial\ntransitive-accessible\tclass\ta\n";
        assert!(AccessWidener::parse(v2).is_ok());
        let v1 = "accessWidener v1 official\ntransitive-accessible class a\n";
        assert!(AccessWidener::parse(v1).is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "accessWidener\tv2\tofficial\n\n# note\naccessible\tclass\ta # trailing\n";
        let widener = AccessWidener::parse(text).expect("parse");
        assert!(widener.classes.contains_key("a"));
    }

    #[test]
    fn duplicates_combine_with_or() {
        let text = "accessWidener\tv2\tofficial\n\
                    accessible\tclass\ta\n\
                    extendable\tclass\ta\n";
        let widener = AccessWidener::parse(text).expect("parse");
        assert_eq!(
            widener.classes[&"a".to_string()],
            AccessMask::ACCESSIBLE | AccessMask::EXTENDABLE
        );
    }

    #[test]
    fn merge_is_associative_and_idempotent() {
        let a = AccessWidener::parse(SAMPLE).expect("a");
        let mut b = AccessWidener::new(2, "official");
        b.classes.insert("d".to_string(), AccessMask::ACCESSIBLE);
        let mut c = AccessWidener::new(1, "official");
        c.fields
            .insert(member("a", "b", "Ld;"), AccessMask::ACCESSIBLE);

        let left = a.merge(&b).expect("ab").merge(&c).expect("abc");
        let right = a.merge(&b.merge(&c).expect("bc")).expect("abc");
        assert_eq!(left, right);
        assert_eq!(left.version, 1);
        assert_eq!(a.merge(&a).expect("aa"), a);
    }

    #[test]
    fn merge_rejects_mismatched_namespaces() {
        let a = AccessWidener::new(2, "official");
        let b = AccessWidener::new(2, "named");
        assert!(a.merge(&b).is_err());
        assert!(join_all(Vec::new()).is_err());
    }

    #[test]
    fn write_is_deterministic_and_round_trips() {
        let widener = AccessWidener::parse(SAMPLE).expect("parse");
        let written = widener.write();
        assert_eq!(written[0], "accessWidener\tv2\tofficial");
        let reparsed =
            AccessWidener::parse(&(written.join("\n") + "\n")).expect("reparse");
        assert_eq!(widener, reparsed);
        assert_eq!(reparsed.write(), written);
    }

    #[test]
    fn remap_translates_owners_names_and_descriptors() {
        let widener = AccessWidener::parse(SAMPLE).expect("parse");
        let mut table = TableProvider::default();
        table.add_class("a", ["java/lang/Object"]);
        let inheritance: Arc<dyn crate::inheritance::InheritanceProvider> = Arc::new(table);

        let same = widener
            .remap(&sample(), "official", inheritance.clone())
            .expect("identity");
        assert_eq!(same, widener);

        let remapped = widener
            .remap(&sample(), "named", inheritance)
            .expect("remap");
        assert_eq!(remapped.namespace, "named");
        assert!(remapped.classes.contains_key("Main"));
        assert_eq!(
            remapped.methods[&member("Main", "action", "()LSomeOtherState;")],
            AccessMask::ACCESSIBLE | AccessMask::EXTENDABLE
        );
        assert_eq!(
            remapped.fields[&member("Main", "state", "LSomeState;")],
            AccessMask::MUTABLE
        );
    }
}
