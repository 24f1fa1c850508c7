use std::collections::BTreeMap;

use crate::widener::{AccessMask, AccessWidener};

/// Member key within one class of the tree.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemberIdentifier {
    pub name: String,
    pub desc: String,
}

/// Per-class view of a widener. Widening a member implies the class itself
/// must become reachable, so member masks propagate upward minus MUTABLE.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessedClass {
    pub mask: AccessMask,
    pub methods: BTreeMap<MemberIdentifier, AccessMask>,
    pub fields: BTreeMap<MemberIdentifier, AccessMask>,
    pub propagated: AccessMask,
}

impl AccessedClass {
    pub fn total(&self) -> AccessMask {
        self.mask | self.propagated
    }
}

/// Widener grouped by owner, ready for class-file application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessWidenerTree {
    pub namespace: String,
    pub classes: BTreeMap<String, AccessedClass>,
}

impl AccessWidener {
    pub fn to_tree(&self) -> AccessWidenerTree {
        let mut classes: BTreeMap<String, AccessedClass> = BTreeMap::new();
        for (name, mask) in &self.classes {
            classes.entry(name.clone()).or_default().mask = *mask;
        }
        for (member, mask) in &self.methods {
            let class = classes.entry(member.owner.clone()).or_default();
            class.methods.insert(
                MemberIdentifier {
                    name: member.name.clone(),
                    desc: member.desc.clone(),
                },
                *mask,
            );
            class.propagated |= *mask & !AccessMask::MUTABLE;
        }
        for (member, mask) in &self.fields {
            let class = classes.entry(member.owner.clone()).or_default();
            class.fields.insert(
                MemberIdentifier {
                    name: member.name.clone(),
                    desc: member.desc.clone(),
                },
                *mask,
            );
            class.propagated |= *mask & !AccessMask::MUTABLE;
        }
        AccessWidenerTree {
            namespace: self.namespace.clone(),
            classes,
        }
    }
}
