use std::collections::HashMap;

use indexmap::IndexMap;

use crate::descriptor::{map_method_desc, map_type};
use crate::error::{Error, Result};
use crate::inheritance::{parents, InheritanceProvider};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

/// Source of field descriptors for [Mappings::recover_field_descriptors],
/// keyed by owner internal name and field name in the first namespace.
pub trait FieldDescSource {
    fn field_desc(&self, owner: &str, name: &str) -> Option<String>;
}

impl FieldDescSource for HashMap<(String, String), String> {
    fn field_desc(&self, owner: &str, name: &str) -> Option<String> {
        self.get(&(owner.to_string(), name.to_string())).cloned()
    }
}

/// Method signatures that never carry mapping information of their own.
fn is_data_method(name: &str, desc: &str) -> bool {
    matches!(
        (name, desc),
        ("<init>", _)
            | ("<clinit>", _)
            | ("equals", "(Ljava/lang/Object;)Z")
            | ("hashCode", "()I")
            | ("toString", "()Ljava/lang/String;")
    )
}

/// Where an output namespace column of a join takes its names from.
enum JoinSource {
    Left(usize),
    Intermediate,
    Right(usize),
}

impl Mappings {
    /// Replace namespace labels, keeping every name column in place.
    pub fn rename_namespaces<S: AsRef<str>>(&self, to: &[S]) -> Result<Mappings> {
        if to.len() != self.namespaces.len() {
            return Err(Error::Invariant(format!(
                "expected {} namespace labels, got {}",
                self.namespaces.len(),
                to.len()
            )));
        }
        let mut renamed = self.clone();
        renamed.namespaces = to.iter().map(|label| label.as_ref().to_string()).collect();
        Ok(renamed)
    }

    /// Select and permute namespace columns. Descriptors are rewritten to the
    /// first namespace of the new order.
    pub fn reorder_namespaces<S: AsRef<str>>(&self, order: &[S]) -> Result<Mappings> {
        let indices = order
            .iter()
            .map(|name| self.namespace_index(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.select_namespaces(&indices)
    }

    /// Keep only the namespace positions named in `allowed`; when
    /// `allow_duplicates` is false the first occurrence of a label wins.
    pub fn filter_namespaces<S: AsRef<str>>(
        &self,
        allowed: &[S],
        allow_duplicates: bool,
    ) -> Result<Mappings> {
        let allowed: Vec<&str> = allowed.iter().map(AsRef::as_ref).collect();
        let mut kept = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for (index, namespace) in self.namespaces.iter().enumerate() {
            if !allowed.contains(&namespace.as_str()) {
                continue;
            }
            if !allow_duplicates && seen.contains(&namespace.as_str()) {
                continue;
            }
            seen.push(namespace);
            kept.push(index);
        }
        self.select_namespaces(&kept)
    }

    /// Drop repeated namespace labels, keeping each first occurrence.
    pub fn deduplicate_namespaces(&self) -> Result<Mappings> {
        let labels: Vec<&str> = self.namespaces.iter().map(String::as_str).collect();
        self.filter_namespaces(&labels, false)
    }

    /// Two-column view `[from, to]`.
    pub fn extract_namespaces(&self, from: &str, to: &str) -> Result<Mappings> {
        self.reorder_namespaces(&[from, to])
    }

    fn select_namespaces(&self, indices: &[usize]) -> Result<Mappings> {
        let rename = match indices.first() {
            Some(&first) => self.class_name_map(0, first),
            None => HashMap::new(),
        };
        let pick = |names: &[String]| -> Vec<String> {
            indices.iter().map(|&index| names[index].clone()).collect()
        };
        let mut classes = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let mut fields = Vec::with_capacity(class.fields.len());
            for field in &class.fields {
                let desc = match &field.desc {
                    Some(desc) => Some(map_type(desc, &rename)?.into_owned()),
                    None => None,
                };
                fields.push(MappedField {
                    names: pick(&field.names),
                    comments: field.comments.clone(),
                    desc,
                });
            }
            let mut methods = Vec::with_capacity(class.methods.len());
            for method in &class.methods {
                methods.push(MappedMethod {
                    names: pick(&method.names),
                    comments: method.comments.clone(),
                    desc: map_method_desc(&method.desc, &rename)?.into_owned(),
                    parameters: method
                        .parameters
                        .iter()
                        .map(|parameter| {
                            let mut parameter = parameter.clone();
                            parameter.names = pick(&parameter.names);
                            parameter
                        })
                        .collect(),
                    variables: method
                        .variables
                        .iter()
                        .map(|variable| {
                            let mut variable = variable.clone();
                            variable.names = pick(&variable.names);
                            variable
                        })
                        .collect(),
                });
            }
            classes.push(MappedClass {
                names: pick(&class.names),
                comments: class.comments.clone(),
                fields,
                methods,
            });
        }
        Ok(Mappings {
            namespaces: indices
                .iter()
                .map(|&index| self.namespaces[index].clone())
                .collect(),
            classes,
            metadata: FormatMetadata::Generic,
        })
    }

    /// Align `self` and `other` on the `intermediate` namespace and union
    /// their entries. Parameter and local-variable info is not merged.
    pub fn join(&self, other: &Mappings, intermediate: &str, require_match: bool) -> Result<Mappings> {
        let left_inter = self.namespace_index(intermediate)?;
        let right_inter = other.namespace_index(intermediate)?;

        let mut namespaces = Vec::new();
        let mut sources = Vec::new();
        for (index, namespace) in self.namespaces.iter().enumerate() {
            if namespace == intermediate || namespaces.contains(namespace) {
                continue;
            }
            namespaces.push(namespace.clone());
            sources.push(JoinSource::Left(index));
        }
        namespaces.push(intermediate.to_string());
        sources.push(JoinSource::Intermediate);
        let left_width = namespaces.len();
        for (index, namespace) in other.namespaces.iter().enumerate() {
            if namespace == intermediate || namespaces[left_width - 1..].contains(namespace) {
                continue;
            }
            namespaces.push(namespace.clone());
            sources.push(JoinSource::Right(index));
        }

        let build_names = |inter: &str,
                           left: Option<&[String]>,
                           right: Option<&[String]>|
         -> Vec<String> {
            sources
                .iter()
                .map(|source| match source {
                    JoinSource::Left(index) => left
                        .map(|names| names[*index].clone())
                        .unwrap_or_else(|| inter.to_string()),
                    JoinSource::Intermediate => inter.to_string(),
                    JoinSource::Right(index) => right
                        .map(|names| names[*index].clone())
                        .unwrap_or_else(|| inter.to_string()),
                })
                .collect()
        };

        let mut table: IndexMap<&str, (Option<&MappedClass>, Option<&MappedClass>)> =
            IndexMap::new();
        for class in &self.classes {
            table.entry(class.names[left_inter].as_str()).or_default().0 = Some(class);
        }
        for class in &other.classes {
            table.entry(class.names[right_inter].as_str()).or_default().1 = Some(class);
        }
        if require_match {
            for (name, (left, right)) in &table {
                if left.is_none() || right.is_none() {
                    return Err(Error::Invariant(format!(
                        "class {name} is present on only one side of the join"
                    )));
                }
            }
        }

        let left_to_inter = self.class_name_map(0, left_inter);
        let right_to_inter = other.class_name_map(0, right_inter);
        let mut inter_to_first = HashMap::new();
        for (inter, (left, right)) in &table {
            let first = match &sources[0] {
                JoinSource::Left(index) => left.map(|class| class.names[*index].clone()),
                JoinSource::Intermediate => None,
                JoinSource::Right(index) => right.map(|class| class.names[*index].clone()),
            };
            if let Some(first) = first {
                if !first.is_empty() && first != **inter {
                    inter_to_first.insert((*inter).to_string(), first);
                }
            }
        }

        let field_desc = |desc: &Option<String>, to_inter: &HashMap<String, String>| -> Result<Option<String>> {
            match desc {
                Some(desc) => {
                    let inter = map_type(desc, to_inter)?;
                    Ok(Some(map_type(&inter, &inter_to_first)?.into_owned()))
                }
                None => Ok(None),
            }
        };
        let method_desc = |desc: &str, to_inter: &HashMap<String, String>| -> Result<String> {
            let inter = map_method_desc(desc, to_inter)?;
            Ok(map_method_desc(&inter, &inter_to_first)?.into_owned())
        };

        let mut classes = Vec::with_capacity(table.len());
        for (inter, (left, right)) in &table {
            let mut comments = Vec::new();
            if let Some(left) = left {
                comments.extend(left.comments.iter().cloned());
            }
            if let Some(right) = right {
                comments.extend(right.comments.iter().cloned());
            }

            let mut fields: IndexMap<&str, (Option<&MappedField>, Option<&MappedField>)> =
                IndexMap::new();
            if let Some(left) = left {
                for field in &left.fields {
                    fields.entry(field.names[left_inter].as_str()).or_default().0 = Some(field);
                }
            }
            if let Some(right) = right {
                for field in &right.fields {
                    fields.entry(field.names[right_inter].as_str()).or_default().1 = Some(field);
                }
            }

            let mut methods: IndexMap<(String, String), (Option<&MappedMethod>, Option<&MappedMethod>)> =
                IndexMap::new();
            if let Some(left) = left {
                for method in &left.methods {
                    let desc = map_method_desc(&method.desc, &left_to_inter)?.into_owned();
                    methods
                        .entry((method.names[left_inter].clone(), desc))
                        .or_default()
                        .0 = Some(method);
                }
            }
            if let Some(right) = right {
                for method in &right.methods {
                    let desc = map_method_desc(&method.desc, &right_to_inter)?.into_owned();
                    methods
                        .entry((method.names[right_inter].clone(), desc))
                        .or_default()
                        .1 = Some(method);
                }
            }

            if require_match {
                for (name, (left, right)) in &fields {
                    if left.is_none() || right.is_none() {
                        return Err(Error::Invariant(format!(
                            "field {inter}.{name} is present on only one side of the join"
                        )));
                    }
                }
                for ((name, desc), (left, right)) in &methods {
                    if left.is_none() || right.is_none() {
                        return Err(Error::Invariant(format!(
                            "method {inter}.{name}{desc} is present on only one side of the join"
                        )));
                    }
                }
            }

            let mut joined_fields = Vec::with_capacity(fields.len());
            for (field_inter, (left_field, right_field)) in &fields {
                let mut comments = Vec::new();
                if let Some(field) = left_field {
                    comments.extend(field.comments.iter().cloned());
                }
                if let Some(field) = right_field {
                    comments.extend(field.comments.iter().cloned());
                }
                let desc = match (left_field, right_field) {
                    (Some(field), _) if field.desc.is_some() => {
                        field_desc(&field.desc, &left_to_inter)?
                    }
                    (_, Some(field)) => field_desc(&field.desc, &right_to_inter)?,
                    (Some(field), None) => field_desc(&field.desc, &left_to_inter)?,
                    (None, None) => None,
                };
                joined_fields.push(MappedField {
                    names: build_names(
                        field_inter,
                        left_field.map(|field| field.names.as_slice()),
                        right_field.map(|field| field.names.as_slice()),
                    ),
                    comments,
                    desc,
                });
            }

            let mut joined_methods = Vec::with_capacity(methods.len());
            for ((method_inter, _), (left_method, right_method)) in &methods {
                let mut comments = Vec::new();
                if let Some(method) = left_method {
                    comments.extend(method.comments.iter().cloned());
                }
                if let Some(method) = right_method {
                    comments.extend(method.comments.iter().cloned());
                }
                let desc = match (left_method, right_method) {
                    (Some(method), _) => method_desc(&method.desc, &left_to_inter)?,
                    (None, Some(method)) => method_desc(&method.desc, &right_to_inter)?,
                    (None, None) => unreachable!("method table entries have at least one side"),
                };
                joined_methods.push(MappedMethod {
                    names: build_names(
                        method_inter,
                        left_method.map(|method| method.names.as_slice()),
                        right_method.map(|method| method.names.as_slice()),
                    ),
                    comments,
                    desc,
                    parameters: Vec::new(),
                    variables: Vec::new(),
                });
            }

            classes.push(MappedClass {
                names: build_names(
                    inter,
                    left.map(|class| class.names.as_slice()),
                    right.map(|class| class.names.as_slice()),
                ),
                comments,
                fields: joined_fields,
                methods: joined_methods,
            });
        }

        Ok(Mappings {
            namespaces,
            classes,
            metadata: FormatMetadata::Generic,
        })
    }

    /// Fill in missing field descriptors from `source`; fields whose
    /// descriptor cannot be recovered are dropped.
    pub fn recover_field_descriptors<S: FieldDescSource>(&self, source: &S) -> Mappings {
        let mut recovered = self.clone();
        for class in &mut recovered.classes {
            let owner = class.names[0].clone();
            class.fields.retain_mut(|field| {
                if field.desc.is_some() {
                    return true;
                }
                match source.field_desc(&owner, &field.names[0]) {
                    Some(desc) => {
                        field.desc = Some(desc);
                        true
                    }
                    None => false,
                }
            });
        }
        recovered
    }

    /// Drop method mappings that merely restate an inherited signature, plus
    /// constructors and the data methods every class declares.
    pub fn remove_redundancy<P: InheritanceProvider + ?Sized>(&self, provider: &P) -> Mappings {
        let mut trimmed = self.clone();
        for class in &mut trimmed.classes {
            let owner = class.names[0].clone();
            let local: Vec<String> = provider.declared_methods(&owner, false);
            let mut inherited: Vec<String> = Vec::new();
            for parent in parents(provider, &owner) {
                inherited.extend(provider.declared_methods(&parent, true));
            }
            class.methods.retain(|method| {
                let key = format!("{}{}", method.names[0], method.desc);
                local.contains(&key)
                    && !inherited.contains(&key)
                    && !is_data_method(&method.names[0], &method.desc)
            });
        }
        trimmed
    }

    /// Structural map over classes.
    pub fn map_classes(&self, mut f: impl FnMut(MappedClass) -> MappedClass) -> Mappings {
        let mut mapped = self.clone();
        mapped.classes = mapped.classes.into_iter().map(&mut f).collect();
        mapped
    }

    /// Structural filter over classes.
    pub fn filter_classes(&self, mut predicate: impl FnMut(&MappedClass) -> bool) -> Mappings {
        let mut filtered = self.clone();
        filtered.classes.retain(|class| predicate(class));
        filtered
    }
}

/// Left fold of [Mappings::join] over non-empty inputs; an empty iterator
/// yields the empty mappings.
pub fn join_all<I>(mappings: I, intermediate: &str, require_match: bool) -> Result<Mappings>
where
    I: IntoIterator<Item = Mappings>,
{
    let mut inputs = mappings.into_iter().filter(|value| !value.is_empty());
    let Some(first) = inputs.next() else {
        return Ok(Mappings::empty());
    };
    inputs.try_fold(first, |joined, next| {
        joined.join(&next, intermediate, require_match)
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mappings::testutil::*;

    #[test]
    fn reorder_identity_is_identity() {
        let mappings = sample();
        let labels: Vec<&str> = mappings.namespaces.iter().map(String::as_str).collect();
        assert_eq!(mappings.reorder_namespaces(&labels).expect("reorder"), mappings);
    }

    #[test]
    fn reorder_swaps_columns_and_descriptors() {
        let mappings = sample();
        let swapped = mappings
            .reorder_namespaces(&["named", "official"])
            .expect("reorder");
        assert_eq!(swapped.namespaces, names(&["named", "official"]));
        assert_eq!(swapped.classes[0].names, names(&["Main", "a"]));
        assert_eq!(
            swapped.classes[0].fields[0].desc.as_deref(),
            Some("LSomeState;")
        );
        assert_eq!(swapped.classes[0].methods[0].desc, "()LSomeOtherState;");
    }

    #[test]
    fn reorder_fails_on_unknown_namespace() {
        assert!(sample().reorder_namespaces(&["named", "intermediary"]).is_err());
    }

    #[test]
    fn filter_full_set_equals_dedup() {
        let mappings = sample();
        let labels: Vec<&str> = mappings.namespaces.iter().map(String::as_str).collect();
        assert_eq!(
            mappings.filter_namespaces(&labels, false).expect("filter"),
            mappings.deduplicate_namespaces().expect("dedup")
        );
    }

    #[test]
    fn filter_first_occurrence_wins() {
        let mappings = sample()
            .rename_namespaces(&["official", "official"])
            .expect("rename");
        let filtered = mappings
            .filter_namespaces(&["official"], false)
            .expect("filter");
        assert_eq!(filtered.namespaces, names(&["official"]));
        assert_eq!(filtered.classes[0].names, names(&["a"]));
        let kept = mappings
            .filter_namespaces(&["official"], true)
            .expect("filter");
        assert_eq!(kept.namespaces, names(&["official", "official"]));
    }

    #[test]
    fn extract_is_two_column_reorder() {
        let mappings = sample();
        let extracted = mappings.extract_namespaces("named", "official").expect("extract");
        assert_eq!(
            extracted,
            mappings.reorder_namespaces(&["named", "official"]).expect("reorder")
        );
    }

    #[test]
    fn join_with_self_on_first_namespace_is_identity_after_dedup() {
        let mappings = sample();
        let joined = mappings
            .join(&mappings, "official", true)
            .expect("join")
            .deduplicate_namespaces()
            .expect("dedup");
        // The join anchors the intermediate column differently, so compare
        // against the same reordering of the original.
        let expected = mappings
            .reorder_namespaces(&["named", "official"])
            .expect("reorder");
        let expected = Mappings {
            namespaces: expected.namespaces.clone(),
            classes: expected
                .classes
                .iter()
                .map(|class| {
                    let mut class = class.clone();
                    for method in &mut class.methods {
                        method.parameters.clear();
                        method.variables.clear();
                    }
                    class
                })
                .collect(),
            metadata: FormatMetadata::Generic,
        };
        assert_eq!(joined, expected);
    }

    #[test]
    fn join_aligns_through_shared_intermediate() {
        // official <-> intermediary, then intermediary <-> named.
        let mut left_class = class(&["a", "class_a"]);
        left_class.fields.push(field(&["b", "field_b"], Some("La;")));
        left_class
            .methods
            .push(method(&["c", "method_c"], "()La;"));
        let left = Mappings::new(
            names(&["official", "intermediary"]),
            vec![left_class],
        )
        .expect("left");

        let mut right_class = class(&["class_a", "Main"]);
        right_class
            .fields
            .push(field(&["field_b", "state"], Some("Lclass_a;")));
        right_class
            .methods
            .push(method(&["method_c", "action"], "()Lclass_a;"));
        let right = Mappings::new(
            names(&["intermediary", "named"]),
            vec![right_class],
        )
        .expect("right");

        let joined = left.join(&right, "intermediary", true).expect("join");
        assert_eq!(
            joined.namespaces,
            names(&["official", "intermediary", "named"])
        );
        let class = &joined.classes[0];
        assert_eq!(class.names, names(&["a", "class_a", "Main"]));
        assert_eq!(class.fields[0].names, names(&["b", "field_b", "state"]));
        // Descriptor re-anchored to the output's first namespace.
        assert_eq!(class.fields[0].desc.as_deref(), Some("La;"));
        assert_eq!(class.methods[0].desc, "()La;");
        assert_eq!(
            class.methods[0].names,
            names(&["c", "method_c", "action"])
        );
    }

    #[test]
    fn join_require_match_rejects_one_sided_classes() {
        let left = Mappings::new(names(&["official", "intermediary"]), vec![class(&["a", "x"])])
            .expect("left");
        let right = Mappings::new(
            names(&["intermediary", "named"]),
            vec![class(&["y", "Main"])],
        )
        .expect("right");
        assert!(left.join(&right, "intermediary", true).is_err());
        assert!(left.join(&right, "intermediary", false).is_ok());
    }

    #[test]
    fn join_concatenates_comments_self_first() {
        let mut left = sample();
        left.classes[0].comments.push("from self".to_string());
        let mut right = sample();
        right.classes[0].comments.push("from other".to_string());
        let joined = left.join(&right, "official", true).expect("join");
        let class = joined
            .classes
            .iter()
            .find(|class| class.names.contains(&"a".to_string()))
            .expect("class a");
        assert_eq!(class.comments, names(&["from self", "from other"]));
    }

    #[test]
    fn join_all_of_nothing_is_empty() {
        let joined = join_all(Vec::new(), "official", false).expect("join");
        assert!(joined.is_empty());
    }

    #[test]
    fn join_all_skips_empty_inputs() {
        let mappings = sample();
        let joined = join_all(
            vec![Mappings::empty(), mappings.clone(), Mappings::empty()],
            "official",
            false,
        )
        .expect("join");
        assert_eq!(joined.classes.len(), mappings.classes.len());
    }

    #[test]
    fn recover_field_descriptors_fills_and_drops() {
        let mut mappings = sample();
        mappings.classes[0].fields[0].desc = None;
        mappings.classes[0]
            .fields
            .push(field(&["gone", "alsoGone"], None));
        let mut source = HashMap::new();
        source.insert(("a".to_string(), "b".to_string()), "Ld;".to_string());
        let recovered = mappings.recover_field_descriptors(&source);
        assert_eq!(recovered.classes[0].fields.len(), 1);
        assert_eq!(recovered.classes[0].fields[0].desc.as_deref(), Some("Ld;"));
    }

    #[test]
    fn remove_redundancy_keeps_only_new_declarations() {
        use crate::inheritance::TableProvider;

        let mut mappings = sample();
        mappings.classes[0]
            .methods
            .push(method(&["inherited", "inheritedNamed"], "()V"));
        mappings.classes[0]
            .methods
            .push(method(&["undeclared", "undeclaredNamed"], "()V"));
        mappings.classes[0]
            .methods
            .push(method(&["toString", "toString"], "()Ljava/lang/String;"));

        let mut table = TableProvider::default();
        table.add_class("a", ["base"]);
        table.add_class("base", ["java/lang/Object"]);
        table.add_method("a", "c()Le;", 0x0002);
        table.add_method("a", "d()Le;", 0x0001);
        table.add_method("a", "inherited()V", 0x0001);
        table.add_method("a", "toString()Ljava/lang/String;", 0x0001);
        table.add_method("base", "inherited()V", 0x0001);

        let trimmed = mappings.remove_redundancy(&table);
        let kept: Vec<&str> = trimmed.classes[0]
            .methods
            .iter()
            .map(|method| method.names[0].as_str())
            .collect();
        // `c` and `d` are declared here and nowhere above; `inherited`
        // restates a supertype signature, `undeclared` does not exist, and
        // `toString` is a data method.
        assert_eq!(kept, vec!["c", "d"]);
    }

    #[test]
    fn map_and_filter_classes() {
        let mappings = sample();
        let upper = mappings.map_classes(|mut class| {
            class.names[1] = class.names[1].to_uppercase();
            class
        });
        assert_eq!(upper.classes[0].names[1], "MAIN");
        let only_main = mappings.filter_classes(|class| class.names[1] == "Main");
        assert_eq!(only_main.classes.len(), 1);
    }
}
