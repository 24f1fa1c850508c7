use crate::error::{Error, Result};
use crate::format::{materialize_names, FormatKind, HoleFixup, MappingsFormat};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

/// Tiny v1: a `v1` header naming the namespaces, then flat tab-separated
/// CLASS/FIELD/METHOD records keyed by the first-namespace owner.
pub struct TinyV1Format;

impl MappingsFormat for TinyV1Format {
    fn kind(&self) -> FormatKind {
        FormatKind::TinyV1
    }

    fn detect(&self, lines: &[String]) -> bool {
        let mut non_empty = lines.iter().filter(|line| !line.trim().is_empty());
        let Some(header) = non_empty.next() else {
            return false;
        };
        if !header.starts_with("v1\t") {
            return false;
        }
        // Every data line must be a known record; whitespace-only lines are
        // tolerated above.
        non_empty.all(|line| {
            line.starts_with("CLASS\t") || line.starts_with("FIELD\t") || line.starts_with("METHOD\t")
        })
    }

    fn parse_lines(
        &self,
        lines: &mut dyn Iterator<Item = std::io::Result<String>>,
    ) -> Result<Mappings> {
        let mut namespaces: Vec<String> = Vec::new();
        let mut fixup = HoleFixup::default();
        let mut header_seen = false;

        for (index, line) in lines.enumerate() {
            let line_no = index + 1;
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split('\t').collect();
            if !header_seen {
                if tokens[0] != "v1" || tokens.len() < 3 {
                    return Err(Error::parse(line_no, "missing tiny v1 header"));
                }
                namespaces = tokens[1..].iter().map(|s| s.to_string()).collect();
                header_seen = true;
                continue;
            }
            let width = namespaces.len();
            match tokens[0] {
                "CLASS" => {
                    if tokens.len() != width + 1 {
                        return Err(Error::parse(
                            line_no,
                            format!("expected {width} class names, got {}", tokens.len() - 1),
                        ));
                    }
                    let mut names: Vec<String> =
                        tokens[1..].iter().map(|s| s.to_string()).collect();
                    materialize_names(&mut names);
                    fixup.add_class(MappedClass::new(names));
                }
                "FIELD" => {
                    if tokens.len() != width + 3 {
                        return Err(Error::parse(line_no, format!("bad field line {line:?}")));
                    }
                    let mut names: Vec<String> =
                        tokens[3..].iter().map(|s| s.to_string()).collect();
                    materialize_names(&mut names);
                    fixup.add_field(
                        tokens[1],
                        MappedField {
                            names,
                            comments: Vec::new(),
                            desc: Some(tokens[2].to_string()),
                        },
                    );
                }
                "METHOD" => {
                    if tokens.len() != width + 3 {
                        return Err(Error::parse(line_no, format!("bad method line {line:?}")));
                    }
                    let mut names: Vec<String> =
                        tokens[3..].iter().map(|s| s.to_string()).collect();
                    materialize_names(&mut names);
                    fixup.add_method(
                        tokens[1],
                        MappedMethod {
                            names,
                            comments: Vec::new(),
                            desc: tokens[2].to_string(),
                            parameters: Vec::new(),
                            variables: Vec::new(),
                        },
                    );
                }
                other => {
                    return Err(Error::parse(
                        line_no,
                        format!("unknown record type {other:?}"),
                    ))
                }
            }
        }
        if !header_seen {
            return Err(Error::parse(1, "missing tiny v1 header"));
        }
        let width = namespaces.len();
        let mappings = Mappings {
            namespaces,
            classes: fixup.finish(width),
            metadata: FormatMetadata::TinyV1,
        };
        mappings.validate(true)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(1 + mappings.classes.len());
        lines.push(format!("v1\t{}", mappings.namespaces.join("\t")));
        for class in &mappings.classes {
            let owner = &class.names[0];
            lines.push(format!("CLASS\t{}", class.names.join("\t")));
            for field in &class.fields {
                let desc = field.desc.as_deref().ok_or_else(|| {
                    Error::Invariant(format!(
                        "field {}.{} has no descriptor for tiny output",
                        owner, field.names[0]
                    ))
                })?;
                lines.push(format!("FIELD\t{owner}\t{desc}\t{}", field.names.join("\t")));
            }
            for method in &class.methods {
                lines.push(format!(
                    "METHOD\t{owner}\t{}\t{}",
                    method.desc,
                    method.names.join("\t")
                ));
            }
        }
        Ok(lines)
    }
}
