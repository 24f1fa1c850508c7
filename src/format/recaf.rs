use crate::error::{Error, Result};
use crate::format::{FormatKind, HoleFixup, MappingsFormat};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

/// Recaf's flat mapping lines: `owner.name(desc) mapped` for methods,
/// `owner.name desc mapped` for fields, `owner mapped` for classes. Like
/// CSRG it has no sniffable shape.
pub struct RecafFormat;

fn split_owner(line_no: usize, path: &str) -> Result<(String, String)> {
    path.rsplit_once('.')
        .map(|(owner, name)| (owner.to_string(), name.to_string()))
        .ok_or_else(|| Error::parse(line_no, format!("member path {path:?} has no owner")))
}

impl MappingsFormat for RecafFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Recaf
    }

    fn parse_lines(
        &self,
        lines: &mut dyn Iterator<Item = std::io::Result<String>>,
    ) -> Result<Mappings> {
        let mut fixup = HoleFixup::default();
        for (index, line) in lines.enumerate() {
            let line_no = index + 1;
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.len() {
                2 if tokens[0].contains('(') => {
                    let (path, desc) = tokens[0]
                        .split_once('(')
                        .ok_or_else(|| Error::parse(line_no, format!("bad method {line:?}")))?;
                    let desc = format!("({desc}");
                    let (owner, name) = split_owner(line_no, path)?;
                    fixup.add_method(
                        &owner,
                        MappedMethod {
                            names: vec![name, tokens[1].to_string()],
                            comments: Vec::new(),
                            desc,
                            parameters: Vec::new(),
                            variables: Vec::new(),
                        },
                    );
                }
                2 => fixup.add_class(MappedClass::new(vec![
                    tokens[0].to_string(),
                    tokens[1].to_string(),
                ])),
                3 => {
                    let (owner, name) = split_owner(line_no, tokens[0])?;
                    fixup.add_field(
                        &owner,
                        MappedField {
                            names: vec![name, tokens[2].to_string()],
                            comments: Vec::new(),
                            desc: Some(tokens[1].to_string()),
                        },
                    );
                }
                arity => {
                    return Err(Error::parse(
                        line_no,
                        format!("unexpected arity {arity} in {line:?}"),
                    ))
                }
            }
        }
        let mappings = Mappings {
            namespaces: vec!["obf".to_string(), "named".to_string()],
            classes: fixup.finish(2),
            metadata: FormatMetadata::Recaf,
        };
        mappings.validate(true)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        if mappings.namespaces.len() != 2 {
            return Err(Error::Invariant(format!(
                "recaf supports exactly two namespaces, got {}",
                mappings.namespaces.len()
            )));
        }
        let mut lines = Vec::new();
        for class in &mappings.classes {
            let obf = &class.names[0];
            lines.push(format!("{obf} {}", class.names[1]));
            for field in &class.fields {
                let desc = field.desc.as_deref().ok_or_else(|| {
                    Error::Invariant(format!(
                        "field {}.{} has no descriptor for recaf output",
                        obf, field.names[0]
                    ))
                })?;
                lines.push(format!("{obf}.{} {desc} {}", field.names[0], field.names[1]));
            }
            for method in &class.methods {
                lines.push(format!(
                    "{obf}.{}{} {}",
                    method.names[0], method.desc, method.names[1]
                ));
            }
        }
        Ok(lines)
    }
}
