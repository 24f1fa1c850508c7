use crate::error::{Error, Result};
use crate::format::{FormatKind, HoleFixup, MappingsFormat};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

/// CSRG: whitespace-separated records whose arity decides the kind. The
/// shape is too plain to sniff, so the format must be selected explicitly.
pub struct CsrgFormat;

impl MappingsFormat for CsrgFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Csrg
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
                2 => fixup.add_class(MappedClass::new(vec![
                    tokens[0].to_string(),
                    tokens[1].to_string(),
                ])),
                3 => fixup.add_field(
                    tokens[0],
                    MappedField {
                        names: vec![tokens[1].to_string(), tokens[2].to_string()],
                        comments: Vec::new(),
                        desc: None,
                    },
                ),
                4 => fixup.add_method(
                    tokens[0],
                    MappedMethod {
                        names: vec![tokens[1].to_string(), tokens[3].to_string()],
                        comments: Vec::new(),
                        desc: tokens[2].to_string(),
                        parameters: Vec::new(),
                        variables: Vec::new(),
                    },
                ),
                arity => {
                    return Err(Error::parse(
                        line_no,
                        format!("unexpected arity {arity} in {line:?}"),
                    ))
                }
            }
        }
        let mappings = Mappings {
            namespaces: vec!["obf".to_string(), "srg".to_string()],
            classes: fixup.finish(2),
            metadata: FormatMetadata::Csrg,
        };
        mappings.validate(false)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        if mappings.namespaces.len() != 2 {
            return Err(Error::Invariant(format!(
                "csrg supports exactly two namespaces, got {}",
                mappings.namespaces.len()
            )));
        }
        let mut lines = Vec::new();
        for class in &mappings.classes {
            let obf = &class.names[0];
            lines.push(format!("{obf} {}", class.names[1]));
            for field in &class.fields {
                lines.push(format!("{obf} {} {}", field.names[0], field.names[1]));
            }
            for method in &class.methods {
                lines.push(format!(
                    "{obf} {} {} {}",
                    method.names[0], method.desc, method.names[1]
                ));
            }
        }
        Ok(lines)
    }
}
