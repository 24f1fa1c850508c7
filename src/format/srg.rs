use crate::descriptor::map_type;
use crate::error::{Error, Result};
use crate::format::{FormatKind, HoleFixup, MappingsFormat};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

const NAMESPACES: [&str; 2] = ["obf", "srg"];

/// SRG and XSRG; the extended variant carries owner-qualified field
/// descriptors on `FD:` lines.
pub struct SrgFormat {
    extended: bool,
}

impl SrgFormat {
    pub fn srg() -> Self {
        SrgFormat { extended: false }
    }

    pub fn xsrg() -> Self {
        SrgFormat { extended: true }
    }
}

fn split_member_path(line_no: usize, path: &str) -> Result<(String, String)> {
    path.rsplit_once('/')
        .map(|(owner, name)| (owner.to_string(), name.to_string()))
        .ok_or_else(|| Error::parse(line_no, format!("member path {path:?} has no owner")))
}

fn looks_like_srg(lines: &[String]) -> bool {
    let Some(first) = lines.iter().find(|line| !line.trim().is_empty()) else {
        return false;
    };
    ["PK: ", "CL: ", "FD: ", "MD: "]
        .iter()
        .any(|prefix| first.starts_with(prefix))
}

/// Token count of the first `FD:` line, used to split SRG from XSRG.
fn first_fd_arity(lines: &[String]) -> Option<usize> {
    lines
        .iter()
        .find(|line| line.starts_with("FD: "))
        .map(|line| line.split_whitespace().count())
}

impl MappingsFormat for SrgFormat {
    fn kind(&self) -> FormatKind {
        if self.extended {
            FormatKind::Xsrg
        } else {
            FormatKind::Srg
        }
    }

    fn detect(&self, lines: &[String]) -> bool {
        if !looks_like_srg(lines) {
            return false;
        }
        match first_fd_arity(lines) {
            Some(5) => self.extended,
            Some(_) => !self.extended,
            None => !self.extended,
        }
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
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens[0] {
                "PK:" => {}
                "CL:" => {
                    if tokens.len() != 3 {
                        return Err(Error::parse(line_no, format!("bad class line {line:?}")));
                    }
                    fixup.add_class(MappedClass::new(vec![
                        tokens[1].to_string(),
                        tokens[2].to_string(),
                    ]));
                }
                "FD:" => {
                    let (owner, field) = match (self.extended, tokens.len()) {
                        (false, 3) => {
                            let (owner, name) = split_member_path(line_no, tokens[1])?;
                            let (_, mapped) = split_member_path(line_no, tokens[2])?;
                            (
                                owner,
                                MappedField {
                                    names: vec![name, mapped],
                                    comments: Vec::new(),
                                    desc: None,
                                },
                            )
                        }
                        (true, 5) => {
                            let (owner, name) = split_member_path(line_no, tokens[1])?;
                            let (_, mapped) = split_member_path(line_no, tokens[3])?;
                            (
                                owner,
                                MappedField {
                                    names: vec![name, mapped],
                                    comments: Vec::new(),
                                    desc: Some(tokens[2].to_string()),
                                },
                            )
                        }
                        _ => {
                            return Err(Error::parse(line_no, format!("bad field line {line:?}")))
                        }
                    };
                    fixup.add_field(&owner, field);
                }
                "MD:" => {
                    if tokens.len() != 5 {
                        return Err(Error::parse(line_no, format!("bad method line {line:?}")));
                    }
                    let (owner, name) = split_member_path(line_no, tokens[1])?;
                    let (_, mapped) = split_member_path(line_no, tokens[3])?;
                    fixup.add_method(
                        &owner,
                        MappedMethod {
                            names: vec![name, mapped],
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
        let mappings = Mappings {
            namespaces: NAMESPACES.map(str::to_string).to_vec(),
            classes: fixup.finish(NAMESPACES.len()),
            metadata: FormatMetadata::Srg {
                extended: self.extended,
            },
        };
        mappings.validate(self.extended)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        if mappings.namespaces.len() != 2 {
            return Err(Error::Invariant(format!(
                "srg supports exactly two namespaces, got {}",
                mappings.namespaces.len()
            )));
        }
        let rename = mappings.class_name_map(0, 1);
        let mut lines = Vec::new();
        for class in &mappings.classes {
            let (obf, mapped) = (&class.names[0], &class.names[1]);
            lines.push(format!("CL: {obf} {mapped}"));
            for field in &class.fields {
                if self.extended {
                    let desc = field.desc.as_deref().ok_or_else(|| {
                        Error::Invariant(format!(
                            "field {}.{} has no descriptor for xsrg output",
                            obf, field.names[0]
                        ))
                    })?;
                    let mapped_desc = map_type(desc, &rename)?;
                    lines.push(format!(
                        "FD: {obf}/{} {desc} {mapped}/{} {mapped_desc}",
                        field.names[0], field.names[1]
                    ));
                } else {
                    lines.push(format!(
                        "FD: {obf}/{} {mapped}/{}",
                        field.names[0], field.names[1]
                    ));
                }
            }
            for method in &class.methods {
                let mapped_desc = crate::descriptor::map_method_desc(&method.desc, &rename)?;
                lines.push(format!(
                    "MD: {obf}/{} {} {mapped}/{} {mapped_desc}",
                    method.names[0], method.desc, method.names[1]
                ));
            }
        }
        Ok(lines)
    }
}
