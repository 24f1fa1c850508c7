use crate::error::{Error, Result};
use crate::format::{materialize_names, tab_depth, FormatKind, MappingsFormat};
use crate::mappings::{
    FormatMetadata, MappedClass, MappedField, MappedMethod, MappedParameter, Mappings,
};

/// TSRG v1 and v2. v1 is the two-namespace indent format without a header;
/// v2 declares its namespaces in a `tsrg2` header and adds parameters and
/// static markers.
pub struct TsrgFormat {
    v2: bool,
}

impl TsrgFormat {
    pub fn v1() -> Self {
        TsrgFormat { v2: false }
    }

    pub fn v2() -> Self {
        TsrgFormat { v2: true }
    }
}

impl MappingsFormat for TsrgFormat {
    fn kind(&self) -> FormatKind {
        if self.v2 {
            FormatKind::TsrgV2
        } else {
            FormatKind::TsrgV1
        }
    }

    fn detect(&self, lines: &[String]) -> bool {
        let mut non_empty = lines.iter().filter(|line| !line.trim().is_empty());
        let Some(first) = non_empty.next() else {
            return false;
        };
        if self.v2 {
            return first.starts_with("tsrg2 ");
        }
        // Known-weak heuristic: a two-token class line followed by an
        // indented member line.
        if first.starts_with('\t') || first.split_whitespace().count() != 2 {
            return false;
        }
        non_empty
            .next()
            .is_some_and(|second| second.starts_with('\t') && !second.starts_with("\t\t"))
    }

    fn parse_lines(
        &self,
        lines: &mut dyn Iterator<Item = std::io::Result<String>>,
    ) -> Result<Mappings> {
        let mut namespaces: Vec<String> = if self.v2 {
            Vec::new()
        } else {
            vec!["obf".to_string(), "srg".to_string()]
        };
        let mut classes: Vec<MappedClass> = Vec::new();
        let mut header_seen = false;

        for (index, line) in lines.enumerate() {
            let line_no = index + 1;
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if self.v2 && !header_seen {
                let mut tokens = line.split_whitespace();
                if tokens.next() != Some("tsrg2") {
                    return Err(Error::parse(line_no, "missing tsrg2 header"));
                }
                namespaces = tokens.map(str::to_string).collect();
                if namespaces.len() < 2 {
                    return Err(Error::parse(line_no, "tsrg2 header names no namespaces"));
                }
                header_seen = true;
                continue;
            }
            let width = namespaces.len();
            let (depth, rest) = tab_depth(line);
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            match depth {
                0 => {
                    let mut names: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
                    if names.len() != width {
                        return Err(Error::parse(
                            line_no,
                            format!("expected {width} class names, got {}", names.len()),
                        ));
                    }
                    materialize_names(&mut names);
                    classes.push(MappedClass::new(names));
                }
                1 => {
                    let class = classes.last_mut().ok_or_else(|| {
                        Error::parse(line_no, "member record before any class")
                    })?;
                    if tokens.len() > 1 && tokens[1].starts_with('(') {
                        if tokens.len() != width + 1 {
                            return Err(Error::parse(
                                line_no,
                                format!("expected {} method tokens, got {}", width + 1, tokens.len()),
                            ));
                        }
                        let mut names = vec![tokens[0].to_string()];
                        names.extend(tokens[2..].iter().map(|s| s.to_string()));
                        materialize_names(&mut names);
                        class.methods.push(MappedMethod {
                            names,
                            comments: Vec::new(),
                            desc: tokens[1].to_string(),
                            parameters: Vec::new(),
                            variables: Vec::new(),
                        });
                    } else {
                        let (desc, name_tokens) = if tokens.len() == width + 1 {
                            (Some(tokens[1].to_string()), {
                                let mut names = vec![tokens[0]];
                                names.extend(&tokens[2..]);
                                names
                            })
                        } else if tokens.len() == width {
                            (None, tokens.clone())
                        } else {
                            return Err(Error::parse(
                                line_no,
                                format!("expected {width} field names, got {}", tokens.len()),
                            ));
                        };
                        let mut names: Vec<String> =
                            name_tokens.iter().map(|s| s.to_string()).collect();
                        materialize_names(&mut names);
                        class.fields.push(MappedField {
                            names,
                            comments: Vec::new(),
                            desc,
                        });
                    }
                }
                2 if self.v2 => {
                    let method = classes
                        .last_mut()
                        .and_then(|class| class.methods.last_mut())
                        .ok_or_else(|| {
                            Error::parse(line_no, "parameter record before any method")
                        })?;
                    if tokens == ["static"] {
                        continue;
                    }
                    if tokens.len() != width + 1 {
                        return Err(Error::parse(
                            line_no,
                            format!("expected {} parameter tokens, got {}", width + 1, tokens.len()),
                        ));
                    }
                    let index: u16 = tokens[0].parse().map_err(|_| {
                        Error::parse(line_no, format!("bad parameter index {:?}", tokens[0]))
                    })?;
                    let mut names: Vec<String> =
                        tokens[1..].iter().map(|s| s.to_string()).collect();
                    materialize_names(&mut names);
                    method.parameters.push(MappedParameter { index, names });
                }
                depth => {
                    return Err(Error::parse(line_no, format!("unexpected indent {depth}")))
                }
            }
        }
        if self.v2 && !header_seen {
            return Err(Error::parse(1, "missing tsrg2 header"));
        }
        let mappings = Mappings {
            namespaces,
            classes,
            metadata: FormatMetadata::Tsrg { v2: self.v2 },
        };
        mappings.validate(false)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        if !self.v2 && mappings.namespaces.len() != 2 {
            return Err(Error::Invariant(format!(
                "tsrg v1 supports exactly two namespaces, got {}",
                mappings.namespaces.len()
            )));
        }
        let mut lines = Vec::new();
        if self.v2 {
            lines.push(format!("tsrg2 {}", mappings.namespaces.join(" ")));
        }
        for class in &mappings.classes {
            lines.push(class.names.join(" "));
            for field in &class.fields {
                match (&field.desc, self.v2) {
                    (Some(desc), true) => {
                        let mut tokens = vec![field.names[0].clone(), desc.clone()];
                        tokens.extend(field.names[1..].iter().cloned());
                        lines.push(format!("\t{}", tokens.join(" ")));
                    }
                    _ => lines.push(format!("\t{}", field.names.join(" "))),
                }
            }
            for method in &class.methods {
                let mut tokens = vec![method.names[0].clone(), method.desc.clone()];
                tokens.extend(method.names[1..].iter().cloned());
                lines.push(format!("\t{}", tokens.join(" ")));
                if self.v2 {
                    for parameter in &method.parameters {
                        let mut tokens = vec![parameter.index.to_string()];
                        tokens.extend(parameter.names.iter().cloned());
                        lines.push(format!("\t\t{}", tokens.join(" ")));
                    }
                }
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::format;

    const TSRG_V1: &str = "a Main\n\
                           \tb state\n\
                           \tc ()Le; action\n";

    const TSRG_V2: &str = "tsrg2 obf srg id\n\
                           a Main MainId\n\
                           \tb Ld; state stateId\n\
                           \tc ()Le; action actionId\n\
                           \t\tstatic\n\
                           \t\t1 p param paramId\n";

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn detect_v1_needs_class_then_member() {
        assert!(TsrgFormat::v1().detect(&lines(TSRG_V1)));
        assert!(!TsrgFormat::v1().detect(&lines(TSRG_V2)));
        assert!(!TsrgFormat::v1().detect(&lines("a Main\n")));
        assert_eq!(format::detect(&lines(TSRG_V1)), Some(FormatKind::TsrgV1));
    }

    #[test]
    fn detect_v2_needs_header() {
        assert!(TsrgFormat::v2().detect(&lines(TSRG_V2)));
        assert!(!TsrgFormat::v2().detect(&lines(TSRG_V1)));
        assert_eq!(format::detect(&lines(TSRG_V2)), Some(FormatKind::TsrgV2));
    }

    #[test]
    fn parse_v1_reads_two_namespace_members() {
        let mappings = TsrgFormat::v1().parse(&lines(TSRG_V1)).expect("parse");
        assert_eq!(mappings.namespaces, vec!["obf", "srg"]);
        let class = &mappings.classes[0];
        assert_eq!(class.fields[0].names, vec!["b", "state"]);
        assert_eq!(class.methods[0].desc, "()Le;");
    }

    #[test]
    fn parse_v2_reads_header_parameters_and_static_markers() {
        let mappings = TsrgFormat::v2().parse(&lines(TSRG_V2)).expect("parse");
        assert_eq!(mappings.namespaces, vec!["obf", "srg", "id"]);
        let class = &mappings.classes[0];
        assert_eq!(class.fields[0].desc.as_deref(), Some("Ld;"));
        let method = &class.methods[0];
        assert_eq!(method.parameters.len(), 1);
        assert_eq!(method.parameters[0].index, 1);
        assert_eq!(method.parameters[0].names, vec!["p", "param", "paramId"]);
    }

    #[test]
    fn member_before_class_is_an_error() {
        let err = TsrgFormat::v1()
            .parse(&lines("\tb state\n"))
            .expect_err("orphan member");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn round_trips() {
        let parsed = TsrgFormat::v1().parse(&lines(TSRG_V1)).expect("parse");
        let reparsed = TsrgFormat::v1()
            .parse(&TsrgFormat::v1().write(&parsed).expect("write"))
            .expect("reparse");
        assert_eq!(parsed, reparsed);

        let parsed = TsrgFormat::v2().parse(&lines(TSRG_V2)).expect("parse");
        let reparsed = TsrgFormat::v2()
            .parse(&TsrgFormat::v2().write(&parsed).expect("write"))
            .expect("reparse");
        assert_eq!(parsed, reparsed);
    }
}
