use crate::error::{Error, Result};
use crate::format::{elide_names, materialize_names, tab_depth, FormatKind, MappingsFormat};
use crate::mappings::{
    FormatMetadata, MappedClass, MappedField, MappedLocal, MappedMethod, MappedParameter, Mappings,
};

/// Tiny v2: `tiny\t2\t0` header, tab-depth state machine with comments,
/// parameters, locals, and header properties. The `compact` flag enables the
/// name-elision shorthand on write.
#[derive(Default)]
pub struct TinyV2Format {
    pub compact: bool,
}

/// What the last parsed record was, for attaching comments at the next
/// depth.
enum Attach {
    Nothing,
    Class,
    Field,
    Method,
    MemberChild,
}

fn escape_comment(comment: &str) -> String {
    let mut out = String::with_capacity(comment.len());
    for ch in comment.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_comment(line_no: usize, escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            other => {
                return Err(Error::parse(
                    line_no,
                    format!("bad comment escape {other:?}"),
                ))
            }
        }
    }
    Ok(out)
}

impl MappingsFormat for TinyV2Format {
    fn kind(&self) -> FormatKind {
        FormatKind::TinyV2
    }

    fn detect(&self, lines: &[String]) -> bool {
        lines
            .iter()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| line.starts_with("tiny\t2\t"))
    }

    fn parse_lines(
        &self,
        lines: &mut dyn Iterator<Item = std::io::Result<String>>,
    ) -> Result<Mappings> {
        let mut namespaces: Vec<String> = Vec::new();
        let mut properties: Vec<(String, String)> = Vec::new();
        let mut classes: Vec<MappedClass> = Vec::new();
        let mut header_seen = false;
        let mut attach = Attach::Nothing;

        for (index, line) in lines.enumerate() {
            let line_no = index + 1;
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if !header_seen {
                let tokens: Vec<&str> = line.split('\t').collect();
                if tokens.len() < 4 || tokens[0] != "tiny" || tokens[1] != "2" {
                    return Err(Error::parse(line_no, "missing tiny v2 header"));
                }
                namespaces = tokens[3..].iter().map(|s| s.to_string()).collect();
                header_seen = true;
                continue;
            }
            let width = namespaces.len();
            let (depth, rest) = tab_depth(line);
            let tokens: Vec<&str> = rest.split('\t').collect();
            match (depth, tokens[0]) {
                (0, "c") => {
                    if tokens.len() != width + 1 {
                        return Err(Error::parse(
                            line_no,
                            format!("expected {width} class names, got {}", tokens.len() - 1),
                        ));
                    }
                    let mut names: Vec<String> =
                        tokens[1..].iter().map(|s| s.to_string()).collect();
                    materialize_names(&mut names);
                    classes.push(MappedClass::new(names));
                    attach = Attach::Class;
                }
                (1, _) if classes.is_empty() => {
                    // Header property; the value may be absent.
                    let key = tokens[0].to_string();
                    let value = tokens.get(1).unwrap_or(&"").to_string();
                    properties.push((key, value));
                }
                (1, "f") | (1, "m") => {
                    if tokens.len() != width + 2 {
                        return Err(Error::parse(line_no, format!("bad member line {line:?}")));
                    }
                    let desc = tokens[1].to_string();
                    let mut names: Vec<String> =
                        tokens[2..].iter().map(|s| s.to_string()).collect();
                    materialize_names(&mut names);
                    let class = classes
                        .last_mut()
                        .ok_or_else(|| Error::parse(line_no, "member line before any class"))?;
                    if tokens[0] == "f" {
                        class.fields.push(MappedField {
                            names,
                            comments: Vec::new(),
                            desc: Some(desc),
                        });
                        attach = Attach::Field;
                    } else {
                        class.methods.push(MappedMethod {
                            names,
                            comments: Vec::new(),
                            desc,
                            parameters: Vec::new(),
                            variables: Vec::new(),
                        });
                        attach = Attach::Method;
                    }
                }
                (1, "c") => {
                    let comment = unescape_comment(line_no, tokens.get(1).unwrap_or(&""))?;
                    let class = classes
                        .last_mut()
                        .ok_or_else(|| Error::parse(line_no, "comment before any class"))?;
                    class.comments.push(comment);
                }
                (2, "p") => {
                    if tokens.len() != width + 2 {
                        return Err(Error::parse(line_no, format!("bad parameter line {line:?}")));
                    }
                    let index: u16 = tokens[1].parse().map_err(|_| {
                        Error::parse(line_no, format!("bad parameter index {:?}", tokens[1]))
                    })?;
                    let names: Vec<String> = tokens[2..].iter().map(|s| s.to_string()).collect();
                    let method = last_method(&mut classes)
                        .ok_or_else(|| Error::parse(line_no, "parameter outside a method"))?;
                    method.parameters.push(MappedParameter { index, names });
                    attach = Attach::MemberChild;
                }
                (2, "v") => {
                    if tokens.len() != width + 4 {
                        return Err(Error::parse(line_no, format!("bad variable line {line:?}")));
                    }
                    let index: u16 = tokens[1].parse().map_err(|_| {
                        Error::parse(line_no, format!("bad variable index {:?}", tokens[1]))
                    })?;
                    let start_offset: u16 = tokens[2].parse().map_err(|_| {
                        Error::parse(line_no, format!("bad variable offset {:?}", tokens[2]))
                    })?;
                    let lvt_index: i32 = tokens[3].parse().map_err(|_| {
                        Error::parse(line_no, format!("bad lvt index {:?}", tokens[3]))
                    })?;
                    let names: Vec<String> = tokens[4..].iter().map(|s| s.to_string()).collect();
                    let method = last_method(&mut classes)
                        .ok_or_else(|| Error::parse(line_no, "variable outside a method"))?;
                    method.variables.push(MappedLocal {
                        index,
                        start_offset,
                        lvt_index,
                        names,
                    });
                    attach = Attach::MemberChild;
                }
                (2, "c") => {
                    let comment = unescape_comment(line_no, tokens.get(1).unwrap_or(&""))?;
                    let class = classes
                        .last_mut()
                        .ok_or_else(|| Error::parse(line_no, "comment before any class"))?;
                    match attach {
                        Attach::Field => {
                            if let Some(field) = class.fields.last_mut() {
                                field.comments.push(comment);
                            }
                        }
                        Attach::Method | Attach::MemberChild => {
                            if let Some(method) = class.methods.last_mut() {
                                method.comments.push(comment);
                            }
                        }
                        _ => {
                            return Err(Error::parse(line_no, "comment outside a member"));
                        }
                    }
                }
                (3, "c") => {
                    // Parameter/local comments are not modeled.
                }
                _ => {
                    return Err(Error::parse(
                        line_no,
                        format!("unknown record {:?} at indent {depth}", tokens[0]),
                    ))
                }
            }
        }
        if !header_seen {
            return Err(Error::parse(1, "missing tiny v2 header"));
        }
        let mappings = Mappings {
            namespaces,
            classes,
            metadata: FormatMetadata::TinyV2 { properties },
        };
        mappings.validate(true)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        lines.push(format!("tiny\t2\t0\t{}", mappings.namespaces.join("\t")));
        if let FormatMetadata::TinyV2 { properties } = &mappings.metadata {
            for (key, value) in properties {
                if value.is_empty() {
                    lines.push(format!("\t{key}"));
                } else {
                    lines.push(format!("\t{key}\t{value}"));
                }
            }
        }
        let names_of = |names: &[String]| -> String {
            let names = if self.compact {
                elide_names(names)
            } else {
                names.to_vec()
            };
            names.join("\t")
        };
        for class in &mappings.classes {
            lines.push(format!("c\t{}", names_of(&class.names)));
            for comment in &class.comments {
                lines.push(format!("\tc\t{}", escape_comment(comment)));
            }
            for field in &class.fields {
                let desc = field.desc.as_deref().ok_or_else(|| {
                    Error::Invariant(format!(
                        "field {}.{} has no descriptor for tiny output",
                        class.names[0], field.names[0]
                    ))
                })?;
                lines.push(format!("\tf\t{desc}\t{}", names_of(&field.names)));
                for comment in &field.comments {
                    lines.push(format!("\t\tc\t{}", escape_comment(comment)));
                }
            }
            for method in &class.methods {
                lines.push(format!("\tm\t{}\t{}", method.desc, names_of(&method.names)));
                for comment in &method.comments {
                    lines.push(format!("\t\tc\t{}", escape_comment(comment)));
                }
                for parameter in &method.parameters {
                    lines.push(format!(
                        "\t\tp\t{}\t{}",
                        parameter.index,
                        names_of(&parameter.names)
                    ));
                }
                for variable in &method.variables {
                    lines.push(format!(
                        "\t\tv\t{}\t{}\t{}\t{}",
                        variable.index,
                        variable.start_offset,
                        variable.lvt_index,
                        names_of(&variable.names)
                    ));
                }
            }
        }
        Ok(lines)
    }
}

fn last_method(classes: &mut [MappedClass]) -> Option<&mut MappedMethod> {
    classes.last_mut()?.methods.last_mut()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::format;
    use crate::mappings::testutil::names;

    const SAMPLE: &str = "tiny\t2\t0\tofficial\tnamed\n\
                          c\ta\tMain\n\
                          \tc\tTest comment\n\
                          \tf\tLd;\tb\tstate\n\
                          \t\tc\tElectric boogaloo\n\
                          \tm\t()Le;\tc\taction\n\
                          \t\tc\tCrazy\n\
                          \t\tc\tTwo comments!\n\
                          \tm\t()Le;\td\tanotherAction\n\
                          c\td\tSomeState\n\
                          c\te\tSomeOtherState\n";

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn detect_matches_the_header() {
        assert!(TinyV2Format::default().detect(&lines(SAMPLE)));
        assert_eq!(format::detect(&lines(SAMPLE)), Some(FormatKind::TinyV2));
    }

    #[test]
    fn parse_builds_the_expected_model() {
        let mappings = TinyV2Format::default().parse(&lines(SAMPLE)).expect("parse");
        assert_eq!(mappings.namespaces, names(&["official", "named"]));
        assert_eq!(mappings.classes.len(), 3);

        let main = &mappings.classes[0];
        assert_eq!(main.names, names(&["a", "Main"]));
        assert_eq!(main.comments, names(&["Test comment"]));
        assert_eq!(main.fields.len(), 1);
        let field = &main.fields[0];
        assert_eq!(field.names, names(&["b", "state"]));
        assert_eq!(field.desc.as_deref(), Some("Ld;"));
        assert_eq!(field.comments, names(&["Electric boogaloo"]));

        assert_eq!(main.methods.len(), 2);
        let action = &main.methods[0];
        assert_eq!(action.names, names(&["c", "action"]));
        assert_eq!(action.desc, "()Le;");
        assert_eq!(action.comments, names(&["Crazy", "Two comments!"]));
        let another = &main.methods[1];
        assert_eq!(another.names, names(&["d", "anotherAction"]));
        assert!(another.comments.is_empty());

        assert_eq!(mappings.classes[1].names, names(&["d", "SomeState"]));
        assert_eq!(mappings.classes[2].names, names(&["e", "SomeOtherState"]));
    }

    #[test]
    fn parse_reads_header_properties_and_elided_names() {
        let text = "tiny\t2\t0\tofficial\tnamed\n\
                    \tescaped-names\n\
                    \tintermediary-counter\t12\n\
                    c\tsame\t\n\
                    \tf\tI\tfield\t\n";
        let mappings = TinyV2Format::default().parse(&lines(text)).expect("parse");
        match &mappings.metadata {
            FormatMetadata::TinyV2 { properties } => {
                assert_eq!(properties.len(), 2);
                assert_eq!(properties[0].0, "escaped-names");
                assert_eq!(properties[1], ("intermediary-counter".to_string(), "12".to_string()));
            }
            other => panic!("unexpected metadata {other:?}"),
        }
        assert_eq!(mappings.classes[0].names, names(&["same", "same"]));
        assert_eq!(mappings.classes[0].fields[0].names, names(&["field", "field"]));
    }

    #[test]
    fn comments_round_trip_their_escapes() {
        let original = "line one\nline two\twith tab \\ and backslash";
        let escaped = escape_comment(original);
        assert!(!escaped.contains('\n'));
        assert_eq!(unescape_comment(1, &escaped).expect("unescape"), original);
    }

    #[test]
    fn round_trips_plain_and_compact() {
        let parsed = TinyV2Format::default().parse(&lines(SAMPLE)).expect("parse");
        for compact in [false, true] {
            let format = TinyV2Format { compact };
            let written = format.write(&parsed).expect("write");
            let reparsed = TinyV2Format::default().parse(&written).expect("reparse");
            assert_eq!(parsed, reparsed);
        }
    }

    #[test]
    fn parameters_and_locals_round_trip() {
        let text = "tiny\t2\t0\tofficial\tnamed\n\
                    c\ta\tMain\n\
                    \tm\t(I)V\tc\taction\n\
                    \t\tp\t1\tp0\targ\n\
                    \t\tv\t2\t0\t-1\tlocal\tlocalName\n";
        let parsed = TinyV2Format::default().parse(&lines(text)).expect("parse");
        let method = &parsed.classes[0].methods[0];
        assert_eq!(method.parameters[0].index, 1);
        assert_eq!(method.variables[0].lvt_index, -1);
        let written = TinyV2Format::default().write(&parsed).expect("write");
        let reparsed = TinyV2Format::default().parse(&written).expect("reparse");
        assert_eq!(parsed, reparsed);
    }
}
