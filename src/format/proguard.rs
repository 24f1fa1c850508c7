use crate::error::{Error, Result};
use crate::format::{FormatKind, MappingsFormat};
use crate::mappings::{FormatMetadata, MappedClass, MappedField, MappedMethod, Mappings};

/// Proguard mapping output: `original -> obfuscated:` class headers with
/// indented member lines using source-style type names. Line numbers on
/// method records are parsed and discarded; output writes a placeholder.
pub struct ProguardFormat;

const NAMESPACES: [&str; 2] = ["named", "official"];

fn source_type_to_desc(line_no: usize, source: &str) -> Result<String> {
    let mut base = source;
    let mut dimensions = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dimensions += 1;
    }
    let element = match base {
        "void" => "V".to_string(),
        "boolean" => "Z".to_string(),
        "byte" => "B".to_string(),
        "char" => "C".to_string(),
        "short" => "S".to_string(),
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        "float" => "F".to_string(),
        "double" => "D".to_string(),
        "" => return Err(Error::parse(line_no, format!("bad type {source:?}"))),
        name => format!("L{};", name.replace('.', "/")),
    };
    Ok(format!("{}{element}", "[".repeat(dimensions)))
}

fn desc_to_source_type(desc: &str) -> String {
    let mut base = desc;
    let mut dimensions = 0;
    while let Some(stripped) = base.strip_prefix('[') {
        base = stripped;
        dimensions += 1;
    }
    let element = match base {
        "V" => "void".to_string(),
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        object => object
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .map(|name| name.replace('/', "."))
            .unwrap_or_else(|| object.to_string()),
    };
    format!("{element}{}", "[]".repeat(dimensions))
}

/// Split a method descriptor into argument descriptors and return type.
fn split_method_desc(line_no: usize, desc: &str) -> Result<(Vec<String>, String)> {
    let inner = desc
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .ok_or_else(|| Error::parse(line_no, format!("bad method descriptor {desc:?}")))?;
    let (args_str, ret) = inner;
    let mut args = Vec::new();
    let bytes = args_str.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let len = crate::descriptor::type_descriptor_len(&bytes[pos..])
            .map_err(|_| Error::parse(line_no, format!("bad method descriptor {desc:?}")))?;
        args.push(args_str[pos..pos + len].to_string());
        pos += len;
    }
    Ok((args, ret.to_string()))
}

/// Strip the optional `a:b:` line-number prefix of a method record.
fn strip_line_numbers(token: &str) -> &str {
    let mut rest = token;
    for _ in 0..2 {
        if let Some((prefix, tail)) = rest.split_once(':') {
            if prefix.chars().all(|ch| ch.is_ascii_digit()) && !prefix.is_empty() {
                rest = tail;
                continue;
            }
        }
        break;
    }
    rest
}

impl MappingsFormat for ProguardFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Proguard
    }

    fn detect(&self, lines: &[String]) -> bool {
        lines
            .iter()
            .map(|line| line.trim_end())
            .find(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
            .is_some_and(|line| {
                !line.starts_with(char::is_whitespace)
                    && line.contains(" -> ")
                    && line.ends_with(':')
            })
    }

    fn parse_lines(
        &self,
        lines: &mut dyn Iterator<Item = std::io::Result<String>>,
    ) -> Result<Mappings> {
        let mut classes: Vec<MappedClass> = Vec::new();
        for (index, line) in lines.enumerate() {
            let line_no = index + 1;
            let line = line?;
            let line = line.trim_end();
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let indented = line.starts_with(char::is_whitespace);
            let content = line.trim_start();
            let (left, right) = content
                .split_once(" -> ")
                .ok_or_else(|| Error::parse(line_no, format!("missing arrow in {line:?}")))?;
            if !indented {
                let obf = right.strip_suffix(':').ok_or_else(|| {
                    Error::parse(line_no, format!("class header missing colon in {line:?}"))
                })?;
                classes.push(MappedClass::new(vec![
                    left.replace('.', "/"),
                    obf.replace('.', "/"),
                ]));
                continue;
            }
            let class = classes
                .last_mut()
                .ok_or_else(|| Error::parse(line_no, "member record before any class"))?;
            let (type_token, name_token) = left
                .rsplit_once(' ')
                .ok_or_else(|| Error::parse(line_no, format!("bad member record {line:?}")))?;
            let type_token = strip_line_numbers(type_token);
            match name_token.split_once('(') {
                Some((name, args)) => {
                    let args = args.strip_suffix(')').ok_or_else(|| {
                        Error::parse(line_no, format!("unclosed argument list in {line:?}"))
                    })?;
                    let mut desc = String::from("(");
                    if !args.is_empty() {
                        for arg in args.split(',') {
                            desc.push_str(&source_type_to_desc(line_no, arg.trim())?);
                        }
                    }
                    desc.push(')');
                    desc.push_str(&source_type_to_desc(line_no, type_token)?);
                    class.methods.push(MappedMethod {
                        names: vec![name.to_string(), right.to_string()],
                        comments: Vec::new(),
                        desc,
                        parameters: Vec::new(),
                        variables: Vec::new(),
                    });
                }
                None => {
                    class.fields.push(MappedField {
                        names: vec![name_token.to_string(), right.to_string()],
                        comments: Vec::new(),
                        desc: Some(source_type_to_desc(line_no, type_token)?),
                    });
                }
            }
        }
        let mappings = Mappings {
            namespaces: NAMESPACES.map(str::to_string).to_vec(),
            classes,
            metadata: FormatMetadata::Proguard,
        };
        mappings.validate(true)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        if mappings.namespaces.len() != 2 {
            return Err(Error::Invariant(format!(
                "proguard supports exactly two namespaces, got {}",
                mappings.namespaces.len()
            )));
        }
        let mut lines = Vec::new();
        for class in &mappings.classes {
            lines.push(format!(
                "{} -> {}:",
                class.names[0].replace('/', "."),
                class.names[1].replace('/', ".")
            ));
            for field in &class.fields {
                let desc = field.desc.as_deref().ok_or_else(|| {
                    Error::Invariant(format!(
                        "field {}.{} has no descriptor for proguard output",
                        class.names[0], field.names[0]
                    ))
                })?;
                lines.push(format!(
                    "    {} {} -> {}",
                    desc_to_source_type(desc),
                    field.names[0],
                    field.names[1]
                ));
            }
            for method in &class.methods {
                let (args, ret) = split_method_desc(0, &method.desc)?;
                let args: Vec<String> = args.iter().map(|arg| desc_to_source_type(arg)).collect();
                // Line numbers are not preserved; a placeholder is emitted.
                lines.push(format!(
                    "    1:1:{} {}({}) -> {}",
                    desc_to_source_type(&ret),
                    method.names[0],
                    args.join(","),
                    method.names[1]
                ));
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
    use crate::mappings::testutil::sample;

    const PROGUARD: &str = "# compiled from: Main.java\n\
                            Main -> a:\n    \
                            SomeState state -> b\n    \
                            4:4:SomeOtherState action() -> c\n    \
                            SomeOtherState anotherAction() -> d\n\
                            SomeState -> d:\n\
                            SomeOtherState -> e:\n";

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn detect_matches_class_headers() {
        assert!(ProguardFormat.detect(&lines(PROGUARD)));
        assert_eq!(format::detect(&lines(PROGUARD)), Some(FormatKind::Proguard));
        assert!(!ProguardFormat.detect(&lines("CL: a b\n")));
    }

    #[test]
    fn type_translation_covers_primitives_arrays_and_objects() {
        assert_eq!(source_type_to_desc(1, "int").expect("int"), "I");
        assert_eq!(source_type_to_desc(1, "int[][]").expect("array"), "[[I");
        assert_eq!(
            source_type_to_desc(1, "java.lang.String").expect("object"),
            "Ljava/lang/String;"
        );
        assert_eq!(desc_to_source_type("[[I"), "int[][]");
        assert_eq!(desc_to_source_type("Ljava/lang/String;"), "java.lang.String");
    }

    #[test]
    fn parse_matches_the_tiny_model_after_reordering() {
        // The same program as the tiny sample; proguard's first namespace is
        // the deobfuscated one, so align by reordering.
        let parsed = ProguardFormat.parse(&lines(PROGUARD)).expect("parse");
        assert_eq!(parsed.namespaces, vec!["named", "official"]);
        let aligned = parsed
            .reorder_namespaces(&["official", "named"])
            .expect("reorder");
        assert_eq!(aligned, sample());
    }

    #[test]
    fn line_number_prefixes_are_stripped() {
        assert_eq!(strip_line_numbers("4:4:SomeOtherState"), "SomeOtherState");
        assert_eq!(strip_line_numbers("SomeOtherState"), "SomeOtherState");
        assert_eq!(strip_line_numbers("12:340:int"), "int");
    }

    #[test]
    fn round_trips_with_placeholder_line_numbers() {
        let parsed = ProguardFormat.parse(&lines(PROGUARD)).expect("parse");
        let written = ProguardFormat.write(&parsed).expect("write");
        assert!(written.iter().any(|line| line.contains("1:1:")));
        let reparsed = ProguardFormat.parse(&written).expect("reparse");
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn member_before_class_is_an_error() {
        let err = ProguardFormat
            .parse(&lines("    SomeState state -> b\n"))
            .expect_err("orphan member");
        assert_eq!(err.line(), Some(1));
    }
}
