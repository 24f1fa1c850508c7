use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::format::{tab_depth, FormatKind, MappingsFormat};
use crate::mappings::{
    FormatMetadata, MappedClass, MappedField, MappedMethod, MappedParameter, Mappings,
};

/// Enigma's nested CLASS/FIELD/METHOD/ARG/COMMENT format. Inner classes are
/// expressed by nesting with path-relative names; parsing rebuilds the full
/// `$`-joined names and writing drops the parent prefix again.
pub struct EnigmaFormat;

/// Which entity the next COMMENT line attaches to.
#[derive(Copy, Clone)]
enum Attach {
    Class(usize),
    Field(usize, usize),
    Method(usize, usize),
}

impl MappingsFormat for EnigmaFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Enigma
    }

    fn detect(&self, lines: &[String]) -> bool {
        lines
            .iter()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| line.starts_with("CLASS "))
    }

    fn parse_lines(
        &self,
        lines: &mut dyn Iterator<Item = std::io::Result<String>>,
    ) -> Result<Mappings> {
        let mut classes: Vec<MappedClass> = Vec::new();
        // (obf_full, named_full, class index) per nesting level.
        let mut stack: Vec<(String, String, usize)> = Vec::new();
        let mut attach: Option<Attach> = None;

        for (index, line) in lines.enumerate() {
            let line_no = index + 1;
            let line = line?;
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let (depth, rest) = tab_depth(line);
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            match tokens[0] {
                "CLASS" => {
                    if tokens.len() < 2 || tokens.len() > 3 {
                        return Err(Error::parse(line_no, format!("bad class line {line:?}")));
                    }
                    if depth > stack.len() {
                        return Err(Error::parse(line_no, format!("unexpected indent {depth}")));
                    }
                    stack.truncate(depth);
                    let (obf, named) = match stack.last() {
                        Some((parent_obf, parent_named, _)) => {
                            let obf = format!("{parent_obf}${}", tokens[1]);
                            let named = format!(
                                "{parent_named}${}",
                                tokens.get(2).copied().unwrap_or(tokens[1])
                            );
                            (obf, named)
                        }
                        None => (
                            tokens[1].to_string(),
                            tokens.get(2).copied().unwrap_or(tokens[1]).to_string(),
                        ),
                    };
                    let class_index = classes.len();
                    classes.push(MappedClass::new(vec![obf.clone(), named.clone()]));
                    stack.push((obf, named, class_index));
                    attach = Some(Attach::Class(class_index));
                }
                "FIELD" | "METHOD" => {
                    if depth != stack.len() {
                        return Err(Error::parse(line_no, format!("unexpected indent {depth}")));
                    }
                    let &(_, _, class_index) = stack
                        .last()
                        .ok_or_else(|| Error::parse(line_no, "member record before any class"))?;
                    let (names, desc) = match tokens.len() {
                        3 => (
                            vec![tokens[1].to_string(), tokens[1].to_string()],
                            tokens[2].to_string(),
                        ),
                        4 => (
                            vec![tokens[1].to_string(), tokens[2].to_string()],
                            tokens[3].to_string(),
                        ),
                        _ => {
                            return Err(Error::parse(line_no, format!("bad member line {line:?}")))
                        }
                    };
                    let class = &mut classes[class_index];
                    if tokens[0] == "FIELD" {
                        class.fields.push(MappedField {
                            names,
                            comments: Vec::new(),
                            desc: Some(desc),
                        });
                        attach = Some(Attach::Field(class_index, class.fields.len() - 1));
                    } else {
                        crate::descriptor::validate_method_desc(&desc)
                            .map_err(|_| Error::parse(line_no, format!("bad descriptor {desc:?}")))?;
                        class.methods.push(MappedMethod {
                            names,
                            comments: Vec::new(),
                            desc,
                            parameters: Vec::new(),
                            variables: Vec::new(),
                        });
                        attach = Some(Attach::Method(class_index, class.methods.len() - 1));
                    }
                }
                "ARG" => {
                    if tokens.len() != 3 {
                        return Err(Error::parse(line_no, format!("bad arg line {line:?}")));
                    }
                    let Some(Attach::Method(class_index, method_index)) = attach else {
                        return Err(Error::parse(line_no, "ARG outside a method"));
                    };
                    let index: u16 = tokens[1].parse().map_err(|_| {
                        Error::parse(line_no, format!("bad parameter index {:?}", tokens[1]))
                    })?;
                    classes[class_index].methods[method_index]
                        .parameters
                        .push(MappedParameter {
                            index,
                            names: vec![tokens[2].to_string(), tokens[2].to_string()],
                        });
                }
                "COMMENT" => {
                    let comment = rest.strip_prefix("COMMENT").unwrap_or("").trim_start();
                    match attach {
                        Some(Attach::Class(class_index)) => {
                            classes[class_index].comments.push(comment.to_string());
                        }
                        Some(Attach::Field(class_index, field_index)) => {
                            classes[class_index].fields[field_index]
                                .comments
                                .push(comment.to_string());
                        }
                        Some(Attach::Method(class_index, method_index)) => {
                            classes[class_index].methods[method_index]
                                .comments
                                .push(comment.to_string());
                        }
                        None => {
                            return Err(Error::parse(line_no, "comment before any record"));
                        }
                    }
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
            namespaces: vec!["obf".to_string(), "named".to_string()],
            classes,
            metadata: FormatMetadata::Enigma,
        };
        mappings.validate(true)?;
        Ok(mappings)
    }

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>> {
        if mappings.namespaces.len() != 2 {
            return Err(Error::Invariant(format!(
                "enigma supports exactly two namespaces, got {}",
                mappings.namespaces.len()
            )));
        }
        let mut root = TrieNode::default();
        for class in &mappings.classes {
            let mut node = &mut root;
            for segment in class.names[0].split('$') {
                node = node.children.entry(segment.to_string()).or_default();
            }
            node.class = Some(class);
        }
        let mut lines = Vec::new();
        for (segment, node) in &root.children {
            write_node(&mut lines, segment, node, 0, None)?;
        }
        Ok(lines)
    }
}

#[derive(Default)]
struct TrieNode<'m> {
    class: Option<&'m MappedClass>,
    children: IndexMap<String, TrieNode<'m>>,
}

fn write_node(
    lines: &mut Vec<String>,
    obf_segment: &str,
    node: &TrieNode<'_>,
    depth: usize,
    parent_named: Option<&str>,
) -> Result<()> {
    let indent = "\t".repeat(depth);
    let named_full = node
        .class
        .map(|class| class.names[1].as_str())
        .unwrap_or(obf_segment);
    let named_relative = match parent_named {
        Some(parent) => named_full
            .strip_prefix(parent)
            .and_then(|rest| rest.strip_prefix('$'))
            .unwrap_or(named_full),
        None => named_full,
    };
    lines.push(format!("{indent}CLASS {obf_segment} {named_relative}"));
    if let Some(class) = node.class {
        let member_indent = "\t".repeat(depth + 1);
        for comment in &class.comments {
            lines.push(format!("{member_indent}COMMENT {comment}"));
        }
        for field in &class.fields {
            let desc = field.desc.as_deref().ok_or_else(|| {
                Error::Invariant(format!(
                    "field {}.{} has no descriptor for enigma output",
                    class.names[0], field.names[0]
                ))
            })?;
            lines.push(format!(
                "{member_indent}FIELD {} {} {desc}",
                field.names[0], field.names[1]
            ));
            for comment in &field.comments {
                lines.push(format!("{member_indent}\tCOMMENT {comment}"));
            }
        }
        for method in &class.methods {
            lines.push(format!(
                "{member_indent}METHOD {} {} {}",
                method.names[0], method.names[1], method.desc
            ));
            for comment in &method.comments {
                lines.push(format!("{member_indent}\tCOMMENT {comment}"));
            }
            for parameter in &method.parameters {
                lines.push(format!(
                    "{member_indent}\tARG {} {}",
                    parameter.index, parameter.names[1]
                ));
            }
        }
    }
    for (segment, child) in &node.children {
        write_node(lines, segment, child, depth + 1, Some(named_full))?;
    }
    Ok(())
}
