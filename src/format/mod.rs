//! Mapping-file codecs.
//!
//! Each text format implements [MappingsFormat]; the binary Compacted format
//! has its own byte-level entry points. Auto-detection queries detectable
//! codecs in a fixed order and the first positive answer wins, so callers
//! that know their format should select it explicitly.

pub mod compacted;
pub mod csrg;
pub mod enigma;
pub mod proguard;
pub mod recaf;
pub mod srg;
pub mod tiny_v1;
pub mod tiny_v2;
pub mod tsrg;

use std::io::BufRead;
use std::path::Path;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mappings::{MappedClass, MappedField, MappedMethod, Mappings};

/// Identifies one of the supported mapping formats.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FormatKind {
    Srg,
    Xsrg,
    Csrg,
    TsrgV1,
    TsrgV2,
    TinyV1,
    TinyV2,
    Proguard,
    Enigma,
    Recaf,
    Compacted,
}

/// A line-oriented mapping codec.
pub trait MappingsFormat: Send + Sync {
    fn kind(&self) -> FormatKind;

    /// Content sniff over the full line list. Formats without a reliable
    /// shape (CSRG, Recaf) stay undetectable and return false.
    fn detect(&self, _lines: &[String]) -> bool {
        false
    }

    /// Streaming parse; line numbers in errors are 1-based.
    fn parse_lines(&self, lines: &mut dyn Iterator<Item = std::io::Result<String>>)
        -> Result<Mappings>;

    fn write(&self, mappings: &Mappings) -> Result<Vec<String>>;

    /// Lazy serialization; derived from [MappingsFormat::write] unless a
    /// format provides a streaming writer.
    fn write_lazy<'m>(
        &self,
        mappings: &'m Mappings,
    ) -> Result<Box<dyn Iterator<Item = String> + 'm>> {
        Ok(Box::new(self.write(mappings)?.into_iter()))
    }

    fn parse(&self, lines: &[String]) -> Result<Mappings> {
        self.parse_lines(&mut lines.iter().cloned().map(Ok))
    }
}

/// The line codec for `kind`, or `None` for the binary Compacted format,
/// which is served by [compacted::parse] and [compacted::write] instead.
pub fn format_for(kind: FormatKind) -> Option<Box<dyn MappingsFormat>> {
    let format: Box<dyn MappingsFormat> = match kind {
        FormatKind::Srg => Box::new(srg::SrgFormat::srg()),
        FormatKind::Xsrg => Box::new(srg::SrgFormat::xsrg()),
        FormatKind::Csrg => Box::new(csrg::CsrgFormat),
        FormatKind::TsrgV1 => Box::new(tsrg::TsrgFormat::v1()),
        FormatKind::TsrgV2 => Box::new(tsrg::TsrgFormat::v2()),
        FormatKind::TinyV1 => Box::new(tiny_v1::TinyV1Format),
        FormatKind::TinyV2 => Box::new(tiny_v2::TinyV2Format::default()),
        FormatKind::Proguard => Box::new(proguard::ProguardFormat),
        FormatKind::Enigma => Box::new(enigma::EnigmaFormat),
        FormatKind::Recaf => Box::new(recaf::RecafFormat),
        FormatKind::Compacted => return None,
    };
    Some(format)
}

/// Detection order; ambiguity is settled by first match.
const DETECTION_ORDER: [FormatKind; 8] = [
    FormatKind::TinyV1,
    FormatKind::TinyV2,
    FormatKind::Srg,
    FormatKind::Xsrg,
    FormatKind::Proguard,
    FormatKind::TsrgV1,
    FormatKind::TsrgV2,
    FormatKind::Enigma,
];

pub fn detect(lines: &[String]) -> Option<FormatKind> {
    DETECTION_ORDER
        .into_iter()
        .find(|&kind| format_for(kind).is_some_and(|format| format.detect(lines)))
}

/// Parse mapping bytes, sniffing the format. Binary Compacted data is
/// recognized by its magic; everything else goes through text detection.
pub fn read_bytes(data: &[u8]) -> Result<Mappings> {
    if data.starts_with(compacted::MAGIC) {
        return compacted::parse(data);
    }
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::parse(1, "mapping file is neither UTF-8 text nor compacted data"))?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let kind = detect(&lines)
        .ok_or_else(|| Error::parse(1, "unable to detect mapping format"))?;
    debug!(?kind, "detected mapping format");
    format_for(kind)
        .ok_or_else(|| Error::parse(1, "unable to detect mapping format"))?
        .parse(&lines)
}

pub fn read_path(path: &Path) -> Result<Mappings> {
    let data = std::fs::read(path)?;
    read_bytes(&data)
}

impl FormatKind {
    /// The format a mappings value was parsed from, per its metadata.
    pub fn of(mappings: &Mappings) -> Option<FormatKind> {
        use crate::mappings::FormatMetadata;
        match &mappings.metadata {
            FormatMetadata::Generic => None,
            FormatMetadata::Srg { extended: false } => Some(FormatKind::Srg),
            FormatMetadata::Srg { extended: true } => Some(FormatKind::Xsrg),
            FormatMetadata::Csrg => Some(FormatKind::Csrg),
            FormatMetadata::Tsrg { v2: false } => Some(FormatKind::TsrgV1),
            FormatMetadata::Tsrg { v2: true } => Some(FormatKind::TsrgV2),
            FormatMetadata::TinyV1 => Some(FormatKind::TinyV1),
            FormatMetadata::TinyV2 { .. } => Some(FormatKind::TinyV2),
            FormatMetadata::Proguard => Some(FormatKind::Proguard),
            FormatMetadata::Enigma => Some(FormatKind::Enigma),
            FormatMetadata::Recaf => Some(FormatKind::Recaf),
            FormatMetadata::Compacted { .. } => Some(FormatKind::Compacted),
        }
    }
}

/// Serialize in the format the value was parsed from, falling back to Tiny
/// v2 for generic mappings.
pub fn write_bytes_auto(mappings: &Mappings) -> Result<Vec<u8>> {
    let kind = FormatKind::of(mappings).unwrap_or(FormatKind::TinyV2);
    write_bytes(mappings, kind)
}

/// Serialize to bytes in the given format; text formats join lines with a
/// trailing newline.
pub fn write_bytes(mappings: &Mappings, kind: FormatKind) -> Result<Vec<u8>> {
    let Some(format) = format_for(kind) else {
        return compacted::write(mappings);
    };
    let mut out = String::new();
    for line in format.write(mappings)? {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Read lines from a buffered reader for the streaming parse path.
pub fn parse_reader(format: &dyn MappingsFormat, reader: impl BufRead) -> Result<Mappings> {
    format.parse_lines(&mut reader.lines())
}

// --- shared codec primitives ---

/// Accumulates member records that may precede (or lack) their class line;
/// owners never declared as classes are synthesized on finish.
#[derive(Default)]
pub(crate) struct HoleFixup {
    classes: IndexMap<String, MappedClass>,
    fields: IndexMap<String, Vec<MappedField>>,
    methods: IndexMap<String, Vec<MappedMethod>>,
}

impl HoleFixup {
    pub(crate) fn add_class(&mut self, class: MappedClass) {
        self.classes.insert(class.names[0].clone(), class);
    }

    pub(crate) fn add_field(&mut self, owner: &str, field: MappedField) {
        self.fields.entry(owner.to_string()).or_default().push(field);
    }

    pub(crate) fn add_method(&mut self, owner: &str, method: MappedMethod) {
        self.methods
            .entry(owner.to_string())
            .or_default()
            .push(method);
    }

    /// Attach members to their classes, synthesizing `names = [owner; N]`
    /// entries for owners only seen in member records.
    pub(crate) fn finish(mut self, namespace_count: usize) -> Vec<MappedClass> {
        let mut extra_owners: Vec<String> = Vec::new();
        for owner in self.fields.keys().chain(self.methods.keys()) {
            if !self.classes.contains_key(owner) && !extra_owners.contains(owner) {
                extra_owners.push(owner.clone());
            }
        }
        for owner in extra_owners {
            self.classes.insert(
                owner.clone(),
                MappedClass::new(vec![owner; namespace_count]),
            );
        }
        for (owner, fields) in self.fields {
            if let Some(class) = self.classes.get_mut(&owner) {
                class.fields.extend(fields);
            }
        }
        for (owner, methods) in self.methods {
            if let Some(class) = self.classes.get_mut(&owner) {
                class.methods.extend(methods);
            }
        }
        self.classes.into_values().collect()
    }
}

/// Replace elided (empty) names with the last non-empty name to their left.
pub(crate) fn materialize_names(names: &mut [String]) {
    let mut last = String::new();
    for name in names.iter_mut() {
        if name.is_empty() {
            *name = last.clone();
        } else {
            last = name.clone();
        }
    }
}

/// Write names using the elision shorthand: a name equal to the previous
/// non-empty name becomes the empty string.
pub(crate) fn elide_names(names: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(names.len());
    let mut last = "";
    for name in names {
        if !name.is_empty() && name == last {
            out.push(String::new());
        } else {
            if !name.is_empty() {
                last = name;
            }
            out.push(name.clone());
        }
    }
    out
}

/// Measure leading tabs and return `(depth, rest)`.
pub(crate) fn tab_depth(line: &str) -> (usize, &str) {
    let rest = line.trim_start_matches('\t');
    (line.len() - rest.len(), rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::testutil::names;

    #[test]
    fn materialize_fills_elided_columns() {
        let mut elided = names(&["a", "", "b", ""]);
        materialize_names(&mut elided);
        assert_eq!(elided, names(&["a", "a", "b", "b"]));
    }

    #[test]
    fn elide_inverts_materialize() {
        let full = names(&["a", "a", "b", "b"]);
        let elided = elide_names(&full);
        assert_eq!(elided, names(&["a", "", "b", ""]));
        let mut round = elided;
        materialize_names(&mut round);
        assert_eq!(round, full);
    }

    #[test]
    fn hole_fixup_synthesizes_missing_owners() {
        let mut fixup = HoleFixup::default();
        fixup.add_class(MappedClass::new(names(&["a", "Main"])));
        fixup.add_field(
            "orphan",
            MappedField {
                names: names(&["x", "y"]),
                comments: Vec::new(),
                desc: None,
            },
        );
        let classes = fixup.finish(2);
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[1].names, names(&["orphan", "orphan"]));
        assert_eq!(classes[1].fields.len(), 1);
    }

    #[test]
    fn detection_rejects_garbage() {
        let lines = vec!["what is this".to_string()];
        assert_eq!(detect(&lines), None);
    }

    #[test]
    fn every_text_kind_has_a_codec_and_compacted_has_none() {
        for kind in [
            FormatKind::Srg,
            FormatKind::Xsrg,
            FormatKind::Csrg,
            FormatKind::TsrgV1,
            FormatKind::TsrgV2,
            FormatKind::TinyV1,
            FormatKind::TinyV2,
            FormatKind::Proguard,
            FormatKind::Enigma,
            FormatKind::Recaf,
        ] {
            let format = format_for(kind).expect("text codec");
            assert_eq!(format.kind(), kind);
        }
        assert!(format_for(FormatKind::Compacted).is_none());
    }

    #[test]
    fn metadata_selects_the_writer() {
        let mappings = crate::mappings::testutil::sample();
        assert_eq!(FormatKind::of(&mappings), None);
        let tiny = write_bytes_auto(&mappings).expect("write");
        let reparsed = read_bytes(&tiny).expect("reparse");
        assert_eq!(FormatKind::of(&reparsed), Some(FormatKind::TinyV2));
        assert_eq!(reparsed, mappings);
    }
}
