use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::inheritance::{ClasspathProvider, MemoizedProvider};
use crate::loader::{
    ClasspathLoader, CompoundLoader, LookupLoader, MemoizedLoader, SharedByteCache,
};
use crate::mappings::Mappings;
use crate::remapper::{remap_class_bytes, NameMap, SimpleRemapper};

/// One archive to remap between two namespaces.
#[derive(Clone, Debug)]
pub struct RemapTask {
    pub input: PathBuf,
    pub output: PathBuf,
    pub from: String,
    pub to: String,
}

/// Transforms non-class archive entries; `None` drops the entry.
pub trait ResourceVisitor: Send + Sync {
    fn visit(&self, path: &str, data: Vec<u8>) -> Result<Option<Vec<u8>>>;
}

/// Transforms remapped class bytes; `None` drops the class. Visitors see
/// both the original and the mapped owner name.
pub trait ClassVisitor: Send + Sync {
    fn visit(&self, original_name: &str, mapped_name: &str, data: Vec<u8>)
        -> Result<Option<Vec<u8>>>;
}

/// Default resource visitor dropping jar signature files, which a remapped
/// archive can no longer satisfy.
pub struct SignatureStripper;

impl ResourceVisitor for SignatureStripper {
    fn visit(&self, path: &str, data: Vec<u8>) -> Result<Option<Vec<u8>>> {
        if path.ends_with(".RSA") || path.ends_with(".SF") {
            return Ok(None);
        }
        Ok(Some(data))
    }
}

/// Supervised parallel jar remapping with a shared byte cache.
pub struct JarRemapPipeline {
    mappings: Arc<Mappings>,
    classpath: Arc<dyn ClasspathLoader>,
    class_visitors: Vec<Arc<dyn ClassVisitor>>,
    resource_visitors: Vec<Arc<dyn ResourceVisitor>>,
    copy_resources: bool,
}

impl JarRemapPipeline {
    pub fn new(mappings: Arc<Mappings>, classpath: Arc<dyn ClasspathLoader>) -> Self {
        JarRemapPipeline {
            mappings,
            classpath,
            class_visitors: Vec::new(),
            resource_visitors: vec![Arc::new(SignatureStripper)],
            copy_resources: true,
        }
    }

    pub fn add_class_visitor(&mut self, visitor: Arc<dyn ClassVisitor>) -> &mut Self {
        self.class_visitors.push(visitor);
        self
    }

    pub fn add_resource_visitor(&mut self, visitor: Arc<dyn ResourceVisitor>) -> &mut Self {
        self.resource_visitors.push(visitor);
        self
    }

    pub fn copy_resources(&mut self, copy: bool) -> &mut Self {
        self.copy_resources = copy;
        self
    }

    /// Run every task; sibling tasks keep running past a failure and all
    /// failures are reported together.
    pub fn run(&self, tasks: &[RemapTask]) -> Result<()> {
        for task in tasks {
            self.mappings
                .namespace_index(&task.from)
                .with_context(|| format!("task {}", task.input.display()))?;
            self.mappings
                .namespace_index(&task.to)
                .with_context(|| format!("task {}", task.input.display()))?;
        }

        let mut name_maps: HashMap<(String, String), Arc<NameMap>> = HashMap::new();
        for task in tasks {
            let key = (task.from.clone(), task.to.clone());
            if !name_maps.contains_key(&key) {
                let map = self
                    .mappings
                    .as_asm_mapping(&task.from, &task.to, true, true)?;
                name_maps.insert(key, Arc::new(map));
            }
        }

        let shared_cache: SharedByteCache = Arc::new(RwLock::new(HashMap::new()));
        let failures: Vec<String> = tasks
            .par_iter()
            .enumerate()
            .filter_map(|(index, task)| {
                let name_map = name_maps[&(task.from.clone(), task.to.clone())].clone();
                match self.run_task(task, &name_map, shared_cache.clone()) {
                    Ok(()) => None,
                    Err(err) => Some(format!(
                        "task {index} ({}): {err:#}",
                        task.input.display()
                    )),
                }
            })
            .collect();

        if !failures.is_empty() {
            anyhow::bail!(
                "{} of {} remap tasks failed:\n{}",
                failures.len(),
                tasks.len(),
                failures.join("\n")
            );
        }
        Ok(())
    }

    fn run_task(
        &self,
        task: &RemapTask,
        name_map: &NameMap,
        shared_cache: SharedByteCache,
    ) -> Result<()> {
        let file = File::open(&task.input)
            .with_context(|| format!("failed to open {}", task.input.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("failed to read {}", task.input.display()))?;

        enum Entry {
            Class(String),
            Resource(usize, String),
        }

        let mut local_classes: HashMap<String, Vec<u8>> = HashMap::new();
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", task.input.display()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            match name.strip_suffix(".class") {
                Some(internal_name) => {
                    let mut data = Vec::with_capacity(entry.size() as usize);
                    entry
                        .read_to_end(&mut data)
                        .with_context(|| format!("failed to read {name}"))?;
                    local_classes.insert(internal_name.to_string(), data);
                    entries.push(Entry::Class(internal_name.to_string()));
                }
                None => entries.push(Entry::Resource(index, name)),
            }
        }
        debug!(
            input = %task.input.display(),
            classes = local_classes.len(),
            "partitioned archive entries"
        );

        let task_loader: Arc<dyn ClasspathLoader> = Arc::new(CompoundLoader::new(vec![
            Arc::new(LookupLoader::from_lookup(local_classes.clone())),
            Arc::new(MemoizedLoader::with_cache(
                self.classpath.clone(),
                shared_cache,
            )),
        ]));
        let provider = MemoizedProvider::new(ClasspathProvider::new(task_loader));
        let remapper = SimpleRemapper::new(name_map.clone(), Arc::new(provider));

        let out_file = File::create(&task.output)
            .with_context(|| format!("failed to create {}", task.output.display()))?;
        let mut writer = ZipWriter::new(out_file);
        let options = SimpleFileOptions::default();

        for entry in entries {
            match entry {
                Entry::Class(internal_name) => {
                    let data = local_classes
                        .get(&internal_name)
                        .expect("class bytes were indexed")
                        .clone();
                    let mapped_name = remapper.map_class(&internal_name);
                    let remapped = remap_class_bytes(&data, &remapper)
                        .with_context(|| format!("failed to remap {internal_name}"))?;
                    let mut current = Some(remapped);
                    for visitor in &self.class_visitors {
                        let Some(data) = current.take() else {
                            break;
                        };
                        current = visitor.visit(&internal_name, &mapped_name, data)?;
                    }
                    if let Some(data) = current {
                        writer
                            .start_file(format!("{mapped_name}.class"), options)
                            .with_context(|| format!("failed to write {mapped_name}"))?;
                        writer.write_all(&data)?;
                    }
                }
                Entry::Resource(index, name) => {
                    if !self.copy_resources {
                        continue;
                    }
                    let mut entry = archive
                        .by_index(index)
                        .with_context(|| format!("failed to read {name}"))?;
                    let mut data = Vec::with_capacity(entry.size() as usize);
                    entry
                        .read_to_end(&mut data)
                        .with_context(|| format!("failed to read {name}"))?;
                    drop(entry);
                    let mut current = Some(data);
                    for visitor in &self.resource_visitors {
                        let Some(data) = current.take() else {
                            break;
                        };
                        current = visitor.visit(&name, data)?;
                    }
                    if let Some(data) = current {
                        writer
                            .start_file(name.as_str(), options)
                            .with_context(|| format!("failed to write {name}"))?;
                        writer.write_all(&data)?;
                    }
                }
            }
        }
        writer
            .finish()
            .with_context(|| format!("failed to finish {}", task.output.display()))?;
        info!(
            input = %task.input.display(),
            output = %task.output.display(),
            from = task.from,
            to = task.to,
            "remapped archive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::classfile::info::ClassInfo;
    use crate::classfile::testutil::{high, low, ClassFileBuilder};
    use crate::loader::LookupLoader;
    use crate::mappings::testutil::sample;

    fn sample_class_bytes() -> Vec<u8> {
        let mut builder = ClassFileBuilder::new("a", "java/lang/Object");
        let object_init = builder.add_method_ref("java/lang/Object", "<init>", "()V");
        builder.add_field(0x0002, "b", "Ld;");
        builder.add_method(
            0x0001,
            "<init>",
            "()V",
            vec![0x2a, 0xb7, high(object_init), low(object_init), 0xb1],
        );
        builder.add_method(0x0001, "c", "()Le;", vec![0x01, 0xb0]);
        builder.finish()
    }

    fn write_input_jar(path: &Path) {
        let file = File::create(path).expect("create jar");
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        writer.start_file("a.class", options).expect("class entry");
        writer.write_all(&sample_class_bytes()).expect("class bytes");
        writer
            .start_file("assets/data.json", options)
            .expect("resource entry");
        writer.write_all(b"{}").expect("resource bytes");
        writer
            .start_file("META-INF/SIGN.SF", options)
            .expect("signature entry");
        writer.write_all(b"sig").expect("signature bytes");
        writer.finish().expect("finish jar");
    }

    fn empty_classpath() -> Arc<dyn ClasspathLoader> {
        Arc::new(LookupLoader::from_lookup(HashMap::new()))
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).expect("open")).expect("zip");
        (0..archive.len())
            .map(|index| archive.by_index(index).expect("entry").name().to_string())
            .collect()
    }

    fn entry_bytes(path: &Path, name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(File::open(path).expect("open")).expect("zip");
        let mut entry = archive.by_name(name).expect("entry");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("read");
        data
    }

    #[test]
    fn remaps_classes_and_copies_resources_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.jar");
        let output = dir.path().join("output.jar");
        write_input_jar(&input);

        let pipeline = JarRemapPipeline::new(Arc::new(sample()), empty_classpath());
        pipeline
            .run(&[RemapTask {
                input,
                output: output.clone(),
                from: "official".to_string(),
                to: "named".to_string(),
            }])
            .expect("run pipeline");

        // Signature entries are dropped, order otherwise preserved.
        assert_eq!(entry_names(&output), vec!["Main.class", "assets/data.json"]);
        let info = ClassInfo::parse(&entry_bytes(&output, "Main.class")).expect("reparse");
        assert_eq!(info.name, "Main");
        assert_eq!(info.fields[0].desc, "LSomeState;");
    }

    #[test]
    fn skip_resources_drops_everything_but_classes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.jar");
        let output = dir.path().join("output.jar");
        write_input_jar(&input);

        let mut pipeline = JarRemapPipeline::new(Arc::new(sample()), empty_classpath());
        pipeline.copy_resources(false);
        pipeline
            .run(&[RemapTask {
                input,
                output: output.clone(),
                from: "official".to_string(),
                to: "named".to_string(),
            }])
            .expect("run pipeline");

        assert_eq!(entry_names(&output), vec!["Main.class"]);
    }

    #[test]
    fn class_visitors_see_both_names_and_may_drop() {
        struct Dropper;
        impl ClassVisitor for Dropper {
            fn visit(
                &self,
                original_name: &str,
                mapped_name: &str,
                data: Vec<u8>,
            ) -> Result<Option<Vec<u8>>> {
                assert_eq!(original_name, "a");
                assert_eq!(mapped_name, "Main");
                let _ = data;
                Ok(None)
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.jar");
        let output = dir.path().join("output.jar");
        write_input_jar(&input);

        let mut pipeline = JarRemapPipeline::new(Arc::new(sample()), empty_classpath());
        pipeline.add_class_visitor(Arc::new(Dropper));
        pipeline
            .run(&[RemapTask {
                input,
                output: output.clone(),
                from: "official".to_string(),
                to: "named".to_string(),
            }])
            .expect("run pipeline");

        assert_eq!(entry_names(&output), vec!["assets/data.json"]);
    }

    #[test]
    fn unknown_namespaces_fail_before_any_task_runs() {
        let pipeline = JarRemapPipeline::new(Arc::new(sample()), empty_classpath());
        let err = pipeline
            .run(&[RemapTask {
                input: PathBuf::from("missing.jar"),
                output: PathBuf::from("out.jar"),
                from: "official".to_string(),
                to: "intermediary".to_string(),
            }])
            .expect_err("bad namespace");
        assert!(format!("{err:#}").contains("intermediary"));
    }

    #[test]
    fn task_failures_are_aggregated_without_aborting_siblings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.jar");
        let good_output = dir.path().join("good.jar");
        write_input_jar(&input);

        let pipeline = JarRemapPipeline::new(Arc::new(sample()), empty_classpath());
        let err = pipeline
            .run(&[
                RemapTask {
                    input: dir.path().join("does-not-exist.jar"),
                    output: dir.path().join("bad.jar"),
                    from: "official".to_string(),
                    to: "named".to_string(),
                },
                RemapTask {
                    input,
                    output: good_output.clone(),
                    from: "official".to_string(),
                    to: "named".to_string(),
                },
            ])
            .expect_err("one task fails");

        assert!(format!("{err:#}").contains("does-not-exist.jar"));
        // The sibling task completed its output.
        assert!(good_output.exists());
        assert_eq!(
            entry_names(&good_output),
            vec!["Main.class", "assets/data.json"]
        );
    }
}
