use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result as AnyResult};
use tracing::debug;
use zip::ZipArchive;

use crate::remapper::{remap_class_bytes, SimpleRemapper};

pub type ClassBytes = Arc<Vec<u8>>;

/// Byte cache shared between memoizing loaders; values are written at most
/// once per key, negative results included.
pub type SharedByteCache = Arc<RwLock<HashMap<String, Option<ClassBytes>>>>;

/// Source of class bytes by internal name. `None` means unknown. Loaders are
/// queried concurrently from pipeline tasks and must be thread-safe.
pub trait ClasspathLoader: Send + Sync {
    fn load(&self, internal_name: &str) -> Option<ClassBytes>;

    /// Constituents of a compound loader, used for flattening.
    fn parts(&self) -> Option<&[Arc<dyn ClasspathLoader>]> {
        None
    }
}

/// Loader over an indexed set of jar files.
pub struct JarLoader {
    archives: Vec<Mutex<ZipArchive<File>>>,
    index: HashMap<String, (usize, usize)>,
}

impl JarLoader {
    pub fn from_jars(paths: &[PathBuf]) -> AnyResult<Self> {
        let mut archives = Vec::with_capacity(paths.len());
        let mut index = HashMap::new();
        for (jar_number, path) in paths.iter().enumerate() {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            let mut archive = ZipArchive::new(file)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for entry_number in 0..archive.len() {
                let entry = archive
                    .by_index(entry_number)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                if entry.is_dir() {
                    continue;
                }
                let Some(internal_name) = entry.name().strip_suffix(".class") else {
                    continue;
                };
                index
                    .entry(internal_name.to_string())
                    .or_insert((jar_number, entry_number));
            }
            archives.push(Mutex::new(archive));
        }
        debug!(classes = index.len(), jars = paths.len(), "indexed classpath jars");
        Ok(JarLoader { archives, index })
    }
}

impl ClasspathLoader for JarLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        let &(jar_number, entry_number) = self.index.get(internal_name)?;
        let mut archive = self.archives[jar_number].lock().ok()?;
        let mut entry = archive.by_index(entry_number).ok()?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).ok()?;
        Some(Arc::new(data))
    }
}

/// In-memory loader over a prebuilt name-to-bytes map.
pub struct LookupLoader {
    classes: HashMap<String, ClassBytes>,
}

impl LookupLoader {
    pub fn from_lookup(classes: HashMap<String, Vec<u8>>) -> Self {
        LookupLoader {
            classes: classes
                .into_iter()
                .map(|(name, data)| (name, Arc::new(data)))
                .collect(),
        }
    }

    pub fn from_shared(classes: HashMap<String, ClassBytes>) -> Self {
        LookupLoader { classes }
    }
}

impl ClasspathLoader for LookupLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        self.classes.get(internal_name).cloned()
    }
}

/// Loader reading `<root>/<internal_name>.class` from class directories.
pub struct DirectoryLoader {
    roots: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        DirectoryLoader { roots }
    }
}

impl ClasspathLoader for DirectoryLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        for root in &self.roots {
            let mut path = root.clone();
            for part in internal_name.split('/') {
                path.push(part);
            }
            path.set_extension("class");
            if let Ok(data) = std::fs::read(&path) {
                return Some(Arc::new(data));
            }
        }
        None
    }
}

/// Loader trying each part in order; the first hit wins. Nested compounds
/// are flattened on construction.
pub struct CompoundLoader {
    loaders: Vec<Arc<dyn ClasspathLoader>>,
}

impl CompoundLoader {
    pub fn new(parts: Vec<Arc<dyn ClasspathLoader>>) -> Self {
        let mut loaders = Vec::with_capacity(parts.len());
        for part in parts {
            match part.parts() {
                Some(nested) => loaders.extend(nested.iter().cloned()),
                None => loaders.push(part),
            }
        }
        CompoundLoader { loaders }
    }
}

impl ClasspathLoader for CompoundLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        self.loaders
            .iter()
            .find_map(|loader| loader.load(internal_name))
    }

    fn parts(&self) -> Option<&[Arc<dyn ClasspathLoader>]> {
        Some(&self.loaders)
    }
}

/// Caching wrapper; results (including misses) are stored forever, first
/// writer wins.
pub struct MemoizedLoader {
    inner: Arc<dyn ClasspathLoader>,
    cache: SharedByteCache,
}

impl MemoizedLoader {
    pub fn new(inner: Arc<dyn ClasspathLoader>) -> Self {
        Self::with_cache(inner, Arc::new(RwLock::new(HashMap::new())))
    }

    pub fn with_cache(inner: Arc<dyn ClasspathLoader>, cache: SharedByteCache) -> Self {
        MemoizedLoader { inner, cache }
    }
}

impl ClasspathLoader for MemoizedLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        if let Ok(cache) = self.cache.read() {
            if let Some(cached) = cache.get(internal_name) {
                return cached.clone();
            }
        }
        let loaded = self.inner.load(internal_name);
        let Ok(mut cache) = self.cache.write() else {
            return loaded;
        };
        cache
            .entry(internal_name.to_string())
            .or_insert(loaded)
            .clone()
    }
}

/// Loader that applies a remapper to every class it returns.
pub struct RemappingLoader {
    inner: Arc<dyn ClasspathLoader>,
    remapper: Arc<SimpleRemapper>,
}

impl RemappingLoader {
    pub fn new(inner: Arc<dyn ClasspathLoader>, remapper: Arc<SimpleRemapper>) -> Self {
        RemappingLoader { inner, remapper }
    }
}

impl ClasspathLoader for RemappingLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        let data = self.inner.load(internal_name)?;
        match remap_class_bytes(&data, &self.remapper) {
            Ok(remapped) => Some(Arc::new(remapped)),
            Err(err) => {
                debug!(class = internal_name, %err, "dropping unremappable class");
                None
            }
        }
    }
}

/// Loader translating lookup keys from the `to` namespace back to `from`
/// before delegating, then rewriting class references in the returned bytes.
pub struct NameTranslatingLoader {
    inner: Arc<dyn ClasspathLoader>,
    forward: Arc<HashMap<String, String>>,
    reverse: HashMap<String, String>,
}

impl NameTranslatingLoader {
    pub fn new(inner: Arc<dyn ClasspathLoader>, forward: HashMap<String, String>) -> Self {
        let reverse = forward
            .iter()
            .map(|(from, to)| (to.clone(), from.clone()))
            .collect();
        NameTranslatingLoader {
            inner,
            forward: Arc::new(forward),
            reverse,
        }
    }

    pub fn from_mappings(
        inner: Arc<dyn ClasspathLoader>,
        mappings: &crate::mappings::Mappings,
        from: &str,
        to: &str,
    ) -> crate::error::Result<Self> {
        let from_index = mappings.namespace_index(from)?;
        let to_index = mappings.namespace_index(to)?;
        Ok(Self::new(inner, mappings.class_name_map(from_index, to_index)))
    }
}

impl ClasspathLoader for NameTranslatingLoader {
    fn load(&self, internal_name: &str) -> Option<ClassBytes> {
        let source = self
            .reverse
            .get(internal_name)
            .map(String::as_str)
            .unwrap_or(internal_name);
        let data = self.inner.load(source)?;
        match crate::remapper::remap_class_names(&data, self.forward.as_ref()) {
            Ok(remapped) => Some(Arc::new(remapped)),
            Err(err) => {
                debug!(class = internal_name, %err, "dropping untranslatable class");
                None
            }
        }
    }
}

/// Read a path as jar or bare class directory into a loader.
pub fn loader_for_path(path: &Path) -> AnyResult<Arc<dyn ClasspathLoader>> {
    if path.is_dir() {
        Ok(Arc::new(DirectoryLoader::new(vec![path.to_path_buf()])))
    } else {
        Ok(Arc::new(JarLoader::from_jars(&[path.to_path_buf()])?))
    }
}
