use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::classfile::info::ClassInfo;
use crate::classfile::AccessFlags;
use crate::loader::ClasspathLoader;
use crate::mappings::transform::FieldDescSource;

/// Hierarchy and declared-member queries over class bytes. Unknown classes
/// yield empty results; the walk simply terminates there.
pub trait InheritanceProvider: Send + Sync {
    /// Super class first if present, then interfaces in declared order.
    fn direct_parents(&self, internal_name: &str) -> Vec<String>;

    /// Declared methods as `name + desc` strings. With `inheritable_only`,
    /// private, static, and final members are excluded.
    fn declared_methods(&self, internal_name: &str, inheritable_only: bool) -> Vec<String>;
}

/// Transitive parents of `start`, excluding `start` itself, each visited at
/// most once. Interfaces are yielded before the superclass they were pushed
/// with.
pub fn parents<'p, P: InheritanceProvider + ?Sized>(provider: &'p P, start: &str) -> Parents<'p, P> {
    let mut iter = Parents {
        provider,
        stack: Vec::new(),
        seen: HashSet::from([start.to_string()]),
    };
    iter.push_parents(start);
    iter
}

pub struct Parents<'p, P: ?Sized> {
    provider: &'p P,
    stack: Vec<String>,
    seen: HashSet<String>,
}

impl<P: InheritanceProvider + ?Sized> Parents<'_, P> {
    fn push_parents(&mut self, of: &str) {
        let mut direct = self.provider.direct_parents(of).into_iter();
        if let Some(super_class) = direct.next() {
            self.stack.push(super_class);
        }
        let interfaces: Vec<String> = direct.collect();
        self.stack.extend(interfaces.into_iter().rev());
    }
}

impl<P: InheritanceProvider + ?Sized> Iterator for Parents<'_, P> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while let Some(node) = self.stack.pop() {
            if !self.seen.insert(node.clone()) {
                continue;
            }
            self.push_parents(&node);
            return Some(node);
        }
        None
    }
}

fn non_inheritable(access: AccessFlags) -> bool {
    access.intersects(AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::FINAL)
}

/// Default provider parsing class-file headers from a classpath loader.
pub struct ClasspathProvider {
    loader: Arc<dyn ClasspathLoader>,
}

impl ClasspathProvider {
    pub fn new(loader: Arc<dyn ClasspathLoader>) -> Self {
        ClasspathProvider { loader }
    }

    fn info(&self, internal_name: &str) -> Option<ClassInfo> {
        let data = self.loader.load(internal_name)?;
        ClassInfo::parse(&data).ok()
    }
}

impl InheritanceProvider for ClasspathProvider {
    fn direct_parents(&self, internal_name: &str) -> Vec<String> {
        self.info(internal_name)
            .map(|info| info.direct_parents())
            .unwrap_or_default()
    }

    fn declared_methods(&self, internal_name: &str, inheritable_only: bool) -> Vec<String> {
        let Some(info) = self.info(internal_name) else {
            return Vec::new();
        };
        info.methods
            .iter()
            .filter(|method| !inheritable_only || !non_inheritable(method.access))
            .map(|method| format!("{}{}", method.name, method.desc))
            .collect()
    }
}

impl FieldDescSource for ClasspathProvider {
    fn field_desc(&self, owner: &str, name: &str) -> Option<String> {
        self.info(owner)?.field_desc(name).map(str::to_string)
    }
}

/// Memoizing wrapper; caches are populated on demand and never evicted.
pub struct MemoizedProvider<P> {
    inner: P,
    parents: RwLock<HashMap<String, Vec<String>>>,
    declared: [RwLock<HashMap<String, Vec<String>>>; 2],
}

impl<P: InheritanceProvider> MemoizedProvider<P> {
    pub fn new(inner: P) -> Self {
        MemoizedProvider {
            inner,
            parents: RwLock::new(HashMap::new()),
            declared: [RwLock::new(HashMap::new()), RwLock::new(HashMap::new())],
        }
    }
}

fn memoize(
    cache: &RwLock<HashMap<String, Vec<String>>>,
    key: &str,
    compute: impl FnOnce() -> Vec<String>,
) -> Vec<String> {
    if let Ok(cache) = cache.read() {
        if let Some(cached) = cache.get(key) {
            return cached.clone();
        }
    }
    let computed = compute();
    let Ok(mut cache) = cache.write() else {
        return computed;
    };
    cache.entry(key.to_string()).or_insert(computed).clone()
}

impl<P: InheritanceProvider> InheritanceProvider for MemoizedProvider<P> {
    fn direct_parents(&self, internal_name: &str) -> Vec<String> {
        memoize(&self.parents, internal_name, || {
            self.inner.direct_parents(internal_name)
        })
    }

    fn declared_methods(&self, internal_name: &str, inheritable_only: bool) -> Vec<String> {
        memoize(
            &self.declared[usize::from(inheritable_only)],
            internal_name,
            || self.inner.declared_methods(internal_name, inheritable_only),
        )
    }
}

/// Provider over explicit tables, mainly for callers that already know the
/// hierarchy (and for tests).
#[derive(Default)]
pub struct TableProvider {
    parents: HashMap<String, Vec<String>>,
    methods: HashMap<String, Vec<(String, u16)>>,
}

impl TableProvider {
    pub fn add_class<I, S>(&mut self, name: &str, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents.insert(
            name.to_string(),
            parents.into_iter().map(Into::into).collect(),
        );
    }

    /// `name_desc` is the concatenated `name + desc` signature.
    pub fn add_method(&mut self, owner: &str, name_desc: &str, access: u16) {
        self.methods
            .entry(owner.to_string())
            .or_default()
            .push((name_desc.to_string(), access));
    }
}

impl InheritanceProvider for TableProvider {
    fn direct_parents(&self, internal_name: &str) -> Vec<String> {
        self.parents.get(internal_name).cloned().unwrap_or_default()
    }

    fn declared_methods(&self, internal_name: &str, inheritable_only: bool) -> Vec<String> {
        self.methods
            .get(internal_name)
            .map(|methods| {
                methods
                    .iter()
                    .filter(|(_, access)| {
                        !inheritable_only
                            || !non_inheritable(AccessFlags::from_bits_retain(*access))
                    })
                    .map(|(signature, _)| signature.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
