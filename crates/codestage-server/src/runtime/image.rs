use std::collections::BTreeMap;
use std::sync::Arc;

/// How a function became callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Registered with `codestage.export(name, fn)`.
    Exported,
    /// Declared by the program as a global function.
    Global,
}

/// One callable entry point of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    /// Declared parameter count (`fn.length`).
    pub arity: u32,
    pub binding: Binding,
}

/// A compiled program: its source and the table of functions it defines.
///
/// Images are immutable once built. Sessions share them through `Arc`, so
/// committing moves a pointer and never copies or re-evaluates the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    source: Arc<str>,
    functions: BTreeMap<String, FunctionEntry>,
}

impl ProgramImage {
    pub fn new(source: impl Into<Arc<str>>, functions: impl IntoIterator<Item = FunctionEntry>) -> Self {
        Self {
            source: source.into(),
            functions: functions
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }

    /// Program text exactly as submitted.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn function(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Functions in name order.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
