//! Process-wide symbol store.
//!
//! All mutation goes through [`SymbolIndex::parse_and_store`] and
//! [`SymbolIndex::clear`]; everything else reads snapshots. Class aggregates
//! live in their own table keyed by fully-qualified name and persist for the
//! process lifetime — a class folder's entry stays valid while individual
//! contributing files come and go.

use dashmap::DashMap;
use matls_protocol::types::RawCodeData;
use tower_lsp::lsp_types::Url;
use tracing::trace;

use super::model::{ClassInfo, FileCodeData, FunctionInfo, FunctionTable, IndexOrigin};

/// The server's symbol index.
#[derive(Default)]
pub struct SymbolIndex {
    code_data: DashMap<Url, FileCodeData>,
    classes: DashMap<String, ClassInfo>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        SymbolIndex::default()
    }

    /// Normalize raw analyzer output and store it under `uri`, replacing any
    /// prior entry. Class facts merge into the process-wide class table
    /// (union of members, last-writer-wins per name, bodies preferred over
    /// prototypes for methods).
    ///
    /// A workspace-sourced write never replaces a document-sourced entry for
    /// the same URI: the open buffer is fresher than anything read from disk.
    pub fn parse_and_store(
        &self,
        uri: Url,
        raw: RawCodeData,
        origin: IndexOrigin,
    ) -> FileCodeData {
        if origin == IndexOrigin::Workspace {
            if let Some(existing) = self.code_data.get(&uri) {
                if existing.origin == IndexOrigin::Document {
                    trace!(uri = %uri, "keeping document-sourced entry");
                    return existing.clone();
                }
            }
        }

        let mut functions = FunctionTable::new();
        for raw_function in &raw.function_info {
            functions.insert(FunctionInfo::from_raw(raw_function, &uri));
        }

        let mut references: std::collections::HashMap<String, Vec<_>> = Default::default();
        for (name, range) in raw.references {
            references.entry(name).or_default().push(range);
        }

        let class_name = (raw.class_info.has_class_info && !raw.class_info.name.is_empty())
            .then(|| raw.class_info.name.clone());

        if let Some(name) = &class_name {
            let mut class = self
                .classes
                .entry(name.clone())
                .or_insert_with(|| ClassInfo::new(name.clone()));
            if raw.class_info.is_class_def {
                class.merge_class_def(&raw.class_info, &uri);
            }
            for function in functions.iter() {
                if raw.class_info.is_class_def || function.parent_class == *name {
                    class.attach_method(function.clone());
                }
            }
        }

        let data = FileCodeData {
            uri: uri.clone(),
            package_name: raw.package_name,
            is_class_def: raw.class_info.is_class_def,
            class_name,
            functions,
            references,
            origin,
        };
        trace!(uri = %uri, functions = data.functions.len(), "indexed");
        self.code_data.insert(uri, data.clone());
        data
    }

    /// Snapshot of one file's entry.
    pub fn get(&self, uri: &Url) -> Option<FileCodeData> {
        self.code_data.get(uri).map(|entry| entry.clone())
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.code_data.contains_key(uri)
    }

    /// Snapshot of one class aggregate.
    pub fn class(&self, name: &str) -> Option<ClassInfo> {
        self.classes.get(name).map(|entry| entry.clone())
    }

    /// The innermost function whose range encloses the position (1-based
    /// line, 0-based character). Used by scope-local variable queries.
    pub fn find_containing_function(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
    ) -> Option<FunctionInfo> {
        let entry = self.code_data.get(uri)?;
        entry
            .functions
            .iter()
            .filter(|f| f.range.contains(line, character))
            .min_by_key(|f| f.range.span())
            .cloned()
    }

    /// Drop a file's entry (close/delete). The class table is left alone:
    /// other files of a class folder may still reference the aggregate.
    pub fn clear(&self, uri: &Url) {
        self.code_data.remove(uri);
    }

    /// Snapshot of every cached file entry, for workspace-wide searches.
    pub fn files_snapshot(&self) -> Vec<FileCodeData> {
        self.code_data.iter().map(|entry| entry.clone()).collect()
    }

    pub fn file_count(&self) -> usize {
        self.code_data.len()
    }
}
