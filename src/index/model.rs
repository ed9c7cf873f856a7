//! Symbol index data model.
//!
//! Normalized from the raw analyzer output before storage. Back-references
//! between entries are by value (URI or class name), never by ownership, so
//! replacing a file's entry can never dangle.

use std::collections::{HashMap, HashSet};

use matls_protocol::types::{RawClassInfo, RawFunctionInfo, RawMemberInfo, Range};
use tower_lsp::lsp_types::Url;

// ============================================================================
// Leaf Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    /// Visible only within the file that defines it.
    Private,
}

/// Which indexer produced a file entry. A document-sourced entry is never
/// overwritten by a concurrent workspace-index write for the same URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Document,
    Workspace,
}

/// Definitions and references of one variable within one function scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableInfo {
    pub definitions: Vec<Range>,
    pub references: Vec<Range>,
}

/// A class property or enumeration member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub name: String,
    pub range: Range,
    pub parent_class: String,
    pub visibility: Visibility,
}

impl MemberInfo {
    fn from_raw(raw: &RawMemberInfo) -> Self {
        MemberInfo {
            name: raw.name.clone(),
            range: raw.range,
            parent_class: raw.parent_class.clone(),
            visibility: if raw.is_public {
                Visibility::Public
            } else {
                Visibility::Private
            },
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// One function or method.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    /// Owning class name, empty for free functions.
    pub parent_class: String,
    pub range: Range,
    /// Range of the declaration header, absent for scripts.
    pub declaration: Option<Range>,
    pub visibility: Visibility,
    /// True when only the header lives here and the body is in a sibling
    /// file of the class folder.
    pub is_prototype: bool,
    pub variables: HashMap<String, VariableInfo>,
    pub globals: HashSet<String>,
    /// URI of the file the function was indexed from. A value, not an
    /// owning link; resolve through the index when the file is needed.
    pub file_uri: Option<Url>,
}

impl FunctionInfo {
    pub fn from_raw(raw: &RawFunctionInfo, uri: &Url) -> Self {
        let variables = raw
            .variable_info
            .iter()
            .map(|v| {
                (
                    v.name.clone(),
                    VariableInfo {
                        definitions: v.definitions.clone(),
                        references: v.references.clone(),
                    },
                )
            })
            .collect();
        FunctionInfo {
            name: raw.name.clone(),
            parent_class: raw.parent_class.clone(),
            range: raw.range,
            declaration: raw.declaration,
            visibility: if raw.is_public {
                Visibility::Public
            } else {
                Visibility::Private
            },
            is_prototype: raw.is_prototype,
            variables,
            globals: raw.globals.iter().cloned().collect(),
            file_uri: Some(uri.clone()),
        }
    }

    /// Range navigation should land on: the declaration header when known,
    /// otherwise the whole body.
    pub fn definition_range(&self) -> Range {
        self.declaration.unwrap_or(self.range)
    }
}

/// Name → function mapping with insertion order preserved for stable
/// iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionTable {
    entries: Vec<FunctionInfo>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable::default()
    }

    pub fn get(&self, name: &str) -> Option<&FunctionInfo> {
        self.entries.iter().find(|f| f.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut FunctionInfo> {
        self.entries.iter_mut().find(|f| f.name == name)
    }

    /// Insert or replace by name, keeping the original position on replace.
    pub fn insert(&mut self, function: FunctionInfo) {
        match self.get_mut(&function.name) {
            Some(existing) => *existing = function,
            None => self.entries.push(function),
        }
    }

    /// Insert or replace by name, except that a prototype never displaces a
    /// function whose body is already known. This keeps the body file
    /// authoritative for class-folder methods regardless of which
    /// contributing file was indexed last.
    pub fn insert_preferring_bodies(&mut self, function: FunctionInfo) {
        match self.get_mut(&function.name) {
            Some(existing) => {
                if function.is_prototype && !existing.is_prototype {
                    return;
                }
                *existing = function;
            }
            None => self.entries.push(function),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Classes
// ============================================================================

/// Aggregate for one fully-qualified class name. When the class is laid out
/// as a class folder, every contributing file merges into the same entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    /// File holding the `classdef`.
    pub uri: Option<Url>,
    /// Full definition range in the classdef file.
    pub range: Range,
    /// Declaration line range in the classdef file.
    pub declaration: Option<Range>,
    pub properties: HashMap<String, MemberInfo>,
    pub enumerations: HashMap<String, MemberInfo>,
    pub methods: FunctionTable,
    /// Absolute path of the `@Class` folder, empty for single-file classes.
    pub class_def_folder: String,
    pub base_classes: Vec<String>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        ClassInfo {
            name: name.into(),
            ..ClassInfo::default()
        }
    }

    /// Merge facts from the classdef file itself. Members resolve
    /// last-writer-wins per name; duplicates never fail.
    pub fn merge_class_def(&mut self, raw: &RawClassInfo, uri: &Url) {
        self.uri = Some(uri.clone());
        self.range = raw.range;
        self.declaration = raw.declaration;
        self.class_def_folder = raw.class_def_folder.clone();
        self.base_classes = raw.base_classes.clone();
        for member in &raw.properties {
            self.properties
                .insert(member.name.clone(), MemberInfo::from_raw(member));
        }
        for member in &raw.enumerations {
            self.enumerations
                .insert(member.name.clone(), MemberInfo::from_raw(member));
        }
    }

    /// Attach a method observed in any contributing file.
    pub fn attach_method(&mut self, method: FunctionInfo) {
        self.methods.insert_preferring_bodies(method);
    }
}

// ============================================================================
// Files
// ============================================================================

/// Everything the index knows about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCodeData {
    pub uri: Url,
    /// Dotted package name, empty outside `+pkg` folders.
    pub package_name: String,
    pub is_class_def: bool,
    /// Key into the class table; a value, not ownership.
    pub class_name: Option<String>,
    pub functions: FunctionTable,
    /// Every call/reference site observed in the file, keyed by dotted name,
    /// ranges in source order.
    pub references: HashMap<String, Vec<Range>>,
    pub origin: IndexOrigin,
}
