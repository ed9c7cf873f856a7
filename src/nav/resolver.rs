//! Layered definition and reference search.
//!
//! Definition search tries, in order: scope-local variables, in-file
//! functions (plus the owning class's methods), class members, the
//! path-resolved external file, and finally a workspace-wide sweep over
//! every cached file. The first stage that yields a result wins; within a
//! stage, results come back in insertion order.
//!
//! Reference search has two stages: scope-local variables, then function
//! references with private functions confined to their defining file.

use std::sync::Arc;

use matls_protocol::types::Range;
use tower_lsp::lsp_types::{self, Url};
use tracing::debug;

use crate::index::{FileCodeData, IndexOrigin, SymbolIndex, Visibility};
use crate::nav::expression::{extract_expression, Expression};
use crate::nav::path_resolver::PathResolver;

/// A resolved location in index coordinates (1-based lines).
#[derive(Debug, Clone, PartialEq)]
pub struct NavLocation {
    pub uri: Url,
    pub range: Range,
}

impl NavLocation {
    fn new(uri: Url, range: Range) -> Self {
        NavLocation { uri, range }
    }

    /// Convert to an LSP location (0-based lines).
    pub fn to_lsp(&self) -> lsp_types::Location {
        lsp_types::Location {
            uri: self.uri.clone(),
            range: range_to_lsp(self.range),
        }
    }
}

/// Convert an index range to LSP coordinates.
pub fn range_to_lsp(range: Range) -> lsp_types::Range {
    lsp_types::Range {
        start: lsp_types::Position {
            line: range.line_start.saturating_sub(1),
            character: range.char_start,
        },
        end: lsp_types::Position {
            line: range.line_end.saturating_sub(1),
            character: range.char_end,
        },
    }
}

/// Whether a file search runs against the file under the cursor or against
/// a file the path resolver produced. In resolved files the member lookup is
/// keyed by the last expression component rather than the cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchTarget {
    CurrentFile,
    ResolvedFile,
}

/// Answers definition and reference queries from the index.
pub struct NavigationResolver {
    index: Arc<SymbolIndex>,
    paths: Arc<PathResolver>,
}

impl NavigationResolver {
    pub fn new(index: Arc<SymbolIndex>, paths: Arc<PathResolver>) -> Self {
        NavigationResolver { index, paths }
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Find definition locations for the expression under the cursor.
    /// `line` is 1-based, `character` 0-based; `line_text` is the full text
    /// of that line.
    pub async fn find_definition(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
        line_text: &str,
    ) -> Vec<NavLocation> {
        let Some(expression) = extract_expression(line_text, character) else {
            return Vec::new();
        };
        debug!(expression = %expression.full_expression(), "definition lookup");

        // Scope-local variable, only when the cursor is on the first
        // component.
        if expression.selected() == 0 {
            if let Some(function) = self.index.find_containing_function(uri, line, character) {
                if let Some(variable) = function.variables.get(expression.unqualified_target()) {
                    if !variable.definitions.is_empty() {
                        return variable
                            .definitions
                            .iter()
                            .map(|range| NavLocation::new(uri.clone(), *range))
                            .collect();
                    }
                }
            }
        }

        // In-file function and class member.
        if let Some(file) = self.index.get(uri) {
            if let Some(locations) =
                self.search_file(&file, &expression, SearchTarget::CurrentFile)
            {
                return locations;
            }
        }

        // Path-resolved external file.
        if let Some(locations) = self.search_resolved(uri, &expression).await {
            return locations;
        }

        // Workspace-wide sweep, never touching the originating URI.
        self.workspace_search(uri, &expression)
    }

    /// Ask the path resolver for the target expression and search the file
    /// it names. Falls back to a zero-range location so the editor at least
    /// opens the resolved file.
    async fn search_resolved(
        &self,
        uri: &Url,
        expression: &Expression,
    ) -> Option<Vec<NavLocation>> {
        let target = expression.target_expression();
        let resolved = match self.paths.resolve_paths(&[target], uri).await {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(error = %err, "path resolution unavailable");
                return None;
            }
        };

        for result in resolved {
            if !result.is_found() {
                continue;
            }
            let Some(resolved_uri) = result.uri else {
                continue;
            };
            // A directory answer (class or package folder) is not a
            // definition site.
            if resolved_uri
                .to_file_path()
                .map(|p| p.is_dir())
                .unwrap_or(false)
            {
                continue;
            }

            let data = match self.index.get(&resolved_uri) {
                Some(data) => Some(data),
                None => result.code_data.map(|raw| {
                    self.index
                        .parse_and_store(resolved_uri.clone(), raw, IndexOrigin::Workspace)
                }),
            };
            if let Some(data) = data {
                if let Some(locations) =
                    self.search_file(&data, expression, SearchTarget::ResolvedFile)
                {
                    return Some(locations);
                }
            }
            return Some(vec![NavLocation::new(resolved_uri, Range::default())]);
        }
        None
    }

    /// In-file function lookup plus class-member lookup (stages shared by
    /// the current file and path-resolved files).
    fn search_file(
        &self,
        file: &FileCodeData,
        expression: &Expression,
        target: SearchTarget,
    ) -> Option<Vec<NavLocation>> {
        let full = expression.full_expression();

        if let Some(function) = file.functions.get(&full) {
            return Some(vec![NavLocation::new(
                file.uri.clone(),
                function.definition_range(),
            )]);
        }

        let class = file
            .class_name
            .as_deref()
            .and_then(|name| self.index.class(name))?;

        // For a class file, methods may live in sibling files of the class
        // folder; the aggregate knows where each body is.
        if let Some(method) = class.methods.get(&full) {
            let method_uri = method
                .file_uri
                .clone()
                .or_else(|| class.uri.clone())
                .unwrap_or_else(|| file.uri.clone());
            return Some(vec![NavLocation::new(
                method_uri,
                method.definition_range(),
            )]);
        }

        // Member lookup by the last component. On the file under the cursor
        // this applies only when the cursor sits directly on a member access
        // (component 1, e.g. `obj.PROP`); in a path-resolved file the prefix
        // was already consumed by the resolver, so the last component is
        // looked up unconditionally.
        let member_lookup = match target {
            SearchTarget::CurrentFile => file.is_class_def && expression.selected() == 1,
            SearchTarget::ResolvedFile => true,
        };
        if member_lookup {
            let last = expression.last_component();
            let class_uri = class.uri.clone().unwrap_or_else(|| file.uri.clone());
            if let Some(member) = class
                .properties
                .get(last)
                .or_else(|| class.enumerations.get(last))
            {
                return Some(vec![NavLocation::new(class_uri, member.range)]);
            }
            if target == SearchTarget::ResolvedFile {
                if let Some(method) = class.methods.get(last) {
                    let method_uri = method.file_uri.clone().unwrap_or(class_uri);
                    return Some(vec![NavLocation::new(
                        method_uri,
                        method.definition_range(),
                    )]);
                }
            }
        }
        None
    }

    /// Sweep every cached file, matching the full expression against the
    /// qualified names its package, class, and functions can form.
    fn workspace_search(&self, origin: &Url, expression: &Expression) -> Vec<NavLocation> {
        let full = expression.full_expression();
        for file in self.index.files_snapshot() {
            if &file.uri == origin {
                continue;
            }
            let prefix = if file.package_name.is_empty() {
                String::new()
            } else {
                format!("{}.", file.package_name)
            };

            if let Some(class) = file
                .class_name
                .as_deref()
                .and_then(|name| self.index.class(name))
            {
                let qualified_class = if class.name.contains('.') {
                    class.name.clone()
                } else {
                    format!("{prefix}{}", class.name)
                };
                let class_uri = class.uri.clone().unwrap_or_else(|| file.uri.clone());
                for member in class.properties.values().chain(class.enumerations.values()) {
                    if format!("{qualified_class}.{}", member.name) == full {
                        return vec![NavLocation::new(class_uri, member.range)];
                    }
                }
                for method in class.methods.iter() {
                    if format!("{qualified_class}.{}", method.name) == full {
                        let method_uri = method.file_uri.clone().unwrap_or(class_uri);
                        return vec![NavLocation::new(method_uri, method.definition_range())];
                    }
                }
            }

            for function in file.functions.iter() {
                if format!("{prefix}{}", function.name) == full {
                    return vec![NavLocation::new(
                        file.uri.clone(),
                        function.definition_range(),
                    )];
                }
            }
        }
        Vec::new()
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Find reference locations for the expression under the cursor.
    pub fn find_references(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
        line_text: &str,
    ) -> Vec<NavLocation> {
        let Some(expression) = extract_expression(line_text, character) else {
            return Vec::new();
        };

        // Scope-local variable.
        if expression.selected() == 0 {
            if let Some(function) = self.index.find_containing_function(uri, line, character) {
                if let Some(variable) = function.variables.get(expression.unqualified_target()) {
                    if !variable.references.is_empty() {
                        return variable
                            .references
                            .iter()
                            .map(|range| NavLocation::new(uri.clone(), *range))
                            .collect();
                    }
                }
            }
        }

        let full = expression.full_expression();

        // A private function is only referenced from its own file.
        if let Some(file) = self.index.get(uri) {
            if let Some(function) = file.functions.get(&full) {
                if function.visibility == Visibility::Private {
                    return file
                        .references
                        .get(&full)
                        .map(|ranges| {
                            ranges
                                .iter()
                                .map(|range| NavLocation::new(uri.clone(), *range))
                                .collect()
                        })
                        .unwrap_or_default();
                }
            }
        }

        // Workspace-wide accumulation, skipping files whose own function of
        // that name is private (theirs is a different symbol).
        let mut locations = Vec::new();
        for file in self.index.files_snapshot() {
            if let Some(function) = file.functions.get(&full) {
                if function.visibility == Visibility::Private {
                    continue;
                }
            }
            if let Some(ranges) = file.references.get(&full) {
                locations.extend(
                    ranges
                        .iter()
                        .map(|range| NavLocation::new(file.uri.clone(), *range)),
                );
            }
        }
        locations
    }
}
