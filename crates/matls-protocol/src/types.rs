//! Typed payloads for every bus channel pair.
//!
//! The analyzer on the MATLAB side and the server agree on these shapes; every
//! request type has its own struct rather than a loosely shaped JSON object,
//! so a malformed reply fails deserialization in one place.
//!
//! Ranges use 1-based lines and 0-based characters throughout. The server
//! converts to the 0-based-line LSP convention at its own boundary.

use serde::{Deserialize, Serialize};

// ============================================================================
// Source Ranges
// ============================================================================

/// A span of source text. Lines are 1-based, characters 0-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub line_start: u32,
    pub char_start: u32,
    pub line_end: u32,
    pub char_end: u32,
}

impl Range {
    pub fn new(line_start: u32, char_start: u32, line_end: u32, char_end: u32) -> Self {
        Range {
            line_start,
            char_start,
            line_end,
            char_end,
        }
    }

    /// Whether the position (1-based line, 0-based character) falls inside
    /// this range. Both endpoints are inclusive.
    pub fn contains(&self, line: u32, character: u32) -> bool {
        if line < self.line_start || line > self.line_end {
            return false;
        }
        if line == self.line_start && character < self.char_start {
            return false;
        }
        if line == self.line_end && character > self.char_end {
            return false;
        }
        true
    }

    /// Coarse span size used to pick the innermost of several enclosing
    /// ranges. Lines dominate; characters break ties.
    pub fn span(&self) -> u64 {
        let lines = u64::from(self.line_end.saturating_sub(self.line_start));
        let chars = u64::from(self.char_end) + u64::from(self.char_start);
        lines * 100_000 + chars
    }
}

// ============================================================================
// Raw Code Data
// ============================================================================

/// Code data for one file, as produced by the MATLAB-side analyzer.
///
/// This is the raw wire shape; the server normalizes it into its own model
/// before storing it in the symbol index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCodeData {
    /// Dotted package name, empty when the file is not inside `+pkg` folders.
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub class_info: RawClassInfo,
    #[serde(default)]
    pub function_info: Vec<RawFunctionInfo>,
    /// Every call/reference site observed by the analyzer: `[name, range]`
    /// pairs, in source order.
    #[serde(default)]
    pub references: Vec<(String, Range)>,
}

/// Class facts for a file. `has_class_info` is false for plain scripts and
/// functions; `is_class_def` is true only for the `classdef` file itself
/// (sibling files in a class folder contribute with it false).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClassInfo {
    #[serde(default)]
    pub is_class_def: bool,
    #[serde(default)]
    pub has_class_info: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub range: Range,
    #[serde(default)]
    pub declaration: Option<Range>,
    #[serde(default)]
    pub properties: Vec<RawMemberInfo>,
    #[serde(default)]
    pub enumerations: Vec<RawMemberInfo>,
    /// Absolute path of the `@Class` folder, empty when the class is defined
    /// in a single file.
    #[serde(default)]
    pub class_def_folder: String,
    #[serde(default)]
    pub base_classes: Vec<String>,
}

/// A property or enumeration member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMemberInfo {
    pub name: String,
    #[serde(default)]
    pub range: Range,
    #[serde(default)]
    pub parent_class: String,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

/// One function or method in a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFunctionInfo {
    pub name: String,
    #[serde(default)]
    pub range: Range,
    /// Range of the declaration header line, absent for scripts.
    #[serde(default)]
    pub declaration: Option<Range>,
    #[serde(default)]
    pub parent_class: String,
    #[serde(default = "default_true")]
    pub is_public: bool,
    /// True when only the header lives here and the body is in a sibling
    /// file (method headers inside a classdef of a class folder).
    #[serde(default)]
    pub is_prototype: bool,
    #[serde(default)]
    pub variable_info: Vec<RawVariableInfo>,
    #[serde(default)]
    pub globals: Vec<String>,
}

/// Definitions and references of one variable inside one function scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVariableInfo {
    pub name: String,
    #[serde(default)]
    pub definitions: Vec<Range>,
    #[serde(default)]
    pub references: Vec<Range>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Document / Workspace Indexing
// ============================================================================

/// Request on `/indexDocument/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocumentRequest {
    pub code: String,
    pub file_path: String,
}

/// Request on `/indexWorkspace/request`. Responses stream on
/// `/indexWorkspace/response/<request_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexWorkspaceRequest {
    pub folders: Vec<String>,
    pub request_id: u64,
}

/// One streamed workspace-index response. The final message for a request
/// carries `is_done = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexWorkspaceResponse {
    pub file_path: String,
    #[serde(default)]
    pub code_data: RawCodeData,
    #[serde(default)]
    pub is_done: bool,
}

// ============================================================================
// Identifier Definition (path resolution)
// ============================================================================

/// Request on `/findIdentifierDefinition/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierDefinitionRequest {
    pub containing_file: String,
    pub identifiers: Vec<String>,
}

/// One entry of the reply array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierDefinitionResult {
    pub identifier: String,
    #[serde(default)]
    pub file_info: Option<ResolvedFileInfo>,
    /// Set when the identifier was resolved by dropping trailing dotted
    /// components; the caller must verify the last component exists inside
    /// the returned file.
    #[serde(default)]
    pub requires_symbol_search: bool,
}

/// Location and pre-computed code data for a resolved identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFileInfo {
    pub file_name: String,
    /// 1-based line of the inner symbol when symbol search was required.
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub char: u32,
    #[serde(default)]
    pub code_data: Option<RawCodeData>,
}

// ============================================================================
// Formatting
// ============================================================================

/// Request on `/formatDocument/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRequest {
    pub data: String,
    pub insert_spaces: bool,
    pub tab_size: u32,
    pub indent_size: u32,
}

/// Reply carrying the formatted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatResponse {
    pub data: String,
}

// ============================================================================
// Linting
// ============================================================================

/// Request on `/linting/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintRequest {
    pub code: String,
    pub file_name: String,
}

/// One lint finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintRecord {
    pub message: String,
    /// Checker id, e.g. `NASGU`; used to build suppression pragmas.
    #[serde(default)]
    pub id: String,
    /// 0 = info, 1 = warning, 2 = error.
    #[serde(default)]
    pub severity: u8,
    #[serde(default)]
    pub range: Range,
}

/// Reply on `/linting/response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintResponse {
    #[serde(default)]
    pub lint_data: Vec<LintRecord>,
}

/// Request on `/linting/endstatement/request`: find the end of the statement
/// starting on `line_number` so a suppression pragma can be appended there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintEndStatementRequest {
    pub code: String,
    pub line_number: u32,
}

/// Reply with the 1-based line on which the statement ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintEndStatementResponse {
    pub line_number: u32,
}

// ============================================================================
// Completions / Signature Help
// ============================================================================

/// Request on `/completions/request`. `cursor_position` is a 0-based offset
/// into `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsRequest {
    pub code: String,
    pub file_name: String,
    pub cursor_position: u32,
}

/// One completion entry, pre-filtered by the helper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEntry {
    pub name: String,
    /// Analyzer kind string: `function`, `method`, `variable`, `property`,
    /// `classdef`, `package`, `keyword`, `field`, `pathItem`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub doc: String,
}

/// One callable signature for signature help.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEntry {
    pub name: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterEntry {
    pub name: String,
    #[serde(default)]
    pub doc: String,
}

/// Reply on `/completions/response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsResponse {
    #[serde(default)]
    pub completions: Vec<CompletionEntry>,
    #[serde(default)]
    pub signatures: Vec<SignatureEntry>,
    /// Index of the parameter the cursor sits on, for signature help.
    #[serde(default)]
    pub active_parameter: u32,
}

// ============================================================================
// Folding
// ============================================================================

/// Request on `/foldDocument/request`. The reply is a flat array of 1-based
/// `[startLine, endLine, startLine, endLine, ...]` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldRequest {
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod range {
        use super::*;

        #[test]
        fn contains_interior_position() {
            let r = Range::new(2, 4, 5, 10);
            assert!(r.contains(3, 0));
            assert!(r.contains(3, 999));
        }

        #[test]
        fn contains_is_inclusive_at_both_ends() {
            let r = Range::new(2, 4, 2, 10);
            assert!(r.contains(2, 4));
            assert!(r.contains(2, 10));
            assert!(!r.contains(2, 3));
            assert!(!r.contains(2, 11));
        }

        #[test]
        fn contains_rejects_other_lines() {
            let r = Range::new(2, 0, 4, 0);
            assert!(!r.contains(1, 0));
            assert!(!r.contains(5, 0));
        }

        #[test]
        fn span_prefers_fewer_lines() {
            let outer = Range::new(1, 0, 20, 3);
            let inner = Range::new(5, 0, 8, 3);
            assert!(inner.span() < outer.span());
        }

        #[test]
        fn serializes_with_camel_case_keys() {
            let r = Range::new(1, 0, 2, 5);
            let v = serde_json::to_value(r).unwrap();
            assert_eq!(v, json!({"lineStart": 1, "charStart": 0, "lineEnd": 2, "charEnd": 5}));
        }
    }

    mod raw_code_data {
        use super::*;

        #[test]
        fn empty_object_parses() {
            let raw: RawCodeData = serde_json::from_value(json!({})).unwrap();
            assert!(raw.package_name.is_empty());
            assert!(!raw.class_info.has_class_info);
            assert!(raw.function_info.is_empty());
            assert!(raw.references.is_empty());
        }

        #[test]
        fn references_parse_from_pair_arrays() {
            let raw: RawCodeData = serde_json::from_value(json!({
                "references": [
                    ["foo", {"lineStart": 1, "charStart": 0, "lineEnd": 1, "charEnd": 3}],
                    ["bar.baz", {"lineStart": 2, "charStart": 4, "lineEnd": 2, "charEnd": 11}]
                ]
            }))
            .unwrap();
            assert_eq!(raw.references.len(), 2);
            assert_eq!(raw.references[0].0, "foo");
            assert_eq!(raw.references[1].1.line_start, 2);
        }

        #[test]
        fn function_info_defaults_to_public_non_prototype() {
            let raw: RawFunctionInfo = serde_json::from_value(json!({"name": "foo"})).unwrap();
            assert!(raw.is_public);
            assert!(!raw.is_prototype);
            assert!(raw.declaration.is_none());
        }

        #[test]
        fn class_info_parses_members() {
            let raw: RawClassInfo = serde_json::from_value(json!({
                "isClassDef": true,
                "hasClassInfo": true,
                "name": "pkg.Cls",
                "properties": [{"name": "Count", "parentClass": "pkg.Cls"}],
                "baseClasses": ["handle"]
            }))
            .unwrap();
            assert!(raw.is_class_def);
            assert_eq!(raw.properties[0].name, "Count");
            assert!(raw.properties[0].is_public);
            assert_eq!(raw.base_classes, vec!["handle".to_string()]);
        }
    }

    mod payloads {
        use super::*;

        #[test]
        fn index_workspace_request_wire_shape() {
            let req = IndexWorkspaceRequest {
                folders: vec!["/w".into()],
                request_id: 7,
            };
            let v = serde_json::to_value(&req).unwrap();
            assert_eq!(v, json!({"folders": ["/w"], "requestId": 7}));
        }

        #[test]
        fn workspace_response_final_flag() {
            let resp: IndexWorkspaceResponse = serde_json::from_value(json!({
                "filePath": "/w/a.m",
                "codeData": {},
                "isDone": true
            }))
            .unwrap();
            assert!(resp.is_done);
            assert_eq!(resp.file_path, "/w/a.m");
        }

        #[test]
        fn identifier_definition_result_defaults() {
            let res: IdentifierDefinitionResult =
                serde_json::from_value(json!({"identifier": "pkg.Cls"})).unwrap();
            assert!(res.file_info.is_none());
            assert!(!res.requires_symbol_search);
        }

        #[test]
        fn lint_response_tolerates_missing_fields() {
            let resp: LintResponse = serde_json::from_value(json!({
                "lintData": [{"message": "unused variable 'x'"}]
            }))
            .unwrap();
            assert_eq!(resp.lint_data.len(), 1);
            assert_eq!(resp.lint_data[0].severity, 0);
        }
    }
}
