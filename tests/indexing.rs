//! Document and workspace indexing scenarios.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use tower_lsp::lsp_types::{ClientCapabilities, WorkspaceClientCapabilities};

use matls::indexer::{DocumentIndexer, WorkspaceIndexer};
use matls::nav::PathResolver;

fn workspace_capable() -> ClientCapabilities {
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            workspace_folders: Some(true),
            ..WorkspaceClientCapabilities::default()
        }),
        ..ClientCapabilities::default()
    }
}

fn indexers(harness: &Harness) -> (Arc<DocumentIndexer>, Arc<WorkspaceIndexer>) {
    let workspace = Arc::new(WorkspaceIndexer::new(
        Arc::clone(&harness.session),
        Arc::clone(&harness.index),
    ));
    workspace.setup(&workspace_capable());
    let documents = DocumentIndexer::with_debounce(
        Arc::clone(&harness.session),
        Arc::clone(&harness.index),
        Arc::clone(&workspace),
        Arc::new(PathResolver::new(Arc::clone(&harness.session))),
        Duration::from_millis(100),
    );
    (documents, workspace)
}

/// Poll until `check` passes or the deadline hits.
async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..150 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Workspace indexing
// ============================================================================

/// Streamed responses land in the index one file at a time, and the reply
/// subscription is released only on the flagged final message.
#[tokio::test]
async fn workspace_indexing_streams_files_until_done() {
    let harness = Harness::connected(|channel, payload| {
        if channel == "/indexWorkspace/request" {
            assert_eq!(payload["folders"], json!(["/w"]));
            let id = payload["requestId"].as_u64().unwrap();
            let response_channel = format!("/indexWorkspace/response/{id}");
            let a = serde_json::to_value(script_with_references(vec![(
                "plot",
                range(1, 0, 1, 4),
            )]))
            .unwrap();
            let b = serde_json::to_value(script_with_references(vec![(
                "disp",
                range(2, 0, 2, 4),
            )]))
            .unwrap();
            let late = serde_json::to_value(script_with_references(vec![])).unwrap();
            return vec![
                (
                    response_channel.clone(),
                    json!({"filePath": "/w/a.m", "codeData": a, "isDone": false}),
                ),
                (
                    response_channel.clone(),
                    json!({"filePath": "/w/b.m", "codeData": b, "isDone": true}),
                ),
                // Arrives after the final message; the subscription is
                // already gone, so this file must never be indexed.
                (
                    response_channel,
                    json!({"filePath": "/w/late.m", "codeData": late, "isDone": false}),
                ),
            ];
        }
        Vec::new()
    })
    .await;

    let (_, workspace) = indexers(&harness);
    workspace.index_folders(vec!["/w".to_string()]).await;

    let index = Arc::clone(&harness.index);
    wait_until(move || {
        index.get(&uri("/w/a.m")).is_some() && index.get(&uri("/w/b.m")).is_some()
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.index.get(&uri("/w/late.m")).is_none());
}

/// Indexing folders while disconnected is a no-op.
#[tokio::test]
async fn workspace_indexing_skips_while_disconnected() {
    let harness = Harness::offline();
    let (_, workspace) = indexers(&harness);

    workspace.index_folders(vec!["/w".to_string()]).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.index.file_count(), 0);
}

// ============================================================================
// Document indexing
// ============================================================================

/// A burst of edits inside the debounce window produces exactly one index
/// round-trip, after the last arrival.
#[tokio::test]
async fn queued_edits_collapse_into_one_index_request() {
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&requests);
    let harness = Harness::connected(move |channel, payload| {
        if channel == "/indexDocument/request" {
            seen.fetch_add(1, Ordering::SeqCst);
            return correlated_reply("/indexDocument/response", payload, json!({}));
        }
        Vec::new()
    })
    .await;

    let (documents, _) = indexers(&harness);
    let target = uri("/w/busy.m");
    for revision in 0..5 {
        documents.queue_index(target.clone(), format!("x = {revision};"));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let index = Arc::clone(&harness.index);
    let target_check = target.clone();
    wait_until(move || index.get(&target_check).is_some()).await;
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

/// While the interpreter is disconnected, indexing observes the missing
/// connection and returns without touching the index.
#[tokio::test]
async fn document_indexing_is_inert_while_disconnected() {
    let harness = Harness::offline();
    let (documents, _) = indexers(&harness);

    let target = uri("/w/offline.m");
    documents
        .index_document(&target, "x = 1;")
        .await
        .expect("disconnected indexing is not an error");

    assert!(harness.index.get(&target).is_none());
}

/// Indexing a classdef with a class folder expands the closure: the folder
/// is bulk-indexed so sibling method files contribute their bodies.
#[tokio::test]
async fn class_closure_expansion_indexes_sibling_files() {
    let harness = Harness::connected(|channel, payload| {
        match channel {
            "/indexDocument/request" => {
                let class_data = serde_json::to_value(classdef_raw(
                    "K",
                    "/w/@K",
                    vec![property_raw("Count", "K", range(3, 8, 3, 13))],
                    vec![method_raw("bar", "K", range(8, 8, 8, 25), range(8, 8, 8, 25), true)],
                ))
                .unwrap();
                correlated_reply("/indexDocument/response", payload, class_data)
            }
            "/indexWorkspace/request" => {
                assert_eq!(payload["folders"], json!(["/w/@K"]));
                let id = payload["requestId"].as_u64().unwrap();
                let sibling = serde_json::to_value(class_sibling_raw(
                    "K",
                    "/w/@K",
                    vec![method_raw("bar", "K", range(1, 0, 3, 3), range(1, 0, 1, 18), false)],
                ))
                .unwrap();
                vec![(
                    format!("/indexWorkspace/response/{id}"),
                    json!({"filePath": "/w/@K/bar.m", "codeData": sibling, "isDone": true}),
                )]
            }
            "/findIdentifierDefinition/request" => {
                correlated_reply("/findIdentifierDefinition/response", payload, json!([]))
            }
            _ => Vec::new(),
        }
    })
    .await;

    let (documents, _) = indexers(&harness);
    let classdef = uri("/w/@K/K.m");
    documents
        .index_document(&classdef, "classdef K\nend\n")
        .await
        .expect("indexing succeeds");

    let index = Arc::clone(&harness.index);
    wait_until(move || index.get(&uri("/w/@K/bar.m")).is_some()).await;

    let class = harness.index.class("K").expect("class aggregate exists");
    let bar = class.methods.get("bar").expect("method attached");
    assert!(!bar.is_prototype, "body from the sibling file wins");
    assert_eq!(bar.file_uri, Some(uri("/w/@K/bar.m")));
}

/// Base classes named by a freshly indexed class are ingested from the
/// resolver reply without a second round-trip.
#[tokio::test]
async fn class_closure_expansion_ingests_base_classes() {
    let harness = Harness::connected(|channel, payload| {
        match channel {
            "/indexDocument/request" => {
                let mut class_data = serde_json::to_value(classdef_raw(
                    "Derived",
                    "",
                    vec![],
                    vec![],
                ))
                .unwrap();
                class_data["classInfo"]["baseClasses"] = json!(["Base"]);
                correlated_reply("/indexDocument/response", payload, class_data)
            }
            "/findIdentifierDefinition/request" => {
                assert_eq!(payload["identifiers"], json!(["Base"]));
                let base_data = serde_json::to_value(classdef_raw(
                    "Base",
                    "",
                    vec![property_raw("Shared", "Base", range(3, 8, 3, 14))],
                    vec![],
                ))
                .unwrap();
                correlated_reply(
                    "/findIdentifierDefinition/response",
                    payload,
                    json!([{
                        "identifier": "Base",
                        "fileInfo": {"fileName": "/w/Base.m", "line": 0, "char": 0, "codeData": base_data}
                    }]),
                )
            }
            _ => Vec::new(),
        }
    })
    .await;

    let (documents, _) = indexers(&harness);
    documents
        .index_document(&uri("/w/Derived.m"), "classdef Derived < Base\nend\n")
        .await
        .expect("indexing succeeds");

    let index = Arc::clone(&harness.index);
    wait_until(move || index.get(&uri("/w/Base.m")).is_some()).await;
    let base = harness.index.class("Base").expect("base class aggregate");
    assert!(base.properties.contains_key("Shared"));
}
