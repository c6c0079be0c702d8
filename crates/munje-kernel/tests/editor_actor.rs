//! Integration tests for the editor actor.
//!
//! These drive a spawned editor through its handle only, with the tokio clock
//! paused so autosave deadlines fire deterministically.

use std::sync::Arc;
use std::time::Duration;

use munje_kernel::memory::{
    MemoryBlockSource, MemoryExporter, MemoryGroupStore, MemorySettings, RecordingPageListener,
    RecordingSession,
};
use munje_kernel::{
    EditorConfig, EditorError, EditorHandle, NavigationOutcome, SelectModifier, Services,
    ValidationError, spawn_editor,
};
use munje_types::{BBox, Block, Column, DocumentId};
use tokio::task::JoinHandle;

// ============================================================================
// Shared test setup
// ============================================================================

struct Harness {
    doc: DocumentId,
    store: Arc<MemoryGroupStore>,
    exporter: Arc<MemoryExporter>,
    pages: Arc<RecordingPageListener>,
    services: Services,
}

/// Three pages with two L blocks and two R blocks each.
fn harness() -> Harness {
    let doc = DocumentId::from("workbook");
    let blocks = Arc::new(MemoryBlockSource::new());
    for page in 0..3u32 {
        let base = page * 10;
        blocks.insert_page(
            &doc,
            page,
            vec![
                Block::new(base + 1, Column::L, BBox::new(10.0, 10.0, 90.0, 40.0)),
                Block::new(base + 2, Column::L, BBox::new(10.0, 50.0, 90.0, 80.0)),
                Block::new(base + 3, Column::R, BBox::new(110.0, 10.0, 190.0, 40.0)),
                Block::new(base + 4, Column::R, BBox::new(110.0, 50.0, 190.0, 80.0)),
            ],
        );
    }
    blocks.set_page_count(&doc, 3);

    let store = Arc::new(MemoryGroupStore::new());
    let exporter = Arc::new(MemoryExporter::new());
    let pages = Arc::new(RecordingPageListener::new());
    let services = Services {
        blocks,
        store: store.clone(),
        exporter: exporter.clone(),
        session: Arc::new(RecordingSession::new()),
        settings: Arc::new(MemorySettings::new()),
        pages: pages.clone(),
    };
    Harness {
        doc,
        store,
        exporter,
        pages,
        services,
    }
}

async fn spawn(h: &Harness, config: EditorConfig) -> (EditorHandle, JoinHandle<()>) {
    spawn_editor(h.doc.clone(), h.services.clone(), config, 0)
        .await
        .expect("spawn editor")
}

// ============================================================================
// Autosave
// ============================================================================

#[tokio::test(start_paused = true)]
async fn autosave_coalesces_rapid_edits() {
    let h = harness();
    let (editor, _task) = spawn(&h, EditorConfig::default()).await;

    editor.click(1, SelectModifier::Plain).await.unwrap();
    editor.create_group().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    editor.click(3, SelectModifier::Plain).await.unwrap();
    editor.create_group().await.unwrap();
    assert_eq!(h.store.save_count(), 0);

    // One debounce window after the last edit.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.store.save_count(), 1);
    assert_eq!(h.store.stored(&h.doc, 0).len(), 2);

    let view = editor.view().await.unwrap();
    assert!(!view.dirty);
    assert_eq!(view.save_count, 1);
}

#[tokio::test(start_paused = true)]
async fn close_flushes_pending_edits() {
    let h = harness();
    let (editor, task) = spawn(&h, EditorConfig::default()).await;

    editor.click(2, SelectModifier::Plain).await.unwrap();
    editor.create_group().await.unwrap();
    editor.close().await.unwrap();
    task.await.unwrap();

    assert_eq!(h.store.save_count(), 1);
    assert!(matches!(editor.view().await, Err(EditorError::Shutdown)));
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_flushes() {
    let h = harness();
    let (editor, task) = spawn(&h, EditorConfig::default()).await;

    editor.click(4, SelectModifier::Plain).await.unwrap();
    editor.create_group().await.unwrap();
    drop(editor);
    task.await.unwrap();

    assert_eq!(h.store.stored(&h.doc, 0).len(), 1);
}

// ============================================================================
// Navigation and export
// ============================================================================

#[tokio::test(start_paused = true)]
async fn navigation_through_handle() {
    let h = harness();
    let (editor, _task) = spawn(&h, EditorConfig::default()).await;

    editor.click(1, SelectModifier::Plain).await.unwrap();
    editor.create_group().await.unwrap();

    let outcome = editor.next_page().await.unwrap();
    assert_eq!(outcome, NavigationOutcome::Moved { from: 0, to: 1 });
    assert_eq!(h.store.save_count(), 1);
    assert_eq!(h.pages.changes(), vec![(0, 1)]);

    let view = editor.view().await.unwrap();
    assert_eq!(view.page, 1);
    assert!(view.groups.is_empty());

    let err = editor.navigate_to(7).await.unwrap_err();
    assert!(matches!(
        err,
        EditorError::Validation(ValidationError::PageOutOfRange { page: 7, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn auto_confirm_exports_and_undoes() {
    let h = harness();
    let config = EditorConfig {
        auto_confirm: true,
        ..Default::default()
    };
    let (editor, _task) = spawn(&h, config).await;

    editor.click(1, SelectModifier::Plain).await.unwrap();
    editor.click(2, SelectModifier::Add).await.unwrap();
    let id = editor.create_group().await.unwrap();
    assert!(h.exporter.has_artifact(&h.doc, 0, &id));

    let undone = editor.undo_last_export().await.unwrap();
    assert_eq!(undone, Some(id.clone()));
    assert!(!h.exporter.has_artifact(&h.doc, 0, &id));
    assert!(h.store.stored(&h.doc, 0).is_empty());
}
