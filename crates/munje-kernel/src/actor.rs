//! Actor wrapper around [`PageEditor`].
//!
//! Hosts talk to a cloneable [`EditorHandle`]; the editor itself lives on a
//! single task that takes commands one at a time and fires the autosave when
//! its deadline comes up, so callers never poll timers.
//!
//! ```text
//!   EditorHandle (Clone, Send+Sync)    mpsc      EditorActor (one task)
//!   ┌──────────────────────────┐   ─────────▶   ┌────────────────────────────┐
//!   │ .create_group()          │                │ PageEditor                 │
//!   │ .navigate_to(page)       │   ◀─────────   │ select! { command,         │
//!   │ .complete_cross_page()   │    oneshot     │           autosave deadline│
//!   └──────────────────────────┘                └────────────────────────────┘
//! ```
//!
//! Navigation requests are answered `Ignored` straight from the handle while
//! a transition is running, without queueing behind it.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use munje_types::{BlockId, Column, DocumentId, GroupId, ProblemInfo, SolutionLink};

use crate::busy::BusyFlag;
use crate::config::EditorConfig;
use crate::editor::{EditorView, PageEditor};
use crate::error::{EditorError, Result};
use crate::navigation::NavigationOutcome;
use crate::selection::{DragRect, SelectModifier, Viewport};
use crate::services::{DocumentDefaults, Services};

// ============================================================================
// Commands (internal)
// ============================================================================

enum EditorCommand {
    // Selection
    Click {
        block: BlockId,
        modifier: SelectModifier,
        reply: oneshot::Sender<()>,
    },
    Drag {
        rect: DragRect,
        additive: bool,
        reply: oneshot::Sender<bool>,
    },
    SelectColumn {
        column: Column,
        reply: oneshot::Sender<()>,
    },
    ClearSelection {
        reply: oneshot::Sender<()>,
    },
    SetViewport {
        viewport: Viewport,
        reply: oneshot::Sender<()>,
    },

    // Groups
    CreateGroup {
        reply: oneshot::Sender<Result<GroupId>>,
    },
    DeleteGroup {
        id: GroupId,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateGroupInfo {
        id: GroupId,
        info: ProblemInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    SetLink {
        id: GroupId,
        link: Option<SolutionLink>,
        reply: oneshot::Sender<Result<()>>,
    },
    ConfirmGroup {
        id: GroupId,
        reply: oneshot::Sender<Result<()>>,
    },
    UndoLastExport {
        reply: oneshot::Sender<Result<Option<GroupId>>>,
    },
    SetDefaults {
        defaults: DocumentDefaults,
        reply: oneshot::Sender<Result<()>>,
    },

    // Persistence
    Save {
        reply: oneshot::Sender<Result<()>>,
    },

    // Navigation
    Navigate {
        target: u32,
        reply: oneshot::Sender<Result<NavigationOutcome>>,
    },
    NextPage {
        reply: oneshot::Sender<Result<NavigationOutcome>>,
    },
    PrevPage {
        reply: oneshot::Sender<Result<NavigationOutcome>>,
    },
    Reload {
        reply: oneshot::Sender<Result<()>>,
    },

    // Cross-page
    StartCrossPage {
        reply: oneshot::Sender<Result<NavigationOutcome>>,
    },
    CompleteCrossPage {
        reply: oneshot::Sender<Result<GroupId>>,
    },
    CancelCrossPage {
        reply: oneshot::Sender<Result<NavigationOutcome>>,
    },

    // Parent-child
    CreateParent {
        reply: oneshot::Sender<Result<GroupId>>,
    },
    CreateChild {
        reply: oneshot::Sender<Result<GroupId>>,
    },
    FinalizeParentChild {
        reply: oneshot::Sender<Result<String>>,
    },

    View {
        reply: oneshot::Sender<EditorView>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

// ============================================================================
// EditorHandle (Send + Sync public API)
// ============================================================================

/// Cloneable handle to a running editor.
#[derive(Clone)]
pub struct EditorHandle {
    tx: mpsc::UnboundedSender<EditorCommand>,
    transition: BusyFlag,
}

impl EditorHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EditorCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| EditorError::Shutdown)?;
        rx.await.map_err(|_| EditorError::Shutdown)
    }

    // ── Selection ────────────────────────────────────────────────────────

    pub async fn click(&self, block: BlockId, modifier: SelectModifier) -> Result<()> {
        self.request(|reply| EditorCommand::Click { block, modifier, reply })
            .await
    }

    /// Returns false when the drag was too short to count.
    pub async fn drag(&self, rect: DragRect, additive: bool) -> Result<bool> {
        self.request(|reply| EditorCommand::Drag { rect, additive, reply })
            .await
    }

    pub async fn select_column(&self, column: Column) -> Result<()> {
        self.request(|reply| EditorCommand::SelectColumn { column, reply })
            .await
    }

    pub async fn clear_selection(&self) -> Result<()> {
        self.request(|reply| EditorCommand::ClearSelection { reply })
            .await
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.request(|reply| EditorCommand::SetViewport { viewport, reply })
            .await
    }

    // ── Groups ───────────────────────────────────────────────────────────

    pub async fn create_group(&self) -> Result<GroupId> {
        self.request(|reply| EditorCommand::CreateGroup { reply })
            .await?
    }

    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        self.request(|reply| EditorCommand::DeleteGroup { id, reply })
            .await?
    }

    pub async fn update_group_info(&self, id: GroupId, info: ProblemInfo) -> Result<()> {
        self.request(|reply| EditorCommand::UpdateGroupInfo { id, info, reply })
            .await?
    }

    pub async fn set_link(&self, id: GroupId, link: Option<SolutionLink>) -> Result<()> {
        self.request(|reply| EditorCommand::SetLink { id, link, reply })
            .await?
    }

    pub async fn confirm_group(&self, id: GroupId) -> Result<()> {
        self.request(|reply| EditorCommand::ConfirmGroup { id, reply })
            .await?
    }

    pub async fn undo_last_export(&self) -> Result<Option<GroupId>> {
        self.request(|reply| EditorCommand::UndoLastExport { reply })
            .await?
    }

    pub async fn set_defaults(&self, defaults: DocumentDefaults) -> Result<()> {
        self.request(|reply| EditorCommand::SetDefaults { defaults, reply })
            .await?
    }

    pub async fn save(&self) -> Result<()> {
        self.request(|reply| EditorCommand::Save { reply }).await?
    }

    // ── Navigation ───────────────────────────────────────────────────────

    pub async fn navigate_to(&self, target: u32) -> Result<NavigationOutcome> {
        if self.transition.is_busy() {
            debug!(target, "transition in flight; navigation ignored");
            return Ok(NavigationOutcome::Ignored);
        }
        self.request(|reply| EditorCommand::Navigate { target, reply })
            .await?
    }

    pub async fn next_page(&self) -> Result<NavigationOutcome> {
        if self.transition.is_busy() {
            return Ok(NavigationOutcome::Ignored);
        }
        self.request(|reply| EditorCommand::NextPage { reply })
            .await?
    }

    pub async fn prev_page(&self) -> Result<NavigationOutcome> {
        if self.transition.is_busy() {
            return Ok(NavigationOutcome::Ignored);
        }
        self.request(|reply| EditorCommand::PrevPage { reply })
            .await?
    }

    pub async fn reload(&self) -> Result<()> {
        self.request(|reply| EditorCommand::Reload { reply }).await?
    }

    /// True while a page transition is running.
    pub fn is_transitioning(&self) -> bool {
        self.transition.is_busy()
    }

    // ── Cross-page ───────────────────────────────────────────────────────

    pub async fn start_cross_page(&self) -> Result<NavigationOutcome> {
        self.request(|reply| EditorCommand::StartCrossPage { reply })
            .await?
    }

    pub async fn complete_cross_page(&self) -> Result<GroupId> {
        self.request(|reply| EditorCommand::CompleteCrossPage { reply })
            .await?
    }

    pub async fn cancel_cross_page(&self) -> Result<NavigationOutcome> {
        self.request(|reply| EditorCommand::CancelCrossPage { reply })
            .await?
    }

    // ── Parent-child ─────────────────────────────────────────────────────

    pub async fn create_parent(&self) -> Result<GroupId> {
        self.request(|reply| EditorCommand::CreateParent { reply })
            .await?
    }

    pub async fn create_child(&self) -> Result<GroupId> {
        self.request(|reply| EditorCommand::CreateChild { reply })
            .await?
    }

    pub async fn finalize_parent_child(&self) -> Result<String> {
        self.request(|reply| EditorCommand::FinalizeParentChild { reply })
            .await?
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub async fn view(&self) -> Result<EditorView> {
        self.request(|reply| EditorCommand::View { reply }).await
    }

    /// Finish open modes, flush, and stop the actor.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| EditorCommand::Close { reply }).await?
    }
}

// ============================================================================
// EditorActor (internal, owns the PageEditor)
// ============================================================================

struct EditorActor {
    editor: PageEditor,
    rx: mpsc::UnboundedReceiver<EditorCommand>,
}

impl EditorActor {
    /// Process commands and autosave deadlines until closed.
    async fn run(mut self) {
        loop {
            let deadline = self.editor.persistence().deadline();
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(EditorCommand::Close { reply }) => {
                        let result = self.editor.close().await;
                        let _ = reply.send(result);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        if let Err(e) = self.editor.close().await {
                            warn!(error = %e, "flush on handle drop failed");
                        }
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() =>
                {
                    self.editor.tick().await;
                }
            }
        }
        debug!(doc = %self.editor.document_id(), "editor actor stopped");
    }

    async fn handle_command(&mut self, cmd: EditorCommand) {
        let editor = &mut self.editor;
        match cmd {
            // ── Selection ────────────────────────────────────────────
            EditorCommand::Click { block, modifier, reply } => {
                editor.click(block, modifier);
                let _ = reply.send(());
            }
            EditorCommand::Drag { rect, additive, reply } => {
                let _ = reply.send(editor.drag(rect, additive));
            }
            EditorCommand::SelectColumn { column, reply } => {
                editor.select_column(column);
                let _ = reply.send(());
            }
            EditorCommand::ClearSelection { reply } => {
                editor.clear_selection();
                let _ = reply.send(());
            }
            EditorCommand::SetViewport { viewport, reply } => {
                editor.set_viewport(viewport);
                let _ = reply.send(());
            }

            // ── Groups ───────────────────────────────────────────────
            EditorCommand::CreateGroup { reply } => {
                let _ = reply.send(editor.create_group().await);
            }
            EditorCommand::DeleteGroup { id, reply } => {
                let _ = reply.send(editor.delete_group(&id).await);
            }
            EditorCommand::UpdateGroupInfo { id, info, reply } => {
                let _ = reply.send(editor.update_group_info(&id, info).await);
            }
            EditorCommand::SetLink { id, link, reply } => {
                let _ = reply.send(editor.set_link(&id, link));
            }
            EditorCommand::ConfirmGroup { id, reply } => {
                let _ = reply.send(editor.confirm_group(&id).await);
            }
            EditorCommand::UndoLastExport { reply } => {
                let _ = reply.send(editor.undo_last_export().await);
            }
            EditorCommand::SetDefaults { defaults, reply } => {
                let _ = reply.send(editor.set_defaults(defaults).await);
            }
            EditorCommand::Save { reply } => {
                let _ = reply.send(editor.save().await);
            }

            // ── Navigation ───────────────────────────────────────────
            EditorCommand::Navigate { target, reply } => {
                let _ = reply.send(editor.navigate_to(target).await);
            }
            EditorCommand::NextPage { reply } => {
                let _ = reply.send(editor.next_page().await);
            }
            EditorCommand::PrevPage { reply } => {
                let _ = reply.send(editor.prev_page().await);
            }
            EditorCommand::Reload { reply } => {
                let _ = reply.send(editor.reload().await);
            }

            // ── Cross-page ───────────────────────────────────────────
            EditorCommand::StartCrossPage { reply } => {
                let _ = reply.send(editor.start_cross_page().await);
            }
            EditorCommand::CompleteCrossPage { reply } => {
                let _ = reply.send(editor.complete_cross_page().await);
            }
            EditorCommand::CancelCrossPage { reply } => {
                let _ = reply.send(editor.cancel_cross_page().await);
            }

            // ── Parent-child ─────────────────────────────────────────
            EditorCommand::CreateParent { reply } => {
                let _ = reply.send(editor.create_parent().await);
            }
            EditorCommand::CreateChild { reply } => {
                let _ = reply.send(editor.create_child().await);
            }
            EditorCommand::FinalizeParentChild { reply } => {
                let _ = reply.send(editor.finalize_parent_child().await);
            }

            EditorCommand::View { reply } => {
                let _ = reply.send(editor.view());
            }
            // Handled in `run`.
            EditorCommand::Close { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Open `doc` at `page` and run the editor on a new task.
///
/// Returns the handle and the task's join handle. The task ends after
/// [`EditorHandle::close`] or once every handle is dropped; either way open
/// modes are finished and unsaved edits flushed first.
pub async fn spawn_editor(
    doc: DocumentId,
    services: Services,
    config: EditorConfig,
    page: u32,
) -> Result<(EditorHandle, JoinHandle<()>)> {
    let editor = PageEditor::open(doc, services, config, page).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = EditorHandle {
        tx,
        transition: editor.transition_flag(),
    };
    let task = tokio::spawn(EditorActor { editor, rx }.run());
    Ok((handle, task))
}
