//! Scripted labeling sessions.
//!
//! A script is a JSON array of steps, each tagged with `op`:
//!
//! ```json
//! [
//!   { "op": "click", "block": 3 },
//!   { "op": "click", "block": 4, "modifier": "add" },
//!   { "op": "create" },
//!   { "op": "next" },
//!   { "op": "wait", "ms": 2500 }
//! ]
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use munje_kernel::{
    DocumentDefaults, DragRect, EditorHandle, Result, SelectModifier, Viewport,
};
use munje_types::{BlockId, Column, GroupId, ProblemInfo, SolutionLink};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Click {
        block: BlockId,
        #[serde(default)]
        modifier: SelectModifier,
    },
    Drag {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[serde(default)]
        additive: bool,
    },
    SelectColumn {
        column: Column,
    },
    Clear,
    Viewport {
        scale: f64,
        zoom: f64,
    },
    Create,
    Delete {
        group: GroupId,
    },
    Info {
        group: GroupId,
        info: ProblemInfo,
    },
    Link {
        group: GroupId,
        #[serde(default)]
        link: Option<SolutionLink>,
    },
    Confirm {
        group: GroupId,
    },
    Undo,
    Defaults {
        #[serde(default)]
        book_name: String,
        #[serde(default)]
        course: String,
    },
    Navigate {
        page: u32,
    },
    Next,
    Prev,
    Reload,
    CrossPageStart,
    CrossPageComplete,
    CrossPageCancel,
    Parent,
    Child,
    Finalize,
    Save,
    /// Let wall-clock time pass so autosave can fire.
    Wait {
        ms: u64,
    },
}

/// Parse a script from JSON text.
pub fn parse(text: &str) -> serde_json::Result<Vec<Step>> {
    serde_json::from_str(text)
}

/// Run one step, returning a JSON summary of what it produced.
pub async fn apply(editor: &EditorHandle, step: Step) -> Result<Value> {
    let out = match step {
        Step::Click { block, modifier } => {
            editor.click(block, modifier).await?;
            Value::Null
        }
        Step::Drag {
            x1,
            y1,
            x2,
            y2,
            additive,
        } => {
            let selected = editor
                .drag(DragRect::new(x1, y1, x2, y2), additive)
                .await?;
            json!({ "dragged": selected })
        }
        Step::SelectColumn { column } => {
            editor.select_column(column).await?;
            Value::Null
        }
        Step::Clear => {
            editor.clear_selection().await?;
            Value::Null
        }
        Step::Viewport { scale, zoom } => {
            editor.set_viewport(Viewport { scale, zoom }).await?;
            Value::Null
        }
        Step::Create => json!({ "created": editor.create_group().await? }),
        Step::Delete { group } => {
            editor.delete_group(group.clone()).await?;
            json!({ "deleted": group })
        }
        Step::Info { group, info } => {
            editor.update_group_info(group, info).await?;
            Value::Null
        }
        Step::Link { group, link } => {
            editor.set_link(group, link).await?;
            Value::Null
        }
        Step::Confirm { group } => {
            editor.confirm_group(group.clone()).await?;
            json!({ "confirmed": group })
        }
        Step::Undo => json!({ "undone": editor.undo_last_export().await? }),
        Step::Defaults { book_name, course } => {
            editor
                .set_defaults(DocumentDefaults { book_name, course })
                .await?;
            Value::Null
        }
        Step::Navigate { page } => json!(editor.navigate_to(page).await?),
        Step::Next => json!(editor.next_page().await?),
        Step::Prev => json!(editor.prev_page().await?),
        Step::Reload => {
            editor.reload().await?;
            Value::Null
        }
        Step::CrossPageStart => json!(editor.start_cross_page().await?),
        Step::CrossPageComplete => json!({ "created": editor.complete_cross_page().await? }),
        Step::CrossPageCancel => json!(editor.cancel_cross_page().await?),
        Step::Parent => json!({ "parent": editor.create_parent().await? }),
        Step::Child => json!({ "child": editor.create_child().await? }),
        Step::Finalize => json!({ "label": editor.finalize_parent_child().await? }),
        Step::Save => {
            editor.save().await?;
            Value::Null
        }
        Step::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Value::Null
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        let steps = parse(
            r#"[
                {"op": "click", "block": 3},
                {"op": "click", "block": 4, "modifier": "add"},
                {"op": "select_column", "column": "R"},
                {"op": "create"},
                {"op": "cross_page_start"},
                {"op": "defaults", "book_name": "x"},
                {"op": "wait", "ms": 10}
            ]"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 7);
        assert!(matches!(
            steps[1],
            Step::Click {
                block: 4,
                modifier: SelectModifier::Add
            }
        ));
        assert!(matches!(steps[2], Step::SelectColumn { column: Column::R }));
        assert!(matches!(steps[4], Step::CrossPageStart));
    }

    #[test]
    fn test_unknown_op_rejected() {
        assert!(parse(r#"[{"op": "explode"}]"#).is_err());
    }
}
