//! Stock task library shipped with the default data root.
//!
//! | service     | tasks                                    |
//! |-------------|------------------------------------------|
//! | `uno`       | `A`, `B` (needs `A`), `C` (needs `B`), `D` |
//! | `status`    | `Task`, `Info`                           |
//! | `dos`       | `EinzyA`, `EinzyB` (needs `EinzyA`), `EinzInfo`, `NotUsed` |
//! | `extrinsic` | `Store`                                  |
//! | `project`   | `ReadProjectFile`, `WriteProjectFile`    |

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::{Value, json};
use trellis_types::Context;

use crate::capability::CapabilityRegistry;
use crate::entity::ENTITY_INFO;
use crate::error::{EngineError, TaskError};
use crate::registry::TaskRegistry;
use crate::services::SERVICE_INFO;
use crate::task::Task;

pub const STORE_FILE: &str = "store.json";
pub const PROJECTS_DIR: &str = "projects";

/// Registry holding every stock task. File-backed tasks resolve paths
/// against `data_root`.
pub fn stock_registry(data_root: &Path) -> Result<TaskRegistry, EngineError> {
    let mut registry = TaskRegistry::new();
    for task in stock_tasks(data_root) {
        registry.register(task)?;
    }
    Ok(registry)
}

#[must_use]
pub fn stock_tasks(data_root: &Path) -> Vec<Task> {
    let mut tasks = uno();
    tasks.extend(status());
    tasks.extend(dos());
    tasks.push(store(data_root.to_path_buf()));
    tasks.extend(project(data_root));
    tasks
}

fn uno() -> Vec<Task> {
    let a = Task::new("A", |ctx, _| {
        ctx.insert("A", "A");
        Ok(json!("A"))
    })
    .describe("A task");

    let b = Task::new("B", |ctx, _| {
        let value = format!("{}B", ctx.require_str("A")?);
        ctx.insert("B", value.clone());
        Ok(json!(value))
    })
    .describe("B task")
    .depends_on(["A"]);

    let c = Task::new("C", |ctx, _| {
        ctx.insert("C", "C");
        Ok(json!(format!("{}C", ctx.require_str("B")?)))
    })
    .describe("C task")
    .depends_on(["B"]);

    let d = Task::new("D", |ctx, actions| {
        ctx.insert("D", "D");
        ctx.insert(ENTITY_INFO, actions.invoke(ENTITY_INFO, &[]));
        ctx.insert(SERVICE_INFO, actions.invoke(SERVICE_INFO, &[]));
        Ok(json!("D"))
    })
    .describe("D task")
    .requests([ENTITY_INFO, SERVICE_INFO]);

    vec![a, b, c, d]
}

fn scope_info(actions: &CapabilityRegistry) -> Value {
    json!({
        "service": actions.invoke(SERVICE_INFO, &[]),
        "entity": actions.invoke(ENTITY_INFO, &[]),
    })
}

fn status() -> Vec<Task> {
    let task = Task::new("Task", |ctx, _| {
        ctx.insert("Task", "A");
        Ok(json!("Task"))
    })
    .describe("A task");

    let info = Task::new("Info", |ctx, actions| {
        let info = scope_info(actions);
        ctx.insert("Info", info.clone());
        Ok(info)
    })
    .describe("Gets info about loaded services.")
    .requests([ENTITY_INFO, SERVICE_INFO]);

    vec![task, info]
}

fn dos() -> Vec<Task> {
    let a = Task::new("EinzyA", |ctx, _| {
        ctx.insert("EinzyA", "A");
        Ok(json!("EinzyA"))
    })
    .describe("A task");

    let b = Task::new("EinzyB", |ctx, _| {
        let value = format!("{}B", ctx.require_str("EinzyA")?);
        ctx.insert("B", value.clone());
        Ok(json!(value))
    })
    .describe("B task")
    .depends_on(["EinzyA"]);

    // Reuses `Info` output when an earlier workflow stage left it behind.
    let einz_info = Task::new("EinzInfo", |ctx, actions| {
        let info = ctx
            .get("Info")
            .cloned()
            .unwrap_or_else(|| scope_info(actions));
        let rendered = info.to_string();
        ctx.insert("EinzInfo", rendered.clone());
        Ok(json!(rendered))
    })
    .describe("Gets info about loaded services.")
    .requests([ENTITY_INFO, SERVICE_INFO]);

    let not_used = Task::new("NotUsed", |_, _| Ok(json!("Not used"))).describe("Ignored");

    vec![a, b, einz_info, not_used]
}

fn store(data_root: PathBuf) -> Task {
    Task::new("Store", move |ctx, _| {
        let path = data_root.join(STORE_FILE);
        let body = serde_json::to_string(ctx.as_map())
            .map_err(|e| TaskError::failed(format!("cannot encode context: {e}")))?;
        fs::create_dir_all(&data_root)
            .and_then(|()| fs::write(&path, body))
            .map_err(|e| TaskError::failed(format!("cannot write {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Stored context");
        Ok(json!(format!("Unused, see '{STORE_FILE}'")))
    })
    .describe("Writes the context to store.json under the data root")
}

fn project(data_root: &Path) -> Vec<Task> {
    let root = data_root.join(PROJECTS_DIR);
    let read_root = root.clone();

    let read = Task::new("ReadProjectFile", move |ctx, _| {
        let path = project_path(&read_root, ctx)?;
        let content = fs::read_to_string(&path)
            .map_err(|e| TaskError::failed(format!("cannot read {}: {e}", path.display())))?;
        ctx.insert("content", content.clone());
        Ok(json!(content))
    })
    .describe("Read a file from the project of a given id");

    let write = Task::new("WriteProjectFile", move |ctx, _| {
        let path = project_path(&root, ctx)?;
        let content = ctx.require_str("content")?;
        if path.is_dir() {
            return Err(TaskError::failed(format!(
                "{} is a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TaskError::failed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        fs::write(&path, &content)
            .map_err(|e| TaskError::failed(format!("cannot write {}: {e}", path.display())))?;
        Ok(json!(content))
    })
    .describe("Write a file to the project of a given id");

    vec![read, write]
}

/// `<root>/<ctx.project.id>/<ctx.filepath>`, refusing anything that would
/// step outside `root`.
fn project_path(root: &Path, ctx: &Context) -> Result<PathBuf, TaskError> {
    let id = ctx
        .require("project")?
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::failed("project.id must be a string"))?;
    let filepath = ctx.require_str("filepath")?;

    let mut path = root.to_path_buf();
    for part in [id, filepath.as_str()] {
        let relative = Path::new(part);
        if part.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(TaskError::failed(format!(
                "path component '{part}' escapes the project root"
            )));
        }
        path.push(relative);
    }
    Ok(path)
}
