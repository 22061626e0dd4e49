use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::index::SearchOptions;
use crate::notes::{Category, CreateOptions, Note, NoteHeader, SaveOptions};

use super::registry::{parse_input, run_blocking, schema_of, ToolContext, ToolHandler};

const MAX_LIMIT: usize = 200;

fn parse_category(tool: &str, raw: &str) -> Result<Category> {
    Category::parse(raw)
        .ok_or_else(|| Error::SchemaValidation(format!("{tool}: unknown category '{raw}'")))
}

fn note_summary(note: &Note) -> Value {
    json!({
        "uid": note.header.id,
        "title": note.header.title,
        "category": note.header.category.as_str(),
        "project": note.header.project,
        "tags": note.header.tags,
        "links": note.header.links,
        "path": note.path.display().to_string(),
    })
}

/// Parameters for hybrid vault search.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    /// Full-text query; empty queries match nothing.
    pub query: String,
    /// Restrict to one PARA category.
    pub category: Option<String>,
    /// Require all of these tags.
    pub tags: Option<Vec<String>>,
    /// Restrict to one project.
    pub project: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub struct SearchMemoryTool;

#[async_trait]
impl ToolHandler for SearchMemoryTool {
    fn name(&self) -> &'static str {
        "search_memory"
    }
    fn description(&self) -> &'static str {
        "Search vault notes with hybrid full-text and link-graph ranking."
    }
    fn input_schema(&self) -> Value {
        schema_of::<SearchMemoryParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<SearchMemoryParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: SearchMemoryParams = parse_input(self.name(), &input)?;
        if let Some(category) = &params.category {
            parse_category(self.name(), category)?;
        }

        let opts = SearchOptions {
            category: params.category,
            tags: params.tags.unwrap_or_default(),
            project: params.project,
            limit: params.limit.map(|l| l as usize).unwrap_or(50).clamp(1, MAX_LIMIT),
            offset: params.offset.map(|o| o as usize).unwrap_or(0),
            ..Default::default()
        };
        let engine = ctx.engine.clone();
        let query = params.query;
        let response =
            run_blocking(self.name(), move || engine.search(&query, &opts)).await?;
        serde_json::to_value(response).map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Parameters for creating a note in the PARA tree.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateNoteParams {
    pub title: String,
    /// Markdown body.
    pub content: Option<String>,
    /// PARA category; defaults to Resources.
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Assigning a project routes the note under Projects.
    pub project: Option<String>,
}

pub struct CreateNoteTool;

#[async_trait]
impl ToolHandler for CreateNoteTool {
    fn name(&self) -> &'static str {
        "create_note"
    }
    fn description(&self) -> &'static str {
        "Create a markdown note; the organizer picks its directory."
    }
    fn input_schema(&self) -> Value {
        schema_of::<CreateNoteParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<CreateNoteParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: CreateNoteParams = parse_input(self.name(), &input)?;
        let category = match &params.category {
            Some(raw) => Some(parse_category(self.name(), raw)?),
            None => None,
        };

        let repo = std::sync::Arc::clone(&ctx.repo);
        let organizer = ctx.organizer.clone();
        let engine = ctx.engine.clone();
        let backlinks = std::sync::Arc::clone(&ctx.backlinks);
        run_blocking(self.name(), move || {
            // Routing header: same fields the organizer keys on.
            let mut routing = NoteHeader::new(params.title.trim(), category.unwrap_or_default());
            routing.project = params
                .project
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string);
            let target = organizer.target_path(&routing);

            let note = repo.create(
                &target,
                params.title.trim(),
                params.content.as_deref().unwrap_or(""),
                &CreateOptions {
                    category: Some(organizer.resolve_category(&routing)),
                    tags: params.tags.unwrap_or_default(),
                    project: routing.project.clone(),
                },
            )?;
            engine.index_note(&note)?;
            // Resolve any body links straight into the header.
            backlinks.sync(note.uid())?;

            let synced = repo.load(&note.path)?;
            Ok(note_summary(&synced))
        })
        .await
    }
}

/// Parameters for updating an existing note by UID.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateNoteParams {
    pub uid: String,
    pub title: Option<String>,
    /// Replacement markdown body.
    pub content: Option<String>,
    pub category: Option<String>,
    /// Replaces the whole tag set when present.
    pub tags: Option<Vec<String>>,
    /// Empty string clears the project assignment.
    pub project: Option<String>,
    /// Content hash the caller last observed; mismatch fails the update.
    pub base_hash: Option<String>,
}

pub struct UpdateNoteTool;

#[async_trait]
impl ToolHandler for UpdateNoteTool {
    fn name(&self) -> &'static str {
        "update_note"
    }
    fn description(&self) -> &'static str {
        "Update a note's body or header fields and re-route it if needed."
    }
    fn input_schema(&self) -> Value {
        schema_of::<UpdateNoteParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<UpdateNoteParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: UpdateNoteParams = parse_input(self.name(), &input)?;
        let category = match &params.category {
            Some(raw) => Some(parse_category(self.name(), raw)?),
            None => None,
        };

        let repo = std::sync::Arc::clone(&ctx.repo);
        let organizer = ctx.organizer.clone();
        let engine = ctx.engine.clone();
        let backlinks = std::sync::Arc::clone(&ctx.backlinks);
        run_blocking(self.name(), move || {
            let mut note = repo
                .find_by_uid(&params.uid)?
                .ok_or_else(|| Error::NotFound(format!("note '{}'", params.uid)))?;

            if let Some(title) = params.title {
                note.header.title = title.trim().to_string();
            }
            if let Some(content) = params.content {
                note.body = content;
            }
            if let Some(tags) = params.tags {
                note.header.tags.clear();
                for tag in tags {
                    let tag = tag.trim().to_string();
                    if !tag.is_empty() && !note.header.tags.contains(&tag) {
                        note.header.tags.push(tag);
                    }
                }
            }
            if let Some(project) = params.project {
                let project = project.trim().to_string();
                note.header.project = (!project.is_empty()).then_some(project);
            }
            if let Some(category) = category {
                note.header.category = category;
            }
            note.header
                .validate()
                .map_err(|e| Error::SchemaValidation(e.to_string()))?;

            repo.save(
                &mut note,
                &SaveOptions {
                    base_hash: params.base_hash,
                    ..Default::default()
                },
            )?;
            let moved = organizer.organize(&mut note)?;
            engine.index_note(&note)?;
            backlinks.sync(note.uid())?;

            let refreshed = repo.load(&note.path)?;
            let mut summary = note_summary(&refreshed);
            summary["moved"] = serde_json::to_value(&moved)
                .map_err(|e| Error::Internal(e.to_string()))?;
            Ok(summary)
        })
        .await
    }
}

/// Parameters for deleting a note by UID.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteNoteParams {
    pub uid: String,
    /// Keep a `.bak` copy instead of removing the file outright.
    pub backup: Option<bool>,
}

pub struct DeleteNoteTool;

#[async_trait]
impl ToolHandler for DeleteNoteTool {
    fn name(&self) -> &'static str {
        "delete_note"
    }
    fn description(&self) -> &'static str {
        "Delete a note and scrub references to it; unknown UIDs are a no-op."
    }
    fn input_schema(&self) -> Value {
        schema_of::<DeleteNoteParams>()
    }
    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<DeleteNoteParams>(self.name(), input).map(|_| ())
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let params: DeleteNoteParams = parse_input(self.name(), &input)?;

        let repo = std::sync::Arc::clone(&ctx.repo);
        let engine = ctx.engine.clone();
        let backlinks = std::sync::Arc::clone(&ctx.backlinks);
        run_blocking(self.name(), move || {
            let Some(note) = repo.find_by_uid(&params.uid)? else {
                return Ok(json!({"deleted": false, "uid": params.uid}));
            };

            repo.delete(&note.path, params.backup.unwrap_or(false))?;
            engine.remove_note(note.uid())?;
            let cleanup = backlinks.cleanup(note.uid())?;

            Ok(json!({
                "deleted": true,
                "uid": note.header.id,
                "cleanup": cleanup,
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::tests::test_context;

    #[tokio::test]
    async fn create_then_search_round_trip() {
        let (_dir, ctx) = test_context();

        let created = CreateNoteTool
            .call(
                json!({
                    "title": "Index optimization",
                    "content": "FTS5 tuning tips",
                    "category": "Resources",
                    "tags": ["index", "fts5"],
                }),
                &ctx,
            )
            .await
            .unwrap();
        let uid = created["uid"].as_str().unwrap().to_string();
        assert!(created["path"].as_str().unwrap().contains("3-Resources"));

        let found = SearchMemoryTool
            .call(json!({"query": "FTS5"}), &ctx)
            .await
            .unwrap();
        let results = found["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["uid"].as_str().unwrap(), uid);
        assert!(results[0]["snippet"]
            .as_str()
            .unwrap()
            .contains("<mark>FTS5</mark>"));
    }

    #[tokio::test]
    async fn create_resolves_body_links_into_header() {
        let (_dir, ctx) = test_context();
        let b = CreateNoteTool
            .call(json!({"title": "B"}), &ctx)
            .await
            .unwrap();
        let b_uid = b["uid"].as_str().unwrap();

        let a = CreateNoteTool
            .call(
                json!({"title": "A", "content": format!("see [[{b_uid}]]")}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(a["links"], json!([b_uid]));
    }

    #[tokio::test]
    async fn create_into_existing_path_fails() {
        let (_dir, ctx) = test_context();
        CreateNoteTool
            .call(json!({"title": "Dup"}), &ctx)
            .await
            .unwrap();
        let err = CreateNoteTool
            .call(json!({"title": "Dup"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_moves_note_when_project_is_assigned() {
        let (_dir, ctx) = test_context();
        let created = CreateNoteTool
            .call(json!({"title": "Plan"}), &ctx)
            .await
            .unwrap();
        let uid = created["uid"].as_str().unwrap();

        let updated = UpdateNoteTool
            .call(json!({"uid": uid, "project": "alpha"}), &ctx)
            .await
            .unwrap();
        assert_eq!(updated["category"], "Projects");
        assert!(updated["path"].as_str().unwrap().contains("1-Projects"));
        assert_eq!(updated["moved"]["reason"], "project-change");
    }

    #[tokio::test]
    async fn update_unknown_uid_is_not_found() {
        let (_dir, ctx) = test_context();
        let err = UpdateNoteTool
            .call(json!({"uid": "20000101T000000000000Z", "title": "X"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_unknown_uid_is_noop_success() {
        let (_dir, ctx) = test_context();
        let out = DeleteNoteTool
            .call(json!({"uid": "20000101T000000000000Z"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["deleted"], json!(false));
    }

    #[tokio::test]
    async fn delete_scrubs_references() {
        let (_dir, ctx) = test_context();
        let b = CreateNoteTool
            .call(json!({"title": "B"}), &ctx)
            .await
            .unwrap();
        let b_uid = b["uid"].as_str().unwrap().to_string();
        let a = CreateNoteTool
            .call(json!({"title": "A", "content": format!("[[{b_uid}]]")}), &ctx)
            .await
            .unwrap();
        assert_eq!(a["links"], json!([b_uid.clone()]));

        let out = DeleteNoteTool
            .call(json!({"uid": b_uid}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["deleted"], json!(true));
        assert_eq!(out["cleanup"]["affected"], json!([a["uid"].as_str().unwrap()]));
    }
}
