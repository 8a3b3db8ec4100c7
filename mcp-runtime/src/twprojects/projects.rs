use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value, json};
use twmcp_core::RequestContext;

use super::{linked, list_query};
use crate::client::ProjectsClient;
use crate::params::{self, Param, ToolArgs};
use crate::protocol::ToolError;
use crate::toolsets::{BoxFuture, Method, ResourceTemplate, Tool};

pub const METHOD_PROJECT_CREATE: Method = Method::new("twprojects-create_project");
pub const METHOD_PROJECT_UPDATE: Method = Method::new("twprojects-update_project");
pub const METHOD_PROJECT_DELETE: Method = Method::new("twprojects-delete_project");
pub const METHOD_PROJECT_GET: Method = Method::new("twprojects-get_project");
pub const METHOD_PROJECT_LIST: Method = Method::new("twprojects-list_projects");

const WEB_PATH: &str = "app/projects";

const PROJECT_DESCRIPTION: &str = "A project in Teamwork.com is the workspace for one piece of work: \
    it groups task lists, milestones, files and time tracking, and carries its own team, \
    dates and owner.";

/// Fields shared by project create and update. Dates go out in the legacy
/// compact format the projects write endpoints expect.
#[derive(Debug, Default, Serialize)]
struct ProjectFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(
        rename = "start-date",
        serialize_with = "params::legacy_date::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    start_at: Option<NaiveDate>,
    #[serde(
        rename = "end-date",
        serialize_with = "params::legacy_date::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    end_at: Option<NaiveDate>,
    #[serde(rename = "companyId", skip_serializing_if = "Option::is_none")]
    company_id: Option<i64>,
    #[serde(rename = "projectOwnerId", skip_serializing_if = "Option::is_none")]
    owner_id: Option<i64>,
    #[serde(rename = "tagIds", serialize_with = "comma_list", skip_serializing_if = "Option::is_none")]
    tag_ids: Option<Vec<i64>>,
}

impl ProjectFields {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![
            Param::string("description", &mut self.description)
                .describe("The description of the project."),
            Param::date("start_at", &mut self.start_at)
                .describe("The start date of the project (YYYY-MM-DD or YYYYMMDD)."),
            Param::date("end_at", &mut self.end_at)
                .describe("The end date of the project (YYYY-MM-DD or YYYYMMDD)."),
            Param::integer("company_id", &mut self.company_id)
                .describe("The ID of the company associated with the project."),
            Param::integer("owner_id", &mut self.owner_id)
                .describe("The ID of the user who owns the project."),
            Param::integer_list("tag_ids", &mut self.tag_ids)
                .describe("Tag IDs to associate with the project."),
        ]
    }
}

fn comma_list<S: serde::Serializer>(ids: &Option<Vec<i64>>, s: S) -> Result<S::Ok, S::Error> {
    match ids {
        Some(ids) => s.serialize_str(
            &ids.iter().map(i64::to_string).collect::<Vec<_>>().join(","),
        ),
        None => s.serialize_none(),
    }
}

#[derive(Serialize)]
struct ProjectPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(flatten)]
    fields: &'a ProjectFields,
}

#[derive(Debug, Default)]
struct CreateProject {
    name: String,
    fields: ProjectFields,
}

impl ToolArgs for CreateProject {
    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params =
            vec![Param::string("name", &mut self.name).describe("The name of the project.")];
        params.extend(self.fields.params());
        params
    }
}

#[derive(Debug, Default)]
struct UpdateProject {
    id: i64,
    name: Option<String>,
    fields: ProjectFields,
}

impl ToolArgs for UpdateProject {
    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params = vec![
            Param::integer("id", &mut self.id).describe("The ID of the project to update."),
            Param::string("name", &mut self.name).describe("The new name of the project."),
        ];
        params.extend(self.fields.params());
        params
    }
}

#[derive(Debug, Default)]
struct ProjectId {
    id: i64,
}

impl ToolArgs for ProjectId {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![Param::integer("id", &mut self.id).describe("The ID of the project.")]
    }
}

#[derive(Debug, Default)]
struct ListProjects {
    search_term: Option<String>,
    tag_ids: Option<Vec<i64>>,
    match_all_tags: Option<bool>,
    page: Option<i64>,
    page_size: Option<i64>,
}

impl ToolArgs for ListProjects {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![
            Param::string("search_term", &mut self.search_term)
                .describe("Filter projects whose name contains this term."),
            Param::integer_list("tag_ids", &mut self.tag_ids).describe("Filter projects by tag IDs."),
            Param::boolean("match_all_tags", &mut self.match_all_tags)
                .describe("Require every tag in tag_ids instead of any. Defaults to false."),
            Param::integer("page", &mut self.page).describe("Page number, starting at 1."),
            Param::integer("page_size", &mut self.page_size).describe("Results per page."),
        ]
    }
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(super) fn create(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_PROJECT_CREATE,
        format!("Create a new project in Teamwork.com. {PROJECT_DESCRIPTION}"),
        move |ctx, args: CreateProject| {
            let client = Arc::clone(&client);
            async move {
                let payload = ProjectPayload {
                    name: Some(&args.name),
                    fields: &args.fields,
                };
                let body = client
                    .post(&ctx, "/projects.json", &json!({ "project": payload }))
                    .await?;
                Ok(Value::String(format!(
                    "Project created successfully with ID {}",
                    id_text(&body["id"])
                )))
            }
        },
    )
}

pub(super) fn update(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_PROJECT_UPDATE,
        format!("Update an existing project in Teamwork.com. {PROJECT_DESCRIPTION}"),
        move |ctx, args: UpdateProject| {
            let client = Arc::clone(&client);
            async move {
                let payload = ProjectPayload {
                    name: args.name.as_deref(),
                    fields: &args.fields,
                };
                client
                    .put(&ctx, &format!("/projects/{}.json", args.id), &json!({ "project": payload }))
                    .await?;
                Ok(Value::String("Project updated successfully".to_string()))
            }
        },
    )
}

pub(super) fn delete(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_PROJECT_DELETE,
        format!("Delete an existing project in Teamwork.com. {PROJECT_DESCRIPTION}"),
        move |ctx, args: ProjectId| {
            let client = Arc::clone(&client);
            async move {
                client.delete(&ctx, &format!("/projects/{}.json", args.id)).await?;
                Ok(Value::String("Project deleted successfully".to_string()))
            }
        },
    )
    .destructive()
}

async fn fetch(client: &ProjectsClient, ctx: &RequestContext, id: i64) -> Result<Value, ToolError> {
    let body = client
        .get(ctx, &format!("/projects/api/v3/projects/{id}.json"), &[])
        .await?;
    Ok(linked(body, ctx, WEB_PATH))
}

pub(super) fn get(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_PROJECT_GET,
        format!("Get an existing project in Teamwork.com. {PROJECT_DESCRIPTION}"),
        move |ctx, args: ProjectId| {
            let client = Arc::clone(&client);
            async move { fetch(&client, &ctx, args.id).await }
        },
    )
}

pub(super) fn list(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_PROJECT_LIST,
        format!("List projects in Teamwork.com. {PROJECT_DESCRIPTION}"),
        move |ctx, args: ListProjects| {
            let client = Arc::clone(&client);
            async move {
                let query = list_query(
                    &args.search_term,
                    &args.tag_ids,
                    args.match_all_tags,
                    args.page,
                    args.page_size,
                );
                let body = client
                    .get(&ctx, "/projects/api/v3/projects.json", &query)
                    .await?;
                Ok(linked(body, &ctx, WEB_PATH))
            }
        },
    )
}

/// `twprojects://projects/{id}`: the project document as JSON.
pub(super) fn resource(client: &Arc<ProjectsClient>) -> ResourceTemplate {
    let client = Arc::clone(client);
    ResourceTemplate {
        uri_template: "twprojects://projects/{id}",
        name: "project",
        description: "A Teamwork.com project, including its web link.",
        mime_type: "application/json",
        handler: Arc::new(
            move |ctx: RequestContext, vars: Map<String, Value>| -> BoxFuture<Result<Value, ToolError>> {
                let client = Arc::clone(&client);
                Box::pin(async move {
                    let args = params::bind::<ProjectId>(&vars)?;
                    fetch(&client, &ctx, args.id).await
                })
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::context;
    use crate::twprojects::tests::{args, find, spawn_projects_api};
    use crate::twprojects::toolset;

    #[tokio::test]
    async fn create_sends_legacy_dates_and_reports_id() {
        let (stub, client, base) = spawn_projects_api().await;
        let toolset = toolset(client);
        let ctx = context(&base, true);

        let out = find(&toolset, METHOD_PROJECT_CREATE)
            .call(
                ctx,
                args(json!({
                    "name": "Launch",
                    "start_at": "2024-05-01",
                    "end_at": "20240630",
                    "tag_ids": [3, 4]
                })),
            )
            .await
            .expect("created");
        assert_eq!(out, json!("Project created successfully with ID 77"));

        let sent = stub.last();
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.path, "/projects.json");
        assert_eq!(
            sent.body,
            json!({ "project": {
                "name": "Launch",
                "start-date": "20240501",
                "end-date": "20240630",
                "tagIds": "3,4"
            } })
        );
    }

    #[tokio::test]
    async fn get_adds_web_link() {
        let (_stub, client, base) = spawn_projects_api().await;
        let toolset = toolset(client);
        let out = find(&toolset, METHOD_PROJECT_GET)
            .call(context(&base, true), args(json!({ "id": 3 })))
            .await
            .expect("project");
        assert_eq!(out["project"]["webLink"], format!("{base}/app/projects/3"));
    }

    #[tokio::test]
    async fn resource_template_reads_project_by_uri() {
        let (stub, client, base) = spawn_projects_api().await;
        let template = resource(&client);
        let vars = template.match_uri("twprojects://projects/3").expect("matches");
        let out = (template.handler)(context(&base, true), vars).await.expect("read");
        assert_eq!(out["project"]["name"], "Launch");
        assert_eq!(stub.last().path, "/projects/api/v3/projects/3.json");
    }

    #[tokio::test]
    async fn downstream_client_errors_propagate_with_status() {
        let (_stub, client, base) = spawn_projects_api().await;
        let toolset = toolset(client);
        let err = find(&toolset, METHOD_PROJECT_DELETE)
            .call(context(&base, true), args(json!({ "id": 404 })))
            .await
            .expect_err("missing project");
        assert!(matches!(&err, ToolError::Downstream(e) if e.is_client_error()));
    }
}
