use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};

use super::{linked, list_query};
use crate::client::ProjectsClient;
use crate::params::{Param, ToolArgs};
use crate::toolsets::{Method, Tool};

pub const METHOD_TASK_CREATE: Method = Method::new("twprojects-create_task");
pub const METHOD_TASK_UPDATE: Method = Method::new("twprojects-update_task");
pub const METHOD_TASK_DELETE: Method = Method::new("twprojects-delete_task");
pub const METHOD_TASK_GET: Method = Method::new("twprojects-get_task");
pub const METHOD_TASK_LIST: Method = Method::new("twprojects-list_tasks");
pub const METHOD_TASK_LIST_BY_TASKLIST: Method = Method::new("twprojects-list_tasks_by_tasklist");
pub const METHOD_TASK_LIST_BY_PROJECT: Method = Method::new("twprojects-list_tasks_by_project");

const WEB_PATH: &str = "app/tasks";

const TASK_DESCRIPTION: &str = "A task in Teamwork.com is a unit of work inside a task list. \
    It can have assignees, a priority, a due date, an estimate and tags.";

const PRIORITIES: &[&str] = &["low", "medium", "high"];

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Assignees {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_ids: Option<Vec<i64>>,
}

impl ToolArgs for Assignees {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![
            Param::integer_list("user_ids", &mut self.user_ids).describe("User IDs to assign."),
            Param::integer_list("company_ids", &mut self.company_ids)
                .describe("Company IDs to assign."),
            Param::integer_list("team_ids", &mut self.team_ids).describe("Team IDs to assign."),
        ]
    }
}

/// Optional task fields shared by create and update.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<i64>,
    #[serde(rename = "startAt", skip_serializing_if = "Option::is_none")]
    start_date: Option<NaiveDate>,
    #[serde(rename = "dueAt", skip_serializing_if = "Option::is_none")]
    due_date: Option<NaiveDate>,
    #[serde(rename = "estimateMinutes", skip_serializing_if = "Option::is_none")]
    estimated_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignees: Option<Assignees>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_ids: Option<Vec<i64>>,
}

impl TaskFields {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![
            Param::string("description", &mut self.description)
                .describe("The description of the task."),
            Param::string("priority", &mut self.priority)
                .describe("The priority of the task.")
                .one_of(PRIORITIES),
            Param::integer("progress", &mut self.progress)
                .describe("Completion percentage, 0 to 100."),
            Param::date("start_date", &mut self.start_date)
                .describe("The start date of the task (YYYY-MM-DD)."),
            Param::date("due_date", &mut self.due_date)
                .describe("The due date of the task (YYYY-MM-DD)."),
            Param::integer("estimated_minutes", &mut self.estimated_minutes)
                .describe("Estimated time to complete the task, in minutes."),
            Param::object("assignees", &mut self.assignees)
                .describe("Users, companies or teams to assign the task to."),
            Param::integer_list("tag_ids", &mut self.tag_ids)
                .describe("Tag IDs to associate with the task."),
        ]
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tasklist_id: Option<i64>,
    #[serde(flatten)]
    fields: &'a TaskFields,
}

#[derive(Debug, Default)]
struct CreateTask {
    name: String,
    tasklist_id: i64,
    fields: TaskFields,
}

impl ToolArgs for CreateTask {
    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params = vec![
            Param::string("name", &mut self.name).describe("The name of the task."),
            Param::integer("tasklist_id", &mut self.tasklist_id)
                .describe("The ID of the task list that will hold the task."),
        ];
        params.extend(self.fields.params());
        params
    }
}

#[derive(Debug, Default)]
struct UpdateTask {
    id: i64,
    name: Option<String>,
    tasklist_id: Option<i64>,
    fields: TaskFields,
}

impl ToolArgs for UpdateTask {
    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params = vec![
            Param::integer("id", &mut self.id).describe("The ID of the task to update."),
            Param::string("name", &mut self.name).describe("The new name of the task."),
            Param::integer("tasklist_id", &mut self.tasklist_id)
                .describe("Move the task to this task list."),
        ];
        params.extend(self.fields.params());
        params
    }
}

#[derive(Debug, Default)]
struct TaskId {
    id: i64,
}

impl ToolArgs for TaskId {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![Param::integer("id", &mut self.id).describe("The ID of the task.")]
    }
}

#[derive(Debug, Default)]
struct TaskFilters {
    search_term: Option<String>,
    tag_ids: Option<Vec<i64>>,
    match_all_tags: Option<bool>,
    page: Option<i64>,
    page_size: Option<i64>,
}

impl ToolArgs for TaskFilters {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![
            Param::string("search_term", &mut self.search_term)
                .describe("Filter tasks whose name contains this term."),
            Param::integer_list("tag_ids", &mut self.tag_ids).describe("Filter tasks by tag IDs."),
            Param::boolean("match_all_tags", &mut self.match_all_tags)
                .describe("Require every tag in tag_ids instead of any. Defaults to false."),
            Param::integer("page", &mut self.page).describe("Page number, starting at 1."),
            Param::integer("page_size", &mut self.page_size).describe("Results per page."),
        ]
    }
}

impl TaskFilters {
    fn query(&self) -> Vec<(&'static str, String)> {
        list_query(
            &self.search_term,
            &self.tag_ids,
            self.match_all_tags,
            self.page,
            self.page_size,
        )
    }
}

#[derive(Debug, Default)]
struct TasklistTasks {
    tasklist_id: i64,
    filters: TaskFilters,
}

impl ToolArgs for TasklistTasks {
    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params = vec![
            Param::integer("tasklist_id", &mut self.tasklist_id)
                .describe("The ID of the task list."),
        ];
        params.extend(self.filters.params());
        params
    }
}

#[derive(Debug, Default)]
struct ProjectTasks {
    project_id: i64,
    filters: TaskFilters,
}

impl ToolArgs for ProjectTasks {
    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params = vec![
            Param::integer("project_id", &mut self.project_id).describe("The ID of the project."),
        ];
        params.extend(self.filters.params());
        params
    }
}

pub(super) fn create(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_CREATE,
        format!("Create a new task in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: CreateTask| {
            let client = Arc::clone(&client);
            async move {
                let payload = TaskPayload {
                    name: Some(&args.name),
                    tasklist_id: None,
                    fields: &args.fields,
                };
                let path = format!("/projects/api/v3/tasklists/{}/tasks.json", args.tasklist_id);
                let body = client.post(&ctx, &path, &json!({ "task": payload })).await?;
                Ok(Value::String(format!(
                    "Task created successfully with ID {}",
                    body["task"]["id"]
                )))
            }
        },
    )
}

pub(super) fn update(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_UPDATE,
        format!("Update an existing task in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: UpdateTask| {
            let client = Arc::clone(&client);
            async move {
                let payload = TaskPayload {
                    name: args.name.as_deref(),
                    tasklist_id: args.tasklist_id,
                    fields: &args.fields,
                };
                let path = format!("/projects/api/v3/tasks/{}.json", args.id);
                client.patch(&ctx, &path, &json!({ "task": payload })).await?;
                Ok(Value::String("Task updated successfully".to_string()))
            }
        },
    )
}

pub(super) fn delete(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_DELETE,
        format!("Delete an existing task in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: TaskId| {
            let client = Arc::clone(&client);
            async move {
                let path = format!("/projects/api/v3/tasks/{}.json", args.id);
                client.delete(&ctx, &path).await?;
                Ok(Value::String("Task deleted successfully".to_string()))
            }
        },
    )
    .destructive()
}

pub(super) fn get(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_GET,
        format!("Get an existing task in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: TaskId| {
            let client = Arc::clone(&client);
            async move {
                let path = format!("/projects/api/v3/tasks/{}.json", args.id);
                let body = client.get(&ctx, &path, &[]).await?;
                Ok(linked(body, &ctx, WEB_PATH))
            }
        },
    )
}

pub(super) fn list(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_LIST,
        format!("List tasks across all projects in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: TaskFilters| {
            let client = Arc::clone(&client);
            async move {
                let body = client
                    .get(&ctx, "/projects/api/v3/tasks.json", &args.query())
                    .await?;
                Ok(linked(body, &ctx, WEB_PATH))
            }
        },
    )
}

pub(super) fn list_by_tasklist(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_LIST_BY_TASKLIST,
        format!("List tasks in a specific task list in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: TasklistTasks| {
            let client = Arc::clone(&client);
            async move {
                let path = format!("/projects/api/v3/tasklists/{}/tasks.json", args.tasklist_id);
                let body = client.get(&ctx, &path, &args.filters.query()).await?;
                Ok(linked(body, &ctx, WEB_PATH))
            }
        },
    )
}

pub(super) fn list_by_project(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_TASK_LIST_BY_PROJECT,
        format!("List tasks in a specific project in Teamwork.com. {TASK_DESCRIPTION}"),
        move |ctx, args: ProjectTasks| {
            let client = Arc::clone(&client);
            async move {
                let path = format!("/projects/api/v3/projects/{}/tasks.json", args.project_id);
                let body = client.get(&ctx, &path, &args.filters.query()).await?;
                Ok(linked(body, &ctx, WEB_PATH))
            }
        },
    )
}
