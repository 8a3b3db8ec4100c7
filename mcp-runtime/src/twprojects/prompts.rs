use std::sync::Arc;

use serde_json::{Map, Value, json};
use twmcp_core::RequestContext;

use crate::client::ProjectsClient;
use crate::params::{self, Param, ParamError, ParamErrors, ToolArgs};
use crate::protocol::ToolError;
use crate::toolsets::{BoxFuture, Prompt, PromptArgument};

const PROMPT_NAME: &str = "twprojects_task_skills_and_roles";
const TASK_ID_DESCRIPTION: &str = "The ID of the task to analyse. Find it with \
                                   twprojects-list_tasks or on the Teamwork.com website.";

/// Upper bound on pages fetched per catalogue.
const MAX_PAGES: u32 = 50;
const PAGE_SIZE: &str = "100";

const INSTRUCTIONS: &str = r#"You are an expert project manager working in Teamwork.com. Read the task details below and pick the skills and job roles best suited to it, given the task and its project. Only choose skills and job roles that are listed as available in the organization.

Reply with a single JSON object and nothing else:

{
  "skillIds": [1, 2],
  "jobRoleIds": [3, 4],
  "reasoning": "Why these were chosen"
}

Both arrays hold unique integer IDs and may be empty. Never invent skills or job roles."#;

/// Prompt arguments always arrive as strings.
#[derive(Debug, Default)]
struct TaskPromptArgs {
    task_id: String,
}

impl ToolArgs for TaskPromptArgs {
    fn params(&mut self) -> Vec<Param<'_>> {
        vec![Param::string("task_id", &mut self.task_id).describe(TASK_ID_DESCRIPTION)]
    }
}

impl TaskPromptArgs {
    fn task_id(&self) -> Result<i64, ParamErrors> {
        self.task_id
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                ParamErrors::single(ParamError::WrongType {
                    field: "task_id".to_string(),
                    expected: "a positive integer",
                })
            })
    }
}

/// `id: name` lines for every entry of a paginated catalogue.
async fn catalogue(
    client: &ProjectsClient,
    ctx: &RequestContext,
    path: &str,
    key: &str,
) -> Result<Vec<String>, ToolError> {
    let mut entries = Vec::new();
    for page in 1..=MAX_PAGES {
        let query = [("page", page.to_string()), ("pageSize", PAGE_SIZE.to_string())];
        let body = client.get(ctx, path, &query).await?;
        entries.extend(body[key].as_array().into_iter().flatten().filter_map(|item| {
            let name = item["name"].as_str()?;
            Some(format!("{}: {name}", item["id"]))
        }));
        if !body["meta"]["page"]["hasMore"].as_bool().unwrap_or(false) {
            break;
        }
    }
    Ok(entries)
}

fn listing(entries: &[String], empty: &str) -> String {
    if entries.is_empty() {
        empty.to_string()
    } else {
        entries.join("\n")
    }
}

fn text_message(text: String) -> Value {
    json!({ "role": "user", "content": { "type": "text", "text": text } })
}

async fn render(
    client: &ProjectsClient,
    ctx: &RequestContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let task_id = params::bind::<TaskPromptArgs>(args)?.task_id()?;

    let task = client
        .get(ctx, &format!("/projects/api/v3/tasks/{task_id}.json"), &[])
        .await?;
    let task = &task["task"];
    let tasklist_id = task["tasklistId"]
        .as_i64()
        .ok_or_else(|| ToolError::Rejected(format!("task {task_id} has no task list")))?;
    let tasklist = client
        .get(ctx, &format!("/projects/api/v3/tasklists/{tasklist_id}.json"), &[])
        .await?;
    let tasklist = &tasklist["tasklist"];
    let project_id = tasklist["projectId"]
        .as_i64()
        .ok_or_else(|| ToolError::Rejected(format!("task list {tasklist_id} has no project")))?;
    let project = client
        .get(ctx, &format!("/projects/api/v3/projects/{project_id}.json"), &[])
        .await?;
    let project = &project["project"];

    let skills = catalogue(client, ctx, "/projects/api/v3/skills.json", "skills").await?;
    let job_roles = catalogue(client, ctx, "/projects/api/v3/jobroles.json", "jobRoles").await?;
    if skills.is_empty() && job_roles.is_empty() {
        return Err(ToolError::Rejected(
            "no skills or job roles found in the organization".to_string(),
        ));
    }

    let text = |v: &Value| v.as_str().unwrap_or_default().to_string();
    let details = format!(
        "Available skills:\n---\n{}\n---\n\nAvailable job roles:\n---\n{}\n---\n\n\
         Task to analyse:\n---\nTask name: {}\nTask description: {}\nTask list: {}\n\
         Project name: {}\nProject description: {}\n---",
        listing(&skills, "No skills available in the organization."),
        listing(&job_roles, "No job roles available in the organization."),
        text(&task["name"]),
        text(&task["description"]),
        text(&tasklist["name"]),
        text(&project["name"]),
        text(&project["description"]),
    );

    Ok(json!({
        "description": format!("Skills and job roles analysis for task {task_id}"),
        "messages": [text_message(INSTRUCTIONS.to_string()), text_message(details)],
    }))
}

pub(super) fn task_skills_and_roles(client: &Arc<ProjectsClient>) -> Prompt {
    let client = Arc::clone(client);
    Prompt {
        name: PROMPT_NAME,
        title: "Teamwork.com Task Skills and Job Roles Analysis",
        description: "Analyse a Teamwork.com task and suggest the skills and job roles that fit \
                      its requirements and its place in the project.",
        arguments: vec![PromptArgument {
            name: "task_id",
            description: TASK_ID_DESCRIPTION,
            required: true,
        }],
        handler: Arc::new(
            move |ctx: RequestContext, args: Map<String, Value>| -> BoxFuture<Result<Value, ToolError>> {
                let client = Arc::clone(&client);
                Box::pin(async move { render(&client, &ctx, &args).await })
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::context;
    use crate::twprojects::tests::{args, spawn_projects_api};

    #[tokio::test]
    async fn renders_task_context_and_catalogues() {
        let (stub, client, base) = spawn_projects_api().await;
        let prompt = task_skills_and_roles(&client);
        let out = (prompt.handler)(context(&base, true), args(json!({ "task_id": "5" })))
            .await
            .expect("prompt");

        let messages = out["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert!(messages[0]["content"]["text"].as_str().unwrap().contains("skillIds"));
        let details = messages[1]["content"]["text"].as_str().unwrap();
        assert!(details.contains("1: Rust"));
        assert!(details.contains("4: Engineer"));
        assert!(details.contains("Task name: Write docs"));
        assert!(details.contains("Task list: Backlog"));
        assert!(details.contains("Project name: Launch"));

        let last = stub.last();
        assert_eq!(last.path, "/projects/api/v3/jobroles.json");
        assert_eq!(last.query.get("page").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn task_id_must_be_a_positive_integer() {
        let (stub, client, base) = spawn_projects_api().await;
        let prompt = task_skills_and_roles(&client);
        let cases = [
            (json!({ "task_id": "abc" }), "a positive integer"),
            (json!({ "task_id": "-3" }), "a positive integer"),
            (json!({ "task_id": 5 }), "a string"),
            (json!({}), "missing"),
        ];
        for (bad, reason) in cases {
            let err = (prompt.handler)(context(&base, true), args(bad.clone()))
                .await
                .expect_err("rejected");
            let ToolError::InvalidParams(errors) = err else {
                panic!("expected invalid params for {bad}");
            };
            assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["task_id"]);
            assert!(errors.to_string().contains(reason), "{bad}: {errors}");
        }
        assert!(stub.captured.lock().expect("lock").is_empty());
    }
}
