//! Teamwork Projects operations.
//!
//! Method names follow `twprojects-<verb>_<entity>`.

mod projects;
mod prompts;
mod tasks;
mod users;

use std::sync::Arc;

use serde_json::Value;
use twmcp_core::RequestContext;

use crate::client::ProjectsClient;
use crate::toolsets::{Method, MethodRegistry, Toolset, ToolsetError, ToolsetGroup};
use crate::weblink::add_web_links;

pub use projects::{
    METHOD_PROJECT_CREATE, METHOD_PROJECT_DELETE, METHOD_PROJECT_GET, METHOD_PROJECT_LIST,
    METHOD_PROJECT_UPDATE,
};
pub use tasks::{
    METHOD_TASK_CREATE, METHOD_TASK_DELETE, METHOD_TASK_GET, METHOD_TASK_LIST,
    METHOD_TASK_LIST_BY_PROJECT, METHOD_TASK_LIST_BY_TASKLIST, METHOD_TASK_UPDATE,
};
pub use users::METHOD_USER_GET_ME;

pub const TOOLSET_NAME: &str = "twprojects";
pub const REQUIRED_SCOPE: &str = "projects";

const TOOLSET_DESCRIPTION: &str = "Teamwork.com project management: projects, tasks and the current user.";

/// Every method this module serves, in registration order.
pub const METHODS: [Method; 13] = [
    METHOD_PROJECT_CREATE,
    METHOD_PROJECT_UPDATE,
    METHOD_PROJECT_DELETE,
    METHOD_PROJECT_GET,
    METHOD_PROJECT_LIST,
    METHOD_TASK_CREATE,
    METHOD_TASK_UPDATE,
    METHOD_TASK_DELETE,
    METHOD_TASK_GET,
    METHOD_TASK_LIST,
    METHOD_TASK_LIST_BY_TASKLIST,
    METHOD_TASK_LIST_BY_PROJECT,
    METHOD_USER_GET_ME,
];

pub fn register_methods(registry: &mut MethodRegistry) -> Result<(), ToolsetError> {
    registry.register_all(METHODS)
}

pub fn toolset(client: Arc<ProjectsClient>) -> Toolset {
    Toolset::new(TOOLSET_NAME, TOOLSET_DESCRIPTION)
        .with_scope(REQUIRED_SCOPE)
        .add_write_tools([
            projects::create(&client),
            projects::update(&client),
            projects::delete(&client),
            tasks::create(&client),
            tasks::update(&client),
            tasks::delete(&client),
        ])
        .add_read_tools([
            projects::get(&client),
            projects::list(&client),
            tasks::get(&client),
            tasks::list(&client),
            tasks::list_by_tasklist(&client),
            tasks::list_by_project(&client),
            users::get_me(&client),
        ])
        .add_prompts([prompts::task_skills_and_roles(&client)])
        .add_resource_templates([projects::resource(&client)])
}

/// Group holding the Projects toolset, not yet narrowed.
pub fn default_toolset_group(
    read_only: bool,
    allow_destructive: bool,
    client: Arc<ProjectsClient>,
) -> ToolsetGroup {
    let mut group = ToolsetGroup::new(read_only, allow_destructive);
    group.add_toolset(toolset(client));
    group
}

fn linked(mut body: Value, ctx: &RequestContext, entity_path: &str) -> Value {
    add_web_links(&mut body, ctx.installation_url(), entity_path);
    body
}

/// Query pairs shared by list endpoints.
fn list_query(
    search_term: &Option<String>,
    tag_ids: &Option<Vec<i64>>,
    match_all_tags: Option<bool>,
    page: Option<i64>,
    page_size: Option<i64>,
) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(term) = search_term {
        query.push(("searchTerm", term.clone()));
    }
    if let Some(ids) = tag_ids.as_ref().filter(|ids| !ids.is_empty()) {
        let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
        query.push(("tagIds", joined));
    }
    if let Some(all) = match_all_tags {
        query.push(("matchAllTags", all.to_string()));
    }
    if let Some(page) = page {
        query.push(("page", page.to_string()));
    }
    if let Some(size) = page_size {
        query.push(("pageSize", size.to_string()));
    }
    query
}
