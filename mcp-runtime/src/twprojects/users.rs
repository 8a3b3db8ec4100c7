use std::sync::Arc;

use super::linked;
use crate::client::ProjectsClient;
use crate::params::{Param, ToolArgs};
use crate::toolsets::{Method, Tool};

pub const METHOD_USER_GET_ME: Method = Method::new("twprojects-get_me");

#[derive(Debug, Default)]
struct NoArgs;

impl ToolArgs for NoArgs {
    fn params(&mut self) -> Vec<Param<'_>> {
        Vec::new()
    }
}

pub(super) fn get_me(client: &Arc<ProjectsClient>) -> Tool {
    let client = Arc::clone(client);
    Tool::new(
        METHOD_USER_GET_ME,
        "Get the logged-in user in Teamwork.com. A user is anyone with access to the site: \
         a member of the owner company, a client user or a collaborator.",
        move |ctx, _: NoArgs| {
            let client = Arc::clone(&client);
            async move {
                let body = client.get(&ctx, "/projects/api/v3/me.json", &[]).await?;
                Ok(linked(body, &ctx, "app/people"))
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::context;
    use crate::twprojects::tests::{args, find, spawn_projects_api};
    use crate::twprojects::toolset;

    #[tokio::test]
    async fn get_me_links_the_person() {
        let (_stub, client, base) = spawn_projects_api().await;
        let toolset = toolset(client);
        let tool = find(&toolset, METHOD_USER_GET_ME);
        assert_eq!(tool.input_schema, json!({ "type": "object", "properties": {} }));

        let out = tool.call(context(&base, true), args(json!({}))).await.expect("me");
        assert_eq!(out["person"]["webLink"], format!("{base}/app/people/7"));
    }
}
