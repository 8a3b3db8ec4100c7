//! Method registry and toolset capability gating.
//!
//! The registry is filled once at startup and then only read. A
//! [`ToolsetGroup`] is narrowed once by [`ToolsetGroup::enable_toolsets`] and
//! shared behind an `Arc` for the rest of the process lifetime.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use twmcp_core::RequestContext;

use crate::params::{self, ToolArgs};
use crate::protocol::ToolError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Request-scoped entry point shared by tools, prompts and resource templates.
pub type Handler =
    Arc<dyn Fn(RequestContext, Map<String, Value>) -> BoxFuture<Result<Value, ToolError>> + Send + Sync>;

/// Globally unique operation identifier, `<toolset>-<verb>_<entity>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Method(&'static str);

impl Method {
    /// Reserved wildcard meaning every registered method.
    pub const ALL: Method = Method("all");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolsetError {
    #[error("method {0} registered twice")]
    DuplicateMethod(Method),
    #[error("method name {0} is reserved")]
    ReservedMethod(Method),
    #[error("unknown methods: {}", .0.join(", "))]
    UnknownMethods(Vec<String>),
}

/// Append-only set of known methods, in registration order.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    ordered: Vec<Method>,
    known: HashSet<&'static str>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Method) -> Result<(), ToolsetError> {
        if method == Method::ALL {
            return Err(ToolsetError::ReservedMethod(method));
        }
        if !self.known.insert(method.as_str()) {
            return Err(ToolsetError::DuplicateMethod(method));
        }
        self.ordered.push(method);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        methods: impl IntoIterator<Item = Method>,
    ) -> Result<(), ToolsetError> {
        methods.into_iter().try_for_each(|m| self.register(m))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn methods(&self) -> &[Method] {
        &self.ordered
    }

    /// Validate an enablement request in one pass.
    ///
    /// Every unknown name is collected; `all` anywhere in the list selects
    /// every registered method.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<MethodFilter, ToolsetError> {
        let mut unknown = Vec::new();
        let mut selected = HashSet::new();
        let mut wildcard = false;
        for name in requested {
            let name = name.as_ref().trim();
            if name == Method::ALL.as_str() {
                wildcard = true;
            } else if let Some(method) = self.ordered.iter().find(|m| m.as_str() == name) {
                selected.insert(*method);
            } else {
                unknown.push(name.to_string());
            }
        }
        if !unknown.is_empty() {
            return Err(ToolsetError::UnknownMethods(unknown));
        }
        Ok(if wildcard {
            MethodFilter::All
        } else {
            MethodFilter::Only(selected)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    All,
    Only(HashSet<Method>),
}

impl MethodFilter {
    pub fn allows(&self, method: Method) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&method),
        }
    }
}

/// A dispatchable operation.
#[derive(Clone)]
pub struct Tool {
    pub method: Method,
    pub description: String,
    pub input_schema: Value,
    pub read_only: bool,
    pub destructive: bool,
    handler: Handler,
}

impl Tool {
    /// Build a tool whose schema and argument binding both come from `A`.
    pub fn new<A, F, Fut>(method: Method, description: impl Into<String>, run: F) -> Self
    where
        A: ToolArgs + Send + 'static,
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let run = Arc::new(run);
        let handler: Handler = Arc::new(
            move |ctx: RequestContext, args: Map<String, Value>| -> BoxFuture<Result<Value, ToolError>> {
                let run = Arc::clone(&run);
                Box::pin(async move {
                    let bound = params::bind::<A>(&args)?;
                    run(ctx, bound).await
                })
            },
        );
        Self {
            method,
            description: description.into(),
            input_schema: params::input_schema::<A>(),
            read_only: false,
            destructive: false,
            handler,
        }
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.method.as_str()
    }

    pub fn call(&self, ctx: RequestContext, args: Map<String, Value>) -> BoxFuture<Result<Value, ToolError>> {
        (self.handler)(ctx, args)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description,
            "inputSchema": self.input_schema,
            "annotations": {
                "readOnlyHint": self.read_only,
                "destructiveHint": self.destructive,
            }
        })
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("method", &self.method)
            .field("read_only", &self.read_only)
            .field("destructive", &self.destructive)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Clone)]
pub struct Prompt {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub arguments: Vec<PromptArgument>,
    pub handler: Handler,
}

impl Prompt {
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "arguments": self.arguments.iter().map(|a| json!({
                "name": a.name,
                "description": a.description,
                "required": a.required,
            })).collect::<Vec<_>>(),
        })
    }
}

/// URI template such as `twprojects://projects/{id}` with a single trailing
/// variable.
#[derive(Clone)]
pub struct ResourceTemplate {
    pub uri_template: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
    pub handler: Handler,
}

impl ResourceTemplate {
    /// Variables extracted from `uri`, or `None` when it does not match.
    pub fn match_uri(&self, uri: &str) -> Option<Map<String, Value>> {
        let (prefix, rest) = self.uri_template.split_once('{')?;
        let variable = rest.strip_suffix('}')?;
        let value = uri.strip_prefix(prefix)?;
        if value.is_empty() || value.contains('/') {
            return None;
        }
        let mut vars = Map::new();
        let bound = value
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        vars.insert(variable.to_string(), bound);
        Some(vars)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "uriTemplate": self.uri_template,
            "name": self.name,
            "description": self.description,
            "mimeType": self.mime_type,
        })
    }
}

/// Named group of related operations.
#[derive(Clone)]
pub struct Toolset {
    pub name: &'static str,
    pub description: &'static str,
    /// Scope an identity must carry to call this toolset's tools
    pub scope: Option<&'static str>,
    read_tools: Vec<Tool>,
    write_tools: Vec<Tool>,
    prompts: Vec<Prompt>,
    resource_templates: Vec<ResourceTemplate>,
}

impl Toolset {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            scope: None,
            read_tools: Vec::new(),
            write_tools: Vec::new(),
            prompts: Vec::new(),
            resource_templates: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: &'static str) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn add_read_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.read_tools.extend(tools.into_iter().map(|mut tool| {
            tool.read_only = true;
            tool
        }));
        self
    }

    pub fn add_write_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.write_tools.extend(tools.into_iter().map(|mut tool| {
            tool.read_only = false;
            tool
        }));
        self
    }

    pub fn add_prompts(mut self, prompts: impl IntoIterator<Item = Prompt>) -> Self {
        self.prompts.extend(prompts);
        self
    }

    pub fn add_resource_templates(
        mut self,
        templates: impl IntoIterator<Item = ResourceTemplate>,
    ) -> Self {
        self.resource_templates.extend(templates);
        self
    }

    pub fn write_tools(&self) -> &[Tool] {
        &self.write_tools
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.read_tools.iter().chain(self.write_tools.iter())
    }

    fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.tools().map(|tool| tool.method)
    }
}

/// Every toolset the process serves, plus the two gating flags.
pub struct ToolsetGroup {
    read_only: bool,
    allow_destructive: bool,
    toolsets: Vec<Toolset>,
}

impl ToolsetGroup {
    pub fn new(read_only: bool, allow_destructive: bool) -> Self {
        Self {
            read_only,
            allow_destructive,
            toolsets: Vec::new(),
        }
    }

    pub fn add_toolset(&mut self, toolset: Toolset) -> &mut Self {
        self.toolsets.push(toolset);
        self
    }

    /// Narrow every toolset to the requested methods. Called once at startup.
    ///
    /// The read-only flag is applied after filtering and strips every write
    /// tool even when it was named explicitly; destructive tools are removed
    /// unless the group allows them.
    pub fn enable_toolsets<S: AsRef<str>>(
        &mut self,
        registry: &MethodRegistry,
        methods: &[S],
    ) -> Result<(), ToolsetError> {
        let filter = registry.resolve(methods)?;

        let unregistered: Vec<String> = self
            .toolsets
            .iter()
            .flat_map(Toolset::methods)
            .filter(|m| !registry.contains(m.as_str()))
            .map(|m| m.to_string())
            .collect();
        if !unregistered.is_empty() {
            return Err(ToolsetError::UnknownMethods(unregistered));
        }

        let allow_destructive = self.allow_destructive;
        let keep = |tool: &Tool| filter.allows(tool.method) && (allow_destructive || !tool.destructive);
        for toolset in &mut self.toolsets {
            toolset.read_tools.retain(keep);
            toolset.write_tools.retain(keep);
            if self.read_only {
                toolset.write_tools.clear();
            }
        }

        tracing::info!(
            event = "toolsets_enabled",
            read_only = self.read_only,
            allow_destructive = self.allow_destructive,
            tools = self.tools().count(),
        );
        Ok(())
    }

    pub fn toolsets(&self) -> &[Toolset] {
        &self.toolsets
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.toolsets.iter().flat_map(Toolset::tools)
    }

    pub fn prompts(&self) -> impl Iterator<Item = &Prompt> {
        self.toolsets.iter().flat_map(|t| t.prompts.iter())
    }

    pub fn resource_templates(&self) -> impl Iterator<Item = &ResourceTemplate> {
        self.toolsets.iter().flat_map(|t| t.resource_templates.iter())
    }

    /// Enabled tool by name, with its owning toolset.
    pub fn find_tool(&self, name: &str) -> Option<(&Toolset, &Tool)> {
        self.toolsets.iter().find_map(|toolset| {
            toolset
                .tools()
                .find(|tool| tool.name() == name)
                .map(|tool| (toolset, tool))
        })
    }

    pub fn find_prompt(&self, name: &str) -> Option<(&Toolset, &Prompt)> {
        self.toolsets.iter().find_map(|toolset| {
            toolset
                .prompts
                .iter()
                .find(|prompt| prompt.name == name)
                .map(|prompt| (toolset, prompt))
        })
    }

    pub fn find_resource(
        &self,
        uri: &str,
    ) -> Option<(&Toolset, &ResourceTemplate, Map<String, Value>)> {
        self.toolsets.iter().find_map(|toolset| {
            toolset
                .resource_templates
                .iter()
                .find_map(|template| template.match_uri(uri).map(|vars| (toolset, template, vars)))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::params::Param;

    pub(crate) const LIST: Method = Method::new("demo-list_things");
    pub(crate) const GET: Method = Method::new("demo-get_thing");
    pub(crate) const CREATE: Method = Method::new("demo-create_thing");
    pub(crate) const DELETE: Method = Method::new("demo-delete_thing");

    #[derive(Debug, Default)]
    pub(crate) struct IdArgs {
        pub id: i64,
    }

    impl ToolArgs for IdArgs {
        fn params(&mut self) -> Vec<Param<'_>> {
            vec![Param::integer("id", &mut self.id)]
        }
    }

    pub(crate) fn echo_tool(method: Method) -> Tool {
        Tool::new(method, format!("{method} tool"), move |_ctx, args: IdArgs| async move {
            Ok(json!({ "method": method.as_str(), "id": args.id }))
        })
    }

    pub(crate) fn registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry
            .register_all([LIST, GET, CREATE, DELETE])
            .expect("unique methods");
        registry
    }

    pub(crate) fn demo_toolset() -> Toolset {
        Toolset::new("demo", "Demo things")
            .with_scope("projects")
            .add_read_tools([echo_tool(LIST), echo_tool(GET)])
            .add_write_tools([echo_tool(CREATE), echo_tool(DELETE).destructive()])
    }

    pub(crate) fn group(read_only: bool, allow_destructive: bool, methods: &[&str]) -> ToolsetGroup {
        let mut group = ToolsetGroup::new(read_only, allow_destructive);
        group.add_toolset(demo_toolset());
        group
            .enable_toolsets(&registry(), methods)
            .expect("known methods");
        group
    }

    fn names(group: &ToolsetGroup) -> Vec<&'static str> {
        group.tools().map(Tool::name).collect()
    }

    #[test]
    fn duplicate_and_reserved_registrations_fail() {
        let mut registry = registry();
        assert_eq!(registry.register(GET), Err(ToolsetError::DuplicateMethod(GET)));
        assert_eq!(
            registry.register(Method::new("all")),
            Err(ToolsetError::ReservedMethod(Method::ALL))
        );
        assert_eq!(registry.methods().len(), 4);
    }

    #[test]
    fn unknown_methods_are_reported_together() {
        let mut group = ToolsetGroup::new(false, true);
        group.add_toolset(demo_toolset());

        let err = group
            .enable_toolsets(&registry(), &["bogus-method"])
            .expect_err("unknown");
        assert_eq!(err, ToolsetError::UnknownMethods(vec!["bogus-method".to_string()]));

        let err = group
            .enable_toolsets(&registry(), &["bogus1", "demo-get_thing", "bogus2"])
            .expect_err("unknown");
        assert_eq!(
            err,
            ToolsetError::UnknownMethods(vec!["bogus1".to_string(), "bogus2".to_string()])
        );
        assert!(err.to_string().contains("bogus1, bogus2"));
    }

    #[test]
    fn wildcard_enables_every_registered_method() {
        let group = group(false, true, &["all"]);
        assert_eq!(
            names(&group),
            vec!["demo-list_things", "demo-get_thing", "demo-create_thing", "demo-delete_thing"]
        );
    }

    #[test]
    fn read_only_overrides_explicit_enablement() {
        let group = group(true, true, &["all"]);
        assert!(group.tools().all(|tool| tool.read_only));
        assert_eq!(names(&group), vec!["demo-list_things", "demo-get_thing"]);

        let group = self::group(true, true, &["demo-create_thing", "demo-get_thing"]);
        assert_eq!(names(&group), vec!["demo-get_thing"]);
    }

    #[test]
    fn destructive_tools_need_explicit_allowance() {
        let group = group(false, false, &["all"]);
        assert!(group.find_tool("demo-delete_thing").is_none());
        assert!(group.find_tool("demo-create_thing").is_some());
    }

    #[test]
    fn explicit_list_narrows_the_group() {
        let group = group(false, true, &["demo-get_thing"]);
        assert_eq!(names(&group), vec!["demo-get_thing"]);
        let (toolset, tool) = group.find_tool("demo-get_thing").expect("enabled");
        assert_eq!(toolset.scope, Some("projects"));
        assert_eq!(tool.to_value()["annotations"]["readOnlyHint"], true);
        assert_eq!(tool.to_value()["inputSchema"]["required"], json!(["id"]));
    }

    #[test]
    fn tools_of_unregistered_methods_are_rejected_at_enablement() {
        let mut group = ToolsetGroup::new(false, true);
        group.add_toolset(
            Toolset::new("stray", "Unregistered").add_read_tools([echo_tool(Method::new("stray-get"))]),
        );
        let err = group.enable_toolsets(&registry(), &["all"]).expect_err("unregistered");
        assert_eq!(err, ToolsetError::UnknownMethods(vec!["stray-get".to_string()]));
    }

    #[test]
    fn resource_templates_match_single_trailing_variable() {
        let template = ResourceTemplate {
            uri_template: "demo://things/{id}",
            name: "thing",
            description: "A thing",
            mime_type: "application/json",
            handler: Arc::new(
                |_ctx: RequestContext, vars: Map<String, Value>| -> BoxFuture<Result<Value, ToolError>> {
                    Box::pin(async move { Ok(Value::Object(vars)) })
                },
            ),
        };
        assert_eq!(template.match_uri("demo://things/12"), Some(Map::from_iter([("id".to_string(), json!(12))])));
        assert!(template.match_uri("demo://things/").is_none());
        assert!(template.match_uri("demo://things/1/2").is_none());
        assert!(template.match_uri("other://things/1").is_none());
    }
}
