//! Workflow execution engine.
//!
//! Executes a single workflow: builds the dependency graph from `(nodes,
//! edges)`, orders it with Kahn's algorithm, and runs each node
//! sequentially in topological order, threading a [`WorkflowContext`]
//! through.  A cycle fails the whole run before any node executes.
//!
//! Error containment is fail-fast: the first node to fail is recorded with
//! its error, the execution transitions to `failed`, and later nodes are
//! neither executed nor recorded.

use crate::agentflow::error::PlatformError;
use crate::agentflow::models::{
    ExecutionStatus, Node, NodeRunRecord, Workflow, WorkflowExecution,
};
use crate::agentflow::repository::ExecutionRepository;
use crate::agentflow::tools::{ToolExecutor, ToolRegistry};
use crate::agentflow::workflow::context::WorkflowContext;
use crate::agentflow::workflow::template::{resolve_str, resolve_template, stringify_value};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Dispatch seam for `agent` nodes.
///
/// `agent_url` present on the node selects the remote path; otherwise the
/// referenced agent is invoked in-process.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Invoke a locally-registered agent and return its final output text.
    async fn run_local(&self, agent_id: Uuid, input: &str) -> Result<String, PlatformError>;

    /// Dispatch a sub-task to a remote A2A agent and return its reply text.
    async fn run_remote(&self, agent_url: &str, input: &str) -> Result<String, PlatformError>;
}

/// Default [`AgentRunner`]: local agents go through the chat service, the
/// remote path speaks A2A.
pub struct PlatformAgentRunner {
    chat: Arc<crate::agentflow::chat::ChatService>,
    agents: Arc<dyn crate::agentflow::repository::AgentRepository>,
    a2a: Arc<crate::agentflow::a2a::client::A2AClient>,
}

impl PlatformAgentRunner {
    pub fn new(
        chat: Arc<crate::agentflow::chat::ChatService>,
        agents: Arc<dyn crate::agentflow::repository::AgentRepository>,
        a2a: Arc<crate::agentflow::a2a::client::A2AClient>,
    ) -> Self {
        Self { chat, agents, a2a }
    }
}

#[async_trait]
impl AgentRunner for PlatformAgentRunner {
    async fn run_local(&self, agent_id: Uuid, input: &str) -> Result<String, PlatformError> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("Agent not found: {}", agent_id)))?;
        let (_, content) = self
            .chat
            .chat(
                &agent,
                crate::agentflow::a2a::types::A2A_SYSTEM_USER_ID,
                input,
                None,
            )
            .await?;
        Ok(content)
    }

    async fn run_remote(&self, agent_url: &str, input: &str) -> Result<String, PlatformError> {
        let task = self.a2a.send_task(agent_url, input, None).await?;
        Ok(crate::agentflow::a2a::types::extract_text_from_task_result(
            &task,
        ))
    }
}

// Per-type payload shapes, deserialized from the node's opaque `data` map.

#[derive(Deserialize)]
struct TriggerData {
    #[serde(default = "default_trigger_type")]
    trigger_type: String,
}

fn default_trigger_type() -> String {
    String::from("manual")
}

#[derive(Deserialize)]
struct AgentNodeData {
    #[serde(default)]
    agent_id: Option<Uuid>,
    #[serde(default)]
    agent_url: Option<String>,
    #[serde(default)]
    input_mapping: Map<String, Value>,
}

#[derive(Deserialize)]
struct ConditionClause {
    #[serde(default)]
    field: String,
    #[serde(default = "default_operator")]
    operator: String,
    #[serde(default)]
    value: Value,
}

fn default_operator() -> String {
    String::from("eq")
}

#[derive(Deserialize)]
struct ConditionData {
    #[serde(default)]
    conditions: Vec<ConditionClause>,
    #[serde(default = "default_logic")]
    logic: String,
}

fn default_logic() -> String {
    String::from("and")
}

#[derive(Deserialize)]
struct TransformData {
    #[serde(default = "default_transform_type")]
    transform_type: String,
    #[serde(default)]
    expression: String,
}

fn default_transform_type() -> String {
    String::from("jmespath")
}

#[derive(Deserialize)]
struct ToolNodeData {
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    tool_config: Map<String, Value>,
}

#[derive(Deserialize)]
struct OutputData {
    #[serde(default = "default_output_type")]
    output_type: String,
    #[serde(default)]
    output_config: Map<String, Value>,
}

fn default_output_type() -> String {
    String::from("return")
}

/// The workflow execution engine.
pub struct WorkflowEngine {
    executions: Arc<dyn ExecutionRepository>,
    registry: Arc<ToolRegistry>,
    agent_runner: Option<Arc<dyn AgentRunner>>,
}

impl WorkflowEngine {
    pub fn new(executions: Arc<dyn ExecutionRepository>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            executions,
            registry,
            agent_runner: None,
        }
    }

    /// Attach the dispatch seam for `agent` nodes (builder pattern).
    pub fn with_agent_runner(mut self, runner: Arc<dyn AgentRunner>) -> Self {
        self.agent_runner = Some(runner);
        self
    }

    /// Execute a workflow with an optional trigger payload.
    ///
    /// Always returns the execution record; run-level failures (cycles,
    /// node faults) are captured in the record, not surfaced as `Err`.
    /// `Err` is reserved for persistence faults.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        trigger_data: Option<Value>,
    ) -> Result<WorkflowExecution, PlatformError> {
        let mut execution = WorkflowExecution::new(
            workflow.id,
            trigger_data.clone().unwrap_or_else(|| json!({})),
        );
        self.executions.insert(&execution).await?;

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.executions.update(&execution).await?;

        log::info!(
            "executing workflow {} ({} nodes, {} edges)",
            workflow.id,
            workflow.nodes.len(),
            workflow.edges.len()
        );

        let mut context = WorkflowContext::new(trigger_data);
        let predecessors = build_dag(workflow);

        let order = match topological_sort(&predecessors, &workflow.nodes) {
            Some(order) => order,
            None => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(String::from(
                    "Circular dependency detected in workflow",
                ));
                execution.completed_at = Some(Utc::now());
                self.executions.update(&execution).await?;
                return Ok(execution);
            }
        };

        let node_map: HashMap<&str, &Node> = workflow
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), node))
            .collect();

        for node_id in &order {
            let Some(node) = node_map.get(node_id.as_str()) else {
                continue;
            };

            match self.execute_node(node, &context).await {
                Ok(result) => {
                    context.set_result(&node.id, result.clone());
                    execution
                        .node_results
                        .insert(node.id.clone(), NodeRunRecord::completed(result));
                }
                Err(e) => {
                    log::warn!("node {} failed: {}", node.id, e);
                    execution
                        .node_results
                        .insert(node.id.clone(), NodeRunRecord::failed(e.to_string()));
                    execution.status = ExecutionStatus::Failed;
                    execution.error = Some(e.to_string());
                    execution.completed_at = Some(Utc::now());
                    self.executions.update(&execution).await?;
                    return Ok(execution);
                }
            }
        }

        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(Utc::now());
        self.executions.update(&execution).await?;
        Ok(execution)
    }

    /// Dispatch one node by type.
    async fn execute_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        match node.node_type.as_str() {
            "trigger" => self.execute_trigger_node(node, context),
            "agent" => self.execute_agent_node(node, context).await,
            "condition" => self.execute_condition_node(node, context),
            "transform" => self.execute_transform_node(node, context),
            "tool" => self.execute_tool_node(node, context).await,
            "output" => self.execute_output_node(node, context),
            other => Ok(json!({
                "message": format!("Unknown node type: {}", other),
            })),
        }
    }

    fn execute_trigger_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        let data: TriggerData = parse_node_data(node)?;
        Ok(json!({
            "trigger_type": data.trigger_type,
            "trigger_data": context.trigger_data(),
        }))
    }

    async fn execute_agent_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        let data: AgentNodeData = parse_node_data(node)?;
        let context_value = context.to_value();

        let mut inputs = Map::new();
        for (key, template) in &data.input_mapping {
            inputs.insert(key.clone(), resolve_template(template, &context_value));
        }

        // The agent's prompt is the resolved `message` mapping when one is
        // given, otherwise the JSON of all resolved inputs.
        let input_text = match inputs.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => stringify_value(other),
            None => Value::Object(inputs.clone()).to_string(),
        };

        let runner = self.agent_runner.as_ref().ok_or_else(|| {
            PlatformError::InvalidInput(String::from("Agent execution is not configured"))
        })?;

        let output = match (&data.agent_url, data.agent_id) {
            (Some(url), _) => runner.run_remote(url, &input_text).await?,
            (None, Some(agent_id)) => runner.run_local(agent_id, &input_text).await?,
            (None, None) => {
                return Err(PlatformError::InvalidInput(String::from(
                    "Agent node requires agent_id or agent_url",
                )))
            }
        };

        Ok(json!({
            "agent_id": data.agent_id,
            "inputs": inputs,
            "output": output,
        }))
    }

    fn execute_condition_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        let data: ConditionData = parse_node_data(node)?;
        let context_value = context.to_value();

        let mut results = Vec::with_capacity(data.conditions.len());
        for clause in &data.conditions {
            let field_value = resolve_str(&format!("{{{{{}}}}}", clause.field), &context_value);
            results.push(evaluate_condition(
                &field_value,
                &clause.operator,
                &clause.value,
            ));
        }

        let final_result = match data.logic.as_str() {
            "or" => results.iter().any(|&r| r),
            _ => results.iter().all(|&r| r),
        };

        Ok(json!({
            "result": final_result,
            "conditions_evaluated": results,
        }))
    }

    fn execute_transform_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        let data: TransformData = parse_node_data(node)?;
        let context_value = context.to_value();

        match data.transform_type.as_str() {
            "jmespath" => Ok(crate::agentflow::workflow::template::search_path(
                &data.expression,
                &context_value,
            )),
            "template" => Ok(resolve_str(&data.expression, &context_value)),
            other => Ok(json!({
                "error": format!("Unknown transform type: {}", other),
            })),
        }
    }

    async fn execute_tool_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        let data: ToolNodeData = parse_node_data(node)?;
        if !self.registry.is_registered(&data.tool_name) {
            return Err(PlatformError::InvalidInput(format!(
                "Unknown tool: {}",
                data.tool_name
            )));
        }

        let context_value = context.to_value();
        let mut config = Map::new();
        for (key, value) in &data.tool_config {
            config.insert(key.clone(), resolve_template(value, &context_value));
        }
        let config = Value::Object(config);

        let executor = ToolExecutor::new(Arc::clone(&self.registry));
        let result = executor
            .execute(&data.tool_name, config.clone(), None)
            .await;
        if !result.success {
            return Err(PlatformError::Upstream(format!(
                "Tool {} failed: {}",
                data.tool_name,
                result.error.unwrap_or_else(|| String::from("unknown error"))
            )));
        }

        Ok(json!({
            "tool_name": data.tool_name,
            "config": config,
            "output": result.output,
        }))
    }

    fn execute_output_node(
        &self,
        node: &Node,
        context: &WorkflowContext,
    ) -> Result<Value, PlatformError> {
        let data: OutputData = parse_node_data(node)?;
        match data.output_type.as_str() {
            "return" => Ok(json!({
                "type": "return",
                "data": context.to_value(),
            })),
            "webhook" => Ok(json!({
                "type": "webhook",
                "url": data
                    .output_config
                    .get("webhook_url")
                    .cloned()
                    .unwrap_or(Value::String(String::new())),
                "status": "not_implemented",
            })),
            "store" => Ok(json!({
                "type": "store",
                "key": data
                    .output_config
                    .get("store_key")
                    .cloned()
                    .unwrap_or(Value::String(String::new())),
                "status": "not_implemented",
            })),
            other => Ok(json!({
                "type": other,
                "status": "unknown",
            })),
        }
    }
}

fn parse_node_data<T: serde::de::DeserializeOwned>(node: &Node) -> Result<T, PlatformError> {
    serde_json::from_value(node.data.clone()).map_err(|e| {
        PlatformError::InvalidInput(format!("Invalid {} node data: {}", node.node_type, e))
    })
}

/// Build the predecessor map: `node_id -> [ids it depends on]`.
///
/// Every node appears as a key.  Edges naming unknown endpoints are
/// ignored; duplicate edges are de-duplicated.
fn build_dag(workflow: &Workflow) -> HashMap<String, Vec<String>> {
    let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
    for node in &workflow.nodes {
        predecessors.entry(node.id.clone()).or_default();
    }

    for edge in &workflow.edges {
        if edge.source.is_empty() || edge.target.is_empty() {
            continue;
        }
        if !predecessors.contains_key(edge.source.as_str()) {
            continue;
        }
        let Some(deps) = predecessors.get_mut(edge.target.as_str()) else {
            continue;
        };
        if !deps.contains(&edge.source) {
            deps.push(edge.source.clone());
        }
    }

    predecessors
}

/// Kahn's algorithm.  Returns `None` when the graph has a cycle.
///
/// Ties among simultaneously-ready nodes follow the order of first
/// appearance in `nodes`.
fn topological_sort(
    predecessors: &HashMap<String, Vec<String>>,
    nodes: &[Node],
) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = predecessors
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .filter(|node| in_degree.get(node.id.as_str()) == Some(&0))
        .map(|node| node.id.as_str())
        .collect();

    let mut order = Vec::with_capacity(predecessors.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        for node in nodes {
            let deps = &predecessors[node.id.as_str()];
            if deps.iter().any(|d| d == current) {
                let degree = in_degree.get_mut(node.id.as_str())?;
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(node.id.as_str());
                }
            }
        }
    }

    if order.len() != predecessors.len() {
        return None;
    }
    Some(order)
}

/// Evaluate one condition clause.
///
/// `gt`/`lt` compare numbers numerically and strings lexicographically;
/// mismatched types evaluate false.  `contains` matches the stringified
/// needle inside the stringified field.  `exists` is a null check.
fn evaluate_condition(field_value: &Value, operator: &str, compare: &Value) -> bool {
    match operator {
        "eq" => field_value == compare,
        "ne" => field_value != compare,
        "gt" => ordered(field_value, compare).map(|o| o.is_gt()).unwrap_or(false),
        "lt" => ordered(field_value, compare).map(|o| o.is_lt()).unwrap_or(false),
        "contains" => stringify_value(field_value).contains(&stringify_value(compare)),
        "exists" => !field_value.is_null(),
        _ => false,
    }
}

fn ordered(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}
