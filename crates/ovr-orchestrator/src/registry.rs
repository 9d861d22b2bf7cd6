// registry.rs — ToolRegistry: the JSON edge of the orchestration API.
//
// Built once at start-up and passed by reference to whatever front-end
// dispatches calls. Handlers validate untyped arguments into typed values
// before touching the orchestrator; every response is an object with a
// `success` flag, and failures carry `error` and a stable `code`.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use ovr_goal::{ActionSpec, ActionStatus, AssertionMap, AssertionSet};

use crate::api::Orchestrator;
use crate::error::OrchestratorError;

type Handler = fn(&Orchestrator, &Value) -> Result<Value, OrchestratorError>;

/// A named operation callable with JSON arguments.
pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    handler: Handler,
}

pub struct ToolRegistry {
    tools: IndexMap<&'static str, Tool>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, description: &'static str, handler: Handler) {
        self.tools.insert(
            name,
            Tool {
                name,
                description,
                handler,
            },
        );
    }

    /// Every goal/action/supervisor tool.
    pub fn standard() -> Self {
        let mut r = Self::empty();
        r.register("goap_create_goal", "Create a goal with a goal state", create_goal);
        r.register("goap_create_actions", "Create a batch of actions under a goal", create_actions);
        r.register("goap_get_goal", "Show a goal with its goal and world state", get_goal);
        r.register("goap_list_actions", "List actions by goal, status, or parent", list_actions);
        r.register("goap_update_action", "Set an action's status and result", update_action);
        r.register("goap_dispatch_action", "Hand a primitive action to a worker", dispatch_action);
        r.register("goap_update_world_state", "Merge boolean assertions into world state", update_world_state);
        r.register("goap_check_complete", "Compare world state against goal state", check_complete);
        r.register("goap_get_action_results", "Results of completed actions", get_action_results);
        r.register("list_goals", "List goals with progress", list_goals);
        r.register("goal_status", "Goal detail with action counts and tree", goal_status);
        r.register("start_goal", "Spawn a goal's supervisor", start_goal);
        r.register("pause_goal", "Kill a goal's supervisor and pause it", pause_goal);
        r.register("cancel_goal", "Kill a goal's supervisor and fail it", cancel_goal);
        r
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Run a tool. Never fails: errors come back as `success: false`.
    pub fn call(&self, orch: &Orchestrator, name: &str, args: &Value) -> Value {
        let outcome = match self.tools.get(name) {
            Some(tool) => (tool.handler)(orch, args),
            None => Err(OrchestratorError::NotFound {
                kind: "tool",
                id: name.to_string(),
            }),
        };
        match outcome {
            Ok(Value::Object(mut body)) => {
                body.entry("success").or_insert(Value::Bool(true));
                Value::Object(body)
            }
            Ok(other) => json!({ "success": true, "result": other }),
            Err(e) => {
                tracing::debug!(tool = name, code = e.code(), "tool call failed: {}", e);
                error_body(&e)
            }
        }
    }
}

pub fn error_body(e: &OrchestratorError) -> Value {
    json!({
        "success": false,
        "error": e.to_string(),
        "code": e.code(),
    })
}

// ── Argument helpers ─────────────────────────────────────────────

fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn req_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, OrchestratorError> {
    opt_str(args, key).ok_or_else(|| OrchestratorError::MissingParams(key.to_string()))
}

/// Unparseable ids cannot name a record, so they are reported as not found.
fn parse_id(raw: &str, kind: &'static str) -> Result<Uuid, OrchestratorError> {
    Uuid::parse_str(raw).map_err(|_| OrchestratorError::NotFound {
        kind,
        id: raw.to_string(),
    })
}

fn req_id(args: &Value, key: &str, kind: &'static str) -> Result<Uuid, OrchestratorError> {
    parse_id(req_str(args, key)?, kind)
}

/// Boolean entries of a JSON object. Other value types are ignored.
fn bool_map(value: &Value) -> Option<AssertionMap> {
    value.as_object().map(|obj| {
        obj.iter()
            .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
            .collect()
    })
}

fn req_bool_map(args: &Value, key: &str) -> Result<AssertionMap, OrchestratorError> {
    args.get(key)
        .and_then(bool_map)
        .ok_or_else(|| OrchestratorError::MissingParams(key.to_string()))
}

/// String entries of a JSON array. Other value types are ignored.
fn string_set(value: &Value) -> Option<AssertionSet> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, OrchestratorError> {
    serde_json::to_value(value).map_err(|e| OrchestratorError::Store(e.into()))
}

// ── Handlers ─────────────────────────────────────────────────────

fn create_goal(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let name = req_str(args, "name")?;
    let description = req_str(args, "description")?;
    let goal_state = req_bool_map(args, "goal_state")?;
    let queue_name = opt_str(args, "queue_name").map(str::to_string);
    let goal = orch.create_goal(name, description, goal_state, queue_name)?;
    Ok(json!({ "goal_id": goal.id, "queue_name": goal.queue_name }))
}

/// Parse one entry of `actions`. `description` and `effects` are required.
fn parse_action_spec(item: &Value) -> Result<ActionSpec, OrchestratorError> {
    let description = req_str(item, "description")?;
    let effects = item
        .get("effects")
        .and_then(string_set)
        .ok_or_else(|| OrchestratorError::MissingParams("effects".into()))?;
    let parent_action_id = opt_str(item, "parent_action_id")
        .map(|raw| parse_id(raw, "action"))
        .transpose()?;
    Ok(ActionSpec {
        description: description.to_string(),
        parent_action_id,
        role: opt_str(item, "role").map(str::to_string),
        is_compound: item.get("is_compound").and_then(Value::as_bool).unwrap_or(false),
        preconditions: item
            .get("preconditions")
            .and_then(string_set)
            .unwrap_or_default(),
        effects,
    })
}

fn create_actions(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal_id = req_id(args, "goal_id", "goal")?;
    let items = args
        .get("actions")
        .and_then(Value::as_array)
        .ok_or_else(|| OrchestratorError::MissingParams("actions".into()))?;

    let mut specs = Vec::new();
    let mut rejected = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match parse_action_spec(item) {
            Ok(spec) => specs.push(spec),
            Err(e) => rejected.push(format!("item {}: {}", index, e)),
        }
    }

    let mut batch = orch.create_actions(goal_id, specs)?;
    batch.failed += rejected.len();
    batch.errors.extend(rejected);

    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(batch.success()));
    body.insert("action_ids".into(), to_value(&batch.action_ids)?);
    body.insert("created".into(), json!(batch.created));
    if batch.failed > 0 {
        body.insert("failed".into(), json!(batch.failed));
        body.insert("errors".into(), to_value(&batch.errors)?);
    }
    if !batch.success() {
        body.insert("error".into(), json!("no valid actions in batch"));
        body.insert("code".into(), json!("missing_params"));
    }
    Ok(Value::Object(body))
}

fn get_goal(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal = orch.get_goal(req_id(args, "goal_id", "goal")?)?;
    to_value(&goal)
}

fn list_actions(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal_id = req_id(args, "goal_id", "goal")?;
    let status = opt_str(args, "status")
        .map(|s| s.parse::<ActionStatus>())
        .transpose()?;
    let parent = opt_str(args, "parent_action_id")
        .map(|raw| parse_id(raw, "action"))
        .transpose()?;
    let actions = orch.list_actions(goal_id, status, parent)?;
    Ok(json!({ "count": actions.len(), "actions": to_value(&actions)? }))
}

fn update_action(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let action_id = req_id(args, "action_id", "action")?;
    let status: ActionStatus = req_str(args, "status")?.parse()?;
    let result = args
        .get("result")
        .and_then(Value::as_str)
        .map(str::to_string);
    let action = orch.update_action(action_id, status, result)?;
    Ok(json!({ "action_id": action.id, "status": action.status }))
}

fn dispatch_action(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let outcome = orch.dispatch_action(req_id(args, "action_id", "action")?)?;
    to_value(&outcome)
}

fn update_world_state(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal_id = req_id(args, "goal_id", "goal")?;
    let assertions = req_bool_map(args, "assertions")?;
    let world_state = orch.update_world_state(goal_id, &assertions)?;
    Ok(json!({ "world_state": to_value(&world_state)? }))
}

fn check_complete(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let progress = orch.check_complete(req_id(args, "goal_id", "goal")?)?;
    let mut body = json!({
        "complete": progress.complete,
        "satisfied": progress.satisfied,
        "total": progress.total,
    });
    if !progress.complete {
        body["missing"] = to_value(&progress.missing)?;
    }
    Ok(body)
}

fn get_action_results(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal_id = req_id(args, "goal_id", "goal")?;
    // Malformed ids in the filter simply match nothing.
    let filter: Option<Vec<Uuid>> = args.get("action_ids").and_then(Value::as_array).map(|ids| {
        ids.iter()
            .filter_map(Value::as_str)
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect()
    });
    let results = orch.get_action_results(goal_id, filter.as_deref())?;
    Ok(json!({ "count": results.len(), "results": to_value(&results)? }))
}

fn list_goals(orch: &Orchestrator, _args: &Value) -> Result<Value, OrchestratorError> {
    let goals = orch.list_goals()?;
    Ok(json!({ "count": goals.len(), "goals": to_value(&goals)? }))
}

fn goal_status(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let report = orch.goal_status(req_id(args, "goal_id", "goal")?)?;
    to_value(&report)
}

fn start_goal(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal_id = req_id(args, "goal_id", "goal")?;
    let pid = orch.start_goal(goal_id)?;
    Ok(json!({ "goal_id": goal_id, "supervisor_pid": pid }))
}

fn pause_goal(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal = orch.pause_goal(req_id(args, "goal_id", "goal")?)?;
    Ok(json!({ "goal_id": goal.id, "status": goal.status }))
}

fn cancel_goal(orch: &Orchestrator, args: &Value) -> Result<Value, OrchestratorError> {
    let goal = orch.cancel_goal(req_id(args, "goal_id", "goal")?)?;
    Ok(json!({ "goal_id": goal.id, "status": goal.status }))
}
