// call.rs — Run a registry tool with JSON arguments and print the response.

use serde_json::Value;

use ovr_orchestrator::{Orchestrator, ToolRegistry};

pub fn execute(
    orch: &Orchestrator,
    tool: Option<&str>,
    args: Option<&str>,
    list: bool,
) -> anyhow::Result<()> {
    let registry = ToolRegistry::standard();
    if list {
        for t in registry.tools() {
            println!("{:<26} {}", t.name, t.description);
        }
        return Ok(());
    }
    let Some(tool) = tool else {
        anyhow::bail!("a tool name is required (see `ovr call --list`)");
    };

    let args = parse_args(args)?;
    let response = registry.call(orch, tool, &args);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response["success"] == Value::Bool(false) {
        std::process::exit(1);
    }
    Ok(())
}

/// Arguments must be a JSON object; none means `{}`.
fn parse_args(raw: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        anyhow::bail!("tool arguments must be a JSON object");
    }
    Ok(value)
}
