use crate::error::Result;
use crate::queue::TaskPayload;
use crate::registry::CallableRegistry;
use hook_script::ScriptEngine;
use hook_types::{EventContext, Record};
use serde_json::Value;
use tracing::{debug, error, info, warn};

pub const LOG_INSTANCE: &str = "hook.builtin.log_instance";
pub const SET_FIELDS: &str = "hook.builtin.set_fields";
pub const LOG_PAYLOAD_TASK: &str = "hook.builtin.tasks.log_payload";

/// 注册内置函数与任务
pub fn register_builtin_functions(registry: &CallableRegistry) -> Result<()> {
    registry.register_function(LOG_INSTANCE, log_instance)?;
    registry.register_function(SET_FIELDS, set_fields)?;
    registry.register_task(LOG_PAYLOAD_TASK, log_payload)?;
    Ok(())
}

/// 注册脚本日志函数
pub fn register_script_functions(engine: &mut ScriptEngine) {
    let rhai_engine = engine.engine_mut();

    // log(level, message)
    rhai_engine.register_fn("log", |level: &str, message: &str| match level {
        "debug" => debug!("{}", message),
        "warn" => warn!("{}", message),
        "error" => error!("{}", message),
        _ => info!("{}", message),
    });

    rhai_engine.register_fn("debug", |message: &str| {
        debug!("{}", message);
    });

    rhai_engine.register_fn("warn", |message: &str| {
        warn!("{}", message);
    });
}

fn log_instance(record: &mut Record, context: &EventContext) -> anyhow::Result<()> {
    let context = Value::Object(context.clone());
    info!(
        entity = %record.entity,
        record_id = record.id,
        context = %context,
        "Instance changed"
    );
    Ok(())
}

/// Copies the `fields` object from the context onto the record.
fn set_fields(record: &mut Record, context: &EventContext) -> anyhow::Result<()> {
    let fields = match context.get("fields") {
        Some(Value::Object(fields)) => fields,
        Some(other) => anyhow::bail!("`fields` must be an object, got {}", other),
        None => anyhow::bail!("missing `fields` in action context"),
    };
    for (name, value) in fields {
        record.set(name.clone(), value.clone());
    }
    Ok(())
}

fn log_payload(payload: &TaskPayload) -> anyhow::Result<()> {
    info!(
        entity = %payload.entity(),
        instance_id = payload.instance_id,
        created = payload.created(),
        "Task payload received"
    );
    Ok(())
}
