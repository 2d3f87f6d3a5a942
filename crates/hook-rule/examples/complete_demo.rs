use hook_core::{EntityRegistry, NotificationBus, RecordStore};
use hook_rule::{
    ActionDefinition, RuleDefinition, RuleEngine, TaskPayload, TokioTaskQueue, TriggerKind,
};
use hook_types::EntityType;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 Hook Rule - 记录生命周期动作演示\n");

    let bus = Arc::new(NotificationBus::new());
    let post = EntityType::new("blog", "post");
    let posts = RecordStore::new(post.clone(), bus.clone())?;
    let audit = RecordStore::new(EntityType::new("blog", "audit"), bus.clone())?;

    let entities = Arc::new(EntityRegistry::new());
    entities.register(posts.clone())?;

    let engine = RuleEngine::builder(bus)
        .task_queue(Arc::new(TokioTaskQueue::current()?))
        .build()?;

    println!("{}", "=".repeat(60));
    println!("示例 1: 创建时执行内联脚本");
    println!("{}", "=".repeat(60));

    let stamp = engine.add_action(ActionDefinition::inline_script(
        "Stamp title",
        r#"instance.title = "[new] " + instance.title; log("info", "stamped post " + instance.id);"#,
    ))?;
    let rule = engine.add_rule(RuleDefinition::new("Stamp on create", TriggerKind::OnCreate, stamp.id, post.clone()))?;
    println!("✅ 规则已添加: {}", rule.handler_id());

    let mut first = posts.create(json!({"title": "Hello", "body": "first post"}))?;
    println!("✅ 新记录标题: {}\n", first.get_str("title").unwrap_or_default());

    println!("{}", "=".repeat(60));
    println!("示例 2: 带条件的更新规则");
    println!("{}", "=".repeat(60));

    let publish = engine.add_action(ActionDefinition::inline_script(
        "Mark reviewed",
        "instance.reviewed = true;",
    ))?;
    engine.add_rule(
        RuleDefinition::new("Review published posts", TriggerKind::OnUpdate, publish.id, post.clone())
            .with_guard("instance.is_published == true"),
    )?;

    first.set("is_published", false);
    posts.save(&mut first)?;
    println!("   未发布: reviewed = {:?}", first.get("reviewed"));

    first.set("is_published", true);
    posts.save(&mut first)?;
    println!("✅ 已发布: reviewed = {:?}\n", first.get("reviewed"));

    println!("{}", "=".repeat(60));
    println!("示例 3: 命名函数");
    println!("{}", "=".repeat(60));

    let log_sink = audit.clone();
    engine.registry().register_function("demo.audit.record", move |instance, context| {
        log_sink.create(json!({"post": instance.id, "signal": context.get("signal").cloned()}))?;
        Ok(())
    })?;
    let audit_action = engine.add_action(ActionDefinition::function("Audit", "demo.audit.record"))?;
    engine.add_rule(RuleDefinition::new("Audit deletes", TriggerKind::OnDelete, audit_action.id, post.clone()))?;

    posts.delete(&first)?;
    println!("✅ 审计记录数: {}\n", audit.count());

    println!("{}", "=".repeat(60));
    println!("示例 4: 异步任务");
    println!("{}", "=".repeat(60));

    let resolver = entities.clone();
    engine.registry().register_task("demo.tasks.announce", move |payload: &TaskPayload| {
        let instance = payload.resolve(&*resolver)?;
        println!(
            "   📣 任务收到 {} #{}: {}",
            payload.entity(),
            instance.id,
            instance.get_str("title").unwrap_or_default()
        );
        Ok(())
    })?;
    let announce = engine.add_action(ActionDefinition::task("Announce", "demo.tasks.announce"))?;
    engine.add_rule(RuleDefinition::new("Announce new posts", TriggerKind::OnCreate, announce.id, post.clone()))?;

    engine.set_use_async(true)?;
    posts.create(json!({"title": "Queued", "body": "second post"}))?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("✅ 任务已入队\n");

    println!("{}", "=".repeat(60));
    println!("规则列表");
    println!("{}", "=".repeat(60));
    for rule in engine.list_rules() {
        println!("  - #{} {} ({:?}, active: {})", rule.id, rule.name, rule.trigger, rule.is_active);
    }

    Ok(())
}
