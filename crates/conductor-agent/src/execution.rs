use conductor_core::memory::{MemoryManager, Origin};
use conductor_core::prompt::PromptStack;
use conductor_core::protocol::{
    decode, Action, ActionCatalog, ActionResponse, ContextEntry, ContextKind, DecodeError, Envelope,
};
use conductor_core::role::Role;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capability::CapabilityRegistry;
use crate::service::ReasoningService;
use crate::{AgentError, Result};

// ─── Budget ───────────────────────────────────────────────────────────────

/// Execution steps left for one role. Only ever counts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Budget {
    remaining: u32,
    spent: u32,
}

impl Budget {
    pub fn new(steps: u32) -> Self {
        Self {
            remaining: steps,
            spent: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn spent(&self) -> u32 {
        self.spent
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn consume(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.spent += 1;
        }
    }
}

// ─── ExecutionResult ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionResult {
    Completed { output: String },
    Delegated { target: String, query: String },
    BudgetExhausted,
}

// ─── ExecutionLoop ────────────────────────────────────────────────────────

/// Drives one bounded run of one role against the reasoning service.
pub struct ExecutionLoop<'a> {
    unit: &'a str,
    service: &'a dyn ReasoningService,
    registry: &'a CapabilityRegistry,
    prompts: &'a PromptStack,
    recall_limit: usize,
    /// Roles a delegation may target. `None` accepts any role.
    delegates: Option<&'a [String]>,
}

impl<'a> ExecutionLoop<'a> {
    pub fn new(
        unit: &'a str,
        service: &'a dyn ReasoningService,
        registry: &'a CapabilityRegistry,
        prompts: &'a PromptStack,
    ) -> Self {
        Self {
            unit,
            service,
            registry,
            prompts,
            recall_limit: 3,
            delegates: None,
        }
    }

    pub fn recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn delegates(mut self, roles: &'a [String]) -> Self {
        self.delegates = Some(roles);
        self
    }

    fn may_delegate_to(&self, target: &str) -> bool {
        match self.delegates {
            Some(roles) => roles.iter().any(|r| r == target),
            None => true,
        }
    }

    /// Run `role` until it finishes, delegates or spends `budget`.
    ///
    /// `initial` is re-sent on every turn but never written to memory.
    /// Each executed or denied action appends exactly one fragment and
    /// costs one budget step; decode retries cost nothing. A delegation to a
    /// role outside the permitted set is a denied action.
    pub async fn run(
        &self,
        role: &Role,
        initial: &[ContextEntry],
        budget: &mut Budget,
        memory: &mut MemoryManager,
    ) -> Result<ExecutionResult> {
        let span = info_span!(
            "execution",
            unit = %self.unit,
            role = %role.id,
            run = %Uuid::new_v4(),
        );
        self.drive(role, initial, budget, memory).instrument(span).await
    }

    async fn drive(
        &self,
        role: &Role,
        initial: &[ContextEntry],
        budget: &mut Budget,
        memory: &mut MemoryManager,
    ) -> Result<ExecutionResult> {
        let instruction = self.prompts.resolve(&role.id);
        let decodable = self.registry.catalog();
        let offered = self.registry.catalog_for(role);
        let task_text = initial
            .iter()
            .filter(|c| c.kind == ContextKind::Task)
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        while !budget.is_exhausted() {
            let envelope = self.envelope(&instruction.body, &offered, initial, &task_text, memory)?;
            let ActionResponse { thought, action } =
                self.decode_turn(role, envelope, &decodable).await?;

            match action {
                Action::Finish { output } => {
                    memory.append(Origin::Thought, step(&thought, "finish", &output))?;
                    self.relieve(memory)?;
                    info!(spent = budget.spent(), "run completed");
                    return Ok(ExecutionResult::Completed { output });
                }
                Action::Delegate { role: target, query } => {
                    let action = format!("delegate -> {target}");
                    if !self.may_delegate_to(&target) {
                        warn!(target = %target, "permission denied: delegation target not permitted");
                        let observation =
                            format!("permission denied: delegation to role '{target}' is not permitted here");
                        budget.consume();
                        memory.append(Origin::Observation, step(&thought, &action, &observation))?;
                        self.relieve(memory)?;
                        continue;
                    }
                    memory.append(Origin::Thought, step(&thought, &action, &query))?;
                    self.relieve(memory)?;
                    info!(target = %target, remaining = budget.remaining(), "run delegated");
                    return Ok(ExecutionResult::Delegated { target, query });
                }
                Action::Invoke { name, args } => {
                    let rendered = format!("{name} {}", Value::Object(args.clone()));
                    let observation = if !role.permits(&name) {
                        warn!(capability = %name, "permission denied: not in allow-list");
                        format!("permission denied: role '{}' may not use '{name}'", role.id)
                    } else {
                        match self.registry.dispatch(&name, args, &role.write_scope).await {
                            Ok(value) => render_value(value),
                            Err(e) if e.is_permission_denied() => {
                                warn!(capability = %name, error = %e, "permission denied");
                                format!("permission denied: {e}")
                            }
                            Err(e) => {
                                warn!(capability = %name, error = %e, "capability failed");
                                format!("error: {e}")
                            }
                        }
                    };
                    budget.consume();
                    memory.append(Origin::Observation, step(&thought, &rendered, &observation))?;
                    self.relieve(memory)?;
                }
            }
        }

        info!(spent = budget.spent(), "run exhausted its budget");
        Ok(ExecutionResult::BudgetExhausted)
    }

    /// Ask until a response decodes. Corrections ride on a copy of the
    /// envelope and never reach memory.
    async fn decode_turn(
        &self,
        role: &Role,
        envelope: Envelope,
        catalog: &ActionCatalog,
    ) -> Result<ActionResponse> {
        let mut request = envelope.clone();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let raw = self.service.complete(&request).await?;
            match decode(&raw, catalog) {
                Ok(response) => {
                    debug!(action = %response.action, attempts, "decoded");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempts, "undecodable response");
                    if attempts > role.retry_budget {
                        return Err(AgentError::DecodeExhausted { attempts, last: e });
                    }
                    request = corrected(&envelope, &e);
                }
            }
        }
    }

    fn envelope(
        &self,
        instruction: &str,
        offered: &ActionCatalog,
        initial: &[ContextEntry],
        task_text: &str,
        memory: &MemoryManager,
    ) -> Result<Envelope> {
        let mut env = Envelope::new(instruction, offered);
        env.context.extend(initial.iter().cloned());
        if self.recall_limit > 0 && !task_text.is_empty() {
            for hit in memory.query(task_text, self.recall_limit)? {
                env.push(
                    ContextKind::Recall,
                    format!("{} (seq {}-{}): {}", hit.warm_id, hit.first_seq, hit.last_seq, hit.summary),
                );
            }
        }
        for line in memory.hot_context() {
            env.push(ContextKind::Memory, line);
        }
        Ok(env)
    }

    fn relieve(&self, memory: &mut MemoryManager) -> Result<()> {
        if memory.capacity_pressure() {
            memory.compress()?;
        }
        Ok(())
    }
}

fn corrected(envelope: &Envelope, error: &DecodeError) -> Envelope {
    let mut env = envelope.clone();
    env.push(ContextKind::Correction, error.correction_prompt());
    env
}

fn step(thought: &str, action: &str, observation: &str) -> String {
    format!("thought: {thought}\naction: {action}\nobservation: {observation}")
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => "ok".to_string(),
        other => other.to_string(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Args, Capability};
    use crate::service::ScriptedService;
    use async_trait::async_trait;
    use conductor_core::config::{HotMeasure, MemoryConfig};
    use conductor_core::role::Scope;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Tally {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for Tally {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test capability"
        }
        async fn invoke(&self, _args: Args) -> std::result::Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::String(format!("{} ok", self.name)))
        }
    }

    struct Fixture {
        dir: TempDir,
        registry: CapabilityRegistry,
        prompts: PromptStack,
        memory: MemoryManager,
        calls: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::with_builtins(dir.path(), Duration::from_secs(5));
        for name in ["search", "lookup"] {
            registry.add(Arc::new(Tally {
                name,
                calls: Arc::clone(&calls),
            }));
        }
        let cfg = MemoryConfig {
            hot_ceiling: 1_000,
            measure: HotMeasure::Entries,
            ..MemoryConfig::default()
        };
        let memory = MemoryManager::open(&dir.path().join("memory"), &cfg).unwrap();
        Fixture {
            dir,
            registry,
            prompts: PromptStack::default(),
            memory,
            calls,
        }
    }

    fn role(capabilities: &[&str], budget: u32, retry_budget: u32) -> Role {
        Role::new(
            "analyst",
            capabilities.iter().map(|s| s.to_string()).collect(),
            Scope::new(["artifacts"]),
            budget,
            retry_budget,
        )
    }

    fn task(text: &str) -> Vec<ContextEntry> {
        vec![ContextEntry::new(ContextKind::Task, text)]
    }

    const SEARCH: &str = r#"{"thought": "look", "action": {"name": "search", "args": {}}}"#;
    const FINISH: &str = r#"{"thought": "done", "action": {"name": "finish", "args": {"output": "all good"}}}"#;

    #[tokio::test]
    async fn exhausts_budget_after_three_steps() {
        let mut fx = fixture();
        let svc = ScriptedService::new([SEARCH, SEARCH, SEARCH, FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(3);

        let result = lp
            .run(&role(&["search"], 3, 1), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        assert_eq!(result, ExecutionResult::BudgetExhausted);
        assert_eq!(svc.calls(), 3);
        assert_eq!(svc.remaining(), 1);
        assert_eq!(fx.memory.frozen().unwrap().len(), 3);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 3);
        assert_eq!((budget.remaining(), budget.spent()), (0, 3));
    }

    #[tokio::test]
    async fn malformed_then_finish_costs_no_budget() {
        let mut fx = fixture();
        let svc = ScriptedService::new(["I'd rather chat.", FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(5);

        let result = lp
            .run(&role(&[], 5, 1), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        assert_eq!(
            result,
            ExecutionResult::Completed {
                output: "all good".into()
            }
        );
        assert_eq!(budget.remaining(), 5);

        let requests = svc.requests();
        assert_eq!(requests.len(), 2);
        let correction = requests[1]
            .context
            .iter()
            .find(|c| c.kind == ContextKind::Correction)
            .expect("second request carries a correction");
        assert!(correction.content.contains("no JSON object"));
        assert!(fx
            .memory
            .frozen()
            .unwrap()
            .iter()
            .all(|f| !f.payload.contains("could not be used")));
    }

    #[tokio::test]
    async fn retries_exhausted_is_fatal() {
        let mut fx = fixture();
        let svc = ScriptedService::new(["nope", "still nope", FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(5);

        let err = lp
            .run(&role(&[], 5, 1), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DecodeExhausted { attempts: 2, .. }));
        assert_eq!(budget.remaining(), 5);
    }

    #[tokio::test]
    async fn retry_counter_resets_each_turn() {
        let mut fx = fixture();
        let svc = ScriptedService::new(["bad", SEARCH, "bad", FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(5);
        let result = lp
            .run(&role(&["search"], 5, 1), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();
        assert!(matches!(result, ExecutionResult::Completed { .. }));
        assert_eq!(budget.spent(), 1);
    }

    #[tokio::test]
    async fn delegate_returns_immediately_and_keeps_budget() {
        let mut fx = fixture();
        let delegate = r#"{"thought": "ask", "action": {"name": "delegate", "args": {"role": "architect", "query": "which store?"}}}"#;
        let svc = ScriptedService::new([SEARCH, delegate, SEARCH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(4);

        let result = lp
            .run(&role(&["search"], 4, 1), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        assert_eq!(
            result,
            ExecutionResult::Delegated {
                target: "architect".into(),
                query: "which store?".into()
            }
        );
        assert_eq!(svc.calls(), 2);
        assert_eq!(budget.remaining(), 3);
    }

    #[tokio::test]
    async fn refused_delegation_is_denied_and_counted() {
        let mut fx = fixture();
        let delegate = r#"{"action": {"name": "delegate", "args": {"role": "reviewer", "query": "ok?"}}}"#;
        let svc = ScriptedService::new([delegate; 5]);
        let permitted = vec!["analyst".to_string()];
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts).delegates(&permitted);
        let mut budget = Budget::new(2);

        let result = lp
            .run(&role(&["search"], 2, 0), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        assert_eq!(result, ExecutionResult::BudgetExhausted);
        assert_eq!(svc.calls(), 2);
        let frozen = fx.memory.frozen().unwrap();
        assert_eq!(frozen.len(), 2);
        assert!(frozen
            .iter()
            .all(|f| f.origin == Origin::Observation && f.payload.contains("permission denied")));
    }

    #[tokio::test]
    async fn disallowed_capability_is_denied_and_counted() {
        let mut fx = fixture();
        let svc = ScriptedService::new([SEARCH, FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(3);

        let result = lp
            .run(&role(&["lookup"], 3, 0), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        assert!(matches!(result, ExecutionResult::Completed { .. }));
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
        assert_eq!(budget.spent(), 1);
        let frozen = fx.memory.frozen().unwrap();
        assert!(frozen[0].payload.contains("permission denied"));
    }

    #[tokio::test]
    async fn out_of_scope_write_is_denied() {
        let mut fx = fixture();
        let write = r#"{"action": {"name": "write_file", "args": {"path": "workspace/x.rs", "content": "fn main() {}"}}}"#;
        let svc = ScriptedService::new([write, FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(3);

        lp.run(&role(&["write_file"], 3, 0), &task("t"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        let frozen = fx.memory.frozen().unwrap();
        assert!(frozen[0].payload.contains("outside the caller's scope"));
        assert_eq!(budget.spent(), 1);
    }

    #[tokio::test]
    async fn hot_memory_is_sent_as_context() {
        let mut fx = fixture();
        let svc = ScriptedService::new([SEARCH, FINISH]);
        let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
        let mut budget = Budget::new(3);
        lp.run(&role(&["search"], 3, 0), &task("find it"), &mut budget, &mut fx.memory)
            .await
            .unwrap();

        let second = &svc.requests()[1];
        assert_eq!(second.context[0], ContextEntry::new(ContextKind::Task, "find it"));
        assert!(second
            .context
            .iter()
            .any(|c| c.kind == ContextKind::Memory && c.content.contains("search ok")));
        // Only permitted actions are offered.
        assert!(second.actions.iter().any(|a| a.name == "search"));
        assert!(!second.actions.iter().any(|a| a.name == "lookup"));
    }

    fn any_action() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(SEARCH.to_string()),
            Just(r#"{"action": {"name": "lookup"}}"#.to_string()),
            Just(r#"{"action": {"name": "list_dir"}}"#.to_string()),
            Just(r#"{"action": {"name": "write_file", "args": {"path": "artifacts/a", "content": "x"}}}"#.to_string()),
            Just("garbage".to_string()),
            Just(FINISH.to_string()),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn empty_allow_list_never_dispatches(script in proptest::collection::vec(any_action(), 1..12)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let mut fx = fixture();
                let svc = ScriptedService::new(script);
                let lp = ExecutionLoop::new("u", &svc, &fx.registry, &fx.prompts);
                let mut budget = Budget::new(6);
                // Script may run dry or exhaust retries; neither may dispatch.
                let _ = lp.run(&role(&[], 6, 3), &task("t"), &mut budget, &mut fx.memory).await;
                prop_assert!(budget.remaining() <= 6);
                prop_assert_eq!(budget.spent() + budget.remaining(), 6);
                prop_assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
                prop_assert!(!fx.dir.path().join("artifacts/a").exists());
                Ok(())
            })?;
        }
    }
}
