//! Construction-time playbook graph validation.
//!
//! Everything checkable without running a turn is checked here, so the
//! engine never discovers a dangling stage id or unregistered tool at
//! runtime.

use std::collections::HashSet;

use llmrtc_domain::error::{Error, Result};
use llmrtc_tools::ToolRegistry;

use crate::types::{Playbook, TransitionCondition, WILDCARD};

/// Validate a playbook against the tool registry. Returns every problem
/// found, joined into one error, so authors fix a broken graph in one
/// pass.
pub fn validate(playbook: &Playbook, registry: &ToolRegistry) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();

    if playbook.stages.is_empty() {
        problems.push("playbook has no stages".into());
    }

    // Duplicate stage ids.
    let mut seen = HashSet::new();
    for stage in &playbook.stages {
        if !seen.insert(stage.id.as_str()) {
            problems.push(format!("duplicate stage id `{}`", stage.id));
        }
    }

    // Exactly one initial stage, and it must resolve.
    if playbook.stage(&playbook.initial_stage).is_none() {
        problems.push(format!(
            "initial stage `{}` does not exist",
            playbook.initial_stage
        ));
    }

    // Stage tools must resolve in the registry.
    for stage in &playbook.stages {
        for tool in &stage.tools {
            if !registry.contains(tool) {
                problems.push(format!(
                    "stage `{}` references unregistered tool `{tool}`",
                    stage.id
                ));
            }
        }
    }

    // Transition endpoints must resolve; self-loops need opt-in.
    for transition in &playbook.transitions {
        if transition.from != WILDCARD && playbook.stage(&transition.from).is_none() {
            problems.push(format!(
                "transition `{}` has unknown source `{}`",
                transition.id, transition.from
            ));
        }
        match playbook.stage(&transition.to) {
            None => problems.push(format!(
                "transition `{}` has unknown target `{}`",
                transition.id, transition.to
            )),
            Some(target) => {
                if transition.from == transition.to && !target.allow_self_transition {
                    problems.push(format!(
                        "transition `{}` loops `{}` onto itself without allow_self_transition",
                        transition.id, transition.to
                    ));
                }
            }
        }

        // Tool-call conditions must reference a tool some stage can call.
        if let TransitionCondition::ToolCall { tool_name, .. } = &transition.condition {
            let known = playbook
                .stages
                .iter()
                .any(|s| s.tools.iter().any(|t| t == tool_name));
            if !known {
                problems.push(format!(
                    "transition `{}` watches tool `{tool_name}` that no stage exposes",
                    transition.id
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Playbook(problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistoryStrategy, Stage, Transition};
    use llmrtc_domain::config::SamplingConfig;
    use llmrtc_domain::message::ToolDefinition;
    use llmrtc_providers::ToolChoice;
    use llmrtc_tools::FnTool;
    use serde_json::json;
    use std::sync::Arc;

    fn stage(id: &str) -> Stage {
        Stage {
            id: id.into(),
            name: id.into(),
            system_prompt: None,
            tools: vec![],
            history_strategy: HistoryStrategy::Full,
            tool_choice: ToolChoice::Auto,
            two_phase: true,
            allow_self_transition: false,
        }
    }

    fn playbook(stages: Vec<Stage>, transitions: Vec<Transition>) -> Playbook {
        Playbook {
            id: "p".into(),
            stages,
            transitions,
            initial_stage: "a".into(),
            system_prompt: None,
            llm_defaults: SamplingConfig::default(),
        }
    }

    #[test]
    fn valid_graph_passes() {
        let registry = ToolRegistry::new();
        let p = playbook(
            vec![stage("a"), stage("b")],
            vec![Transition {
                id: "t1".into(),
                from: "a".into(),
                to: "b".into(),
                condition: TransitionCondition::MaxTurns { max_turns: 3 },
            }],
        );
        assert!(validate(&p, &registry).is_ok());
    }

    #[test]
    fn unknown_target_rejected() {
        let registry = ToolRegistry::new();
        let p = playbook(
            vec![stage("a")],
            vec![Transition {
                id: "t1".into(),
                from: "a".into(),
                to: "ghost".into(),
                condition: TransitionCondition::MaxTurns { max_turns: 3 },
            }],
        );
        let err = validate(&p, &registry).unwrap_err().to_string();
        assert!(err.contains("unknown target"));
    }

    #[test]
    fn duplicate_stage_ids_rejected() {
        let registry = ToolRegistry::new();
        let p = playbook(vec![stage("a"), stage("a")], vec![]);
        assert!(validate(&p, &registry)
            .unwrap_err()
            .to_string()
            .contains("duplicate stage id"));
    }

    #[test]
    fn missing_initial_stage_rejected() {
        let registry = ToolRegistry::new();
        let p = playbook(vec![stage("b")], vec![]);
        assert!(validate(&p, &registry)
            .unwrap_err()
            .to_string()
            .contains("initial stage"));
    }

    #[test]
    fn unregistered_tool_rejected() {
        let registry = ToolRegistry::new();
        let mut s = stage("a");
        s.tools = vec!["lookup_order".into()];
        let p = playbook(vec![s], vec![]);
        assert!(validate(&p, &registry)
            .unwrap_err()
            .to_string()
            .contains("unregistered tool"));
    }

    #[test]
    fn registered_tool_accepted() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolDefinition {
                    name: "lookup_order".into(),
                    description: "look up".into(),
                    parameters: json!({"type": "object"}),
                    policy: None,
                },
                Arc::new(FnTool::new(|_| Ok(json!({})))),
            )
            .unwrap();
        let mut s = stage("a");
        s.tools = vec!["lookup_order".into()];
        let p = playbook(vec![s], vec![]);
        assert!(validate(&p, &registry).is_ok());
    }

    #[test]
    fn self_loop_requires_opt_in() {
        let registry = ToolRegistry::new();
        let t = Transition {
            id: "loop".into(),
            from: "a".into(),
            to: "a".into(),
            condition: TransitionCondition::MaxTurns { max_turns: 1 },
        };
        let p = playbook(vec![stage("a")], vec![t.clone()]);
        assert!(validate(&p, &registry).is_err());

        let mut allowed = stage("a");
        allowed.allow_self_transition = true;
        let p = playbook(vec![allowed], vec![t]);
        assert!(validate(&p, &registry).is_ok());
    }
}
