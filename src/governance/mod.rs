//! Governance rule evaluation: matches a tool invocation against the
//! configured rules (first match wins) and produces a decision plus an
//! audit event. In `observe` mode, `Warn`/`Deny` outcomes are downgraded to
//! `Observe` before being returned to the caller — the daemon never blocks
//! a tool call unless governance is explicitly in `enforce` mode.

use globset::Glob;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{GovernanceConfig, GovernanceMode, GovernanceRuleConfig};
use crate::model::GovernanceDecision;

#[derive(Debug, Clone)]
pub struct ToolInvocation<'a> {
    pub tool_name: &'a str,
    pub tool_input: &'a serde_json::Value,
    pub file_path: Option<&'a str>,
}

/// A fixed, non-configurable tool-name grouping used only for filtering the
/// audit trail — orthogonal to the rule-based `allow`/`warn`/`deny`
/// decision, which is driven entirely by the configured rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Filesystem,
    Shell,
    Network,
    Agent,
    Other,
}

/// Maps a tool name to its fixed category. New agent tools that don't match
/// any entry fall back to `Other` rather than being silently miscategorized
/// into one of the specific buckets.
pub fn categorize_tool(tool_name: &str) -> ToolCategory {
    match tool_name {
        "Read" | "Write" | "Edit" | "MultiEdit" | "Glob" | "NotebookEdit" => {
            ToolCategory::Filesystem
        }
        "Bash" | "BashOutput" | "KillShell" => ToolCategory::Shell,
        "WebFetch" | "WebSearch" => ToolCategory::Network,
        "Task" | "TaskCreate" | "TaskUpdate" | "SendMessage" | "ListAgents" => ToolCategory::Agent,
        _ => ToolCategory::Other,
    }
}

#[derive(Debug, Clone)]
pub struct GovernanceVerdict {
    pub decision: GovernanceDecision,
    pub rule_name: Option<String>,
    pub message: Option<String>,
    pub mode: GovernanceMode,
}

/// Evaluates `invocation` against `config`'s rules in order, returning the
/// first match. An empty or disabled config always allows.
pub fn evaluate(config: &GovernanceConfig, invocation: &ToolInvocation) -> GovernanceVerdict {
    if !config.enabled {
        return GovernanceVerdict {
            decision: GovernanceDecision::Allow,
            rule_name: None,
            message: None,
            mode: config.mode,
        };
    }

    for rule in &config.rules {
        if rule_matches(rule, invocation) {
            let mut decision = rule.action;
            let mut message = Some(format!("matched rule '{}'", rule.name));
            if config.mode == GovernanceMode::Observe
                && matches!(decision, GovernanceDecision::Warn | GovernanceDecision::Deny)
            {
                message = Some(format!(
                    "matched rule '{}' (would {} in enforce mode)",
                    rule.name,
                    decision.as_str()
                ));
                decision = GovernanceDecision::Observe;
            }
            return GovernanceVerdict {
                decision,
                rule_name: Some(rule.name.clone()),
                message,
                mode: config.mode,
            };
        }
    }

    GovernanceVerdict {
        decision: GovernanceDecision::Allow,
        rule_name: None,
        message: None,
        mode: config.mode,
    }
}

fn rule_matches(rule: &GovernanceRuleConfig, invocation: &ToolInvocation) -> bool {
    if !glob_matches(&rule.tool_glob, invocation.tool_name) {
        return false;
    }
    if let Some(pattern) = &rule.input_regex {
        let serialized = invocation.tool_input.to_string();
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&serialized) {
                    return false;
                }
            }
            Err(e) => {
                tracing::warn!("governance rule '{}' has invalid input_regex: {e}", rule.name);
                return false;
            }
        }
    }
    if let Some(file_glob) = &rule.file_glob {
        match invocation.file_path {
            Some(path) => {
                if !glob_matches(file_glob, path) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(candidate))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, tool_glob: &str, action: GovernanceDecision) -> GovernanceRuleConfig {
        GovernanceRuleConfig {
            name: name.to_string(),
            tool_glob: tool_glob.to_string(),
            input_regex: None,
            file_glob: None,
            action,
        }
    }

    #[test]
    fn categorize_tool_maps_known_tools_and_falls_back_to_other() {
        assert_eq!(categorize_tool("Bash"), ToolCategory::Shell);
        assert_eq!(categorize_tool("Write"), ToolCategory::Filesystem);
        assert_eq!(categorize_tool("WebFetch"), ToolCategory::Network);
        assert_eq!(categorize_tool("Task"), ToolCategory::Agent);
        assert_eq!(categorize_tool("SomeFutureTool"), ToolCategory::Other);
    }

    #[test]
    fn disabled_config_always_allows() {
        let config = GovernanceConfig {
            enabled: false,
            mode: GovernanceMode::Enforce,
            rules: vec![rule("deny-all", "*", GovernanceDecision::Deny)],
            audit_retention_days: 30,
        };
        let invocation = ToolInvocation {
            tool_name: "Bash",
            tool_input: &serde_json::json!({}),
            file_path: None,
        };
        assert_eq!(evaluate(&config, &invocation).decision, GovernanceDecision::Allow);
    }

    #[test]
    fn observe_mode_downgrades_deny_to_observe() {
        let config = GovernanceConfig {
            enabled: true,
            mode: GovernanceMode::Observe,
            rules: vec![rule("deny-all", "*", GovernanceDecision::Deny)],
            audit_retention_days: 30,
        };
        let invocation = ToolInvocation {
            tool_name: "Bash",
            tool_input: &serde_json::json!({}),
            file_path: None,
        };
        let verdict = evaluate(&config, &invocation);
        assert_eq!(verdict.decision, GovernanceDecision::Observe);
    }

    #[test]
    fn enforce_mode_keeps_deny() {
        let config = GovernanceConfig {
            enabled: true,
            mode: GovernanceMode::Enforce,
            rules: vec![rule("deny-all", "*", GovernanceDecision::Deny)],
            audit_retention_days: 30,
        };
        let invocation = ToolInvocation {
            tool_name: "Bash",
            tool_input: &serde_json::json!({}),
            file_path: None,
        };
        assert_eq!(evaluate(&config, &invocation).decision, GovernanceDecision::Deny);
    }

    #[test]
    fn first_match_wins() {
        let config = GovernanceConfig {
            enabled: true,
            mode: GovernanceMode::Enforce,
            rules: vec![
                rule("allow-read", "Read", GovernanceDecision::Allow),
                rule("deny-all", "*", GovernanceDecision::Deny),
            ],
            audit_retention_days: 30,
        };
        let invocation = ToolInvocation {
            tool_name: "Read",
            tool_input: &serde_json::json!({}),
            file_path: None,
        };
        let verdict = evaluate(&config, &invocation);
        assert_eq!(verdict.decision, GovernanceDecision::Allow);
        assert_eq!(verdict.rule_name.as_deref(), Some("allow-read"));
    }

    #[test]
    fn file_glob_must_match_when_present() {
        let config = GovernanceConfig {
            enabled: true,
            mode: GovernanceMode::Enforce,
            rules: vec![GovernanceRuleConfig {
                name: "no-env-edits".into(),
                tool_glob: "Edit".into(),
                input_regex: None,
                file_glob: Some("*.env".into()),
                action: GovernanceDecision::Deny,
            }],
            audit_retention_days: 30,
        };
        let hit = ToolInvocation {
            tool_name: "Edit",
            tool_input: &serde_json::json!({}),
            file_path: Some(".env"),
        };
        let miss = ToolInvocation {
            tool_name: "Edit",
            tool_input: &serde_json::json!({}),
            file_path: Some("main.rs"),
        };
        assert_eq!(evaluate(&config, &hit).decision, GovernanceDecision::Deny);
        assert_eq!(evaluate(&config, &miss).decision, GovernanceDecision::Allow);
    }
}
