//! `CommandContract`: the declarative enumeration of operator commands the
//! orchestration exposes to any front-end, plus a required-parity subset
//! (spec.md §4.M).
//!
//! Grounded on `original_source/.../command_contract.py`'s
//! `PLATFORM_COMMANDS` / `get_command_parity_report` /
//! `validate_command_parity` / `validate_required_command_interface`. This
//! crate ships exactly one front-end (the CLI in `cli/`); a second
//! `"chat"` platform is modeled here only to keep the parity machinery
//! exercised — a future chat or webhook front-end would register its own
//! command set the same way.

use std::collections::BTreeSet;

use crate::error::{OrchestratorError, Result};

/// Commands every front-end must implement (spec.md §4.M).
pub fn required_parity_commands() -> BTreeSet<&'static str> {
    [
        "status", "active", "track", "tracked", "untrack", "myissues", "chat", "pause", "resume",
        "stop", "continue", "agents", "visualize", "watch",
    ]
    .into_iter()
    .collect()
}

/// This crate's own CLI command set (see `cli/mod.rs`): the required
/// parity set plus `doctor`, which has no chat-front-end analogue.
pub fn cli_commands() -> BTreeSet<&'static str> {
    let mut commands = required_parity_commands();
    commands.insert("doctor");
    commands
}

/// A hypothetical chat front-end implementing exactly the required set,
/// with no platform-specific extras.
pub fn chat_commands() -> BTreeSet<&'static str> {
    required_parity_commands()
}

fn platform_commands() -> Vec<(&'static str, BTreeSet<&'static str>)> {
    vec![("cli", cli_commands()), ("chat", chat_commands())]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParityReport {
    /// commands implemented by exactly one platform, keyed by platform name
    pub platform_only: Vec<(String, BTreeSet<String>)>,
    pub shared: BTreeSet<String>,
}

/// Pairwise union/intersection across every registered platform. Mirrors
/// the Python original's two-platform `telegram_only`/`discord_only`/
/// `shared` shape, generalized to an arbitrary platform count.
pub fn get_command_parity_report() -> ParityReport {
    let platforms = platform_commands();
    let all: BTreeSet<&str> = platforms.iter().flat_map(|(_, cmds)| cmds.iter().copied()).collect();

    let shared: BTreeSet<String> = all
        .iter()
        .filter(|cmd| platforms.iter().all(|(_, cmds)| cmds.contains(*cmd)))
        .map(|s| s.to_string())
        .collect();

    let platform_only = platforms
        .iter()
        .map(|(name, cmds)| {
            let only: BTreeSet<String> = cmds
                .iter()
                .filter(|cmd| !shared.contains(**cmd))
                .map(|s| s.to_string())
                .collect();
            (name.to_string(), only)
        })
        .collect();

    ParityReport { platform_only, shared }
}

/// Returns an error describing any front-end whose command set is missing
/// a required-parity command.
pub fn validate_required_command_interface() -> Result<()> {
    let required = required_parity_commands();
    let mut missing = Vec::new();
    for (name, commands) in platform_commands() {
        let gap: BTreeSet<&str> = required.iter().filter(|c| !commands.contains(*c)).copied().collect();
        if !gap.is_empty() {
            missing.push(format!("{name} missing {gap:?}"));
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::Configuration(format!(
            "required command interface mismatch: {}",
            missing.join(", ")
        )))
    }
}

/// Validates overall parity, optionally treating any asymmetry as fatal.
/// `strict` defaults to the `COMMAND_PARITY_STRICT` environment variable.
pub fn validate_command_parity(strict: Option<bool>) -> Result<ParityReport> {
    let report = get_command_parity_report();
    let strict = strict.unwrap_or_else(|| {
        std::env::var("COMMAND_PARITY_STRICT")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    });

    let asymmetric = report.platform_only.iter().any(|(_, only)| !only.is_empty());
    if strict && asymmetric {
        return Err(OrchestratorError::Configuration(format!(
            "command parity mismatch detected: {:?}",
            report.platform_only
        )));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_parity_commands_are_present_on_every_platform() {
        assert!(validate_required_command_interface().is_ok());
    }

    #[test]
    fn parity_report_surfaces_cli_only_doctor_command() {
        let report = get_command_parity_report();
        let cli_only = report
            .platform_only
            .iter()
            .find(|(name, _)| name == "cli")
            .map(|(_, only)| only.clone())
            .unwrap_or_default();
        assert!(cli_only.contains("doctor"));
        assert!(report.shared.contains("status"));
        assert!(report.shared.contains("watch"));
    }

    #[test]
    fn non_strict_validation_ignores_asymmetry() {
        let report = validate_command_parity(Some(false)).unwrap();
        assert!(!report.shared.is_empty());
    }

    #[test]
    fn strict_validation_rejects_asymmetric_platforms() {
        assert!(validate_command_parity(Some(true)).is_err());
    }
}
