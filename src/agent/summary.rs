//! Bounded text summaries of tool results, fed back to the model.

use crate::sandbox::{ExecutionOutcome, TerminalStatus};
use crate::util::truncate::truncate_chars;

/// Upper bound on any summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 3000;

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Describe how an execution ended, with its output.
pub fn summarize_outcome(tool: &str, command_line: &str, outcome: &ExecutionOutcome) -> String {
    let headline = match &outcome.status {
        TerminalStatus::Completed { exit_code: 0 } => {
            format!("`{command_line}` completed successfully (exit code 0).")
        }
        TerminalStatus::Completed { exit_code } => {
            format!("`{command_line}` failed with exit code {exit_code}.")
        }
        TerminalStatus::TimedOut { exit_code } => {
            format!("`{command_line}` hit the execution time limit and was terminated (exit code {exit_code}).")
        }
        TerminalStatus::Failed { message } => format!("`{command_line}` could not be run: {message}"),
        TerminalStatus::Cancelled => format!("`{command_line}` was cancelled by the user before it finished."),
    };
    let mut summary = format!("[{tool}] {headline}");

    let notices = outcome.notices.join("\n");
    let sections: Vec<(&str, &str)> = [
        ("Output", outcome.stdout.trim()),
        ("Errors", outcome.stderr.trim()),
        ("Notes", notices.trim()),
    ]
    .into_iter()
    .filter(|(_, body)| !body.is_empty())
    .collect();

    if sections.is_empty() {
        if matches!(outcome.status, TerminalStatus::Completed { .. }) {
            summary.push_str("\nNo output.");
        }
        return truncate_chars(&summary, MAX_SUMMARY_CHARS, TRUNCATION_MARKER);
    }

    let overhead: usize = sections.iter().map(|(label, _)| label.len() + 3).sum();
    let budget = MAX_SUMMARY_CHARS.saturating_sub(summary.chars().count() + overhead);
    let share = budget / sections.len();
    for (label, body) in sections {
        summary.push_str(&format!("\n{label}:\n{}", truncate_chars(body, share, TRUNCATION_MARKER)));
    }
    if outcome.truncated {
        summary.push_str("\n(output exceeded the collection limit)");
    }

    truncate_chars(&summary, MAX_SUMMARY_CHARS, TRUNCATION_MARKER)
}

/// Describe a call the validator refused.
pub fn summarize_rejection(tool: &str, reason: &str) -> String {
    truncate_chars(
        &format!("[{tool}] rejected before execution: {reason}"),
        MAX_SUMMARY_CHARS,
        TRUNCATION_MARKER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::OutputKind;
    use pretty_assertions::assert_eq;

    fn outcome(status: TerminalStatus, stdout: &str, stderr: &str) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::new("exec_1", status);
        outcome.record(OutputKind::Stdout, stdout);
        outcome.record(OutputKind::Stderr, stderr);
        outcome
    }

    #[test]
    fn success_reports_exit_zero_and_output() {
        let summary = summarize_outcome(
            "whois_lookup",
            "whois example.com",
            &outcome(TerminalStatus::Completed { exit_code: 0 }, "Registrar: X\n", ""),
        );
        assert_eq!(
            summary,
            "[whois_lookup] `whois example.com` completed successfully (exit code 0).\nOutput:\nRegistrar: X"
        );
    }

    #[test]
    fn failure_names_exit_code_and_stderr() {
        let summary = summarize_outcome(
            "dns_lookup",
            "dig nope.invalid",
            &outcome(TerminalStatus::Completed { exit_code: 9 }, "", "no servers could be reached"),
        );
        assert!(summary.contains("failed with exit code 9"));
        assert!(summary.contains("Errors:\nno servers could be reached"));
    }

    #[test]
    fn timeout_and_cancel_are_distinct() {
        let timed_out = summarize_outcome("nmap_scan", "nmap -p- h", &outcome(TerminalStatus::TimedOut { exit_code: 124 }, "", ""));
        assert!(timed_out.contains("time limit"));
        assert!(timed_out.contains("124"));

        let cancelled = summarize_outcome("nmap_scan", "nmap -p- h", &outcome(TerminalStatus::Cancelled, "", ""));
        assert!(cancelled.contains("cancelled by the user"));
        assert!(!cancelled.contains("No output"));
    }

    #[test]
    fn long_output_stays_within_bound() {
        let stdout = "open port\n".repeat(2_000);
        let stderr = "warning\n".repeat(1_000);
        let summary = summarize_outcome(
            "nmap_scan",
            "nmap -p- h",
            &outcome(TerminalStatus::Completed { exit_code: 0 }, &stdout, &stderr),
        );
        assert!(summary.chars().count() <= MAX_SUMMARY_CHARS);
        assert!(summary.contains("Output:"));
        assert!(summary.contains("Errors:"));
        assert!(summary.contains("[truncated]"));
    }

    #[test]
    fn rejection_carries_reason() {
        assert_eq!(
            summarize_rejection("execute_command", "bash is not an allowed tool"),
            "[execute_command] rejected before execution: bash is not an allowed tool"
        );
    }
}
