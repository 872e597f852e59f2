//! Classification of model completions into terminal signals, commands and junk.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{MalformedReason, Proposal};

/// Replies that end the run, compared case-insensitively against the whole reply.
pub const TERMINAL_SIGNALS: [&str; 3] = ["done", "exit", "complete"];

static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^`[^`]*`$").expect("inline code regex is valid"));

/// Exact, case-insensitive match against [`TERMINAL_SIGNALS`].
pub fn is_terminal_signal(command: &str) -> bool {
    let lowered = command.to_lowercase();
    TERMINAL_SIGNALS.contains(&lowered.as_str())
}

/// Decide what to do with a (trimmed) completion.
///
/// Terminal signals win over everything else. Empty replies and replies carrying
/// markdown code markers are never handed to the shell.
pub fn classify_proposal(completion: &str) -> Proposal {
    if is_terminal_signal(completion) {
        return Proposal::Done;
    }
    let reason = if completion.trim().is_empty() {
        Some(MalformedReason::Empty)
    } else if completion.contains("```") {
        Some(MalformedReason::CodeFence)
    } else if INLINE_CODE_RE.is_match(completion.trim()) {
        Some(MalformedReason::InlineCode)
    } else {
        None
    };
    match reason {
        Some(reason) => Proposal::Malformed {
            text: completion.to_string(),
            reason,
        },
        None => Proposal::Command(completion.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_signals_ignore_case() {
        for reply in ["done", "Done", "DONE", "exit", "complete", "Complete"] {
            assert!(is_terminal_signal(reply), "{reply} should terminate");
        }
    }

    #[test]
    fn terminal_signals_require_exact_match() {
        for reply in ["done now", "done.", "'done'", "exit 0", ""] {
            assert!(!is_terminal_signal(reply), "{reply:?} should not terminate");
        }
    }

    #[test]
    fn classify_plain_command() {
        assert_eq!(
            classify_proposal("echo 'Hello world.' > test.txt"),
            Proposal::Command("echo 'Hello world.' > test.txt".to_string())
        );
    }

    #[test]
    fn classify_terminal_signal_as_done() {
        assert_eq!(classify_proposal("DONE"), Proposal::Done);
    }

    #[test]
    fn classify_rejects_empty_and_fenced_replies() {
        assert_eq!(
            classify_proposal(""),
            Proposal::Malformed {
                text: String::new(),
                reason: MalformedReason::Empty
            }
        );
        assert!(matches!(
            classify_proposal("```bash"),
            Proposal::Malformed {
                reason: MalformedReason::CodeFence,
                ..
            }
        ));
        assert!(matches!(
            classify_proposal("`ls -la`"),
            Proposal::Malformed {
                reason: MalformedReason::InlineCode,
                ..
            }
        ));
    }

    #[test]
    fn classify_allows_backticks_inside_commands() {
        assert_eq!(
            classify_proposal("echo `date` > now.txt"),
            Proposal::Command("echo `date` > now.txt".to_string())
        );
    }
}
