//! Sentinel markers embedded in token text by the producing agents.
//!
//! The transport signals stream lifecycle in-band: completion, synthesis
//! hand-off, and failure notices arrive as substrings of ordinary token
//! text. The full marker list lives here so detection stays a data table
//! rather than conditionals scattered through the aggregator.

/// Emitted while an agent is still reasoning, before real content.
pub const THINKING_MARKER: &str = "[THINKING]";
/// Normal end of one agent's message.
pub const DONE_MARKER: &str = "[DONE]";
/// Alternate end marker used by older agent builds.
pub const END_MARKER: &str = "[END]";
/// The agent finished its contribution to the conversation turn.
pub const AGENT_COMPLETE_MARKER: &str = "[AGENT_COMPLETE]";
/// The coordinator is about to merge all agent contributions.
pub const SYNTHESIS_MARKER: &str = "[SYNTHESIZING_COLLABORATIVE_RESPONSE]";
/// The agent's backend timed out.
pub const TIMEOUT_MARKER: &str = "[TIMEOUT]";
/// The agent's backend reported a failure.
pub const ERROR_MARKER: &str = "[ERROR]";

const TIMEOUT_PHRASE: &str = "took too long to respond";

/// Every marker stripped out of finalized text.
const INLINE_MARKERS: &[&str] = &[
    THINKING_MARKER,
    SYNTHESIS_MARKER,
    AGENT_COMPLETE_MARKER,
    DONE_MARKER,
    END_MARKER,
    TIMEOUT_MARKER,
    ERROR_MARKER,
];

const COMPLETION_MARKERS: &[&str] = &[
    DONE_MARKER,
    END_MARKER,
    AGENT_COMPLETE_MARKER,
    SYNTHESIS_MARKER,
];

const FAILURE_MARKERS: &[&str] = &[TIMEOUT_MARKER, ERROR_MARKER];

/// What an inbound token means for the owning agent's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Ordinary content to buffer.
    Content,
    /// Normal termination of the stream.
    Completion,
    /// Terminal failure reported by the agent's backend.
    Failure,
}

/// Classify a token. Failure notices take priority over completion markers
/// when a token happens to carry both.
pub fn classify(agent_type: &str, token: &str) -> FragmentKind {
    if FAILURE_MARKERS.iter().any(|marker| token.contains(marker))
        || token.contains(TIMEOUT_PHRASE)
    {
        return FragmentKind::Failure;
    }
    if COMPLETION_MARKERS
        .iter()
        .any(|marker| token.contains(marker))
        || token.contains(&completion_phrase(agent_type))
    {
        return FragmentKind::Completion;
    }
    FragmentKind::Content
}

/// Strip every known sentinel from accumulated text, collapse runs of three
/// or more newlines down to exactly two, and trim the edges.
pub fn clean_final_text(agent_type: &str, text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in INLINE_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    cleaned = cleaned.replace(&completion_phrase(agent_type), "");
    collapse_newlines(&cleaned).trim().to_string()
}

fn completion_phrase(agent_type: &str) -> String {
    format!("{agent_type} has completed")
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            run += 1;
            if run <= 2 {
                out.push(ch);
            }
        } else {
            run = 0;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_content() {
        assert_eq!(classify("LEGAL", "Hello"), FragmentKind::Content);
        assert_eq!(classify("LEGAL", ""), FragmentKind::Content);
    }

    #[test]
    fn end_markers_complete_the_stream() {
        assert_eq!(classify("LEGAL", "[DONE]"), FragmentKind::Completion);
        assert_eq!(classify("LEGAL", "final words [END]"), FragmentKind::Completion);
        assert_eq!(classify("LEGAL", "[AGENT_COMPLETE]"), FragmentKind::Completion);
        assert_eq!(
            classify("LEGAL", "[SYNTHESIZING_COLLABORATIVE_RESPONSE]"),
            FragmentKind::Completion
        );
    }

    #[test]
    fn completion_phrase_only_matches_the_owning_agent() {
        assert_eq!(
            classify("LEGAL", "LEGAL has completed"),
            FragmentKind::Completion
        );
        assert_eq!(
            classify("MEDICAL", "LEGAL has completed"),
            FragmentKind::Content
        );
    }

    #[test]
    fn failure_wins_over_completion() {
        assert_eq!(
            classify("MEDICAL", "Agent took too long to respond [TIMEOUT]"),
            FragmentKind::Failure
        );
        assert_eq!(classify("MEDICAL", "[ERROR]"), FragmentKind::Failure);
        assert_eq!(classify("MEDICAL", "[DONE] [TIMEOUT]"), FragmentKind::Failure);
    }

    #[test]
    fn cleaning_strips_markers_and_trims() {
        let cleaned = clean_final_text("LEGAL", "Hello [THINKING]world [DONE]");
        insta::assert_snapshot!(cleaned, @"Hello world");
    }

    #[test]
    fn cleaning_strips_the_owning_agents_phrase() {
        assert_eq!(
            clean_final_text("LEGAL", "All set. LEGAL has completed"),
            "All set."
        );
    }

    #[test]
    fn newline_runs_collapse_to_two() {
        assert_eq!(
            clean_final_text("LEGAL", "a\n\n\n\nb[DONE]\n"),
            "a\n\nb"
        );
        // Two newlines are left alone.
        assert_eq!(clean_final_text("LEGAL", "a\n\nb"), "a\n\nb");
    }
}
