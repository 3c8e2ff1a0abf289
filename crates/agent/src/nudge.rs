//! Detection of described-but-unexecuted work.
//!
//! A model sometimes narrates what it would do — pasting a large code
//! block or announcing "I will now modify…" — instead of calling a tool.
//! The loop counters that with a bounded corrective nudge. The predicate
//! is pluggable because it is a heuristic: hosts with better signal can
//! swap in their own.

/// Signature of the pluggable predicate: `true` means the text looks
/// like work that was described rather than performed.
pub type NudgePredicate = dyn Fn(&str) -> bool + Send + Sync;

/// Fenced code blocks at or above this many lines look like a patch the
/// model should have applied with a tool instead.
const FENCED_BLOCK_LINES: usize = 5;

const ANNOUNCEMENTS: &[&str] = &[
    "i will now",
    "i'll now",
    "let me now",
    "i am going to",
    "i'm going to",
    "next, i will",
    "next i will",
];

/// The default heuristic.
pub fn looks_like_unexecuted_work(text: &str) -> bool {
    has_large_fenced_block(text) || has_announcement(text)
}

fn has_large_fenced_block(text: &str) -> bool {
    let mut in_block = false;
    let mut block_lines = 0usize;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if in_block && block_lines >= FENCED_BLOCK_LINES {
                return true;
            }
            in_block = !in_block;
            block_lines = 0;
        } else if in_block {
            block_lines += 1;
        }
    }
    // Unterminated fence still counts
    in_block && block_lines >= FENCED_BLOCK_LINES
}

fn has_announcement(text: &str) -> bool {
    let lower = text.to_lowercase();
    ANNOUNCEMENTS.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_answer_passes() {
        assert!(!looks_like_unexecuted_work("The answer is 42."));
    }

    #[test]
    fn large_code_block_flags() {
        let text = "Here's the fix:\n```rust\nfn a() {}\nfn b() {}\nfn c() {}\nfn d() {}\nfn e() {}\n```";
        assert!(looks_like_unexecuted_work(text));
    }

    #[test]
    fn small_code_snippet_passes() {
        let text = "Use this:\n```rust\nlet x = 1;\n```";
        assert!(!looks_like_unexecuted_work(text));
    }

    #[test]
    fn announcement_flags() {
        assert!(looks_like_unexecuted_work(
            "I will now modify the config file to fix this."
        ));
        assert!(looks_like_unexecuted_work("Let me now run the tests."));
    }

    #[test]
    fn announcement_is_case_insensitive() {
        assert!(looks_like_unexecuted_work("I'M GOING TO delete that file."));
    }

    #[test]
    fn unterminated_fence_counts() {
        let text = "```\n1\n2\n3\n4\n5\n6";
        assert!(looks_like_unexecuted_work(text));
    }
}
