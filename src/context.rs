use log::info;
use serde::{Deserialize, Serialize};

/// One prior exchange supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_message: String,
    pub assistant_message: String,
}

impl ConversationTurn {
    pub fn new(user_message: impl Into<String>, assistant_message: impl Into<String>) -> Self {
        ConversationTurn {
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
        }
    }
}

/// Rough token estimate: characters divided by `chars_per_token`, rounded up
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

fn render_turn(turn: &ConversationTurn) -> String {
    format!("User: {}\nAssistant: {}", turn.user_message, turn.assistant_message)
}

/// Keep the most recent turns whose estimated size fits `max_tokens`.
///
/// Older turns are dropped first; the returned slice keeps chronological order.
pub fn limit_history(
    turns: &[ConversationTurn],
    max_tokens: usize,
    chars_per_token: usize,
) -> &[ConversationTurn] {
    let mut used = 0;
    let mut keep = 0;

    for turn in turns.iter().rev() {
        // Rendered transcript line plus its separator
        let cost = estimate_tokens(&render_turn(turn), chars_per_token) + 1;
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        keep += 1;
    }

    if keep < turns.len() {
        info!(
            "History budget: using {} recent turns, dropped {} older (~{}/{} tokens)",
            keep,
            turns.len() - keep,
            used,
            max_tokens
        );
    }

    &turns[turns.len() - keep..]
}

/// Render turns as a transcript for prompt inclusion
pub fn render_history(turns: &[ConversationTurn]) -> String {
    if turns.is_empty() {
        return "(no previous messages)".to_string();
    }
    turns
        .iter()
        .map(render_turn)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(chars: usize) -> ConversationTurn {
        ConversationTurn::new("u".repeat(chars), "")
    }

    #[test]
    fn test_keeps_most_recent_turns_within_budget() {
        let turns = vec![turn(40), turn(40), turn(40)];
        // 58 rendered chars: 15 tokens at 4 chars per token, plus the separator
        let kept = limit_history(&turns, 32, 4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept, &turns[1..]);
    }

    #[test]
    fn test_oversized_latest_turn_drops_everything() {
        let turns = vec![turn(4), turn(400)];
        assert!(limit_history(&turns, 10, 4).is_empty());
    }

    #[test]
    fn test_short_turns_are_not_free() {
        let turns = vec![ConversationTurn::new("hey", "ok!"); 1000];
        let kept = limit_history(&turns, 10, 4);

        assert_eq!(kept.len(), 1);
        assert!(render_history(kept).chars().count() <= 10 * 4);
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("hey", 4), 1);
        assert_eq!(estimate_tokens("hello", 4), 2);
    }

    #[test]
    fn test_render_history() {
        let turns = vec![ConversationTurn::new("Weather in Paris?", "Sunny, 21 °C.")];
        assert_eq!(
            render_history(&turns),
            "User: Weather in Paris?\nAssistant: Sunny, 21 °C."
        );
        assert_eq!(render_history(&[]), "(no previous messages)");
    }
}
