//! Pure operations over a message log.

use relay_domain::message::{orphan_tool_indices, Message, Role};

/// Flat per-message overhead on top of the content estimate.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Rough token estimate: ceil(len/4) per message plus a small overhead.
/// An empty log estimates to zero.
pub fn estimate_tokens(log: &[Message]) -> usize {
    log.iter()
        .map(|m| m.content.len().div_ceil(4) + MESSAGE_OVERHEAD_TOKENS)
        .sum()
}

/// Delete every tool message whose `tool_call_id` has no live parent.
/// Returns how many were removed.
pub fn repair_tool_pairs(log: &mut Vec<Message>) -> usize {
    let orphans = orphan_tool_indices(log);
    for &i in orphans.iter().rev() {
        log.remove(i);
    }
    orphans.len()
}

/// Index where the kept tail begins when compacting: the last `keep_last`
/// non-system messages, widened backwards so the tail never starts on a
/// tool message (its parent assistant must survive with it).
///
/// Returns 0 when the log is too short to compact anything.
pub fn compaction_boundary(log: &[Message], keep_last: usize) -> usize {
    let mut kept = 0;
    let mut boundary = log.len();

    for i in (0..log.len()).rev() {
        if log[i].role != Role::System {
            kept += 1;
        }
        boundary = i;
        if kept >= keep_last {
            break;
        }
    }

    if kept < keep_last {
        return 0;
    }

    while boundary > 0 && log[boundary].role == Role::Tool {
        boundary -= 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::message::ToolCall;

    fn tc(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "t".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn empty_log_estimates_zero() {
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn estimate_rounds_up_and_adds_overhead() {
        // 5 chars -> ceil(5/4) = 2, plus 4 overhead.
        assert_eq!(estimate_tokens(&[Message::user("hello")]), 6);
        // Empty content still costs the overhead.
        assert_eq!(estimate_tokens(&[Message::assistant("")]), 4);
    }

    #[test]
    fn repair_removes_orphans_only() {
        let mut log = vec![
            Message::user("go"),
            Message::assistant_with_tools("", vec![tc("a")]),
            Message::tool_result("a", "ok"),
            Message::tool_result("ghost", "stale"),
        ];
        assert_eq!(repair_tool_pairs(&mut log), 1);
        assert_eq!(log.len(), 3);
        assert_eq!(repair_tool_pairs(&mut log), 0);
    }

    #[test]
    fn boundary_zero_for_short_log() {
        let log = vec![Message::user("a"), Message::assistant("b")];
        assert_eq!(compaction_boundary(&log, 10), 0);
    }

    #[test]
    fn boundary_keeps_last_n_non_system() {
        let mut log = vec![Message::system("summary")];
        for i in 0..6 {
            log.push(Message::user(format!("u{i}")));
            log.push(Message::assistant(format!("a{i}")));
        }
        // 12 non-system messages; keep 4 -> boundary at index 9 (u4).
        let b = compaction_boundary(&log, 4);
        assert_eq!(b, 9);
        assert_eq!(log[b].content, "u4");
    }

    #[test]
    fn boundary_widens_past_tool_messages() {
        let log = vec![
            Message::user("u0"),
            Message::assistant("a0"),
            Message::user("u1"),
            Message::assistant_with_tools("", vec![tc("x"), tc("y")]),
            Message::tool_result("x", "X"),
            Message::tool_result("y", "Y"),
            Message::assistant("done"),
        ];
        // keep_last 3 would start the tail at index 4 (a tool message);
        // widening moves it back to the parent assistant at index 3.
        let b = compaction_boundary(&log, 3);
        assert_eq!(b, 3);
        assert!(log[b].has_tool_calls());
    }
}
