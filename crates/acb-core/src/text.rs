//! Chat message splitting and worker-prefix formatting.
//!
//! Chat transports cap message length (4096 chars is the common limit),
//! so long worker output is split on the best available boundary: blank
//! line, then newline, then space, then a hard cut. Splits are only taken
//! in the second half of the window so a stray early newline does not
//! produce a tiny fragment.

/// Character limit a single outbound chat message must fit in.
pub const CHAT_MAX_LENGTH: usize = 4096;

/// Prefix a response chunk with its worker name.
///
/// This prefix is also what reply-routing parses to recover the worker a
/// chat message came from, so the format is load-bearing: `name:` then a
/// newline.
pub fn format_response(worker: &str, text: &str) -> String {
    format!("{worker}:\n{text}")
}

/// Split `text` into chunks of at most `max_len` characters.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining: &[char] = &chars;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.iter().collect::<String>());
            break;
        }
        let split_at = find_split_point(remaining, max_len);
        let head: String = remaining[..split_at].iter().collect();
        chunks.push(head.trim_end().to_string());
        remaining = &remaining[split_at..];
        // drop leading whitespace carried over the boundary
        while remaining.first().is_some_and(|c| c.is_whitespace()) {
            remaining = &remaining[1..];
        }
    }

    chunks
}

/// Best split point within `max_len`: blank line, newline, space, hard cut.
///
/// A candidate boundary is only used when it lands past the midpoint of
/// the window.
fn find_split_point(chars: &[char], max_len: usize) -> usize {
    let window = &chars[..max_len];

    // Blank line (paragraph break)
    if let Some(pos) = rfind_pair(window, '\n', '\n') {
        if pos > max_len / 2 {
            return pos + 1; // keep one newline in the current chunk
        }
    }

    if let Some(pos) = rfind(window, '\n') {
        if pos > max_len / 2 {
            return pos + 1;
        }
    }

    if let Some(pos) = rfind(window, ' ') {
        if pos > max_len / 2 {
            return pos + 1;
        }
    }

    max_len
}

fn rfind(chars: &[char], needle: char) -> Option<usize> {
    chars.iter().rposition(|&c| c == needle)
}

fn rfind_pair(chars: &[char], first: char, second: char) -> Option<usize> {
    (0..chars.len().saturating_sub(1))
        .rev()
        .find(|&i| chars[i] == first && chars[i + 1] == second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 100), vec!["hello"]);
    }

    #[test]
    fn exact_limit_is_one_chunk() {
        let text = "a".repeat(100);
        assert_eq!(split_message(&text, 100), vec![text]);
    }

    #[test]
    fn prefers_blank_line_boundary() {
        let part1 = "a".repeat(70);
        let part2 = "b".repeat(50);
        let text = format!("{part1}\n\n{part2}");
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], part1);
        assert_eq!(chunks[1], part2);
    }

    #[test]
    fn falls_back_to_newline() {
        let part1 = "a".repeat(70);
        let part2 = "b".repeat(50);
        let text = format!("{part1}\n{part2}");
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], part1);
    }

    #[test]
    fn falls_back_to_space() {
        let part1 = "a".repeat(70);
        let part2 = "b".repeat(50);
        let text = format!("{part1} {part2}");
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], part1);
    }

    #[test]
    fn hard_cut_when_no_boundary() {
        let text = "a".repeat(250);
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 100);
        assert_eq!(chunks[1].chars().count(), 100);
        assert_eq!(chunks[2].chars().count(), 50);
    }

    #[test]
    fn early_boundary_ignored() {
        // newline at position 10 is before the midpoint of a 100 window:
        // should hard-cut instead of producing a 10-char fragment
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(150));
        let chunks = split_message(&text, 100);
        assert_eq!(chunks[0].chars().count(), 100);
    }

    #[test]
    fn no_chunk_exceeds_limit() {
        let text = "word ".repeat(2000);
        for chunk in split_message(&text, CHAT_MAX_LENGTH) {
            assert!(chunk.chars().count() <= CHAT_MAX_LENGTH);
        }
    }

    #[test]
    fn multibyte_safe() {
        let text = "🦀".repeat(150);
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 100);
    }

    #[test]
    fn response_prefix_format() {
        assert_eq!(format_response("alice", "done"), "alice:\ndone");
    }
}
