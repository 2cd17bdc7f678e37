//! Splits a text unit into bounded, overlapping segments.
//!
//! Splitting strategy:
//! 1. Walk lines forward, packing them into a chunk until the character
//!    budget is reached
//! 2. Start the next chunk a fraction of the budget back, so passages that
//!    span a split point stay retrievable from one chunk or the other
//! 3. A single line over the whole budget is hard-split at char boundaries
//!
//! Line numbers are 1-based and refer to the original unit.

/// Floor for the configurable budget; anything smaller produces confetti.
const MIN_CHAR_BUDGET: usize = 100;

/// One segment of a chunked unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub text: String,
    /// 1-based start line in the original unit.
    pub start_line: usize,
    /// 1-based end line in the original unit.
    pub end_line: usize,
}

/// Chunk `text` into segments of at most `char_budget` characters, with
/// roughly `overlap * char_budget` characters repeated between consecutive
/// segments. Whitespace-only input produces no segments.
pub fn chunk_text(text: &str, char_budget: usize, overlap: f32) -> Vec<ChunkPiece> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let budget = char_budget.max(MIN_CHAR_BUDGET);
    let overlap_budget = (budget as f32 * overlap.clamp(0.0, 0.9)) as usize;

    // Pre-split oversized lines so the window loop below only ever deals
    // with entries that fit inside one chunk.
    let mut units: Vec<Unit> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let chars = line.chars().count();
        if chars <= budget {
            units.push(Unit {
                line: idx + 1,
                chars,
                text: line.to_string(),
            });
        } else {
            for slice in split_oversized_line(line, budget) {
                units.push(Unit {
                    line: idx + 1,
                    chars: slice.chars().count(),
                    text: slice,
                });
            }
        }
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < units.len() {
        // Pack units forward until the budget is spent. Each unit costs its
        // characters plus the newline that joins it to the previous one.
        let mut end = start;
        let mut used = 0usize;
        while end < units.len() {
            let cost = units[end].chars + 1;
            if used + cost > budget && end > start {
                break;
            }
            used += cost;
            end += 1;
        }

        let window = &units[start..end];
        let body = window
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if !body.trim().is_empty() {
            pieces.push(ChunkPiece {
                text: body,
                start_line: window[0].line,
                end_line: window[window.len() - 1].line,
            });
        }

        if end >= units.len() {
            break;
        }

        // Rewind over the tail of this window until the overlap budget is
        // covered. `next` never rewinds to `start`, so the loop always
        // advances.
        let mut next = end;
        let mut carried = 0usize;
        while next > start + 1 {
            let cost = units[next - 1].chars + 1;
            if carried + cost > overlap_budget {
                break;
            }
            carried += cost;
            next -= 1;
        }
        start = next;
    }

    pieces
}

struct Unit {
    line: usize,
    chars: usize,
    text: String,
}

fn split_oversized_line(line: &str, budget: usize) -> Vec<String> {
    let mut slices = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in line.chars() {
        if count == budget {
            slices.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        slices.push(current);
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(chunk_text("", 200, 0.15).is_empty());
        assert!(chunk_text("   \n\n  ", 200, 0.15).is_empty());
    }

    #[test]
    fn test_small_unit_is_one_piece() {
        let pieces = chunk_text("line 1\nline 2\nline 3", 200, 0.15);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].start_line, 1);
        assert_eq!(pieces[0].end_line, 3);
        assert_eq!(pieces[0].text, "line 1\nline 2\nline 3");
    }

    #[test]
    fn test_pieces_respect_budget() {
        let text: String = (0..120)
            .map(|i| format!("let value_{i} = compute({i});"))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = chunk_text(&text, 300, 0.15);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(
                piece.text.chars().count() <= 300,
                "piece of {} chars exceeds budget",
                piece.text.chars().count()
            );
        }
    }

    #[test]
    fn test_consecutive_pieces_overlap() {
        let text: String = (0..120)
            .map(|i| format!("let value_{i} = compute({i});"))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = chunk_text(&text, 300, 0.25);
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            assert!(
                pair[1].start_line <= pair[0].end_line,
                "expected line overlap between {}..{} and {}..{}",
                pair[0].start_line,
                pair[0].end_line,
                pair[1].start_line,
                pair[1].end_line
            );
        }
    }

    #[test]
    fn test_zero_overlap_pieces_are_disjoint() {
        let text: String = (0..120)
            .map(|i| format!("let value_{i} = compute({i});"))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = chunk_text(&text, 300, 0.0);
        for pair in pieces.windows(2) {
            assert!(pair[1].start_line > pair[0].end_line);
        }
    }

    #[test]
    fn test_oversized_line_is_hard_split() {
        let long = "x".repeat(450);
        let pieces = chunk_text(&long, 200, 0.15);
        assert!(pieces.len() >= 2);
        let total: usize = pieces
            .iter()
            .map(|p| p.text.chars().filter(|c| *c == 'x').count())
            .sum();
        // Overlap may repeat characters but nothing is lost.
        assert!(total >= 450);
        for piece in &pieces {
            assert_eq!(piece.start_line, 1);
            assert_eq!(piece.end_line, 1);
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text: String = (0..90)
            .map(|i| format!("fn helper_{i}() -> usize {{ {i} }}"))
            .collect::<Vec<_>>()
            .join("\n");
        let a = chunk_text(&text, 400, 0.2);
        let b = chunk_text(&text, 400, 0.2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let pieces = chunk_text("a\nb\nc", 200, 0.15);
        assert_eq!(pieces[0].start_line, 1);
    }
}
