use crate::filter::SearchTerm;
use crate::render::{DisplayLine, Segment};

/// Mark every match of `term` inside each fragment of freshly rendered lines.
///
/// Matches never span two fragments. The input must come straight from the
/// renderer; existing emphasis is flattened before matching.
pub fn highlight(mut lines: Vec<DisplayLine>, term: &SearchTerm) -> Vec<DisplayLine> {
    if term.is_empty() {
        return lines;
    }

    for line in &mut lines {
        for fragment in &mut line.fragments {
            let text = fragment.text();
            let matches = term.find_matches(&text);
            if matches.is_empty() {
                continue;
            }
            fragment.segments = split(&text, &matches);
        }
    }
    lines
}

fn split(text: &str, matches: &[std::ops::Range<usize>]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(matches.len() * 2 + 1);
    let mut cursor = 0;

    for range in matches {
        if range.start > cursor {
            segments.push(Segment {
                text: text[cursor..range.start].to_string(),
                emphasized: false,
            });
        }
        segments.push(Segment {
            text: text[range.clone()].to_string(),
            emphasized: true,
        });
        cursor = range.end;
    }
    if cursor < text.len() {
        segments.push(Segment {
            text: text[cursor..].to_string(),
            emphasized: false,
        });
    }
    segments
}
