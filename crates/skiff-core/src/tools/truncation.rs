//! Output truncation utilities for tool results

/// Largest tool output handed back to the model
pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Cut `output` to `MAX_TOOL_OUTPUT_CHARS` at the last line boundary and
/// append a marker with the original and kept sizes.
pub fn truncate_output(output: &str) -> String {
    truncate_output_to(output, MAX_TOOL_OUTPUT_CHARS)
}

pub(crate) fn truncate_output_to(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, max);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

/// Keep the last `max_lines` lines, noting how many were dropped.
/// Recent output is what matters for commands.
pub fn truncate_tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let dropped = lines.len() - max_lines;
    format!(
        "[... omitted {} earlier line(s) ...]\n{}",
        dropped,
        lines[dropped..].join("\n")
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
