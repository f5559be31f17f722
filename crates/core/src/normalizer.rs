use crate::config::IngestionOptions;
use crate::models::ExtractedLine;

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn filter_lines(lines: Vec<ExtractedLine>, options: &IngestionOptions) -> Vec<ExtractedLine> {
    lines
        .into_iter()
        .filter_map(|line| normalize_line(line, options.min_line_chars))
        .collect()
}

fn normalize_line(mut line: ExtractedLine, min_chars: usize) -> Option<ExtractedLine> {
    line.text = normalize_whitespace(&line.text);

    if line.is_table_row {
        return Some(line);
    }

    if line.text.chars().count() < min_chars {
        return None;
    }

    Some(line)
}
