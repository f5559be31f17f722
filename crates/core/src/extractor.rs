use crate::config::IngestionOptions;
use crate::error::{ExtractionError, IngestError};
use crate::models::ExtractedLine;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use std::ops::Range;
use tracing::{debug, warn};

/// Average glyph advance as a fraction of the font size. Used only to
/// estimate where a span ends, which is enough to tell word gaps from
/// column gaps.
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

// Thousandths of an em. Larger TJ kerning reads as a word break.
const TJ_SPACE_THRESHOLD: f32 = 250.0;

const ROW_PITCH_SLACK: f32 = 1.25;

pub trait PdfExtractor: Send + Sync {
    /// Lines in page order, then visual order within a page. Line numbers
    /// start at 1 and run across the whole document.
    fn extract_lines(&self, bytes: &[u8]) -> Result<Vec<ExtractedLine>, ExtractionError>;
}

pub struct LopdfExtractor {
    options: IngestionOptions,
    column_split: Regex,
}

impl LopdfExtractor {
    pub fn new(options: IngestionOptions) -> Result<Self, IngestError> {
        let column_split = Regex::new(&options.column_split_regex)?;
        Ok(Self {
            options,
            column_split,
        })
    }

    fn page_lines(
        &self,
        document: &Document,
        page_number: u32,
        page_id: ObjectId,
    ) -> Result<Vec<LayoutLine>, String> {
        let layout_error = match layout_lines(document, page_id, &self.options) {
            Ok(lines) if !lines.is_empty() && is_readable(&lines) => return Ok(lines),
            Ok(lines) => {
                debug!(
                    page = page_number,
                    decoded = lines.len(),
                    "layout text empty or unreadable, using plain page text"
                );
                None
            }
            Err(error) => {
                debug!(page = page_number, %error, "layout decoding failed, using plain page text");
                Some(error)
            }
        };

        match document.extract_text(&[page_number]) {
            Ok(text) => Ok(self.plain_text_lines(&text)),
            Err(error) => match layout_error {
                Some(layout_error) => Err(format!("{layout_error}; {error}")),
                None => Ok(Vec::new()),
            },
        }
    }

    fn plain_text_lines(&self, text: &str) -> Vec<LayoutLine> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let cells = self
                    .column_split
                    .split(line)
                    .map(str::trim)
                    .collect::<Vec<_>>();
                if cells.len() >= self.options.min_fallback_cells {
                    LayoutLine {
                        text: cells.join(&self.options.table_cell_separator),
                        is_table_row: true,
                    }
                } else {
                    LayoutLine {
                        text: line.to_string(),
                        is_table_row: false,
                    }
                }
            })
            .collect()
    }
}

impl PdfExtractor for LopdfExtractor {
    fn extract_lines(&self, bytes: &[u8]) -> Result<Vec<ExtractedLine>, ExtractionError> {
        let document = Document::load_mem(bytes).map_err(|error| classify_load_error(&error.to_string()))?;
        let encrypted = document.trailer.get(b"Encrypt").is_ok();
        let pages = document.get_pages();
        let page_count = pages.len() as u32;

        let mut lines = Vec::new();
        let mut failed_pages = 0u32;
        let mut line_number = 1u64;

        for (page_number, page_id) in pages {
            let page_lines = match self.page_lines(&document, page_number, page_id) {
                Ok(page_lines) => page_lines,
                Err(reason) => {
                    failed_pages += 1;
                    warn!(page = page_number, %reason, "skipping undecodable page");
                    continue;
                }
            };

            for line in page_lines {
                lines.push(ExtractedLine {
                    page_number,
                    line_number,
                    text: line.text,
                    is_table_row: line.is_table_row,
                });
                line_number += 1;
            }
        }

        if lines.is_empty() {
            if encrypted {
                return Err(ExtractionError::Encrypted);
            }
            if page_count > 0 && failed_pages == page_count {
                return Err(ExtractionError::Corrupt(format!(
                    "none of {page_count} page(s) could be decoded"
                )));
            }
            return Err(ExtractionError::Empty { pages: page_count });
        }

        debug!(
            pages = page_count,
            lines = lines.len(),
            table_rows = lines.iter().filter(|line| line.is_table_row).count(),
            "pdf extracted"
        );
        Ok(lines)
    }
}

fn classify_load_error(message: &str) -> ExtractionError {
    let lowered = message.to_lowercase();
    if ["encrypt", "decrypt", "password"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        ExtractionError::Encrypted
    } else {
        ExtractionError::Corrupt(message.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LayoutLine {
    text: String,
    is_table_row: bool,
}

fn layout_lines(
    document: &Document,
    page_id: ObjectId,
    options: &IngestionOptions,
) -> Result<Vec<LayoutLine>, String> {
    let raw = document
        .get_page_content(page_id)
        .map_err(|error| error.to_string())?;
    let content = Content::decode(&raw).map_err(|error| error.to_string())?;
    let spans = collect_spans(&content.operations);
    Ok(assemble_lines(spans, options))
}

fn is_readable(lines: &[LayoutLine]) -> bool {
    let mut total = 0usize;
    let mut garbage = 0usize;
    let mut alphanumeric = 0usize;

    for ch in lines.iter().flat_map(|line| line.text.chars()) {
        total += 1;
        if ch == '\u{fffd}' || (ch.is_control() && !ch.is_whitespace()) {
            garbage += 1;
        } else if ch.is_alphanumeric() {
            alphanumeric += 1;
        }
    }

    total > 0 && alphanumeric > 0 && garbage * 10 < total
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    fn translate(tx: f32, ty: f32) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values = operands.iter().map(number).collect::<Option<Vec<_>>>()?;
        match values.as_slice() {
            [a, b, c, d, e, f] => Some(Self {
                a: *a,
                b: *b,
                c: *c,
                d: *d,
                e: *e,
                f: *f,
            }),
            _ => None,
        }
    }

    /// `self` applied first, then `other`.
    fn then(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

fn first_string(operands: &[Object]) -> Option<&Object> {
    operands
        .first()
        .filter(|operand| matches!(operand, Object::String(..)))
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct TextSpan {
    x: f32,
    y: f32,
    end_x: f32,
    size: f32,
    text: String,
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
        }
    }
}

#[derive(Default)]
struct SpanCollector {
    state: GraphicsState,
    saved: Vec<GraphicsState>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    spans: Vec<TextSpan>,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SpanCollector {
    fn apply(&mut self, operation: &Operation) {
        let operands = operation.operands.as_slice();
        match operation.operator.as_str() {
            "q" => self.saved.push(self.state),
            "Q" => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            "cm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    self.state.ctm = matrix.then(&self.state.ctm);
                }
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.state.font_size = size;
                }
            }
            "Tc" => {
                if let Some(value) = operands.first().and_then(number) {
                    self.state.char_spacing = value;
                }
            }
            "Tw" => {
                if let Some(value) = operands.first().and_then(number) {
                    self.state.word_spacing = value;
                }
            }
            "Tz" => {
                if let Some(value) = operands.first().and_then(number) {
                    self.state.horizontal_scale = value / 100.0;
                }
            }
            "TL" => {
                if let Some(value) = operands.first().and_then(number) {
                    self.state.leading = value;
                }
            }
            "Td" => self.move_line(operands),
            "TD" => {
                if let Some(ty) = operands.get(1).and_then(number) {
                    self.state.leading = -ty;
                }
                self.move_line(operands);
            }
            "Tm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    self.text_matrix = matrix;
                    self.line_matrix = matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(string) = first_string(operands) {
                    self.show(std::slice::from_ref(string));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show(items);
                }
            }
            "'" => {
                self.next_line();
                if let Some(string) = first_string(operands) {
                    self.show(std::slice::from_ref(string));
                }
            }
            "\"" => {
                if let Some(value) = operands.first().and_then(number) {
                    self.state.word_spacing = value;
                }
                if let Some(value) = operands.get(1).and_then(number) {
                    self.state.char_spacing = value;
                }
                self.next_line();
                if let Some(string) = first_string(operands.get(2..).unwrap_or_default()) {
                    self.show(std::slice::from_ref(string));
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, operands: &[Object]) {
        let tx = operands.first().and_then(number).unwrap_or(0.0);
        let ty = operands.get(1).and_then(number).unwrap_or(0.0);
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.state.leading;
        self.line_matrix = Matrix::translate(0.0, -leading).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show(&mut self, items: &[Object]) {
        let start = self.text_matrix.then(&self.state.ctm);
        let size = self.state.font_size * start.vertical_scale().max(f32::EPSILON);
        let mut text = String::new();

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let mut advance = 0.0;
                    for &byte in bytes {
                        text.push(char::from(byte));
                        advance += AVERAGE_GLYPH_WIDTH * self.state.font_size + self.state.char_spacing;
                        if byte == b' ' {
                            advance += self.state.word_spacing;
                        }
                    }
                    self.advance(advance * self.state.horizontal_scale);
                }
                other => {
                    if let Some(adjustment) = number(other) {
                        if adjustment <= -TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                            text.push(' ');
                        }
                        let advance = -adjustment / 1000.0 * self.state.font_size;
                        self.advance(advance * self.state.horizontal_scale);
                    }
                }
            }
        }

        if text.trim().is_empty() {
            return;
        }

        let end = self.text_matrix.then(&self.state.ctm);
        self.spans.push(TextSpan {
            x: start.e,
            y: start.f,
            end_x: end.e.max(start.e),
            size: size.abs(),
            text,
        });
    }

    fn advance(&mut self, tx: f32) {
        self.text_matrix = Matrix::translate(tx, 0.0).then(&self.text_matrix);
    }
}

fn collect_spans(operations: &[Operation]) -> Vec<TextSpan> {
    let mut collector = SpanCollector::default();
    for operation in operations {
        collector.apply(operation);
    }
    collector.spans
}

#[derive(Debug, Clone)]
struct Cell {
    x: f32,
    end_x: f32,
    size: f32,
    text: String,
}

#[derive(Debug)]
struct Row {
    y: f32,
    cells: Vec<Cell>,
}

impl Row {
    fn plain_line(&self) -> LayoutLine {
        LayoutLine {
            text: self
                .cells
                .iter()
                .map(|cell| cell.text.trim())
                .collect::<Vec<_>>()
                .join(" "),
            is_table_row: false,
        }
    }
}

/// Groups spans into visual rows (top to bottom) and splits rows into cells
/// on wide horizontal gaps. A run of `min_table_rows` multi-cell rows seeds
/// a table, which then absorbs neighbouring rows, sparse ones included,
/// whose cells sit on the seed's column grid at the seed's row pitch.
fn assemble_lines(mut spans: Vec<TextSpan>, options: &IngestionOptions) -> Vec<LayoutLine> {
    spans.sort_by(|left, right| right.y.total_cmp(&left.y).then(left.x.total_cmp(&right.x)));

    let mut grouped: Vec<Vec<TextSpan>> = Vec::new();
    for span in spans {
        let joins_last = grouped.last().and_then(|row| row.first()).is_some_and(|anchor| {
            let tolerance = options.row_tolerance_em * anchor.size.max(span.size);
            (anchor.y - span.y).abs() <= tolerance
        });
        match grouped.last_mut() {
            Some(row) if joins_last => row.push(span),
            _ => grouped.push(vec![span]),
        }
    }

    let rows: Vec<Row> = grouped
        .into_iter()
        .filter_map(|row| {
            let y = row.first()?.y;
            Some(Row {
                y,
                cells: split_cells(row, options.column_gap_em),
            })
        })
        .collect();

    let mut lines = Vec::with_capacity(rows.len());
    let mut cursor = 0;
    for table in table_ranges(&rows, options) {
        lines.extend(rows[cursor..table.start].iter().map(Row::plain_line));
        lines.extend(flatten_table(&rows[table.clone()], &options.table_cell_separator));
        cursor = table.end;
    }
    lines.extend(rows[cursor..].iter().map(Row::plain_line));

    lines.retain(|line| !line.text.trim().is_empty());
    lines
}

fn table_ranges(rows: &[Row], options: &IngestionOptions) -> Vec<Range<usize>> {
    let min_columns = options.min_table_columns.max(2);
    let min_rows = options.min_table_rows.max(1);

    let mut tables: Vec<Range<usize>> = Vec::new();
    let mut index = 0;
    while index < rows.len() {
        let run_end = rows[index..]
            .iter()
            .position(|row| row.cells.len() < min_columns)
            .map_or(rows.len(), |offset| index + offset);

        if run_end - index < min_rows {
            index = run_end.max(index + 1);
            continue;
        }

        let seed = &rows[index..run_end];
        let anchors = column_anchors(seed);
        let max_gap = ROW_PITCH_SLACK * row_pitch(seed);
        let floor = tables.last().map_or(0, |table| table.end);

        let mut start = index;
        while start > floor
            && rows[start - 1].y - rows[start].y <= max_gap
            && on_grid(&rows[start - 1], &anchors)
        {
            start -= 1;
        }

        let mut end = run_end;
        while end < rows.len()
            && rows[end - 1].y - rows[end].y <= max_gap
            && on_grid(&rows[end], &anchors)
        {
            end += 1;
        }

        tables.push(start..end);
        index = end;
    }
    tables
}

fn row_pitch(rows: &[Row]) -> f32 {
    let mut gaps: Vec<f32> = rows.windows(2).map(|pair| pair[0].y - pair[1].y).collect();
    if gaps.is_empty() {
        let size = rows
            .iter()
            .flat_map(|row| row.cells.iter())
            .map(|cell| cell.size)
            .fold(0.0_f32, f32::max);
        return 1.5 * size;
    }
    gaps.sort_by(f32::total_cmp);
    gaps[gaps.len() / 2]
}

fn on_grid(row: &Row, anchors: &[f32]) -> bool {
    !row.cells.is_empty()
        && row.cells.iter().all(|cell| {
            let slot = nearest_anchor(anchors, cell.x);
            let Some(column) = anchors.get(slot) else {
                return false;
            };
            let stays_in_column = anchors.get(slot + 1).map_or(true, |next| cell.end_x < *next);
            (column - cell.x).abs() <= cell.size && stays_in_column
        })
}

fn split_cells(mut row: Vec<TextSpan>, column_gap_em: f32) -> Vec<Cell> {
    row.sort_by(|left, right| left.x.total_cmp(&right.x));

    let mut cells: Vec<Cell> = Vec::new();
    for span in row {
        if let Some(cell) = cells.last_mut() {
            let gap = span.x - cell.end_x;
            if gap <= column_gap_em * cell.size.max(span.size) {
                let needs_space = gap > 0.1 * span.size
                    && !cell.text.ends_with(' ')
                    && !span.text.starts_with(' ');
                if needs_space {
                    cell.text.push(' ');
                }
                cell.text.push_str(&span.text);
                cell.end_x = cell.end_x.max(span.end_x);
                continue;
            }
        }
        cells.push(Cell {
            x: span.x,
            end_x: span.end_x,
            size: span.size,
            text: span.text,
        });
    }

    cells
}

fn flatten_table(rows: &[Row], separator: &str) -> Vec<LayoutLine> {
    let anchors = column_anchors(rows);

    rows.iter()
        .map(|row| {
            let mut columns = vec![String::new(); anchors.len()];
            for cell in &row.cells {
                let slot = nearest_anchor(&anchors, cell.x);
                let text = cell.text.trim();
                if !columns[slot].is_empty() {
                    columns[slot].push(' ');
                }
                columns[slot].push_str(text);
            }
            LayoutLine {
                text: columns.join(separator),
                is_table_row: true,
            }
        })
        .collect()
}

/// Column starts shared by the rows. Cell starts within one em of each
/// other land in the same column.
fn column_anchors(rows: &[Row]) -> Vec<f32> {
    let mut starts: Vec<(f32, f32)> = rows
        .iter()
        .flat_map(|row| row.cells.iter())
        .map(|cell| (cell.x, cell.size))
        .collect();
    starts.sort_by(|left, right| left.0.total_cmp(&right.0));

    let mut anchors: Vec<f32> = Vec::new();
    let mut last_start = f32::NEG_INFINITY;
    for (x, size) in starts {
        if x - last_start > size {
            anchors.push(x);
        }
        last_start = x;
    }
    anchors
}

fn nearest_anchor(anchors: &[f32], x: f32) -> usize {
    anchors
        .iter()
        .enumerate()
        .min_by(|(_, left), (_, right)| (*left - x).abs().total_cmp(&(*right - x).abs()))
        .map_or(0, |(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Stream};

    fn build_pdf(pages: &[Vec<(i64, i64, &str)>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for spans in pages {
            let mut operations = Vec::new();
            for (x, y, text) in spans {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
                operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content should encode"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("pdf should serialize");
        bytes
    }

    fn extractor() -> LopdfExtractor {
        LopdfExtractor::new(IngestionOptions::default()).expect("default options are valid")
    }

    #[test]
    fn plain_lines_come_out_top_to_bottom_across_pages() {
        let pdf = build_pdf(&[
            vec![
                (72, 600, "Second line on the first page"),
                (72, 700, "First line on the first page"),
            ],
            vec![(72, 700, "Only line on the second page")],
        ]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        let texts: Vec<&str> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "First line on the first page",
                "Second line on the first page",
                "Only line on the second page",
            ]
        );
        assert_eq!(
            lines.iter().map(|line| line.line_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(lines[2].page_number, 2);
        assert!(lines.iter().all(|line| !line.is_table_row));
    }

    #[test]
    fn table_rows_are_flattened_into_single_lines() {
        let pdf = build_pdf(&[vec![
            (72, 720, "Employee Directory"),
            (72, 690, "ID"),
            (150, 690, "Name"),
            (260, 690, "Dept"),
            (380, 690, "Salary"),
            (72, 670, "EMP001"),
            (150, 670, "John Smith"),
            (260, 670, "Engineering"),
            (380, 670, "$85,000"),
            (72, 650, "EMP002"),
            (150, 650, "Jane Doe"),
            (260, 650, "Marketing"),
            (380, 650, "$75,000"),
        ]]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].text, "Employee Directory");
        assert!(!lines[0].is_table_row);
        assert_eq!(lines[1].text, "ID | Name | Dept | Salary");
        assert_eq!(lines[2].text, "EMP001 | John Smith | Engineering | $85,000");
        assert_eq!(lines[3].text, "EMP002 | Jane Doe | Marketing | $75,000");
        assert!(lines[1..].iter().all(|line| line.is_table_row));
    }

    #[test]
    fn sparse_table_rows_keep_their_empty_cells() {
        let pdf = build_pdf(&[vec![
            (72, 670, "EMP001"),
            (150, 670, "John Smith"),
            (260, 670, "Engineering"),
            (72, 650, "EMP004"),
            (260, 650, "Sales"),
        ]]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "EMP004 |  | Sales");
        assert!(lines[1].is_table_row);
    }

    #[test]
    fn single_cell_row_inside_a_table_stays_in_it() {
        let pdf = build_pdf(&[vec![
            (72, 690, "ID"),
            (150, 690, "Name"),
            (260, 690, "Dept"),
            (72, 670, "EMP001"),
            (150, 670, "John Smith"),
            (260, 670, "Engineering"),
            (72, 650, "EMP003"),
            (72, 630, "EMP002"),
            (150, 630, "Jane Doe"),
            (260, 630, "Marketing"),
        ]]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        let texts: Vec<&str> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "ID | Name | Dept",
                "EMP001 | John Smith | Engineering",
                "EMP003 |  | ",
                "EMP002 | Jane Doe | Marketing",
            ]
        );
        assert!(lines.iter().all(|line| line.is_table_row));
    }

    #[test]
    fn header_above_a_sparse_first_row_joins_the_table() {
        let pdf = build_pdf(&[vec![
            (72, 720, "Employee Directory"),
            (72, 690, "ID"),
            (150, 690, "Name"),
            (260, 690, "Dept"),
            (72, 670, "EMP003"),
            (72, 650, "EMP001"),
            (150, 650, "John Smith"),
            (260, 650, "Engineering"),
            (72, 630, "EMP002"),
            (150, 630, "Jane Doe"),
            (260, 630, "Marketing"),
            (72, 580, "Totals are reviewed every quarter."),
        ]]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0].text, "Employee Directory");
        assert!(!lines[0].is_table_row);
        assert_eq!(lines[1].text, "ID | Name | Dept");
        assert_eq!(lines[2].text, "EMP003 |  | ");
        assert!(lines[1..5].iter().all(|line| line.is_table_row));
        assert_eq!(lines[5].text, "Totals are reviewed every quarter.");
        assert!(!lines[5].is_table_row);
    }

    #[test]
    fn text_spanning_columns_ends_the_table() {
        let pdf = build_pdf(&[vec![
            (72, 670, "EMP001"),
            (150, 670, "John Smith"),
            (260, 670, "Engineering"),
            (72, 650, "EMP002"),
            (150, 650, "Jane Doe"),
            (260, 650, "Marketing"),
            (72, 630, "Contractors are listed separately."),
        ]]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        assert_eq!(lines.len(), 3);
        assert!(lines[..2].iter().all(|line| line.is_table_row));
        assert_eq!(lines[2].text, "Contractors are listed separately.");
        assert!(!lines[2].is_table_row);
    }

    #[test]
    fn lone_gapped_row_is_not_a_table() {
        let pdf = build_pdf(&[vec![
            (72, 700, "Left header"),
            (400, 700, "Right header"),
            (72, 680, "A normal sentence follows the header line."),
        ]]);

        let lines = extractor().extract_lines(&pdf).expect("pdf should extract");

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Left header Right header");
        assert!(lines.iter().all(|line| !line.is_table_row));
    }

    #[test]
    fn garbage_bytes_are_reported_as_corrupt() {
        let error = extractor()
            .extract_lines(b"%PDF-1.4\n%broken")
            .expect_err("broken pdf must not extract");
        assert!(matches!(error, ExtractionError::Corrupt(_)));
        assert!(error.is_unreadable());
    }

    #[test]
    fn blank_pdf_is_reported_as_empty_not_corrupt() {
        let pdf = build_pdf(&[vec![]]);
        let error = extractor()
            .extract_lines(&pdf)
            .expect_err("blank pdf has no lines");
        assert!(matches!(error, ExtractionError::Empty { pages: 1 }));
        assert!(!error.is_unreadable());
    }

    #[test]
    fn load_errors_mentioning_encryption_are_classified() {
        assert!(matches!(
            classify_load_error("Decryption error: invalid password"),
            ExtractionError::Encrypted
        ));
        assert!(matches!(
            classify_load_error("invalid file trailer"),
            ExtractionError::Corrupt(_)
        ));
    }

    #[test]
    fn plain_text_fallback_detects_columns() {
        let lines = extractor().plain_text_lines(
            "Quarterly summary for the site\nPROD001   Wireless Headphones\tElectronics   $129.99\n\n",
        );

        assert_eq!(lines.len(), 2);
        assert!(!lines[0].is_table_row);
        assert_eq!(lines[1].text, "PROD001 | Wireless Headphones | Electronics | $129.99");
        assert!(lines[1].is_table_row);
    }

    #[test]
    fn tj_kerning_and_text_matrix_are_tracked() {
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 500.into()],
            ),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Ponding"),
                    Object::Integer(-400),
                    Object::string_literal("water"),
                ])],
            ),
            Operation::new("TL", vec![14.into()]),
            Operation::new("T*", vec![]),
            Operation::new("Tj", vec![Object::string_literal("next")]),
            Operation::new("ET", vec![]),
        ];

        let spans = collect_spans(&operations);

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Ponding water");
        assert_eq!(spans[0].x, 50.0);
        assert_eq!(spans[0].y, 500.0);
        assert_eq!(spans[1].y, 486.0);
        assert!(spans[0].end_x > spans[0].x);
    }

    #[test]
    fn control_heavy_text_is_unreadable() {
        let garbled = vec![LayoutLine {
            text: "\u{1}\u{2}\u{3}a".to_string(),
            is_table_row: false,
        }];
        let clean = vec![LayoutLine {
            text: "Readable text".to_string(),
            is_table_row: false,
        }];
        assert!(!is_readable(&garbled));
        assert!(is_readable(&clean));
    }
}
