//! Text rendering of the equipment table and the comment panel

use crate::comments::{ThreadPhase, ThreadSnapshot};
use crate::equipment::{CommentCountBucket, ListPhase, ListSnapshot};
use crate::models::{Comment, EquipmentRecord};

/// Columns shown when the page carries no dynamic headers
pub const DEFAULT_COLUMNS: [&str; 5] = ["Name", "Code", "Category", "Location", "Status"];

const MAX_CELL_WIDTH: usize = 32;

/// Check-mark summary of a comment count: up to three marks, then the number.
///
/// # Examples
/// ```
/// use equipment_desk::view::comment_indicator;
///
/// assert_eq!(comment_indicator(0), "");
/// assert_eq!(comment_indicator(2), "✓✓");
/// assert_eq!(comment_indicator(5), "✓✓✓ 5");
/// ```
pub fn comment_indicator(count: u32) -> String {
    let mut indicator = "✓".repeat(count.min(3) as usize);
    if count > 3 {
        indicator.push_str(&format!(" {}", count));
    }
    indicator
}

/// Headers of the data columns, before the trailing Comments column.
pub fn column_headers(dynamic_headers: &[String]) -> Vec<String> {
    if dynamic_headers.is_empty() {
        DEFAULT_COLUMNS.iter().map(|h| h.to_string()).collect()
    } else {
        dynamic_headers.to_vec()
    }
}

fn default_cell(row: &EquipmentRecord, column: usize) -> String {
    let text = match column {
        0 => Some(&row.name),
        1 => Some(&row.code),
        2 => row.category.as_ref(),
        3 => row.location.as_ref(),
        _ => Some(&row.status),
    };
    text.cloned().unwrap_or_default()
}

fn row_cells(row: &EquipmentRecord, dynamic_headers: &[String]) -> Vec<String> {
    let mut cells = vec![row.id.to_string()];
    if dynamic_headers.is_empty() {
        cells.extend((0..DEFAULT_COLUMNS.len()).map(|c| default_cell(row, c)));
    } else {
        cells.extend(dynamic_headers.iter().map(|h| row.extra_text(h)));
    }
    cells.push(comment_indicator(row.comment_count));
    cells
}

fn clip(text: &str) -> String {
    let single_line = text.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= MAX_CELL_WIDTH {
        return single_line;
    }
    let mut clipped: String = single_line.chars().take(MAX_CELL_WIDTH - 1).collect();
    clipped.push('…');
    clipped
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    format!("{}{}", text, " ".repeat(width.saturating_sub(len)))
}

/// Render the table, or the loading / error / empty line in its place.
///
/// Rows are prefixed with their id so they can be addressed from the prompt.
pub fn render_table(list: &ListSnapshot) -> String {
    match list.phase {
        ListPhase::Idle => return "Equipment not loaded yet.".to_string(),
        ListPhase::Loading if list.items.is_empty() => return "Loading...".to_string(),
        _ => {}
    }

    let mut out = String::new();
    if let Some(error) = &list.error {
        out.push_str(&format!("Error: {}\n", error));
    }
    if list.items.is_empty() {
        if list.error.is_none() {
            out.push_str("No equipment found.\n");
        }
        return out;
    }

    let mut header = vec!["ID".to_string()];
    header.extend(column_headers(&list.dynamic_headers));
    header.push("Comments".to_string());

    let rows: Vec<Vec<String>> = list
        .items
        .iter()
        .map(|row| {
            row_cells(row, &list.dynamic_headers)
                .iter()
                .map(|c| clip(c))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    out.push_str(&line(&header));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    if list.phase == ListPhase::Loading {
        out.push_str("Refreshing...\n");
    }
    out
}

/// "Page 2 of 5", with the active filters appended when any are set.
pub fn render_pagination(list: &ListSnapshot) -> String {
    let filters = &list.filters;
    let mut text = format!("Page {} of {}", filters.page, list.total_pages.max(1));

    let mut active = Vec::new();
    if !filters.query.is_empty() {
        active.push(format!("search \"{}\"", filters.query));
    }
    if !filters.status.is_empty() {
        active.push(format!("status {}", filters.status));
    }
    if !filters.category.is_empty() {
        active.push(format!("category {}", filters.category));
    }
    if let Some(bucket) = filters.comment_count {
        active.push(format!("comments {}", bucket));
    }
    if !active.is_empty() {
        text.push_str(&format!(" ({})", active.join(", ")));
    }
    text
}

/// Choices for the status and comment filters. Statuses are the ones the
/// server sent with the last page.
pub fn render_filter_options(list: &ListSnapshot) -> String {
    let statuses = if list.statuses.is_empty() {
        "(load a page first)".to_string()
    } else {
        list.statuses.join(", ")
    };
    let buckets: Vec<String> = CommentCountBucket::ALL
        .iter()
        .map(|b| b.to_string())
        .collect();
    format!(
        "Statuses: {}\nComment counts: {}\n",
        statuses,
        buckets.join(", ")
    )
}

/// Detail view of one equipment row.
pub fn render_record(record: &EquipmentRecord) -> String {
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    let mut out = format!("{} ({})\n", record.name, record.code);
    out.push_str(&format!("  Status:   {}\n", record.status));
    out.push_str(&format!("  Category: {}\n", optional(&record.category)));
    out.push_str(&format!("  Location: {}\n", optional(&record.location)));
    if let Some(description) = record.description.as_deref().filter(|d| !d.trim().is_empty()) {
        out.push_str(&format!("  {}\n", description));
    }
    for (key, value) in &record.extra_fields {
        if !value.is_null() {
            out.push_str(&format!("  {}: {}\n", key, record.extra_text(key)));
        }
    }
    if let Some(updated_at) = record.updated_at {
        out.push_str(&format!("  Updated {}\n", updated_at.format("%Y-%m-%d %H:%M")));
    }
    out
}

fn render_comment(comment: &Comment) -> String {
    let author = if comment.author_name.is_empty() {
        "unknown"
    } else {
        comment.author_name.as_str()
    };
    format!(
        "[{}] {} at {}\n    {}",
        comment.id,
        author,
        comment.created_at.format("%Y-%m-%d %H:%M"),
        comment.text
    )
}

/// Render the comment panel, newest first.
///
/// `equipment` titles the panel with the row's name and description when it
/// is the row the thread belongs to; otherwise only the id is shown.
pub fn render_thread(thread: &ThreadSnapshot, equipment: Option<&EquipmentRecord>) -> String {
    let Some(equipment_id) = thread.equipment_id else {
        return "No comment thread open.".to_string();
    };
    let mut out = match equipment.filter(|e| e.id == equipment_id) {
        Some(record) => {
            let mut title = format!("Comments for {} ({})\n", record.name, record.code);
            if let Some(description) =
                record.description.as_deref().filter(|d| !d.trim().is_empty())
            {
                title.push_str(&format!("{}\n", description));
            }
            title
        }
        None => format!("Comments for equipment {}\n", equipment_id),
    };
    if thread.phase == ThreadPhase::Loading {
        out.push_str("Loading comments...\n");
    }
    if let Some(error) = &thread.error {
        out.push_str(&format!("Error: {}\n", error));
    }
    if thread.comments.is_empty() && thread.phase == ThreadPhase::Open {
        out.push_str("No comments yet.\n");
    }
    for comment in &thread.comments {
        out.push_str(&render_comment(comment));
        out.push('\n');
    }
    out
}
