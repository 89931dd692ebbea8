//! Tabula Context - Table Formatting and Prompt Injection
//!
//! Renders table rows as compact text blocks and splices them into an
//! outgoing message list at per-table depths, counted from the end.

use serde::{Deserialize, Serialize};
use tabula_core::{ChatMessage, Row, TableId, TableSchema, TableState};

// ============================================================================
// TABLE FORMATTING
// ============================================================================

/// Render rows as a compact text table.
///
/// Layout: a `【title】` line, a line of field names, then one line per row,
/// columns separated by ` | `. Returns an empty string for no rows.
pub fn format_table(schema: &TableSchema, rows: &[Row]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("【{}】", schema.title));
    lines.push(
        schema
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
    );
    for row in rows {
        lines.push(
            schema
                .fields
                .iter()
                .map(|f| row.display_value(&f.key))
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }

    lines.join("\n")
}

/// Estimate token count for text.
/// Uses a simple heuristic of ~0.75 tokens per character.
pub fn estimate_tokens(text: &str) -> i32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f32 * 0.75).ceil() as i32
}

// ============================================================================
// INJECTABLE BLOCKS
// ============================================================================

/// Rendered table ready to be spliced into a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectableBlock {
    pub table_id: TableId,
    /// Messages from the end; 0 appends after the last message
    pub depth: usize,
    pub content: String,
    /// Rows rendered
    pub actual_rows: usize,
    /// Rows stored for the table
    pub total_rows: usize,
    pub token_estimate: i32,
}

/// Render every injection-enabled, non-empty table, in schema order.
pub fn build_injectables(schema: &[TableSchema], tables: &TableState) -> Vec<InjectableBlock> {
    schema
        .iter()
        .filter(|t| t.injection_enabled)
        .filter_map(|table| {
            let rows = tables.rows(&table.id);
            if rows.is_empty() {
                return None;
            }

            let shown = match table.injection_row_limit {
                0 => rows,
                limit => &rows[..limit.min(rows.len())],
            };
            let content = format_table(table, shown);

            Some(InjectableBlock {
                table_id: table.id.clone(),
                depth: table.injection_depth,
                token_estimate: estimate_tokens(&content),
                content,
                actual_rows: shown.len(),
                total_rows: rows.len(),
            })
        })
        .collect()
}

// ============================================================================
// INJECTION
// ============================================================================

/// Header placed above every injected block.
pub const REFERENCE_HEADER: &str = "=== Recorded information follows. It is background for reference only; \
     do not include any tables or database content in your reply ===";

/// Footer placed below every injected block.
pub const REFERENCE_FOOTER: &str = "=== End of recorded information ===";

/// Where a block landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub table_id: TableId,
    pub depth: usize,
    /// Index in the original message list before which the block was placed
    pub original_index: usize,
}

/// Index before which a block at `depth` goes in a list of `len` messages.
pub fn insertion_index(len: usize, depth: usize) -> usize {
    len.saturating_sub(depth)
}

/// Splices reference blocks into outgoing message lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInjector {
    header: String,
    footer: String,
}

impl Default for ContextInjector {
    fn default() -> Self {
        Self {
            header: REFERENCE_HEADER.to_string(),
            footer: REFERENCE_FOOTER.to_string(),
        }
    }
}

impl ContextInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = footer.into();
        self
    }

    /// Wrap content in the reference-only header and footer.
    pub fn wrap(&self, content: &str) -> String {
        format!("{}\n\n{}\n\n{}", self.header, content, self.footer)
    }

    /// Insert each block as a system message at its depth.
    ///
    /// Every index is computed against the original length, so one block
    /// never shifts another. Blocks sharing an index keep the order given.
    pub fn inject(&self, messages: &mut Vec<ChatMessage>, blocks: &[InjectableBlock]) -> Vec<Placement> {
        if blocks.is_empty() {
            return Vec::new();
        }

        let original_len = messages.len();
        let mut targets: Vec<(usize, &InjectableBlock)> = blocks
            .iter()
            .map(|b| (insertion_index(original_len, b.depth), b))
            .collect();
        targets.sort_by_key(|(index, _)| *index);

        let placements = targets
            .iter()
            .map(|(index, block)| Placement {
                table_id: block.table_id.clone(),
                depth: block.depth,
                original_index: *index,
            })
            .collect();

        let mut pending = targets.into_iter().peekable();
        let mut spliced = Vec::with_capacity(original_len + blocks.len());
        for (i, message) in std::mem::take(messages).into_iter().enumerate() {
            while let Some((_, block)) = pending.next_if(|(index, _)| *index <= i) {
                spliced.push(ChatMessage::system(self.wrap(&block.content)));
            }
            spliced.push(message);
        }
        for (_, block) in pending {
            spliced.push(ChatMessage::system(self.wrap(&block.content)));
        }

        *messages = spliced;
        placements
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::MessageRole;

    fn task_schema() -> TableSchema {
        TableSchema::new("tasks", "Tasks")
            .with_field("id", "ID")
            .with_field("status", "Status")
    }

    fn conversation(n: usize) -> Vec<ChatMessage> {
        (0..n).map(|i| ChatMessage::user(format!("m{}", i))).collect()
    }

    fn block(table_id: &str, depth: usize) -> InjectableBlock {
        InjectableBlock {
            table_id: table_id.to_string(),
            depth,
            content: format!("[{}]", table_id),
            actual_rows: 1,
            total_rows: 1,
            token_estimate: 1,
        }
    }

    fn contents(messages: &[ChatMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| match m.role {
                MessageRole::System => m
                    .content
                    .lines()
                    .find(|l| l.starts_with('['))
                    .unwrap_or_default()
                    .to_string(),
                _ => m.content.clone(),
            })
            .collect()
    }

    #[test]
    fn test_format_table_layout() {
        let rows = vec![
            Row::new().with("id", "1").with("status", "done"),
            Row::new().with("id", "2"),
        ];
        let text = format_table(&task_schema(), &rows);
        assert_eq!(text, "【Tasks】\nID | Status\n1 | done\n2 | -");
    }

    #[test]
    fn test_format_table_empty() {
        assert_eq!(format_table(&task_schema(), &[]), "");
    }

    #[test]
    fn test_build_injectables_respects_flags_and_limits() {
        let schema = vec![
            task_schema().with_injection(2, 1),
            TableSchema::new("npcs", "NPCs").with_field("name", "Name"),
            TableSchema::new("empty", "Empty")
                .with_field("k", "K")
                .with_injection(0, 0),
        ];
        let mut tables = TableState::new();
        tables.set_rows(
            "tasks",
            vec![Row::new().with("id", "1"), Row::new().with("id", "2")],
        );
        tables.set_rows("npcs", vec![Row::new().with("name", "Ann")]);

        let blocks = build_injectables(&schema, &tables);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].table_id, "tasks");
        assert_eq!(blocks[0].depth, 2);
        assert_eq!(blocks[0].actual_rows, 1);
        assert_eq!(blocks[0].total_rows, 2);
        assert!(blocks[0].content.ends_with("1 | -"));
        assert!(blocks[0].token_estimate > 0);
    }

    #[test]
    fn test_inject_depth_zero_appends() {
        let mut messages = conversation(3);
        let placements = ContextInjector::new().inject(&mut messages, &[block("a", 0)]);

        assert_eq!(contents(&messages), vec!["m0", "m1", "m2", "[a]"]);
        assert_eq!(placements[0].original_index, 3);
        assert_eq!(messages[3].role, MessageRole::System);
        assert!(messages[3].content.starts_with(REFERENCE_HEADER));
        assert!(messages[3].content.ends_with(REFERENCE_FOOTER));
    }

    #[test]
    fn test_inject_depth_counts_from_original_end() {
        let mut messages = conversation(4);
        ContextInjector::new().inject(&mut messages, &[block("a", 1), block("b", 3)]);

        assert_eq!(
            contents(&messages),
            vec!["m0", "[b]", "m1", "m2", "[a]", "m3"]
        );
    }

    #[test]
    fn test_inject_same_depth_keeps_call_order() {
        let mut messages = conversation(2);
        ContextInjector::new().inject(&mut messages, &[block("a", 1), block("b", 1)]);

        assert_eq!(contents(&messages), vec!["m0", "[a]", "[b]", "m1"]);
    }

    #[test]
    fn test_inject_depth_beyond_start_clamps_to_front() {
        let mut messages = conversation(2);
        let placements = ContextInjector::new().inject(&mut messages, &[block("a", 10)]);

        assert_eq!(contents(&messages), vec!["[a]", "m0", "m1"]);
        assert_eq!(placements[0].original_index, 0);
    }

    #[test]
    fn test_inject_into_empty_conversation() {
        let mut messages = Vec::new();
        ContextInjector::new().inject(&mut messages, &[block("a", 0), block("b", 2)]);
        assert_eq!(contents(&messages), vec!["[a]", "[b]"]);
    }

    #[test]
    fn test_custom_header_footer() {
        let injector = ContextInjector::new().with_header("<<").with_footer(">>");
        assert_eq!(injector.wrap("x"), "<<\n\nx\n\n>>");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 3);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
