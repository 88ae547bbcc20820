use crate::stack::Stack;
use crate::trailer;

// -----------------------------------------------------------------------------
// Markers

/// Markers delimiting the generated navigation block so regeneration can
/// replace exactly this block inside an externally edited description.
pub const BLOCK_BEGIN: &str = "<!-- stacker:stack:begin -->";
pub const BLOCK_END: &str = "<!-- stacker:stack:end -->";

// -----------------------------------------------------------------------------
// Composer

/// Render the PR description for entry `index` of the stack.
///
/// Pure function of the stack and the untouched portion of `existing`:
/// the markered block is regenerated, the commit's own body (stack trailers
/// stripped) follows it, and any free-form text the author added outside the
/// block is preserved below. Composing twice without an intervening change
/// is a fixed point.
pub fn compose_body(stack: &Stack, index: usize, existing: &str) -> String {
    let block = render_block(stack, index);
    let commit_body = commit_body_text(stack, index);
    let leftover = remove_block(existing);

    let mut sections = vec![block];
    if !commit_body.is_empty() && !leftover.starts_with(&commit_body) {
        sections.push(commit_body);
    }
    if !leftover.is_empty() {
        sections.push(leftover);
    }
    sections.join("\n\n")
}

/// The commit's message body with stack trailers stripped, subject excluded.
fn commit_body_text(stack: &Stack, index: usize) -> String {
    let message = stack.entries[index].commit.message();
    let stripped = trailer::strip(&message, trailer::TRAILER_PREFIX);
    stripped
        .lines()
        .skip(1)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Drop a previously generated block (markers included) from a description.
fn remove_block(existing: &str) -> String {
    let (Some(begin), Some(end)) = (existing.find(BLOCK_BEGIN), existing.find(BLOCK_END)) else {
        return existing.trim().to_string();
    };
    if end < begin {
        return existing.trim().to_string();
    }
    let mut remaining = existing[..begin].to_string();
    remaining.push_str(&existing[end + BLOCK_END.len()..]);
    remaining.trim().to_string()
}

fn entry_link(stack: &Stack, index: usize) -> String {
    let entry = &stack.entries[index];
    match entry.pr_number {
        Some(number) => format!("#{number}"),
        None => format!("`{}`", entry.branch_name),
    }
}

fn render_block(stack: &Stack, index: usize) -> String {
    let mut lines = vec![BLOCK_BEGIN.to_string()];

    if let Some(dep) = &stack.depends_on {
        let link = match dep.pr_number {
            Some(number) => format!("#{number}"),
            None => format!("`{}`", dep.top_branch),
        };
        lines.push(format!(
            "> Depends on stack **{}** ({link}); land that stack first.",
            dep.stack_name
        ));
        lines.push(String::new());
    }

    lines.push(format!(
        "**Stack** ({} PRs targeting `{}`):",
        stack.entries.len(),
        stack.target
    ));
    lines.push(String::new());
    lines.push("| | PR | Commit |".to_string());
    lines.push("|:-:|:--|:--|".to_string());
    // Top of the stack first
    for position in (0..stack.entries.len()).rev() {
        let marker = if position == index { "→" } else { "" };
        let subject = &stack.entries[position].commit.subject;
        let subject = if position == index {
            format!("**{subject}**")
        } else {
            subject.clone()
        };
        lines.push(format!(
            "| {marker} | {} | {subject} |",
            entry_link(stack, position)
        ));
    }

    let mut nav = Vec::new();
    if index > 0 {
        nav.push(format!("Prev: {}", entry_link(stack, index - 1)));
    }
    if index + 1 < stack.entries.len() {
        nav.push(format!("Next: {}", entry_link(stack, index + 1)));
    }
    if !nav.is_empty() {
        lines.push(String::new());
        lines.push(nav.join(" · "));
    }

    lines.push(BLOCK_END.to_string());
    lines.join("\n")
}
