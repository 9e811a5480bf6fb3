//! User-facing texts for the conversational front-end.
//!
//! Centralising every message here serves two purposes:
//!
//! 1. **Single source of truth**: the option reference is rendered from
//!    [`ProcessingOptions::default`], so help text cannot drift from the
//!    defaults actually applied.
//!
//! 2. **Testability**: unit tests inspect the texts directly without driving
//!    a conversation.

use crate::config::ProcessingOptions;
use crate::error::StencilError;

/// Sent when a reply arrives and no upload is waiting for a page range.
pub const NO_PENDING: &str = "Please send a PDF or an image.";

/// Sent after `cancel` discards a pending upload.
pub const CANCELLED: &str = "Cancelled. Send a new PDF or image whenever you are ready.";

/// Replies that cancel a pending page selection.
pub const CANCEL_WORDS: &[&str] = &["cancel", "/cancel", "stop"];

/// Replies that show the help text.
pub const HELP_WORDS: &[&str] = &["help", "/help", "/start"];

/// The option reference, with the canonical defaults filled in.
pub fn help_text() -> String {
    let d = ProcessingOptions::default();
    format!(
        "Send a PDF or an image and it will be redrawn as a stencil PDF of outlines.\n\
         \n\
         Options (write them in the caption):\n\
         • invert=true/false: treat dark ink as the shape (default: {invert})\n\
         • stroke={stroke}: line width (default: {stroke})\n\
         • dpi={dpi}: render resolution for PDFs (default: {dpi})\n\
         • precision={precision}: simplification, smaller keeps more detail, 0 keeps all (default: {precision})\n\
         • min_len={min_len}: shortest outline kept, counted in traced pixels (default: {min_len})\n\
         \n\
         Example: precision=0.0005 dpi=600",
        invert = d.invert,
        stroke = d.stroke_width,
        dpi = d.dpi,
        precision = d.simplify_ratio,
        min_len = d.min_contour_len,
    )
}

/// Asks which pages of a multi-page upload to trace.
pub fn select_pages(name: &str, total_pages: usize) -> String {
    format!(
        "'{name}' has {total_pages} pages. Which should be traced?\n\
         Reply with all, a page number (e.g. 2) or a range (e.g. 2-{total_pages}). \
         Reply cancel to stop."
    )
}

/// Explains why a selection was refused and asks again.
pub fn reprompt(error: &StencilError, total_pages: usize) -> String {
    format!(
        "{error}\nReply with all, a page number between 1 and {total_pages}, \
         or a range such as 1-{total_pages}."
    )
}

/// Caption sent with the finished document.
pub fn completed(page_count: usize) -> String {
    if page_count == 1 {
        "Here is your stencil PDF.".to_string()
    } else {
        format!("Here is your stencil PDF ({page_count} pages).")
    }
}

/// Message sent when a request fails.
pub fn failed(error: &StencilError) -> String {
    format!("Error: {error}")
}

pub(crate) fn is_cancel(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    CANCEL_WORDS.contains(&t.as_str())
}

pub(crate) fn is_help(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    HELP_WORDS.contains(&t.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_every_option_with_defaults() {
        let help = help_text();
        for key in ["invert=", "stroke=", "dpi=", "precision=", "min_len="] {
            assert!(help.contains(key), "missing {key}");
        }
        assert!(help.contains("default: 600"));
        assert!(help.contains("default: 10"));
    }

    #[test]
    fn select_prompt_mentions_page_count() {
        let p = select_pages("plans.pdf", 3);
        assert!(p.contains("3 pages"));
        assert!(p.contains("all"));
    }

    #[test]
    fn reprompt_carries_the_reason() {
        let e = StencilError::SelectionUnsupported { input: "1,2".into() };
        let msg = reprompt(&e, 3);
        assert!(msg.contains("unsupported"));
        assert!(msg.contains("between 1 and 3"));
    }

    #[test]
    fn cancel_and_help_words() {
        assert!(is_cancel(" Cancel "));
        assert!(is_cancel("/cancel"));
        assert!(!is_cancel("2-3"));
        assert!(is_help("/start"));
        assert!(!is_help("all"));
    }
}
