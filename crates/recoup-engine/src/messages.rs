//! Built-in outreach content, used when no approved message template
//! exists for a step. Drafts built from these always need review.
//!
//! Later steps are firmer; steps past the last built-in message reuse it.

use crate::render::{RenderContext, render};

/// The sign-off appended to every draft body that does not already have it.
pub const CLOSING_LINE: &str = "Thank you for your prompt attention to this matter.";

struct DefaultMessage {
    subject: &'static str,
    body: &'static str,
}

static DEFAULT_MESSAGES: &[DefaultMessage] = &[
    DefaultMessage {
        subject: "Friendly reminder: invoice {{invoice_number}} from {{company_name}}",
        body: "Hi {{customer_name}},\n\n\
               This is a friendly reminder that invoice {{invoice_number}} for {{amount}} is now due. \
               If you have already sent payment, please disregard this note.",
    },
    DefaultMessage {
        subject: "Invoice {{invoice_number}} is past due",
        body: "Hi {{customer_name}},\n\n\
               Our records show that invoice {{invoice_number}} for {{amount}} remains unpaid. \
               Please arrange payment at your earliest convenience or let us know if there is an issue.",
    },
    DefaultMessage {
        subject: "Second notice: invoice {{invoice_number}} is overdue",
        body: "Hello {{customer_name}},\n\n\
               Invoice {{invoice_number}} for {{amount}} is now significantly overdue. \
               We ask that you settle the balance promptly or contact us to agree a payment plan.",
    },
    DefaultMessage {
        subject: "Urgent: payment required for invoice {{invoice_number}}",
        body: "Hello {{customer_name}},\n\n\
               Despite previous reminders, invoice {{invoice_number}} for {{amount}} has not been paid. \
               Please make payment immediately to avoid further collection activity.",
    },
    DefaultMessage {
        subject: "Final notice: invoice {{invoice_number}}",
        body: "{{customer_name}},\n\n\
               This is our final notice regarding invoice {{invoice_number}} for {{amount}}. \
               If payment is not received, {{company_name}} may pursue further action to recover the balance.",
    },
];

/// Unrendered default `(subject, body)` for a 1-indexed step.
pub fn default_message(step_number: u32) -> (&'static str, &'static str) {
    let index = (step_number.max(1) as usize - 1).min(DEFAULT_MESSAGES.len() - 1);
    let message = &DEFAULT_MESSAGES[index];
    (message.subject, message.body)
}

/// Rendered subject and body, ready to become a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
}

/// Render `subject`/`body` and complete the body with the invoice link and
/// the closing line when either is missing.
pub fn compose(subject: &str, body: &str, ctx: &RenderContext) -> DraftContent {
    let subject = render(subject, ctx);
    let mut body = render(body, ctx).trim_end().to_string();

    if !ctx.invoice_link.is_empty() && !body.contains(&ctx.invoice_link) {
        body.push_str("\n\nView and pay your invoice: ");
        body.push_str(&ctx.invoice_link);
    }
    if !body.contains(CLOSING_LINE) {
        body.push_str("\n\n");
        body.push_str(CLOSING_LINE);
    }

    DraftContent { subject, body }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        RenderContext {
            company_name: "Acme".into(),
            customer_name: "Globex".into(),
            invoice_number: "INV-9".into(),
            amount: "$50.00".into(),
            invoice_link: "https://pay.test/9".into(),
        }
    }

    #[test]
    fn steps_past_the_end_reuse_the_last_message() {
        assert_eq!(default_message(5), default_message(50));
        assert_ne!(default_message(1), default_message(2));
        assert_eq!(default_message(0), default_message(1));
    }

    #[test]
    fn compose_appends_link_and_closing_once() {
        let (subject, body) = default_message(1);
        let content = compose(subject, body, &ctx());
        assert_eq!(
            content.subject,
            "Friendly reminder: invoice INV-9 from Acme"
        );
        assert!(content.body.starts_with("Hi Globex,"));
        assert_eq!(content.body.matches("https://pay.test/9").count(), 1);
        assert!(content.body.ends_with(CLOSING_LINE));
    }

    #[test]
    fn compose_keeps_an_existing_link_and_closing() {
        let body = format!("Pay here: {{{{invoice_link}}}}\n\n{CLOSING_LINE}");
        let content = compose("s", &body, &ctx());
        assert_eq!(
            content.body,
            format!("Pay here: https://pay.test/9\n\n{CLOSING_LINE}")
        );
    }

    #[test]
    fn every_default_renders_without_leftover_placeholders() {
        for step in 1..=DEFAULT_MESSAGES.len() as u32 {
            let (subject, body) = default_message(step);
            let content = compose(subject, body, &ctx());
            assert!(!content.subject.contains("{{"), "step {step} subject");
            assert!(!content.body.contains("{{"), "step {step} body");
        }
    }
}
