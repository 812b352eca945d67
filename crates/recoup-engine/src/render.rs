//! Placeholder substitution for outreach content.
//!
//! Templates use `{{ name }}` placeholders. Known names are replaced from a
//! [`RenderContext`]; anything else is left exactly as written so a typo in
//! an approved template is visible in the draft rather than silently erased.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("Valid regex pattern")
});

/// Values available to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    pub company_name: String,
    pub customer_name: String,
    pub invoice_number: String,
    /// Already formatted, see [`format_amount`].
    pub amount: String,
    pub invoice_link: String,
}

impl RenderContext {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "company_name" => Some(&self.company_name),
            "customer_name" => Some(&self.customer_name),
            "invoice_number" => Some(&self.invoice_number),
            "amount" => Some(&self.amount),
            "invoice_link" => Some(&self.invoice_link),
            _ => None,
        }
    }
}

/// Substitute every known placeholder in `template`.
pub fn render(template: &str, ctx: &RenderContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match ctx.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Format minor units for display: `$1,234.56` for USD, otherwise the
/// currency code followed by the amount (`EUR 1,234.56`).
pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    let whole = group_thousands(cents / 100);
    let fraction = cents % 100;

    let currency = currency.trim().to_ascii_uppercase();
    if currency == "USD" {
        format!("{sign}${whole}.{fraction:02}")
    } else {
        format!("{sign}{currency} {whole}.{fraction:02}")
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        RenderContext {
            company_name: "Acme".into(),
            customer_name: "Globex".into(),
            invoice_number: "INV-42".into(),
            amount: "$1,234.56".into(),
            invoice_link: "https://pay.test/42".into(),
        }
    }

    #[test]
    fn substitutes_known_placeholders_with_or_without_spaces() {
        let out = render(
            "Hi {{customer_name}}, {{ invoice_number }} for {{  amount }} from {{company_name}}",
            &ctx(),
        );
        assert_eq!(out, "Hi Globex, INV-42 for $1,234.56 from Acme");
    }

    #[test]
    fn unknown_placeholders_are_left_untouched() {
        let out = render("Dear {{ contact_title }} {{customer_name}}", &ctx());
        assert_eq!(out, "Dear {{ contact_title }} Globex");
    }

    #[test]
    fn values_are_not_re_expanded() {
        let mut context = ctx();
        context.customer_name = "{{company_name}}".into();
        assert_eq!(render("{{customer_name}}", &context), "{{company_name}}");
    }

    #[test]
    fn usd_amounts() {
        assert_eq!(format_amount(123_456, "USD"), "$1,234.56");
        assert_eq!(format_amount(5, "usd"), "$0.05");
        assert_eq!(format_amount(100_000_000, "USD"), "$1,000,000.00");
    }

    #[test]
    fn other_currencies_use_the_code() {
        assert_eq!(format_amount(123_456, "EUR"), "EUR 1,234.56");
        assert_eq!(format_amount(99_900, "gbp"), "GBP 999.00");
    }

    #[test]
    fn negative_amounts_keep_the_sign() {
        assert_eq!(format_amount(-2_500, "USD"), "-$25.00");
    }
}
