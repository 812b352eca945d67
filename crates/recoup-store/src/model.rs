//! Shared domain enums persisted as lowercase TEXT columns.
//!
//! Each enum round-trips through [`as_str`](AgingBucket::as_str) and
//! [`FromStr`], which is how the stores read and write them.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ═══════════════════════════════════════════════════════════════════════
//  AgingBucket
// ═══════════════════════════════════════════════════════════════════════

/// A discrete days-past-due range.
///
/// Variants are declared in order of increasing severity, so the derived
/// `Ord` sorts `Current` first and `Dpd150Plus` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgingBucket {
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "dpd_1_30")]
    Dpd1To30,
    #[serde(rename = "dpd_31_60")]
    Dpd31To60,
    #[serde(rename = "dpd_61_90")]
    Dpd61To90,
    #[serde(rename = "dpd_91_120")]
    Dpd91To120,
    #[serde(rename = "dpd_121_150")]
    Dpd121To150,
    #[serde(rename = "dpd_150_plus")]
    Dpd150Plus,
}

impl AgingBucket {
    /// Every bucket, least severe first.
    pub const ALL: [AgingBucket; 7] = [
        Self::Current,
        Self::Dpd1To30,
        Self::Dpd31To60,
        Self::Dpd61To90,
        Self::Dpd91To120,
        Self::Dpd121To150,
        Self::Dpd150Plus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Dpd1To30 => "dpd_1_30",
            Self::Dpd31To60 => "dpd_31_60",
            Self::Dpd61To90 => "dpd_61_90",
            Self::Dpd91To120 => "dpd_91_120",
            Self::Dpd121To150 => "dpd_121_150",
            Self::Dpd150Plus => "dpd_150_plus",
        }
    }

    /// Whether invoices in this bucket are past due and eligible for outreach.
    pub fn is_actionable(self) -> bool {
        self != Self::Current
    }
}

impl fmt::Display for AgingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgingBucket {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| StoreError::InvalidData {
                field: "aging_bucket",
                value: s.to_string(),
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  InvoiceStatus
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle state of an invoice. Only `Open` and `InPaymentPlan` receive
/// outreach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    InPaymentPlan,
    Paid,
    PartiallyPaid,
    Disputed,
    Canceled,
    Settled,
    WrittenOff,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InPaymentPlan => "in_payment_plan",
            Self::Paid => "paid",
            Self::PartiallyPaid => "partially_paid",
            Self::Disputed => "disputed",
            Self::Canceled => "canceled",
            Self::Settled => "settled",
            Self::WrittenOff => "written_off",
        }
    }

    /// Whether invoices in this status take part in collections outreach.
    pub fn is_collectible(self) -> bool {
        matches!(self, Self::Open | Self::InPaymentPlan)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_payment_plan" => Ok(Self::InPaymentPlan),
            "paid" => Ok(Self::Paid),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "disputed" => Ok(Self::Disputed),
            "canceled" => Ok(Self::Canceled),
            "settled" => Ok(Self::Settled),
            "written_off" => Ok(Self::WrittenOff),
            other => Err(StoreError::InvalidData {
                field: "invoice status",
                value: other.to_string(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  DraftStatus
// ═══════════════════════════════════════════════════════════════════════

/// Review state of an outreach draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Generated from a built-in message; needs human review before sending.
    PendingApproval,
    /// Generated from an approved template; the send stage may act on it.
    Approved,
    Sent,
    /// Superseded together with its workflow; frees the step slot.
    Voided,
}

impl DraftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Voided => "voided",
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "sent" => Ok(Self::Sent),
            "voided" => Ok(Self::Voided),
            other => Err(StoreError::InvalidData {
                field: "draft status",
                value: other.to_string(),
            }),
        }
    }
}

// ── date helpers ─────────────────────────────────────────────────────

/// Parse a `YYYY-MM-DD` column.
pub(crate) fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| StoreError::InvalidData {
        field,
        value: value.to_string(),
    })
}

/// Format a date for a `YYYY-MM-DD` column.
pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_strings_roundtrip() {
        for bucket in AgingBucket::ALL {
            let parsed: AgingBucket = bucket.as_str().parse().unwrap();
            assert_eq!(parsed, bucket);
        }
        assert!("dpd_9000".parse::<AgingBucket>().is_err());
    }

    #[test]
    fn bucket_serde_matches_column_value() {
        let json = serde_json::to_string(&AgingBucket::Dpd121To150).unwrap();
        assert_eq!(json, "\"dpd_121_150\"");
    }

    #[test]
    fn buckets_order_by_severity() {
        assert!(AgingBucket::Dpd150Plus > AgingBucket::Dpd1To30);
        assert!(AgingBucket::Current < AgingBucket::Dpd1To30);
        assert!(!AgingBucket::Current.is_actionable());
        assert!(AgingBucket::Dpd61To90.is_actionable());
    }

    #[test]
    fn only_open_and_payment_plan_are_collectible() {
        assert!(InvoiceStatus::Open.is_collectible());
        assert!(InvoiceStatus::InPaymentPlan.is_collectible());
        assert!(!InvoiceStatus::Paid.is_collectible());
        assert!(!InvoiceStatus::Disputed.is_collectible());
        assert_eq!(
            "written_off".parse::<InvoiceStatus>().unwrap(),
            InvoiceStatus::WrittenOff
        );
    }

    #[test]
    fn draft_status_parse_rejects_unknown() {
        assert_eq!(
            "pending_approval".parse::<DraftStatus>().unwrap(),
            DraftStatus::PendingApproval
        );
        assert!("queued".parse::<DraftStatus>().is_err());
    }

    #[test]
    fn date_helpers_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(format_date(d), "2026-03-09");
        assert_eq!(parse_date("due_date", "2026-03-09").unwrap(), d);
        assert!(parse_date("due_date", "03/09/2026").is_err());
    }
}
