//! Income and expense entries, parsed from free text or taken from a
//! structured record when the segment carries one.

use std::sync::LazyLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::info;

use super::{stored, stored_id, text_field, CapabilityHandler, HandlerReport, SegmentContext};
use crate::domain::{ExtractedRecord, Tag};
use crate::store::{EntryType, Gateway, NewAccountEntry, Table};

const INCOME_KEYWORDS: [&str; 18] = [
    "received",
    "earned",
    "income",
    "salary",
    "wage",
    "payment",
    "paid me",
    "deposit",
    "revenue",
    "profit",
    "bonus",
    "dividend",
    "interest",
    "refund",
    "reimbursement",
    "credit",
    "gain",
    "earning",
];

const SYMBOLS: [(char, &str); 4] = [('€', "EUR"), ('$', "USD"), ('£', "GBP"), ('¥', "JPY")];
const CODES: [&str; 5] = ["EUR", "USD", "GBP", "JPY", "CHF"];
const NUMBER: &str = r"(\d+(?:[.,]\d+)?)";

static INCOME: LazyLock<Regex> = LazyLock::new(|| {
    let words: Vec<String> = INCOME_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))).expect("valid regex")
});

/// One (regex, currency) pair per symbol or code, in lookup order
static CURRENCY_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let mut patterns = Vec::new();
    for (symbol, code) in SYMBOLS {
        let symbol = regex::escape(&symbol.to_string());
        for pattern in [format!(r"{symbol}\s*{NUMBER}"), format!(r"{NUMBER}\s*{symbol}")] {
            patterns.push((Regex::new(&pattern).expect("valid regex"), code));
        }
    }
    for code in CODES {
        for pattern in [format!(r"(?i){NUMBER}\s*{code}\b"), format!(r"(?i)\b{code}\s*{NUMBER}")] {
            patterns.push((Regex::new(&pattern).expect("valid regex"), code));
        }
    }
    patterns
});

static BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(NUMBER).expect("valid regex"));

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})[/.-](\d{1,2})[/.-](\d{1,2})\b").expect("valid regex"));

static US_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[/.-](\d{1,2})[/.-](\d{2,4})\b").expect("valid regex"));

static TODAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\btoday\b").expect("valid regex"));

/// `Income` when an income keyword appears as a whole word
pub fn entry_type(text: &str) -> EntryType {
    if INCOME.is_match(text) {
        EntryType::Income
    } else {
        EntryType::Expense
    }
}

/// Amount and ISO currency code.
///
/// Symbols are tried first, then codes, then the first bare number (EUR).
/// A comma decimal separator is accepted.
pub fn amount_and_currency(text: &str) -> Option<(f64, String)> {
    let parse = |raw: &str| raw.replace(',', ".").parse::<f64>().ok();

    for (pattern, code) in CURRENCY_PATTERNS.iter() {
        if let Some(amount) = pattern.captures(text).and_then(|caps| parse(&caps[1])) {
            return Some((amount, code.to_string()));
        }
    }

    BARE_NUMBER
        .captures(text)
        .and_then(|caps| parse(&caps[1]))
        .map(|amount| (amount, "EUR".to_string()))
}

/// Transaction date from "today" or a numeric date (`YYYY-MM-DD`, `MM/DD/YY[YY]`)
pub fn transaction_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if TODAY.is_match(text) {
        return Some(today);
    }

    let number = |caps: &regex::Captures<'_>, i: usize| caps[i].parse::<u32>().ok();

    if let Some(caps) = ISO_DATE.captures(text) {
        let year = caps[1].parse::<i32>().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, number(&caps, 2)?, number(&caps, 3)?) {
            return Some(date);
        }
    }

    let caps = US_DATE.captures(text)?;
    let mut year = caps[3].parse::<i32>().ok()?;
    if year < 100 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, number(&caps, 1)?, number(&caps, 2)?)
}

pub struct AccountsHandler {
    gateway: Gateway,
}

impl AccountsHandler {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl CapabilityHandler for AccountsHandler {
    fn tag(&self) -> Tag {
        Tag::Accounts
    }

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        let text = ctx.text();
        let record = ctx.record;
        let today = Local::now().date_naive();

        let Some((amount, currency)) = record
            .and_then(record_amount)
            .or_else(|| amount_and_currency(text))
        else {
            bail!("No amount found in accounts entry");
        };

        let entry = NewAccountEntry {
            entry_type: record
                .and_then(|r| text_field(r, "entry_type"))
                .and_then(|raw| EntryType::parse(&raw))
                .unwrap_or_else(|| entry_type(text)),
            amount,
            currency,
            note: record
                .and_then(|r| text_field(r, "note"))
                .or_else(|| Some(text.to_string())),
            date: record
                .and_then(|r| text_field(r, "date"))
                .and_then(|raw| transaction_date(&raw, today))
                .or_else(|| transaction_date(text, today))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive)),
            source_transcription_id: Some(ctx.transcript_id),
        };
        let kind = entry.entry_type;

        let id = stored_id(self.gateway.save_account_entry(entry).await, "accounts entry")?;
        info!(id, entry_type = kind.as_str(), amount, "Accounts entry saved");
        Ok(stored(Table::Accounts, id))
    }
}

/// `amount` (number or numeric string) and `currency` (EUR when absent)
fn record_amount(record: &ExtractedRecord) -> Option<(f64, String)> {
    let amount = match record.get("amount")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse().ok()?,
        _ => return None,
    };
    let currency = text_field(record, "currency")
        .map(|code| code.to_uppercase())
        .unwrap_or_else(|| "EUR".to_string());
    Some((amount, currency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTranscript, Segment};
    use crate::store::StoreSettings;
    use serde_json::json;
    use tempfile::TempDir;

    async fn gateway(dir: &TempDir) -> (Gateway, i64) {
        let gw = Gateway::connect(StoreSettings::new(dir.path().join("a.db").display().to_string()))
            .unwrap();
        let tid = gw
            .save_transcript(NewTranscript::new("raw", "accounts"))
            .await
            .into_option()
            .unwrap();
        (gw, tid)
    }

    #[tokio::test]
    async fn test_record_fields_win_over_text() {
        let dir = TempDir::new().unwrap();
        let (gw, tid) = gateway(&dir).await;
        let handler = AccountsHandler::new(gw.clone());

        let segment = Segment::new("Paid 20 for groceries", Tag::Accounts, 0);
        let record = json!({"amount": "42,50", "currency": "usd", "entry_type": "income", "date": "2030-01-15"})
            .as_object()
            .cloned()
            .unwrap();
        let ctx = SegmentContext::new(&segment, tid).with_record(&record);
        assert!(matches!(handler.handle(&ctx).await.unwrap(), HandlerReport::Stored(_)));

        let incomes = gw.account_totals(EntryType::Income).await.unwrap_or_default();
        assert_eq!(incomes.get("USD"), Some(&42.5));

        let day = Utc.with_ymd_and_hms(2030, 1, 15, 0, 0, 0).unwrap();
        let entries = gw
            .account_entries_between(day, day + chrono::Duration::days(1))
            .await
            .unwrap_or_default();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].note.as_deref(), Some("Paid 20 for groceries"));
    }

    #[tokio::test]
    async fn test_record_without_amount_falls_back_to_text() {
        let dir = TempDir::new().unwrap();
        let (gw, tid) = gateway(&dir).await;
        let handler = AccountsHandler::new(gw.clone());

        let segment = Segment::new("Taxi £ 18", Tag::Accounts, 0);
        let record = json!({"note": "airport"}).as_object().cloned().unwrap();
        let ctx = SegmentContext::new(&segment, tid).with_record(&record);
        handler.handle(&ctx).await.unwrap();

        let expenses = gw.account_totals(EntryType::Expense).await.unwrap_or_default();
        assert_eq!(expenses.get("GBP"), Some(&18.0));
    }

    #[test]
    fn test_entry_type_whole_words() {
        assert_eq!(entry_type("Received salary"), EntryType::Income);
        assert_eq!(entry_type("Client paid me 300"), EntryType::Income);
        assert_eq!(entry_type("Paid 20 for groceries"), EntryType::Expense);
        // "interesting" is not "interest"
        assert_eq!(entry_type("an interesting lunch, 12 euros"), EntryType::Expense);
    }

    #[test]
    fn test_currency_symbols() {
        assert_eq!(amount_and_currency("Coffee €3,50"), Some((3.5, "EUR".into())));
        assert_eq!(amount_and_currency("Book 12.99$"), Some((12.99, "USD".into())));
        assert_eq!(amount_and_currency("Taxi £ 18"), Some((18.0, "GBP".into())));
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(amount_and_currency("Lunch 15 chf"), Some((15.0, "CHF".into())));
        assert_eq!(amount_and_currency("USD 40 for shoes"), Some((40.0, "USD".into())));
    }

    #[test]
    fn test_bare_number_defaults_to_eur() {
        assert_eq!(
            amount_and_currency("Paid 20 for groceries"),
            Some((20.0, "EUR".into()))
        );
        assert_eq!(amount_and_currency("Paid for groceries"), None);
    }

    #[test]
    fn test_transaction_dates() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(transaction_date("spent 5 today", today), Some(today));
        assert_eq!(
            transaction_date("rent 2026-09-01", today),
            NaiveDate::from_ymd_opt(2026, 9, 1)
        );
        assert_eq!(
            transaction_date("dinner 03/14/25", today),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(transaction_date("no date here", today), None);
    }
}
