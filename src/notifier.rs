use reqwest::Client;
use rust_decimal::Decimal;
use tracing::debug;
use url::Url;

use crate::error::NotifyError;
use crate::types::TransactionRecord;

/// CodeX Bot webhook base. The access token is appended as the last path segment.
pub const DEFAULT_WEBHOOK_BASE: &str = "https://notify.bot.codex.so/u/";

/// What a `notify` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// One message carrying `lines` transactions was delivered.
    Sent { lines: usize },
    /// Nothing worth announcing; no request was made.
    Skipped,
}

/// Sink for one cycle's batch of new transactions.
#[allow(async_fn_in_trait)]
pub trait Notify {
    async fn notify(&self, records: &[TransactionRecord]) -> Result<Delivery, NotifyError>;
}

/// Format a single record as a message line.
///
/// `💰 100$ Monthly backer to EditorJS`
pub fn format_line(record: &TransactionRecord) -> String {
    let amount = record.amount.round_dp(2).normalize();
    let unit = match record.currency.as_deref() {
        None | Some("USD") => "$".to_string(),
        Some(code) => format!(" {code}"),
    };
    format!(
        "💰 {amount}{unit} {} to {}",
        record.description, record.counterparty
    )
}

/// Build the message for a batch, or `None` when no record has a positive
/// amount. Refunds and fees (amount <= 0) are left out.
pub fn format_message(records: &[TransactionRecord]) -> Option<(String, usize)> {
    let lines: Vec<String> = records
        .iter()
        .filter(|r| r.amount > Decimal::ZERO)
        .map(format_line)
        .collect();
    if lines.is_empty() {
        return None;
    }
    let count = lines.len();
    Some((lines.join("\n\n"), count))
}

/// Form-encoded webhook delivery: `POST <base><token>` with a `message` field.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    endpoint: Url,
}

impl WebhookNotifier {
    pub fn new(client: Client, base: &Url, token: &str) -> Result<Self, NotifyError> {
        let endpoint = base.join(token)?;
        Ok(Self { client, endpoint })
    }
}

impl Notify for WebhookNotifier {
    async fn notify(&self, records: &[TransactionRecord]) -> Result<Delivery, NotifyError> {
        let Some((message, lines)) = format_message(records) else {
            debug!("No positive amounts among {} record(s), skipping webhook", records.len());
            return Ok(Delivery::Skipped);
        };

        let resp = self
            .client
            .post(self.endpoint.clone())
            .form(&[("message", message.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(Delivery::Sent { lines })
    }
}
