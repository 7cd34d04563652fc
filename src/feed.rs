use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::{Config, FeedKind};
use crate::error::FetchError;
use crate::types::{TransactionRecord, parse_timestamp};

/// REST CSV export of all transactions of the EditorJS collective.
pub const DEFAULT_CSV_URL: &str = "https://rest.opencollective.com/v2/editorjs/transactions.txt?\
    kind=ADDED_FUNDS,BALANCE_TRANSFER,CONTRIBUTION,EXPENSE,PLATFORM_TIP&\
    includeGiftCardTransactions=1&includeIncognitoTransactions=1&includeChildrenTransactions=1";

/// Open Collective GraphQL endpoint.
pub const DEFAULT_GRAPHQL_URL: &str = "https://opencollective.com/api/graphql";

/// Collective queried by the GraphQL feed unless configured otherwise.
pub const DEFAULT_COLLECTIVE_ID: u64 = 37258;

const TRANSACTIONS_QUERY: &str = "query Transactions($CollectiveId: Int!, $type: String, $limit: Int, $offset: Int, $dateFrom: String, $dateTo: String) {
  allTransactions(CollectiveId: $CollectiveId, type: $type, limit: $limit, offset: $offset, dateFrom: $dateFrom, dateTo: $dateTo) {
    id
    createdAt
    description
    type
    amount
    currency
    collective {
      name
    }
    fromCollective {
      name
      path
    }
  }
}
";

/// Source of the full current transaction window.
#[allow(async_fn_in_trait)]
pub trait TransactionFeed {
    /// Fetch and decode every record in the window. A partially decoded
    /// batch is never returned.
    async fn fetch(&self) -> Result<Vec<TransactionRecord>, FetchError>;
}

/// Drop records at or before `since`. Returns how many were removed.
pub fn apply_floor(records: &mut Vec<TransactionRecord>, since: DateTime<Utc>) -> usize {
    let before = records.len();
    records.retain(|r| r.timestamp > since);
    before - records.len()
}

async fn success_body(resp: Response) -> Result<Vec<u8>, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

// ── REST CSV ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CsvRow {
    datetime: String,
    #[serde(default)]
    description: String,
    amount: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(rename = "accountName", default)]
    account_name: String,
}

/// Newest-first CSV export. Rows carry no ids and decimal-string amounts.
#[derive(Debug, Clone)]
pub struct CsvFeed {
    client: Client,
    url: Url,
}

impl CsvFeed {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

impl TransactionFeed for CsvFeed {
    async fn fetch(&self) -> Result<Vec<TransactionRecord>, FetchError> {
        let resp = self.client.get(self.url.clone()).send().await?;
        let body = success_body(resp).await?;
        let records = parse_csv(&body)?;
        debug!("Fetched {} transactions from CSV feed", records.len());
        Ok(records)
    }
}

/// Decode a CSV export body into records, in feed order.
pub fn parse_csv(body: &[u8]) -> Result<Vec<TransactionRecord>, FetchError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body);

    let mut out = Vec::new();
    for row in rdr.deserialize::<CsvRow>() {
        let row = row?;
        let timestamp = parse_timestamp(&row.datetime).ok_or_else(|| FetchError::Timestamp {
            value: row.datetime.clone(),
        })?;
        let amount = Decimal::from_str(&row.amount).map_err(|_| FetchError::Amount {
            value: row.amount.clone(),
        })?;
        out.push(TransactionRecord {
            id: None,
            timestamp,
            description: row.description,
            amount,
            currency: row.currency.filter(|c| !c.is_empty()),
            counterparty: row.account_name,
        });
    }
    Ok(out)
}

// ── GraphQL ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TransactionsRequest<'a> {
    #[serde(rename = "operationName")]
    operation_name: &'a str,
    variables: TransactionsVariables,
    query: &'a str,
}

#[derive(Debug, Serialize)]
struct TransactionsVariables {
    #[serde(rename = "CollectiveId")]
    collective_id: u64,
    #[serde(rename = "dateFrom")]
    date_from: String,
    #[serde(rename = "dateTo")]
    date_to: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    #[serde(rename = "allTransactions")]
    all_transactions: Vec<GraphQlTransaction>,
}

#[derive(Debug, Deserialize)]
struct GraphQlTransaction {
    id: u64,
    #[serde(rename = "createdAt")]
    created_at: String,
    #[serde(default)]
    description: Option<String>,
    /// Minor currency units (cents).
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    collective: Option<CollectiveRef>,
    #[serde(rename = "fromCollective", default)]
    from_collective: Option<CollectiveRef>,
}

#[derive(Debug, Deserialize)]
struct CollectiveRef {
    #[serde(default)]
    name: Option<String>,
}

fn collective_name(c: Option<CollectiveRef>) -> String {
    c.and_then(|c| c.name).unwrap_or_default()
}

/// `allTransactions` query for one collective. Records carry stable ids.
#[derive(Debug, Clone)]
pub struct GraphQlFeed {
    client: Client,
    url: Url,
    collective_id: u64,
    date_from: DateTime<Utc>,
}

impl GraphQlFeed {
    pub fn new(client: Client, url: Url, collective_id: u64, date_from: DateTime<Utc>) -> Self {
        Self {
            client,
            url,
            collective_id,
            date_from,
        }
    }

    fn request_body(&self, now: DateTime<Utc>) -> TransactionsRequest<'static> {
        TransactionsRequest {
            operation_name: "Transactions",
            variables: TransactionsVariables {
                collective_id: self.collective_id,
                date_from: self.date_from.to_rfc3339_opts(SecondsFormat::Millis, true),
                date_to: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            },
            query: TRANSACTIONS_QUERY,
        }
    }
}

impl TransactionFeed for GraphQlFeed {
    async fn fetch(&self) -> Result<Vec<TransactionRecord>, FetchError> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(&self.request_body(Utc::now()))
            .send()
            .await?;
        let body = success_body(resp).await?;
        let records = parse_graphql(&body)?;
        debug!("Fetched {} transactions from GraphQL feed", records.len());
        Ok(records)
    }
}

/// Decode a GraphQL `allTransactions` response into records, in feed order.
pub fn parse_graphql(body: &[u8]) -> Result<Vec<TransactionRecord>, FetchError> {
    let resp: GraphQlResponse = serde_json::from_slice(body)?;
    if !resp.errors.is_empty() {
        let messages: Vec<String> = resp.errors.into_iter().map(|e| e.message).collect();
        return Err(FetchError::GraphQl(messages.join("; ")));
    }
    let data = resp
        .data
        .ok_or_else(|| FetchError::GraphQl("response has no data".to_string()))?;

    data.all_transactions
        .into_iter()
        .map(|tx| {
            let timestamp =
                parse_timestamp(&tx.created_at).ok_or_else(|| FetchError::Timestamp {
                    value: tx.created_at.clone(),
                })?;
            let from = collective_name(tx.from_collective);
            let description = match tx.description {
                Some(d) if !d.trim().is_empty() => d,
                _ => format!("donation from {from}"),
            };
            Ok(TransactionRecord {
                id: Some(tx.id),
                timestamp,
                description,
                amount: Decimal::new(tx.amount, 2),
                currency: tx.currency,
                counterparty: collective_name(tx.collective),
            })
        })
        .collect()
}

// ── dispatch ───────────────────────────────────────────────────────

/// The configured feed variant.
#[derive(Debug, Clone)]
pub enum Feed {
    Csv(CsvFeed),
    GraphQl(GraphQlFeed),
}

impl Feed {
    pub fn from_config(config: &Config, client: Client) -> Self {
        match config.feed {
            FeedKind::RestCsv => Feed::Csv(CsvFeed::new(client, config.csv_url.clone())),
            FeedKind::GraphQl => Feed::GraphQl(GraphQlFeed::new(
                client,
                config.graphql_url.clone(),
                config.collective_id,
                config.start_date,
            )),
        }
    }
}

impl TransactionFeed for Feed {
    async fn fetch(&self) -> Result<Vec<TransactionRecord>, FetchError> {
        match self {
            Feed::Csv(feed) => feed.fetch().await,
            Feed::GraphQl(feed) => feed.fetch().await,
        }
    }
}
