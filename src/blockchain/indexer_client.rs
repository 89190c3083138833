// src/blockchain/indexer_client.rs
//! HTTP ledger client.
//!
//! Talks to an indexer (history and transaction lookups) and a node
//! (`algod`: key-value objects, submission, pending status) over their REST
//! APIs using `reqwest`.
//!
//! Notes are normalised to canonical bytes here, so nothing above this
//! layer branches on how the backend encoded them.

use crate::blockchain::ledger::{
    Confirmation, LedgerReader, LedgerTransaction, LedgerWriter, SignedTransaction,
    TransactionFilter,
};
use crate::error::LedgerError;
use crate::utils::address::Address;
use crate::utils::serialization::NoteField;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const INDEXER_TOKEN_HEADER: &str = "X-Indexer-API-Token";
const ALGOD_TOKEN_HEADER: &str = "X-Algo-API-Token";

/// Connection settings for [`IndexerClient`].
#[derive(Debug, Clone)]
pub struct LedgerEndpoints {
    pub indexer_url: String,
    pub algod_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    /// Delay between pending-status polls (roughly one round).
    pub poll_interval: Duration,
}

/// REST client for the ledger service.
///
/// Cheap to clone; safe for concurrent reads (no client-side caching).
#[derive(Clone)]
pub struct IndexerClient {
    http: Client,
    endpoints: LedgerEndpoints,
}

#[derive(Deserialize)]
struct TransactionEnvelope {
    transaction: RawTransaction,
}

#[derive(Deserialize)]
struct TransactionPage {
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Deserialize)]
struct RawTransaction {
    id: String,
    sender: String,
    #[serde(default)]
    note: Option<NoteField>,
    #[serde(rename = "round-time", default)]
    round_time: u64,
    #[serde(rename = "confirmed-round", default)]
    confirmed_round: Option<u64>,
    #[serde(rename = "payment-transaction", default)]
    payment: Option<RawPayment>,
}

#[derive(Deserialize)]
struct RawPayment {
    receiver: String,
}

#[derive(Deserialize)]
struct RawObject {
    value: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Deserialize)]
struct PendingResponse {
    #[serde(rename = "confirmed-round", default)]
    confirmed_round: Option<u64>,
    #[serde(rename = "pool-error", default)]
    pool_error: String,
}

impl RawTransaction {
    fn into_ledger(self) -> Result<LedgerTransaction, LedgerError> {
        let sender: Address = self
            .sender
            .parse()
            .map_err(|e| LedgerError::Decode(format!("sender of {}: {}", self.id, e)))?;
        let receiver = match self.payment {
            Some(payment) => Some(
                payment
                    .receiver
                    .parse()
                    .map_err(|e| LedgerError::Decode(format!("receiver of {}: {}", self.id, e)))?,
            ),
            None => None,
        };
        // A note that is present but not decodable is treated as empty;
        // annotation decoding will skip it.
        let note = match self.note {
            Some(field) => field.into_bytes().unwrap_or_else(|| {
                warn!("Transaction {} has an undecodable note", self.id);
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(LedgerTransaction {
            id: self.id,
            sender,
            receiver,
            note,
            round_time: self.round_time,
            confirmed_round: self.confirmed_round,
        })
    }
}

impl IndexerClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns `LedgerError::Transport` if the HTTP client cannot be built.
    pub fn new(endpoints: LedgerEndpoints) -> Result<Self, LedgerError> {
        let http = Client::builder()
            .timeout(endpoints.request_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self { http, endpoints })
    }

    fn indexer(&self, segments: &[&str]) -> Result<RequestBuilder, LedgerError> {
        let url = endpoint(&self.endpoints.indexer_url, segments)?;
        Ok(self.authorize(self.http.get(url), INDEXER_TOKEN_HEADER))
    }

    fn algod_get(&self, segments: &[&str]) -> Result<RequestBuilder, LedgerError> {
        let url = endpoint(&self.endpoints.algod_url, segments)?;
        Ok(self.authorize(self.http.get(url), ALGOD_TOKEN_HEADER))
    }

    fn authorize(&self, request: RequestBuilder, header: &str) -> RequestBuilder {
        match &self.endpoints.api_token {
            Some(token) => request.header(header, token),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> Result<Response, LedgerError> {
        request.send().await.map_err(map_transport)
    }

    /// Reads a JSON body, mapping 404 to `None` and other failures to errors.
    async fn read_optional<T: DeserializeOwned>(
        response: Response,
    ) -> Result<Option<T>, LedgerError> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, LedgerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

/// Appends `segments` to `base`, percent-encoding each one so that
/// identifiers can never add path segments, a query or a fragment.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, LedgerError> {
    let mut url = Url::parse(base).map_err(|e| LedgerError::Transport(format!("{}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| LedgerError::Transport(format!("{} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn map_transport(error: reqwest::Error) -> LedgerError {
    if error.is_timeout() {
        LedgerError::Timeout
    } else {
        LedgerError::Transport(error.to_string())
    }
}

#[async_trait]
impl LedgerReader for IndexerClient {
    async fn lookup_transaction(&self, id: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        let response = Self::send(self.indexer(&["v2", "transactions", id])?).await?;
        match Self::read_optional::<TransactionEnvelope>(response).await? {
            Some(envelope) => envelope.transaction.into_ledger().map(Some),
            None => Ok(None),
        }
    }

    async fn lookup_object(
        &self,
        application_id: u64,
        name: &[u8],
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        let application = application_id.to_string();
        let request = self
            .algod_get(&["v2", "applications", &application, "box"])?
            .query(&[("name", format!("b64:{}", base64::encode(name)))]);
        let response = Self::send(request).await?;
        match Self::read_optional::<RawObject>(response).await? {
            Some(object) => base64::decode(object.value)
                .map(Some)
                .map_err(|e| LedgerError::Decode(format!("object value: {}", e))),
            None => Ok(None),
        }
    }

    async fn search_by_address(
        &self,
        address: &Address,
        filter: TransactionFilter,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let account = address.to_string();
        let mut request = self
            .indexer(&["v2", "accounts", &account, "transactions"])?
            .query(&[("limit", limit.to_string())]);
        if filter.sent_only {
            request = request.query(&[("address-role", "sender")]);
        }
        let page: TransactionPage = Self::read_json(Self::send(request).await?).await?;
        let mut transactions = page
            .transactions
            .into_iter()
            .map(RawTransaction::into_ledger)
            .collect::<Result<Vec<_>, _>>()?;
        transactions.retain(|tx| filter.matches(address, tx));
        transactions.sort_by(|a, b| b.round_time.cmp(&a.round_time));
        transactions.truncate(limit);
        Ok(transactions)
    }
}

#[async_trait]
impl LedgerWriter for IndexerClient {
    async fn submit(&self, signed: &SignedTransaction) -> Result<String, LedgerError> {
        let body = signed
            .encode()
            .map_err(|e| LedgerError::Rejected(format!("unencodable transaction: {}", e)))?;
        let url = endpoint(&self.endpoints.algod_url, &["v2", "transactions"])?;
        let request = self
            .authorize(self.http.post(url), ALGOD_TOKEN_HEADER)
            .header(reqwest::header::CONTENT_TYPE, "application/x-binary")
            .body(body);
        let response = Self::send(request).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(body));
        }
        let submitted: SubmitResponse = Self::read_json(response).await?;
        debug!("Submitted transaction {}", submitted.tx_id);
        Ok(submitted.tx_id)
    }

    async fn await_confirmation(
        &self,
        id: &str,
        max_rounds: u64,
    ) -> Result<Confirmation, LedgerError> {
        for attempt in 0..max_rounds {
            let request = self.algod_get(&["v2", "transactions", "pending", id])?;
            let response = Self::send(request).await?;
            if let Some(pending) = Self::read_optional::<PendingResponse>(response).await? {
                if !pending.pool_error.is_empty() {
                    return Err(LedgerError::Rejected(pending.pool_error));
                }
                if let Some(round) = pending.confirmed_round.filter(|r| *r > 0) {
                    return Ok(Confirmation {
                        id: id.to_string(),
                        confirmed_round: round,
                    });
                }
            }
            debug!("{} pending (attempt {}/{})", id, attempt + 1, max_rounds);
            tokio::time::sleep(self.endpoints.poll_interval).await;
        }
        Err(LedgerError::ConfirmationTimeout {
            id: id.to_string(),
            rounds: max_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_stay_inside_one_path_segment() {
        let url =
            endpoint("http://indexer:8980/", &["v2", "transactions", "x/../TX1?a#b"]).unwrap();
        assert_eq!(url.path(), "/v2/transactions/x%2F..%2FTX1%3Fa%23b");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn base_paths_are_kept() {
        let url = endpoint("https://node.example/algod", &["v2", "transactions"]).unwrap();
        assert_eq!(url.as_str(), "https://node.example/algod/v2/transactions");
        assert!(endpoint("not a url", &["v2"]).is_err());
    }
}
