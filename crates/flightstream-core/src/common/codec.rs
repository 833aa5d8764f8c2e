//! Conversion between domain values and log records.
//!
//! Every record written by the pipeline is keyed by its search id, which is
//! what lets a tailer seek to the results of a single search. Payloads are
//! JSON:
//!
//! - requests log: `{"search_id", "from", "to", "date"}`
//! - results log: a serialized [`SearchResult`]

use crate::{
    Error, Result,
    log::{LogEntry, Record},
    types::{SearchRequest, SearchResult},
};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

fn encode<T: Serialize>(key: &[u8], value: &T) -> Result<Record> {
    let payload = serde_json::to_vec(value).map_err(|e| Error::Decode {
        reason: format!("failed to encode payload: {e}"),
    })?;
    Ok(Record {
        key: Bytes::copy_from_slice(key),
        value: Bytes::from(payload),
    })
}

fn decode<T: DeserializeOwned>(entry: &LogEntry) -> Result<T> {
    serde_json::from_slice(&entry.value).map_err(|e| Error::Decode {
        reason: format!("entry {}: {e}", entry.id),
    })
}

pub fn encode_request(request: &SearchRequest) -> Result<Record> {
    encode(request.search_id.as_bytes(), request)
}

pub fn decode_request(entry: &LogEntry) -> Result<SearchRequest> {
    decode(entry)
}

pub fn encode_result(result: &SearchResult) -> Result<Record> {
    encode(result.search_id.as_bytes(), result)
}

pub fn decode_result(entry: &LogEntry) -> Result<SearchResult> {
    decode(entry)
}
