//! Read-only HTTP(S) map backend, grounded on
//! `clbarnes-zarr3-rs/src/store/http.rs`'s `HttpStore`.
//!
//! Per spec §6, this backend is the reference "unlistable" map: it
//! supports `read`/`len`/`exists` and nothing that mutates or lists.

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};

use super::{not_found, Map};
use crate::error::{NczError, NczResult};

pub struct HttpMap {
    client: Client,
    base_url: Url,
}

impl HttpMap {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn url_for(&self, key: &str) -> NczResult<Url> {
        self.base_url
            .join(key)
            .map_err(|e| NczError::Internal(format!("bad url for key {key}: {e}")))
    }
}

impl Map for HttpMap {
    fn exists(&self, key: &str) -> NczResult<bool> {
        let url = self.url_for(key)?;
        let resp = self.client.head(url).send()?;
        Ok(resp.status().is_success())
    }

    fn len(&self, key: &str) -> NczResult<u64> {
        let url = self.url_for(key)?;
        let resp = self.client.head(url).send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(not_found(key));
        }
        resp.content_length().ok_or_else(|| not_found(key))
    }

    fn read(&self, key: &str, offset: u64, count: Option<u64>) -> NczResult<Vec<u8>> {
        let url = self.url_for(key)?;
        let mut req = self.client.get(url);
        if offset != 0 || count.is_some() {
            let range = match count {
                Some(c) => format!("bytes={}-{}", offset, offset + c - 1),
                None => format!("bytes={}-", offset),
            };
            req = req.header(reqwest::header::RANGE, range);
        }
        let resp = req.send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(not_found(key));
        }
        let bytes = resp.bytes()?;
        Ok(bytes.to_vec())
    }

    fn write(&self, _key: &str, _bytes: &[u8]) -> NczResult<()> {
        Err(NczError::Permission("CANTWRITE: http map is read-only".into()))
    }

    fn list(&self, _prefix: &str) -> NczResult<Vec<String>> {
        Err(NczError::Internal(
            "CANTLIST: http map cannot list; callers must probe well-known child keys".into(),
        ))
    }

    fn delete(&self, _key: &str) -> NczResult<()> {
        Err(NczError::Permission("CANTREMOVE: http map is read-only".into()))
    }

    fn truncate(&self) -> NczResult<()> {
        Err(NczError::Permission("CANTWRITE: http map is read-only".into()))
    }

    fn close(&self, _delete: bool) -> NczResult<()> {
        Ok(())
    }

    fn listable(&self) -> bool {
        false
    }
}
