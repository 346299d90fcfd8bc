//! sled-backed storage for requests and the token index.
//!
//! Key layout:
//! - `request/<id>`  -> CBOR [`ApprovableRequest`]
//! - `token/<token>` -> CBOR [`TokenRef`]
//! - `sequence/<prefix>` -> big-endian u64 counter
//!
//! Every mutation runs inside a sled transaction over the request record and
//! the token index, so a line's flag and the parent state are committed
//! together. sled retries the closure on conflict; the closure must therefore
//! be free of side effects beyond the transactional tree.
use super::error::ApprovalError;
use super::request::ApprovableRequest;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::collections::BTreeSet;
use std::sync::Arc;

const REQUEST_PREFIX: &str = "request/";
const TOKEN_PREFIX: &str = "token/";
const SEQUENCE_PREFIX: &str = "sequence/";

/// Where a token points.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TokenRef {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub line_id: String,
}

type TxResult<T> = Result<T, ConflictableTransactionError<ApprovalError>>;

fn abort<T>(err: ApprovalError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn request_key(id: &str) -> String {
    format!("{REQUEST_PREFIX}{id}")
}

fn token_key(token: &str) -> String {
    format!("{TOKEN_PREFIX}{token}")
}

fn tokens_of(request: &ApprovableRequest) -> BTreeSet<String> {
    request.lines.iter().map(|l| l.token.clone()).collect()
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ApprovalError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, ApprovalError> {
    Ok(minicbor::decode(bytes)?)
}

fn unwrap_tx<T>(res: Result<T, TransactionError<ApprovalError>>) -> Result<T, ApprovalError> {
    match res {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(err.into()),
    }
}

fn load_tx(tx: &TransactionalTree, id: &str) -> TxResult<ApprovableRequest> {
    match tx.get(request_key(id).as_bytes())? {
        Some(raw) => decode(&raw).or_else(abort),
        None => abort(ApprovalError::NotFound(id.to_string())),
    }
}

// write the record and bring the token index in line with its lines
fn save_tx(
    tx: &TransactionalTree,
    request: &ApprovableRequest,
    stale: &BTreeSet<String>,
) -> TxResult<()> {
    let live = tokens_of(request);
    for token in stale.difference(&live) {
        tx.remove(token_key(token).as_bytes())?;
    }
    for line in &request.lines {
        let entry = TokenRef {
            request_id: request.id.clone(),
            line_id: line.id.clone(),
        };
        let bytes = encode(&entry).or_else(abort)?;
        tx.insert(token_key(&line.token).as_bytes(), bytes)?;
    }
    let bytes = encode(request).or_else(abort)?;
    tx.insert(request_key(&request.id).as_bytes(), bytes)?;
    Ok(())
}

#[derive(Clone)]
pub struct RequestStore {
    instance: Arc<sled::Db>,
}

impl RequestStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    /// Allocate the next human reference for `prefix`, e.g. `APR/00007`.
    pub fn next_reference(&self, prefix: &str) -> Result<String, ApprovalError> {
        let key = format!("{SEQUENCE_PREFIX}{prefix}");
        let next = self
            .instance
            .update_and_fetch(key.as_bytes(), |old| {
                let current = old
                    .and_then(|b| <[u8; 8]>::try_from(b).ok())
                    .map(u64::from_be_bytes)
                    .unwrap_or(0);
                Some((current + 1).to_be_bytes().to_vec())
            })?
            .and_then(|b| <[u8; 8]>::try_from(b.as_ref()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(1);
        Ok(format!("{prefix}/{next:05}"))
    }

    /// Load a request from the database
    pub fn load(&self, id: &str) -> Result<ApprovableRequest, ApprovalError> {
        match self.instance.get(request_key(id).as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(ApprovalError::NotFound(id.to_string())),
        }
    }

    /// Resolve a token to its request and line without mutating anything.
    pub fn find_token(&self, token: &str) -> Result<Option<TokenRef>, ApprovalError> {
        match self.instance.get(token_key(token).as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn insert(&self, request: &ApprovableRequest) -> Result<(), ApprovalError> {
        let res = self.instance.transaction(|tx| {
            if tx.get(request_key(&request.id).as_bytes())?.is_some() {
                return abort(ApprovalError::Internal(anyhow::anyhow!(
                    "request {} already exists",
                    request.id
                )));
            }
            save_tx(tx, request, &BTreeSet::new())
        });
        unwrap_tx(res)
    }

    /// Transactional read-modify-write of one request.
    ///
    /// `f` may run more than once if another writer races this one; only the
    /// result of the committed attempt is returned.
    pub fn update<T, F>(&self, id: &str, f: F) -> Result<T, ApprovalError>
    where
        F: Fn(&mut ApprovableRequest) -> Result<T, ApprovalError>,
    {
        let res = self.instance.transaction(|tx| {
            let mut request = load_tx(tx, id)?;
            let before = tokens_of(&request);
            let out = f(&mut request).or_else(abort)?;
            save_tx(tx, &request, &before)?;
            Ok(out)
        });
        unwrap_tx(res)
    }

    /// Like [`RequestStore::update`] but addressed by action token. The token
    /// is resolved inside the transaction, so a token invalidated by a
    /// concurrent writer is seen as unknown. `f` receives the line id.
    pub fn update_by_token<T, F>(&self, token: &str, f: F) -> Result<T, ApprovalError>
    where
        F: Fn(&mut ApprovableRequest, &str) -> Result<T, ApprovalError>,
    {
        let res = self.instance.transaction(|tx| {
            let entry: TokenRef = match tx.get(token_key(token).as_bytes())? {
                Some(raw) => decode(&raw).or_else(abort)?,
                None => return abort(ApprovalError::InvalidToken),
            };
            let mut request = match load_tx(tx, &entry.request_id) {
                Ok(request) => request,
                Err(ConflictableTransactionError::Abort(ApprovalError::NotFound(_))) => {
                    return abort(ApprovalError::InvalidToken);
                }
                Err(other) => return Err(other),
            };
            if request.line(&entry.line_id).map(|l| l.token.as_str()) != Some(token) {
                return abort(ApprovalError::InvalidToken);
            }
            let before = tokens_of(&request);
            let out = f(&mut request, &entry.line_id).or_else(abort)?;
            save_tx(tx, &request, &before)?;
            Ok(out)
        });
        unwrap_tx(res)
    }

    /// Remove a request together with its lines and token index entries.
    pub fn delete(&self, id: &str) -> Result<(), ApprovalError> {
        let res = self.instance.transaction(|tx| {
            let request = load_tx(tx, id)?;
            for token in tokens_of(&request) {
                tx.remove(token_key(&token).as_bytes())?;
            }
            tx.remove(request_key(id).as_bytes())?;
            Ok(())
        });
        unwrap_tx(res)
    }

    pub fn list(&self) -> Result<Vec<ApprovableRequest>, ApprovalError> {
        let mut out = vec![];
        for item in self.instance.scan_prefix(REQUEST_PREFIX.as_bytes()) {
            let (_, raw) = item?;
            out.push(decode(&raw)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{LineDraft, RequestState, Subject};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, RequestStore) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("store.db")).unwrap();
        (dir, RequestStore::new(Arc::new(db)))
    }

    fn request(id: &str) -> ApprovableRequest {
        let mut req = ApprovableRequest::new(
            id.into(),
            "APR/00001".into(),
            "alice".into(),
            Subject::General {
                title: "laptop".into(),
            },
        );
        req.push_line("line_a".into(), LineDraft::new("bob"));
        req
    }

    #[test]
    fn references_are_sequential_per_prefix() {
        let (_dir, store) = store();

        assert_eq!(store.next_reference("APR").unwrap(), "APR/00001");
        assert_eq!(store.next_reference("APR").unwrap(), "APR/00002");
        assert_eq!(store.next_reference("LA").unwrap(), "LA/00001");
    }

    #[test]
    fn tokens_are_indexed_and_reindexed() {
        let (_dir, store) = store();
        let req = request("req_1");
        let old = req.lines[0].token.clone();
        store.insert(&req).unwrap();

        let entry = store.find_token(&old).unwrap().unwrap();
        assert_eq!(entry.request_id, "req_1");
        assert_eq!(entry.line_id, "line_a");

        let new = store
            .update("req_1", |r| {
                r.lines[0].reissue();
                Ok(r.lines[0].token.clone())
            })
            .unwrap();

        assert!(store.find_token(&old).unwrap().is_none());
        assert!(store.find_token(&new).unwrap().is_some());
    }

    #[test]
    fn aborted_update_leaves_record_untouched() {
        let (_dir, store) = store();
        store.insert(&request("req_1")).unwrap();

        let res: Result<(), _> = store.update("req_1", |r| {
            r.state = RequestState::Submitted;
            Err(ApprovalError::InvalidToken)
        });

        assert!(matches!(res, Err(ApprovalError::InvalidToken)));
        assert_eq!(store.load("req_1").unwrap().state, RequestState::Draft);
    }

    #[test]
    fn unknown_token_is_invalid() {
        let (_dir, store) = store();
        let res: Result<(), _> = store.update_by_token("nope", |_, _| Ok(()));
        assert!(matches!(res, Err(ApprovalError::InvalidToken)));
    }

    #[test]
    fn delete_drops_token_entries() {
        let (_dir, store) = store();
        let req = request("req_1");
        let token = req.lines[0].token.clone();
        store.insert(&req).unwrap();

        store.delete("req_1").unwrap();

        assert!(matches!(store.load("req_1"), Err(ApprovalError::NotFound(_))));
        assert!(store.find_token(&token).unwrap().is_none());
    }
}
