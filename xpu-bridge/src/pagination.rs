//! Opaque continuation tokens shared by all List operations. A token is an
//! uuid mapped to the offset where the next page starts; it is consumed the
//! moment a List presents it, which keeps the map bounded by the number of
//! outstanding cursors.

use crate::error::OpError;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 250;

#[derive(Clone, Debug, Default)]
pub struct Pager {
    tokens: Arc<Mutex<HashMap<String, usize>>>,
}

impl Pager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the page size and starting offset of a List request. The
    /// page size is defaulted and capped; an unknown token is an error.
    pub fn extract(&self, page_size: i32, page_token: &str) -> Result<(usize, usize), OpError> {
        if page_size < 0 {
            return Err(OpError::invalid(format!(
                "negative page size {}",
                page_size
            )));
        }
        let size = match page_size as usize {
            0 => DEFAULT_PAGE_SIZE,
            size if size > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
            size => size,
        };
        let offset = if page_token.is_empty() {
            0
        } else {
            match self.tokens.lock().remove(page_token) {
                Some(offset) => offset,
                None => {
                    return Err(OpError::UnknownPageToken {
                        token: page_token.to_string(),
                    })
                }
            }
        };
        Ok((size, offset))
    }

    /// Slice one page out of the full ordered result set. Returns the page
    /// and the continuation token when the set was truncated.
    pub fn limit<T>(&self, items: Vec<T>, offset: usize, size: usize) -> (Vec<T>, String) {
        let total = items.len();
        let page: Vec<T> = items.into_iter().skip(offset).take(size).collect();
        if offset + size < total {
            (page, self.allocate(offset + size))
        } else {
            (page, String::new())
        }
    }

    fn allocate(&self, offset: usize) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.lock().insert(token.clone(), offset);
        token
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.tokens.lock().len()
    }
}
