use serde::{Deserialize, Serialize};

/// One page of a paginated scheduler listing.
///
/// `total` is the number of records the scheduler reports for the whole
/// query, not for this page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new", alias = "List")]
    pub data: Vec<T>,
    #[serde(default)]
    pub total: i64,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
        }
    }
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64) -> Self {
        Self { data, total }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
