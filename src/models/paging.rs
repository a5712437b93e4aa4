//! Paging bookkeeping shared by all paginated procedures.

use serde::{Deserialize, Serialize};

/// Logical names of the trailing parameters of a paginated procedure.
pub const PAGE_INDEX_PARAMETER: &str = "PageIndex";
pub const PAGE_SIZE_PARAMETER: &str = "PageSize";
pub const TOTAL_RECORDS_PARAMETER: &str = "TotalRecords";

/// Zero-based page request plus the total reported by the last execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PagingInfo {
    pub page_index: i32,
    pub page_size: i32,
    pub total_records: i32,
}

impl PagingInfo {
    pub fn new(page_index: i32, page_size: i32) -> Self {
        Self {
            page_index,
            page_size,
            total_records: 0,
        }
    }

    /// Number of pages for the recorded total.
    pub fn page_count(&self) -> i32 {
        calc_page_count(self.total_records, self.page_size)
    }
}

/// 0 when either side is 0, otherwise the ceiling of `total / page_size`.
pub fn calc_page_count(total_records: i32, page_size: i32) -> i32 {
    if page_size <= 0 || total_records <= 0 {
        return 0;
    }
    let (total, size) = (i64::from(total_records), i64::from(page_size));
    ((total + size - 1) / size) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count() {
        assert_eq!(calc_page_count(57, 10), 6);
        assert_eq!(calc_page_count(60, 10), 6);
        assert_eq!(calc_page_count(1, 10), 1);
        assert_eq!(calc_page_count(0, 10), 0);
        assert_eq!(calc_page_count(57, 0), 0);
    }

    #[test]
    fn test_paging_info_defaults() {
        let paging = PagingInfo::new(7, 10);
        assert_eq!(paging.total_records, 0);
        assert_eq!(paging.page_count(), 0);
    }
}
