use serde::Serialize;
use utoipa::ToSchema;

use crate::models::Post;

/// Fixed feed page size.
pub const PAGE_SIZE: usize = 10;

/// One page of an ordered result set plus the metadata feed clients need.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[aliases(PostPage = Page<Post>)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Slice an already-ordered result set into a fixed-size page.
///
/// Pages are 1-based. A missing or unparseable page number lands on page 1;
/// a number past the end clamps to the last valid page. An empty result set
/// still yields one (empty) page.
pub fn paginate<T: Clone>(items: &[T], requested: Option<usize>) -> Page<T> {
    let total_items = items.len();
    let total_pages = std::cmp::max(1, total_items.div_ceil(PAGE_SIZE));
    let page = requested.unwrap_or(1).clamp(1, total_pages);
    let start = (page - 1) * PAGE_SIZE;
    let end = std::cmp::min(start + PAGE_SIZE, total_items);
    Page {
        items: items[start..end].to_vec(),
        page,
        total_pages,
        total_items,
        has_next: page < total_pages,
        has_previous: page > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_fourteen_items_into_ten_and_four() {
        let items: Vec<u32> = (0..14).collect();
        let first = paginate(&items, Some(1));
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.total_pages, 2);
        assert!(first.has_next);
        assert!(!first.has_previous);

        let second = paginate(&items, Some(2));
        assert_eq!(second.items.len(), 4);
        assert!(!second.has_next);
        assert!(second.has_previous);
    }

    #[test]
    fn out_of_range_page_clamps_to_last() {
        let items: Vec<u32> = (0..14).collect();
        let page = paginate(&items, Some(99));
        assert_eq!(page.page, 2);
        assert_eq!(page.items.len(), 4);
    }

    #[test]
    fn zero_and_missing_land_on_first_page() {
        let items: Vec<u32> = (0..3).collect();
        assert_eq!(paginate(&items, Some(0)).page, 1);
        assert_eq!(paginate(&items, None).page, 1);
    }

    #[test]
    fn empty_result_is_one_empty_page() {
        let items: Vec<u32> = Vec::new();
        let page = paginate(&items, None);
        assert_eq!(page.total_pages, 1);
        assert!(page.items.is_empty());
        assert!(!page.has_next && !page.has_previous);
    }
}
