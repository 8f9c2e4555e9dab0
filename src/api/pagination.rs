use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Cursor pagination arguments, relay style.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageArgs {
    pub first: Option<usize>,
    pub after: Option<String>,
    pub last: Option<usize>,
    pub before: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
}

#[derive(Debug, Serialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub nodes: Vec<T>,
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    pub total_count: usize,
}

fn encode_cursor(index: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("cursor:{index}"))
}

fn decode_cursor(cursor: &str) -> Option<usize> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let s = String::from_utf8(bytes).ok()?;
    s.strip_prefix("cursor:")?.parse().ok()
}

const DEFAULT_PAGE: usize = 50;

/// Slice an already-ordered result set by opaque offset cursors.
pub fn paginate<T: Clone + Serialize>(items: Vec<T>, args: &PageArgs) -> Page<T> {
    let total_count = items.len();

    // Window after/before.
    let mut start = match args.after.as_deref().and_then(decode_cursor) {
        Some(idx) => (idx + 1).min(total_count),
        None => 0,
    };
    let mut end = match args.before.as_deref().and_then(decode_cursor) {
        Some(idx) => idx.min(total_count),
        None => total_count,
    };
    if start > end {
        start = end;
    }

    // first/last narrow the window from the respective side.
    if let Some(first) = args.first {
        end = end.min(start + first);
    }
    if let Some(last) = args.last {
        start = start.max(end.saturating_sub(last));
    }
    if args.first.is_none() && args.last.is_none() {
        end = end.min(start + DEFAULT_PAGE);
    }

    let edges: Vec<Edge<T>> = items[start..end]
        .iter()
        .enumerate()
        .map(|(offset, node)| Edge {
            node: node.clone(),
            cursor: encode_cursor(start + offset),
        })
        .collect();

    Page {
        page_info: PageInfo {
            has_next_page: end < total_count,
            has_previous_page: start > 0,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        },
        nodes: items[start..end].to_vec(),
        edges,
        total_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_pagination_walks_the_set() {
        let items: Vec<i32> = (0..10).collect();
        let page = paginate(items.clone(), &PageArgs {
            first: Some(4),
            ..Default::default()
        });
        assert_eq!(page.nodes, vec![0, 1, 2, 3]);
        assert!(page.page_info.has_next_page);
        assert!(!page.page_info.has_previous_page);
        assert_eq!(page.total_count, 10);

        let next = paginate(items, &PageArgs {
            first: Some(4),
            after: page.page_info.end_cursor,
            ..Default::default()
        });
        assert_eq!(next.nodes, vec![4, 5, 6, 7]);
        assert!(next.page_info.has_previous_page);
    }

    #[test]
    fn backward_pagination() {
        let items: Vec<i32> = (0..10).collect();
        let page = paginate(items, &PageArgs {
            last: Some(3),
            ..Default::default()
        });
        assert_eq!(page.nodes, vec![7, 8, 9]);
        assert!(!page.page_info.has_next_page);
        assert!(page.page_info.has_previous_page);
    }
}
