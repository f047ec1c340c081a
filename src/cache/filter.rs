//! Client-side query semantics applied to cached records.
//!
//! When a list has to be served from the local store, the same search,
//! category, sort and pagination parameters the server would have honoured
//! are applied here so callers get an identically shaped page.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::traits::Cacheable;

/// Category filter value meaning "every category".
pub const CATEGORY_WILDCARD: &str = "all";

/// Page size used when the caller doesn't ask for one.
pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

impl SortOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortOrder::Asc => "asc",
      SortOrder::Desc => "desc",
    }
  }
}

/// List query parameters, mirroring the server's query string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
  pub search: Option<String>,
  pub category: Option<String>,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
  /// 1-based
  pub page: Option<u32>,
  pub per_page: Option<u32>,
}

impl ListParams {
  fn search_term(&self) -> Option<String> {
    self
      .search
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_lowercase)
  }

  fn category_filter(&self) -> Option<&str> {
    self
      .category
      .as_deref()
      .filter(|c| !c.is_empty() && *c != CATEGORY_WILDCARD)
  }

  /// True when the query returns the unfiltered list, so a successful fetch
  /// counts as a refresh of the whole entity type.
  pub fn is_full_fetch(&self) -> bool {
    self.search_term().is_none() && self.category_filter().is_none()
  }

  /// Query string pairs for the server, skipping unset parameters.
  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(search) = &self.search {
      pairs.push(("search", search.clone()));
    }
    if let Some(category) = &self.category {
      pairs.push(("category", category.clone()));
    }
    if let Some(sort_by) = &self.sort_by {
      pairs.push(("sort_by", sort_by.clone()));
    }
    if let Some(order) = self.sort_order {
      pairs.push(("sort_order", order.as_str().to_string()));
    }
    if let Some(page) = self.page {
      pairs.push(("page", page.to_string()));
    }
    if let Some(per_page) = self.per_page {
      pairs.push(("per_page", per_page.to_string()));
    }
    pairs
  }
}

/// Pagination block of the server's list envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
  pub current_page: u32,
  /// Total number of pages
  pub last_page: u32,
  pub per_page: u32,
  pub total: u64,
}

/// Canonical list shape: one page of records plus pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub data: Vec<T>,
  pub pagination: Pagination,
}

impl<T> Page<T> {
  /// Present a flat list as a single page holding everything.
  pub fn from_list(data: Vec<T>) -> Self {
    let total = data.len();
    Self {
      pagination: Pagination {
        current_page: 1,
        last_page: 1,
        per_page: total as u32,
        total: total as u64,
      },
      data,
    }
  }
}

impl<T> Default for Page<T> {
  fn default() -> Self {
    Self::from_list(Vec::new())
  }
}

/// Filter, sort and paginate `records` the way the server would.
pub fn apply<T: Cacheable>(records: Vec<T>, params: &ListParams) -> Page<T> {
  let mut records = records;

  if let Some(term) = params.search_term() {
    records.retain(|r| matches_search(r, &term));
  }

  if let Some(category) = params.category_filter() {
    records.retain(|r| r.category_key().as_deref() == Some(category));
  }

  if let Some(field) = params.sort_by.as_deref().filter(|f| !f.is_empty()) {
    records = sort_records(records, field, params.sort_order.unwrap_or_default());
  }

  paginate(records, params.page, params.per_page)
}

/// Case-insensitive substring match over the record's search fields.
/// `term` must already be lowercase.
pub fn matches_search<T: Cacheable>(record: &T, term: &str) -> bool {
  record
    .search_fields()
    .iter()
    .any(|field| field.to_lowercase().contains(term))
}

fn sort_records<T: Cacheable>(records: Vec<T>, field: &str, order: SortOrder) -> Vec<T> {
  let mut keyed: Vec<(SortKey, T)> = records
    .into_iter()
    .map(|r| (SortKey::of(&r, field), r))
    .collect();

  // sort_by is stable, so equal keys keep store order in both directions
  keyed.sort_by(|(a, _), (b, _)| match order {
    SortOrder::Asc => a.cmp(b),
    SortOrder::Desc => b.cmp(a),
  });

  keyed.into_iter().map(|(_, r)| r).collect()
}

fn paginate<T>(records: Vec<T>, page: Option<u32>, per_page: Option<u32>) -> Page<T> {
  let page = page.unwrap_or(1).max(1);
  let per_page = per_page.filter(|p| *p > 0).unwrap_or(DEFAULT_PER_PAGE);
  let total = records.len();
  let last_page = total.div_ceil(per_page as usize) as u32;

  let start = (page as usize - 1).saturating_mul(per_page as usize);
  let data = records
    .into_iter()
    .skip(start)
    .take(per_page as usize)
    .collect();

  Page {
    data,
    pagination: Pagination {
      current_page: page,
      last_page,
      per_page,
      total: total as u64,
    },
  }
}

/// Comparable projection of one field of a record.
///
/// Missing and null fields compare as the number zero. Numbers order before
/// text; text compares case-insensitively.
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
  Number(f64),
  Text(String),
}

impl SortKey {
  fn of<T: Cacheable>(record: &T, field: &str) -> Self {
    let value = serde_json::to_value(record)
      .ok()
      .and_then(|v| v.get(field).cloned())
      .unwrap_or(Value::Null);

    match value {
      Value::Number(n) => SortKey::Number(n.as_f64().unwrap_or(0.0)),
      Value::String(s) => SortKey::Text(s.to_lowercase()),
      Value::Bool(b) => SortKey::Number(if b { 1.0 } else { 0.0 }),
      Value::Null => SortKey::Number(0.0),
      other => SortKey::Text(other.to_string().to_lowercase()),
    }
  }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for SortKey {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
      (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
      (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
      (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pos::types::Product;

  fn products(n: i64) -> Vec<Product> {
    (1..=n)
      .map(|id| Product::new(id, &format!("Item {:02}", id)))
      .collect()
  }

  fn ids(page: &Page<Product>) -> Vec<i64> {
    page.data.iter().map(|p| p.id).collect()
  }

  #[test]
  fn test_pagination_boundary() {
    let params = ListParams {
      page: Some(3),
      per_page: Some(10),
      ..ListParams::default()
    };

    let page = apply(products(25), &params);

    assert_eq!(page.data.len(), 5);
    assert_eq!(page.pagination.last_page, 3);
    assert_eq!(page.pagination.total, 25);
    assert_eq!(page.pagination.current_page, 3);
    assert_eq!(ids(&page), vec![21, 22, 23, 24, 25]);
  }

  #[test]
  fn test_page_past_end_is_empty() {
    let params = ListParams {
      page: Some(9),
      per_page: Some(10),
      ..ListParams::default()
    };

    let page = apply(products(25), &params);

    assert!(page.data.is_empty());
    assert_eq!(page.pagination.total, 25);
  }

  #[test]
  fn test_defaults_to_first_page_of_twenty() {
    let page = apply(products(25), &ListParams::default());

    assert_eq!(page.data.len(), 20);
    assert_eq!(page.pagination.per_page, DEFAULT_PER_PAGE);
    assert_eq!(page.pagination.current_page, 1);
    assert_eq!(page.pagination.last_page, 2);
  }

  #[test]
  fn test_empty_list_has_zero_pages() {
    let page = apply(Vec::<Product>::new(), &ListParams::default());
    assert_eq!(page.pagination.last_page, 0);
    assert_eq!(page.pagination.total, 0);
  }

  #[test]
  fn test_search_matches_name_or_sku_case_insensitively() {
    let mut records = vec![
      Product::new(1, "Kopi Hitam"),
      Product::new(2, "Teh Manis"),
      Product::new(3, "Roti Bakar"),
    ];
    records[2].sku = Some("KOPI-ROTI".to_string());

    let params = ListParams {
      search: Some("kopi".to_string()),
      ..ListParams::default()
    };

    assert_eq!(ids(&apply(records, &params)), vec![1, 3]);
  }

  #[test]
  fn test_category_filter_and_wildcard() {
    let mut records = products(4);
    records[0].category_id = Some(5);
    records[1].category_id = Some(6);
    records[2].category_id = Some(5);

    let only_five = ListParams {
      category: Some("5".to_string()),
      ..ListParams::default()
    };
    assert_eq!(ids(&apply(records.clone(), &only_five)), vec![1, 3]);

    let all = ListParams {
      category: Some(CATEGORY_WILDCARD.to_string()),
      ..ListParams::default()
    };
    assert_eq!(apply(records, &all).data.len(), 4);
  }

  #[test]
  fn test_sort_text_case_insensitive_both_directions() {
    let records = vec![
      Product::new(1, "banana"),
      Product::new(2, "Apple"),
      Product::new(3, "cherry"),
    ];

    let asc = ListParams {
      sort_by: Some("name".to_string()),
      sort_order: Some(SortOrder::Asc),
      ..ListParams::default()
    };
    assert_eq!(ids(&apply(records.clone(), &asc)), vec![2, 1, 3]);

    let desc = ListParams {
      sort_order: Some(SortOrder::Desc),
      ..asc
    };
    assert_eq!(ids(&apply(records, &desc)), vec![3, 1, 2]);
  }

  #[test]
  fn test_sort_is_stable_and_missing_values_are_zero() {
    let mut records = products(4);
    records[0].price = Some(10.0);
    records[1].price = None;
    records[2].price = Some(10.0);
    records[3].price = Some(-1.0);

    let params = ListParams {
      sort_by: Some("price".to_string()),
      ..ListParams::default()
    };

    assert_eq!(ids(&apply(records, &params)), vec![4, 2, 1, 3]);
  }

  #[test]
  fn test_full_fetch_detection() {
    assert!(ListParams::default().is_full_fetch());
    assert!(ListParams {
      category: Some("all".to_string()),
      search: Some("  ".to_string()),
      page: Some(2),
      ..ListParams::default()
    }
    .is_full_fetch());
    assert!(!ListParams {
      search: Some("kopi".to_string()),
      ..ListParams::default()
    }
    .is_full_fetch());
  }

  #[test]
  fn test_query_pairs_skip_unset() {
    let params = ListParams {
      search: Some("teh".to_string()),
      sort_order: Some(SortOrder::Desc),
      per_page: Some(100),
      ..ListParams::default()
    };

    assert_eq!(
      params.query_pairs(),
      vec![
        ("search", "teh".to_string()),
        ("sort_order", "desc".to_string()),
        ("per_page", "100".to_string()),
      ]
    );
  }
}
