//! Serde-deserializable types matching POS API responses.
//!
//! The server answers list endpoints in more than one shape: a bare array,
//! an envelope with `data` and `pagination`, or an envelope whose `data` is
//! itself a paginated envelope. Everything is normalized into a [`Page`]
//! before it reaches the cache.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::cache::{Page, Pagination};

// ============================================================================
// List envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPagination {
  #[serde(default, deserialize_with = "lenient_u64")]
  pub current_page: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub last_page: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub per_page: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiData<T> {
  /// Bare array
  List(Vec<T>),
  /// `{ success, data: [...], pagination }`
  Page {
    data: Vec<T>,
    pagination: Option<ApiPagination>,
    success: Option<bool>,
    message: Option<String>,
  },
  /// `{ success, data: { data: [...], pagination } }`
  Nested {
    data: Box<ApiData<T>>,
    success: Option<bool>,
    message: Option<String>,
  },
}

impl<T> ApiData<T> {
  /// Normalize into a page, honouring an explicit `success: false`.
  pub fn into_page(self) -> Result<Page<T>> {
    match self {
      ApiData::List(data) => Ok(Page::from_list(data)),
      ApiData::Page {
        data,
        pagination,
        success,
        message,
      } => {
        check_success(success, message)?;
        Ok(match pagination {
          Some(p) => p.into_page(data),
          None => Page::from_list(data),
        })
      }
      ApiData::Nested {
        data,
        success,
        message,
      } => {
        check_success(success, message)?;
        data.into_page()
      }
    }
  }
}

impl ApiPagination {
  fn into_page<T>(self, data: Vec<T>) -> Page<T> {
    let count = data.len() as u64;
    let per_page = self.per_page.unwrap_or(count);
    let total = self.total.unwrap_or(count);
    let last_page = self.last_page.unwrap_or_else(|| {
      if per_page == 0 {
        1
      } else {
        total.div_ceil(per_page)
      }
    });

    Page {
      data,
      pagination: Pagination {
        current_page: self.current_page.unwrap_or(1) as u32,
        last_page: last_page as u32,
        per_page: per_page as u32,
        total,
      },
    }
  }
}

/// Response body of a single-record endpoint such as order creation.
#[derive(Debug, Deserialize)]
pub struct ApiRecordResponse {
  pub success: Option<bool>,
  pub message: Option<String>,
  pub data: Option<Value>,
}

impl ApiRecordResponse {
  pub fn into_data(self) -> Result<Value> {
    check_success(self.success, self.message)?;
    Ok(self.data.unwrap_or(Value::Null))
  }
}

fn check_success(success: Option<bool>, message: Option<String>) -> Result<()> {
  if success == Some(false) {
    return Err(eyre!(
      "Server reported failure: {}",
      message.unwrap_or_else(|| "no message".to_string())
    ));
  }
  Ok(())
}

// ============================================================================
// Lenient scalars
// ============================================================================

// Decimal columns arrive as strings ("5000.00") from some endpoints and as
// numbers from others.

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
  Number(serde_json::Number),
  String(String),
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<NumberOrString>, D::Error>
where
  D: Deserializer<'de>,
{
  Option::<NumberOrString>::deserialize(deserializer)
}

pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match lenient_number(deserializer)? {
    Some(NumberOrString::Number(n)) => n.as_f64(),
    Some(NumberOrString::String(s)) => s.trim().parse().ok(),
    None => None,
  })
}

pub fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match lenient_number(deserializer)? {
    Some(NumberOrString::Number(n)) => n.as_i64(),
    Some(NumberOrString::String(s)) => s.trim().parse().ok(),
    None => None,
  })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match lenient_number(deserializer)? {
    Some(NumberOrString::Number(n)) => n.as_u64(),
    Some(NumberOrString::String(s)) => s.trim().parse().ok(),
    None => None,
  })
}
