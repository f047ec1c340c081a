use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::api_types::{lenient_f64, lenient_i64};

/// Product as listed for sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sku: Option<String>,
  #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
  pub category_id: Option<i64>,
  #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
  pub price: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
  pub stock: Option<f64>,
  #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
  pub business_id: Option<i64>,
  /// Every other field the server sent, kept verbatim
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Product category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
  pub business_id: Option<i64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Customer record used at checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
  pub business_id: Option<i64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[cfg(test)]
impl Product {
  pub fn new(id: i64, name: &str) -> Self {
    Self {
      id,
      name: name.to_string(),
      sku: None,
      category_id: None,
      price: None,
      stock: None,
      business_id: None,
      extra: Map::new(),
    }
  }
}

#[cfg(test)]
impl Category {
  pub fn new(id: i64, name: &str) -> Self {
    Self {
      id,
      name: name.to_string(),
      business_id: None,
      extra: Map::new(),
    }
  }
}

#[cfg(test)]
impl Customer {
  pub fn new(id: i64, name: &str) -> Self {
    Self {
      id,
      name: name.to_string(),
      phone: None,
      email: None,
      business_id: None,
      extra: Map::new(),
    }
  }
}
