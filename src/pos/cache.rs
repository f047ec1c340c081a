//! Caching implementations for POS types.

use crate::cache::{BusinessId, Cacheable, EntityType};

use super::types::{Category, Customer, Product};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Product {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> EntityType {
    EntityType::Product
  }

  fn search_fields(&self) -> Vec<&str> {
    let mut fields = vec![self.name.as_str()];
    if let Some(sku) = &self.sku {
      fields.push(sku.as_str());
    }
    fields
  }

  fn category_key(&self) -> Option<String> {
    self.category_id.map(|id| id.to_string())
  }

  fn set_business_id(&mut self, business_id: BusinessId) {
    self.business_id = Some(business_id);
  }
}

impl Cacheable for Category {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> EntityType {
    EntityType::Category
  }

  fn search_fields(&self) -> Vec<&str> {
    vec![self.name.as_str()]
  }

  fn set_business_id(&mut self, business_id: BusinessId) {
    self.business_id = Some(business_id);
  }
}

impl Cacheable for Customer {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> EntityType {
    EntityType::Customer
  }

  fn search_fields(&self) -> Vec<&str> {
    [Some(self.name.as_str()), self.phone.as_deref(), self.email.as_deref()]
      .into_iter()
      .flatten()
      .collect()
  }

  fn set_business_id(&mut self, business_id: BusinessId) {
    self.business_id = Some(business_id);
  }
}

// ============================================================================
// REST resources
// ============================================================================

/// Where an entity type lives on the POS API.
pub trait RemoteEntity: Cacheable {
  /// Path segments of the list endpoint
  const LIST_PATH: &'static [&'static str];

  /// Path segments of a dedicated search endpoint; the term is appended as
  /// the last segment. None searches through the list endpoint.
  const SEARCH_PATH: Option<&'static [&'static str]> = None;
}

impl RemoteEntity for Product {
  const LIST_PATH: &'static [&'static str] = &["v1", "products"];
}

impl RemoteEntity for Category {
  const LIST_PATH: &'static [&'static str] = &["v1", "categories"];
}

impl RemoteEntity for Customer {
  const LIST_PATH: &'static [&'static str] = &["v1", "customers"];
  const SEARCH_PATH: Option<&'static [&'static str]> = Some(&["v1", "customers", "search"]);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_product_search_fields_skip_missing_sku() {
    let mut product = Product::new(1, "Kopi Hitam");
    assert_eq!(product.search_fields(), vec!["Kopi Hitam"]);

    product.sku = Some("KP-01".to_string());
    assert_eq!(product.search_fields(), vec!["Kopi Hitam", "KP-01"]);
  }

  #[test]
  fn test_uncategorised_product_has_no_category_key() {
    let mut product = Product::new(1, "Kopi Hitam");
    assert_eq!(product.category_key(), None);

    product.category_id = Some(4);
    assert_eq!(product.category_key().as_deref(), Some("4"));
  }

  #[test]
  fn test_customer_search_fields() {
    let mut customer = Customer::new(3, "Siti");
    customer.email = Some("siti@example.com".to_string());
    assert_eq!(customer.search_fields(), vec!["Siti", "siti@example.com"]);
  }
}
