//! Product records owned by the stock ledger.

use chrono::{DateTime, Utc};
use common::{Money, ProductId, ProductResponse};
use serde::{Deserialize, Serialize};

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// A catalog entry and its tracked stock.
///
/// `active == false` hides the product from every read path; the record
/// stays addressable by id for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock_quantity: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.active && self.stock_quantity >= quantity
    }

    /// Case-insensitive match on name or description.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.name.to_lowercase().contains(&term) || self.description.to_lowercase().contains(&term)
    }
}

impl From<&Product> for ProductResponse {
    fn from(p: &Product) -> Self {
        ProductResponse {
            id: p.id,
            name: p.name.clone(),
            description: p.description.clone(),
            price_cents: p.price,
            stock_quantity: p.stock_quantity,
            active: p.active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        ProductResponse::from(&p)
    }
}

/// Body of `POST /products`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub stock_quantity: i64,
}

impl NewProduct {
    /// Returns one message per invalid field.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        validate_name(&self.name, &mut errors);
        validate_description(&self.description, &mut errors);
        validate_price(self.price_cents, &mut errors);
        validate_stock(self.stock_quantity, &mut errors);
        errors
    }
}

/// Body of `PUT /products/{id}`. Only the provided fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub stock_quantity: Option<i64>,
}

impl ProductUpdate {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            validate_name(name, &mut errors);
        }
        if let Some(description) = &self.description {
            validate_description(description, &mut errors);
        }
        if let Some(price) = self.price_cents {
            validate_price(price, &mut errors);
        }
        if let Some(stock) = self.stock_quantity {
            validate_stock(stock, &mut errors);
        }
        errors
    }

    /// Applies the provided fields to `product`. Call `validate` first.
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(price) = self.price_cents {
            product.price = Money::from_cents(price);
        }
        if let Some(stock) = self.stock_quantity {
            product.stock_quantity = clamp_stock(stock);
        }
    }
}

/// Converts an already validated stock value.
pub(crate) fn clamp_stock(stock: i64) -> u32 {
    u32::try_from(stock.max(0)).unwrap_or(u32::MAX)
}

fn validate_name(name: &str, errors: &mut Vec<String>) {
    let name = name.trim();
    if name.is_empty() {
        errors.push("Name is required".to_string());
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(format!("Name must be at most {MAX_NAME_LEN} characters"));
    }
}

fn validate_description(description: &str, errors: &mut Vec<String>) {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        errors.push(format!(
            "Description must be at most {MAX_DESCRIPTION_LEN} characters"
        ));
    }
}

fn validate_price(price_cents: i64, errors: &mut Vec<String>) {
    if price_cents < 0 {
        errors.push("Price must not be negative".to_string());
    }
}

fn validate_stock(stock: i64, errors: &mut Vec<String>) {
    if stock < 0 {
        errors.push("Stock quantity must not be negative".to_string());
    } else if stock > i64::from(i32::MAX) {
        errors.push("Stock quantity is too large".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        let now = Utc::now();
        Product {
            id: ProductId::new(1),
            name: "Mechanical Keyboard".into(),
            description: "Brown switches".into(),
            price: Money::from_cents(12_990),
            stock_quantity: 4,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn has_stock_for_respects_active_flag() {
        let mut p = product();
        assert!(p.has_stock_for(4));
        assert!(!p.has_stock_for(5));
        p.active = false;
        assert!(!p.has_stock_for(1));
    }

    #[test]
    fn matches_is_case_insensitive() {
        let p = product();
        assert!(p.matches("keyboard"));
        assert!(p.matches("BROWN"));
        assert!(!p.matches("mouse"));
    }

    #[test]
    fn response_preserves_fields() {
        let p = product();
        let dto = ProductResponse::from(&p);
        assert_eq!(dto.name, p.name);
        assert_eq!(dto.price_cents, p.price);
        assert_eq!(dto.stock_quantity, p.stock_quantity);
        assert_eq!(dto.active, p.active);
    }

    #[test]
    fn new_product_validation_collects_every_problem() {
        let input = NewProduct {
            name: "  ".into(),
            description: "x".repeat(MAX_DESCRIPTION_LEN + 1),
            price_cents: -1,
            stock_quantity: -5,
        };
        assert_eq!(input.validate().len(), 4);
    }

    #[test]
    fn valid_new_product() {
        let input = NewProduct {
            name: "Mouse".into(),
            description: String::new(),
            price_cents: 0,
            stock_quantity: 0,
        };
        assert!(input.validate().is_empty());
    }

    #[test]
    fn update_applies_only_provided_fields() {
        let mut p = product();
        let update = ProductUpdate {
            price_cents: Some(9_990),
            ..Default::default()
        };
        assert!(update.validate().is_empty());
        update.apply_to(&mut p);
        assert_eq!(p.price.cents(), 9_990);
        assert_eq!(p.name, "Mechanical Keyboard");
        assert_eq!(p.stock_quantity, 4);
    }

    #[test]
    fn update_rejects_negative_stock() {
        let update = ProductUpdate {
            stock_quantity: Some(-1),
            ..Default::default()
        };
        assert_eq!(update.validate().len(), 1);
    }
}
