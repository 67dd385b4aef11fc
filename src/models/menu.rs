use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Currency code substituted when the model returns an invalid or missing one.
pub const FALLBACK_CURRENCY: &str = "USD";

/// Structured menu data produced by a successful extraction.
///
/// The category tree is the payload; uncertain items and superfluous text are
/// the model's own triage of text it could not place or deliberately excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuExtraction {
    pub categories: Vec<MenuCategory>,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncertain_items: Vec<UncertainItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superfluous_text: Vec<SuperfluousText>,
}

impl MenuExtraction {
    /// A result is only usable when at least one category survived.
    pub fn has_categories(&self) -> bool {
        !self.categories.is_empty()
    }

    /// Total number of items across the whole tree, subcategories included.
    pub fn item_count(&self) -> usize {
        fn count(categories: &[MenuCategory]) -> usize {
            categories
                .iter()
                .map(|c| c.items.len() + count(&c.subcategories))
                .sum()
        }
        count(&self.categories)
    }

    /// Total number of categories across the whole tree.
    pub fn category_count(&self) -> usize {
        fn count(categories: &[MenuCategory]) -> usize {
            categories.iter().map(|c| 1 + count(&c.subcategories)).sum()
        }
        count(&self.categories)
    }
}

/// A menu section. Categories may nest (e.g. "Drinks" → "Red Wine").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuCategory {
    pub name: String,
    pub confidence: f64,
    #[serde(default)]
    pub items: Vec<MenuItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcategories: Vec<MenuCategory>,
}

/// A single dish or product.
///
/// Schema v1 requires a flat price. Schema v2 relaxes that: an item is valid
/// with a price, at least one variant, or a set-menu body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<ItemVariant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifier_groups: Vec<ModifierGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_info: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_menu: Option<SetMenu>,
}

/// Item kind discriminant (schema v2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemType {
    Standard,
    SetMenu,
}

/// A priced variation of an item (e.g. glass vs. bottle, small vs. large).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVariant {
    pub name: String,
    pub price: f64,
}

/// A group of optional add-ons or choices attached to an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierGroup {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub options: Vec<ModifierOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierOption {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Fixed-price multi-course structure (schema v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMenu {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub courses: Vec<SetMenuCourse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMenuCourse {
    pub name: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Text the model flagged as probable menu content it could not confidently
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertainItem {
    pub text: String,
    pub reason: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_price: Option<f64>,
}

/// Decorative or non-menu text the model identified and separated out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperfluousText {
    pub text: String,
    pub context: String,
    pub confidence: f64,
}
