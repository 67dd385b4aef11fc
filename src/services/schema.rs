use std::fmt;

use serde_json::Value;

use crate::models::job::SchemaVersion;
use crate::models::menu::{
    ItemType, ItemVariant, MenuCategory, MenuExtraction, MenuItem, ModifierGroup, ModifierOption,
    SetMenu, SetMenuCourse, SuperfluousText, UncertainItem, FALLBACK_CURRENCY,
};

/// A path-qualified validation failure, e.g.
/// `categories[0].items[2].price: must be a non-negative number`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Outcome of a salvage pass over an invalid raw result.
#[derive(Debug)]
pub struct SalvageReport {
    pub menu: MenuExtraction,
    pub items_recovered: usize,
    pub categories_recovered: usize,
}

/// Validate raw model output against the schema named by the job's stored
/// version discriminant. Returns the parsed tree or every issue found.
pub fn validate(raw: &Value, version: SchemaVersion) -> Result<MenuExtraction, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let categories = match raw.get("categories").and_then(Value::as_array) {
        Some(raw_categories) => raw_categories
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                parse_category(c, &format!("categories[{i}]"), version, &mut issues)
            })
            .collect(),
        None => {
            issues.push(ValidationIssue::new("categories", "must be an array"));
            Vec::new()
        }
    };

    if categories.is_empty() && issues.is_empty() {
        issues.push(ValidationIssue::new(
            "categories",
            "at least one category is required",
        ));
    }

    let currency = match raw.get("currency").and_then(Value::as_str) {
        Some(code) if looks_like_currency(code) => code.to_uppercase(),
        Some(code) => {
            issues.push(ValidationIssue::new(
                "currency",
                format!("'{code}' is not a recognizable currency code"),
            ));
            String::new()
        }
        None => {
            issues.push(ValidationIssue::new("currency", "missing currency code"));
            String::new()
        }
    };

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(MenuExtraction {
        categories,
        currency,
        uncertain_items: parse_uncertain_items(raw),
        superfluous_text: parse_superfluous_text(raw),
    })
}

/// Recover the structurally valid subset of an invalid raw result.
///
/// Categories with broken category-level fields are dropped wholesale;
/// categories that fail only through bad items keep their individually valid
/// items. An invalid or missing currency falls back to a fixed code.
/// Uncertain-item and superfluous-text arrays are carried through whenever
/// their entries are structurally plausible.
pub fn salvage(raw: &Value, version: SchemaVersion) -> SalvageReport {
    let categories: Vec<MenuCategory> = raw
        .get("categories")
        .and_then(Value::as_array)
        .map(|raw_categories| {
            raw_categories
                .iter()
                .filter_map(|c| salvage_category(c, version))
                .collect()
        })
        .unwrap_or_default();

    let currency = raw
        .get("currency")
        .and_then(Value::as_str)
        .filter(|code| looks_like_currency(code))
        .map(str::to_uppercase)
        .unwrap_or_else(|| FALLBACK_CURRENCY.to_string());

    let menu = MenuExtraction {
        categories,
        currency,
        uncertain_items: parse_uncertain_items(raw),
        superfluous_text: parse_superfluous_text(raw),
    };

    SalvageReport {
        items_recovered: menu.item_count(),
        categories_recovered: menu.category_count(),
        menu,
    }
}

/// Non-fatal review warnings attached to successful validations.
pub fn warnings(menu: &MenuExtraction) -> Vec<String> {
    let mut out = Vec::new();
    for category in &menu.categories {
        warn_category(category, &mut out);
    }
    if menu.uncertain_items.len() > 5 {
        out.push(format!(
            "{} uncertain items were flagged for review",
            menu.uncertain_items.len()
        ));
    }
    out
}

fn warn_category(category: &MenuCategory, out: &mut Vec<String>) {
    if category.confidence < 0.6 {
        out.push(format!(
            "category '{}' has low confidence ({:.2})",
            category.name, category.confidence
        ));
    }
    if category.items.is_empty() && category.subcategories.is_empty() {
        out.push(format!("category '{}' has no items", category.name));
    }
    for item in &category.items {
        if item.confidence < 0.6 {
            out.push(format!(
                "item '{}' has low confidence ({:.2})",
                item.name, item.confidence
            ));
        }
        match item.price {
            Some(price) if price > 10_000.0 => out.push(format!(
                "item '{}' has an implausibly high price ({price}), likely misread",
                item.name
            )),
            Some(price) if price == 0.0 => out.push(format!(
                "item '{}' has a zero price and needs review",
                item.name
            )),
            _ => {}
        }
    }
    for sub in &category.subcategories {
        warn_category(sub, out);
    }
}

// ── Strict parsing (validate) ────────────────────────────────────────

fn parse_category(
    value: &Value,
    path: &str,
    version: SchemaVersion,
    issues: &mut Vec<ValidationIssue>,
) -> Option<MenuCategory> {
    let before = issues.len();

    let name = match non_empty_str(value.get("name")) {
        Some(name) => name,
        None => {
            issues.push(ValidationIssue::new(
                format!("{path}.name"),
                "must be a non-empty string",
            ));
            String::new()
        }
    };

    let confidence = match confidence_of(value) {
        Some(c) => c,
        None => {
            issues.push(ValidationIssue::new(
                format!("{path}.confidence"),
                "must be a number between 0 and 1",
            ));
            0.0
        }
    };

    let items = value
        .get("items")
        .and_then(Value::as_array)
        .map(|raw_items| {
            raw_items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    parse_item(item, &format!("{path}.items[{i}]"), version, issues)
                })
                .collect()
        })
        .unwrap_or_default();

    let subcategories = value
        .get("subcategories")
        .and_then(Value::as_array)
        .map(|subs| {
            subs.iter()
                .enumerate()
                .filter_map(|(i, sub)| {
                    parse_category(sub, &format!("{path}.subcategories[{i}]"), version, issues)
                })
                .collect()
        })
        .unwrap_or_default();

    if issues.len() > before {
        return None;
    }

    Some(MenuCategory {
        name,
        confidence,
        items,
        subcategories,
    })
}

fn parse_item(
    value: &Value,
    path: &str,
    version: SchemaVersion,
    issues: &mut Vec<ValidationIssue>,
) -> Option<MenuItem> {
    let before = issues.len();

    let name = match non_empty_str(value.get("name")) {
        Some(name) => name,
        None => {
            issues.push(ValidationIssue::new(
                format!("{path}.name"),
                "must be a non-empty string",
            ));
            String::new()
        }
    };

    let confidence = match confidence_of(value) {
        Some(c) => c,
        None => {
            issues.push(ValidationIssue::new(
                format!("{path}.confidence"),
                "must be a number between 0 and 1",
            ));
            0.0
        }
    };

    let price = match value.get("price") {
        None | Some(Value::Null) => None,
        Some(raw_price) => match price_of(raw_price) {
            Some(price) => Some(price),
            None => {
                issues.push(ValidationIssue::new(
                    format!("{path}.price"),
                    "must be a non-negative number",
                ));
                None
            }
        },
    };

    let variants = parse_variants(value, path, issues);
    let set_menu = parse_set_menu(value, path, issues);
    let item_type = parse_item_type(value, path, issues);

    match version {
        SchemaVersion::V1 => {
            if price.is_none() && !issues.iter().any(|i| i.path == format!("{path}.price")) {
                issues.push(ValidationIssue::new(
                    format!("{path}.price"),
                    "price is required",
                ));
            }
        }
        SchemaVersion::V2 => {
            if price.is_none() && variants.is_empty() && set_menu.is_none() {
                issues.push(ValidationIssue::new(
                    path.to_string(),
                    "item needs at least one of: price, variants, set_menu",
                ));
            }
            if item_type == Some(ItemType::SetMenu) && set_menu.is_none() {
                issues.push(ValidationIssue::new(
                    format!("{path}.set_menu"),
                    "items of type set_menu must carry a set_menu body",
                ));
            }
        }
    }

    if issues.len() > before {
        return None;
    }

    Some(MenuItem {
        name,
        price,
        description: non_empty_str(value.get("description")),
        confidence,
        variants,
        modifier_groups: parse_modifier_groups(value),
        additional_info: parse_string_array(value.get("additional_info")),
        item_type,
        set_menu,
    })
}

fn parse_variants(value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) -> Vec<ItemVariant> {
    let Some(raw_variants) = value.get("variants").and_then(Value::as_array) else {
        return Vec::new();
    };
    raw_variants
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            let name = non_empty_str(v.get("name"));
            let price = v.get("price").and_then(price_of);
            match (name, price) {
                (Some(name), Some(price)) => Some(ItemVariant { name, price }),
                _ => {
                    issues.push(ValidationIssue::new(
                        format!("{path}.variants[{i}]"),
                        "variant needs a name and a non-negative price",
                    ));
                    None
                }
            }
        })
        .collect()
}

fn parse_set_menu(value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) -> Option<SetMenu> {
    let raw_set = value.get("set_menu")?;
    if raw_set.is_null() {
        return None;
    }

    let Some(raw_courses) = raw_set.get("courses").and_then(Value::as_array) else {
        issues.push(ValidationIssue::new(
            format!("{path}.set_menu.courses"),
            "must be an array of courses",
        ));
        return None;
    };

    let courses: Vec<SetMenuCourse> = raw_courses
        .iter()
        .filter_map(|course| {
            Some(SetMenuCourse {
                name: non_empty_str(course.get("name"))?,
                choices: parse_string_array(course.get("choices")),
            })
        })
        .collect();

    if courses.is_empty() {
        issues.push(ValidationIssue::new(
            format!("{path}.set_menu.courses"),
            "set menu needs at least one named course",
        ));
        return None;
    }

    Some(SetMenu {
        price: raw_set.get("price").and_then(price_of),
        courses,
    })
}

fn parse_item_type(
    value: &Value,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<ItemType> {
    match value.get("item_type").and_then(Value::as_str) {
        None => None,
        Some("standard") => Some(ItemType::Standard),
        Some("set_menu") => Some(ItemType::SetMenu),
        Some(other) => {
            issues.push(ValidationIssue::new(
                format!("{path}.item_type"),
                format!("unknown item type '{other}'"),
            ));
            None
        }
    }
}

fn parse_modifier_groups(value: &Value) -> Vec<ModifierGroup> {
    let Some(raw_groups) = value.get("modifier_groups").and_then(Value::as_array) else {
        return Vec::new();
    };
    raw_groups
        .iter()
        .filter_map(|group| {
            let name = non_empty_str(group.get("name"))?;
            let options: Vec<ModifierOption> = group
                .get("options")
                .and_then(Value::as_array)?
                .iter()
                .filter_map(|opt| {
                    Some(ModifierOption {
                        name: non_empty_str(opt.get("name"))?,
                        price: opt.get("price").and_then(price_of),
                    })
                })
                .collect();
            if options.is_empty() {
                return None;
            }
            Some(ModifierGroup {
                name,
                required: group
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                options,
            })
        })
        .collect()
}

// ── Lenient parsing (salvage) ────────────────────────────────────────

fn salvage_category(value: &Value, version: SchemaVersion) -> Option<MenuCategory> {
    // Category-level fields must validate; a broken category is dropped whole.
    let name = non_empty_str(value.get("name"))?;
    let confidence = confidence_of(value)?;

    let items = value
        .get("items")
        .and_then(Value::as_array)
        .map(|raw_items| {
            raw_items
                .iter()
                .filter_map(|item| {
                    let mut scratch = Vec::new();
                    parse_item(item, "item", version, &mut scratch)
                })
                .collect()
        })
        .unwrap_or_default();

    let subcategories = value
        .get("subcategories")
        .and_then(Value::as_array)
        .map(|subs| {
            subs.iter()
                .filter_map(|sub| salvage_category(sub, version))
                .collect()
        })
        .unwrap_or_default();

    Some(MenuCategory {
        name,
        confidence,
        items,
        subcategories,
    })
}

fn parse_uncertain_items(raw: &Value) -> Vec<UncertainItem> {
    let Some(entries) = raw.get("uncertain_items").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            Some(UncertainItem {
                text: non_empty_str(entry.get("text"))?,
                reason: non_empty_str(entry.get("reason")).unwrap_or_default(),
                confidence: confidence_of(entry).unwrap_or(0.0),
                suggested_category: non_empty_str(entry.get("suggested_category")),
                suggested_price: entry.get("suggested_price").and_then(price_of),
            })
        })
        .collect()
}

fn parse_superfluous_text(raw: &Value) -> Vec<SuperfluousText> {
    let Some(entries) = raw.get("superfluous_text").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            Some(SuperfluousText {
                text: non_empty_str(entry.get("text"))?,
                context: non_empty_str(entry.get("context")).unwrap_or_default(),
                confidence: confidence_of(entry).unwrap_or(0.0),
            })
        })
        .collect()
}

// ── Field helpers ────────────────────────────────────────────────────

fn parse_string_array(value: Option<&Value>) -> Vec<String> {
    let Some(arr) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|v| non_empty_str(Some(v)))
        .collect()
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn confidence_of(value: &Value) -> Option<f64> {
    value
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| (0.0..=1.0).contains(c))
}

fn price_of(value: &Value) -> Option<f64> {
    value.as_f64().filter(|p| p.is_finite() && *p >= 0.0)
}

fn looks_like_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_menu() -> Value {
        json!({
            "categories": [{
                "name": "Mains",
                "confidence": 0.95,
                "items": [
                    {"name": "Burger", "price": 12.5, "confidence": 0.92},
                    {"name": "Pasta", "price": 11.0, "description": "daily special", "confidence": 0.9}
                ]
            }],
            "currency": "USD"
        })
    }

    #[test]
    fn test_v1_valid_menu() {
        let menu = validate(&v1_menu(), SchemaVersion::V1).unwrap();
        assert_eq!(menu.categories.len(), 1);
        assert_eq!(menu.categories[0].items.len(), 2);
        assert_eq!(menu.currency, "USD");
    }

    #[test]
    fn test_v1_requires_flat_price() {
        let raw = json!({
            "categories": [{
                "name": "Mains",
                "confidence": 0.95,
                "items": [{"name": "Burger", "confidence": 0.92}]
            }],
            "currency": "USD"
        });
        let issues = validate(&raw, SchemaVersion::V1).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.path == "categories[0].items[0].price"));
    }

    #[test]
    fn test_v2_variant_only_item_is_valid() {
        let raw = json!({
            "categories": [{
                "name": "Wine",
                "confidence": 0.96,
                "items": [{
                    "name": "House Red",
                    "confidence": 0.94,
                    "variants": [{"name": "Glass", "price": 8.0}]
                }]
            }],
            "currency": "EUR"
        });
        let menu = validate(&raw, SchemaVersion::V2).unwrap();
        assert_eq!(menu.categories[0].items[0].variants.len(), 1);
    }

    #[test]
    fn test_v2_item_needs_some_pricing_shape() {
        let raw = json!({
            "categories": [{
                "name": "Mains",
                "confidence": 0.9,
                "items": [{"name": "Mystery", "confidence": 0.9}]
            }],
            "currency": "USD"
        });
        let issues = validate(&raw, SchemaVersion::V2).unwrap_err();
        assert!(issues.iter().any(|i| i.message.contains("at least one of")));
    }

    #[test]
    fn test_v2_set_menu_type_requires_body() {
        let raw = json!({
            "categories": [{
                "name": "Specials",
                "confidence": 0.9,
                "items": [{
                    "name": "Tasting Menu",
                    "price": 60.0,
                    "confidence": 0.9,
                    "item_type": "set_menu"
                }]
            }],
            "currency": "USD"
        });
        let issues = validate(&raw, SchemaVersion::V2).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.message.contains("set_menu body")));
    }

    #[test]
    fn test_salvage_keeps_valid_item_drops_invalid() {
        let raw = json!({
            "categories": [{
                "name": "Mains",
                "confidence": 0.9,
                "items": [
                    {"name": "Good", "price": 10.0, "confidence": 0.9},
                    {"name": "Bad", "price": -5.0, "confidence": 0.9}
                ]
            }],
            "currency": "USD"
        });
        let report = salvage(&raw, SchemaVersion::V1);
        assert_eq!(report.items_recovered, 1);
        assert_eq!(report.categories_recovered, 1);
        assert_eq!(report.menu.categories[0].items.len(), 1);
        assert_eq!(report.menu.categories[0].items[0].name, "Good");
    }

    #[test]
    fn test_salvage_drops_broken_category_wholesale() {
        let raw = json!({
            "categories": [
                {"confidence": 0.9, "items": [{"name": "Orphan", "price": 5.0, "confidence": 0.9}]},
                {"name": "Drinks", "confidence": 0.85, "items": [{"name": "Tea", "price": 3.0, "confidence": 0.9}]}
            ],
            "currency": "bad-code"
        });
        let report = salvage(&raw, SchemaVersion::V1);
        assert_eq!(report.categories_recovered, 1);
        assert_eq!(report.menu.categories[0].name, "Drinks");
        assert_eq!(report.menu.currency, FALLBACK_CURRENCY);
    }

    #[test]
    fn test_salvage_carries_uncertain_items_through() {
        let raw = json!({
            "categories": [],
            "uncertain_items": [
                {"text": "chef specials?", "reason": "illegible", "confidence": 0.3},
                {"text": 42}
            ],
            "superfluous_text": [{"text": "Since 1987", "context": "footer", "confidence": 0.8}]
        });
        let report = salvage(&raw, SchemaVersion::V2);
        assert_eq!(report.items_recovered, 0);
        assert_eq!(report.menu.uncertain_items.len(), 1);
        assert_eq!(report.menu.superfluous_text.len(), 1);
    }

    #[test]
    fn test_warnings() {
        let raw = json!({
            "categories": [
                {"name": "Faint", "confidence": 0.5, "items": []},
                {"name": "Mains", "confidence": 0.95, "items": [
                    {"name": "Gold Burger", "price": 12000.0, "confidence": 0.9},
                    {"name": "Free Water", "price": 0.0, "confidence": 0.9}
                ]}
            ],
            "currency": "USD"
        });
        let menu = validate(&raw, SchemaVersion::V1).unwrap();
        let warns = warnings(&menu);
        assert!(warns.iter().any(|w| w.contains("low confidence")));
        assert!(warns.iter().any(|w| w.contains("no items")));
        assert!(warns.iter().any(|w| w.contains("likely misread")));
        assert!(warns.iter().any(|w| w.contains("zero price")));
    }

    #[test]
    fn test_validate_reports_all_issues_with_paths() {
        let raw = json!({
            "categories": [{
                "name": "Mains",
                "confidence": 1.4,
                "items": [{"name": "", "price": 9.0, "confidence": 0.9}]
            }]
        });
        let issues = validate(&raw, SchemaVersion::V1).unwrap_err();
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"categories[0].confidence"));
        assert!(paths.contains(&"categories[0].items[0].name"));
        assert!(paths.contains(&"currency"));
    }
}
