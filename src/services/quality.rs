use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::menu::{MenuCategory, MenuExtraction};

/// Discrete quality bucket derived from aggregated confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
    Unacceptable,
}

/// Result of the quality gate over a validated extraction.
#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    pub overall_confidence: f64,
    pub tier: QualityTier,
    /// Only the unacceptable tier blocks the job.
    pub can_proceed: bool,
    /// Fair and poor results proceed but demand human review.
    pub requires_review: bool,
    pub issues: Vec<String>,
}

/// Response produced when a result needs user-visible quality handling.
#[derive(Debug, Clone, Serialize)]
pub struct QualityIssueResponse {
    pub success: bool,
    pub partial: bool,
    pub requires_review: bool,
    pub message: String,
}

pub fn tier_for(confidence: f64) -> QualityTier {
    if confidence >= 0.90 {
        QualityTier::Excellent
    } else if confidence >= 0.75 {
        QualityTier::Good
    } else if confidence >= 0.60 {
        QualityTier::Fair
    } else if confidence >= 0.30 {
        QualityTier::Poor
    } else {
        QualityTier::Unacceptable
    }
}

/// Aggregate every confidence in the tree (categories and items, through
/// nested subcategories) into an overall score and tier.
pub fn assess(menu: &MenuExtraction) -> QualityAssessment {
    let mut confidences = Vec::new();
    for category in &menu.categories {
        collect_confidences(category, &mut confidences);
    }

    let overall_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    let tier = tier_for(overall_confidence);
    let mut issues = Vec::new();

    let uncertain = menu.uncertain_items.len();
    if uncertain > 10 {
        issues.push(format!(
            "{uncertain} uncertain items: large parts of the menu could not be structured"
        ));
    } else if uncertain > 5 {
        issues.push(format!("{uncertain} uncertain items need review"));
    }

    for name in empty_category_names(&menu.categories) {
        issues.push(format!("category '{name}' came back empty"));
    }

    QualityAssessment {
        overall_confidence,
        tier,
        can_proceed: tier != QualityTier::Unacceptable,
        requires_review: matches!(tier, QualityTier::Fair | QualityTier::Poor),
        issues,
    }
}

/// Map an assessment to its user-visible handling: clean tiers produce
/// nothing, middling tiers a partial-success-with-review response, and the
/// unacceptable tier a hard failure routed to manual entry.
pub fn handle_image_quality_issue(assessment: &QualityAssessment) -> Option<QualityIssueResponse> {
    match assessment.tier {
        QualityTier::Excellent | QualityTier::Good => None,
        QualityTier::Fair | QualityTier::Poor => Some(QualityIssueResponse {
            success: true,
            partial: true,
            requires_review: true,
            message: format!(
                "The extraction finished with {} confidence ({:.0}%). Please review the result \
                 before publishing.",
                assessment.tier,
                assessment.overall_confidence * 100.0
            ),
        }),
        QualityTier::Unacceptable => Some(QualityIssueResponse {
            success: false,
            partial: false,
            requires_review: false,
            message: format!(
                "Image quality was too low to extract a usable menu ({:.0}% confidence). \
                 Please retake the photo or enter the menu manually.",
                assessment.overall_confidence * 100.0
            ),
        }),
    }
}

fn collect_confidences(category: &MenuCategory, out: &mut Vec<f64>) {
    out.push(category.confidence);
    for item in &category.items {
        out.push(item.confidence);
    }
    for sub in &category.subcategories {
        collect_confidences(sub, out);
    }
}

fn empty_category_names(categories: &[MenuCategory]) -> Vec<String> {
    let mut names = Vec::new();
    for category in categories {
        if category.items.is_empty() && category.subcategories.is_empty() {
            names.push(category.name.clone());
        }
        names.extend(empty_category_names(&category.subcategories));
    }
    names
}
