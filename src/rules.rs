// 🏷️ Courier Classification Rules - Rules as Data
// Ordered pattern table: the first rule that matches a tracking number wins

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::{Courier, AMBIGUOUS_PAIR};
use crate::error::{IntakeError, Result};

/// `MY` + exactly 12 digits + optional word character.
/// Shopee Express and POS Malaysia both issue numbers in this shape.
pub const AMBIGUOUS_PATTERN: &str = r"^MY[0-9]{12}[0-9A-Za-z_]?$";

/// Fixed rule table, in priority order. Order is the tie-break policy.
///
/// The Flash Express pattern is a loose heuristic rather than a format
/// definition. It is kept exactly as operators have been relying on it.
pub const STANDARD_RULES: &[(&str, Courier, &str)] = &[
    ("jnt", Courier::JAndT, r"^6"),
    ("gdex", Courier::GDex, r"^LBX"),
    ("shopee-express", Courier::ShopeeExpress, r"^SPX|^MY.+T$"),
    ("ninja-van", Courier::NinjaVan, r"^(SPE|NLMY|SY|NVMY|SXDSG|MYNJV)"),
    ("kerry-express", Courier::KerryExpress, r"^MYKE"),
    ("lazada-express", Courier::LazadaExpress, r"^MYMPA"),
    ("flash-express", Courier::FlashExpress, r"^M[^Y].+[0-9A-Za-z_][A-Z][0-9]?$"),
    ("skynet", Courier::Skynet, r"^LAZMA"),
    ("jnt-cargo", Courier::JAndTCargo, r"^(8000|9000)"),
    ("dhl", Courier::Dhl, r"^59"),
    ("citylink", Courier::CityLink, r"^99"),
    ("pos-malaysia", Courier::PosMalaysia, r"^(ER|PL)"),
];

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone)]
pub struct CourierRule {
    /// Rule ID for tracking
    pub id: String,

    /// Courier assigned on match
    pub courier: Courier,

    pattern: Regex,
}

impl CourierRule {
    pub fn new(id: &str, courier: Courier, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| IntakeError::invalid(format!("Invalid pattern for rule {}: {}", id, e)))?;

        Ok(CourierRule {
            id: id.to_string(),
            courier,
            pattern,
        })
    }

    /// Check if pattern matches the given tracking number
    pub fn matches(&self, tracking_number: &str) -> bool {
        self.pattern.is_match(tracking_number)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// Outcome of classification. `Ambiguous` and `Unknown` are branches that
/// need a manual choice, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Matched(Courier),
    Ambiguous([Courier; 2]),
    Unknown,
}

impl Classification {
    pub fn courier(&self) -> Option<Courier> {
        match self {
            Classification::Matched(courier) => Some(*courier),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Classification::Matched(_))
    }
}

// ============================================================================
// RULE ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuleEngine {
    ambiguous: Regex,
    rules: Vec<CourierRule>,
}

impl RuleEngine {
    /// Engine with the fixed courier table
    pub fn standard() -> Result<Self> {
        let rules = STANDARD_RULES
            .iter()
            .map(|(id, courier, pattern)| CourierRule::new(id, *courier, pattern))
            .collect::<Result<Vec<_>>>()?;

        RuleEngine::from_rules(rules)
    }

    /// Create engine from a list of rules. Rules are kept in the given order.
    pub fn from_rules(rules: Vec<CourierRule>) -> Result<Self> {
        let ambiguous = Regex::new(AMBIGUOUS_PATTERN)
            .map_err(|e| IntakeError::invalid(format!("Invalid ambiguous pattern: {}", e)))?;

        Ok(RuleEngine { ambiguous, rules })
    }

    /// Classify a tracking number.
    ///
    /// Surrounding whitespace (scanner suffixes) is ignored. Empty input is
    /// rejected before any matching.
    pub fn classify(&self, tracking_number: &str) -> Result<Classification> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(IntakeError::invalid("Missing trackingNumber"));
        }

        if self.ambiguous.is_match(tracking_number) {
            debug!(tracking_number, "ambiguous tracking number format");
            return Ok(Classification::Ambiguous(AMBIGUOUS_PAIR));
        }

        // Find first matching rule (table order)
        for rule in &self.rules {
            if rule.matches(tracking_number) {
                debug!(tracking_number, rule = %rule.id, courier = %rule.courier, "rule matched");
                return Ok(Classification::Matched(rule.courier));
            }
        }

        debug!(tracking_number, "no rule matched");
        Ok(Classification::Unknown)
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[CourierRule] {
        &self.rules
    }
}

// ============================================================================
// TESTS
// ============================================================================
