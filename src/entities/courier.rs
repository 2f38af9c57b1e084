// 🚚 Courier Entity - fixed enumeration + normalization
//
// "Pos Malaysia" (what the pattern table historically emitted) and
// "POS Malaysia" (what the manual menu emitted) are the same courier.
// Names are normalized on the way in so a pending set never splits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IntakeError;

/// Bin code used when a courier has no code of its own
pub const FALLBACK_CODE: &str = "XX";

// ============================================================================
// COURIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Courier {
    #[serde(rename = "Shopee Express")]
    ShopeeExpress,
    #[serde(rename = "J&T")]
    JAndT,
    #[serde(rename = "Flash Express")]
    FlashExpress,
    #[serde(rename = "Lazada Express")]
    LazadaExpress,
    #[serde(rename = "Ninja Van")]
    NinjaVan,
    #[serde(rename = "Skynet")]
    Skynet,
    #[serde(rename = "POS Malaysia", alias = "Pos Malaysia")]
    PosMalaysia,
    #[serde(rename = "Posstore")]
    Posstore,
    #[serde(rename = "Kerry Express")]
    KerryExpress,
    #[serde(rename = "J&T Cargo")]
    JAndTCargo,
    #[serde(rename = "DHL")]
    Dhl,
    #[serde(rename = "CityLink")]
    CityLink,
    #[serde(rename = "GDex")]
    GDex,
    #[serde(rename = "GDex Shopee")]
    GDexShopee,
}

impl Courier {
    pub const ALL: [Courier; 14] = [
        Courier::ShopeeExpress,
        Courier::JAndT,
        Courier::FlashExpress,
        Courier::LazadaExpress,
        Courier::NinjaVan,
        Courier::Skynet,
        Courier::PosMalaysia,
        Courier::Posstore,
        Courier::KerryExpress,
        Courier::JAndTCargo,
        Courier::Dhl,
        Courier::CityLink,
        Courier::GDex,
        Courier::GDexShopee,
    ];

    /// Canonical display name (also the stored and serialized form)
    pub fn name(&self) -> &'static str {
        match self {
            Courier::ShopeeExpress => "Shopee Express",
            Courier::JAndT => "J&T",
            Courier::FlashExpress => "Flash Express",
            Courier::LazadaExpress => "Lazada Express",
            Courier::NinjaVan => "Ninja Van",
            Courier::Skynet => "Skynet",
            Courier::PosMalaysia => "POS Malaysia",
            Courier::Posstore => "Posstore",
            Courier::KerryExpress => "Kerry Express",
            Courier::JAndTCargo => "J&T Cargo",
            Courier::Dhl => "DHL",
            Courier::CityLink => "CityLink",
            Courier::GDex => "GDex",
            Courier::GDexShopee => "GDex Shopee",
        }
    }

    /// Alternative spellings that map to this courier
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Courier::PosMalaysia => &["Pos Malaysia"],
            _ => &[],
        }
    }

    /// Two-letter code used in bin numbers. Manual-only couriers have none.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Courier::ShopeeExpress => Some("SE"),
            Courier::JAndT => Some("JT"),
            Courier::FlashExpress => Some("FE"),
            Courier::LazadaExpress => Some("LE"),
            Courier::NinjaVan => Some("NV"),
            Courier::Skynet => Some("SN"),
            Courier::PosMalaysia => Some("PM"),
            Courier::KerryExpress => Some("KE"),
            Courier::JAndTCargo => Some("JC"),
            Courier::Dhl => Some("DH"),
            Courier::CityLink => Some("CL"),
            Courier::GDex => Some("GD"),
            Courier::Posstore | Courier::GDexShopee => None,
        }
    }

    /// Bin code, falling back to `XX`
    pub fn bin_code(&self) -> &'static str {
        self.code().unwrap_or(FALLBACK_CODE)
    }

    /// Can the pattern table ever produce this courier?
    pub fn is_auto_classifiable(&self) -> bool {
        !matches!(self, Courier::Posstore | Courier::GDexShopee)
    }

    /// Find a courier by canonical name or alias (case-insensitive)
    pub fn find_by_name(name: &str) -> Option<Courier> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        Courier::ALL.iter().copied().find(|courier| {
            courier.name().to_lowercase() == needle
                || courier
                    .aliases()
                    .iter()
                    .any(|alias| alias.to_lowercase() == needle)
        })
    }
}

impl fmt::Display for Courier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Courier {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(IntakeError::invalid("Missing courier"));
        }
        Courier::find_by_name(s).ok_or_else(|| IntakeError::invalid(format!("Unknown courier: {}", s.trim())))
    }
}

// ============================================================================
// MANUAL SELECTION
// ============================================================================

/// One entry of the manual-selection menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualChoice {
    Courier(Courier),
    /// Log nothing and move on to the next scan
    Skip,
}

impl ManualChoice {
    pub fn label(&self) -> &'static str {
        match self {
            ManualChoice::Courier(courier) => courier.name(),
            ManualChoice::Skip => "Skip",
        }
    }
}

/// The 14 options offered when classification cannot resolve a courier.
/// Order matches the menu operators are used to.
pub const MANUAL_CHOICES: [ManualChoice; 14] = [
    ManualChoice::Courier(Courier::ShopeeExpress),
    ManualChoice::Courier(Courier::JAndT),
    ManualChoice::Courier(Courier::FlashExpress),
    ManualChoice::Courier(Courier::LazadaExpress),
    ManualChoice::Courier(Courier::NinjaVan),
    ManualChoice::Courier(Courier::Skynet),
    ManualChoice::Courier(Courier::PosMalaysia),
    ManualChoice::Courier(Courier::Posstore),
    ManualChoice::Courier(Courier::KerryExpress),
    ManualChoice::Courier(Courier::JAndTCargo),
    ManualChoice::Courier(Courier::Dhl),
    ManualChoice::Courier(Courier::CityLink),
    ManualChoice::Courier(Courier::GDexShopee),
    ManualChoice::Skip,
];

/// The two couriers that share the `MY` + 12 digits format
pub const AMBIGUOUS_PAIR: [Courier; 2] = [Courier::ShopeeExpress, Courier::PosMalaysia];

// ============================================================================
// TESTS
// ============================================================================
