use serde::{Deserialize, Serialize};

/// A single subject record from the reference dataset.
///
/// Records are built once by [`crate::services::identity::IdentityIndex`]
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRecord {
    /// Canonical id, e.g. "char_002_amiya"
    pub id: String,

    /// Display name, e.g. "Amiya"
    pub name: String,

    /// Localized display name
    pub name_local: String,

    /// Display code, e.g. "R001"
    pub code: String,

    /// Faction id, e.g. "rhodes"; not every record carries one
    pub nation: Option<String>,

    /// Class label, e.g. "CASTER"
    pub class_tag: String,

    /// Faction accent color, e.g. "#0098dc"
    pub accent_color: String,
}

impl OperatorRecord {
    /// Class icon filename for this record, e.g. "caster.png".
    pub fn class_icon_filename(&self) -> String {
        format!("{}.png", self.class_tag.to_lowercase())
    }
}

/// Map a dataset class code to its label.
///
/// The dataset stores classes as small power-of-two integers. Codes outside
/// the table (including the reserved 128/256 values) map to "UNKNOWN".
pub fn class_label(code: u32) -> &'static str {
    match code {
        512 => "VANGUARD",
        1 => "GUARD",
        4 => "DEFENDER",
        32 => "CASTER",
        2 => "SNIPER",
        8 => "MEDIC",
        16 => "SUPPORTER",
        64 => "SPECIALIST",
        _ => "UNKNOWN",
    }
}
