use crate::types::RawItem;

/// Stored in place of an absent scalar attribute.
pub const ABSENT: i64 = -1;

/// Structural identity of an item variant. Two auctions whose items produce
/// equal keys are the same variant and share one `item_variants` row.
///
/// Modifier and bonus order is significant: upstream emits them in a stable
/// order, so reordered lists are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub item_id: i64,
    pub context: i64,
    /// Modifier pairs flattened as `[type, value, type, value, ...]`.
    pub modifiers: Vec<i64>,
    pub bonuses: Vec<i64>,
    pub pet_breed_id: i64,
    pub pet_level: i64,
    pub pet_quality_id: i64,
    pub pet_species_id: i64,
}

impl VariantKey {
    /// Column encoding for `item_variants.modifiers`.
    pub fn modifiers_column(&self) -> String {
        encode_int_list(&self.modifiers)
    }

    /// Column encoding for `item_variants.bonuses`.
    pub fn bonuses_column(&self) -> String {
        encode_int_list(&self.bonuses)
    }
}

impl From<&RawItem> for VariantKey {
    fn from(item: &RawItem) -> Self {
        let modifiers = item
            .modifiers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .flat_map(|m| [m.kind, m.value])
            .collect();

        Self {
            item_id: item.id,
            context: item.context.unwrap_or(ABSENT),
            modifiers,
            bonuses: item.bonus_lists.clone().unwrap_or_default(),
            pet_breed_id: item.pet_breed_id.unwrap_or(ABSENT),
            pet_level: item.pet_level.unwrap_or(ABSENT),
            pet_quality_id: item.pet_quality_id.unwrap_or(ABSENT),
            pet_species_id: item.pet_species_id.unwrap_or(ABSENT),
        }
    }
}

/// `[1, 5, 9]` → `"1,5,9"`, `[]` → `""`. Order-preserving and injective, so
/// text equality in the store is list equality.
pub fn encode_int_list(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
