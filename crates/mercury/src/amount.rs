/// Token amount in the smallest denomination.
pub type Amount = u128;

/// `floor(amount * part / total)`, the integer share of `amount` owed to
/// `part` out of `total`.
///
/// Returns 0 when `total` is 0; `part` is clamped to `total`, so the share
/// never exceeds `amount`.
pub fn safe_share(part: u64, total: u64, amount: Amount) -> Amount {
    if total == 0 || amount == 0 {
        return 0;
    }
    let part = Amount::from(part.min(total));
    let total = Amount::from(total);
    match amount.checked_mul(part) {
        Some(product) => product / total,
        // (amount / total) * part + ((amount % total) * part) / total, exact
        // for any amount because part <= total
        None => (amount / total) * part + (amount % total) * part / total,
    }
}

/// Serde helper encoding amounts as decimal strings.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.trim().parse().map_err(serde::de::Error::custom)
    }
}
