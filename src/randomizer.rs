//
// randomizer.rs
// dicom-deid
//
// Deterministic value derivation: (seed, original value) -> 256-bit integer, and the
// mixed-radix decomposition used to carve that integer into bounded fields.
//
// dicom-deid contributors - October 2026

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{DeidError, Result};

const GENERATED_SEED_BYTES: usize = 20;

/// Secret that keys every derivation of one run.
///
/// Reusing the seed reproduces the same substitutes; losing it makes them
/// unlinkable to the originals.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed(String);

impl Seed {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(DeidError::InvalidArgument("seed must not be empty".into()));
        }
        Ok(Self(value))
    }

    /// Fresh seed from the operating system's entropy source.
    pub fn generate() -> Self {
        let mut bytes = [0_u8; GENERATED_SEED_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(<redacted>)")
    }
}

/// An attribute value as seen by the deriver.
#[derive(Debug, Clone, PartialEq)]
pub enum OriginalValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl OriginalValue {
    /// Stable textual form hashed together with the seed.
    pub fn canonical(&self) -> Result<String> {
        match self {
            OriginalValue::Text(text) => Ok(text.clone()),
            OriginalValue::Integer(value) => Ok(value.to_string()),
            OriginalValue::Decimal(value) if value.is_finite() => Ok(value.to_string()),
            OriginalValue::Decimal(value) => Err(DeidError::InvalidInput(format!(
                "decimal value {value} has no canonical form"
            ))),
            OriginalValue::Date(date) => Ok(date.format("%Y%m%d").to_string()),
            OriginalValue::Time(time) => Ok(time.format("%H%M%S%.f").to_string()),
            OriginalValue::DateTime(dt) => Ok(dt.format("%Y%m%d%H%M%S%.f").to_string()),
        }
    }
}

impl From<&str> for OriginalValue {
    fn from(value: &str) -> Self {
        OriginalValue::Text(value.to_string())
    }
}

impl From<String> for OriginalValue {
    fn from(value: String) -> Self {
        OriginalValue::Text(value)
    }
}

impl From<i64> for OriginalValue {
    fn from(value: i64) -> Self {
        OriginalValue::Integer(value)
    }
}

impl From<f64> for OriginalValue {
    fn from(value: f64) -> Self {
        OriginalValue::Decimal(value)
    }
}

impl From<NaiveDate> for OriginalValue {
    fn from(value: NaiveDate) -> Self {
        OriginalValue::Date(value)
    }
}

impl From<NaiveTime> for OriginalValue {
    fn from(value: NaiveTime) -> Self {
        OriginalValue::Time(value)
    }
}

impl From<NaiveDateTime> for OriginalValue {
    fn from(value: NaiveDateTime) -> Self {
        OriginalValue::DateTime(value)
    }
}

/// 256-bit unsigned integer stored as a big-endian SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedInt([u8; 32]);

impl DerivedInt {
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_be_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The low 128 bits, used where a value must fit a short textual form (UIDs).
    pub fn low_u128(&self) -> u128 {
        let mut low = [0_u8; 16];
        low.copy_from_slice(&self.0[16..]);
        u128::from_be_bytes(low)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Divides in place by `divisor` and returns the remainder.
    fn div_rem(&mut self, divisor: u64) -> u64 {
        let divisor = u128::from(divisor);
        let mut rem: u128 = 0;
        for byte in self.0.iter_mut() {
            // rem < divisor <= 2^64, so the shifted value fits in 72 bits.
            let current = (rem << 8) | u128::from(*byte);
            *byte = (current / divisor) as u8;
            rem = current % divisor;
        }
        rem as u64
    }
}

impl fmt::Debug for DerivedInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedInt(0x{})", self.to_hex())
    }
}

/// Splits `value` into mixed-radix digits, one per bound, least significant first.
///
/// Every output satisfies `0 <= out[i] < bounds[i]`. The full 256-bit value is
/// used, so the bounds may multiply up to 2^256 (four full-width `u64` bounds)
/// before later outputs run out of entropy; past that point they are zero.
pub fn decompose(value: &DerivedInt, bounds: &[u64]) -> Result<Vec<u64>> {
    if let Some(index) = bounds.iter().position(|b| *b == 0) {
        return Err(DeidError::InvalidArgument(format!(
            "bound #{index} must be positive"
        )));
    }

    let mut remaining = *value;
    Ok(bounds.iter().map(|bound| remaining.div_rem(*bound)).collect())
}

/// Seeded deriver: the only state is the seed.
#[derive(Debug, Clone)]
pub struct Randomizer {
    seed: Seed,
}

impl Randomizer {
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }

    pub fn derive(&self, original: impl Into<OriginalValue>) -> Result<DerivedInt> {
        let canonical = original.into().canonical()?;
        Ok(self.derive_text(&canonical))
    }

    pub fn derive_text(&self, original: &str) -> DerivedInt {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(original.as_bytes());
        DerivedInt(hasher.finalize().into())
    }

    /// Derive and decompose in one step.
    pub fn ints_from_ranges(
        &self,
        original: impl Into<OriginalValue>,
        bounds: &[u64],
    ) -> Result<Vec<u64>> {
        decompose(&self.derive(original)?, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn randomizer(seed: &str) -> Randomizer {
        Randomizer::new(Seed::new(seed).expect("seed"))
    }

    #[test]
    fn derive_is_sha256_of_seed_and_value() {
        let derived = randomizer("test123").derive_text("PT001");
        let expected: [u8; 32] = Sha256::digest(b"test123PT001").into();
        assert_eq!(derived.as_be_bytes(), &expected);
    }

    #[test]
    fn empty_seed_is_rejected() {
        assert!(matches!(Seed::new(""), Err(DeidError::InvalidArgument(_))));
    }

    #[test]
    fn generated_seeds_differ() {
        assert_ne!(Seed::generate(), Seed::generate());
    }

    #[test]
    fn seed_debug_does_not_leak() {
        let seed = Seed::new("very-secret").expect("seed");
        assert!(!format!("{seed:?}").contains("very-secret"));
    }

    #[test]
    fn non_finite_decimals_cannot_be_derived() {
        let r = randomizer("s");
        assert!(matches!(r.derive(f64::NAN), Err(DeidError::InvalidInput(_))));
        assert!(matches!(
            r.derive(f64::INFINITY),
            Err(DeidError::InvalidInput(_))
        ));
    }

    #[test]
    fn typed_values_use_their_canonical_text() {
        let r = randomizer("s");
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).expect("date");
        assert_eq!(r.derive(date).expect("date"), r.derive_text("20240131"));
        assert_eq!(r.derive(42_i64).expect("int"), r.derive_text("42"));
    }

    #[test]
    fn decompose_matches_mixed_radix_digits() {
        let mut bytes = [0_u8; 32];
        bytes[31] = 123;
        let value = DerivedInt::from_be_bytes(bytes);
        assert_eq!(decompose(&value, &[10, 10, 10, 10]).expect("ok"), vec![3, 2, 1, 0]);
    }

    #[test]
    fn decompose_uses_the_full_width() {
        // 2^248 in base 2^62 is the digit 1 in fifth position.
        let mut bytes = [0_u8; 32];
        bytes[0] = 1;
        let value = DerivedInt::from_be_bytes(bytes);
        let parts = decompose(&value, &[1 << 62; 6]).expect("ok");
        assert_eq!(parts, vec![0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn decompose_rejects_zero_bound() {
        let value = randomizer("s").derive_text("x");
        assert!(matches!(
            decompose(&value, &[3, 0]),
            Err(DeidError::InvalidArgument(_))
        ));
    }

    #[test]
    fn distinct_values_rarely_collide() {
        let r = randomizer("collisions");
        let derived: HashSet<_> = (0..10_000)
            .map(|i| r.derive_text(&format!("PAT{i:05}")))
            .collect();
        assert_eq!(derived.len(), 10_000);
    }

    proptest! {
        #[test]
        fn derive_is_deterministic(seed in "[ -~]{1,32}", value in ".*") {
            let a = randomizer(&seed).derive_text(&value);
            let b = randomizer(&seed).derive_text(&value);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn decompose_respects_bounds(
            bytes in proptest::array::uniform32(any::<u8>()),
            bounds in proptest::collection::vec(1_u64..=u64::MAX, 0..8),
        ) {
            let value = DerivedInt::from_be_bytes(bytes);
            let parts = decompose(&value, &bounds).expect("positive bounds");
            prop_assert_eq!(parts.len(), bounds.len());
            for (part, bound) in parts.iter().zip(&bounds) {
                prop_assert!(part < bound);
            }
            prop_assert_eq!(parts, decompose(&value, &bounds).expect("again"));
        }
    }
}
