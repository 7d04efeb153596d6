//! Money fields are stored as JSON numbers. Reading also accepts strings and integers, which older documents carry.

use rust_decimal::Decimal;
use serde::{de::Deserializer, ser::Error as _, Serializer};
use serde_json::Value;

fn as_f64(value: &Decimal) -> Option<f64> {
    value.normalize().to_string().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// The number stored for `value`, or `None` when it has no finite floating point form.
pub fn to_value(value: &Decimal) -> Option<Value> {
    match whole(value) {
        Some(n) => Some(Value::from(n)),
        None => as_f64(value).and_then(serde_json::Number::from_f64).map(Value::Number),
    }
}

// Whole amounts are written as integers, the way a JSON client writes them.
fn whole(value: &Decimal) -> Option<i64> {
    if value.fract().is_zero() {
        value.trunc().to_string().parse::<i64>().ok()
    }
    else {
        None
    }
}

pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if let Some(n) = whole(value) {
        return serializer.serialize_i64(n);
    }
    let number = as_f64(value).ok_or_else(|| S::Error::custom(format!("amount {value} is not a number")))?;
    serializer.serialize_f64(number)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    rust_decimal::serde::float::deserialize(deserializer)
}

/// Sum of `amounts`, or `None` if it does not fit a [`Decimal`].
pub fn checked_sum<I>(amounts: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().try_fold(Decimal::ZERO, |acc, a| acc.checked_add(a))
}

/// Sum of `amounts`, clamped to the [`Decimal`] range.
pub fn saturating_sum<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().fold(Decimal::ZERO, |acc, a| acc.saturating_add(a))
}

pub mod option {
    use rust_decimal::Decimal;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => super::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        rust_decimal::serde::float_option::deserialize(deserializer)
    }
}
