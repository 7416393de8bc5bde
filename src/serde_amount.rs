//! Decimal-string serialization for monetary integers.
//!
//! Amounts routinely exceed what JSON numbers can carry without loss, so every
//! `u128`/`i128` field on a persisted record goes through one of these helpers.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serializer, de};

pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr,
    T::Err: Display,
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<T>()
        .map_err(|e| de::Error::custom(format!("invalid decimal amount {s:?}: {e}")))
}

pub mod option {
    use super::*;

    pub fn serialize<T: Display, S: Serializer>(
        value: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| {
                s.parse::<T>()
                    .map_err(|e| de::Error::custom(format!("invalid decimal amount {s:?}: {e}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "crate::serde_amount")]
        amount: u128,
        #[serde(with = "crate::serde_amount")]
        delta: i128,
        #[serde(with = "crate::serde_amount::option")]
        maybe: Option<u128>,
    }

    #[test]
    fn amounts_are_decimal_strings_and_missing_is_null() {
        let s = Sample {
            amount: 340_282_366_920_938_463_463_374_607_431_768_211_455,
            delta: -42,
            maybe: None,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["amount"], "340282366920938463463374607431768211455");
        assert_eq!(json["delta"], "-42");
        assert!(json["maybe"].is_null());

        let back: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
