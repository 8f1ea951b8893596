use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fmt;

/// The subset of an exchange product listing the screener looks at.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Product {
    #[serde(alias = "product_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub trading_disabled: bool,
    #[serde(default)]
    pub cancel_only: bool,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub min_market_funds: Option<f64>,
}

const TRADABLE_STATUSES: &[&str] = &["online", "active", "online_trading"];

impl Product {
    pub fn is_tradable(&self) -> bool {
        if self.trading_disabled || self.cancel_only {
            return false;
        }
        match self.status.as_deref() {
            None => true,
            Some(status) => TRADABLE_STATUSES.contains(&status),
        }
    }
}

/// Sorted, de-duplicated ids of tradable products quoted in `quote_currency`.
pub fn eligible_pairs(products: &[Product], quote_currency: &str) -> Vec<String> {
    let suffix = format!("-{}", quote_currency.to_uppercase());

    products
        .iter()
        .filter(|p| p.is_tradable())
        .filter_map(|p| p.id.as_deref())
        .filter(|id| id.ends_with(&suffix))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// The exchange sends most numbers as strings ("0.00001"), some as JSON numbers.

pub(crate) struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

pub(crate) fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}
