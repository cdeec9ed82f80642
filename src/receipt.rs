// src/receipt.rs

//! Wire model of the receipt JSON emitted by the vision model.
//!
//! Keys follow the Italian schema the prompt asks for (`negozio`,
//! `prezzo_totale`, `lista_articoli`, ...); the English column names are
//! accepted as aliases. Numbers are read leniently because models routinely
//! quote them or use a decimal comma.

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The declared receipt total and its currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalPrice {
    #[serde(rename = "valore", alias = "value", default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(rename = "valuta", alias = "currency", default, deserialize_with = "lenient_text")]
    pub currency: Option<String>,
}

/// A single purchased line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    #[serde(rename = "nome", alias = "name", default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(rename = "quantita", alias = "quantity", default, deserialize_with = "lenient_f64")]
    pub quantity: Option<f64>,
    #[serde(rename = "prezzo", alias = "price", default, deserialize_with = "lenient_f64")]
    pub price: Option<f64>,
    #[serde(rename = "valuta", alias = "currency", default, deserialize_with = "lenient_text")]
    pub currency: Option<String>,
    #[serde(
        rename = "sconto_percentuale",
        alias = "discount_percent",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub discount_percent: Option<f64>,
    #[serde(
        rename = "sconto_assoluto",
        alias = "discount_absolute",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub discount_absolute: Option<f64>,
    #[serde(
        rename = "prezzo_scontato",
        alias = "discount_value",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub discount_value: Option<f64>,
    /// Per-unit price kept aside when the line price was scaled by quantity.
    #[serde(
        rename = "prezzo_unitario",
        alias = "unit_price",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_price: Option<f64>,
}

/// Everything the model extracted from one receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptData {
    #[serde(rename = "data", alias = "purchase_date", default, deserialize_with = "lenient_text")]
    pub purchase_date: Option<String>,
    #[serde(rename = "ora", alias = "purchase_time", default, deserialize_with = "lenient_text")]
    pub purchase_time: Option<String>,
    #[serde(rename = "negozio", alias = "store_name", default, deserialize_with = "lenient_text")]
    pub store_name: Option<String>,
    #[serde(rename = "indirizzo", alias = "address", default, deserialize_with = "lenient_text")]
    pub address: Option<String>,
    #[serde(rename = "citta", alias = "city", default, deserialize_with = "lenient_text")]
    pub city: Option<String>,
    #[serde(rename = "paese", alias = "country", default, deserialize_with = "lenient_text")]
    pub country: Option<String>,
    #[serde(rename = "prezzo_totale", alias = "total_price", default, deserialize_with = "lenient_total")]
    pub total: Option<TotalPrice>,
    #[serde(
        rename = "metodo_pagamento",
        alias = "payment_method",
        default,
        deserialize_with = "lenient_text"
    )]
    pub payment_method: Option<String>,
    #[serde(rename = "lista_articoli", alias = "items", default, deserialize_with = "lenient_items")]
    pub items: Vec<ReceiptItem>,
}

impl ReceiptData {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn total_price(&self) -> Option<f64> {
        self.total.as_ref().and_then(|t| t.value)
    }

    pub fn total_currency(&self) -> Option<&str> {
        self.total.as_ref().and_then(|t| t.currency.as_deref())
    }

    /// How many header fields were filled (out of the scalar ones).
    pub fn coverage(&self) -> (usize, usize) {
        let total = 9;
        let filled = [
            self.purchase_date.is_some(),
            self.purchase_time.is_some(),
            self.store_name.is_some(),
            self.address.is_some(),
            self.city.is_some(),
            self.country.is_some(),
            self.total_price().is_some(),
            self.total_currency().is_some(),
            self.payment_method.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }
}

/// Parse a money-ish string: `"1,50"`, `"€ 2.30"`, `"1.234,56"`, `"10%"`.
///
/// The last of `.`/`,` is taken as the decimal separator when both appear;
/// a lone separator repeated more than once is a thousands separator.
pub fn parse_amount(s: &str) -> Option<f64> {
    let re = Regex::new(r"-?\d+(?:[.,]\d+)*").ok()?;
    let raw = re.find(s)?.as_str();

    let normalized = match (raw.rfind('.'), raw.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => raw.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => raw.replace(',', ""),
        (None, Some(_)) if raw.matches(',').count() > 1 => raw.replace(',', ""),
        (None, Some(_)) => raw.replace(',', "."),
        (Some(_), None) if raw.matches('.').count() > 1 => raw.replace('.', ""),
        _ => raw.to_string(),
    };
    normalized.parse().ok()
}

fn value_to_f64<E: serde::de::Error>(v: Value) -> Result<Option<f64>, E> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => Ok(parse_amount(&s)),
        other => Err(E::custom(format!("expected a number, found {other}"))),
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    value_to_f64(Value::deserialize(d)?)
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(D::Error::custom(format!("expected text, found {other}"))),
    }
}

/// `prezzo_totale` is normally `{ "valore": .., "valuta": .. }` but models
/// also emit a bare number.
fn lenient_total<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TotalPrice>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        obj @ Value::Object(_) => TotalPrice::deserialize(obj).map(Some).map_err(D::Error::custom),
        scalar => Ok(Some(TotalPrice {
            value: value_to_f64(scalar)?,
            currency: None,
        })),
    }
}

fn lenient_items<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<ReceiptItem>, D::Error> {
    Ok(Option::<Vec<ReceiptItem>>::deserialize(d)?.unwrap_or_default())
}
