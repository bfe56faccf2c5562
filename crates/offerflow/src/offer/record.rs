//! The structured offer record produced by the extraction step.
//!
//! Model output is loose: numbers arrive as strings with decimal commas, ranges arrive
//! as arrays in either order, and sections are sometimes `null`. Deserialization here is
//! lenient on all of that; anything unusable becomes `None` rather than an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRecord {
    #[serde(default, deserialize_with = "lenient_section")]
    pub supplier: Party,
    #[serde(default, deserialize_with = "lenient_section")]
    pub customer: Customer,
    #[serde(default, deserialize_with = "lenient_string")]
    pub offer_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub offer_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub offer_details: OfferDetails,
    #[serde(default, deserialize_with = "lenient_list")]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDetails {
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub delivery_terms: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub delivery_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub payment_terms: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_quantity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name_of_product: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub material: Option<String>,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub thickness: Option<Dimension>,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub width: Option<Dimension>,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub length: Option<Dimension>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub grade: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub surface: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub metal_coating: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub paint_coating: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub manufacturer: Option<String>,
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: Option<Price>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
}

/// A bare number in model output is taken as the net price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default, deserialize_with = "lenient_number")]
    pub net: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub gross: Option<f64>,
}

/// A product dimension in millimetres: one value or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Single(f64),
    Range { min: f64, max: f64 },
}

impl Dimension {
    /// Builds a range, swapping the bounds when given in reverse.
    pub fn range(a: f64, b: f64) -> Self {
        if a <= b {
            Dimension::Range { min: a, max: b }
        } else {
            Dimension::Range { min: b, max: a }
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let numbers: Vec<f64> = items.iter().filter_map(number_from_value).collect();
                match numbers.as_slice() {
                    [single] => Some(Dimension::Single(*single)),
                    [a, b] if a == b => Some(Dimension::Single(*a)),
                    [a, b] => Some(Dimension::range(*a, *b)),
                    _ => None,
                }
            }
            Value::String(s) => {
                // "280-300" or "280 - 300"; a leading '-' is a sign, not a separator.
                let trimmed = s.trim();
                match trimmed.get(1..).and_then(|rest| rest.find('-')) {
                    Some(pos) => {
                        let (a, b) = trimmed.split_at(pos + 1);
                        match (parse_number(a), parse_number(&b[1..])) {
                            (Some(a), Some(b)) => Some(Dimension::range(a, b)),
                            _ => None,
                        }
                    }
                    None => parse_number(trimmed).map(Dimension::Single),
                }
            }
            other => number_from_value(other).map(Dimension::Single),
        }
    }

    fn clean(self) -> Option<Self> {
        match self {
            Dimension::Single(v) if v.is_finite() => Some(self),
            Dimension::Range { min, max } if min.is_finite() && max.is_finite() => {
                Some(Dimension::range(min, max))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::Single(v) => write!(f, "{}", v),
            Dimension::Range { min, max } => write!(f, "{}-{}", min, max),
        }
    }
}

impl Serialize for Dimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Dimension::Single(v) => serializer.serialize_f64(*v),
            Dimension::Range { min, max } => [*min, *max].serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Dimension::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("not a dimension: {}", value)))
    }
}

impl OfferRecord {
    /// Normalizes the record before it is written or exported: strings trimmed, blanks
    /// and non-finite numbers dropped, ranges ordered, empty products removed.
    pub fn clean(mut self) -> Self {
        clean_string(&mut self.supplier.name);
        clean_string(&mut self.supplier.location);
        clean_string(&mut self.supplier.contact);
        clean_string(&mut self.customer.name);
        clean_string(&mut self.customer.location);
        clean_string(&mut self.offer_number);
        clean_string(&mut self.offer_date);

        let details = &mut self.offer_details;
        clean_string(&mut details.currency);
        clean_string(&mut details.delivery_terms);
        clean_string(&mut details.delivery_date);
        clean_string(&mut details.payment_terms);
        clean_number(&mut details.total_quantity);

        self.products = self
            .products
            .into_iter()
            .map(Product::clean)
            .filter(|p| *p != Product::default())
            .collect();
        self
    }

    /// Supplier name, or `None` when the model found none.
    pub fn supplier_name(&self) -> Option<&str> {
        self.supplier.name.as_deref()
    }
}

impl Product {
    fn clean(mut self) -> Self {
        for field in [
            &mut self.name_of_product,
            &mut self.material,
            &mut self.grade,
            &mut self.surface,
            &mut self.metal_coating,
            &mut self.paint_coating,
            &mut self.manufacturer,
        ] {
            clean_string(field);
        }
        for dim in [&mut self.thickness, &mut self.width, &mut self.length] {
            *dim = dim.and_then(Dimension::clean);
        }
        if let Some(price) = self.price.as_mut() {
            clean_number(&mut price.net);
            clean_number(&mut price.gross);
        }
        if self.price == Some(Price::default()) {
            self.price = None;
        }
        clean_number(&mut self.quantity);
        self
    }
}

fn clean_string(field: &mut Option<String>) {
    *field = field
        .take()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
}

fn clean_number(field: &mut Option<f64>) {
    *field = field.filter(|n| n.is_finite());
}

/// Accepts `12`, `12.5`, `"1,5"`, `"1 250,00"`, `"1,250.00"`.
fn parse_number(s: &str) -> Option<f64> {
    let compact: String = s
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if compact.is_empty() {
        return None;
    }
    let normalized = if compact.contains('.') && compact.contains(',') {
        compact.replace(',', "")
    } else {
        compact.replace(',', ".")
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|n| n.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(number_from_value(&Value::deserialize(deserializer)?))
}

fn lenient_dimension<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Dimension>, D::Error> {
    Ok(Dimension::from_value(&Value::deserialize(deserializer)?))
}

fn lenient_price<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Price>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(_) => serde_json::from_value::<Price>(value)
            .ok()
            .filter(|p| *p != Price::default()),
        other => number_from_value(&other).map(|net| Price {
            net: Some(net),
            gross: None,
        }),
    })
}

fn lenient_section<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
        _ => T::default(),
    })
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
