use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Product as returned by the search endpoint. Only `productId` and the
/// items' `itemId` are interpreted; everything else is carried through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    #[serde(deserialize_with = "id_string")]
    pub product_id: String,
    #[serde(default)]
    pub items: Vec<SkuItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuItem {
    #[serde(deserialize_with = "id_string")]
    pub item_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProductRecord {
    pub fn new<I, S>(product_id: impl Into<String>, sku_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            product_id: product_id.into(),
            items: sku_ids
                .into_iter()
                .map(|id| SkuItem {
                    item_id: id.into(),
                    extra: Map::new(),
                })
                .collect(),
            extra: Map::new(),
        }
    }

    pub fn sku_ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.item_id.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

// The endpoint sends ids as strings, hand-written fixtures often use numbers.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
