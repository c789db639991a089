//! Canonical product schema and per-format field tables
//!
//! Every feed format is normalized into [`CanonicalRecord`], a fixed set of
//! sixteen optional product fields. A [`FormatMapping`] names, for one format,
//! the native field that feeds each canonical field. An entry with no native
//! name means the format has no equivalent and the canonical field is never
//! populated from it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One source entity (delimited row or XML record element) keyed by native field name
///
/// Transient: raw records only live between the parser and the mapper.
pub type RawRecord = HashMap<String, String>;

// ============================================================================
// Canonical fields
// ============================================================================

/// Field names of the canonical product schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Id,
    Title,
    SkuNumber,
    Url,
    ImageUrl,
    BuyUrl,
    Description,
    Discount,
    DiscountType,
    Currency,
    RetailPrice,
    SalePrice,
    Brand,
    Manufacture,
    Shipping,
    Availability,
}

impl CanonicalField {
    /// All canonical fields in schema order
    pub const ALL: [CanonicalField; 16] = [
        CanonicalField::Id,
        CanonicalField::Title,
        CanonicalField::SkuNumber,
        CanonicalField::Url,
        CanonicalField::ImageUrl,
        CanonicalField::BuyUrl,
        CanonicalField::Description,
        CanonicalField::Discount,
        CanonicalField::DiscountType,
        CanonicalField::Currency,
        CanonicalField::RetailPrice,
        CanonicalField::SalePrice,
        CanonicalField::Brand,
        CanonicalField::Manufacture,
        CanonicalField::Shipping,
        CanonicalField::Availability,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::Id => "id",
            CanonicalField::Title => "title",
            CanonicalField::SkuNumber => "sku_number",
            CanonicalField::Url => "url",
            CanonicalField::ImageUrl => "image_url",
            CanonicalField::BuyUrl => "buy_url",
            CanonicalField::Description => "description",
            CanonicalField::Discount => "discount",
            CanonicalField::DiscountType => "discount_type",
            CanonicalField::Currency => "currency",
            CanonicalField::RetailPrice => "retail_price",
            CanonicalField::SalePrice => "sale_price",
            CanonicalField::Brand => "brand",
            CanonicalField::Manufacture => "manufacture",
            CanonicalField::Shipping => "shipping",
            CanonicalField::Availability => "availability",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("Unknown canonical field: {}", s))
    }
}

// ============================================================================
// Canonical record
// ============================================================================

/// A product normalized to the canonical schema
///
/// Absent fields mean "no data": they are skipped on serialization rather
/// than written as null, so stored documents only carry the keys the source
/// actually provided.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retail_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
}

impl CanonicalRecord {
    fn slot(&self, field: CanonicalField) -> &Option<String> {
        match field {
            CanonicalField::Id => &self.id,
            CanonicalField::Title => &self.title,
            CanonicalField::SkuNumber => &self.sku_number,
            CanonicalField::Url => &self.url,
            CanonicalField::ImageUrl => &self.image_url,
            CanonicalField::BuyUrl => &self.buy_url,
            CanonicalField::Description => &self.description,
            CanonicalField::Discount => &self.discount,
            CanonicalField::DiscountType => &self.discount_type,
            CanonicalField::Currency => &self.currency,
            CanonicalField::RetailPrice => &self.retail_price,
            CanonicalField::SalePrice => &self.sale_price,
            CanonicalField::Brand => &self.brand,
            CanonicalField::Manufacture => &self.manufacture,
            CanonicalField::Shipping => &self.shipping,
            CanonicalField::Availability => &self.availability,
        }
    }

    fn slot_mut(&mut self, field: CanonicalField) -> &mut Option<String> {
        match field {
            CanonicalField::Id => &mut self.id,
            CanonicalField::Title => &mut self.title,
            CanonicalField::SkuNumber => &mut self.sku_number,
            CanonicalField::Url => &mut self.url,
            CanonicalField::ImageUrl => &mut self.image_url,
            CanonicalField::BuyUrl => &mut self.buy_url,
            CanonicalField::Description => &mut self.description,
            CanonicalField::Discount => &mut self.discount,
            CanonicalField::DiscountType => &mut self.discount_type,
            CanonicalField::Currency => &mut self.currency,
            CanonicalField::RetailPrice => &mut self.retail_price,
            CanonicalField::SalePrice => &mut self.sale_price,
            CanonicalField::Brand => &mut self.brand,
            CanonicalField::Manufacture => &mut self.manufacture,
            CanonicalField::Shipping => &mut self.shipping,
            CanonicalField::Availability => &mut self.availability,
        }
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set(&mut self, field: CanonicalField, value: impl Into<String>) {
        *self.slot_mut(field) = Some(value.into());
    }

    /// Upsert key
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Present fields in schema order
    pub fn fields(&self) -> impl Iterator<Item = (CanonicalField, &str)> + '_ {
        CanonicalField::ALL
            .into_iter()
            .filter_map(move |field| self.get(field).map(|value| (field, value)))
    }

    pub fn len(&self) -> usize {
        self.fields().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Format mappings
// ============================================================================

/// Translation table from canonical field to one format's native field name
#[derive(Debug)]
pub struct FormatMapping {
    entries: [(CanonicalField, Option<&'static str>); 16],
}

impl FormatMapping {
    /// Native field feeding `field`, or `None` when the format has no equivalent
    pub fn native_name(&self, field: CanonicalField) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(canonical, _)| *canonical == field)
            .and_then(|(_, native)| *native)
    }

    /// All entries in schema order, including the unmapped ones
    pub fn entries(&self) -> impl Iterator<Item = (CanonicalField, Option<&'static str>)> + '_ {
        self.entries.iter().copied()
    }

    /// Canonical fields this format can never populate
    pub fn unmapped(&self) -> impl Iterator<Item = CanonicalField> + '_ {
        self.entries()
            .filter(|(_, native)| native.is_none())
            .map(|(field, _)| field)
    }
}

/// Field table for the pipe-delimited product feed
pub static DELIMITED_MAPPING: FormatMapping = FormatMapping {
    entries: [
        (CanonicalField::Id, Some("product_id")),
        (CanonicalField::Title, Some("product_name")),
        (CanonicalField::SkuNumber, Some("sku_number")),
        (CanonicalField::Url, Some("product_url")),
        (CanonicalField::ImageUrl, Some("product_image_url")),
        (CanonicalField::BuyUrl, Some("buy_url")),
        (CanonicalField::Description, Some("long_product_description")),
        (CanonicalField::Discount, Some("discount")),
        (CanonicalField::DiscountType, Some("discount_type")),
        (CanonicalField::Currency, Some("currency")),
        (CanonicalField::RetailPrice, Some("retail_price")),
        (CanonicalField::SalePrice, Some("sale_price")),
        (CanonicalField::Brand, Some("brand")),
        (CanonicalField::Manufacture, Some("manufacture_name")),
        (CanonicalField::Shipping, Some("shipping")),
        (CanonicalField::Availability, Some("availability")),
    ],
};

/// Field table for the XML product feed
pub static XML_MAPPING: FormatMapping = FormatMapping {
    entries: [
        (CanonicalField::Id, Some("item_unique_id")),
        (CanonicalField::Title, Some("item_title")),
        (CanonicalField::SkuNumber, Some("item_sku")),
        (CanonicalField::Url, Some("item_page_url")),
        (CanonicalField::ImageUrl, Some("item_image_url")),
        (CanonicalField::BuyUrl, Some("offer_page_url")),
        (CanonicalField::Description, Some("book_size_description")),
        (CanonicalField::Discount, None),
        (CanonicalField::DiscountType, None),
        (CanonicalField::Currency, None),
        (CanonicalField::RetailPrice, Some("item_price")),
        (CanonicalField::SalePrice, Some("list_price")),
        (CanonicalField::Brand, Some("item_seller")),
        (CanonicalField::Manufacture, Some("item_platform")),
        (CanonicalField::Shipping, Some("item_shipping_charge")),
        (CanonicalField::Availability, Some("amzn_sales_restriction")),
    ],
};

// ============================================================================
// Native format constants
// ============================================================================

/// Ordered column names of the headerless pipe-delimited feed
pub const DELIMITED_COLUMNS: [&str; 38] = [
    "product_id",
    "product_name",
    "sku_number",
    "primary_category",
    "secondary_category",
    "product_url",
    "product_image_url",
    "buy_url",
    "short_product_description",
    "long_product_description",
    "discount",
    "discount_type",
    "sale_price",
    "retail_price",
    "begin_date",
    "end_date",
    "brand",
    "shipping",
    "keywords",
    "manufacture_part_number",
    "manufacture_name",
    "shipping_information",
    "availability",
    "universal_product_code",
    "class_id",
    "currency",
    "m1",
    "pixel",
    "miscellaneous_attribute",
    "attribute_2",
    "attribute_3",
    "attribute_4",
    "attribute_5",
    "attribute_6",
    "attribute_7",
    "attribute_8",
    "attribute_9",
    "attribute_10",
];

pub const DELIMITER: u8 = b'|';

/// Cell contents treated as a missing value in delimited feeds
pub const MISSING_CELL_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Element whose close produces one XML record
pub const XML_RECORD_TAG: &str = "item_basic_data";
