use std::sync::LazyLock;

use kidcat_core::{Gender, Specialization, StockStatus};
use regex::Regex;
use scraper::ElementRef;

use crate::dom::{has_class, selector, ProductPage};
use crate::fields::{dropdown_variants, swatch_variants, VariantOptions};
use crate::ScrapedProduct;

pub const APPAREL_LABELS: &[&str] = &[
    "clothing",
    "baby clothing",
    "kids clothing",
    "boys clothing",
    "girls clothing",
];
pub const TOY_LABELS: &[&str] = &["toys", "toys & gaming", "soft toys", "educational games"];
pub const DIAPER_LABELS: &[&str] = &["diapering", "diapers", "wet wipes"];

static AGE_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+[-\s]?\d*)\s*(years|months|yrs|mos)").expect("age group pattern")
});
static TOY_AGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+[-\s]?\d*)\s*(years|months|yrs|mos|\+)").expect("toy age pattern")
});
static MALE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(boys|boy|men|man)\b").expect("male pattern"));
static FEMALE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(girls|girl|women|woman)\b").expect("female pattern"));
static DIAPER_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(newborn|new born|nb|small|medium|large|xl|xxl|s|m|l)\b")
        .expect("diaper size pattern")
});
static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(pcs|pieces|pack|count)").expect("count pattern"));
static WEIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+[-\s]?\d*)\s*kg").expect("weight pattern"));

/// Pick the specialization from lower-cased breadcrumb labels. Sets are
/// checked apparel, toy, diaper; anything else is generic.
pub fn classify<S: AsRef<str>>(labels: &[S]) -> Specialization {
    let matches = |set: &[&str]| {
        labels
            .iter()
            .any(|label| set.contains(&label.as_ref().trim().to_lowercase().as_str()))
    };
    if matches(APPAREL_LABELS) {
        Specialization::Apparel
    } else if matches(TOY_LABELS) {
        Specialization::Toy
    } else if matches(DIAPER_LABELS) {
        Specialization::Diaper
    } else {
        Specialization::Generic
    }
}

/// Layer category-specific fields over an already extracted product.
pub fn extend(specialization: Specialization, page: &ProductPage, product: &mut ScrapedProduct) {
    match specialization {
        Specialization::Generic => {}
        Specialization::Apparel => extend_apparel(page, product),
        Specialization::Toy => extend_toy(product),
        Specialization::Diaper => extend_diaper(product),
    }
}

pub fn gender_from_name(name: &str) -> Gender {
    if MALE_RE.is_match(name) {
        Gender::Male
    } else if FEMALE_RE.is_match(name) {
        Gender::Female
    } else {
        Gender::Unisex
    }
}

fn labelled_colour_swatches(page: &ProductPage, colours: &mut VariantOptions) {
    let Some(swatch_sel) = selector(".swatch-option") else {
        return;
    };
    for label in page.select_all(".product-options-wrapper .swatch-attribute-label") {
        let text = label.text().collect::<String>().to_lowercase();
        if !text.contains("color") {
            continue;
        }
        let options = label
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| has_class(*el, "swatch-attribute-options"));
        let Some(options) = options else {
            continue;
        };
        for swatch in options.select(&swatch_sel) {
            if let Some(name) = swatch.value().attr("option-label") {
                colours.push(name, StockStatus::from_disabled(has_class(swatch, "disabled")));
            }
        }
    }
}

fn extend_apparel(page: &ProductPage, product: &mut ScrapedProduct) {
    labelled_colour_swatches(page, &mut product.colours);

    let mut sizes = VariantOptions::default();
    swatch_variants(page, ".swatch-attribute.size .swatch-option", "option-label", &mut sizes);
    dropdown_variants(page, &mut sizes);

    let details = &mut product.details;
    details.size_options = sizes.options;
    details.size_availability = sizes.availability;
    details.age_group = AGE_GROUP_RE
        .find(&product.name)
        .map(|m| m.as_str().to_string());
    details.gender = Some(gender_from_name(&product.name).as_str().to_string());
}

fn spec_value_where(product: &ScrapedProduct, needle: &str) -> Option<String> {
    product
        .specifications
        .iter()
        .find(|(key, _)| key.to_lowercase().contains(needle))
        .map(|(_, value)| value.clone())
}

fn extend_toy(product: &mut ScrapedProduct) {
    let from_text = std::iter::once(product.name.as_str())
        .chain(product.description.iter().map(String::as_str))
        .find_map(|text| TOY_AGE_RE.find(text))
        .map(|m| m.as_str().to_string());
    let age = from_text.or_else(|| spec_value_where(product, "age"));
    let material = spec_value_where(product, "material");

    product.details.age_recommendation = age;
    product.details.material = material;
}

fn extend_diaper(product: &mut ScrapedProduct) {
    let name = product.name.as_str();
    let mut size = DIAPER_SIZE_RE
        .find(name)
        .map(|m| m.as_str().to_uppercase());
    let mut count = COUNT_RE
        .captures(name)
        .and_then(|caps| caps[1].parse::<u32>().ok());
    let mut weight = WEIGHT_RE.find(name).map(|m| m.as_str().to_string());

    for (key, value) in &product.specifications {
        let key = key.to_lowercase();
        if key.contains("size") {
            if size.is_none() {
                size = Some(value.clone());
            }
        } else if key.contains("weight") {
            if weight.is_none() {
                weight = Some(value.clone());
            }
        } else if (key.contains("count") || key.contains("pieces"))
            && count.is_none()
            && !value.is_empty()
            && value.chars().all(|c| c.is_ascii_digit())
        {
            count = value.parse::<u32>().ok();
        }
    }

    product.details.size = size;
    product.details.count = count;
    product.details.weight_range = weight;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kidcat_core::Specifications;

    fn product(name: &str) -> ScrapedProduct {
        ScrapedProduct {
            name: name.to_string(),
            ..ScrapedProduct::empty("https://kiddoz.lk/item.html")
        }
    }

    #[test]
    fn classifier_checks_apparel_before_toy_before_diaper() {
        assert_eq!(classify(&["home", "toys", "baby clothing"]), Specialization::Apparel);
        assert_eq!(classify(&["diapers", "soft toys"]), Specialization::Toy);
        assert_eq!(classify(&["Wet Wipes"]), Specialization::Diaper);
    }

    #[test]
    fn classifier_is_total_and_exact() {
        let empty: [&str; 0] = [];
        assert_eq!(classify(&empty), Specialization::Generic);
        assert_eq!(classify(&["toy cars", "clothings"]), Specialization::Generic);
        assert_eq!(classify(&["feeding", "strollers"]), Specialization::Generic);
    }

    #[test]
    fn gender_is_read_from_whole_words() {
        assert_eq!(gender_from_name("Boys Denim Shorts"), Gender::Male);
        assert_eq!(gender_from_name("Girl's Party Dress"), Gender::Female);
        assert_eq!(gender_from_name("Manchester Romper"), Gender::Unisex);
    }

    #[test]
    fn toy_age_prefers_name_then_description_then_specs() {
        let mut p = product("Stacking Rings 3+");
        extend_toy(&mut p);
        assert_eq!(p.details.age_recommendation.as_deref(), Some("3+"));

        let mut p = product("Stacking Rings");
        p.description = vec!["Colourful".into(), "Suitable for 18 months and up".into()];
        extend_toy(&mut p);
        assert_eq!(p.details.age_recommendation.as_deref(), Some("18 months"));

        let mut p = product("Stacking Rings");
        let mut specs = Specifications::new();
        specs.insert("Recommended Age".into(), "Toddler".into());
        specs.insert("Material".into(), "Wood".into());
        p.specifications = specs;
        extend_toy(&mut p);
        assert_eq!(p.details.age_recommendation.as_deref(), Some("Toddler"));
        assert_eq!(p.details.material.as_deref(), Some("Wood"));
    }

    #[test]
    fn diaper_fields_come_from_name_with_spec_fallback() {
        let mut p = product("Huggies Dry Medium 6-11 kg 52 pcs");
        extend_diaper(&mut p);
        assert_eq!(p.details.size.as_deref(), Some("MEDIUM"));
        assert_eq!(p.details.weight_range.as_deref(), Some("6-11 kg"));
        assert_eq!(p.details.count, Some(52));

        let mut p = product("Huggies Dry");
        let mut specs = Specifications::new();
        specs.insert("Diaper Size".into(), "4".into());
        specs.insert("Piece Count".into(), "about 40".into());
        specs.insert("Baby Weight".into(), "9-14 kg".into());
        p.specifications = specs;
        extend_diaper(&mut p);
        assert_eq!(p.details.size.as_deref(), Some("4"));
        assert_eq!(p.details.count, None);
        assert_eq!(p.details.weight_range.as_deref(), Some("9-14 kg"));
    }
}
