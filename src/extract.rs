//! Template-driven field extraction from listing notification text.
//!
//! Every field is extracted independently: a pattern that misses leaves its
//! own slot empty and never blocks the others. Forwarded or reformatted
//! notification mail routinely drops one or two fields.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::Serialize;

use crate::template::Template;

/// An event extracted from one message. Absent fields are `None`, never empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedEvent {
    /// Label copied from the matched template.
    pub trigger: String,
    pub price: Option<String>,
    pub bedrooms: Option<String>,
    pub bathrooms: Option<String>,
    pub sqft: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub listing_url: Option<String>,
    pub price_change: Option<String>,
    pub timestamp: Option<String>,
    pub image_urls: BTreeSet<String>,
    /// Template fields without a dedicated slot.
    pub extra: BTreeMap<String, Option<String>>,
}

impl ExtractedEvent {
    /// Value of a named scalar field, whether it has a dedicated slot or not.
    pub fn field(&self, name: &str) -> Option<&str> {
        let slot = match name {
            "price" => &self.price,
            "bedrooms" => &self.bedrooms,
            "bathrooms" => &self.bathrooms,
            "sqft" => &self.sqft,
            "street_address" => &self.street_address,
            "city" => &self.city,
            "state" => &self.state,
            "zip_code" => &self.zip_code,
            "listing_url" => &self.listing_url,
            "price_change" => &self.price_change,
            "timestamp" => &self.timestamp,
            other => return self.extra.get(other).and_then(|v| v.as_deref()),
        };
        slot.as_deref()
    }

    fn set_field(&mut self, name: &str, value: Option<String>) {
        let slot = match name {
            "price" => &mut self.price,
            "bedrooms" => &mut self.bedrooms,
            "bathrooms" => &mut self.bathrooms,
            "sqft" => &mut self.sqft,
            "street_address" => &mut self.street_address,
            "city" => &mut self.city,
            "state" => &mut self.state,
            "zip_code" => &mut self.zip_code,
            "price_change" => &mut self.price_change,
            "timestamp" => &mut self.timestamp,
            other => {
                self.extra.insert(other.to_string(), value);
                return;
            }
        };
        *slot = value;
    }
}

/// The text patterns are applied to: subject, newline, body.
pub fn message_text(subject: &str, body: &str) -> String {
    format!("{subject}\n{body}")
}

/// Extract a structured event from `text` using `template`.
///
/// Never fails: the template was validated at compile time, and every miss is
/// recorded as `None`.
pub fn extract(text: &str, template: &Template) -> ExtractedEvent {
    let mut event = ExtractedEvent {
        trigger: template.trigger_label().to_string(),
        ..Default::default()
    };

    for (name, re) in template.field_patterns() {
        event.set_field(name, first_group(re, text));
    }

    event.listing_url = re_whole_match(template.listing_url_pattern(), text);

    if let Some(caps) = template.complete_address_pattern().captures(text) {
        let group = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        };
        event.street_address = group(1);
        event.city = group(2);
        event.state = group(3);
        event.zip_code = group(4);
    }

    event.image_urls = collect_images(text, template.image_url_pattern());
    event
}

/// Every non-overlapping image URL match, deduplicated.
///
/// When the pattern declares capture groups the first group is the URL,
/// otherwise the whole match is.
pub fn collect_images(text: &str, pattern: &Regex) -> BTreeSet<String> {
    let grouped = pattern.captures_len() > 1;
    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let m = if grouped { caps.get(1) } else { caps.get(0) };
            m.map(|m| m.as_str().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn first_group(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

fn re_whole_match(re: &Regex, text: &str) -> Option<String> {
    re.find(text)
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::{new_listing_def, price_drop_def};
    use crate::template::{Template, TemplateDef};

    const BODY: &str = "\
123 Main St, Springfield, IL 62704
Listed at $450,000
3 bd | 2.5 ba | 1,850 sq ft
https://img.example-homes.com/p/1/front.jpg
https://img.example-homes.com/p/1/kitchen.jpg
https://img.example-homes.com/p/1/front.jpg
View listing: https://www.example-homes.com/listing/98765
";

    fn template(def: TemplateDef) -> Template {
        Template::compile(&def).unwrap()
    }

    #[test]
    fn extracts_all_fields() {
        let t = template(new_listing_def());
        let text = message_text("New Listing: 123 Main St", BODY);
        let ev = extract(&text, &t);

        assert_eq!(ev.trigger, "new listing");
        assert_eq!(ev.price.as_deref(), Some("450,000"));
        assert_eq!(ev.bedrooms.as_deref(), Some("3"));
        assert_eq!(ev.bathrooms.as_deref(), Some("2.5"));
        assert_eq!(ev.sqft.as_deref(), Some("1,850"));
        assert_eq!(ev.street_address.as_deref(), Some("123 Main St"));
        assert_eq!(ev.city.as_deref(), Some("Springfield"));
        assert_eq!(ev.state.as_deref(), Some("IL"));
        assert_eq!(ev.zip_code.as_deref(), Some("62704"));
        assert_eq!(
            ev.listing_url.as_deref(),
            Some("https://www.example-homes.com/listing/98765")
        );
        assert_eq!(ev.image_urls.len(), 2);
    }

    #[test]
    fn one_missing_field_leaves_others_intact() {
        let t = template(new_listing_def());
        let full = extract(&message_text("New Listing", BODY), &t);

        let without_sqft = BODY.replace("1,850 sq ft", "");
        let partial = extract(&message_text("New Listing", &without_sqft), &t);

        assert_eq!(partial.sqft, None);
        assert_eq!(partial.price, full.price);
        assert_eq!(partial.bedrooms, full.bedrooms);
        assert_eq!(partial.bathrooms, full.bathrooms);
        assert_eq!(partial.street_address, full.street_address);
        assert_eq!(partial.listing_url, full.listing_url);
        assert_eq!(partial.image_urls, full.image_urls);
    }

    #[test]
    fn captured_values_are_kept_verbatim() {
        let mut def = new_listing_def();
        def.patterns.insert("price".into(), r"Price:([^\n]*)".into());
        def.patterns.insert(
            "complete_address".into(),
            r"^(\d+[^,\n]+),([^,\n]+),\s*([A-Z]{2})\s+(\d{5})".into(),
        );
        let ev = extract("12 Oak Rd , Dayton, OH 45402\nPrice: $9 ", &template(def));
        assert_eq!(ev.price.as_deref(), Some(" $9 "));
        assert_eq!(ev.street_address.as_deref(), Some("12 Oak Rd "));
        assert_eq!(ev.city.as_deref(), Some(" Dayton"));
    }

    #[test]
    fn address_miss_clears_all_four_parts() {
        let t = template(new_listing_def());
        let ev = extract(&message_text("New Listing", "Listed at $1"), &t);
        assert_eq!(ev.street_address, None);
        assert_eq!(ev.city, None);
        assert_eq!(ev.state, None);
        assert_eq!(ev.zip_code, None);
        assert_eq!(ev.price.as_deref(), Some("1"));
    }

    #[test]
    fn listing_url_is_whole_match() {
        let t = template(new_listing_def());
        let ev = extract("see https://www.example-homes.com/listing/42 now", &t);
        assert_eq!(
            ev.listing_url.as_deref(),
            Some("https://www.example-homes.com/listing/42")
        );
    }

    #[test]
    fn listing_url_with_group_still_uses_whole_match() {
        let mut def = new_listing_def();
        def.patterns.insert(
            "listing_url".into(),
            r"https://www\.example-homes\.com/listing/(\d+)".into(),
        );
        let ev = extract("https://www.example-homes.com/listing/7", &template(def));
        assert_eq!(
            ev.listing_url.as_deref(),
            Some("https://www.example-homes.com/listing/7")
        );
    }

    #[test]
    fn unknown_fields_go_to_extra() {
        let mut def = new_listing_def();
        def.patterns.insert("mls_number".into(), r"MLS#\s*(\w+)".into());
        def.patterns.insert("hoa".into(), r"HOA \$(\d+)".into());
        let ev = extract("MLS# A1B2", &template(def));
        assert_eq!(ev.field("mls_number"), Some("A1B2"));
        assert_eq!(ev.extra.get("hoa"), Some(&None));
    }

    #[test]
    fn price_change_slot_is_filled() {
        let ev = extract(
            "Price reduced by $25,000 on 9 Elm Ave. Now $400,000",
            &template(price_drop_def()),
        );
        assert_eq!(ev.trigger, "price drop");
        assert_eq!(ev.price_change.as_deref(), Some("25,000"));
        assert_eq!(ev.field("price_change"), Some("25,000"));
    }

    #[test]
    fn collect_images_dedups() {
        let re = Regex::new(r"https://img\.example\.com/\w+\.jpg").unwrap();
        let text = "https://img.example.com/a.jpg and https://img.example.com/a.jpg";
        let set = collect_images(text, &re);
        assert_eq!(set.len(), 1);
        assert!(set.contains("https://img.example.com/a.jpg"));
    }

    #[test]
    fn collect_images_uses_first_group_when_present() {
        let re = Regex::new(r#"<img src="([^"]+)""#).unwrap();
        let text = r#"<img src="https://a/1.png"> <img src="https://a/2.png">"#;
        let set = collect_images(text, &re);
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["https://a/1.png".to_string(), "https://a/2.png".to_string()]
        );
    }

    #[test]
    fn collect_images_empty_when_none() {
        let re = Regex::new(r"https://img\.example\.com/\w+\.jpg").unwrap();
        assert!(collect_images("no pictures here", &re).is_empty());
    }
}
