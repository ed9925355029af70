//! Room and add-on catalog.
//!
//! Built once from [`CatalogConfig`] and shared immutably. Owns everything
//! price-shaped: room rates, the keyword-to-add-on alias table, add-on
//! prices, the cash deposit, and booking id minting.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::config::CatalogConfig;

#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    /// Nightly rate in whole currency units.
    pub rate: i64,
}

/// One aggregated line of an add-on cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub key: String,
    pub label: String,
    pub unit_price: i64,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> i64 {
        self.unit_price * self.quantity as i64
    }
}

/// Result of pricing a list of requested add-ons.
#[derive(Debug, Clone, Default)]
pub struct PricedCart {
    pub lines: Vec<CartLine>,
    /// Requested items that are free for guests.
    pub complimentary: Vec<String>,
    /// Requested items the catalog does not know.
    pub unknown: Vec<String>,
    /// Sum of all billable lines, whole currency units.
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    rooms: Vec<Room>,
    /// (lowercase keyword, canonical key), longest keyword first so
    /// "walking safari" wins over "safari" on the same span.
    aliases: Vec<(String, String)>,
    extras: BTreeMap<String, i64>,
    complimentary: HashSet<String>,
    currency: String,
    booking_prefix: String,
    deposit: i64,
    nights_min: u32,
    nights_max: u32,
}

impl Catalog {
    pub fn from_config(config: &CatalogConfig) -> Self {
        let mut aliases: Vec<(String, String)> = config
            .addons
            .aliases
            .iter()
            .map(|(keyword, key)| (keyword.to_lowercase(), key.clone()))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            rooms: config
                .rooms
                .iter()
                .map(|r| Room {
                    name: r.name.clone(),
                    rate: r.rate,
                })
                .collect(),
            aliases,
            extras: config.addons.extras.clone(),
            complimentary: config.addons.complimentary.iter().cloned().collect(),
            currency: config.currency.clone(),
            booking_prefix: config.booking_prefix.clone(),
            deposit: config.deposit,
            nights_min: config.nights.min,
            nights_max: config.nights.max,
        }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room by 1-based menu position.
    pub fn room_by_choice(&self, choice: usize) -> Option<&Room> {
        if choice == 0 {
            return None;
        }
        self.rooms.get(choice - 1)
    }

    /// Nightly rate, matched case-insensitively.
    pub fn rate(&self, room_type: &str) -> Option<i64> {
        self.rooms
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(room_type.trim()))
            .map(|r| r.rate)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn deposit(&self) -> i64 {
        self.deposit
    }

    pub fn nights_range(&self) -> (u32, u32) {
        (self.nights_min, self.nights_max)
    }

    pub fn nights_valid(&self, nights: u32) -> bool {
        nights >= self.nights_min && nights <= self.nights_max
    }

    /// Numbered room menu for reply text.
    pub fn room_menu(&self) -> String {
        let currency = self.currency.to_uppercase();
        self.rooms
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {} ({} {}/night)", i + 1, r.name, r.rate, currency))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Scan free text for add-on keywords and return canonical keys, in
    /// order of appearance, one entry per occurrence. Matched spans are
    /// consumed so "walking safari" does not additionally count as "safari".
    pub fn find_addons(&self, text: &str) -> Vec<String> {
        let mut remaining = text.to_lowercase();
        let mut found: Vec<(usize, String)> = Vec::new();
        for (keyword, key) in &self.aliases {
            let mut search_from = 0;
            while let Some(rel) = remaining[search_from..].find(keyword.as_str()) {
                let pos = search_from + rel;
                found.push((pos, key.clone()));
                let blank = "\u{0}".repeat(keyword.len());
                remaining.replace_range(pos..pos + keyword.len(), &blank);
                search_from = pos + keyword.len();
            }
        }
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, key)| key).collect()
    }

    /// Resolve one raw item name (canonical key, display label, or alias
    /// keyword) to its canonical key.
    pub fn resolve_key(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim().to_lowercase();
        if trimmed.is_empty() {
            return None;
        }
        if self.extras.contains_key(&trimmed) || self.complimentary.contains(&trimmed) {
            return Some(trimmed);
        }
        let underscored = trimmed.replace(' ', "_");
        if self.extras.contains_key(&underscored) || self.complimentary.contains(&underscored) {
            return Some(underscored);
        }
        self.aliases
            .iter()
            .find(|(keyword, _)| *keyword == trimmed)
            .map(|(_, key)| key.clone())
    }

    /// Aggregate, classify and price requested add-ons. Repeats of the same
    /// item raise the line quantity; complimentary and unknown items never
    /// produce a billable line.
    pub fn price_extras(&self, items: &[String]) -> PricedCart {
        let mut counts: Vec<(String, u32)> = Vec::new();
        let mut cart = PricedCart::default();
        for raw in items {
            let Some(key) = self.resolve_key(raw) else {
                if !cart.unknown.contains(raw) {
                    cart.unknown.push(raw.clone());
                }
                continue;
            };
            if self.complimentary.contains(&key) {
                let label = self.display_name(&key);
                if !cart.complimentary.contains(&label) {
                    cart.complimentary.push(label);
                }
                continue;
            }
            match counts.iter_mut().find(|(k, _)| *k == key) {
                Some((_, n)) => *n += 1,
                None => counts.push((key, 1)),
            }
        }
        for (key, quantity) in counts {
            let unit_price = self.extras.get(&key).copied().unwrap_or(0);
            cart.total += unit_price * quantity as i64;
            cart.lines.push(CartLine {
                label: self.display_name(&key),
                key,
                unit_price,
                quantity,
            });
        }
        cart
    }

    pub fn display_name(&self, key: &str) -> String {
        key.replace('_', " ")
    }

    /// Mint a booking id: prefix, UTC date, six hex characters.
    pub fn mint_booking_id(&self) -> String {
        let date = Utc::now().format("%Y%m%d");
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(6)
            .collect::<String>()
            .to_uppercase();
        format!("{}{}{}", self.booking_prefix, date, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::from_config(&CatalogConfig::default())
    }

    #[test]
    fn room_lookup_by_choice_and_name() {
        let cat = catalog();
        assert_eq!(cat.room_by_choice(1).unwrap().name, "Safari Tent");
        assert_eq!(cat.room_by_choice(5).unwrap().name, "Family Room");
        assert!(cat.room_by_choice(0).is_none());
        assert!(cat.room_by_choice(6).is_none());
        assert_eq!(cat.rate("safari tent"), Some(12000));
        assert_eq!(cat.rate("SUITE"), Some(34000));
        assert_eq!(cat.rate("Igloo"), None);
    }

    #[test]
    fn finds_addons_in_order_of_mention() {
        let cat = catalog();
        let found = cat.find_addons("Could I get a massage and then a game drive?");
        assert_eq!(found, vec!["spa".to_string(), "game_drive".to_string()]);
    }

    #[test]
    fn longest_alias_wins_on_overlap() {
        let cat = catalog();
        // "walking safari" must not additionally match the "safari" alias.
        assert_eq!(
            cat.find_addons("book me a walking safari"),
            vec!["walking_safari".to_string()]
        );
        assert_eq!(cat.find_addons("a safari please"), vec!["game_drive".to_string()]);
    }

    #[test]
    fn repeated_mentions_aggregate_quantity() {
        let cat = catalog();
        let found = cat.find_addons("one brownie now and another brownie later");
        assert_eq!(found.len(), 2);
        let cart = cat.price_extras(&found);
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].key, "brownie");
        assert_eq!(cart.lines[0].quantity, 2);
        assert_eq!(cart.total, 900);
    }

    #[test]
    fn complimentary_items_are_never_billed() {
        let cat = catalog();
        let cart = cat.price_extras(&["spa".to_string(), "morning_coffee".to_string()]);
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.total, 4500);
        assert_eq!(cart.complimentary, vec!["morning coffee".to_string()]);
    }

    #[test]
    fn unknown_items_are_reported_not_priced() {
        let cat = catalog();
        let cart = cat.price_extras(&["jetski".to_string()]);
        assert!(cart.lines.is_empty());
        assert_eq!(cart.total, 0);
        assert_eq!(cart.unknown, vec!["jetski".to_string()]);
    }

    #[test]
    fn resolves_labels_and_aliases_to_keys() {
        let cat = catalog();
        assert_eq!(cat.resolve_key("spa"), Some("spa".to_string()));
        assert_eq!(cat.resolve_key("Hot Air Balloon"), Some("hot_air_balloon".to_string()));
        assert_eq!(cat.resolve_key("massage"), Some("spa".to_string()));
        assert_eq!(cat.resolve_key("jetski"), None);
    }

    #[test]
    fn booking_id_format() {
        let cat = catalog();
        let id = cat.mint_booking_id();
        assert!(id.starts_with("STAY"));
        assert_eq!(id.len(), 4 + 8 + 6);
        let date = &id[4..12];
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        let suffix = &id[12..];
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn menu_lists_every_room_numbered() {
        let cat = catalog();
        let menu = cat.room_menu();
        assert!(menu.contains("1. Safari Tent (12000 INR/night)"));
        assert!(menu.contains("5. Family Room (27500 INR/night)"));
    }
}
