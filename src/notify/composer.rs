use chrono::{DateTime, Utc};

use crate::aggregator::{convert_currency, find_biggest_drop, find_cheapest, percent_change};
use crate::config::digest_limits::{MAX_SECTIONS, SECTION_BODY_MAX, SECTION_NAME_MAX};
use crate::config::colors;
use crate::rates::RateTable;
use crate::sparkline;
use crate::types::{MarketQuote, Notification, ProductUpdate, Section, Severity};

/// Zero-width space: the webhook target rejects empty section names.
const BLANK_NAME: &str = "\u{200b}";

/// Builds outbound notifications from changed products.
pub struct Composer {
    primary_market: String,
    /// Present only when conversion is enabled for this run.
    rates: Option<RateTable>,
    now: DateTime<Utc>,
}

impl Composer {
    pub fn new(primary_market: &str, rates: Option<RateTable>, now: DateTime<Utc>) -> Self {
        Self {
            primary_market: primary_market.to_string(),
            rates,
            now,
        }
    }

    /// One notification per changed product; empty input yields nothing.
    pub fn compose_each(&self, updates: &[ProductUpdate]) -> Vec<Notification> {
        updates.iter().map(|u| self.compose_product(u)).collect()
    }

    pub fn compose_product(&self, update: &ProductUpdate) -> Notification {
        let mut description = Vec::new();
        if let Some(drop) = find_biggest_drop(&update.quotes) {
            description.push(format!("🔥 **{:.0}% off**", drop.percent.abs()));
        }
        if let Some(cheapest) = find_cheapest(&update.quotes) {
            description.push(format!(
                "Cheapest: **{}** — {}",
                cheapest.label,
                format_price(Some(cheapest.price), &cheapest.currency)
            ));
        }

        let mut sections: Vec<Section> = update
            .quotes
            .iter()
            .map(|q| Section {
                name: BLANK_NAME.to_string(),
                value: self.market_line(q),
            })
            .collect();

        let spark = sparkline::render_prices(&update.primary_history);
        if !spark.is_empty() {
            sections.push(Section {
                name: format!("Price history ({})", self.primary_market.to_uppercase()),
                value: format!("`{spark}`"),
            });
        }

        Notification {
            title: update.title.clone(),
            url: self.primary_quote(update).and_then(|q| q.info.link.clone()),
            description: description.join("\n"),
            color: Severity::from_quotes(&update.quotes).color(),
            timestamp: self.now,
            sections,
            thumbnail: self.thumbnail(update),
            footer: Some(format!("Product {}", update.product.id)),
        }
    }

    /// A single notification covering every changed product, or `None` when
    /// nothing changed.
    pub fn compose_digest(&self, updates: &[ProductUpdate]) -> Option<Notification> {
        if updates.is_empty() {
            return None;
        }

        let sections: Vec<Section> = updates
            .iter()
            .take(MAX_SECTIONS)
            .map(|u| self.digest_section(u))
            .collect();

        let mut description = format!("Price updates — {} items", updates.len());
        let hidden = updates.len().saturating_sub(MAX_SECTIONS);
        if hidden > 0 {
            description.push_str(&format!("\n…and {hidden} more not shown"));
        }

        let severity = combined_severity(updates.iter().map(|u| Severity::from_quotes(&u.quotes)));

        Some(Notification {
            title: "📦 Price Digest".to_string(),
            url: None,
            description,
            color: severity.color(),
            timestamp: self.now,
            sections,
            thumbnail: None,
            footer: None,
        })
    }

    fn digest_section(&self, update: &ProductUpdate) -> Section {
        let lines: Vec<String> = update.quotes.iter().map(|q| self.market_line(q)).collect();
        let mut body = lines.join("\n");

        let spark = sparkline::render_prices(&update.primary_history);
        if !spark.is_empty() {
            body.push_str(&format!("\n\n`{spark}`"));
        }
        if let Some(primary) = self.primary_quote(update) {
            if let Some(link) = &primary.info.link {
                body.push_str(&format!("\n[View on {}]({link})", primary.market.label));
            }
        }

        Section {
            name: truncate(&format!("{} ({})", update.title, update.product.id), SECTION_NAME_MAX),
            value: truncate(&body, SECTION_BODY_MAX),
        }
    }

    /// `**Label**: price`, plus the transition, conversion and rating
    /// annotations that apply.
    pub fn market_line(&self, quote: &MarketQuote) -> String {
        let currency = quote.currency();
        let current = quote.current_price();
        let mut line = format!("**{}**: {}", quote.market.label, format_price(current, currency));

        if let (Some(prev), Some(cur)) = (quote.previous_price(), current) {
            if prev != cur {
                let arrow = if cur < prev { "🔻" } else { "🔺" };
                let pct = percent_change(Some(prev), Some(cur))
                    .map(|p| format!(" {:.0}%", p.abs()))
                    .unwrap_or_default();
                line.push_str(&format!(
                    "  {arrow} ({} → {}){pct}",
                    format_price(Some(prev), currency),
                    format_price(Some(cur), currency),
                ));
            } else {
                line.push_str(" (no change)");
            }
        }

        if current.is_none() {
            if let Some(availability) = &quote.info.availability {
                line.push_str(&format!(" · {availability}"));
            }
        }

        if let (Some(rates), Some(cur)) = (&self.rates, current) {
            if currency != rates.target {
                if let Some(converted) = convert_currency(cur, currency, rates) {
                    line.push_str(&format!(" · ≈ {}", format_price(Some(converted), &rates.target)));
                }
            }
        }

        if let Some(rating) = quote.info.rating {
            line.push_str(&format!(" · ⭐ {rating:.1}"));
            if let Some(reviews) = quote.info.review_count {
                line.push_str(&format!(" ({reviews})"));
            }
        }

        line
    }

    fn primary_quote<'a>(&self, update: &'a ProductUpdate) -> Option<&'a MarketQuote> {
        update.quote(&self.primary_market)
    }

    /// Primary market image, else the first other market that has one.
    fn thumbnail(&self, update: &ProductUpdate) -> Option<String> {
        self.primary_quote(update)
            .and_then(|q| q.info.image.clone())
            .or_else(|| {
                update
                    .quotes
                    .iter()
                    .filter(|q| q.market.code != self.primary_market)
                    .find_map(|q| q.info.image.clone())
            })
    }
}

/// Sent by `--test` to confirm the webhook is reachable.
pub fn test_notification(now: DateTime<Utc>) -> Notification {
    Notification {
        title: "✅ Price Tracker — Test".to_string(),
        url: None,
        description: "This is a test notification. The tracker is configured correctly.".to_string(),
        color: colors::DECREASE,
        timestamp: now,
        sections: Vec::new(),
        thumbnail: None,
        footer: None,
    }
}

/// Whole amounts print without decimals, everything else with two.
pub fn format_price(price: Option<f64>, currency: &str) -> String {
    match price {
        None => "N/A".to_string(),
        Some(p) if p.fract() == 0.0 && p.abs() < 1e15 => format!("{} {currency}", p as i64),
        Some(p) => format!("{p:.2} {currency}"),
    }
}

fn combined_severity(severities: impl Iterator<Item = Severity>) -> Severity {
    let mut out = Severity::Neutral;
    for s in severities {
        match s {
            Severity::Decrease => return Severity::Decrease,
            Severity::Increase => out = Severity::Increase,
            Severity::Neutral => {}
        }
    }
    out
}

/// Cut to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
