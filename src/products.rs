use std::path::Path;

use tracing::{info, warn};

use crate::types::Product;

/// Fallback list used when no product file is available.
pub fn default_products() -> Vec<Product> {
    vec![
        Product::new("B0D9V6M5L8", "Spider-Man: Blue"),
        Product::new("B0D2LM8NJK", "The Flash: Rebirth"),
        Product::new(
            "B0CYK8W4DJ",
            "Superman: The Rebirth Omnibus by Peter J. Tomasi & Patrick Gleason",
        ),
        Product::new("B0CKVZCSX3", "Tim Drake: Robin Vol. 1"),
        Product::new("B07XL7C9C1", "Invincible Compendium Vol. 1"),
        Product::new("B07Y3Y1TQK", "Harleen"),
        Product::new("B0D2X9L9ND", "Absolute Superman for All Seasons"),
        Product::new("B0C1WBN7NY", "Daredevil by Frank Miller & Klaus Janson Omnibus"),
        Product::new("B0CXZJFR8V", "Justice League: Origin (The New 52)"),
        Product::new("B0C6S9ZVBY", "Ultimate Spider-Man Omnibus Vol. 1"),
        Product::new("B0CP9VFXRB", "Ultimate Spider-Man (2024) Vol. 1"),
    ]
}

/// Load the tracked products from `path`, falling back to the built-in list
/// when the file is missing, unreadable, or yields nothing.
pub fn load_products(path: &Path) -> Vec<Product> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let products = parse_product_list(&text);
            if !products.is_empty() {
                info!(count = products.len(), path = %path.display(), "Loaded {} products from {}", products.len(), path.display());
                return products;
            }
            warn!(path = %path.display(), "Product file has no entries; using built-in list");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No product file; using built-in list");
        }
        Err(e) => {
            warn!(path = %path.display(), "Product file unreadable ({e}); using built-in list");
        }
    }
    default_products()
}

/// Parse `id,title` lines. Blank lines are ignored; a first line that looks
/// like a header is skipped; a line without a title uses the id as title.
pub fn parse_product_list(text: &str) -> Vec<Product> {
    let mut out = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if i == 0 && looks_like_header(line) {
            continue;
        }

        let mut parts = line.splitn(2, ',').map(str::trim);
        let id = parts.next().unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        let title = parts.next().filter(|t| !t.is_empty()).unwrap_or(id);
        out.push(Product::new(id, title));
    }
    out
}

fn looks_like_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    let first = lower.split(',').next().unwrap_or_default().trim();
    lower.contains("asin") || first == "id" || first == "product_id"
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    #[test]
    fn header_line_is_skipped() {
        let products = parse_product_list("asin,title\nB000000001,First\nB000000002,Second\n");
        assert_eq!(products.len(), 2);
        assert_eq!(products[0], Product::new("B000000001", "First"));
    }

    #[test]
    fn first_data_line_is_kept_without_header() {
        let products = parse_product_list("B000000001,First\n");
        assert_eq!(products, vec![Product::new("B000000001", "First")]);
    }

    #[test]
    fn title_may_contain_commas() {
        let products = parse_product_list("B000000001, Batman, Year One \n");
        assert_eq!(products[0].title_hint.as_deref(), Some("Batman, Year One"));
    }

    #[test]
    fn id_only_line_uses_id_as_title() {
        let products = parse_product_list("\nB000000009\n\n");
        assert_eq!(products, vec![Product::new("B000000009", "B000000009")]);
    }

    #[test]
    fn missing_file_falls_back_to_builtin_list() {
        let dir = TempDir::new().unwrap();
        let products = load_products(&dir.child("products.csv"));
        assert_eq!(products, default_products());
    }

    #[test]
    fn header_only_file_falls_back_to_builtin_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("products.csv");
        std::fs::write(&path, "asin,title\n").unwrap();
        assert_eq!(load_products(&path), default_products());
    }
}
