/// Eight-step block palette, lowest first.
pub const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Rendered in place of an absent datapoint.
pub const BLANK: char = ' ';

/// One glyph per position, scaled between the series' own min and max.
///
/// No present values renders as an empty string; a flat series renders as
/// the lowest glyph throughout.
pub fn render(series: &[Option<f64>]) -> String {
    let present = series.iter().flatten().copied();
    let Some((min, max)) = present.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    }) else {
        return String::new();
    };

    if min == max {
        return GLYPHS[0].to_string().repeat(series.len());
    }

    let top = (GLYPHS.len() - 1) as f64;
    series
        .iter()
        .map(|v| match v {
            Some(v) => {
                let idx = ((v - min) / (max - min) * top).floor() as usize;
                GLYPHS[idx.min(GLYPHS.len() - 1)]
            }
            None => BLANK,
        })
        .collect()
}

/// Convenience for fully-present series such as stored history.
pub fn render_prices(prices: &[f64]) -> String {
    let series: Vec<Option<f64>> = prices.iter().copied().map(Some).collect();
    render(&series)
}
